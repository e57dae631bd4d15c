// flowline/src/core/abort.rs

//! The run-wide, one-shot fatal error signal shared by every stage of a pipeline run.

use crate::error::FlowError;
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{event, Level};

struct AbortInner {
  first_error: Mutex<Option<FlowError>>,
  done: CancellationToken,
}

/// Write-once error cell plus a "done" condition drivers poll cooperatively.
///
/// The first error written is authoritative; later writes are logged and dropped.
/// Cloning yields another handle to the same cell.
#[derive(Clone)]
pub struct AbortSignal {
  inner: Arc<AbortInner>,
}

impl AbortSignal {
  pub(crate) fn new() -> Self {
    Self {
      inner: Arc::new(AbortInner {
        first_error: Mutex::new(None),
        done: CancellationToken::new(),
      }),
    }
  }

  /// Records `err` as the run's fatal error and aborts the run.
  /// Returns `true` if this call was the first writer.
  pub fn kill(&self, err: impl Into<FlowError>) -> bool {
    let err = err.into();
    {
      let mut slot = self.inner.first_error.lock();
      if slot.is_some() {
        event!(Level::WARN, error = %err, "Pipeline already aborted; discarding later error.");
        return false;
      }
      event!(Level::ERROR, error = %err, "Aborting pipeline run.");
      *slot = Some(err);
    }
    // The error must be visible before anyone observes the cancellation.
    self.inner.done.cancel();
    true
  }

  /// Kills the run if `result` is an error, otherwise hands back the value.
  pub fn kill_if_err<T, E: Into<FlowError>>(&self, result: Result<T, E>) -> Option<T> {
    match result {
      Ok(value) => Some(value),
      Err(e) => {
        self.kill(e);
        None
      }
    }
  }

  pub fn is_aborted(&self) -> bool {
    self.inner.done.is_cancelled()
  }

  /// Completes once the run has been aborted.
  pub async fn cancelled(&self) {
    self.inner.done.cancelled().await
  }

  pub(crate) fn take_error(&self) -> Option<FlowError> {
    self.inner.first_error.lock().take()
  }
}

impl std::fmt::Debug for AbortSignal {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("AbortSignal")
      .field("aborted", &self.is_aborted())
      .finish()
  }
}
