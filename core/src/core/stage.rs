// flowline/src/core/stage.rs

//! Defines the `Stage` contract every processing unit implements, and the
//! `StageKind` descriptor the pipeline derives from it once at registration.

use crate::core::abort::AbortSignal;
use crate::core::envelope::Envelope;
use crate::core::output::Output;
use async_trait::async_trait;

/// A unit of work in a pipeline.
///
/// The pipeline calls `process_data` once per inbound record (the first stage
/// gets a single `Envelope::start()` record), then `finish` exactly once after
/// the upstream is exhausted and every `process_data` call has returned.
///
/// Neither method returns an error. A stage that hits a failure it cannot
/// handle reports it on `abort`, which halts the whole run.
///
/// Methods take `&self`: a concurrent stage has several `process_data` calls in
/// flight at once. Any state kept across calls must use interior mutability.
#[async_trait]
pub trait Stage: Send + Sync {
  /// Handles one record, sending zero or more records to `output`.
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal);

  /// Called once after the last `process_data`. May emit trailing output,
  /// e.g. a partially filled batch.
  async fn finish(&self, output: &mut Output, abort: &AbortSignal) {
    let _ = (output, abort);
  }

  /// Size of the worker pool `process_data` is dispatched to. Values of 0 or 1
  /// mean strictly sequential execution.
  fn concurrency(&self) -> usize {
    1
  }

  /// Display name used in logs.
  fn name(&self) -> &str {
    short_type_name(std::any::type_name::<Self>())
  }
}

/// How a stage's `process_data` calls are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
  Sequential,
  Concurrent { pool_size: usize },
}

impl StageKind {
  /// Reads the stage's concurrency capability. Done once when the stage is registered.
  pub fn probe(stage: &dyn Stage) -> Self {
    match stage.concurrency() {
      0 | 1 => StageKind::Sequential,
      pool_size => StageKind::Concurrent { pool_size },
    }
  }

  pub fn pool_size(&self) -> usize {
    match self {
      StageKind::Sequential => 1,
      StageKind::Concurrent { pool_size } => *pool_size,
    }
  }
}

// "my_crate::stages::Upper<my_crate::X>" -> "Upper<my_crate::X>"
fn short_type_name(full: &'static str) -> &'static str {
  let head_end = full.find('<').unwrap_or(full.len());
  match full[..head_end].rfind("::") {
    Some(pos) => &full[pos + 2..],
    None => full,
  }
}
