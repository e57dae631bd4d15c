// flowline/src/core/output.rs

//! Defines `Output`, a stage's handle on its downstream channel.

use crate::core::abort::AbortSignal;
use crate::core::envelope::Envelope;
use crate::error::{FlowError, FlowResult};
use tokio::sync::mpsc;

enum Target {
  /// Bounded channel into the next stage.
  Channel(mpsc::Sender<Envelope>),
  /// Per-invocation buffer of a concurrent stage, drained by its in-order emitter.
  Buffer(Vec<Envelope>),
  /// The last stage of a pipeline has nowhere to send.
  Terminal,
}

/// Where a stage sends the records it produces.
///
/// The driver owns the underlying sender and closes it once the stage's
/// `finish` has returned, so stages never close their own output.
pub struct Output {
  target: Target,
  abort: AbortSignal,
}

impl Output {
  pub(crate) fn channel(sender: mpsc::Sender<Envelope>, abort: AbortSignal) -> Self {
    Self {
      target: Target::Channel(sender),
      abort,
    }
  }

  pub(crate) fn buffer(abort: AbortSignal) -> Self {
    Self {
      target: Target::Buffer(Vec::new()),
      abort,
    }
  }

  pub(crate) fn terminal(abort: AbortSignal) -> Self {
    Self {
      target: Target::Terminal,
      abort,
    }
  }

  /// Sends `record` downstream, waiting while the downstream channel is full.
  ///
  /// Fails with `FlowError::Aborted` if the run is aborted while waiting or the
  /// downstream stage is gone, and with `FlowError::TerminalOutput` when called on
  /// the last stage of a pipeline.
  pub async fn send(&mut self, record: Envelope) -> FlowResult<()> {
    match &mut self.target {
      Target::Buffer(records) => {
        records.push(record);
        Ok(())
      }
      Target::Terminal => Err(FlowError::TerminalOutput),
      Target::Channel(sender) => {
        tokio::select! {
          biased;
          _ = self.abort.cancelled() => Err(FlowError::Aborted),
          sent = sender.send(record) => sent.map_err(|_| FlowError::Aborted),
        }
      }
    }
  }

  /// `true` for the last stage of a pipeline, which must not emit.
  pub fn is_terminal(&self) -> bool {
    matches!(self.target, Target::Terminal)
  }

  /// Takes the records buffered by one concurrent invocation.
  pub(crate) fn take_buffered(&mut self) -> Vec<Envelope> {
    match &mut self.target {
      Target::Buffer(records) => std::mem::take(records),
      _ => Vec::new(),
    }
  }
}

impl std::fmt::Debug for Output {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let kind = match &self.target {
      Target::Channel(_) => "channel",
      Target::Buffer(_) => "buffer",
      Target::Terminal => "terminal",
    };
    f.debug_struct("Output").field("target", &kind).finish()
  }
}
