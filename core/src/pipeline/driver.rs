// flowline/src/pipeline/driver.rs

//! Stage drivers: the per-stage tasks that feed records into a stage, call its
//! `finish`, and close its output.
//!
//! A sequential driver calls `process_data` in arrival order on its own task.
//! A concurrent driver admits up to `pool_size` invocations at once; each one
//! writes into a private buffer tagged with its sequence number, and a single
//! emitter task forwards those buffers downstream in sequence order.

use crate::core::abort::AbortSignal;
use crate::core::envelope::Envelope;
use crate::core::output::Output;
use crate::core::stage::{Stage, StageKind};
use crate::error::FlowError;
use crate::pipeline::reorder::ReorderBuffer;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinSet};
use tracing::{event, Instrument, Level};

/// Where a driver pulls records from.
pub(crate) enum Input {
  /// First stage: one synthetic start record.
  Start { delivered: bool },
  /// Every other stage: the previous stage's output channel.
  Channel(mpsc::Receiver<Envelope>),
}

impl Input {
  pub(crate) fn start() -> Self {
    Input::Start { delivered: false }
  }

  /// Next record, or `None` once the upstream is closed or the run is aborted.
  async fn next(&mut self, abort: &AbortSignal) -> Option<Envelope> {
    match self {
      Input::Start { delivered } => {
        if *delivered || abort.is_aborted() {
          return None;
        }
        *delivered = true;
        Some(Envelope::start())
      }
      Input::Channel(receiver) => {
        tokio::select! {
          biased;
          _ = abort.cancelled() => None,
          record = receiver.recv() => record,
        }
      }
    }
  }
}

/// Result of one concurrent invocation, parked in the reorder buffer until its turn.
struct Completed {
  seq: u64,
  records: Vec<Envelope>,
  // Released only once the records are emitted, bounding buffered work by the pool size.
  _permit: OwnedSemaphorePermit,
}

/// Runs one stage to completion.
///
/// A panic inside the stage is recorded on the abort signal before the
/// driver's channels are dropped, so neighbouring stages never mistake it for
/// a normal end of input.
pub(crate) async fn drive(stage: Arc<dyn Stage>, kind: StageKind, input: Input, output: Output, abort: AbortSignal) {
  let stage_name = stage.name().to_string();
  let driver_abort = abort.clone();
  let mut run = Box::pin(
    AssertUnwindSafe(async move {
      match kind {
        StageKind::Sequential => drive_sequential(stage, input, output, &driver_abort).await,
        StageKind::Concurrent { pool_size } => {
          drive_concurrent(stage, pool_size, input, output, &driver_abort).await
        }
      }
    })
    .catch_unwind(),
  );

  if let Err(panic) = (&mut run).await {
    abort.kill(FlowError::Internal(format!(
      "stage '{}' panicked: {}",
      stage_name,
      panic_message(&*panic)
    )));
  }
  // Only now are the stage's input receiver and output sender released.
  drop(run);
}

async fn drive_sequential(stage: Arc<dyn Stage>, mut input: Input, mut output: Output, abort: &AbortSignal) {
  event!(Level::DEBUG, "Sequential driver started.");
  let mut processed: u64 = 0;

  while let Some(record) = input.next(abort).await {
    event!(Level::TRACE, seq = processed, bytes = record.len(), "Dispatching record.");
    stage.process_data(record, &mut output, abort).await;
    processed += 1;
  }

  if abort.is_aborted() {
    event!(Level::DEBUG, processed, "Run aborted; skipping finish.");
    return;
  }

  event!(Level::DEBUG, processed, "Upstream exhausted; calling finish.");
  stage.finish(&mut output, abort).await;
  event!(Level::DEBUG, "Stage finished; closing output.");
}

async fn drive_concurrent(
  stage: Arc<dyn Stage>,
  pool_size: usize,
  mut input: Input,
  output: Output,
  abort: &AbortSignal,
) {
  event!(Level::DEBUG, pool_size, "Concurrent driver started.");
  let stage_name: Arc<str> = Arc::from(stage.name());
  let terminal = output.is_terminal();
  let permits = Arc::new(Semaphore::new(pool_size));
  let (done_tx, done_rx) = mpsc::channel::<Completed>(pool_size);
  let emitter = tokio::spawn(emit_in_order(done_rx, output, pool_size, abort.clone()).in_current_span());
  let mut workers = JoinSet::new();
  let mut seq: u64 = 0;

  while let Some(record) = input.next(abort).await {
    let permit = tokio::select! {
      biased;
      _ = abort.cancelled() => break,
      permit = permits.clone().acquire_owned() => match permit {
        Ok(permit) => permit,
        Err(_) => break,
      },
    };

    event!(Level::TRACE, seq, bytes = record.len(), "Admitting record to worker pool.");
    let worker = Worker {
      stage: stage.clone(),
      stage_name: stage_name.clone(),
      done: done_tx.clone(),
      abort: abort.clone(),
      terminal,
    };
    workers.spawn(worker.run(seq, record, permit).in_current_span());
    seq += 1;

    while let Some(joined) = workers.try_join_next() {
      record_worker_exit(joined, &stage_name, abort);
    }
  }

  // The emitter stops once every worker has dropped its handle on `done`.
  drop(done_tx);
  while let Some(joined) = workers.join_next().await {
    record_worker_exit(joined, &stage_name, abort);
  }

  let mut output = match emitter.await {
    Ok(output) => output,
    Err(e) => {
      abort.kill(FlowError::Internal(format!("emitter of stage '{}' failed: {}", stage_name, e)));
      return;
    }
  };

  if abort.is_aborted() {
    event!(Level::DEBUG, admitted = seq, "Run aborted; skipping finish.");
    return;
  }

  event!(Level::DEBUG, admitted = seq, "Upstream exhausted and workers drained; calling finish.");
  stage.finish(&mut output, abort).await;
  event!(Level::DEBUG, "Stage finished; closing output.");
}

struct Worker {
  stage: Arc<dyn Stage>,
  stage_name: Arc<str>,
  done: mpsc::Sender<Completed>,
  abort: AbortSignal,
  terminal: bool,
}

impl Worker {
  async fn run(self, seq: u64, record: Envelope, permit: OwnedSemaphorePermit) {
    let mut buffered = if self.terminal {
      Output::terminal(self.abort.clone())
    } else {
      Output::buffer(self.abort.clone())
    };

    if !self.abort.is_aborted() {
      let invocation = AssertUnwindSafe(self.stage.process_data(record, &mut buffered, &self.abort)).catch_unwind();
      if let Err(panic) = invocation.await {
        self.abort.kill(FlowError::Internal(format!(
          "stage '{}' panicked: {}",
          self.stage_name,
          panic_message(&*panic)
        )));
      }
    }

    // Always report, even when empty, so the emitter's cursor never stalls on a gap.
    let completed = Completed {
      seq,
      records: buffered.take_buffered(),
      _permit: permit,
    };
    if self.done.send(completed).await.is_err() {
      event!(Level::TRACE, seq, "Emitter gone; dropping invocation output.");
    }
  }
}

/// Forwards each invocation's records downstream strictly in sequence order.
/// Hands the output back so the driver can pass it to `finish`.
async fn emit_in_order(
  mut done: mpsc::Receiver<Completed>,
  mut output: Output,
  pool_size: usize,
  abort: AbortSignal,
) -> Output {
  let mut reorder = ReorderBuffer::with_capacity(pool_size);

  'receive: while let Some(completed) = done.recv().await {
    reorder.insert(completed.seq, completed);
    while let Some(ready) = reorder.pop_ready() {
      event!(Level::TRACE, seq = ready.seq, records = ready.records.len(), "Emitting invocation output.");
      for record in ready.records {
        if let Err(e) = output.send(record).await {
          if !abort.is_aborted() {
            abort.kill(e);
          }
          break 'receive;
        }
      }
    }
  }

  if !reorder.is_empty() {
    event!(Level::DEBUG, pending = reorder.len(), "Discarding unemitted invocation output.");
  }
  output
}

fn record_worker_exit(joined: Result<(), JoinError>, stage_name: &str, abort: &AbortSignal) {
  if let Err(e) = joined {
    abort.kill(FlowError::Internal(format!("worker of stage '{}' failed: {}", stage_name, e)));
  }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
  if let Some(message) = panic.downcast_ref::<&str>() {
    (*message).to_string()
  } else if let Some(message) = panic.downcast_ref::<String>() {
    message.clone()
  } else {
    "non-string panic payload".to_string()
  }
}
