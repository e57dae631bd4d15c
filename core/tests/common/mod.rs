// tests/common/mod.rs
#![allow(dead_code)] // Allow unused code in this common test module

use async_trait::async_trait;
use flowline::{AbortSignal, Envelope, Output, Stage};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::{
  atomic::{AtomicUsize, Ordering},
  Arc,
};
use std::time::Duration;
use tracing::Level;

// --- Helper for Tracing Setup (call once per test run if needed) ---
use once_cell::sync::Lazy;
static TRACING_INIT: Lazy<()> = Lazy::new(|| {
  tracing_subscriber::fmt()
    .with_max_level(Level::DEBUG)
    .with_test_writer() // Important for tests to capture output
    .try_init()
    .ok(); // Allow multiple initializations in tests (ok if fails)
});

pub fn setup_tracing() {
  Lazy::force(&TRACING_INIT);
}

pub fn number_of(record: &Envelope) -> u64 {
  let value: Value = record.parse().expect("record should be JSON");
  value["n"].as_u64().expect("record should carry an 'n'")
}

// --- Source: emits {"n": 0..count} on the start record ---
pub struct NumberSource {
  pub count: u64,
  pub start_calls: Arc<AtomicUsize>,
}

impl NumberSource {
  pub fn new(count: u64) -> Self {
    Self {
      count,
      start_calls: Arc::new(AtomicUsize::new(0)),
    }
  }
}

#[async_trait]
impl Stage for NumberSource {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    assert!(record.is_start(), "source should only ever see the start record");
    self.start_calls.fetch_add(1, Ordering::SeqCst);
    for n in 0..self.count {
      let Some(envelope) = abort.kill_if_err(Envelope::wrap(&json!({ "n": n }))) else {
        return;
      };
      if abort.kill_if_err(output.send(envelope).await).is_none() {
        return;
      }
    }
  }
}

// --- Fan-out: varying latency per record, emits `copies` records each ---
pub struct FanOut {
  pub copies: u64,
  pub concurrency: usize,
  pub in_flight: Arc<AtomicUsize>,
  pub max_in_flight: Arc<AtomicUsize>,
}

impl FanOut {
  pub fn new(copies: u64, concurrency: usize) -> Self {
    Self {
      copies,
      concurrency,
      in_flight: Arc::new(AtomicUsize::new(0)),
      max_in_flight: Arc::new(AtomicUsize::new(0)),
    }
  }
}

#[async_trait]
impl Stage for FanOut {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
    self.max_in_flight.fetch_max(now, Ordering::SeqCst);

    let n = number_of(&record);
    // Later records often finish before earlier ones.
    tokio::time::sleep(Duration::from_millis((n * 37) % 11)).await;
    self.in_flight.fetch_sub(1, Ordering::SeqCst);

    for copy in 0..self.copies {
      let Some(envelope) = abort.kill_if_err(Envelope::wrap(&json!({ "n": n, "copy": copy }))) else {
        return;
      };
      if abort.kill_if_err(output.send(envelope).await).is_none() {
        return;
      }
    }
  }

  fn concurrency(&self) -> usize {
    self.concurrency
  }
}

// --- Pass-through: forwards every record unchanged ---
pub struct PassThrough;

#[async_trait]
impl Stage for PassThrough {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    abort.kill_if_err(output.send(record).await);
  }
}

// --- Batcher: groups records into arrays, flushing the remainder in finish ---
pub struct Batcher {
  pub batch_size: usize,
  pending: Mutex<Vec<Value>>,
}

impl Batcher {
  pub fn new(batch_size: usize) -> Self {
    Self {
      batch_size,
      pending: Mutex::new(Vec::new()),
    }
  }
}

#[async_trait]
impl Stage for Batcher {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    let Some(value) = abort.kill_if_err(record.to_value()) else {
      return;
    };
    let full = {
      let mut pending = self.pending.lock();
      pending.push(value);
      if pending.len() >= self.batch_size {
        Some(std::mem::take(&mut *pending))
      } else {
        None
      }
    };
    if let Some(batch) = full {
      if let Some(envelope) = abort.kill_if_err(Envelope::wrap(&batch)) {
        abort.kill_if_err(output.send(envelope).await);
      }
    }
  }

  async fn finish(&self, output: &mut Output, abort: &AbortSignal) {
    let rest = std::mem::take(&mut *self.pending.lock());
    if rest.is_empty() {
      return;
    }
    if let Some(envelope) = abort.kill_if_err(Envelope::wrap(&rest)) {
      abort.kill_if_err(output.send(envelope).await);
    }
  }
}

// --- Failing stage: reports an error on the record numbered `fail_on` ---
pub struct FailOn {
  pub fail_on: u64,
  pub message: &'static str,
}

#[async_trait]
impl Stage for FailOn {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    if number_of(&record) == self.fail_on {
      tracing::warn!(target: "test_stages", fail_on = self.fail_on, "failing with: '{}'", self.message);
      abort.kill(anyhow::anyhow!(self.message));
      return;
    }
    abort.kill_if_err(output.send(record).await);
  }
}

// --- Collector: terminal stage recording everything it receives ---
#[derive(Clone, Default)]
pub struct Collector {
  pub seen: Arc<Mutex<Vec<Value>>>,
  pub process_calls: Arc<AtomicUsize>,
  pub finish_calls: Arc<AtomicUsize>,
  /// Number of `process_data` calls observed when `finish` ran.
  pub processed_at_finish: Arc<Mutex<Option<usize>>>,
}

impl Collector {
  pub fn values(&self) -> Vec<Value> {
    self.seen.lock().clone()
  }

  pub fn numbers(&self) -> Vec<u64> {
    self.values().iter().filter_map(|v| v["n"].as_u64()).collect()
  }
}

#[async_trait]
impl Stage for Collector {
  async fn process_data(&self, record: Envelope, _output: &mut Output, abort: &AbortSignal) {
    if let Some(value) = abort.kill_if_err(record.to_value()) {
      self.seen.lock().push(value);
    }
    self.process_calls.fetch_add(1, Ordering::SeqCst);
  }

  async fn finish(&self, _output: &mut Output, _abort: &AbortSignal) {
    self.finish_calls.fetch_add(1, Ordering::SeqCst);
    *self.processed_at_finish.lock() = Some(self.process_calls.load(Ordering::SeqCst));
  }
}

/// Shares a stage with the test so its counters stay observable after the run.
pub fn shared<S: Stage + 'static>(stage: S) -> (Arc<S>, Arc<dyn Stage>) {
  let stage = Arc::new(stage);
  let as_dyn: Arc<dyn Stage> = stage.clone();
  (stage, as_dyn)
}
