// flowline/examples/concurrent_transform.rs

use async_trait::async_trait;
use flowline::{AbortSignal, Envelope, FlowError, FlowResult, Output, Pipeline, Stage};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

#[derive(Debug, Serialize, Deserialize)]
struct Reading {
  sensor: u32,
  celsius: f64,
}

// 1. A source stage: runs once, on the start record, and produces the stream.
struct Sensors {
  readings: u32,
}

#[async_trait]
impl Stage for Sensors {
  async fn process_data(&self, _start: Envelope, output: &mut Output, abort: &AbortSignal) {
    for sensor in 0..self.readings {
      let reading = Reading {
        sensor,
        celsius: 18.0 + (sensor % 7) as f64,
      };
      let Some(envelope) = abort.kill_if_err(Envelope::wrap(&reading)) else {
        return;
      };
      if abort.kill_if_err(output.send(envelope).await).is_none() {
        return;
      }
    }
  }
}

// 2. A slow, I/O-like stage. Declaring a concurrency of 8 lets eight lookups
//    overlap, while downstream still sees readings in their original order.
struct Calibrate;

impl Calibrate {
  async fn calibrate(&self, record: Envelope) -> FlowResult<Envelope> {
    let mut reading: Reading = record.parse()?;
    tokio::time::sleep(Duration::from_millis(20 + (reading.sensor as u64 * 13) % 30)).await;
    reading.celsius += 0.25;
    Envelope::wrap(&reading)
  }
}

#[async_trait]
impl Stage for Calibrate {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    if let Some(calibrated) = abort.kill_if_err(self.calibrate(record).await) {
      abort.kill_if_err(output.send(calibrated).await);
    }
  }

  fn concurrency(&self) -> usize {
    8
  }
}

// 3. The terminal stage prints what arrives, then reports in `finish`.
#[derive(Default)]
struct Report {
  last_sensor: parking_lot::Mutex<Option<u32>>,
}

#[async_trait]
impl Stage for Report {
  async fn process_data(&self, record: Envelope, _output: &mut Output, abort: &AbortSignal) {
    let Some(reading) = abort.kill_if_err(record.parse::<Reading>()) else {
      return;
    };
    let mut last = self.last_sensor.lock();
    if let Some(previous) = *last {
      if reading.sensor != previous + 1 {
        abort.kill(FlowError::Internal(format!("out of order: {} after {}", reading.sensor, previous)));
        return;
      }
    }
    *last = Some(reading.sensor);
    info!(sensor = reading.sensor, celsius = reading.celsius, "Reading stored.");
  }

  async fn finish(&self, _output: &mut Output, _abort: &AbortSignal) {
    info!(last_sensor = ?*self.last_sensor.lock(), "All readings stored.");
  }
}

#[tokio::main]
async fn main() -> FlowResult<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  info!("--- Concurrent Transform Example ---");

  let mut pipeline = Pipeline::default();
  pipeline
    .add_stage(Sensors { readings: 40 })
    .add_stage(Calibrate)
    .add_stage(Report::default());

  info!(stages = ?pipeline.stage_names(), kinds = ?pipeline.stage_kinds(), "Starting pipeline execution...");
  pipeline.run().await?;
  info!("Pipeline completed successfully!");
  Ok(())
}
