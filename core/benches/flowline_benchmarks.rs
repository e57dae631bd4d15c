use async_trait::async_trait;
use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use flowline::{AbortSignal, Envelope, FlowConfig, Output, Pipeline, Stage};
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Runtime; // To run async code within Criterion

// --- Benchmark Stages ---

struct Numbers {
  count: u64,
}

#[async_trait]
impl Stage for Numbers {
  async fn process_data(&self, _record: Envelope, output: &mut Output, abort: &AbortSignal) {
    for n in 0..self.count {
      let Some(envelope) = abort.kill_if_err(Envelope::wrap(&json!({ "n": n, "payload": "xxxxxxxxxxxxxxxx" }))) else {
        return;
      };
      if abort.kill_if_err(output.send(envelope).await).is_none() {
        return;
      }
    }
  }
}

// Simulates an I/O bound transform.
struct Delay {
  delay_micros: u64,
  concurrency: usize,
}

#[async_trait]
impl Stage for Delay {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    if self.delay_micros > 0 {
      tokio::time::sleep(std::time::Duration::from_micros(self.delay_micros)).await;
    }
    abort.kill_if_err(output.send(record).await);
  }

  fn concurrency(&self) -> usize {
    self.concurrency
  }
}

struct Count {
  seen: Arc<AtomicU64>,
}

#[async_trait]
impl Stage for Count {
  async fn process_data(&self, _record: Envelope, _output: &mut Output, _abort: &AbortSignal) {
    self.seen.fetch_add(1, Ordering::Relaxed);
  }
}

fn build_pipeline(records: u64, passes: usize, delay_micros: u64, concurrency: usize, capacity: usize) -> Pipeline {
  let mut pipeline = Pipeline::default().with_config(FlowConfig::default().with_channel_capacity(capacity));
  pipeline.add_stage(Numbers { count: records });
  for _ in 0..passes {
    pipeline.add_stage(Delay {
      delay_micros,
      concurrency,
    });
  }
  pipeline.add_stage(Count {
    seen: Arc::new(AtomicU64::new(0)),
  });
  pipeline
}

// --- Benchmark Functions ---

fn bench_channel_overhead(c: &mut Criterion) {
  let mut group = c.benchmark_group("ChannelOverhead");
  let rt = Runtime::new().unwrap();
  let records = 1_000u64;

  for passes in [1usize, 5, 10].iter() {
    for capacity in [1usize, 16, 256].iter() {
      let pipeline = build_pipeline(records, *passes, 0, 1, *capacity);
      group.throughput(Throughput::Elements(records));
      group.bench_with_input(
        BenchmarkId::new(format!("{}stages_cap{}", passes, capacity), records),
        &pipeline,
        |b, pipeline| {
          b.to_async(&rt).iter(|| async {
            pipeline.run().await.unwrap();
          });
        },
      );
    }
  }
  group.finish();
}

fn bench_worker_pool(c: &mut Criterion) {
  let mut group = c.benchmark_group("WorkerPool");
  group.sample_size(20);
  let rt = Runtime::new().unwrap();
  let records = 200u64;

  for concurrency in [1usize, 4, 16].iter() {
    for delay_us in [10u64, 100].iter() {
      let pipeline = build_pipeline(records, 1, *delay_us, *concurrency, 16);
      group.throughput(Throughput::Elements(records));
      group.bench_with_input(
        BenchmarkId::new(format!("k{}_{}us_delay", concurrency, delay_us), *concurrency),
        &pipeline,
        |b, pipeline| {
          b.to_async(&rt).iter(|| async {
            pipeline.run().await.unwrap();
          });
        },
      );
    }
  }
  group.finish();
}

fn bench_envelope_extract(c: &mut Criterion) {
  let rows: Vec<_> = (0..100).map(|n| json!({ "id": n, "name": format!("row-{}", n), "score": n as f64 / 2.0 })).collect();
  let envelope = Envelope::wrap(&rows).unwrap();

  c.bench_function("Envelope::extract_objects/100rows", |b| {
    b.iter(|| {
      let objects = envelope.extract_objects().unwrap();
      criterion::black_box(objects.len());
    })
  });
}

criterion_group!(benches, bench_channel_overhead, bench_worker_pool, bench_envelope_extract);
criterion_main!(benches);
