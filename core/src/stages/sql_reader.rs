// flowline/src/stages/sql_reader.rs

use crate::config::FlowConfig;
use crate::core::{AbortSignal, Envelope, Output, Stage};
use crate::error::FlowResult;
use crate::relational::source::stream_query;
use async_trait::async_trait;
use sqlx::AnyPool;
use std::sync::Arc;
use tracing::{event, Level};

type QueryFn = Arc<dyn Fn(&Envelope) -> FlowResult<String> + Send + Sync + 'static>;

enum QuerySource {
  Static(String),
  PerRecord(QueryFn),
}

/// Runs a query for every record it receives and sends the result set
/// downstream as batches of row objects.
///
/// As the first stage of a pipeline it runs exactly once, on the start record.
/// Query and read failures abort the run.
pub struct SqlReader {
  pool: AnyPool,
  query: QuerySource,
  batch_size: usize,
  channel_capacity: usize,
}

impl SqlReader {
  pub fn new(pool: AnyPool, query: impl Into<String>) -> Self {
    Self::with_source(pool, QuerySource::Static(query.into()))
  }

  /// Derives the query from each incoming record, e.g. to look up rows by an
  /// id the previous stage produced.
  pub fn with_query_fn(pool: AnyPool, query_fn: impl Fn(&Envelope) -> FlowResult<String> + Send + Sync + 'static) -> Self {
    Self::with_source(pool, QuerySource::PerRecord(Arc::new(query_fn)))
  }

  fn with_source(pool: AnyPool, query: QuerySource) -> Self {
    let defaults = FlowConfig::default();
    Self {
      pool,
      query,
      batch_size: defaults.sql_batch_size,
      channel_capacity: defaults.channel_capacity,
    }
  }

  /// Rows per emitted envelope. 0 emits each result set as a single envelope.
  pub fn with_batch_size(mut self, batch_size: usize) -> Self {
    self.batch_size = batch_size;
    self
  }

  /// Takes batch size and buffering from `config`.
  pub fn with_config(mut self, config: &FlowConfig) -> Self {
    self.batch_size = config.sql_batch_size;
    self.channel_capacity = config.channel_capacity;
    self
  }
}

#[async_trait]
impl Stage for SqlReader {
  async fn process_data(&self, record: Envelope, output: &mut Output, abort: &AbortSignal) {
    let query = match &self.query {
      QuerySource::Static(query) => query.clone(),
      QuerySource::PerRecord(query_fn) => match abort.kill_if_err(query_fn(&record)) {
        Some(query) => query,
        None => return,
      },
    };

    let Some(mut batches) = abort.kill_if_err(stream_query(&self.pool, &query, self.batch_size, self.channel_capacity).await)
    else {
      return;
    };

    let mut forwarded: u64 = 0;
    while let Some(batch) = batches.recv().await {
      let Some(envelope) = abort.kill_if_err(batch) else {
        return;
      };
      if abort.kill_if_err(output.send(envelope).await).is_none() {
        return;
      }
      forwarded += 1;
    }
    event!(Level::DEBUG, batches = forwarded, "Query results forwarded.");
  }
}
