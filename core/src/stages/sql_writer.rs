// flowline/src/stages/sql_writer.rs

use crate::core::{AbortSignal, Envelope, Output, Stage};
use crate::relational::sink::{insert_envelope, InsertOptions};
use async_trait::async_trait;
use sqlx::AnyPool;

/// Inserts every record it receives into a table, one statement per record.
///
/// Records must be an object or an array of objects sharing the same keys,
/// keys naming columns. Upsert is on by default. Insert failures abort the run.
/// Emits nothing, so it is normally the last stage.
pub struct SqlWriter {
  pool: AnyPool,
  options: InsertOptions,
  concurrency: usize,
}

impl SqlWriter {
  pub fn new(pool: AnyPool, table: impl Into<String>) -> Self {
    Self {
      pool,
      options: InsertOptions::new(table),
      concurrency: 1,
    }
  }

  pub fn with_upsert(mut self, upsert: bool) -> Self {
    self.options.upsert = upsert;
    self
  }

  pub fn with_conflict_keys<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.options = self.options.with_conflict_keys(keys);
    self
  }

  /// Number of inserts allowed in flight at once.
  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }

  pub fn options(&self) -> &InsertOptions {
    &self.options
  }
}

#[async_trait]
impl Stage for SqlWriter {
  async fn process_data(&self, record: Envelope, _output: &mut Output, abort: &AbortSignal) {
    abort.kill_if_err(insert_envelope(&self.pool, &record, &self.options).await);
  }

  fn concurrency(&self) -> usize {
    self.concurrency
  }
}
