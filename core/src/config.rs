// flowline/src/config.rs

use crate::error::{FlowError, FlowResult};
use dotenvy::dotenv;
use std::env;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 16;
pub const DEFAULT_SQL_BATCH_SIZE: usize = 100;

/// Run-time settings shared by pipelines and the relational stages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowConfig {
  /// Capacity of every inter-stage channel. Always at least 1.
  pub channel_capacity: usize,
  /// Rows per envelope for relational sources. 0 flushes only at end of result.
  /// `Pipeline::with_config` does not pass this on; give it to each reader
  /// with `SqlReader::with_config`.
  pub sql_batch_size: usize,
  pub database_url: Option<String>,
}

impl Default for FlowConfig {
  fn default() -> Self {
    Self {
      channel_capacity: DEFAULT_CHANNEL_CAPACITY,
      sql_batch_size: DEFAULT_SQL_BATCH_SIZE,
      database_url: None,
    }
  }
}

impl FlowConfig {
  /// Loads settings from the environment, reading a `.env` file first if one exists.
  ///
  /// Recognised variables: `FLOWLINE_CHANNEL_CAPACITY`, `FLOWLINE_SQL_BATCH_SIZE`
  /// and `DATABASE_URL`. Unset variables fall back to the defaults.
  pub fn from_env() -> FlowResult<Self> {
    dotenv().ok();

    let defaults = Self::default();
    let channel_capacity = parse_var("FLOWLINE_CHANNEL_CAPACITY", defaults.channel_capacity)?;
    let sql_batch_size = parse_var("FLOWLINE_SQL_BATCH_SIZE", defaults.sql_batch_size)?;
    let database_url = env::var("DATABASE_URL").ok().filter(|url| !url.is_empty());

    let config = Self {
      channel_capacity,
      sql_batch_size,
      database_url,
    }
    .validated()?;

    tracing::debug!(
      channel_capacity = config.channel_capacity,
      sql_batch_size = config.sql_batch_size,
      database_url_set = config.database_url.is_some(),
      "flowline configuration loaded."
    );
    Ok(config)
  }

  pub fn with_channel_capacity(mut self, channel_capacity: usize) -> Self {
    self.channel_capacity = channel_capacity;
    self
  }

  pub fn with_sql_batch_size(mut self, sql_batch_size: usize) -> Self {
    self.sql_batch_size = sql_batch_size;
    self
  }

  /// Checks invariants the pipeline relies on.
  pub fn validated(self) -> FlowResult<Self> {
    if self.channel_capacity == 0 {
      return Err(FlowError::configuration("channel_capacity must be at least 1"));
    }
    Ok(self)
  }
}

fn parse_var(name: &str, default: usize) -> FlowResult<usize> {
  match env::var(name) {
    Ok(raw) => raw
      .trim()
      .parse::<usize>()
      .map_err(|e| FlowError::configuration(format!("Invalid {}: {}", name, e))),
    Err(_) => Ok(default),
  }
}
