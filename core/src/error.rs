// flowline/src/error.rs
use anyhow::Error as AnyhowError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FlowError {
  #[error("Failed to decode record envelope: {reason}")]
  Decode { reason: String },

  #[error("Failed to encode record envelope. Source: {source}")]
  Encode {
    #[source]
    source: serde_json::Error,
  },

  #[error("Query failed: '{query}'. Source: {source}")]
  Query {
    query: String,
    #[source]
    source: sqlx::Error,
  },

  #[error("Insert into table '{table}' failed. Source: {source}")]
  Insert {
    table: String,
    #[source]
    source: sqlx::Error,
  },

  #[error("Failed to connect to the database. Source: {source}")]
  Connection {
    #[source]
    source: sqlx::Error,
  },

  #[error("Unsupported record shape for tabular output: {found}")]
  UnsupportedShape { found: String },

  #[error("Stage failed. Source: {source}")]
  Stage {
    #[source]
    source: AnyhowError,
  },

  #[error("Terminal stage attempted to emit a record downstream")]
  TerminalOutput,

  #[error("Pipeline run was aborted")]
  Aborted,

  #[error("Configuration error: {message}")]
  Configuration { message: String },

  #[error("Internal flowline error: {0}")]
  Internal(String),
}

impl FlowError {
  pub(crate) fn decode(reason: impl Into<String>) -> Self {
    FlowError::Decode { reason: reason.into() }
  }

  pub(crate) fn configuration(message: impl Into<String>) -> Self {
    FlowError::Configuration {
      message: message.into(),
    }
  }
}

// Arbitrary stage failures (anyhow) become the generic stage-reported error.
impl From<AnyhowError> for FlowError {
  fn from(err: AnyhowError) -> Self {
    match err.downcast::<FlowError>() {
      Ok(flow_err) => flow_err,
      Err(source) => FlowError::Stage { source },
    }
  }
}

pub type FlowResult<T, E = FlowError> = std::result::Result<T, E>;
