// flowline/src/relational/mod.rs

//! Batched exchange with relational stores: streaming query results into
//! envelopes, and turning envelopes into multi-row upserts.
//!
//! Everything here runs on `sqlx`'s `Any` driver, so one pool type covers
//! PostgreSQL, MySQL and SQLite. The SQL dialect is detected from the connection.

pub mod dialect;
pub mod sink;
pub mod source;

pub use dialect::Dialect;
pub use sink::{build_insert, insert_envelope, insert_objects, objects_for_insert, sorted_columns};
pub use sink::{InsertOptions, InsertOutcome, InsertStatement, SqlValue};
pub use source::{stream_query, QueryStream};

use crate::error::{FlowError, FlowResult};
use sqlx::any::AnyPoolOptions;
use sqlx::AnyPool;

/// Opens a pool on `url` (e.g. `postgres://...`, `mysql://...`, `sqlite::memory:`).
///
/// Installs the compiled-in `Any` drivers on first use.
pub async fn connect(url: &str, max_connections: u32) -> FlowResult<AnyPool> {
  sqlx::any::install_default_drivers();
  AnyPoolOptions::new()
    .max_connections(max_connections.max(1))
    .connect(url)
    .await
    .map_err(|source| FlowError::Connection { source })
}
