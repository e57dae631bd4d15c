// flowline/src/relational/source.rs

//! Streams a query's result set as envelopes holding fixed-size batches of rows.

use crate::config::DEFAULT_CHANNEL_CAPACITY;
use crate::core::envelope::Envelope;
use crate::error::{FlowError, FlowResult};
use futures_util::TryStreamExt;
use serde_json::{Map, Value};
use sqlx::any::AnyRow;
use sqlx::AnyPool;
use sqlx::{Column, Row, ValueRef};
use tokio::sync::{mpsc, oneshot};
use tracing::{event, Instrument, Level};

/// Receiving end of a streaming query. Yields one envelope per batch; a read
/// failure arrives as a final `Err` item, after which the stream ends.
pub type QueryStream = mpsc::Receiver<FlowResult<Envelope>>;

/// Executes `query` once and streams its rows in batches of `batch_size`.
///
/// If the query cannot be executed, or its first row (and with it the column
/// list) cannot be read, the error is returned here and nothing is streamed.
/// Otherwise rows are gathered into arrays of objects keyed by column name and
/// emitted every `batch_size` rows; the remainder is flushed at the end.
/// A `batch_size` of 0 emits the whole result as one envelope.
///
/// A read error after streaming has begun first flushes the rows already
/// gathered, then arrives as an `Err` item. The stream stops early, without
/// error, once the receiver is dropped.
pub async fn stream_query(
  pool: &AnyPool,
  query: &str,
  batch_size: usize,
  channel_capacity: usize,
) -> FlowResult<QueryStream> {
  let capacity = if channel_capacity == 0 { DEFAULT_CHANNEL_CAPACITY } else { channel_capacity };
  let (sender, receiver) = mpsc::channel(capacity);
  let (ready_tx, ready_rx) = oneshot::channel();

  let pool = pool.clone();
  let query = query.to_string();
  tokio::spawn(
    async move {
      read_rows(pool, query, batch_size, sender, ready_tx).await;
    }
    .in_current_span(),
  );

  match ready_rx.await {
    Ok(Ok(())) => Ok(receiver),
    Ok(Err(e)) => Err(e),
    Err(_) => Err(FlowError::Internal("query reader stopped before reporting readiness".to_string())),
  }
}

async fn read_rows(
  pool: AnyPool,
  query: String,
  batch_size: usize,
  sender: mpsc::Sender<FlowResult<Envelope>>,
  ready: oneshot::Sender<FlowResult<()>>,
) {
  let query_err = |source: sqlx::Error| FlowError::Query {
    query: query.clone(),
    source,
  };

  let mut rows = sqlx::query(&query).fetch(&pool);
  let mut next = match rows.try_next().await {
    Ok(first) => first,
    Err(e) => {
      let _ = ready.send(Err(query_err(e)));
      return;
    }
  };
  if ready.send(Ok(())).is_err() {
    return;
  }

  let mut batcher = RowBatcher::new(batch_size);
  let mut emitted: u64 = 0;
  let mut failure = None;

  while let Some(row) = next {
    match row_to_object(&row) {
      Ok(object) => {
        if let Some(batch) = batcher.push(object) {
          if !send_batch(&sender, batch).await {
            return;
          }
          emitted += 1;
        }
      }
      Err(e) => {
        failure = Some(query_err(e));
        break;
      }
    }

    next = tokio::select! {
      biased;
      _ = sender.closed() => {
        event!(Level::DEBUG, "Query stream receiver dropped; stopping read.");
        return;
      }
      read = rows.try_next() => match read {
        Ok(row) => row,
        Err(e) => {
          failure = Some(query_err(e));
          None
        }
      },
    };
  }

  if let Some(batch) = batcher.flush() {
    if !send_batch(&sender, batch).await {
      return;
    }
    emitted += 1;
  }

  match failure {
    Some(err) => {
      event!(Level::WARN, error = %err, emitted, "Query stream failed mid-read.");
      let _ = sender.send(Err(err)).await;
    }
    None => event!(Level::DEBUG, emitted, "Query stream exhausted."),
  }
}

/// Returns `false` once the receiver is gone.
async fn send_batch(sender: &mpsc::Sender<FlowResult<Envelope>>, batch: Vec<Map<String, Value>>) -> bool {
  let item = Envelope::wrap(&batch);
  sender.send(item).await.is_ok()
}

fn row_to_object(row: &AnyRow) -> Result<Map<String, Value>, sqlx::Error> {
  let mut object = Map::with_capacity(row.columns().len());
  for column in row.columns() {
    object.insert(column.name().to_string(), column_value(row, column.ordinal())?);
  }
  Ok(object)
}

// Tries the JSON-representable types in turn; binary values come back as text.
fn column_value(row: &AnyRow, idx: usize) -> Result<Value, sqlx::Error> {
  if row.try_get_raw(idx)?.is_null() {
    return Ok(Value::Null);
  }
  if let Ok(v) = row.try_get::<i64, _>(idx) {
    return Ok(Value::from(v));
  }
  if let Ok(v) = row.try_get::<f64, _>(idx) {
    return Ok(serde_json::Number::from_f64(v).map(Value::Number).unwrap_or(Value::Null));
  }
  if let Ok(v) = row.try_get::<bool, _>(idx) {
    return Ok(Value::Bool(v));
  }
  if let Ok(v) = row.try_get::<String, _>(idx) {
    return Ok(Value::String(v));
  }
  let bytes: Vec<u8> = row.try_get(idx)?;
  Ok(Value::String(String::from_utf8_lossy(&bytes).into_owned()))
}

/// Accumulates rows and hands back a full batch every `batch_size` rows.
#[derive(Debug)]
pub(crate) struct RowBatcher {
  batch_size: usize,
  rows: Vec<Map<String, Value>>,
}

impl RowBatcher {
  pub(crate) fn new(batch_size: usize) -> Self {
    Self {
      batch_size,
      rows: Vec::with_capacity(batch_size),
    }
  }

  pub(crate) fn push(&mut self, row: Map<String, Value>) -> Option<Vec<Map<String, Value>>> {
    self.rows.push(row);
    if self.batch_size > 0 && self.rows.len() >= self.batch_size {
      Some(std::mem::replace(&mut self.rows, Vec::with_capacity(self.batch_size)))
    } else {
      None
    }
  }

  /// The partial batch left over, if any.
  pub(crate) fn flush(&mut self) -> Option<Vec<Map<String, Value>>> {
    if self.rows.is_empty() {
      None
    } else {
      Some(std::mem::take(&mut self.rows))
    }
  }
}
