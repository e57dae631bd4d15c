// flowline/src/relational/sink.rs

//! Turns envelopes of homogeneous objects into a single multi-row INSERT
//! (optionally an upsert) and executes it in one round trip.
//!
//! Column order is the sorted key set of the first object in the batch, and
//! every object is bound in that order. Objects whose key set differs from the
//! first one will bind values to the wrong columns; callers must not mix shapes
//! within one envelope. This is not checked here.

use crate::core::envelope::{json_kind, Envelope};
use crate::error::{FlowError, FlowResult};
use crate::relational::dialect::Dialect;
use serde_json::{Map, Value};
use sqlx::AnyPool;
use tracing::{event, instrument, Level};

/// Target table and conflict behaviour of an insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertOptions {
  pub table: String,
  /// Overwrite every column on a primary/unique key collision. On by default.
  pub upsert: bool,
  /// Conflict target for `ON CONFLICT`. Required by PostgreSQL upserts,
  /// optional for SQLite, ignored by MySQL.
  pub conflict_keys: Vec<String>,
}

impl InsertOptions {
  pub fn new(table: impl Into<String>) -> Self {
    Self {
      table: table.into(),
      upsert: true,
      conflict_keys: Vec::new(),
    }
  }

  pub fn with_upsert(mut self, upsert: bool) -> Self {
    self.upsert = upsert;
    self
  }

  pub fn with_conflict_keys<I, S>(mut self, keys: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.conflict_keys = keys.into_iter().map(Into::into).collect();
    self
  }
}

/// A JSON value lowered to something a SQL driver can bind.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
  Null,
  Bool(bool),
  Int(i64),
  Float(f64),
  /// Strings, and nested arrays/objects as their JSON text.
  Text(String),
}

impl From<&Value> for SqlValue {
  fn from(value: &Value) -> Self {
    match value {
      Value::Null => SqlValue::Null,
      Value::Bool(b) => SqlValue::Bool(*b),
      Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          SqlValue::Int(i)
        } else if let Some(u) = n.as_u64() {
          // Beyond i64; a float would round it.
          SqlValue::Text(u.to_string())
        } else if let Some(f) = n.as_f64() {
          SqlValue::Float(f)
        } else {
          SqlValue::Text(n.to_string())
        }
      }
      Value::String(s) => SqlValue::Text(s.clone()),
      nested => SqlValue::Text(nested.to_string()),
    }
  }
}

/// SQL text plus its positional bind values.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertStatement {
  pub sql: String,
  pub columns: Vec<String>,
  pub values: Vec<SqlValue>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InsertOutcome {
  pub rows_affected: u64,
  pub last_insert_id: Option<i64>,
}

/// Key set of `object`, sorted lexicographically.
pub fn sorted_columns(object: &Map<String, Value>) -> Vec<String> {
  let mut columns: Vec<String> = object.keys().cloned().collect();
  columns.sort();
  columns
}

/// Decodes the objects to insert from an envelope.
///
/// Accepts a single object or an array of objects; anything else is
/// `FlowError::UnsupportedShape`. Malformed JSON is `FlowError::Decode`.
pub fn objects_for_insert(envelope: &Envelope) -> FlowResult<Vec<Map<String, Value>>> {
  match envelope.to_value()? {
    Value::Object(object) => Ok(vec![object]),
    Value::Array(items) => items
      .into_iter()
      .map(|item| match item {
        Value::Object(object) => Ok(object),
        other => Err(FlowError::UnsupportedShape {
          found: format!("an array containing {}", json_kind(&other)),
        }),
      })
      .collect(),
    other => Err(FlowError::UnsupportedShape {
      found: json_kind(&other).to_string(),
    }),
  }
}

/// Builds `INSERT INTO table(cols) VALUES(..),(..)[ upsert clause]` for `objects`.
pub fn build_insert(
  objects: &[Map<String, Value>],
  options: &InsertOptions,
  dialect: Dialect,
) -> FlowResult<InsertStatement> {
  let first = objects.first().ok_or_else(|| FlowError::UnsupportedShape {
    found: "an empty batch".to_string(),
  })?;
  let columns = sorted_columns(first);
  if columns.is_empty() {
    return Err(FlowError::UnsupportedShape {
      found: "an object with no columns".to_string(),
    });
  }

  let column_list = columns
    .iter()
    .map(|c| dialect.quote_identifier(c))
    .collect::<Vec<_>>()
    .join(",");
  let mut sql = format!("INSERT INTO {}({}) VALUES", options.table, column_list);

  let mut values = Vec::with_capacity(objects.len() * columns.len());
  for (row_idx, object) in objects.iter().enumerate() {
    if row_idx > 0 {
      sql.push(',');
    }
    sql.push('(');
    for (col_idx, column) in columns.iter().enumerate() {
      if col_idx > 0 {
        sql.push(',');
      }
      values.push(object.get(column).map(SqlValue::from).unwrap_or(SqlValue::Null));
      sql.push_str(&dialect.placeholder(values.len()));
    }
    sql.push(')');
  }

  if options.upsert {
    sql.push_str(&dialect.upsert_clause(&columns, &options.conflict_keys)?);
  }

  Ok(InsertStatement { sql, columns, values })
}

/// Inserts every object held by `envelope` into `options.table` in one statement.
pub async fn insert_envelope(pool: &AnyPool, envelope: &Envelope, options: &InsertOptions) -> FlowResult<InsertOutcome> {
  let objects = objects_for_insert(envelope)?;
  insert_objects(pool, &objects, options).await
}

/// Inserts `objects` into `options.table` in one statement. An empty slice is a no-op.
#[instrument(
    name = "relational::insert_objects",
    skip_all,
    fields(table = %options.table, rows = objects.len(), upsert = options.upsert),
    err(Display)
)]
pub async fn insert_objects(
  pool: &AnyPool,
  objects: &[Map<String, Value>],
  options: &InsertOptions,
) -> FlowResult<InsertOutcome> {
  if objects.is_empty() {
    event!(Level::DEBUG, "Nothing to insert.");
    return Ok(InsertOutcome::default());
  }

  let insert_err = |source: sqlx::Error| FlowError::Insert {
    table: options.table.clone(),
    source,
  };

  let mut conn = pool.acquire().await.map_err(insert_err)?;
  let dialect = Dialect::from_backend_name(conn.backend_name())?;
  let statement = build_insert(objects, options, dialect)?;
  event!(Level::TRACE, sql = %statement.sql, values = statement.values.len(), "Executing insert.");

  let mut query = sqlx::query(&statement.sql);
  for value in &statement.values {
    query = match value {
      SqlValue::Null => query.bind(Option::<String>::None),
      SqlValue::Bool(b) => query.bind(*b),
      SqlValue::Int(i) => query.bind(*i),
      SqlValue::Float(f) => query.bind(*f),
      SqlValue::Text(s) => query.bind(s.clone()),
    };
  }

  let result = query.execute(&mut *conn).await.map_err(insert_err)?;
  let outcome = InsertOutcome {
    rows_affected: result.rows_affected(),
    last_insert_id: result.last_insert_id(),
  };
  event!(
    Level::INFO,
    rows_affected = outcome.rows_affected,
    last_insert_id = ?outcome.last_insert_id,
    "Insert executed."
  );
  Ok(outcome)
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn objects(value: Value) -> Vec<Map<String, Value>> {
    objects_for_insert(&Envelope::wrap(&value).unwrap()).unwrap()
  }

  #[test]
  fn columns_are_sorted_and_values_follow_that_order() {
    let batch = objects(json!([{"b": 1, "a": 2}, {"b": 3, "a": 4}]));
    let statement = build_insert(&batch, &InsertOptions::new("t"), Dialect::MySql).unwrap();

    assert_eq!(statement.columns, vec!["a", "b"]);
    assert_eq!(
      statement.values,
      vec![SqlValue::Int(2), SqlValue::Int(1), SqlValue::Int(4), SqlValue::Int(3)]
    );
    assert_eq!(
      statement.sql,
      "INSERT INTO t(`a`,`b`) VALUES(?,?),(?,?) ON DUPLICATE KEY UPDATE `a`=VALUES(`a`),`b`=VALUES(`b`)"
    );
  }

  #[test]
  fn postgres_numbers_placeholders_across_rows() {
    let batch = objects(json!([{"id": 1, "name": "x"}, {"id": 2, "name": null}]));
    let options = InsertOptions::new("people").with_conflict_keys(["id"]);
    let statement = build_insert(&batch, &options, Dialect::Postgres).unwrap();

    assert_eq!(
      statement.sql,
      "INSERT INTO people(\"id\",\"name\") VALUES($1,$2),($3,$4) \
       ON CONFLICT (\"id\") DO UPDATE SET \"id\"=EXCLUDED.\"id\",\"name\"=EXCLUDED.\"name\""
    );
    assert_eq!(statement.values[3], SqlValue::Null);
  }

  #[test]
  fn plain_insert_has_no_conflict_clause() {
    let batch = objects(json!({"k": "v"}));
    let options = InsertOptions::new("kv").with_upsert(false);
    let statement = build_insert(&batch, &options, Dialect::Sqlite).unwrap();
    assert_eq!(statement.sql, "INSERT INTO kv(\"k\") VALUES(?)");
    assert_eq!(statement.values, vec![SqlValue::Text("v".to_string())]);
  }

  #[test]
  fn later_objects_bind_in_the_first_objects_column_order() {
    // A missing key binds NULL; an extra key is ignored.
    let batch = objects(json!([{"a": 1, "b": 2}, {"b": 3, "c": 9}]));
    let options = InsertOptions::new("t").with_upsert(false);
    let statement = build_insert(&batch, &options, Dialect::MySql).unwrap();
    assert_eq!(
      statement.values,
      vec![SqlValue::Int(1), SqlValue::Int(2), SqlValue::Null, SqlValue::Int(3)]
    );
  }

  #[test]
  fn nested_values_bind_as_json_text() {
    assert_eq!(SqlValue::from(&json!({"x": [1, 2]})), SqlValue::Text("{\"x\":[1,2]}".to_string()));
    assert_eq!(SqlValue::from(&json!(1.5)), SqlValue::Float(1.5));
    assert_eq!(SqlValue::from(&json!(true)), SqlValue::Bool(true));
  }

  #[test]
  fn unsigned_values_beyond_i64_bind_exactly_as_text() {
    let batch = objects(json!({"id": 18446744073709551614u64}));
    let statement = build_insert(&batch, &InsertOptions::new("t").with_upsert(false), Dialect::MySql).unwrap();
    assert_eq!(statement.values, vec![SqlValue::Text("18446744073709551614".to_string())]);
    assert_eq!(SqlValue::from(&json!(i64::MAX as u64)), SqlValue::Int(i64::MAX));
  }

  #[test]
  fn rejects_non_tabular_shapes() {
    for payload in [json!(42), json!("text"), json!([1, 2]), json!([{"a": 1}, 2])] {
      let err = objects_for_insert(&Envelope::wrap(&payload).unwrap()).unwrap_err();
      assert!(matches!(err, FlowError::UnsupportedShape { .. }), "{:?}", err);
    }
    let err = objects_for_insert(&Envelope::from("{not json")).unwrap_err();
    assert!(matches!(err, FlowError::Decode { .. }));
  }

  #[test]
  fn empty_batch_cannot_build_a_statement() {
    let err = build_insert(&[], &InsertOptions::new("t"), Dialect::MySql).unwrap_err();
    assert!(matches!(err, FlowError::UnsupportedShape { .. }));
  }
}
