// flowline/examples/sql_to_sql.rs
//
// Copies one table into another through a transform. Uses `DATABASE_URL` when
// set (PostgreSQL needs conflict keys, which are passed below), otherwise a
// throwaway SQLite file in the temp directory.

use flowline::relational::{self, stream_query};
use flowline::{Envelope, FlowConfig, FlowResult, FuncTransformer, Pipeline, SqlReader, SqlWriter};
use serde_json::Value;
use tracing::info;

async fn seed(pool: &sqlx::AnyPool) -> FlowResult<()> {
  for statement in [
    "DROP TABLE IF EXISTS products",
    "DROP TABLE IF EXISTS products_eur",
    "CREATE TABLE products (id BIGINT PRIMARY KEY, name TEXT, price_usd DOUBLE PRECISION)",
    "CREATE TABLE products_eur (id BIGINT PRIMARY KEY, name TEXT, price_eur DOUBLE PRECISION)",
    "INSERT INTO products (id, name, price_usd) VALUES (1, 'lamp', 24.5), (2, 'desk', 310.0), (3, 'chair', 89.9)",
  ] {
    sqlx::query(statement)
      .execute(pool)
      .await
      .map_err(|source| flowline::FlowError::Query {
        query: statement.to_string(),
        source,
      })?;
  }
  Ok(())
}

fn to_eur(record: Envelope) -> FlowResult<Envelope> {
  let rows = record.extract_objects()?;
  let converted: Vec<Value> = rows
    .into_iter()
    .map(|mut row| {
      let usd = row.remove("price_usd").and_then(|v| v.as_f64()).unwrap_or_default();
      row.insert("price_eur".to_string(), Value::from((usd * 0.92 * 100.0).round() / 100.0));
      Value::Object(row)
    })
    .collect();
  Envelope::wrap(&converted)
}

#[tokio::main]
async fn main() -> FlowResult<()> {
  tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

  let config = FlowConfig::from_env()?.with_sql_batch_size(2);
  let url = config.database_url.clone().unwrap_or_else(|| {
    let path = std::env::temp_dir().join("flowline-sql-to-sql.db");
    format!("sqlite://{}?mode=rwc", path.display())
  });
  let pool = relational::connect(&url, 4).await?;
  seed(&pool).await?;

  let mut pipeline = Pipeline::default().with_config(config.clone());
  pipeline
    .add_stage(SqlReader::new(pool.clone(), "SELECT id, name, price_usd FROM products ORDER BY id").with_config(&config))
    .add_stage(FuncTransformer::new(to_eur).with_name("to_eur"))
    .add_stage(SqlWriter::new(pool.clone(), "products_eur").with_conflict_keys(["id"]));

  pipeline.run().await?;

  let mut copied = stream_query(&pool, "SELECT id, name, price_eur FROM products_eur ORDER BY id", 0, 1).await?;
  while let Some(batch) = copied.recv().await {
    let batch = batch?;
    info!(rows = %batch, "products_eur");
  }
  Ok(())
}
