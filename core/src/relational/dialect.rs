// flowline/src/relational/dialect.rs

use crate::error::{FlowError, FlowResult};

/// SQL flavour of the connected backend. Decides placeholder syntax, identifier
/// quoting and the shape of the upsert clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
  MySql,
  Postgres,
  Sqlite,
}

impl Dialect {
  /// Maps the backend name reported by an `Any` connection.
  pub fn from_backend_name(name: &str) -> FlowResult<Self> {
    let lowered = name.to_ascii_lowercase();
    if lowered.contains("postgres") {
      Ok(Dialect::Postgres)
    } else if lowered.contains("mysql") || lowered.contains("mariadb") {
      Ok(Dialect::MySql)
    } else if lowered.contains("sqlite") {
      Ok(Dialect::Sqlite)
    } else {
      Err(FlowError::configuration(format!("unsupported database backend '{}'", name)))
    }
  }

  /// Positional placeholder for the `position`-th bound value (1-based).
  pub fn placeholder(&self, position: usize) -> String {
    match self {
      Dialect::Postgres => format!("${}", position),
      Dialect::MySql | Dialect::Sqlite => "?".to_string(),
    }
  }

  pub fn quote_identifier(&self, ident: &str) -> String {
    match self {
      Dialect::MySql => format!("`{}`", ident.replace('`', "``")),
      Dialect::Postgres | Dialect::Sqlite => format!("\"{}\"", ident.replace('"', "\"\"")),
    }
  }

  /// Clause that, on a key collision, overwrites every column with the value
  /// that was being inserted.
  pub fn upsert_clause(&self, columns: &[String], conflict_keys: &[String]) -> FlowResult<String> {
    match self {
      Dialect::MySql => {
        let updates = columns
          .iter()
          .map(|c| {
            let quoted = self.quote_identifier(c);
            format!("{}=VALUES({})", quoted, quoted)
          })
          .collect::<Vec<_>>()
          .join(",");
        Ok(format!(" ON DUPLICATE KEY UPDATE {}", updates))
      }
      Dialect::Postgres | Dialect::Sqlite => {
        if *self == Dialect::Postgres && conflict_keys.is_empty() {
          return Err(FlowError::configuration(
            "PostgreSQL upserts need conflict keys (InsertOptions::with_conflict_keys)",
          ));
        }
        let target = if conflict_keys.is_empty() {
          String::new()
        } else {
          let keys = conflict_keys
            .iter()
            .map(|k| self.quote_identifier(k))
            .collect::<Vec<_>>()
            .join(",");
          format!(" ({})", keys)
        };
        let excluded = if *self == Dialect::Postgres { "EXCLUDED" } else { "excluded" };
        let updates = columns
          .iter()
          .map(|c| {
            let quoted = self.quote_identifier(c);
            format!("{}={}.{}", quoted, excluded, quoted)
          })
          .collect::<Vec<_>>()
          .join(",");
        Ok(format!(" ON CONFLICT{} DO UPDATE SET {}", target, updates))
      }
    }
  }
}
