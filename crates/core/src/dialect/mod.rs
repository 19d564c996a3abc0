mod mysql;
mod postgres;

pub use mysql::MySqlDialect;
pub use postgres::PostgresDialect;

use crate::error::{GatewayError, Result};
use crate::model::TableSchema;

/// A `QuotedIdent` can only be constructed from a string the Dialect itself
/// has validated and quoted; the query builder only ever accepts identifiers
/// in this form, which keeps unvalidated strings out of generated SQL by
/// construction (Design Notes §9).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedIdent(String);

impl QuotedIdent {
  pub fn as_str(&self) -> &str {
    return &self.0;
  }
}

impl std::fmt::Display for QuotedIdent {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    return write!(f, "{}", self.0);
  }
}

/// Database-family-specific subset of SQL: identifier quoting and catalog
/// introspection queries. Implementations MUST reject identifiers that
/// contain their own quote character.
#[async_trait::async_trait]
pub trait Dialect: Send + Sync {
  /// Quotes `s` for use as an identifier. Rejects `s` if it contains the
  /// dialect's own quote character (defense in depth; the Validator also
  /// rejects such names upstream).
  fn quote_identifier(&self, s: &str) -> Result<QuotedIdent>;

  /// A `?`/`$N`-style positional placeholder for the `n`th (0-based) bound
  /// parameter in a statement, so the query builder can stay dialect-agnostic
  /// about parameter syntax.
  fn placeholder(&self, n: usize) -> String;

  /// Whether `INSERT ... RETURNING <col>` is available to recover a
  /// server-generated primary key. MySQL/SQLite callers instead rely on
  /// `AnyQueryResult::last_insert_id`, which Postgres never populates.
  fn supports_returning(&self) -> bool {
    return false;
  }

  async fn list_tables(&self, pool: &sqlx::AnyPool) -> Result<Vec<String>>;

  async fn list_columns(&self, pool: &sqlx::AnyPool, table: &str) -> Result<TableSchema>;
}

pub fn unknown_table_error(table: &str) -> GatewayError {
  return GatewayError::NotFound(format!("table '{table}' does not exist"));
}
