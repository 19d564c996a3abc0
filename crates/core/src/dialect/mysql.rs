use sqlx::Row;

use super::{Dialect, QuotedIdent, unknown_table_error};
use crate::error::{GatewayError, Result};
use crate::model::{ColumnSchema, TableSchema};

/// MySQL-family dialect. Identifier quoting and `information_schema`
/// introspection grounded on the backtick-doubling quote routine and
/// `fetch_tables_shallow`/`fetch_columns` queries of a reference MySQL
/// driver, adapted to bind the schema name as a parameter rather than
/// interpolating it.
pub struct MySqlDialect {
  pub schema: String,
}

#[async_trait::async_trait]
impl Dialect for MySqlDialect {
  fn quote_identifier(&self, s: &str) -> Result<QuotedIdent> {
    if s.contains('`') {
      return Err(GatewayError::InvalidInput(format!(
        "identifier '{s}' must not contain a backtick"
      )));
    }
    return Ok(QuotedIdent(format!("`{s}`")));
  }

  fn placeholder(&self, _n: usize) -> String {
    return "?".to_string();
  }

  async fn list_tables(&self, pool: &sqlx::AnyPool) -> Result<Vec<String>> {
    let rows = sqlx::query(
      "SELECT table_name FROM information_schema.tables \
       WHERE table_schema = ? AND table_type = 'BASE TABLE'",
    )
    .bind(&self.schema)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;

    return Ok(
      rows
        .into_iter()
        .map(|row| row.try_get::<String, _>(0))
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?,
    );
  }

  async fn list_columns(&self, pool: &sqlx::AnyPool, table: &str) -> Result<TableSchema> {
    let rows = sqlx::query(
      "SELECT column_name, column_type, is_nullable, column_default, column_key \
       FROM information_schema.columns \
       WHERE table_schema = ? AND table_name = ? \
       ORDER BY ordinal_position",
    )
    .bind(&self.schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;

    if rows.is_empty() {
      return Err(unknown_table_error(table));
    }

    let mut columns = Vec::with_capacity(rows.len());
    let mut primary_key = None;
    for row in rows {
      let name: String = row
        .try_get(0)
        .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;
      let col_type: String = row
        .try_get(1)
        .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;
      let is_nullable: String = row
        .try_get(2)
        .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;
      let default: Option<String> = row
        .try_get(3)
        .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;
      let key: Option<String> = row
        .try_get(4)
        .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;

      if key.as_deref() == Some("PRI") {
        primary_key = Some(name.clone());
      }

      columns.push(ColumnSchema {
        name,
        r#type: col_type,
        nullable: is_nullable.eq_ignore_ascii_case("yes"),
        default,
      });
    }

    return Ok(TableSchema {
      name: table.to_string(),
      columns,
      primary_key,
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn quotes_plain_identifier() {
    let dialect = MySqlDialect {
      schema: "app".to_string(),
    };
    assert_eq!(dialect.quote_identifier("users").unwrap().as_str(), "`users`");
  }

  #[test]
  fn rejects_identifier_with_backtick() {
    let dialect = MySqlDialect {
      schema: "app".to_string(),
    };
    assert!(dialect.quote_identifier("users`; --").is_err());
  }
}
