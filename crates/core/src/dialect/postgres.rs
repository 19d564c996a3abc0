use sqlx::Row;

use super::{Dialect, QuotedIdent, unknown_table_error};
use crate::error::{GatewayError, Result};
use crate::model::{ColumnSchema, TableSchema};

/// Postgres dialect. Same introspection shape as the MySQL dialect, but
/// queries `information_schema.key_column_usage`/`table_constraints` for the
/// primary key (MySQL exposes it directly on `columns.column_key`) and
/// doubles `"` rather than `` ` `` for identifier quoting.
pub struct PostgresDialect {
  pub schema: String,
}

#[async_trait::async_trait]
impl Dialect for PostgresDialect {
  fn quote_identifier(&self, s: &str) -> Result<QuotedIdent> {
    if s.contains('"') {
      return Err(GatewayError::InvalidInput(format!(
        "identifier '{s}' must not contain a double quote"
      )));
    }
    return Ok(QuotedIdent(format!("\"{s}\"")));
  }

  fn placeholder(&self, n: usize) -> String {
    return format!("${}", n + 1);
  }

  fn supports_returning(&self) -> bool {
    return true;
  }

  async fn list_tables(&self, pool: &sqlx::AnyPool) -> Result<Vec<String>> {
    let rows = sqlx::query(
      "SELECT table_name FROM information_schema.tables \
       WHERE table_schema = $1 AND table_type = 'BASE TABLE'",
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
      "SELECT column_name, data_type, is_nullable, column_default \
       FROM information_schema.columns \
       WHERE table_schema = $1 AND table_name = $2 \
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

    let pk_rows = sqlx::query(
      "SELECT kcu.column_name \
       FROM information_schema.table_constraints tc \
       JOIN information_schema.key_column_usage kcu \
         ON tc.constraint_name = kcu.constraint_name AND tc.table_schema = kcu.table_schema \
       WHERE tc.constraint_type = 'PRIMARY KEY' AND tc.table_schema = $1 AND tc.table_name = $2",
    )
    .bind(&self.schema)
    .bind(table)
    .fetch_all(pool)
    .await
    .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;

    let primary_key = pk_rows
      .first()
      .map(|row| row.try_get::<String, _>(0))
      .transpose()
      .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;

    let mut columns = Vec::with_capacity(rows.len());
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
    let dialect = PostgresDialect {
      schema: "public".to_string(),
    };
    assert_eq!(
      dialect.quote_identifier("users").unwrap().as_str(),
      "\"users\""
    );
  }

  #[test]
  fn rejects_identifier_with_double_quote() {
    let dialect = PostgresDialect {
      schema: "public".to_string(),
    };
    assert!(dialect.quote_identifier("users\"; --").is_err());
  }
}
