use sqlx::Row as _;
use sqlx::any::AnyRow;

use crate::error::{GatewayError, Result};
use crate::model::{Row, TableSchema};

/// Converts one driver row into the crate's JSON-friendly `Row` shape,
/// coercing each column per its declared schema type. `sqlx::any::AnyRow`
/// doesn't expose a single dynamically-typed accessor the way
/// `rusqlite::types::ValueRef` does in the reference's `sql_to_json.rs`, so
/// the declared column type decides which typed `try_get` is attempted.
pub fn row_to_json(row: &AnyRow, schema: &TableSchema) -> Result<Row> {
  let mut out = Row::new();
  for column in &schema.columns {
    let value = column_value(row, &column.name, &column.r#type)?;
    out.insert(column.name.clone(), value);
  }
  return Ok(out);
}

fn column_value(row: &AnyRow, name: &str, declared_type: &str) -> Result<serde_json::Value> {
  let lower = declared_type.to_ascii_lowercase();
  let map_err = |e: sqlx::Error| GatewayError::UpstreamFailure(e.to_string());

  if lower.contains("bool") {
    let v: Option<bool> = row.try_get(name).map_err(map_err)?;
    return Ok(v.map(serde_json::Value::Bool).unwrap_or(serde_json::Value::Null));
  }

  if lower.contains("int") {
    let v: Option<i64> = row.try_get(name).map_err(map_err)?;
    return Ok(v.map(|n| serde_json::Value::Number(n.into())).unwrap_or(serde_json::Value::Null));
  }

  if lower.contains("float") || lower.contains("double") || lower.contains("decimal") || lower.contains("numeric") {
    let v: Option<f64> = row.try_get(name).map_err(map_err)?;
    return Ok(match v.and_then(serde_json::Number::from_f64) {
      Some(n) => serde_json::Value::Number(n),
      None => serde_json::Value::Null,
    });
  }

  let v: Option<String> = row.try_get(name).map_err(map_err)?;
  return Ok(v.map(serde_json::Value::String).unwrap_or(serde_json::Value::Null));
}
