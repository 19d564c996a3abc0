use sqlx::Row;

use crate::error::{GatewayError, Result};

/// Fixed schema for database-backed authentication (§6, "Persisted state").
/// Unlike application tables this one is not discovered via
/// `SchemaInspector` -- its shape is part of the contract, not introspected.
pub const USER_TABLE: &str = "users";

#[derive(Debug, Clone)]
pub struct DbUser {
  pub username: String,
  pub password_hash: String,
  pub role: String,
  pub active: bool,
}

pub async fn find_by_username(pool: &sqlx::AnyPool, username: &str) -> Result<Option<DbUser>> {
  let row = sqlx::query(
    "SELECT username, password_hash, role, active FROM users WHERE username = ? AND active = true",
  )
  .bind(username)
  .fetch_optional(pool)
  .await
  .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;

  return row.map(row_to_user).transpose();
}

pub async fn find_by_api_key(pool: &sqlx::AnyPool, api_key: &str) -> Result<Option<DbUser>> {
  let row = sqlx::query(
    "SELECT username, password_hash, role, active FROM users WHERE api_key = ? AND active = true",
  )
  .bind(api_key)
  .fetch_optional(pool)
  .await
  .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;

  return row.map(row_to_user).transpose();
}

fn row_to_user(row: sqlx::any::AnyRow) -> Result<DbUser> {
  let map_err = |e: sqlx::Error| GatewayError::UpstreamFailure(e.to_string());
  return Ok(DbUser {
    username: row.try_get(0).map_err(map_err)?,
    password_hash: row.try_get(1).map_err(map_err)?,
    role: row.try_get(2).map_err(map_err)?,
    active: row.try_get(3).map_err(map_err)?,
  });
}
