use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use sqlx::Row as _;
use sqlx::any::AnyArguments;

use super::query_builder::{BoundValue, BuiltQuery, QueryBuilder};
use super::sql_to_json::row_to_json;
use crate::error::{GatewayError, Result};
use crate::model::{ListMeta, ListOptions, ListResponse, Row};
use crate::schema::SchemaInspector;
use crate::validator::RecordId;

#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
  pub success: bool,
  pub deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkCreateResponse {
  pub success: bool,
  pub created: usize,
  pub data: Vec<Row>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BulkDeleteResponse {
  pub success: bool,
  pub deleted: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountResponse {
  pub count: u64,
}

/// Orchestrates DB access for all CRUD + bulk operations (§4.3), using
/// `SchemaInspector` for column whitelisting and `QueryBuilder` for SQL
/// assembly. Holds no connection of its own -- every method acquires from
/// the pool, uses it, and lets `sqlx`'s RAII guard return it on drop (§5).
pub struct CrudEngine {
  pool: sqlx::AnyPool,
  schema: Arc<SchemaInspector>,
  query_builder: QueryBuilder,
}

impl CrudEngine {
  pub fn new(pool: sqlx::AnyPool, schema: Arc<SchemaInspector>, query_builder: QueryBuilder) -> Self {
    return Self {
      pool,
      schema,
      query_builder,
    };
  }

  pub async fn list(&self, table: &str, opts: &ListOptions) -> Result<ListResponse> {
    let schema = self.schema.columns(table).await?;

    let built = self.query_builder.list(&schema, opts)?;
    let rows = prepare(&built).fetch_all(&self.pool).await.map_err(map_db_error)?;
    let data = rows
      .iter()
      .map(|row| row_to_json(row, &schema))
      .collect::<Result<Vec<_>>>()?;

    let count_built = self.query_builder.count(&schema, &opts.filter)?;
    let count_row = prepare(&count_built)
      .fetch_one(&self.pool)
      .await
      .map_err(map_db_error)?;
    let total: i64 = count_row.try_get(0).map_err(map_db_error)?;

    return Ok(ListResponse {
      data,
      meta: ListMeta::new(total.max(0) as u64, opts.page, opts.page_size),
    });
  }

  pub async fn count(&self, table: &str, opts: &ListOptions) -> Result<CountResponse> {
    let schema = self.schema.columns(table).await?;
    let built = self.query_builder.count(&schema, &opts.filter)?;
    let row = prepare(&built).fetch_one(&self.pool).await.map_err(map_db_error)?;
    let total: i64 = row.try_get(0).map_err(map_db_error)?;
    return Ok(CountResponse { count: total.max(0) as u64 });
  }

  pub async fn read(&self, table: &str, id: &RecordId) -> Result<Row> {
    let schema = self.schema.columns(table).await?;
    let built = self.query_builder.read(&schema, id)?;
    let row = prepare(&built)
      .fetch_optional(&self.pool)
      .await
      .map_err(map_db_error)?
      .ok_or_else(|| GatewayError::NotFound(format!("{table}/{id}")))?;
    return row_to_json(&row, &schema);
  }

  pub async fn create(&self, table: &str, fields: &Row) -> Result<Row> {
    let schema = self.schema.columns(table).await?;
    let pk = self.query_builder.primary_key(&schema)?;

    let id = if let Some(value) = fields.get(&pk) {
      let built = self.query_builder.create(&schema, fields)?;
      prepare(&built).execute(&self.pool).await.map_err(map_db_error)?;
      record_id_from_value(value)?
    } else if self.query_builder.supports_returning() {
      let built = self.query_builder.create_returning(&schema, fields, &pk)?;
      let row = prepare(&built).fetch_one(&self.pool).await.map_err(map_db_error)?;
      record_id_from_row(&row, &pk)?
    } else {
      let built = self.query_builder.create(&schema, fields)?;
      let result = prepare(&built).execute(&self.pool).await.map_err(map_db_error)?;
      RecordId::Integer(result.last_insert_id().unwrap_or_default())
    };

    return self.read(table, &id).await;
  }

  pub async fn update(&self, table: &str, id: &RecordId, fields: &Row) -> Result<Row> {
    let schema = self.schema.columns(table).await?;
    let built = self.query_builder.update(&schema, id, fields)?;
    let result = prepare(&built).execute(&self.pool).await.map_err(map_db_error)?;
    if result.rows_affected() == 0 {
      return Err(GatewayError::NotFound(format!("{table}/{id}")));
    }
    return self.read(table, id).await;
  }

  pub async fn delete(&self, table: &str, id: &RecordId) -> Result<DeleteResponse> {
    let schema = self.schema.columns(table).await?;
    let built = self.query_builder.delete(&schema, id)?;
    let result = prepare(&built).execute(&self.pool).await.map_err(map_db_error)?;
    if result.rows_affected() == 0 {
      return Err(GatewayError::NotFound(format!("{table}/{id}")));
    }
    return Ok(DeleteResponse {
      success: true,
      deleted: result.rows_affected(),
    });
  }

  /// All rows succeed or the whole batch is rolled back (§4.3, §8
  /// invariant 6). Holds a single connection from `begin` to
  /// `commit`/`rollback`, as every bulk-create transaction must (§5).
  pub async fn bulk_create(&self, table: &str, items: &[Row]) -> Result<BulkCreateResponse> {
    if items.is_empty() {
      return Err(GatewayError::InvalidInput("bulk_create requires at least one row".to_string()));
    }

    let schema = self.schema.columns(table).await?;
    let pk = self.query_builder.primary_key(&schema)?;

    let mut tx = self.pool.begin().await.map_err(map_db_error)?;
    let mut created_ids = Vec::with_capacity(items.len());

    for item in items {
      let id = if let Some(value) = item.get(&pk) {
        let built = match self.query_builder.create(&schema, item) {
          Ok(built) => built,
          Err(e) => {
            tx.rollback().await.ok();
            return Err(e);
          }
        };
        if let Err(e) = prepare(&built).execute(&mut *tx).await {
          tx.rollback().await.ok();
          return Err(map_db_error(e));
        }
        match record_id_from_value(value) {
          Ok(id) => id,
          Err(e) => {
            tx.rollback().await.ok();
            return Err(e);
          }
        }
      } else if self.query_builder.supports_returning() {
        let built = match self.query_builder.create_returning(&schema, item, &pk) {
          Ok(built) => built,
          Err(e) => {
            tx.rollback().await.ok();
            return Err(e);
          }
        };
        let row = match prepare(&built).fetch_one(&mut *tx).await {
          Ok(row) => row,
          Err(e) => {
            tx.rollback().await.ok();
            return Err(map_db_error(e));
          }
        };
        match record_id_from_row(&row, &pk) {
          Ok(id) => id,
          Err(e) => {
            tx.rollback().await.ok();
            return Err(e);
          }
        }
      } else {
        let built = match self.query_builder.create(&schema, item) {
          Ok(built) => built,
          Err(e) => {
            tx.rollback().await.ok();
            return Err(e);
          }
        };
        let result = match prepare(&built).execute(&mut *tx).await {
          Ok(result) => result,
          Err(e) => {
            tx.rollback().await.ok();
            return Err(map_db_error(e));
          }
        };
        RecordId::Integer(result.last_insert_id().unwrap_or_default())
      };
      created_ids.push(id);
    }

    // Re-read every created row inside the same transaction so the
    // response reflects exactly what will be committed.
    let mut data = Vec::with_capacity(created_ids.len());
    for id in &created_ids {
      let built = self.query_builder.read(&schema, id)?;
      let row = match prepare(&built).fetch_optional(&mut *tx).await {
        Ok(row) => row,
        Err(e) => {
          tx.rollback().await.ok();
          return Err(map_db_error(e));
        }
      };
      let Some(row) = row else {
        tx.rollback().await.ok();
        return Err(GatewayError::Internal(anyhow::anyhow!(
          "created row for '{table}' disappeared before commit"
        )));
      };
      data.push(row_to_json(&row, &schema)?);
    }

    tx.commit().await.map_err(map_db_error)?;

    return Ok(BulkCreateResponse {
      success: true,
      created: data.len(),
      data,
    });
  }

  pub async fn bulk_delete(&self, table: &str, ids: &[RecordId]) -> Result<BulkDeleteResponse> {
    let schema = self.schema.columns(table).await?;
    let built = self.query_builder.bulk_delete(&schema, ids)?;
    let result = prepare(&built).execute(&self.pool).await.map_err(map_db_error)?;
    return Ok(BulkDeleteResponse {
      success: true,
      deleted: result.rows_affected(),
    });
  }
}

fn prepare(built: &BuiltQuery) -> sqlx::query::Query<'_, sqlx::Any, AnyArguments<'_>> {
  let mut query = sqlx::query(&built.sql);
  for bind in &built.binds {
    query = match bind {
      BoundValue::Str(s) => query.bind(s),
      BoundValue::Int(i) => query.bind(*i),
      BoundValue::Float(f) => query.bind(*f),
      BoundValue::Bool(b) => query.bind(*b),
      BoundValue::Null => query.bind(Option::<String>::None),
    };
  }
  return query;
}

fn record_id_from_value(value: &Value) -> Result<RecordId> {
  return crate::validator::Validator::id_from_json(value);
}

/// Recovers the primary key from a `RETURNING`-clause row (Postgres
/// `create`/`bulk_create` when the caller didn't supply the pk itself).
fn record_id_from_row(row: &sqlx::any::AnyRow, column: &str) -> Result<RecordId> {
  if let Ok(n) = row.try_get::<i64, _>(column) {
    return Ok(RecordId::Integer(n));
  }
  let s: String = row
    .try_get(column)
    .map_err(|e| GatewayError::UpstreamFailure(e.to_string()))?;
  return crate::validator::Validator::id(&s);
}

/// Maps a raw `sqlx::Error` onto the error taxonomy (§7): unique/foreign-key
/// constraint violations become `ConflictOrIntegrity` (409), anything else
/// reaching the driver becomes an opaque `UpstreamFailure` (502) -- never a
/// raw driver message in the client-facing body (non-debug mode, §7).
fn map_db_error(error: sqlx::Error) -> GatewayError {
  if let Some(db_error) = error.as_database_error() {
    if db_error.is_unique_violation() || db_error.is_foreign_key_violation() || db_error.is_check_violation() {
      return GatewayError::ConflictOrIntegrity(db_error.message().to_string());
    }
  }
  return GatewayError::UpstreamFailure(error.to_string());
}

#[cfg(test)]
mod tests {
  use sqlx::any::install_default_drivers;

  use super::*;
  use crate::dialect::MySqlDialect;
  use crate::model::ColumnSchema;

  async fn memory_engine() -> CrudEngine {
    install_default_drivers();
    let pool = sqlx::AnyPool::connect("sqlite::memory:").await.unwrap();
    sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER)")
      .execute(&pool)
      .await
      .unwrap();

    let dialect = Arc::new(MySqlDialect { schema: "app".to_string() });
    let schema = Arc::new(SchemaInspector::new(dialect.clone(), pool.clone()));
    schema.seed_for_test(crate::model::TableSchema {
      name: "users".to_string(),
      columns: vec![
        ColumnSchema { name: "id".to_string(), r#type: "int".to_string(), nullable: false, default: None },
        ColumnSchema { name: "name".to_string(), r#type: "text".to_string(), nullable: false, default: None },
        ColumnSchema { name: "age".to_string(), r#type: "int".to_string(), nullable: true, default: None },
      ],
      primary_key: Some("id".to_string()),
    });

    return CrudEngine::new(pool, schema, QueryBuilder::new(dialect));
  }

  fn row(pairs: &[(&str, Value)]) -> Row {
    return pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect();
  }

  #[tokio::test]
  async fn create_then_read_round_trips() {
    let engine = memory_engine().await;
    let created = engine
      .create("users", &row(&[("name", Value::String("Ada".to_string())), ("age", Value::from(30))]))
      .await
      .unwrap();
    assert_eq!(created.get("name").unwrap(), "Ada");

    let id = record_id_from_value(created.get("id").unwrap()).unwrap();
    let fetched = engine.read("users", &id).await.unwrap();
    assert_eq!(fetched.get("name").unwrap(), "Ada");
  }

  #[tokio::test]
  async fn update_of_missing_row_is_not_found() {
    let engine = memory_engine().await;
    let err = engine
      .update("users", &RecordId::Integer(999), &row(&[("name", Value::String("x".to_string()))]))
      .await
      .unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
  }

  #[tokio::test]
  async fn bulk_create_rolls_back_entirely_on_any_failure() {
    let engine = memory_engine().await;
    let items = vec![
      row(&[("name", Value::String("A".to_string()))]),
      row(&[("unknown_column", Value::String("B".to_string()))]),
    ];
    let err = engine.bulk_create("users", &items).await.unwrap_err();
    assert!(matches!(err, GatewayError::InvalidInput(_)));

    let count = engine.count("users", &ListOptions::default()).await.unwrap();
    assert_eq!(count.count, 0);
  }

  #[tokio::test]
  async fn bulk_create_all_or_nothing_success() {
    let engine = memory_engine().await;
    let items = vec![
      row(&[("name", Value::String("A".to_string()))]),
      row(&[("name", Value::String("B".to_string()))]),
    ];
    let result = engine.bulk_create("users", &items).await.unwrap();
    assert_eq!(result.created, 2);

    let count = engine.count("users", &ListOptions::default()).await.unwrap();
    assert_eq!(count.count, 2);
  }

  #[tokio::test]
  async fn delete_then_read_is_not_found() {
    let engine = memory_engine().await;
    let created = engine
      .create("users", &row(&[("name", Value::String("Grace".to_string()))]))
      .await
      .unwrap();
    let id = record_id_from_value(created.get("id").unwrap()).unwrap();

    engine.delete("users", &id).await.unwrap();
    let err = engine.read("users", &id).await.unwrap_err();
    assert!(matches!(err, GatewayError::NotFound(_)));
  }
}
