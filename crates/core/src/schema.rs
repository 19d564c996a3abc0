use std::sync::Arc;

use parking_lot::RwLock;
use std::collections::HashMap;

use crate::dialect::Dialect;
use crate::error::Result;
use crate::model::TableSchema;

/// Wraps a Dialect and memoizes table schemas per process. Read-mostly after
/// warm-up; population is single-writer-per-table (the lock is held only for
/// the insert, not across the dialect round-trip).
pub struct SchemaInspector {
  dialect: Arc<dyn Dialect>,
  pool: sqlx::AnyPool,
  tables: RwLock<Option<Arc<Vec<String>>>>,
  columns: RwLock<HashMap<String, Arc<TableSchema>>>,
}

impl SchemaInspector {
  pub fn new(dialect: Arc<dyn Dialect>, pool: sqlx::AnyPool) -> Self {
    return Self {
      dialect,
      pool,
      tables: RwLock::new(None),
      columns: RwLock::new(HashMap::new()),
    };
  }

  pub async fn list_tables(&self) -> Result<Arc<Vec<String>>> {
    if let Some(cached) = self.tables.read().clone() {
      return Ok(cached);
    }
    let tables = Arc::new(self.dialect.list_tables(&self.pool).await?);
    *self.tables.write() = Some(tables.clone());
    return Ok(tables);
  }

  /// A table not present in `list_tables()` is treated as non-existent.
  pub async fn table_exists(&self, table: &str) -> Result<bool> {
    let tables = self.list_tables().await?;
    return Ok(tables.iter().any(|t| t == table));
  }

  pub async fn columns(&self, table: &str) -> Result<Arc<TableSchema>> {
    if let Some(cached) = self.columns.read().get(table).cloned() {
      return Ok(cached);
    }

    if !self.table_exists(table).await? {
      return Err(crate::dialect::unknown_table_error(table));
    }

    let schema = Arc::new(self.dialect.list_columns(&self.pool, table).await?);
    self
      .columns
      .write()
      .insert(table.to_string(), schema.clone());
    return Ok(schema);
  }

  #[cfg(test)]
  pub fn seed_for_test(&self, schema: TableSchema) {
    {
      let mut guard = self.tables.write();
      let names = Arc::make_mut(guard.get_or_insert_with(|| Arc::new(Vec::new())));
      if !names.iter().any(|t| t == &schema.name) {
        names.push(schema.name.clone());
      }
    }
    self.columns.write().insert(schema.name.clone(), Arc::new(schema));
  }

  /// Forces the next access for `table` (or all tables, if `table` is None)
  /// to re-query the database.
  pub fn invalidate(&self, table: Option<&str>) {
    match table {
      Some(t) => {
        self.columns.write().remove(t);
      }
      None => {
        *self.tables.write() = None;
        self.columns.write().clear();
      }
    }
  }
}
