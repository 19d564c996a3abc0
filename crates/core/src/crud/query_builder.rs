use std::sync::Arc;

use serde_json::Value;

use crate::dialect::Dialect;
use crate::error::{GatewayError, Result};
use crate::model::{FilterOp, FilterTerm, FilterValue, ListOptions, Row, SortTerm, TableSchema};
use crate::validator::RecordId;

/// A value bound to a generated placeholder. Never a string literal
/// spliced into the SQL text -- every client-supplied value reaches the
/// driver only through one of these (§8, invariant 1).
#[derive(Debug, Clone, PartialEq)]
pub enum BoundValue {
  Str(String),
  Int(i64),
  Float(f64),
  Bool(bool),
  Null,
}

impl BoundValue {
  pub fn from_json(value: &Value) -> Self {
    return match value {
      Value::Null => Self::Null,
      Value::Bool(b) => Self::Bool(*b),
      Value::Number(n) => {
        if let Some(i) = n.as_i64() {
          Self::Int(i)
        } else {
          Self::Float(n.as_f64().unwrap_or_default())
        }
      }
      Value::String(s) => Self::Str(s.clone()),
      // Arrays/objects have no first-class column representation here;
      // they travel as their JSON text rendering.
      other => Self::Str(other.to_string()),
    };
  }

  pub fn from_record_id(id: &RecordId) -> Self {
    return match id {
      RecordId::Integer(n) => Self::Int(*n),
      RecordId::Uuid(u) => Self::Str(u.to_string()),
    };
  }
}

#[derive(Debug, Clone)]
pub struct BuiltQuery {
  pub sql: String,
  pub binds: Vec<BoundValue>,
}

/// Assembles parameterized SQL for every CRUD + bulk verb (§4.3). Every
/// table and column name is quoted through `Dialect::quote_identifier`
/// (which itself rejects identifiers containing its own quote character);
/// every value is a `BoundValue` attached to a uniquely-numbered
/// placeholder, so the same column appearing twice in one statement (e.g.
/// a filter on `created_at` used twice for a range) never collides.
pub struct QueryBuilder {
  dialect: Arc<dyn Dialect>,
}

impl QueryBuilder {
  pub fn new(dialect: Arc<dyn Dialect>) -> Self {
    return Self { dialect };
  }

  fn quote(&self, ident: &str) -> Result<String> {
    return Ok(self.dialect.quote_identifier(ident)?.as_str().to_string());
  }

  fn require_column(&self, schema: &TableSchema, column: &str) -> Result<()> {
    if !schema.has_column(column) {
      return Err(GatewayError::InvalidInput(format!(
        "unknown column '{column}' on table '{}'",
        schema.name
      )));
    }
    return Ok(());
  }

  /// Builds the shared `WHERE` fragment for `list`/`count`/`bulk_delete`'s
  /// sibling (bulk_delete uses its own `IN` clause instead). Every column
  /// referenced is checked against the live schema first (§4.3's sole
  /// defense for trusted-identifier paths) and every term gets its own
  /// placeholder index so repeated columns never collide.
  fn where_clause(
    &self,
    schema: &TableSchema,
    filters: &[FilterTerm],
    next_index: &mut usize,
    binds: &mut Vec<BoundValue>,
  ) -> Result<String> {
    if filters.is_empty() {
      return Ok(String::new());
    }

    let mut fragments = Vec::with_capacity(filters.len());
    for term in filters {
      self.require_column(schema, &term.column)?;
      let column = self.quote(&term.column)?;

      let fragment = match term.op {
        FilterOp::Null => format!("{column} IS NULL"),
        FilterOp::NotNull => format!("{column} IS NOT NULL"),
        FilterOp::In | FilterOp::NotIn => {
          let values = match &term.value {
            FilterValue::Multi(values) => values,
            FilterValue::Single(_) => {
              return Err(GatewayError::InvalidInput(format!(
                "filter '{}' requires multiple values",
                term.column
              )));
            }
          };
          let placeholders: Vec<String> = values
            .iter()
            .map(|v| {
              binds.push(BoundValue::Str(v.clone()));
              let ph = self.dialect.placeholder(*next_index);
              *next_index += 1;
              ph
            })
            .collect();
          format!("{column} {} ({})", term.op.sql_operator(), placeholders.join(", "))
        }
        _ => {
          let FilterValue::Single(value) = &term.value else {
            return Err(GatewayError::InvalidInput(format!(
              "filter '{}' requires a single value",
              term.column
            )));
          };
          binds.push(BoundValue::Str(value.clone()));
          let ph = self.dialect.placeholder(*next_index);
          *next_index += 1;
          format!("{column} {} {ph}", term.op.sql_operator())
        }
      };
      fragments.push(fragment);
    }

    return Ok(format!(" WHERE {}", fragments.join(" AND ")));
  }

  fn order_clause(&self, schema: &TableSchema, sort: &[SortTerm]) -> Result<String> {
    if sort.is_empty() {
      return Ok(String::new());
    }
    let mut fragments = Vec::with_capacity(sort.len());
    for term in sort {
      self.require_column(schema, &term.column)?;
      let column = self.quote(&term.column)?;
      let direction = if term.descending { "DESC" } else { "ASC" };
      fragments.push(format!("{column} {direction}"));
    }
    return Ok(format!(" ORDER BY {}", fragments.join(", ")));
  }

  fn projection(&self, schema: &TableSchema, fields: &Option<Vec<String>>) -> Result<String> {
    let Some(fields) = fields else {
      return Ok("*".to_string());
    };
    let mut quoted = Vec::with_capacity(fields.len());
    for field in fields {
      self.require_column(schema, field)?;
      quoted.push(self.quote(field)?);
    }
    return Ok(quoted.join(", "));
  }

  pub fn list(&self, schema: &TableSchema, opts: &ListOptions) -> Result<BuiltQuery> {
    let table = self.quote(&schema.name)?;
    let projection = self.projection(schema, &opts.fields)?;

    let mut binds = Vec::new();
    let mut next_index = 0;
    let where_clause = self.where_clause(schema, &opts.filter, &mut next_index, &mut binds)?;
    let order_clause = self.order_clause(schema, &opts.sort)?;

    let limit_ph = self.dialect.placeholder(next_index);
    next_index += 1;
    binds.push(BoundValue::Int(opts.page_size as i64));
    let offset_ph = self.dialect.placeholder(next_index);
    binds.push(BoundValue::Int(opts.offset() as i64));

    let sql = format!(
      "SELECT {projection} FROM {table}{where_clause}{order_clause} LIMIT {limit_ph} OFFSET {offset_ph}"
    );
    return Ok(BuiltQuery { sql, binds });
  }

  pub fn count(&self, schema: &TableSchema, filter: &[FilterTerm]) -> Result<BuiltQuery> {
    let table = self.quote(&schema.name)?;
    let mut binds = Vec::new();
    let mut next_index = 0;
    let where_clause = self.where_clause(schema, filter, &mut next_index, &mut binds)?;
    let sql = format!("SELECT COUNT(*) FROM {table}{where_clause}");
    return Ok(BuiltQuery { sql, binds });
  }

  pub fn read(&self, schema: &TableSchema, id: &RecordId) -> Result<BuiltQuery> {
    let pk = self.primary_key(schema)?;
    let table = self.quote(&schema.name)?;
    let column = self.quote(&pk)?;
    let ph = self.dialect.placeholder(0);
    let sql = format!("SELECT * FROM {table} WHERE {column} = {ph}");
    return Ok(BuiltQuery {
      sql,
      binds: vec![BoundValue::from_record_id(id)],
    });
  }

  pub fn create(&self, schema: &TableSchema, fields: &Row) -> Result<BuiltQuery> {
    if fields.is_empty() {
      return Err(GatewayError::InvalidInput("create requires at least one field".to_string()));
    }
    let table = self.quote(&schema.name)?;
    let mut columns = Vec::with_capacity(fields.len());
    let mut placeholders = Vec::with_capacity(fields.len());
    let mut binds = Vec::with_capacity(fields.len());

    for (index, (column, value)) in fields.iter().enumerate() {
      self.require_column(schema, column)?;
      columns.push(self.quote(column)?);
      placeholders.push(self.dialect.placeholder(index));
      binds.push(BoundValue::from_json(value));
    }

    let sql = format!(
      "INSERT INTO {table} ({}) VALUES ({})",
      columns.join(", "),
      placeholders.join(", ")
    );
    return Ok(BuiltQuery { sql, binds });
  }

  /// Whether the dialect can recover a server-generated primary key via
  /// `INSERT ... RETURNING` rather than `last_insert_id()`.
  pub fn supports_returning(&self) -> bool {
    return self.dialect.supports_returning();
  }

  /// Same as `create`, but appends `RETURNING <pk>` so the generated id can
  /// be read back from the insert itself -- required on Postgres, where
  /// `AnyQueryResult::last_insert_id()` is never populated.
  pub fn create_returning(&self, schema: &TableSchema, fields: &Row, pk: &str) -> Result<BuiltQuery> {
    let mut built = self.create(schema, fields)?;
    let pk_column = self.quote(pk)?;
    built.sql.push_str(&format!(" RETURNING {pk_column}"));
    return Ok(built);
  }

  pub fn update(&self, schema: &TableSchema, id: &RecordId, fields: &Row) -> Result<BuiltQuery> {
    if fields.is_empty() {
      return Err(GatewayError::InvalidInput("update requires at least one field".to_string()));
    }
    let pk = self.primary_key(schema)?;
    let table = self.quote(&schema.name)?;

    let mut assignments = Vec::with_capacity(fields.len());
    let mut binds = Vec::with_capacity(fields.len() + 1);
    let mut index = 0;
    for (column, value) in fields {
      self.require_column(schema, column)?;
      let quoted = self.quote(column)?;
      let ph = self.dialect.placeholder(index);
      index += 1;
      assignments.push(format!("{quoted} = {ph}"));
      binds.push(BoundValue::from_json(value));
    }

    let pk_column = self.quote(&pk)?;
    let pk_ph = self.dialect.placeholder(index);
    binds.push(BoundValue::from_record_id(id));

    let sql = format!(
      "UPDATE {table} SET {} WHERE {pk_column} = {pk_ph}",
      assignments.join(", ")
    );
    return Ok(BuiltQuery { sql, binds });
  }

  pub fn delete(&self, schema: &TableSchema, id: &RecordId) -> Result<BuiltQuery> {
    let pk = self.primary_key(schema)?;
    let table = self.quote(&schema.name)?;
    let column = self.quote(&pk)?;
    let ph = self.dialect.placeholder(0);
    let sql = format!("DELETE FROM {table} WHERE {column} = {ph}");
    return Ok(BuiltQuery {
      sql,
      binds: vec![BoundValue::from_record_id(id)],
    });
  }

  /// A single `DELETE ... WHERE pk IN (...)` with one bound parameter per
  /// id (§4.3's `bulkDelete`).
  pub fn bulk_delete(&self, schema: &TableSchema, ids: &[RecordId]) -> Result<BuiltQuery> {
    if ids.is_empty() {
      return Err(GatewayError::InvalidInput("bulk_delete requires at least one id".to_string()));
    }
    let pk = self.primary_key(schema)?;
    let table = self.quote(&schema.name)?;
    let column = self.quote(&pk)?;

    let mut placeholders = Vec::with_capacity(ids.len());
    let mut binds = Vec::with_capacity(ids.len());
    for (index, id) in ids.iter().enumerate() {
      placeholders.push(self.dialect.placeholder(index));
      binds.push(BoundValue::from_record_id(id));
    }

    let sql = format!("DELETE FROM {table} WHERE {column} IN ({})", placeholders.join(", "));
    return Ok(BuiltQuery { sql, binds });
  }

  pub fn primary_key(&self, schema: &TableSchema) -> Result<String> {
    return schema.primary_key.clone().ok_or_else(|| {
      GatewayError::Internal(anyhow::anyhow!("table '{}' has no primary key", schema.name))
    });
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::dialect::MySqlDialect;
  use crate::model::{ColumnSchema, SortTerm};

  fn schema() -> TableSchema {
    return TableSchema {
      name: "users".to_string(),
      columns: vec![
        ColumnSchema { name: "id".to_string(), r#type: "int".to_string(), nullable: false, default: None },
        ColumnSchema { name: "name".to_string(), r#type: "varchar".to_string(), nullable: false, default: None },
        ColumnSchema { name: "age".to_string(), r#type: "int".to_string(), nullable: true, default: None },
      ],
      primary_key: Some("id".to_string()),
    };
  }

  fn builder() -> QueryBuilder {
    return QueryBuilder::new(Arc::new(MySqlDialect { schema: "app".to_string() }));
  }

  #[test]
  fn list_uses_distinct_placeholders_for_repeated_columns() {
    let qb = builder();
    let opts = ListOptions {
      fields: None,
      filter: vec![
        FilterTerm { column: "age".to_string(), op: FilterOp::Gte, value: FilterValue::Single("18".to_string()) },
        FilterTerm { column: "age".to_string(), op: FilterOp::Lte, value: FilterValue::Single("65".to_string()) },
      ],
      sort: vec![SortTerm { column: "name".to_string(), descending: false }],
      page: 1,
      page_size: 20,
    };
    let built = qb.list(&schema(), &opts).unwrap();
    assert!(built.sql.contains("WHERE `age` >= ? AND `age` <= ?"));
    assert!(built.sql.contains("ORDER BY `name` ASC"));
    assert!(built.sql.contains("LIMIT ? OFFSET ?"));
    assert_eq!(built.binds.len(), 4);
  }

  #[test]
  fn rejects_unknown_columns() {
    let qb = builder();
    let opts = ListOptions {
      fields: Some(vec!["nonexistent".to_string()]),
      ..ListOptions::default()
    };
    assert!(qb.list(&schema(), &opts).is_err());
  }

  #[test]
  fn in_filter_expands_one_placeholder_per_element() {
    let qb = builder();
    let opts = ListOptions {
      filter: vec![FilterTerm {
        column: "id".to_string(),
        op: FilterOp::In,
        value: FilterValue::Multi(vec!["1".to_string(), "2".to_string(), "3".to_string()]),
      }],
      ..ListOptions::default()
    };
    let built = qb.list(&schema(), &opts).unwrap();
    assert!(built.sql.contains("`id` IN (?, ?, ?)"));
  }

  #[test]
  fn create_binds_every_field_value_never_inlining_it() {
    let qb = builder();
    let mut fields = Row::new();
    fields.insert("name".to_string(), Value::String("Robert'); DROP TABLE users;--".to_string()));
    let built = qb.create(&schema(), &fields).unwrap();
    assert!(!built.sql.contains("DROP TABLE"));
    assert_eq!(built.binds.len(), 1);
  }

  #[test]
  fn create_returning_appends_returning_clause_for_postgres() {
    let qb = QueryBuilder::new(Arc::new(crate::dialect::PostgresDialect { schema: "public".to_string() }));
    let mut fields = Row::new();
    fields.insert("name".to_string(), Value::String("Ada".to_string()));
    let built = qb.create_returning(&schema(), &fields, "id").unwrap();
    assert!(built.sql.ends_with("RETURNING \"id\""));
    assert!(qb.supports_returning());
  }

  #[test]
  fn mysql_does_not_support_returning() {
    assert!(!builder().supports_returning());
  }

  #[test]
  fn bulk_delete_binds_one_placeholder_per_id() {
    let qb = builder();
    let built = qb
      .bulk_delete(&schema(), &[RecordId::Integer(1), RecordId::Integer(2)])
      .unwrap();
    assert!(built.sql.contains("IN (?, ?)"));
    assert_eq!(built.binds.len(), 2);
  }
}
