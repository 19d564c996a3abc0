use serde_json::{Value, json};

use crate::app_state::AppState;
use crate::error::Result;
use crate::model::TableSchema;

/// Builds the `openapi` action's response body: a minimal OpenAPI 3.0
/// document describing the single gateway endpoint and a component schema
/// per introspected table. This is a pure function of the live schema, not
/// a hand-maintained spec file -- there is nothing here to keep in sync by
/// hand as tables are added or altered.
pub async fn build_document(state: &AppState) -> Result<Value> {
  let tables = state.schema.list_tables().await?;

  let mut schemas = serde_json::Map::new();
  for table in tables.iter() {
    let table_schema = state.schema.columns(table).await?;
    schemas.insert(table.clone(), table_schema_to_openapi(&table_schema));
  }

  let document = json!({
    "openapi": "3.0.3",
    "info": {
      "title": "gateway API",
      "version": "1.0.0",
    },
    "paths": {
      "/api": {
        "get": {
          "summary": "List, read, count, or introspect records via the `action` query parameter",
          "parameters": action_parameters(),
          "responses": {
            "200": { "description": "Success" },
            "400": { "description": "Invalid input" },
            "401": { "description": "Authentication required or invalid" },
            "403": { "description": "Forbidden" },
            "404": { "description": "Not found" },
            "429": { "description": "Rate limited" },
          },
        },
        "post": {
          "summary": "Create, update, delete, bulk-create, bulk-delete, or login via the `action` query parameter",
          "parameters": action_parameters(),
          "requestBody": {
            "content": {
              "application/json": {},
              "application/x-www-form-urlencoded": {},
              "multipart/form-data": {},
            },
          },
          "responses": {
            "200": { "description": "Success" },
            "400": { "description": "Invalid input" },
            "401": { "description": "Authentication required or invalid" },
            "403": { "description": "Forbidden" },
            "404": { "description": "Not found" },
            "409": { "description": "Conflict or integrity violation" },
            "429": { "description": "Rate limited" },
          },
        },
      },
    },
    "components": {
      "schemas": Value::Object(schemas),
    },
  });

  return Ok(document);
}

fn action_parameters() -> Value {
  return json!([
    { "name": "action", "in": "query", "required": true, "schema": { "type": "string" } },
    { "name": "table", "in": "query", "required": false, "schema": { "type": "string" } },
    { "name": "id", "in": "query", "required": false, "schema": { "type": "string" } },
    { "name": "filter", "in": "query", "required": false, "schema": { "type": "string" } },
    { "name": "sort", "in": "query", "required": false, "schema": { "type": "string" } },
    { "name": "page", "in": "query", "required": false, "schema": { "type": "integer" } },
    { "name": "page_size", "in": "query", "required": false, "schema": { "type": "integer" } },
    { "name": "fields", "in": "query", "required": false, "schema": { "type": "string" } },
  ]);
}

fn table_schema_to_openapi(schema: &TableSchema) -> Value {
  let mut properties = serde_json::Map::new();
  for column in &schema.columns {
    properties.insert(
      column.name.clone(),
      json!({ "type": sql_type_to_openapi(&column.r#type), "nullable": column.nullable }),
    );
  }
  return json!({
    "type": "object",
    "properties": Value::Object(properties),
  });
}

fn sql_type_to_openapi(sql_type: &str) -> &'static str {
  let lowered = sql_type.to_lowercase();
  if lowered.contains("bool") {
    return "boolean";
  }
  if lowered.contains("int") {
    return "integer";
  }
  if lowered.contains("float") || lowered.contains("double") || lowered.contains("decimal") || lowered.contains("numeric") {
    return "number";
  }
  return "string";
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn maps_sql_types_to_openapi_types() {
    assert_eq!(sql_type_to_openapi("INT"), "integer");
    assert_eq!(sql_type_to_openapi("varchar(255)"), "string");
    assert_eq!(sql_type_to_openapi("DOUBLE"), "number");
    assert_eq!(sql_type_to_openapi("BOOLEAN"), "boolean");
  }
}
