//! End-to-end tests that drive the gateway the way a real client would: one
//! HTTP request in, one response out, against an in-memory SQLite-backed
//! `AppState`. Unlike the inline `#[cfg(test)]` modules elsewhere in this
//! crate, these exercise the full pipeline wiring in `router::handle`
//! rather than any single collaborator in isolation.

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Arc;

use axum_test::TestServer;
use gatewaycore::build_router;
use gatewaycore::config::{
  AuthConfig, CacheConfig, Config, DatabaseConfig, DatabaseDialect, LoggingConfig, MonitoringConfig, RateLimitConfig,
};
use gatewaycore::model::{ColumnSchema, TableSchema};
use gatewaycore::rbac::Action;
use gatewaycore::AppState;
use serde_json::json;
use sqlx::any::install_default_drivers;

/// Builds a fully wired `AppState` against a fresh in-memory SQLite database
/// seeded with a `users` table, the same way `crud::engine`'s own tests seed
/// a schema directly rather than introspecting it. Callers get to override
/// the role map and per-feature config before the state is handed to
/// `build_router`, since each test below exercises a different collaborator.
async fn state_with_roles(roles: HashMap<String, HashMap<String, HashSet<Action>>>) -> AppState {
  install_default_drivers();
  let pool = sqlx::AnyPool::connect("sqlite::memory:").await.expect("in-memory sqlite pool");

  sqlx::query("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER, email TEXT)")
    .execute(&pool)
    .await
    .expect("seed users table");

  let dialect: Arc<dyn gatewaycore::dialect::Dialect> =
    Arc::new(gatewaycore::dialect::MySqlDialect { schema: "app".to_string() });
  let schema = Arc::new(gatewaycore::schema::SchemaInspector::new(dialect.clone(), pool.clone()));
  schema.seed_for_test(TableSchema {
    name: "users".to_string(),
    columns: vec![
      ColumnSchema { name: "id".to_string(), r#type: "int".to_string(), nullable: false, default: None },
      ColumnSchema { name: "name".to_string(), r#type: "text".to_string(), nullable: false, default: None },
      ColumnSchema { name: "age".to_string(), r#type: "int".to_string(), nullable: true, default: None },
      ColumnSchema { name: "email".to_string(), r#type: "text".to_string(), nullable: true, default: None },
    ],
    primary_key: Some("id".to_string()),
  });

  let query_builder = gatewaycore::crud::QueryBuilder::new(dialect.clone());
  let crud = Arc::new(gatewaycore::crud::CrudEngine::new(pool.clone(), schema.clone(), query_builder));

  let config = Config {
    database: DatabaseConfig { dialect: DatabaseDialect::MySql, url: "sqlite::memory:".to_string(), max_connections: 10 },
    auth: AuthConfig::default(),
    roles,
    rate_limit: RateLimitConfig::default(),
    cache: CacheConfig::default(),
    logging: LoggingConfig { enabled: false, ..LoggingConfig::default() },
    monitoring: MonitoringConfig::default(),
  };

  let auth = Arc::new(gatewaycore::auth::Authenticator::new(config.auth.clone(), pool.clone()));
  let rbac = Arc::new(gatewaycore::rbac::RbacTable::new(config.roles.clone()));
  let rate_limiter = Arc::new(gatewaycore::rate_limit::RateLimiter::new(
    config.rate_limit.clone(),
    Arc::new(gatewaycore::rate_limit::MemoryStore::default()),
  ));
  let cache = Arc::new(gatewaycore::cache::CacheManager::new(
    config.cache.clone(),
    Arc::new(gatewaycore::cache::MemoryStore::default()),
  ));
  let logger = Arc::new(gatewaycore::logging::RequestLogger::new(config.logging.clone()));
  let monitor = Arc::new(gatewaycore::monitor::Monitor::new(config.monitoring.clone(), vec![]));

  return AppState { config: Arc::new(config), dialect, schema, crud, auth, rbac, rate_limiter, cache, logger, monitor };
}

/// With auth disabled (the default in these tests), every request
/// authenticates as the anonymous principal, whose role name defaults to
/// `"admin"` (`AuthConfig::anonymous_role`) absent an explicit
/// `auth.default_role` override -- so these role maps key off `"admin"`,
/// not a role literally named `"anonymous"`.
fn anonymous_full_access_roles() -> HashMap<String, HashMap<String, HashSet<Action>>> {
  let mut roles = HashMap::new();
  let mut anon = HashMap::new();
  anon.insert(
    "*".to_string(),
    [Action::List, Action::Read, Action::Create, Action::Update, Action::Delete].into_iter().collect(),
  );
  roles.insert("admin".to_string(), anon);
  return roles;
}

fn anonymous_read_only_roles() -> HashMap<String, HashMap<String, HashSet<Action>>> {
  let mut roles = HashMap::new();
  let mut anon = HashMap::new();
  anon.insert("*".to_string(), [Action::List, Action::Read].into_iter().collect());
  roles.insert("admin".to_string(), anon);
  return roles;
}

/// `build_router`'s `/api` handler takes `ConnectInfo<SocketAddr>` directly
/// (it needs the real peer address for rate limiting and auth fallback), so
/// these tests run over axum-test's real HTTP transport rather than its
/// default mock one -- only the former populates that extractor.
fn test_server(state: AppState) -> TestServer {
  let router = build_router(state);
  return TestServer::builder().http_transport().build(router).expect("test server");
}

#[tokio::test]
async fn create_then_list_round_trips_over_http() {
  let state = state_with_roles(anonymous_full_access_roles()).await;
  let server = test_server(state);

  let created = server
    .post("/api")
    .add_query_param("action", "create")
    .add_query_param("table", "users")
    .json(&json!({"name": "ada", "age": 30, "email": "ada@example.com"}))
    .await;
  created.assert_status_ok();

  let listed = server.get("/api").add_query_param("action", "list").add_query_param("table", "users").await;
  listed.assert_status_ok();
  let body: serde_json::Value = listed.json();
  assert_eq!(body["data"].as_array().unwrap().len(), 1);
  assert_eq!(body["data"][0]["name"], "ada");
}

#[tokio::test]
async fn write_action_is_forbidden_for_a_read_only_role() {
  let state = state_with_roles(anonymous_read_only_roles()).await;
  let server = test_server(state);

  let response = server
    .post("/api")
    .add_query_param("action", "create")
    .add_query_param("table", "users")
    .json(&json!({"name": "ada"}))
    .await;

  response.assert_status(axum::http::StatusCode::FORBIDDEN);
  let body: serde_json::Value = response.json();
  assert_eq!(body["error"], "Forbidden");
}

#[tokio::test]
async fn unknown_table_is_not_found() {
  let state = state_with_roles(anonymous_full_access_roles()).await;
  let server = test_server(state);

  let response = server.get("/api").add_query_param("action", "list").add_query_param("table", "ghosts").await;
  response.assert_status(axum::http::StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn healthz_reports_a_perfect_score_with_no_traffic() {
  let state = state_with_roles(anonymous_full_access_roles()).await;
  let server = test_server(state);

  let response = server.get("/healthz").await;
  response.assert_status_ok();
  let body: serde_json::Value = response.json();
  assert_eq!(body["score"], 100);
}

#[tokio::test]
async fn bulk_create_rolls_back_entirely_when_one_row_violates_the_schema() {
  let state = state_with_roles(anonymous_full_access_roles()).await;
  let server = test_server(state);

  let response = server
    .post("/api")
    .add_query_param("action", "bulk_create")
    .add_query_param("table", "users")
    .json(&json!([{"name": "ada"}, {"bogus_column": "nope"}]))
    .await;
  response.assert_status(axum::http::StatusCode::BAD_REQUEST);

  let listed = server.get("/api").add_query_param("action", "list").add_query_param("table", "users").await;
  let body: serde_json::Value = listed.json();
  assert_eq!(body["data"].as_array().unwrap().len(), 0);
}
