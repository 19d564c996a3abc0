//! In-memory `AppState` for router and handler tests. Mirrors the pattern
//! `crud::engine`'s own test module already uses (sqlite-in-memory `AnyPool`
//! behind a `MySqlDialect`, schema seeded directly instead of introspected),
//! extended to wire the rest of the pipeline's collaborators.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::any::install_default_drivers;

use crate::app_state::AppState;
use crate::auth::Authenticator;
use crate::cache::{CacheManager, MemoryStore as CacheMemoryStore};
use crate::config::{AuthConfig, CacheConfig, Config, DatabaseConfig, DatabaseDialect, LoggingConfig, MonitoringConfig, RateLimitConfig};
use crate::crud::{CrudEngine, QueryBuilder};
use crate::dialect::{Dialect, MySqlDialect};
use crate::logging::RequestLogger;
use crate::model::{ColumnSchema, TableSchema};
use crate::monitor::Monitor;
use crate::rate_limit::{MemoryStore as RateLimitMemoryStore, RateLimiter};
use crate::rbac::{Action, RbacTable};
use crate::schema::SchemaInspector;

/// Builds a fully wired `AppState` against an in-memory SQLite database
/// seeded with a `users` table, auth/rate-limit/cache/logging/monitoring all
/// disabled by default so tests opt into exactly the behavior they exercise.
pub async fn test_app_state() -> AppState {
  install_default_drivers();
  let pool = sqlx::AnyPool::connect("sqlite::memory:").await.expect("in-memory sqlite pool");

  sqlx::query(
    "CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT NOT NULL, age INTEGER, email TEXT)",
  )
  .execute(&pool)
  .await
  .expect("seed users table");

  let dialect: Arc<dyn Dialect> = Arc::new(MySqlDialect { schema: "app".to_string() });
  let schema = Arc::new(SchemaInspector::new(dialect.clone(), pool.clone()));
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

  let query_builder = QueryBuilder::new(dialect.clone());
  let crud = Arc::new(CrudEngine::new(pool.clone(), schema.clone(), query_builder));

  let config = Config {
    database: DatabaseConfig {
      dialect: DatabaseDialect::MySql,
      url: "sqlite::memory:".to_string(),
      max_connections: 10,
    },
    auth: AuthConfig::default(),
    roles: default_roles(),
    rate_limit: RateLimitConfig::default(),
    cache: CacheConfig::default(),
    logging: LoggingConfig { enabled: false, ..LoggingConfig::default() },
    monitoring: MonitoringConfig::default(),
  };

  let auth = Arc::new(Authenticator::new(config.auth.clone(), pool.clone()));
  let rbac = Arc::new(RbacTable::new(config.roles.clone()));
  let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), Arc::new(RateLimitMemoryStore::default())));
  let cache = Arc::new(CacheManager::new(config.cache.clone(), Arc::new(CacheMemoryStore::default())));
  let logger = Arc::new(RequestLogger::new(config.logging.clone()));
  let monitor = Arc::new(Monitor::new(config.monitoring.clone(), vec![]));

  return AppState {
    config: Arc::new(config),
    dialect,
    schema,
    crud,
    auth,
    rbac,
    rate_limiter,
    cache,
    logger,
    monitor,
  };
}

/// `admin` may do anything anywhere; `readonly` may list/read everywhere
/// except the `secrets` table, which is denied outright. Enough shape for
/// router-level RBAC tests without hand-building a map inline everywhere.
fn default_roles() -> HashMap<String, HashMap<String, std::collections::HashSet<Action>>> {
  let mut roles = HashMap::new();

  let mut admin = HashMap::new();
  admin.insert(
    "*".to_string(),
    [Action::List, Action::Read, Action::Create, Action::Update, Action::Delete]
      .into_iter()
      .collect(),
  );
  roles.insert("admin".to_string(), admin);

  let mut readonly = HashMap::new();
  readonly.insert("*".to_string(), [Action::List, Action::Read].into_iter().collect());
  readonly.insert("secrets".to_string(), std::collections::HashSet::new());
  roles.insert("readonly".to_string(), readonly);

  return roles;
}
