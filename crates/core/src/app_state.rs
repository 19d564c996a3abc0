use std::sync::Arc;

use crate::auth::Authenticator;
use crate::cache::{CacheManager, CacheStore};
use crate::config::{CacheDriver, Config, DatabaseDialect};
use crate::crud::{CrudEngine, QueryBuilder};
use crate::dialect::{Dialect, MySqlDialect, PostgresDialect};
use crate::error::Result;
use crate::logging::RequestLogger;
use crate::monitor::{AlertHandler, LogAlertHandler, Monitor, SlackAlertHandler, WebhookAlertHandler};
use crate::rate_limit::{FileStore as RateLimitFileStore, MemoryStore as RateLimitMemoryStore, RateLimitStore, RateLimiter};
use crate::rbac::RbacTable;
use crate::schema::SchemaInspector;

/// Everything a request handler needs, built once at startup and shared via
/// `axum::extract::State` (cheap to clone: every field is already an `Arc`
/// or is itself `Clone` over an internal `Arc`).
#[derive(Clone)]
pub struct AppState {
  pub config: Arc<Config>,
  pub dialect: Arc<dyn Dialect>,
  pub schema: Arc<SchemaInspector>,
  pub crud: Arc<CrudEngine>,
  pub auth: Arc<Authenticator>,
  pub rbac: Arc<RbacTable>,
  pub rate_limiter: Arc<RateLimiter>,
  pub cache: Arc<CacheManager>,
  pub logger: Arc<RequestLogger>,
  pub monitor: Arc<Monitor>,
}

impl AppState {
  /// Builds every pipeline collaborator from `Config`. Connection pool,
  /// dialect, and stores are chosen here; wiring never happens again for
  /// the life of the process.
  pub async fn build(config: Config) -> Result<Self> {
    let pool = sqlx::AnyPool::connect(&config.database.url)
      .await
      .map_err(|e| crate::error::GatewayError::Internal(anyhow::anyhow!("failed to connect to database: {e}")))?;

    let dialect: Arc<dyn Dialect> = match config.database.dialect {
      DatabaseDialect::MySql => Arc::new(MySqlDialect { schema: schema_name(&config) }),
      DatabaseDialect::Postgres => Arc::new(PostgresDialect { schema: schema_name(&config) }),
    };

    let schema = Arc::new(SchemaInspector::new(dialect.clone(), pool.clone()));
    let query_builder = QueryBuilder::new(dialect.clone());
    let crud = Arc::new(CrudEngine::new(pool.clone(), schema.clone(), query_builder));

    let auth = Arc::new(Authenticator::new(config.auth.clone(), pool.clone()));
    let rbac = Arc::new(RbacTable::new(config.roles.clone()));

    let rate_limit_store: Arc<dyn RateLimitStore> = match &config.rate_limit.storage_dir {
      Some(dir) => Arc::new(RateLimitFileStore::new(dir.clone())),
      None => Arc::new(RateLimitMemoryStore::default()),
    };
    let rate_limiter = Arc::new(RateLimiter::new(config.rate_limit.clone(), rate_limit_store));

    let cache_store: Arc<dyn CacheStore> = match config.cache.driver {
      CacheDriver::File => {
        let path = config.cache.path.clone().unwrap_or_else(|| "cache".to_string());
        Arc::new(crate::cache::FileStore::new(path))
      }
      CacheDriver::Memory => Arc::new(crate::cache::MemoryStore::default()),
    };
    let cache = Arc::new(CacheManager::new(config.cache.clone(), cache_store));

    let logger = Arc::new(RequestLogger::new(config.logging.clone()));

    let handlers = alert_handlers(&config);
    let monitor = Arc::new(Monitor::new(config.monitoring.clone(), handlers));

    return Ok(Self {
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
    });
  }
}

fn schema_name(config: &Config) -> String {
  // The active schema/database name is the last path segment of the
  // connection URL (e.g. `mysql://host/appdb` -> `appdb`).
  return config
    .database
    .url
    .rsplit('/')
    .next()
    .unwrap_or_default()
    .split('?')
    .next()
    .unwrap_or_default()
    .to_string();
}

fn alert_handlers(config: &Config) -> Vec<Box<dyn AlertHandler>> {
  let mut handlers: Vec<Box<dyn AlertHandler>> = Vec::new();
  for kind in &config.monitoring.alert_handlers {
    match kind {
      crate::config::AlertHandlerKind::Log => handlers.push(Box::new(LogAlertHandler)),
      crate::config::AlertHandlerKind::Webhook => {
        if let Some(url) = &config.monitoring.webhook_url {
          handlers.push(Box::new(WebhookAlertHandler::new(url.clone())));
        }
      }
      crate::config::AlertHandlerKind::Slack => {
        if let Some(url) = &config.monitoring.slack_webhook_url {
          handlers.push(Box::new(SlackAlertHandler::new(url.clone())));
        }
      }
    }
  }
  return handlers;
}
