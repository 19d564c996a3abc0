use std::collections::{HashMap, HashSet};

use serde::Deserialize;

use crate::rbac::Action;

/// Replaces the dynamic array-keyed configuration of the source with an
/// explicit record whose fields enumerate every recognized option (§6).
/// Constructed once at startup and propagated by dependency injection, not
/// through a process-global.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub database: DatabaseConfig,
  #[serde(default)]
  pub auth: AuthConfig,
  #[serde(default)]
  pub roles: HashMap<String, HashMap<String, HashSet<Action>>>,
  #[serde(default)]
  pub rate_limit: RateLimitConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
  #[serde(default)]
  pub monitoring: MonitoringConfig,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseDialect {
  MySql,
  Postgres,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
  pub dialect: DatabaseDialect,
  pub url: String,
  #[serde(default = "default_max_connections")]
  pub max_connections: u32,
}

fn default_max_connections() -> u32 {
  return 10;
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethodConfig {
  ApiKey,
  Basic,
  Jwt,
  Oauth,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
  #[serde(default)]
  pub enabled: bool,
  pub method: Option<AuthMethodConfig>,
  #[serde(default)]
  pub api_keys: Vec<String>,
  #[serde(default = "default_role")]
  pub api_key_role: String,
  #[serde(default)]
  pub basic_users: HashMap<String, String>,
  #[serde(default)]
  pub use_database_auth: bool,
  #[serde(default)]
  pub user_roles: HashMap<String, String>,
  pub jwt_secret: Option<String>,
  #[serde(default = "default_jwt_expiration")]
  pub jwt_expiration: i64,
  pub jwt_issuer: Option<String>,
  pub jwt_audience: Option<String>,
  #[serde(default)]
  pub default_role: Option<String>,
  #[serde(default)]
  pub trust_forwarded_headers: bool,
}

fn default_role() -> String {
  return "admin".to_string();
}

fn default_jwt_expiration() -> i64 {
  return 3600;
}

impl Default for AuthConfig {
  fn default() -> Self {
    return Self {
      enabled: false,
      method: None,
      api_keys: vec![],
      api_key_role: default_role(),
      basic_users: HashMap::new(),
      use_database_auth: false,
      user_roles: HashMap::new(),
      jwt_secret: None,
      jwt_expiration: default_jwt_expiration(),
      jwt_issuer: None,
      jwt_audience: None,
      default_role: None,
      trust_forwarded_headers: false,
    };
  }
}

impl AuthConfig {
  pub fn anonymous_role(&self) -> &str {
    return self.default_role.as_deref().unwrap_or("admin");
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default = "default_max_requests")]
  pub max_requests: u32,
  #[serde(default = "default_window_seconds")]
  pub window_seconds: u64,
  pub storage_dir: Option<String>,
}

fn default_max_requests() -> u32 {
  return 100;
}

fn default_window_seconds() -> u64 {
  return 60;
}

impl Default for RateLimitConfig {
  fn default() -> Self {
    return Self {
      enabled: false,
      max_requests: default_max_requests(),
      window_seconds: default_window_seconds(),
      storage_dir: None,
    };
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheVaryBy {
  ApiKey,
  UserId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub driver: CacheDriver,
  #[serde(default = "default_cache_ttl")]
  pub ttl: u64,
  #[serde(default)]
  pub per_table: HashMap<String, u64>,
  #[serde(default)]
  pub exclude_tables: HashSet<String>,
  #[serde(default)]
  pub vary_by: Vec<CacheVaryBy>,
  pub path: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CacheDriver {
  #[default]
  Memory,
  File,
}

fn default_cache_ttl() -> u64 {
  return 300;
}

impl Default for CacheConfig {
  fn default() -> Self {
    return Self {
      enabled: false,
      driver: CacheDriver::Memory,
      ttl: default_cache_ttl(),
      per_table: HashMap::new(),
      exclude_tables: HashSet::new(),
      vary_by: vec![],
      path: None,
    };
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_log_dir")]
  pub log_dir: String,
  #[serde(default = "default_log_level")]
  pub log_level: String,
  #[serde(default)]
  pub log_headers: bool,
  #[serde(default)]
  pub log_body: bool,
  #[serde(default)]
  pub log_query_params: bool,
  #[serde(default)]
  pub log_response_body: bool,
  #[serde(default = "default_max_body_length")]
  pub max_body_length: usize,
  #[serde(default = "default_sensitive_keys")]
  pub sensitive_keys: HashSet<String>,
  #[serde(default = "default_rotation_size")]
  pub rotation_size: u64,
  #[serde(default = "default_max_files")]
  pub max_files: usize,
}

fn default_true() -> bool {
  return true;
}

fn default_log_dir() -> String {
  return "logs".to_string();
}

fn default_log_level() -> String {
  return "info".to_string();
}

fn default_max_body_length() -> usize {
  return 4096;
}

fn default_sensitive_keys() -> HashSet<String> {
  return ["password", "token", "secret", "api_key", "apikey"]
    .into_iter()
    .map(str::to_string)
    .collect();
}

fn default_rotation_size() -> u64 {
  return 10 * 1024 * 1024;
}

fn default_max_files() -> usize {
  return 10;
}

impl Default for LoggingConfig {
  fn default() -> Self {
    return Self {
      enabled: true,
      log_dir: default_log_dir(),
      log_level: default_log_level(),
      log_headers: false,
      log_body: false,
      log_query_params: false,
      log_response_body: false,
      max_body_length: default_max_body_length(),
      sensitive_keys: default_sensitive_keys(),
      rotation_size: default_rotation_size(),
      max_files: default_max_files(),
    };
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MonitoringThresholds {
  #[serde(default = "default_error_rate_threshold")]
  pub error_rate: f64,
  #[serde(default = "default_response_time_threshold")]
  pub response_time: f64,
  #[serde(default = "default_auth_failures_threshold")]
  pub auth_failures: f64,
  #[serde(default = "default_rate_limit_threshold")]
  pub rate_limit: f64,
}

fn default_error_rate_threshold() -> f64 {
  return 0.05;
}
fn default_response_time_threshold() -> f64 {
  return 1000.0;
}
fn default_auth_failures_threshold() -> f64 {
  return 0.1;
}
fn default_rate_limit_threshold() -> f64 {
  return 0.1;
}

impl Default for MonitoringThresholds {
  fn default() -> Self {
    return Self {
      error_rate: default_error_rate_threshold(),
      response_time: default_response_time_threshold(),
      auth_failures: default_auth_failures_threshold(),
      rate_limit: default_rate_limit_threshold(),
    };
  }
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AlertHandlerKind {
  Log,
  Webhook,
  Slack,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MonitoringConfig {
  #[serde(default)]
  pub enabled: bool,
  #[serde(default)]
  pub thresholds: MonitoringThresholds,
  #[serde(default)]
  pub alert_handlers: Vec<AlertHandlerKind>,
  pub webhook_url: Option<String>,
  pub slack_webhook_url: Option<String>,
}
