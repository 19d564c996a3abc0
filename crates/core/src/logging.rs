use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;

use crate::config::LoggingConfig;

const REDACTED: &str = "***REDACTED***";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
  Info,
  Warning,
  Error,
}

impl LogLevel {
  /// 2xx/3xx → info, 4xx → warning, 5xx → error (§4.8).
  pub fn from_status(status: u16) -> Self {
    return match status {
      500..=599 => Self::Error,
      400..=499 => Self::Warning,
      _ => Self::Info,
    };
  }
}

/// One structured record per request (§3, §4.8). Optional fields are only
/// populated when their corresponding `logging.*` flag is set.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
  pub timestamp: chrono::DateTime<chrono::Utc>,
  pub level: LogLevel,
  pub method: String,
  pub action: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub table: Option<String>,
  pub remote_ip: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub user: Option<String>,
  pub status: u16,
  pub duration_ms: u64,
  pub response_size: usize,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub headers: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub query_params: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub request_body: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub response_body: Option<Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub message: Option<String>,
}

struct FileState {
  file: File,
  path: PathBuf,
  size: u64,
}

/// Structured request log with secret redaction and rotation (§4.8). Owns
/// an append-only file sink independent of the process's own `tracing`
/// diagnostic stream (see SPEC_FULL §2 ambient-stack note): this is the
/// spec-mandated audit trail, not a debugging aid.
pub struct RequestLogger {
  config: LoggingConfig,
  state: Mutex<Option<FileState>>,
}

impl RequestLogger {
  pub fn new(config: LoggingConfig) -> Self {
    return Self {
      config,
      state: Mutex::new(None),
    };
  }

  pub fn enabled(&self) -> bool {
    return self.config.enabled;
  }

  pub fn truncate_body(&self, body: &str) -> String {
    if body.len() <= self.config.max_body_length {
      return body.to_string();
    }
    return body.chars().take(self.config.max_body_length).collect();
  }

  /// Walks a JSON value and replaces any object field whose key matches
  /// `sensitive_keys` (case-insensitive) with a literal sentinel, leaving
  /// the key itself present (§8, invariant 7).
  pub fn redact(&self, value: &Value) -> Value {
    return redact_value(value, &self.config.sensitive_keys);
  }

  /// Appends one record, rotating the active file first if it has grown
  /// past `rotation_size` and pruning to `max_files` afterward. Failures
  /// here must never propagate to the client (§7) -- callers should log
  /// the error via `tracing` and otherwise ignore it.
  pub fn append(&self, record: &LogRecord) -> std::io::Result<()> {
    if !self.config.enabled {
      return Ok(());
    }

    let line = serde_json::to_vec(record).map(|mut v| {
      v.push(b'\n');
      v
    })?;

    let mut guard = self.state.lock();
    self.ensure_open(&mut guard)?;
    let state = guard.as_mut().expect("just opened");

    if state.size + line.len() as u64 > self.config.rotation_size {
      self.rotate(&mut guard)?;
      self.ensure_open(&mut guard)?;
    }

    let state = guard.as_mut().expect("just opened");
    state.file.write_all(&line)?;
    state.size += line.len() as u64;
    return Ok(());
  }

  fn current_path(&self) -> PathBuf {
    let today = chrono::Utc::now().format("%Y-%m-%d");
    return Path::new(&self.config.log_dir).join(format!("api_{today}.log"));
  }

  fn ensure_open(&self, guard: &mut Option<FileState>) -> std::io::Result<()> {
    let target = self.current_path();
    let needs_open = match guard {
      Some(state) => state.path != target,
      None => true,
    };
    if !needs_open {
      return Ok(());
    }

    fs::create_dir_all(&self.config.log_dir)?;
    let file = OpenOptions::new().create(true).append(true).open(&target)?;
    let size = file.metadata()?.len();
    *guard = Some(FileState {
      file,
      path: target,
      size,
    });
    return Ok(());
  }

  /// Renames the active file with a timestamp suffix and opens a fresh one,
  /// then deletes all but the newest `max_files` rotated files (§4.8).
  fn rotate(&self, guard: &mut Option<FileState>) -> std::io::Result<()> {
    let Some(state) = guard.take() else {
      return Ok(());
    };
    drop(state.file);

    let suffix = chrono::Utc::now().format("%Y%m%d%H%M%S");
    let rotated = state.path.with_extension(format!("log.{suffix}"));
    fs::rename(&state.path, &rotated)?;

    self.cleanup()?;
    return Ok(());
  }

  fn cleanup(&self) -> std::io::Result<()> {
    let dir = Path::new(&self.config.log_dir);
    if !dir.exists() {
      return Ok(());
    }

    let mut rotated: Vec<(std::time::SystemTime, PathBuf)> = fs::read_dir(dir)?
      .filter_map(|entry| entry.ok())
      .filter(|entry| {
        entry
          .file_name()
          .to_string_lossy()
          .contains(".log.")
      })
      .filter_map(|entry| {
        let modified = entry.metadata().ok()?.modified().ok()?;
        Some((modified, entry.path()))
      })
      .collect();

    rotated.sort_by(|a, b| b.0.cmp(&a.0));
    for (_, path) in rotated.into_iter().skip(self.config.max_files) {
      fs::remove_file(path).ok();
    }
    return Ok(());
  }
}

fn redact_value(value: &Value, sensitive_keys: &std::collections::HashSet<String>) -> Value {
  return match value {
    Value::Object(map) => {
      let mut out = serde_json::Map::with_capacity(map.len());
      for (k, v) in map {
        if sensitive_keys.iter().any(|s| s.eq_ignore_ascii_case(k)) {
          out.insert(k.clone(), Value::String(REDACTED.to_string()));
        } else {
          out.insert(k.clone(), redact_value(v, sensitive_keys));
        }
      }
      Value::Object(out)
    }
    Value::Array(items) => Value::Array(items.iter().map(|v| redact_value(v, sensitive_keys)).collect()),
    other => other.clone(),
  };
}

/// Flattened query-params map rendered as JSON for the `query_params` field,
/// kept separate from `redact_value` since query params are already
/// flat strings rather than arbitrary nested JSON.
pub fn query_params_to_json(params: &HashMap<String, String>) -> Value {
  return serde_json::to_value(params).unwrap_or(Value::Null);
}

const SPAN_LEVEL: tracing::Level = tracing::Level::INFO;
const SPAN_NAME: &str = "gateway_request";

/// Opens one request-scoped `tracing` span per call, independent of the
/// file-backed `RequestLogger` above, grounded on the reference's
/// `sqlite_logger_make_span`/`on_request`/`on_response` trio. Wired into
/// `tower_http::trace::TraceLayer` in `router::build_router` the same way
/// the reference wires it in front of its own routes. `action`/`table`
/// are read straight off the query string (best-effort, unvalidated --
/// the `Validator` is the source of truth; this is diagnostic only).
/// `user`/`status`/`latency_ms`/`length` start out empty and are filled in
/// as the request is authenticated and completed.
pub fn make_span(request: &axum::http::Request<axum::body::Body>) -> tracing::Span {
  let remote_addr = request
    .extensions()
    .get::<axum::extract::ConnectInfo<std::net::SocketAddr>>()
    .map(|addr| addr.0.to_string());
  let (action, table) = action_and_table_from_query(request.uri().query());

  return tracing::span!(
    SPAN_LEVEL,
    SPAN_NAME,
    method = %request.method(),
    action = action.as_deref(),
    table = table.as_deref(),
    remote_addr = remote_addr.as_deref(),
    user = tracing::field::Empty,
    status = tracing::field::Empty,
    latency_ms = tracing::field::Empty,
    length = tracing::field::Empty,
  );
}

/// Nothing further to unpack; `make_span` already read everything the span
/// needs out of the request.
pub fn on_request(_request: &axum::http::Request<axum::body::Body>, _span: &tracing::Span) {}

pub fn on_response(response: &axum::http::Response<axum::body::Body>, latency: std::time::Duration, span: &tracing::Span) {
  let length = response
    .headers()
    .get(axum::http::header::CONTENT_LENGTH)
    .and_then(|v| v.to_str().ok())
    .and_then(|v| v.parse::<i64>().ok());

  span.record("latency_ms", latency.as_secs_f64() * 1000.0);
  span.record("status", response.status().as_u16());
  span.record("length", length);
  tracing::event!(SPAN_LEVEL, "response sent");
}

fn action_and_table_from_query(query: Option<&str>) -> (Option<String>, Option<String>) {
  let Some(query) = query else { return (None, None) };
  let mut action = None;
  let mut table = None;
  for pair in query.split('&') {
    let mut parts = pair.splitn(2, '=');
    let key = parts.next().unwrap_or("");
    let value = parts.next().unwrap_or("");
    match key {
      "action" => action = Some(value.to_string()),
      "table" => table = Some(value.to_string()),
      _ => {}
    }
  }
  return (action, table);
}
