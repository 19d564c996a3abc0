use std::collections::{BTreeMap, HashMap};
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::Bytes;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, Method, StatusCode, header::CONTENT_TYPE};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{any, get};
use serde_json::{Value, json};

use crate::app_state::AppState;
use crate::auth;
use crate::cache::{cache_key, vary_segments};
use crate::error::{GatewayError, Result};
use crate::model::{AuthMethod, ListOptions, Row};
use crate::openapi;
use crate::rbac::Action as RbacAction;
use crate::validator::{RecordId, Validator};

/// The closed set of operations selectable via the `action` query parameter
/// (§4.10, §6). Parsed once at the edge of the pipeline; nothing downstream
/// ever matches on a raw string again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
  Tables,
  Columns,
  List,
  Count,
  Read,
  Create,
  Update,
  Delete,
  BulkCreate,
  BulkDelete,
  OpenApi,
  Login,
}

impl Action {
  fn parse(raw: &str) -> Result<Self> {
    return Ok(match raw {
      "tables" => Self::Tables,
      "columns" => Self::Columns,
      "list" => Self::List,
      "count" => Self::Count,
      "read" => Self::Read,
      "create" => Self::Create,
      "update" => Self::Update,
      "delete" => Self::Delete,
      "bulk_create" => Self::BulkCreate,
      "bulk_delete" => Self::BulkDelete,
      "openapi" => Self::OpenApi,
      "login" => Self::Login,
      other => return Err(GatewayError::InvalidInput(format!("unknown action: '{other}'"))),
    });
  }

  /// Action-to-category mapping for RBAC (§4.10). `None` means the action
  /// is administrative/meta, either unguarded or handled by the
  /// Authenticator itself.
  fn rbac_category(&self) -> Option<RbacAction> {
    return match self {
      Self::List | Self::Count => Some(RbacAction::List),
      Self::Read => Some(RbacAction::Read),
      Self::Create | Self::BulkCreate => Some(RbacAction::Create),
      Self::Update => Some(RbacAction::Update),
      Self::Delete | Self::BulkDelete => Some(RbacAction::Delete),
      Self::Tables | Self::Columns | Self::OpenApi | Self::Login => None,
    };
  }

  fn requires_table(&self) -> bool {
    return !matches!(self, Self::Tables | Self::OpenApi | Self::Login);
  }

  fn requires_id(&self) -> bool {
    return matches!(self, Self::Read | Self::Update | Self::Delete);
  }

  fn is_write(&self) -> bool {
    return matches!(
      self,
      Self::Create | Self::Update | Self::Delete | Self::BulkCreate | Self::BulkDelete
    );
  }

  fn is_cacheable_read(&self) -> bool {
    return matches!(self, Self::List | Self::Count | Self::Read);
  }
}

#[derive(Debug, Clone, Copy, Default)]
struct RateLimitHeaders {
  limit: u32,
  remaining: u32,
  reset_at: i64,
  window: u64,
}

#[derive(Debug, Clone, Copy, Default)]
struct CacheHeaders {
  present: bool,
  hit: bool,
  ttl: u64,
  stored: bool,
}

/// Builds the complete axum app: the single gateway entry point and an
/// unguarded health endpoint exposing the Monitor's health score, with
/// CORS, a body-size limit, and a request-tracing layer wired the same
/// way the reference wires `tower_http` in front of its own routes.
pub fn build_router(state: AppState) -> axum::Router {
  const BODY_LIMIT_BYTES: usize = 10 * 1024 * 1024;

  return axum::Router::new()
    .route("/api", any(handle))
    .route("/healthz", get(health))
    .layer(
      tower_http::trace::TraceLayer::new_for_http()
        .make_span_with(crate::logging::make_span)
        .on_request(crate::logging::on_request)
        .on_response(crate::logging::on_response),
    )
    .layer(tower_http::limit::RequestBodyLimitLayer::new(BODY_LIMIT_BYTES))
    .layer(tower_http::cors::CorsLayer::permissive())
    .with_state(state);
}

async fn health(State(state): State<AppState>) -> Json<Value> {
  let report = state.monitor.health();
  return Json(serde_json::to_value(report).unwrap_or(Value::Null));
}

async fn handle(
  State(state): State<AppState>,
  ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
  method: Method,
  headers: HeaderMap,
  Query(query): Query<HashMap<String, String>>,
  body: Bytes,
) -> Response {
  if method == Method::OPTIONS {
    return StatusCode::NO_CONTENT.into_response();
  }

  let start = Instant::now();
  state.monitor.record_request();

  let remote_ip = remote_addr.ip().to_string();
  let outcome = run_pipeline(&state, &method, &headers, &query, &body, &remote_ip).await;

  let elapsed_ms = start.elapsed().as_millis() as u64;
  let response_value = match &outcome.result {
    Ok((_, value)) => Some(value.clone()),
    Err(_) => None,
  };
  let mut response = match outcome.result {
    Ok((status, value)) => (status, Json(value)).into_response(),
    Err(err) => err.into_response(),
  };

  apply_rate_limit_headers(&mut response, &outcome.rate_limit);
  if outcome.cache.present {
    apply_cache_headers(&mut response, &outcome.cache);
  }

  let status = response.status().as_u16();
  state.monitor.record_response(status, elapsed_ms, 0).await;

  log_request(
    &state,
    &method,
    &query,
    &headers,
    &outcome.action,
    &outcome.table,
    &outcome.username,
    &remote_ip,
    status,
    elapsed_ms,
    &body,
    response_value.as_ref(),
  );

  return response;
}

struct PipelineOutcome {
  rate_limit: RateLimitHeaders,
  cache: CacheHeaders,
  action: String,
  table: Option<String>,
  username: Option<String>,
  result: Result<(StatusCode, Value)>,
}

/// The eleven-step pipeline from the router design (§4.10), laid out
/// linearly so every early return is visible at its call site rather than
/// hidden behind `?` across several helper layers -- rate-limit headers,
/// cache headers, and logging context all need to survive past the first
/// error, which a `?`-chained closure would make awkward to thread through.
async fn run_pipeline(
  state: &AppState,
  method: &Method,
  headers: &HeaderMap,
  query: &HashMap<String, String>,
  body: &[u8],
  remote_ip: &str,
) -> PipelineOutcome {
  let mut rate_limit = default_rate_limit_headers(state);
  let mut cache = CacheHeaders::default();
  let mut table_name: Option<String> = None;
  let mut username: Option<String> = None;

  let action_raw = query.get("action").cloned().unwrap_or_default();

  macro_rules! fail {
    ($err:expr) => {
      return PipelineOutcome {
        rate_limit,
        cache,
        action: action_raw,
        table: table_name,
        username,
        result: Err($err),
      }
    };
  }

  let action = match Action::parse(&action_raw) {
    Ok(action) => action,
    Err(err) => fail!(err),
  };

  let principal = if action == Action::Login {
    None
  } else {
    match state.auth.authenticate(headers, query).await {
      Ok(principal) => Some(principal),
      Err(err) => {
        state.monitor.record_security_event("auth_failure", &action_raw).await;
        fail!(err);
      }
    }
  };
  username = principal.as_ref().map(|p| p.username.clone());
  if let Some(name) = &username {
    tracing::Span::current().record("user", name.as_str());
  }

  if state.rate_limiter.enabled() {
    let identifier = state.auth.rate_limit_identifier(principal.as_ref(), headers, query, remote_ip);
    let check = match state.rate_limiter.check(&identifier).await {
      Ok(check) => check,
      Err(err) => fail!(err),
    };
    rate_limit = RateLimitHeaders {
      limit: state.rate_limiter.max_requests(),
      remaining: check.remaining,
      reset_at: check.reset_at,
      window: state.rate_limiter.window_seconds(),
    };
    if !check.allowed {
      state.monitor.record_security_event("rate_limit", &action_raw).await;
      let retry_after = (check.reset_at - chrono::Utc::now().timestamp()).max(0);
      fail!(GatewayError::RateLimited {
        retry_after,
        reset_at: check.reset_at,
        limit: rate_limit.limit,
        window: rate_limit.window,
      });
    }
  }

  let table = if action.requires_table() {
    let raw = query.get("table").map(String::as_str).unwrap_or_default();
    match Validator::identifier(raw) {
      Ok(name) => {
        table_name = Some(name.to_string());
        Some(name.to_string())
      }
      Err(err) => fail!(err),
    }
  } else {
    None
  };

  let record_id = if action.requires_id() {
    let raw = query.get("id").map(String::as_str).unwrap_or_default();
    match Validator::id(raw) {
      Ok(id) => Some(id),
      Err(err) => fail!(err),
    }
  } else {
    None
  };

  if let Some(category) = action.rbac_category() {
    let anonymous = state.auth.anonymous();
    let role = principal.as_ref().map(|p| p.role.as_str()).unwrap_or(anonymous.role.as_str());
    let table_ref = table.as_deref().unwrap_or_default();
    if !state.rbac.is_allowed(role, table_ref, category) {
      fail!(GatewayError::Forbidden {
        table: table_ref.to_string(),
        action: category,
      });
    }
  }

  if action.requires_table() {
    let table_ref = table.as_deref().unwrap_or_default();
    match state.schema.table_exists(table_ref).await {
      Ok(true) => {}
      Ok(false) => fail!(GatewayError::NotFound(format!("unknown table '{table_ref}'"))),
      Err(err) => fail!(err),
    }
  }

  let content_type = headers
    .get(CONTENT_TYPE)
    .and_then(|v| v.to_str().ok())
    .unwrap_or("application/json")
    .to_string();

  let api_key = auth::extract_api_key(headers, query);
  let user_id_for_cache = principal
    .as_ref()
    .filter(|p| p.auth_method != AuthMethod::Anonymous)
    .map(|p| p.username.as_str());

  if action.is_cacheable_read() {
    let table_ref = table.as_deref().unwrap_or_default();
    if state.cache.should_cache(table_ref) {
      let vary = vary_segments(state.cache.vary_by(), api_key.as_deref(), user_id_for_cache);
      let query_map: BTreeMap<String, String> = query.clone().into_iter().collect();
      let key = cache_key(table_ref, &query_map, &vary);

      if let Ok(Some(payload)) = state.cache.get(&key).await {
        if let Ok(value) = serde_json::from_slice::<Value>(&payload) {
          cache = CacheHeaders {
            present: true,
            hit: true,
            ttl: state.cache.ttl_for(table_ref),
            stored: false,
          };
          return PipelineOutcome {
            rate_limit,
            cache,
            action: action_raw,
            table: table_name,
            username,
            result: Ok((StatusCode::OK, value)),
          };
        }
      }
    }
  }

  let value = match execute_action(state, action, table.as_deref(), record_id, query, &content_type, body).await {
    Ok(value) => value,
    Err(err) => fail!(err),
  };

  if action.is_write() {
    if let Some(table_ref) = table.as_deref() {
      let _ = state.cache.invalidate_table(table_ref).await;
    }
  }

  if action.is_cacheable_read() {
    let table_ref = table.as_deref().unwrap_or_default();
    if state.cache.should_cache(table_ref) {
      let vary = vary_segments(state.cache.vary_by(), api_key.as_deref(), user_id_for_cache);
      let query_map: BTreeMap<String, String> = query.clone().into_iter().collect();
      let key = cache_key(table_ref, &query_map, &vary);
      if let Ok(payload) = serde_json::to_vec(&value) {
        let _ = state.cache.set(&key, payload, table_ref).await;
      }
      cache = CacheHeaders {
        present: true,
        hit: false,
        ttl: state.cache.ttl_for(table_ref),
        stored: true,
      };
    }
  }

  return PipelineOutcome {
    rate_limit,
    cache,
    action: action_raw,
    table: table_name,
    username,
    result: Ok((StatusCode::OK, value)),
  };
}

#[allow(clippy::too_many_arguments)]
async fn execute_action(
  state: &AppState,
  action: Action,
  table: Option<&str>,
  record_id: Option<RecordId>,
  query: &HashMap<String, String>,
  content_type: &str,
  body: &[u8],
) -> Result<Value> {
  return match action {
    Action::Tables => {
      let tables = state.schema.list_tables().await?;
      Ok(json!({ "tables": tables.as_slice() }))
    }

    Action::Columns => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'columns'")))?;
      let schema = state.schema.columns(table).await?;
      let columns: Vec<Value> = schema
        .columns
        .iter()
        .map(|c| json!({ "name": c.name, "type": c.r#type, "nullable": c.nullable, "default": c.default }))
        .collect();
      Ok(json!({ "columns": columns, "primary_key": schema.primary_key }))
    }

    Action::List => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'list'")))?;
      let opts = query_to_list_options(query)?;
      let response = state.crud.list(table, &opts).await?;
      serde_json::to_value(response).map_err(|e| GatewayError::Internal(anyhow::anyhow!("encode response: {e}")))
    }

    Action::Count => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'count'")))?;
      let opts = query_to_list_options(query)?;
      let response = state.crud.count(table, &opts).await?;
      serde_json::to_value(response).map_err(|e| GatewayError::Internal(anyhow::anyhow!("encode response: {e}")))
    }

    Action::Read => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'read'")))?;
      let id = record_id.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing id for 'read'")))?;
      let row = state.crud.read(table, &id).await?;
      serde_json::to_value(row).map_err(|e| GatewayError::Internal(anyhow::anyhow!("encode response: {e}")))
    }

    Action::Create => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'create'")))?;
      let fields = parse_row_body(content_type, body)?;
      let row = state.crud.create(table, &fields).await?;
      serde_json::to_value(row).map_err(|e| GatewayError::Internal(anyhow::anyhow!("encode response: {e}")))
    }

    Action::Update => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'update'")))?;
      let id = record_id.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing id for 'update'")))?;
      let fields = parse_row_body(content_type, body)?;
      let row = state.crud.update(table, &id, &fields).await?;
      serde_json::to_value(row).map_err(|e| GatewayError::Internal(anyhow::anyhow!("encode response: {e}")))
    }

    Action::Delete => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'delete'")))?;
      let id = record_id.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing id for 'delete'")))?;
      let response = state.crud.delete(table, &id).await?;
      serde_json::to_value(response).map_err(|e| GatewayError::Internal(anyhow::anyhow!("encode response: {e}")))
    }

    Action::BulkCreate => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'bulk_create'")))?;
      let items = parse_row_array_body(body)?;
      let response = state.crud.bulk_create(table, &items).await?;
      serde_json::to_value(response).map_err(|e| GatewayError::Internal(anyhow::anyhow!("encode response: {e}")))
    }

    Action::BulkDelete => {
      let table = table.ok_or_else(|| GatewayError::Internal(anyhow::anyhow!("missing table for 'bulk_delete'")))?;
      let ids = parse_bulk_delete_ids(body)?;
      let response = state.crud.bulk_delete(table, &ids).await?;
      serde_json::to_value(response).map_err(|e| GatewayError::Internal(anyhow::anyhow!("encode response: {e}")))
    }

    Action::OpenApi => openapi::build_document(state).await,

    Action::Login => {
      let fields = parse_row_body(content_type, body)?;
      let username = field_as_string(&fields, "username")?;
      let password = field_as_string(&fields, "password")?;
      let (token, expires_at, role) = state.auth.login(&username, &password).await?;
      Ok(json!({ "token": token, "expires_at": expires_at, "user": username, "role": role }))
    }
  };
}

fn query_to_list_options(query: &HashMap<String, String>) -> Result<ListOptions> {
  return Validator::list_options(
    query.get("fields").map(String::as_str),
    query.get("filter").map(String::as_str),
    query.get("sort").map(String::as_str),
    query.get("page").map(String::as_str),
    query.get("page_size").map(String::as_str),
  );
}

fn field_as_string(fields: &Row, name: &str) -> Result<String> {
  return match fields.get(name) {
    Some(Value::String(s)) => Ok(s.clone()),
    Some(other) => Ok(other.to_string()),
    None => Err(GatewayError::InvalidInput(format!("missing required field '{name}'"))),
  };
}

/// Decodes a single-record request body, dispatching on `Content-Type`
/// (§6: "form or JSON"). Form and multipart fields arrive as strings;
/// `BoundValue::from_json` and the dialect layer are responsible for any
/// further coercion against the column's declared type.
fn parse_row_body(content_type: &str, body: &[u8]) -> Result<Row> {
  let base = content_type.split(';').next().unwrap_or(content_type).trim();
  return match base {
    "application/json" | "" => {
      serde_json::from_slice(body).map_err(|e| GatewayError::InvalidInput(format!("invalid JSON body: {e}")))
    }
    "application/x-www-form-urlencoded" => parse_form_urlencoded(body),
    "multipart/form-data" => parse_multipart(content_type, body),
    other => Err(GatewayError::InvalidInput(format!("unsupported content type: '{other}'"))),
  };
}

fn parse_form_urlencoded(body: &[u8]) -> Result<Row> {
  let pairs: Vec<(String, String)> =
    serde_urlencoded::from_bytes(body).map_err(|e| GatewayError::InvalidInput(format!("invalid form body: {e}")))?;
  let mut row = Row::new();
  for (key, value) in pairs {
    row.insert(key, Value::String(value));
  }
  return Ok(row);
}

fn parse_multipart(content_type: &str, body: &[u8]) -> Result<Row> {
  let boundary = multipart_boundary(content_type)
    .ok_or_else(|| GatewayError::InvalidInput("multipart body missing boundary".to_string()))?;
  let delimiter = format!("--{boundary}");

  let mut row = Row::new();
  for part in split_multipart_parts(body, delimiter.as_bytes()) {
    if let Some((name, value)) = parse_multipart_part(part) {
      row.insert(name, Value::String(value));
    }
  }
  return Ok(row);
}

fn multipart_boundary(content_type: &str) -> Option<String> {
  for segment in content_type.split(';').skip(1) {
    let segment = segment.trim();
    if let Some(raw) = segment.strip_prefix("boundary=") {
      return Some(raw.trim_matches('"').to_string());
    }
  }
  return None;
}

/// Splits a multipart body on `--{boundary}` delimiters, dropping the
/// preamble before the first delimiter and the closing `--{boundary}--`.
fn split_multipart_parts<'a>(body: &'a [u8], delimiter: &[u8]) -> Vec<&'a [u8]> {
  let mut parts = Vec::new();
  let mut rest = body;
  while let Some(pos) = find_subslice(rest, delimiter) {
    rest = &rest[pos + delimiter.len()..];
    if rest.starts_with(b"--") {
      break;
    }
    let next = find_subslice(rest, delimiter).unwrap_or(rest.len());
    let chunk = &rest[..next];
    let chunk = chunk.strip_prefix(b"\r\n").unwrap_or(chunk);
    let chunk = chunk.strip_suffix(b"\r\n").unwrap_or(chunk);
    if !chunk.is_empty() {
      parts.push(chunk);
    }
    rest = &rest[next..];
  }
  return parts;
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
  if needle.is_empty() || haystack.len() < needle.len() {
    return None;
  }
  return (0..=haystack.len() - needle.len()).find(|&i| &haystack[i..i + needle.len()] == needle);
}

/// Splits one multipart section into its headers and content, then pulls
/// `name="..."` out of the `Content-Disposition` header. File content
/// (a `filename` attribute present) is skipped -- uploads are out of scope.
fn parse_multipart_part(part: &[u8]) -> Option<(String, String)> {
  let separator = b"\r\n\r\n";
  let split_at = find_subslice(part, separator)?;
  let header_block = std::str::from_utf8(&part[..split_at]).ok()?;
  let content = &part[split_at + separator.len()..];

  let disposition = header_block.lines().find(|l| l.to_ascii_lowercase().starts_with("content-disposition"))?;
  if disposition.to_ascii_lowercase().contains("filename=") {
    return None;
  }
  let name = extract_quoted_attribute(disposition, "name")?;
  let value = String::from_utf8_lossy(content).into_owned();
  return Some((name, value));
}

fn extract_quoted_attribute(header: &str, key: &str) -> Option<String> {
  let marker = format!("{key}=\"");
  let start = header.find(&marker)? + marker.len();
  let end = header[start..].find('"')? + start;
  return Some(header[start..end].to_string());
}

fn parse_row_array_body(body: &[u8]) -> Result<Vec<Row>> {
  return serde_json::from_slice(body).map_err(|e| GatewayError::InvalidInput(format!("invalid JSON array body: {e}")));
}

#[derive(serde::Deserialize)]
struct BulkDeleteBody {
  ids: Vec<Value>,
}

fn parse_bulk_delete_ids(body: &[u8]) -> Result<Vec<RecordId>> {
  let parsed: BulkDeleteBody =
    serde_json::from_slice(body).map_err(|e| GatewayError::InvalidInput(format!("invalid bulk_delete body: {e}")))?;
  return parsed.ids.iter().map(Validator::id_from_json).collect();
}

fn default_rate_limit_headers(state: &AppState) -> RateLimitHeaders {
  let cfg = &state.config.rate_limit;
  let now = chrono::Utc::now().timestamp();
  return RateLimitHeaders {
    limit: cfg.max_requests,
    remaining: cfg.max_requests,
    reset_at: now + cfg.window_seconds as i64,
    window: cfg.window_seconds,
  };
}

fn apply_rate_limit_headers(response: &mut Response, info: &RateLimitHeaders) {
  let headers = response.headers_mut();
  if let Ok(v) = info.limit.to_string().parse() {
    headers.insert("X-RateLimit-Limit", v);
  }
  if let Ok(v) = info.remaining.to_string().parse() {
    headers.insert("X-RateLimit-Remaining", v);
  }
  if let Ok(v) = info.reset_at.to_string().parse() {
    headers.insert("X-RateLimit-Reset", v);
  }
  if let Ok(v) = info.window.to_string().parse() {
    headers.insert("X-RateLimit-Window", v);
  }
}

fn apply_cache_headers(response: &mut Response, info: &CacheHeaders) {
  let headers = response.headers_mut();
  if let Ok(v) = info.hit.to_string().parse() {
    headers.insert("X-Cache-Hit", v);
  }
  if let Ok(v) = info.ttl.to_string().parse() {
    headers.insert("X-Cache-TTL", v);
  }
  if let Ok(v) = info.stored.to_string().parse() {
    headers.insert("X-Cache-Stored", v);
  }
}

#[allow(clippy::too_many_arguments)]
fn log_request(
  state: &AppState,
  method: &Method,
  query: &HashMap<String, String>,
  headers: &HeaderMap,
  action: &str,
  table: &Option<String>,
  username: &Option<String>,
  remote_ip: &str,
  status: u16,
  elapsed_ms: u64,
  request_body: &[u8],
  response_value: Option<&Value>,
) {
  if !state.logger.enabled() {
    return;
  }

  let record = crate::logging::LogRecord {
    timestamp: chrono::Utc::now(),
    level: crate::logging::LogLevel::from_status(status),
    method: method.to_string(),
    action: action.to_string(),
    table: table.clone(),
    remote_ip: remote_ip.to_string(),
    user: username.clone(),
    status,
    duration_ms: elapsed_ms,
    response_size: 0,
    headers: if state.config.logging.log_headers {
      Some(state.logger.redact(&headers_to_json(headers)))
    } else {
      None
    },
    query_params: if state.config.logging.log_query_params {
      Some(state.logger.redact(&crate::logging::query_params_to_json(query)))
    } else {
      None
    },
    request_body: if state.config.logging.log_body {
      body_to_json(&state.logger, request_body).map(|v| state.logger.redact(&v))
    } else {
      None
    },
    response_body: if state.config.logging.log_response_body {
      response_value.map(|v| state.logger.redact(v))
    } else {
      None
    },
    message: None,
  };

  if let Err(err) = state.logger.append(&record) {
    tracing::error!(error = %err, "failed to append request log");
  }
}

/// Parses the raw request body for logging purposes only; truncates first
/// so an oversized body never gets fully buffered into JSON just to log it.
/// Falls back to a plain string value when the body isn't valid JSON (e.g.
/// form-urlencoded or multipart), and is silently omitted when it's neither
/// valid JSON nor valid UTF-8.
fn body_to_json(logger: &crate::logging::RequestLogger, body: &[u8]) -> Option<Value> {
  if body.is_empty() {
    return None;
  }
  let text = std::str::from_utf8(body).ok()?;
  let truncated = logger.truncate_body(text);
  return match serde_json::from_str::<Value>(&truncated) {
    Ok(value) => Some(value),
    Err(_) => Some(Value::String(truncated)),
  };
}

fn headers_to_json(headers: &HeaderMap) -> Value {
  let mut map = serde_json::Map::new();
  for (name, value) in headers {
    if let Ok(v) = value.to_str() {
      map.insert(name.to_string(), Value::String(v.to_string()));
    }
  }
  return Value::Object(map);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn action_parses_known_strings_and_rejects_unknown() {
    assert!(Action::parse("list").is_ok());
    assert!(Action::parse("bulk_create").is_ok());
    assert!(Action::parse("drop_table").is_err());
  }

  #[test]
  fn rbac_category_mapping_matches_the_action_table() {
    assert_eq!(Action::List.rbac_category(), Some(RbacAction::List));
    assert_eq!(Action::Count.rbac_category(), Some(RbacAction::List));
    assert_eq!(Action::BulkCreate.rbac_category(), Some(RbacAction::Create));
    assert_eq!(Action::BulkDelete.rbac_category(), Some(RbacAction::Delete));
    assert_eq!(Action::Tables.rbac_category(), None);
    assert_eq!(Action::Login.rbac_category(), None);
  }

  #[test]
  fn parses_json_row_body() {
    let row = parse_row_body("application/json", br#"{"name":"ada","age":30}"#).unwrap();
    assert_eq!(row.get("name").unwrap(), "ada");
  }

  #[test]
  fn parses_form_urlencoded_row_body() {
    let row = parse_row_body("application/x-www-form-urlencoded", b"name=ada&age=30").unwrap();
    assert_eq!(row.get("name").unwrap(), "ada");
    assert_eq!(row.get("age").unwrap(), "30");
  }

  #[test]
  fn parses_multipart_row_body() {
    let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nada\r\n--XYZ--\r\n";
    let row = parse_row_body("multipart/form-data; boundary=XYZ", body).unwrap();
    assert_eq!(row.get("name").unwrap(), "ada");
  }

  #[test]
  fn multipart_skips_file_parts() {
    let body = b"--XYZ\r\nContent-Disposition: form-data; name=\"avatar\"; filename=\"a.png\"\r\n\r\nbinary\r\n--XYZ\r\nContent-Disposition: form-data; name=\"name\"\r\n\r\nada\r\n--XYZ--\r\n";
    let row = parse_row_body("multipart/form-data; boundary=XYZ", body).unwrap();
    assert!(row.get("avatar").is_none());
    assert_eq!(row.get("name").unwrap(), "ada");
  }

  #[test]
  fn body_to_json_parses_valid_json() {
    let config = crate::config::LoggingConfig::default();
    let logger = crate::logging::RequestLogger::new(config);
    let value = body_to_json(&logger, br#"{"name":"ada"}"#).unwrap();
    assert_eq!(value["name"], "ada");
  }

  #[test]
  fn body_to_json_falls_back_to_string_for_non_json() {
    let config = crate::config::LoggingConfig::default();
    let logger = crate::logging::RequestLogger::new(config);
    let value = body_to_json(&logger, b"name=ada&age=30").unwrap();
    assert_eq!(value, Value::String("name=ada&age=30".to_string()));
  }

  #[test]
  fn body_to_json_returns_none_for_empty_body() {
    let config = crate::config::LoggingConfig::default();
    let logger = crate::logging::RequestLogger::new(config);
    assert!(body_to_json(&logger, b"").is_none());
  }

  #[test]
  fn parses_bulk_create_array_body() {
    let items = parse_row_array_body(br#"[{"name":"A"},{"name":"B"}]"#).unwrap();
    assert_eq!(items.len(), 2);
  }

  #[test]
  fn parses_bulk_delete_ids_body() {
    let ids = parse_bulk_delete_ids(br#"{"ids":[1,2,"3"]}"#).unwrap();
    assert_eq!(ids.len(), 3);
  }
}
