use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::rbac::Action;

/// The closed error taxonomy from the error handling design: every pipeline
/// stage fails fast with one of these, and this is the only type the router
/// converts to an HTTP response.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
  #[error("invalid input: {0}")]
  InvalidInput(String),

  #[error("authentication required")]
  AuthRequired,

  #[error("invalid credentials")]
  AuthInvalid,

  #[error("forbidden: {action:?} on {table}")]
  Forbidden { table: String, action: Action },

  #[error("not found: {0}")]
  NotFound(String),

  #[error("method not allowed")]
  MethodNotAllowed,

  #[error("rate limited")]
  RateLimited {
    retry_after: i64,
    reset_at: i64,
    limit: u32,
    window: u64,
  },

  #[error("conflict or integrity violation: {0}")]
  ConflictOrIntegrity(String),

  #[error("upstream failure: {0}")]
  UpstreamFailure(String),

  #[error("request timed out")]
  Timeout,

  #[error("internal error")]
  Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
  error: &'static str,
  #[serde(skip_serializing_if = "Option::is_none")]
  message: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  details: Option<serde_json::Value>,
  #[serde(skip_serializing_if = "Option::is_none")]
  retry_after: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  reset_at: Option<i64>,
  #[serde(skip_serializing_if = "Option::is_none")]
  limit: Option<u32>,
  #[serde(skip_serializing_if = "Option::is_none")]
  window: Option<u64>,
}

impl GatewayError {
  pub fn kind(&self) -> &'static str {
    return match self {
      Self::InvalidInput(_) => "InvalidInput",
      Self::AuthRequired => "AuthRequired",
      Self::AuthInvalid => "AuthInvalid",
      Self::Forbidden { .. } => "Forbidden",
      Self::NotFound(_) => "NotFound",
      Self::MethodNotAllowed => "MethodNotAllowed",
      Self::RateLimited { .. } => "RateLimited",
      Self::ConflictOrIntegrity(_) => "ConflictOrIntegrity",
      Self::UpstreamFailure(_) => "UpstreamFailure",
      Self::Timeout => "Timeout",
      Self::Internal(_) => "Internal",
    };
  }

  pub fn status(&self) -> StatusCode {
    return match self {
      Self::InvalidInput(_) => StatusCode::BAD_REQUEST,
      Self::AuthRequired | Self::AuthInvalid => StatusCode::UNAUTHORIZED,
      Self::Forbidden { .. } => StatusCode::FORBIDDEN,
      Self::NotFound(_) => StatusCode::NOT_FOUND,
      Self::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
      Self::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
      Self::ConflictOrIntegrity(_) => StatusCode::CONFLICT,
      Self::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
      Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
      Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
  }
}

impl IntoResponse for GatewayError {
  fn into_response(self) -> Response {
    let status = self.status();

    // Non-debug responses never carry driver messages or stack traces; the
    // full error is written to the log by the caller before this is built.
    let message = match &self {
      Self::InvalidInput(m) => Some(m.clone()),
      Self::ConflictOrIntegrity(m) => Some(m.clone()),
      Self::NotFound(m) => Some(m.clone()),
      _ => None,
    };

    // RateLimited's body carries the same retry/limit fields as its
    // headers (§4.6): clients parsing only the JSON body still see them.
    let (retry_after, reset_at, limit, window) = match &self {
      Self::RateLimited {
        retry_after,
        reset_at,
        limit,
        window,
      } => (Some(*retry_after), Some(*reset_at), Some(*limit), Some(*window)),
      _ => (None, None, None, None),
    };

    let mut response = (
      status,
      Json(ErrorBody {
        error: self.kind(),
        message,
        details: None,
        retry_after,
        reset_at,
        limit,
        window,
      }),
    )
      .into_response();

    if let Self::RateLimited {
      retry_after,
      reset_at,
      limit,
      window,
    } = &self
    {
      let headers = response.headers_mut();
      headers.insert("Retry-After", (*retry_after).max(0).to_string().parse().unwrap());
      headers.insert("X-RateLimit-Limit", limit.to_string().parse().unwrap());
      headers.insert("X-RateLimit-Remaining", "0".parse().unwrap());
      headers.insert("X-RateLimit-Reset", reset_at.to_string().parse().unwrap());
      headers.insert("X-RateLimit-Window", window.to_string().parse().unwrap());
    }

    return response;
  }
}

pub type Result<T> = std::result::Result<T, GatewayError>;

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn rate_limited_carries_retry_fields_in_both_body_and_headers() {
    let err = GatewayError::RateLimited {
      retry_after: 12,
      reset_at: 1_700_000_012,
      limit: 100,
      window: 60,
    };
    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("Retry-After").unwrap(), "12");

    let body = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(value["error"], "RateLimited");
    assert_eq!(value["retry_after"], 12);
    assert_eq!(value["reset_at"], 1_700_000_012);
    assert_eq!(value["limit"], 100);
    assert_eq!(value["window"], 60);
  }

  #[test]
  fn not_found_surfaces_its_message_but_no_rate_limit_fields() {
    let err = GatewayError::NotFound("users/42".to_string());
    let response = err.into_response();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
  }
}
