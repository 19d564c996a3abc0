mod jwt;
mod password;
mod user;

pub use jwt::JwtHelper;
pub use password::{hash_password, verify_password};
pub use user::{DbUser, USER_TABLE};

use std::collections::HashMap;

use axum::http::HeaderMap;
use base64::Engine;

use crate::config::{AuthConfig, AuthMethodConfig};
use crate::error::{GatewayError, Result};
use crate::model::{AuthMethod, Principal};

/// Resolves `(credentials, configured-method) → Principal | error` (§4.4).
/// Holds everything needed to validate each of the three supported carriers;
/// which one is actually consulted is fixed by `config.method` at startup,
/// not chosen per-request.
pub struct Authenticator {
  config: AuthConfig,
  jwt: Option<JwtHelper>,
  pool: sqlx::AnyPool,
}

impl Authenticator {
  pub fn new(config: AuthConfig, pool: sqlx::AnyPool) -> Self {
    let jwt = config.jwt_secret.as_ref().map(|secret| {
      JwtHelper::new(
        secret,
        config.jwt_issuer.clone(),
        config.jwt_audience.clone(),
        config.jwt_expiration,
      )
    });
    return Self { config, jwt, pool };
  }

  pub fn enabled(&self) -> bool {
    return self.config.enabled;
  }

  pub fn anonymous(&self) -> Principal {
    return Principal::anonymous(self.config.anonymous_role());
  }

  /// Runs once per request when `authEnabled=true`. Returns `AuthRequired`
  /// when no credential of the configured kind is present at all, and
  /// `AuthInvalid` when one is present but fails to validate -- Router maps
  /// both to 401 but the distinction matters for logging (§7).
  pub async fn authenticate(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> Result<Principal> {
    if !self.config.enabled {
      return Ok(self.anonymous());
    }

    return match self.config.method {
      Some(AuthMethodConfig::ApiKey) => self.authenticate_api_key(headers, query).await,
      Some(AuthMethodConfig::Basic) => self.authenticate_basic(headers).await,
      Some(AuthMethodConfig::Jwt) => self.authenticate_jwt(headers),
      Some(AuthMethodConfig::Oauth) => {
        // OAuth provisioning is a non-goal of the core pipeline (§1); the
        // plugin/hook manager that would carry it is an external
        // collaborator here.
        Err(GatewayError::Internal(anyhow::anyhow!(
          "oauth authentication is not implemented by the core pipeline"
        )))
      }
      None => Err(GatewayError::AuthRequired),
    };
  }

  async fn authenticate_api_key(&self, headers: &HeaderMap, query: &HashMap<String, String>) -> Result<Principal> {
    let Some(key) = extract_api_key(headers, query) else {
      return Err(GatewayError::AuthRequired);
    };

    if self.config.api_keys.iter().any(|k| k == &key) {
      return Ok(Principal {
        username: key,
        role: self.config.api_key_role.clone(),
        auth_method: AuthMethod::ApiKey,
      });
    }

    if self.config.use_database_auth {
      if let Some(user) = user::find_by_api_key(&self.pool, &key).await? {
        return Ok(Principal {
          username: user.username,
          role: user.role,
          auth_method: AuthMethod::ApiKey,
        });
      }
    }

    return Err(GatewayError::AuthInvalid);
  }

  async fn authenticate_basic(&self, headers: &HeaderMap) -> Result<Principal> {
    let Some((username, password)) = extract_basic(headers) else {
      return Err(GatewayError::AuthRequired);
    };

    if self.config.use_database_auth {
      let Some(user) = user::find_by_username(&self.pool, &username).await? else {
        return Err(GatewayError::AuthInvalid);
      };
      password::verify_password(&user.password_hash, &password)?;
      return Ok(Principal {
        username: user.username,
        role: user.role,
        auth_method: AuthMethod::Basic,
      });
    }

    let Some(expected) = self.config.basic_users.get(&username) else {
      return Err(GatewayError::AuthInvalid);
    };
    if expected != &password {
      return Err(GatewayError::AuthInvalid);
    }
    let role = self
      .config
      .user_roles
      .get(&username)
      .cloned()
      .unwrap_or_else(|| self.config.api_key_role.clone());
    return Ok(Principal {
      username,
      role,
      auth_method: AuthMethod::Basic,
    });
  }

  fn authenticate_jwt(&self, headers: &HeaderMap) -> Result<Principal> {
    let Some(token) = extract_bearer(headers) else {
      return Err(GatewayError::AuthRequired);
    };
    let Some(jwt) = &self.jwt else {
      return Err(GatewayError::Internal(anyhow::anyhow!(
        "jwt auth configured without jwt_secret"
      )));
    };
    let claims = jwt.decode(&token)?;
    return Ok(Principal {
      username: claims.sub,
      role: claims.role,
      auth_method: AuthMethod::Jwt,
    });
  }

  /// The `login` action: always basic-equivalent credentials, regardless of
  /// the configured `authMethod`, producing a JWT (§4.4, §6).
  pub async fn login(&self, username: &str, password: &str) -> Result<(String, i64, String)> {
    let Some(jwt) = &self.jwt else {
      return Err(GatewayError::Internal(anyhow::anyhow!(
        "login requires jwt_secret to be configured"
      )));
    };

    let role = if self.config.use_database_auth {
      let user = user::find_by_username(&self.pool, username)
        .await?
        .ok_or(GatewayError::AuthInvalid)?;
      password::verify_password(&user.password_hash, password)?;
      user.role
    } else {
      let expected = self
        .config
        .basic_users
        .get(username)
        .ok_or(GatewayError::AuthInvalid)?;
      if expected != password {
        return Err(GatewayError::AuthInvalid);
      }
      self
        .config
        .user_roles
        .get(username)
        .cloned()
        .unwrap_or_else(|| self.config.api_key_role.clone())
    };

    let (token, expires_at) = jwt.issue(username, &role)?;
    return Ok((token, expires_at, role));
  }

  /// Identifies the rate-limit bucket for a request, honoring
  /// `X-Forwarded-For`/`X-Real-IP` only when configured to trust them
  /// (§4.6). Precedence: authenticated username, then hashed API key, then
  /// client IP.
  pub fn rate_limit_identifier(
    &self,
    principal: Option<&Principal>,
    headers: &HeaderMap,
    query: &HashMap<String, String>,
    remote_addr: &str,
  ) -> String {
    if let Some(principal) = principal {
      if principal.auth_method != AuthMethod::Anonymous {
        return format!("user:{}", principal.username);
      }
    }

    if let Some(key) = extract_api_key(headers, query) {
      return format!("apikey:{}", hash_api_key(&key));
    }

    let ip = if self.config.trust_forwarded_headers {
      forwarded_ip(headers).unwrap_or_else(|| remote_addr.to_string())
    } else {
      remote_addr.to_string()
    };
    return format!("ip:{ip}");
  }
}

pub(crate) fn extract_api_key(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<String> {
  if let Some(value) = headers.get("X-API-Key").and_then(|v| v.to_str().ok()) {
    return Some(value.to_string());
  }
  return query.get("api_key").cloned();
}

fn extract_basic(headers: &HeaderMap) -> Option<(String, String)> {
  let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
  let encoded = value.strip_prefix("Basic ")?;
  let decoded = base64::engine::general_purpose::STANDARD.decode(encoded).ok()?;
  let decoded = String::from_utf8(decoded).ok()?;
  let (user, pass) = decoded.split_once(':')?;
  return Some((user.to_string(), pass.to_string()));
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
  let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
  return value.strip_prefix("Bearer ").map(str::to_string);
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
  if let Some(v) = headers.get("X-Forwarded-For").and_then(|v| v.to_str().ok()) {
    if let Some(first) = v.split(',').next() {
      return Some(first.trim().to_string());
    }
  }
  return headers
    .get("X-Real-IP")
    .and_then(|v| v.to_str().ok())
    .map(str::to_string);
}

pub fn hash_api_key(key: &str) -> String {
  use sha2::{Digest, Sha256};
  let digest = Sha256::digest(key.as_bytes());
  return format!("{digest:x}");
}

#[cfg(test)]
mod tests {
  use super::*;
  use axum::http::HeaderValue;

  fn headers_with(name: &str, value: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
      axum::http::HeaderName::from_bytes(name.as_bytes()).unwrap(),
      HeaderValue::from_str(value).unwrap(),
    );
    return headers;
  }

  #[test]
  fn extracts_api_key_from_header_before_query() {
    let headers = headers_with("X-API-Key", "from-header");
    let mut query = HashMap::new();
    query.insert("api_key".to_string(), "from-query".to_string());
    assert_eq!(extract_api_key(&headers, &query).unwrap(), "from-header");
  }

  #[test]
  fn extracts_basic_credentials() {
    let encoded = base64::engine::general_purpose::STANDARD.encode("john:secret");
    let headers = headers_with("Authorization", &format!("Basic {encoded}"));
    let (user, pass) = extract_basic(&headers).unwrap();
    assert_eq!(user, "john");
    assert_eq!(pass, "secret");
  }

  #[test]
  fn extracts_bearer_token() {
    let headers = headers_with("Authorization", "Bearer abc.def.ghi");
    assert_eq!(extract_bearer(&headers).unwrap(), "abc.def.ghi");
  }

  #[test]
  fn forwarded_for_takes_the_first_hop() {
    let headers = headers_with("X-Forwarded-For", "203.0.113.5, 10.0.0.1");
    assert_eq!(forwarded_ip(&headers).unwrap(), "203.0.113.5");
  }
}
