use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, Result};

/// Claims minted by the `login` action and validated on every `Bearer`
/// request. Grounded on the reference's `JwtHelper`/`AuthTokenClaims` shape,
/// but over a single HMAC secret and `Algorithm::HS256` rather than the
/// reference's default `EdDSA` PEM keypair -- the functional spec is
/// explicit that JWTs are HS256-over-shared-secret (§6), so the PEM-keypair
/// machinery isn't carried forward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
  pub sub: String,
  pub role: String,
  pub iat: i64,
  pub exp: i64,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub iss: Option<String>,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub aud: Option<String>,
}

/// Encodes and validates JWTs over a single shared secret. Signature,
/// expiration, issuer and audience are all checked by `jsonwebtoken`'s
/// `Validation`; the `role` claim is read straight off the decoded claims,
/// no DB lookup is performed for validation (§4.4).
pub struct JwtHelper {
  encoding_key: EncodingKey,
  decoding_key: DecodingKey,
  header: Header,
  validation: Validation,
  issuer: Option<String>,
  audience: Option<String>,
  expiration_seconds: i64,
}

impl JwtHelper {
  pub fn new(
    secret: &str,
    issuer: Option<String>,
    audience: Option<String>,
    expiration_seconds: i64,
  ) -> Self {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    if let Some(iss) = &issuer {
      validation.set_issuer(&[iss]);
    }
    if let Some(aud) = &audience {
      validation.set_audience(&[aud]);
    }

    return Self {
      encoding_key: EncodingKey::from_secret(secret.as_bytes()),
      decoding_key: DecodingKey::from_secret(secret.as_bytes()),
      header: Header::new(Algorithm::HS256),
      validation,
      issuer,
      audience,
      expiration_seconds,
    };
  }

  pub fn issue(&self, username: &str, role: &str) -> Result<(String, i64)> {
    let now = chrono::Utc::now().timestamp();
    let exp = now + self.expiration_seconds;
    let claims = Claims {
      sub: username.to_string(),
      role: role.to_string(),
      iat: now,
      exp,
      iss: self.issuer.clone(),
      aud: self.audience.clone(),
    };
    let token = jsonwebtoken::encode(&self.header, &claims, &self.encoding_key)
      .map_err(|e| GatewayError::Internal(e.into()))?;
    return Ok((token, exp));
  }

  pub fn decode(&self, token: &str) -> Result<Claims> {
    let data = jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
      .map_err(|_| GatewayError::AuthInvalid)?;
    return Ok(data.claims);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_a_token() {
    let helper = JwtHelper::new("a-secret-at-least-32-bytes-long!", None, None, 3600);
    let (token, exp) = helper.issue("john", "readonly").unwrap();
    let claims = helper.decode(&token).unwrap();
    assert_eq!(claims.sub, "john");
    assert_eq!(claims.role, "readonly");
    assert_eq!(claims.exp, exp);
  }

  #[test]
  fn rejects_token_signed_with_a_different_secret() {
    let issuer = JwtHelper::new("secret-one-at-least-32-bytes-xx", None, None, 3600);
    let verifier = JwtHelper::new("secret-two-at-least-32-bytes-xx", None, None, 3600);
    let (token, _) = issuer.issue("john", "readonly").unwrap();
    assert!(verifier.decode(&token).is_err());
  }

  #[test]
  fn rejects_issuer_or_audience_mismatch() {
    let issuer = JwtHelper::new(
      "a-secret-at-least-32-bytes-long!",
      Some("gateway".to_string()),
      Some("clients".to_string()),
      3600,
    );
    let (token, _) = issuer.issue("john", "readonly").unwrap();

    let wrong_audience = JwtHelper::new(
      "a-secret-at-least-32-bytes-long!",
      Some("gateway".to_string()),
      Some("other".to_string()),
      3600,
    );
    assert!(wrong_audience.decode(&token).is_err());
  }
}
