use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};

use crate::error::{GatewayError, Result};

/// Grounded on the reference's `auth/password.rs`: `Argon2id` via the
/// `argon2`/`password-hash` facade, hash stored as a self-describing PHC
/// string so the parameters travel with the hash.
pub fn hash_password(password: &str) -> Result<String> {
  let salt = SaltString::generate(&mut OsRng);
  return Argon2::default()
    .hash_password(password.as_bytes(), &salt)
    .map(|hash| hash.to_string())
    .map_err(|e| GatewayError::Internal(anyhow::anyhow!("password hash failed: {e}")));
}

pub fn verify_password(password_hash: &str, candidate: &str) -> Result<()> {
  let parsed = PasswordHash::new(password_hash)
    .map_err(|e| GatewayError::Internal(anyhow::anyhow!("stored hash is malformed: {e}")))?;

  return Argon2::default()
    .verify_password(candidate.as_bytes(), &parsed)
    .map_err(|_| GatewayError::AuthInvalid);
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn round_trips_a_password() {
    let hash = hash_password("correct horse battery staple").unwrap();
    assert!(verify_password(&hash, "correct horse battery staple").is_ok());
  }

  #[test]
  fn rejects_wrong_password() {
    let hash = hash_password("correct horse battery staple").unwrap();
    assert!(verify_password(&hash, "wrong").is_err());
  }
}
