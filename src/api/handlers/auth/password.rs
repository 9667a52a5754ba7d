//! Secret hashing and verification using Argon2id.

use anyhow::{Result, anyhow};
use argon2::{
    Argon2, PasswordHasher, PasswordVerifier,
    password_hash::{PasswordHash, SaltString, rand_core::OsRng},
};

/// Hash a plaintext secret into an Argon2id PHC-format string.
pub(super) fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map_err(|err| anyhow!("failed to hash secret: {err}"))?;
    Ok(hash.to_string())
}

/// Verify a plaintext secret against a stored PHC-format hash.
///
/// Returns `Ok(false)` on mismatch; an error means the stored hash is
/// malformed, which is an infra problem rather than bad credentials.
pub(super) fn verify_secret(secret: &str, stored_hash: &str) -> Result<bool> {
    let parsed_hash = PasswordHash::new(stored_hash)
        .map_err(|err| anyhow!("invalid stored secret hash: {err}"))?;

    match Argon2::default().verify_password(secret.as_bytes(), &parsed_hash) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(err) => Err(anyhow!("secret verification error: {err}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn correct_secret_matches() {
        let hash = hash_secret("hunter22").expect("hashing should succeed");
        assert!(verify_secret("hunter22", &hash).expect("verify should succeed"));
    }

    #[test]
    fn wrong_secret_does_not_match() {
        let hash = hash_secret("hunter22").expect("hashing should succeed");
        assert!(!verify_secret("wrong-password", &hash).expect("verify should succeed"));
    }

    #[test]
    fn hashes_are_salted() {
        let first = hash_secret("hunter22").expect("hashing should succeed");
        let second = hash_secret("hunter22").expect("hashing should succeed");
        assert_ne!(first, second);
    }

    #[test]
    fn malformed_hash_is_an_error() {
        assert!(verify_secret("hunter22", "not-a-phc-string").is_err());
    }
}
