//! Argon2 hashing for account passwords.

use argon2::{
    password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use tracing::error;

#[derive(Debug, thiserror::Error)]
pub enum PasswordError {
    #[error("could not hash password: {0}")]
    Hash(password_hash::Error),
    /// The stored hash of an account is not a PHC string argon2 can read.
    #[error("stored password hash is malformed: {0}")]
    MalformedHash(password_hash::Error),
}

/// Salted PHC string stored as `users.password_hash`.
pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash error");
            PasswordError::Hash(e)
        })?;
    Ok(hash.to_string())
}

/// `Ok(false)` on a wrong password; `Err` only when the stored hash is unusable.
pub fn verify_password(plain: &str, stored: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(stored).map_err(|e| {
        error!(error = %e, "stored password hash unreadable");
        PasswordError::MalformedHash(e)
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_is_salted_phc_string() {
        let a = hash_password("analytical-engine").expect("hash");
        let b = hash_password("analytical-engine").expect("hash");
        assert_ne!(a, b);
        assert!(a.starts_with("$argon2"));
    }

    #[test]
    fn verify_distinguishes_passwords() {
        let hash = hash_password("analytical-engine").expect("hash");
        assert!(verify_password("analytical-engine", &hash).expect("verify"));
        assert!(!verify_password("difference-engine", &hash).expect("verify"));
    }

    #[test]
    fn unreadable_stored_hash_is_an_error() {
        assert!(matches!(
            verify_password("anything", "x"),
            Err(PasswordError::MalformedHash(_))
        ));
    }
}
