//! services/api/src/adapters/password.rs
//!
//! Argon2id implementation of the `PasswordScheme` port.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use bookworm_core::ports::{PasswordScheme, PortError, PortResult};
use tracing::error;

/// Hashes with the crate's default Argon2id parameters and a fresh salt per call.
/// The PHC string output carries the salt and parameters.
#[derive(Default, Clone)]
pub struct Argon2Scheme {
    argon2: Argon2<'static>,
}

impl PasswordScheme for Argon2Scheme {
    fn hash_password(&self, password: &str) -> PortResult<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(password.as_bytes(), &salt)
            .map(|hash| hash.to_string())
            .map_err(|e| {
                error!("Failed to hash password: {:?}", e);
                PortError::Unexpected("Failed to hash password".to_string())
            })
    }

    fn verify_password(&self, password: &str, password_hash: &str) -> bool {
        match PasswordHash::new(password_hash) {
            Ok(parsed) => self
                .argon2
                .verify_password(password.as_bytes(), &parsed)
                .is_ok(),
            Err(e) => {
                error!("Failed to parse password hash: {:?}", e);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashes_are_salted_phc_strings() {
        let scheme = Argon2Scheme::default();
        let first = scheme.hash_password("secret1").unwrap();
        let second = scheme.hash_password("secret1").unwrap();
        assert!(first.starts_with("$argon2id$"));
        assert_ne!(first, second);
        assert!(scheme.verify_password("secret1", &first));
        assert!(scheme.verify_password("secret1", &second));
        assert!(!scheme.verify_password("secret2", &first));
    }

    #[test]
    fn malformed_hash_never_verifies() {
        let scheme = Argon2Scheme::default();
        assert!(!scheme.verify_password("secret1", "not-a-phc-string"));
        assert!(!scheme.verify_password("secret1", ""));
    }
}
