//! crates/bookworm_core/src/credentials.rs
//!
//! Registration and password verification on top of a `CredentialStore` and a
//! swappable `PasswordScheme`.

use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

use crate::domain::{Subscription, User};
use crate::ports::{CredentialStore, PasswordScheme, PortError, SubscriptionStore};

pub const MIN_PASSWORD_LEN: usize = 6;

/// Hashed once at startup and verified against for unknown emails, so a
/// missing account costs the same hash work as a wrong password.
const DECOY_PASSWORD: &str = "bookworm-decoy-password";

#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("Please enter a valid email address.")]
    InvalidEmail,
    #[error("Password must be at least {} characters.", MIN_PASSWORD_LEN)]
    PasswordTooShort,
    #[error("Unable to register with that email.")]
    DuplicateEmail,
    #[error(transparent)]
    Port(#[from] PortError),
}

/// Lower-cases and trims an email address.
pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn validate_email(email: &str) -> Result<(), CredentialError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(CredentialError::InvalidEmail),
    }
}

#[derive(Clone)]
pub struct CredentialService {
    users: Arc<dyn CredentialStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    scheme: Arc<dyn PasswordScheme>,
    owner_emails: Vec<String>,
    decoy_hash: String,
}

impl CredentialService {
    pub fn new(
        users: Arc<dyn CredentialStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        scheme: Arc<dyn PasswordScheme>,
        owner_emails: &[String],
    ) -> Self {
        let decoy_hash = scheme.hash_password(DECOY_PASSWORD).unwrap_or_else(|e| {
            warn!("Failed to prepare the decoy password hash: {}", e);
            String::new()
        });
        Self {
            users,
            subscriptions,
            scheme,
            owner_emails: owner_emails.iter().map(|e| normalize_email(e)).collect(),
            decoy_hash,
        }
    }

    /// Creates an account and its default free subscription row.
    ///
    /// The two inserts are not atomic; a crash in between leaves a user with
    /// no subscription row, which reads the same as a free one.
    pub async fn register(&self, email: &str, password: &str) -> Result<User, CredentialError> {
        let email = normalize_email(email);
        validate_email(&email)?;
        if password.chars().count() < MIN_PASSWORD_LEN {
            return Err(CredentialError::PasswordTooShort);
        }

        let password_hash = self.scheme.hash_password(password)?;
        let is_owner = self.owner_emails.contains(&email);
        let user = match self.users.create_user(&email, &password_hash, is_owner).await {
            Ok(user) => user,
            Err(PortError::Conflict(_)) => return Err(CredentialError::DuplicateEmail),
            Err(e) => return Err(e.into()),
        };

        if let Err(e) = self
            .subscriptions
            .upsert_subscription(&Subscription::free(user.user_id, Utc::now()))
            .await
        {
            warn!("Failed to create default subscription for {}: {}", user.user_id, e);
        }

        info!("Registered user {}", user.user_id);
        Ok(user)
    }

    /// Returns the user when the password matches. Unknown emails and wrong
    /// passwords are indistinguishable to the caller.
    pub async fn verify(&self, email: &str, password: &str) -> Result<Option<User>, PortError> {
        let email = normalize_email(email);
        let credentials = match self.users.get_user_by_email(&email).await {
            Ok(credentials) => credentials,
            Err(PortError::NotFound(_)) => {
                self.scheme.verify_password(password, &self.decoy_hash);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if self.scheme.verify_password(password, &credentials.password_hash) {
            Ok(Some(credentials.user))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Plan, SubscriptionStatus};
    use crate::testing::{MemoryStore, PlainScheme};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts verifications so tests can see the hash work being done.
    #[derive(Default)]
    struct CountingScheme {
        verifications: AtomicUsize,
    }

    impl PasswordScheme for CountingScheme {
        fn hash_password(&self, password: &str) -> crate::ports::PortResult<String> {
            PlainScheme.hash_password(password)
        }

        fn verify_password(&self, password: &str, password_hash: &str) -> bool {
            self.verifications.fetch_add(1, Ordering::SeqCst);
            PlainScheme.verify_password(password, password_hash)
        }
    }

    fn service(store: &Arc<MemoryStore>, owners: &[String]) -> CredentialService {
        CredentialService::new(store.clone(), store.clone(), Arc::new(PlainScheme), owners)
    }

    #[tokio::test]
    async fn register_then_verify_exact_password_only() {
        let store = Arc::new(MemoryStore::default());
        let creds = service(&store, &[]);

        let user = creds.register("u@example.com", "secret1").await.unwrap();
        let found = creds.verify("u@example.com", "secret1").await.unwrap();
        assert_eq!(found.map(|u| u.user_id), Some(user.user_id));
        assert!(creds.verify("u@example.com", "secret2").await.unwrap().is_none());
        assert!(creds.verify("u@example.com", "secret").await.unwrap().is_none());
        assert!(creds.verify("nobody@example.com", "secret1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn plaintext_is_never_stored() {
        let store = Arc::new(MemoryStore::default());
        let creds = service(&store, &[]);
        creds.register("u@example.com", "secret1").await.unwrap();
        let stored = store.get_user_by_email("u@example.com").await.unwrap();
        assert_ne!(stored.password_hash, "secret1");
    }

    #[tokio::test]
    async fn duplicate_normalized_email_is_rejected() {
        let store = Arc::new(MemoryStore::default());
        let creds = service(&store, &[]);
        creds.register("u@example.com", "secret1").await.unwrap();
        let second = creds.register("  U@Example.COM ", "another1").await;
        assert!(matches!(second, Err(CredentialError::DuplicateEmail)));
    }

    #[tokio::test]
    async fn short_passwords_and_bad_emails_fail_before_hashing() {
        let store = Arc::new(MemoryStore::default());
        let creds = service(&store, &[]);
        assert!(matches!(
            creds.register("u@example.com", "12345").await,
            Err(CredentialError::PasswordTooShort)
        ));
        assert!(matches!(
            creds.register("not-an-email", "secret1").await,
            Err(CredentialError::InvalidEmail)
        ));
    }

    #[tokio::test]
    async fn registration_creates_free_subscription_and_owner_flag() {
        let store = Arc::new(MemoryStore::default());
        let creds = service(&store, &["Boss@Example.com".to_string()]);

        let boss = creds.register("boss@example.com", "secret1").await.unwrap();
        assert!(boss.is_owner);
        let sub = store.get_subscription(boss.user_id).await.unwrap().unwrap();
        assert_eq!(sub.plan, Plan::Free);
        assert_eq!(sub.status, SubscriptionStatus::Inactive);

        let regular = creds.register("u@example.com", "secret1").await.unwrap();
        assert!(!regular.is_owner);
    }

    #[tokio::test]
    async fn unknown_email_still_runs_a_password_check() {
        let store = Arc::new(MemoryStore::default());
        let scheme = Arc::new(CountingScheme::default());
        let creds = CredentialService::new(store.clone(), store.clone(), scheme.clone(), &[]);

        assert!(creds.verify("ghost@example.com", "secret1").await.unwrap().is_none());
        assert_eq!(scheme.verifications.load(Ordering::SeqCst), 1);

        // The decoy hash must never admit anyone.
        assert!(creds
            .verify("ghost@example.com", DECOY_PASSWORD)
            .await
            .unwrap()
            .is_none());
    }
}
