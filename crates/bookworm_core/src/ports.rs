//! crates/bookworm_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::{
    AnalyticsEvent, AuthSession, CanonDocument, Message, MessageRole, NewCanonDocument, Plan,
    Project, Subscriber, Subscription, UsageStats, User, UserCredentials,
};
use crate::prompt::PromptMessage;

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    /// A failure reported by (or while talking to) a third-party provider.
    #[error("{kind}: {message}")]
    Upstream { kind: String, message: String },
}

impl PortError {
    pub fn upstream(kind: impl Into<String>, message: impl Into<String>) -> Self {
        PortError::Upstream {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// A short class name used when the error is shown to a chat user.
    pub fn kind(&self) -> &str {
        match self {
            PortError::NotFound(_) => "NotFound",
            PortError::Conflict(_) => "Conflict",
            PortError::Unexpected(_) => "Unexpected",
            PortError::Upstream { kind, .. } => kind,
        }
    }

    /// The error text without the class prefix.
    pub fn detail(&self) -> String {
        match self {
            PortError::Upstream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Storage Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Inserts a user. A taken email yields `PortError::Conflict`.
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        is_owner: bool,
    ) -> PortResult<User>;

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials>;

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User>;
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn create_auth_session(&self, session: &AuthSession) -> PortResult<()>;

    async fn get_auth_session(&self, token: &str) -> PortResult<Option<AuthSession>>;

    async fn touch_auth_session(&self, token: &str, seen_at: DateTime<Utc>) -> PortResult<()>;

    /// Returns `false` when no row matched the token.
    async fn set_session_owner(&self, token: &str, is_owner: bool) -> PortResult<bool>;

    async fn delete_auth_session(&self, token: &str) -> PortResult<()>;

    /// Deletes every session whose expiry is at or before `now`.
    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<u64>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn get_subscription(&self, user_id: Uuid) -> PortResult<Option<Subscription>>;

    /// Insert-or-update keyed by user id.
    async fn upsert_subscription(&self, subscription: &Subscription) -> PortResult<()>;

    async fn find_user_by_customer_id(&self, customer_id: &str) -> PortResult<Option<Uuid>>;

    async fn list_subscribers(&self, plan: Option<Plan>) -> PortResult<Vec<Subscriber>>;

    /// Records a provider event id. Returns `false` if it was already recorded.
    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
        received_at: DateTime<Utc>,
    ) -> PortResult<bool>;

    async fn release_webhook_event(&self, event_id: &str) -> PortResult<()>;

    /// Forgets claims received before `cutoff`. Returns how many were removed.
    async fn prune_webhook_events(&self, cutoff: DateTime<Utc>) -> PortResult<u64>;
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn create_project(
        &self,
        owner_id: Option<Uuid>,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<Project>;

    async fn get_project(&self, project_id: i64) -> PortResult<Project>;

    /// Projects owned by the user plus global ones, newest first.
    async fn list_projects(&self, user_id: Uuid) -> PortResult<Vec<Project>>;

    async fn create_canon_document(&self, doc: NewCanonDocument) -> PortResult<CanonDocument>;

    /// Documents visible to the user (own or ownerless), newest first.
    async fn list_canon_documents(
        &self,
        user_id: Uuid,
        project_id: Option<i64>,
        limit: Option<i64>,
    ) -> PortResult<Vec<CanonDocument>>;
}

#[async_trait]
pub trait HistoryStore: Send + Sync {
    async fn append_message(
        &self,
        user_id: Uuid,
        tab: &str,
        role: MessageRole,
        content: &str,
    ) -> PortResult<()>;

    /// The most recent messages for the user and tab, newest first.
    async fn recent_messages(&self, user_id: Uuid, tab: &str, limit: i64)
        -> PortResult<Vec<Message>>;
}

#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn record_event(
        &self,
        user_id: Option<Uuid>,
        event_type: &str,
        metadata: &serde_json::Value,
    ) -> PortResult<()>;

    async fn recent_events(&self, limit: i64) -> PortResult<Vec<AnalyticsEvent>>;

    async fn usage_stats(&self) -> PortResult<UsageStats>;
}

/// Everything the web layer needs from persistence, behind one handle.
pub trait DatabaseService:
    CredentialStore + SessionStore + SubscriptionStore + ContentStore + HistoryStore + AnalyticsStore
{
}

impl<T> DatabaseService for T where
    T: CredentialStore
        + SessionStore
        + SubscriptionStore
        + ContentStore
        + HistoryStore
        + AnalyticsStore
{
}

//=========================================================================================
// Strategy and Provider Ports (Traits)
//=========================================================================================

/// A password hashing strategy. Implementations embed their salt in the hash.
pub trait PasswordScheme: Send + Sync {
    fn hash_password(&self, password: &str) -> PortResult<String>;

    /// Must compare in constant time. Malformed hashes verify as `false`.
    fn verify_password(&self, password: &str, password_hash: &str) -> bool;
}

#[async_trait]
pub trait TextGenerationService: Send + Sync {
    /// Runs one chat completion over the ordered messages.
    async fn complete(&self, messages: &[PromptMessage]) -> PortResult<String>;
}

/// Parameters for one image generation call.
#[derive(Debug, Clone)]
pub struct ImageRequest {
    pub prompt: String,
    pub size: String,
    pub quality: String,
    pub n: u8,
}

#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    /// Returns the URLs of the generated images.
    async fn generate_images(&self, request: &ImageRequest) -> PortResult<Vec<String>>;
}

/// Parameters for a hosted checkout page.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub user_id: Uuid,
    pub email: String,
    pub plan: Plan,
    pub price_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutSession {
    pub id: String,
    pub url: String,
}

#[async_trait]
pub trait BillingService: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest)
        -> PortResult<CheckoutSession>;
}
