//! crates/bookworm_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format,
//! apart from the string tags used on the wire for plans, statuses and roles.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//=========================================================================================
// Accounts and Sessions
//=========================================================================================

// Represents a user - used throughout app
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub is_owner: bool,
    pub created_at: DateTime<Utc>,
}

// Only used internally for login/signup - contains sensitive data
#[derive(Debug, Clone)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

/// A browser login session (auth cookie).
#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user_id: Uuid,
    pub is_owner: bool,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub last_seen_at: Option<DateTime<Utc>>,
}

impl AuthSession {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// The caller behind a resolved session token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Uuid,
    pub email: String,
    /// Session elevation or the persistent user flag.
    pub is_owner: bool,
    pub account_created_at: DateTime<Utc>,
}

//=========================================================================================
// Subscriptions
//=========================================================================================

/// Internal plan tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Basic,
    Pro,
    Patron,
    /// A paid plan whose price id is not in the lookup table.
    Paid,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Pro => "pro",
            Plan::Patron => "patron",
            Plan::Paid => "paid",
        }
    }

    /// Parses a stored or user-supplied tag. Unknown tags yield `None`.
    pub fn parse(tag: &str) -> Option<Self> {
        match tag.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Plan::Free),
            "basic" => Some(Plan::Basic),
            "pro" => Some(Plan::Pro),
            "patron" => Some(Plan::Patron),
            "paid" => Some(Plan::Paid),
            _ => None,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Trialing,
    Canceled,
    Inactive,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Canceled => "canceled",
            SubscriptionStatus::Inactive => "inactive",
        }
    }

    /// Maps a provider status onto the local set. Anything that is not
    /// clearly paying or cancelled (`past_due`, `incomplete`, ...) is inactive.
    pub fn from_provider(status: &str) -> Self {
        match status.trim().to_ascii_lowercase().as_str() {
            "active" => SubscriptionStatus::Active,
            "trialing" => SubscriptionStatus::Trialing,
            "canceled" | "cancelled" | "incomplete_expired" => SubscriptionStatus::Canceled,
            _ => SubscriptionStatus::Inactive,
        }
    }

    pub fn grants_access(&self) -> bool {
        matches!(self, SubscriptionStatus::Active | SubscriptionStatus::Trialing)
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One row per user; written only by the subscription synchronizer.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    pub user_id: Uuid,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// The row inserted at registration.
    pub fn free(user_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            user_id,
            plan: Plan::Free,
            status: SubscriptionStatus::Inactive,
            customer_id: None,
            subscription_id: None,
            current_period_end: None,
            updated_at: now,
        }
    }
}

/// A subscription row joined with its user's email, for admin listings.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub email: String,
    pub subscription: Subscription,
}

//=========================================================================================
// Projects, Canon and History
//=========================================================================================

/// A named grouping of canon documents. `owner_id == None` means global.
#[derive(Debug, Clone)]
pub struct Project {
    pub id: i64,
    pub owner_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn is_visible_to(&self, user_id: Uuid) -> bool {
        self.owner_id.map_or(true, |owner| owner == user_id)
    }
}

pub const DEFAULT_CANON_STATE: &str = "LOCKED_CANON";
pub const DEFAULT_CANON_SOURCE: &str = "manual-import";

/// A stored text passage used as authoritative generation context.
#[derive(Debug, Clone)]
pub struct CanonDocument {
    pub id: i64,
    pub project_id: Option<i64>,
    pub owner_id: Option<Uuid>,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub canon_state: String,
    pub source: String,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a canon document.
#[derive(Debug, Clone)]
pub struct NewCanonDocument {
    pub project_id: Option<i64>,
    pub owner_id: Option<Uuid>,
    pub title: String,
    pub body: String,
    pub tags: Vec<String>,
    pub canon_state: String,
    pub source: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }

    pub fn parse(role: &str) -> Option<Self> {
        match role {
            "user" => Some(MessageRole::User),
            "assistant" => Some(MessageRole::Assistant),
            _ => None,
        }
    }
}

/// A single turn of chat history, scoped to a user and a tab.
#[derive(Debug, Clone)]
pub struct Message {
    pub id: i64,
    pub user_id: Uuid,
    pub tab: String,
    pub role: MessageRole,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Append-only usage record.
#[derive(Debug, Clone)]
pub struct AnalyticsEvent {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// Aggregate numbers for the admin dashboard.
#[derive(Debug, Clone, Default)]
pub struct UsageStats {
    pub total_users: i64,
    pub active_subscriptions: i64,
    pub events_by_type: Vec<(String, i64)>,
}
