//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the storage ports from the `core` crate. It handles all interactions
//! with the embedded SQLite database using `sqlx`.

use async_trait::async_trait;
use bookworm_core::domain::{
    AnalyticsEvent, AuthSession, CanonDocument, Message, MessageRole, NewCanonDocument, Plan,
    Project, Subscriber, Subscription, SubscriptionStatus, UsageStats, User, UserCredentials,
};
use bookworm_core::ports::{
    AnalyticsStore, ContentStore, CredentialStore, HistoryStore, PortError, PortResult,
    SessionStore, SubscriptionStore,
};
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements every storage port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: SqlitePool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

fn unexpected(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct UserRecord {
    user_id: Uuid,
    email: String,
    password_hash: String,
    is_owner: bool,
    created_at: DateTime<Utc>,
}
impl UserRecord {
    fn to_domain(self) -> UserCredentials {
        UserCredentials {
            user: User {
                user_id: self.user_id,
                email: self.email,
                is_owner: self.is_owner,
                created_at: self.created_at,
            },
            password_hash: self.password_hash,
        }
    }
}

#[derive(FromRow)]
struct AuthSessionRecord {
    token: String,
    user_id: Uuid,
    is_owner: bool,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    last_seen_at: Option<DateTime<Utc>>,
}
impl AuthSessionRecord {
    fn to_domain(self) -> AuthSession {
        AuthSession {
            token: self.token,
            user_id: self.user_id,
            is_owner: self.is_owner,
            created_at: self.created_at,
            expires_at: self.expires_at,
            last_seen_at: self.last_seen_at,
        }
    }
}

#[derive(FromRow)]
struct SubscriptionRecord {
    user_id: Uuid,
    plan: String,
    status: String,
    customer_id: Option<String>,
    subscription_id: Option<String>,
    current_period_end: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}
impl SubscriptionRecord {
    fn to_domain(self) -> Subscription {
        Subscription {
            user_id: self.user_id,
            plan: Plan::parse(&self.plan).unwrap_or(Plan::Free),
            status: SubscriptionStatus::from_provider(&self.status),
            customer_id: self.customer_id,
            subscription_id: self.subscription_id,
            current_period_end: self.current_period_end,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct SubscriberRecord {
    email: String,
    #[sqlx(flatten)]
    subscription: SubscriptionRecord,
}

#[derive(FromRow)]
struct ProjectRecord {
    id: i64,
    owner_id: Option<Uuid>,
    name: String,
    description: Option<String>,
    created_at: DateTime<Utc>,
}
impl ProjectRecord {
    fn to_domain(self) -> Project {
        Project {
            id: self.id,
            owner_id: self.owner_id,
            name: self.name,
            description: self.description,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct CanonDocumentRecord {
    id: i64,
    project_id: Option<i64>,
    owner_id: Option<Uuid>,
    title: String,
    body: String,
    tags: String,
    canon_state: String,
    source: String,
    created_at: DateTime<Utc>,
}
impl CanonDocumentRecord {
    fn to_domain(self) -> CanonDocument {
        CanonDocument {
            id: self.id,
            project_id: self.project_id,
            owner_id: self.owner_id,
            title: self.title,
            body: self.body,
            // Tags are a JSON array; a hand-edited row degrades to no tags.
            tags: serde_json::from_str(&self.tags).unwrap_or_default(),
            canon_state: self.canon_state,
            source: self.source,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct MessageRecord {
    id: i64,
    user_id: Uuid,
    tab: String,
    role: String,
    content: String,
    created_at: DateTime<Utc>,
}
impl MessageRecord {
    fn to_domain(self) -> PortResult<Message> {
        let role = MessageRole::parse(&self.role).ok_or_else(|| {
            PortError::Unexpected(format!("Unknown message role '{}' in row {}", self.role, self.id))
        })?;
        Ok(Message {
            id: self.id,
            user_id: self.user_id,
            tab: self.tab,
            role,
            content: self.content,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct AnalyticsEventRecord {
    id: i64,
    user_id: Option<Uuid>,
    event_type: String,
    metadata: String,
    created_at: DateTime<Utc>,
}
impl AnalyticsEventRecord {
    fn to_domain(self) -> AnalyticsEvent {
        AnalyticsEvent {
            id: self.id,
            user_id: self.user_id,
            event_type: self.event_type,
            metadata: serde_json::from_str(&self.metadata).unwrap_or(serde_json::Value::Null),
            created_at: self.created_at,
        }
    }
}

//=========================================================================================
// Port Implementations: Accounts and Sessions
//=========================================================================================

#[async_trait]
impl CredentialStore for DbAdapter {
    async fn create_user(
        &self,
        email: &str,
        password_hash: &str,
        is_owner: bool,
    ) -> PortResult<User> {
        let user = User {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            is_owner,
            created_at: Utc::now(),
        };

        sqlx::query(
            "INSERT INTO users (user_id, email, password_hash, is_owner, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(password_hash)
        .bind(user.is_owner)
        .bind(user.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                PortError::Conflict(format!("Email {} is already registered", email))
            }
            other => unexpected(other),
        })?;

        Ok(user)
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, email, password_hash, is_owner, created_at FROM users WHERE email = ?",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(UserRecord::to_domain)
        .ok_or_else(|| PortError::NotFound(format!("User with email {} not found", email)))
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        sqlx::query_as::<_, UserRecord>(
            "SELECT user_id, email, password_hash, is_owner, created_at FROM users WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(|record| record.to_domain().user)
        .ok_or_else(|| PortError::NotFound(format!("User {} not found", user_id)))
    }
}

#[async_trait]
impl SessionStore for DbAdapter {
    async fn create_auth_session(&self, session: &AuthSession) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO auth_sessions (token, user_id, is_owner, created_at, expires_at, last_seen_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&session.token)
        .bind(session.user_id)
        .bind(session.is_owner)
        .bind(session.created_at)
        .bind(session.expires_at)
        .bind(session.last_seen_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn get_auth_session(&self, token: &str) -> PortResult<Option<AuthSession>> {
        let record = sqlx::query_as::<_, AuthSessionRecord>(
            "SELECT token, user_id, is_owner, created_at, expires_at, last_seen_at FROM auth_sessions WHERE token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(AuthSessionRecord::to_domain))
    }

    async fn touch_auth_session(&self, token: &str, seen_at: DateTime<Utc>) -> PortResult<()> {
        sqlx::query("UPDATE auth_sessions SET last_seen_at = ? WHERE token = ?")
            .bind(seen_at)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn set_session_owner(&self, token: &str, is_owner: bool) -> PortResult<bool> {
        let result = sqlx::query("UPDATE auth_sessions SET is_owner = ? WHERE token = ?")
            .bind(is_owner)
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected() > 0)
    }

    async fn delete_auth_session(&self, token: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM auth_sessions WHERE expires_at <= ?")
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected())
    }
}

//=========================================================================================
// Port Implementations: Subscriptions
//=========================================================================================

const SUBSCRIBER_COLUMNS: &str = "u.email, s.user_id, s.plan, s.status, s.customer_id, \
     s.subscription_id, s.current_period_end, s.updated_at \
     FROM subscriptions s JOIN users u ON u.user_id = s.user_id";

#[async_trait]
impl SubscriptionStore for DbAdapter {
    async fn get_subscription(&self, user_id: Uuid) -> PortResult<Option<Subscription>> {
        let record = sqlx::query_as::<_, SubscriptionRecord>(
            "SELECT user_id, plan, status, customer_id, subscription_id, current_period_end, updated_at FROM subscriptions WHERE user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.map(SubscriptionRecord::to_domain))
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> PortResult<()> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (user_id, plan, status, customer_id, subscription_id, current_period_end, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                plan = excluded.plan,
                status = excluded.status,
                customer_id = excluded.customer_id,
                subscription_id = excluded.subscription_id,
                current_period_end = excluded.current_period_end,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(subscription.user_id)
        .bind(subscription.plan.as_str())
        .bind(subscription.status.as_str())
        .bind(&subscription.customer_id)
        .bind(&subscription.subscription_id)
        .bind(subscription.current_period_end)
        .bind(subscription.updated_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn find_user_by_customer_id(&self, customer_id: &str) -> PortResult<Option<Uuid>> {
        sqlx::query_scalar::<_, Uuid>(
            "SELECT user_id FROM subscriptions WHERE customer_id = ? ORDER BY updated_at DESC LIMIT 1",
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)
    }

    async fn list_subscribers(&self, plan: Option<Plan>) -> PortResult<Vec<Subscriber>> {
        let records = match plan {
            Some(plan) => {
                sqlx::query_as::<_, SubscriberRecord>(&format!(
                    "SELECT {SUBSCRIBER_COLUMNS} WHERE s.plan = ? ORDER BY s.updated_at DESC"
                ))
                .bind(plan.as_str())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, SubscriberRecord>(&format!(
                    "SELECT {SUBSCRIBER_COLUMNS} WHERE s.plan <> 'free' ORDER BY s.updated_at DESC"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(unexpected)?;

        Ok(records
            .into_iter()
            .map(|r| Subscriber {
                email: r.email,
                subscription: r.subscription.to_domain(),
            })
            .collect())
    }

    async fn claim_webhook_event(
        &self,
        event_id: &str,
        event_type: &str,
        received_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        let result = sqlx::query(
            "INSERT OR IGNORE INTO processed_webhook_events (event_id, event_type, received_at) VALUES (?, ?, ?)",
        )
        .bind(event_id)
        .bind(event_type)
        .bind(received_at)
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_webhook_event(&self, event_id: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM processed_webhook_events WHERE event_id = ?")
            .bind(event_id)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(())
    }

    async fn prune_webhook_events(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        let result = sqlx::query("DELETE FROM processed_webhook_events WHERE received_at < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(unexpected)?;
        Ok(result.rows_affected())
    }
}

//=========================================================================================
// Port Implementations: Projects, Canon, History and Analytics
//=========================================================================================

#[async_trait]
impl ContentStore for DbAdapter {
    async fn create_project(
        &self,
        owner_id: Option<Uuid>,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<Project> {
        let record = sqlx::query_as::<_, ProjectRecord>(
            "INSERT INTO projects (owner_id, name, description, created_at) VALUES (?, ?, ?, ?) RETURNING id, owner_id, name, description, created_at",
        )
        .bind(owner_id)
        .bind(name)
        .bind(description)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn get_project(&self, project_id: i64) -> PortResult<Project> {
        sqlx::query_as::<_, ProjectRecord>(
            "SELECT id, owner_id, name, description, created_at FROM projects WHERE id = ?",
        )
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(unexpected)?
        .map(ProjectRecord::to_domain)
        .ok_or_else(|| PortError::NotFound(format!("Project {} not found", project_id)))
    }

    async fn list_projects(&self, user_id: Uuid) -> PortResult<Vec<Project>> {
        let records = sqlx::query_as::<_, ProjectRecord>(
            "SELECT id, owner_id, name, description, created_at FROM projects WHERE owner_id = ? OR owner_id IS NULL ORDER BY id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(ProjectRecord::to_domain).collect())
    }

    async fn create_canon_document(&self, doc: NewCanonDocument) -> PortResult<CanonDocument> {
        let tags = serde_json::to_string(&doc.tags)
            .map_err(|e| PortError::Unexpected(format!("Failed to encode tags: {}", e)))?;

        let record = sqlx::query_as::<_, CanonDocumentRecord>(
            r#"
            INSERT INTO canon_documents (project_id, owner_id, title, body, tags, canon_state, source, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id, project_id, owner_id, title, body, tags, canon_state, source, created_at
            "#,
        )
        .bind(doc.project_id)
        .bind(doc.owner_id)
        .bind(&doc.title)
        .bind(&doc.body)
        .bind(tags)
        .bind(&doc.canon_state)
        .bind(&doc.source)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(record.to_domain())
    }

    async fn list_canon_documents(
        &self,
        user_id: Uuid,
        project_id: Option<i64>,
        limit: Option<i64>,
    ) -> PortResult<Vec<CanonDocument>> {
        // SQLite treats a negative LIMIT as "no limit".
        let records = sqlx::query_as::<_, CanonDocumentRecord>(
            r#"
            SELECT id, project_id, owner_id, title, body, tags, canon_state, source, created_at
            FROM canon_documents
            WHERE (owner_id = ? OR owner_id IS NULL)
              AND (? IS NULL OR project_id = ?)
            ORDER BY id DESC
            LIMIT ?
            "#,
        )
        .bind(user_id)
        .bind(project_id)
        .bind(project_id)
        .bind(limit.unwrap_or(-1))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(CanonDocumentRecord::to_domain).collect())
    }
}

#[async_trait]
impl HistoryStore for DbAdapter {
    async fn append_message(
        &self,
        user_id: Uuid,
        tab: &str,
        role: MessageRole,
        content: &str,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO messages (user_id, tab, role, content, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(tab)
        .bind(role.as_str())
        .bind(content)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn recent_messages(
        &self,
        user_id: Uuid,
        tab: &str,
        limit: i64,
    ) -> PortResult<Vec<Message>> {
        let records = sqlx::query_as::<_, MessageRecord>(
            "SELECT id, user_id, tab, role, content, created_at FROM messages WHERE user_id = ? AND tab = ? ORDER BY id DESC LIMIT ?",
        )
        .bind(user_id)
        .bind(tab)
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        records.into_iter().map(MessageRecord::to_domain).collect()
    }
}

#[async_trait]
impl AnalyticsStore for DbAdapter {
    async fn record_event(
        &self,
        user_id: Option<Uuid>,
        event_type: &str,
        metadata: &serde_json::Value,
    ) -> PortResult<()> {
        sqlx::query(
            "INSERT INTO analytics_events (user_id, event_type, metadata, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(event_type)
        .bind(metadata.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(())
    }

    async fn recent_events(&self, limit: i64) -> PortResult<Vec<AnalyticsEvent>> {
        let records = sqlx::query_as::<_, AnalyticsEventRecord>(
            "SELECT id, user_id, event_type, metadata, created_at FROM analytics_events ORDER BY id DESC LIMIT ?",
        )
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;
        Ok(records.into_iter().map(AnalyticsEventRecord::to_domain).collect())
    }

    async fn usage_stats(&self) -> PortResult<UsageStats> {
        let total_users = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await
            .map_err(unexpected)?;

        let active_subscriptions = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM subscriptions WHERE status IN ('active', 'trialing')",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(unexpected)?;

        let events_by_type = sqlx::query_as::<_, (String, i64)>(
            "SELECT event_type, COUNT(*) FROM analytics_events GROUP BY event_type ORDER BY event_type",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(unexpected)?;

        Ok(UsageStats {
            total_users,
            active_subscriptions,
            events_by_type,
        })
    }
}
