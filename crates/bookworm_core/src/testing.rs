//! crates/bookworm_core/src/testing.rs
//!
//! In-memory port implementations shared by the unit tests.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    AnalyticsEvent, AuthSession, CanonDocument, Message, MessageRole, NewCanonDocument, Plan,
    Project, Subscriber, Subscription, UsageStats, User, UserCredentials,
};
use crate::ports::{
    AnalyticsStore, ContentStore, CredentialStore, HistoryStore, PasswordScheme, PortError,
    PortResult, SessionStore, SubscriptionStore, TextGenerationService,
};
use crate::prompt::PromptMessage;

#[derive(Default)]
struct Tables {
    users: Vec<UserCredentials>,
    sessions: HashMap<String, AuthSession>,
    subscriptions: HashMap<Uuid, Subscription>,
    webhook_events: HashMap<String, DateTime<Utc>>,
    projects: Vec<Project>,
    canon: Vec<CanonDocument>,
    messages: Vec<Message>,
    events: Vec<AnalyticsEvent>,
}

#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    fn with<R>(&self, f: impl FnOnce(&mut Tables) -> R) -> R {
        let mut tables = self.tables.lock().unwrap();
        f(&mut tables)
    }

    pub fn add_user(&self, email: &str, is_owner: bool) -> User {
        let user = User {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            is_owner,
            created_at: Utc::now(),
        };
        self.with(|t| {
            t.users.push(UserCredentials {
                user: user.clone(),
                password_hash: String::new(),
            })
        });
        user
    }

    pub fn expire_session(&self, token: &str) {
        self.with(|t| {
            if let Some(session) = t.sessions.get_mut(token) {
                session.expires_at = Utc::now() - Duration::seconds(1);
            }
        });
    }

    pub fn has_session(&self, token: &str) -> bool {
        self.with(|t| t.sessions.contains_key(token))
    }

    pub fn has_webhook_event(&self, event_id: &str) -> bool {
        self.with(|t| t.webhook_events.contains_key(event_id))
    }

    pub fn subscription_count(&self) -> usize {
        self.with(|t| t.subscriptions.len())
    }

    /// Messages for a tab in insertion order.
    pub fn messages_for(&self, user_id: Uuid, tab: &str) -> Vec<Message> {
        self.with(|t| {
            t.messages
                .iter()
                .filter(|m| m.user_id == user_id && m.tab == tab)
                .cloned()
                .collect()
        })
    }

    pub fn events_of_type(&self, event_type: &str) -> usize {
        self.with(|t| t.events.iter().filter(|e| e.event_type == event_type).count())
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn create_user(&self, email: &str, password_hash: &str, is_owner: bool) -> PortResult<User> {
        self.with(|t| {
            if t.users.iter().any(|c| c.user.email == email) {
                return Err(PortError::Conflict(email.to_string()));
            }
            let user = User {
                user_id: Uuid::new_v4(),
                email: email.to_string(),
                is_owner,
                created_at: Utc::now(),
            };
            t.users.push(UserCredentials {
                user: user.clone(),
                password_hash: password_hash.to_string(),
            });
            Ok(user)
        })
    }

    async fn get_user_by_email(&self, email: &str) -> PortResult<UserCredentials> {
        self.with(|t| {
            t.users
                .iter()
                .find(|c| c.user.email == email)
                .cloned()
                .ok_or_else(|| PortError::NotFound(email.to_string()))
        })
    }

    async fn get_user_by_id(&self, user_id: Uuid) -> PortResult<User> {
        self.with(|t| {
            t.users
                .iter()
                .find(|c| c.user.user_id == user_id)
                .map(|c| c.user.clone())
                .ok_or_else(|| PortError::NotFound(user_id.to_string()))
        })
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn create_auth_session(&self, session: &AuthSession) -> PortResult<()> {
        self.with(|t| t.sessions.insert(session.token.clone(), session.clone()));
        Ok(())
    }

    async fn get_auth_session(&self, token: &str) -> PortResult<Option<AuthSession>> {
        Ok(self.with(|t| t.sessions.get(token).cloned()))
    }

    async fn touch_auth_session(&self, token: &str, seen_at: DateTime<Utc>) -> PortResult<()> {
        self.with(|t| {
            if let Some(session) = t.sessions.get_mut(token) {
                session.last_seen_at = Some(seen_at);
            }
        });
        Ok(())
    }

    async fn set_session_owner(&self, token: &str, is_owner: bool) -> PortResult<bool> {
        Ok(self.with(|t| match t.sessions.get_mut(token) {
            Some(session) => {
                session.is_owner = is_owner;
                true
            }
            None => false,
        }))
    }

    async fn delete_auth_session(&self, token: &str) -> PortResult<()> {
        self.with(|t| t.sessions.remove(token));
        Ok(())
    }

    async fn delete_expired_sessions(&self, now: DateTime<Utc>) -> PortResult<u64> {
        Ok(self.with(|t| {
            let before = t.sessions.len();
            t.sessions.retain(|_, s| !s.is_expired(now));
            (before - t.sessions.len()) as u64
        }))
    }
}

#[async_trait]
impl SubscriptionStore for MemoryStore {
    async fn get_subscription(&self, user_id: Uuid) -> PortResult<Option<Subscription>> {
        Ok(self.with(|t| t.subscriptions.get(&user_id).cloned()))
    }

    async fn upsert_subscription(&self, subscription: &Subscription) -> PortResult<()> {
        self.with(|t| t.subscriptions.insert(subscription.user_id, subscription.clone()));
        Ok(())
    }

    async fn find_user_by_customer_id(&self, customer_id: &str) -> PortResult<Option<Uuid>> {
        Ok(self.with(|t| {
            t.subscriptions
                .values()
                .find(|s| s.customer_id.as_deref() == Some(customer_id))
                .map(|s| s.user_id)
        }))
    }

    async fn list_subscribers(&self, plan: Option<Plan>) -> PortResult<Vec<Subscriber>> {
        Ok(self.with(|t| {
            t.subscriptions
                .values()
                .filter(|s| plan.map_or(s.plan != Plan::Free, |p| s.plan == p))
                .filter_map(|s| {
                    let email = t.users.iter().find(|c| c.user.user_id == s.user_id)?.user.email.clone();
                    Some(Subscriber {
                        email,
                        subscription: s.clone(),
                    })
                })
                .collect()
        }))
    }

    async fn claim_webhook_event(
        &self,
        event_id: &str,
        _event_type: &str,
        received_at: DateTime<Utc>,
    ) -> PortResult<bool> {
        Ok(self.with(|t| {
            if t.webhook_events.contains_key(event_id) {
                false
            } else {
                t.webhook_events.insert(event_id.to_string(), received_at);
                true
            }
        }))
    }

    async fn release_webhook_event(&self, event_id: &str) -> PortResult<()> {
        self.with(|t| t.webhook_events.remove(event_id));
        Ok(())
    }

    async fn prune_webhook_events(&self, cutoff: DateTime<Utc>) -> PortResult<u64> {
        Ok(self.with(|t| {
            let before = t.webhook_events.len();
            t.webhook_events.retain(|_, received_at| *received_at >= cutoff);
            (before - t.webhook_events.len()) as u64
        }))
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    async fn create_project(
        &self,
        owner_id: Option<Uuid>,
        name: &str,
        description: Option<&str>,
    ) -> PortResult<Project> {
        Ok(self.with(|t| {
            let project = Project {
                id: t.projects.len() as i64 + 1,
                owner_id,
                name: name.to_string(),
                description: description.map(str::to_string),
                created_at: Utc::now(),
            };
            t.projects.push(project.clone());
            project
        }))
    }

    async fn get_project(&self, project_id: i64) -> PortResult<Project> {
        self.with(|t| {
            t.projects
                .iter()
                .find(|p| p.id == project_id)
                .cloned()
                .ok_or_else(|| PortError::NotFound(format!("project {project_id}")))
        })
    }

    async fn list_projects(&self, user_id: Uuid) -> PortResult<Vec<Project>> {
        Ok(self.with(|t| {
            t.projects
                .iter()
                .rev()
                .filter(|p| p.is_visible_to(user_id))
                .cloned()
                .collect()
        }))
    }

    async fn create_canon_document(&self, doc: NewCanonDocument) -> PortResult<CanonDocument> {
        Ok(self.with(|t| {
            let stored = CanonDocument {
                id: t.canon.len() as i64 + 1,
                project_id: doc.project_id,
                owner_id: doc.owner_id,
                title: doc.title,
                body: doc.body,
                tags: doc.tags,
                canon_state: doc.canon_state,
                source: doc.source,
                created_at: Utc::now(),
            };
            t.canon.push(stored.clone());
            stored
        }))
    }

    async fn list_canon_documents(
        &self,
        user_id: Uuid,
        project_id: Option<i64>,
        limit: Option<i64>,
    ) -> PortResult<Vec<CanonDocument>> {
        Ok(self.with(|t| {
            let visible = t
                .canon
                .iter()
                .rev()
                .filter(|d| d.owner_id.map_or(true, |owner| owner == user_id))
                .filter(|d| project_id.map_or(true, |p| d.project_id == Some(p)))
                .cloned();
            match limit {
                Some(limit) => visible.take(limit.max(0) as usize).collect(),
                None => visible.collect(),
            }
        }))
    }
}

#[async_trait]
impl HistoryStore for MemoryStore {
    async fn append_message(
        &self,
        user_id: Uuid,
        tab: &str,
        role: MessageRole,
        content: &str,
    ) -> PortResult<()> {
        self.with(|t| {
            let id = t.messages.len() as i64 + 1;
            t.messages.push(Message {
                id,
                user_id,
                tab: tab.to_string(),
                role,
                content: content.to_string(),
                created_at: Utc::now(),
            })
        });
        Ok(())
    }

    async fn recent_messages(&self, user_id: Uuid, tab: &str, limit: i64) -> PortResult<Vec<Message>> {
        Ok(self.with(|t| {
            t.messages
                .iter()
                .rev()
                .filter(|m| m.user_id == user_id && m.tab == tab)
                .take(limit.max(0) as usize)
                .cloned()
                .collect()
        }))
    }
}

#[async_trait]
impl AnalyticsStore for MemoryStore {
    async fn record_event(
        &self,
        user_id: Option<Uuid>,
        event_type: &str,
        metadata: &serde_json::Value,
    ) -> PortResult<()> {
        self.with(|t| {
            let id = t.events.len() as i64 + 1;
            t.events.push(AnalyticsEvent {
                id,
                user_id,
                event_type: event_type.to_string(),
                metadata: metadata.clone(),
                created_at: Utc::now(),
            })
        });
        Ok(())
    }

    async fn recent_events(&self, limit: i64) -> PortResult<Vec<AnalyticsEvent>> {
        Ok(self.with(|t| t.events.iter().rev().take(limit.max(0) as usize).cloned().collect()))
    }

    async fn usage_stats(&self) -> PortResult<UsageStats> {
        Ok(self.with(|t| {
            let mut by_type: HashMap<String, i64> = HashMap::new();
            for event in &t.events {
                *by_type.entry(event.event_type.clone()).or_default() += 1;
            }
            let mut events_by_type: Vec<_> = by_type.into_iter().collect();
            events_by_type.sort();
            UsageStats {
                total_users: t.users.len() as i64,
                active_subscriptions: t
                    .subscriptions
                    .values()
                    .filter(|s| s.status.grants_access())
                    .count() as i64,
                events_by_type,
            }
        }))
    }
}

/// Reversible stand-in for a real hash; never equal to the plaintext.
pub struct PlainScheme;

impl PasswordScheme for PlainScheme {
    fn hash_password(&self, password: &str) -> PortResult<String> {
        Ok(format!("plain${}", password.chars().rev().collect::<String>()))
    }

    fn verify_password(&self, password: &str, password_hash: &str) -> bool {
        self.hash_password(password)
            .map(|expected| expected == password_hash)
            .unwrap_or(false)
    }
}

/// Replies with a fixed text and remembers the last prompt it saw.
pub struct RecordingLlm {
    reply: String,
    seen: Mutex<Vec<PromptMessage>>,
}

impl RecordingLlm {
    pub fn replying(reply: &str) -> Self {
        Self {
            reply: reply.to_string(),
            seen: Mutex::new(Vec::new()),
        }
    }

    pub fn last_messages(&self) -> Vec<PromptMessage> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl TextGenerationService for RecordingLlm {
    async fn complete(&self, messages: &[PromptMessage]) -> PortResult<String> {
        *self.seen.lock().unwrap() = messages.to_vec();
        Ok(self.reply.clone())
    }
}

pub struct FailingLlm;

#[async_trait]
impl TextGenerationService for FailingLlm {
    async fn complete(&self, _messages: &[PromptMessage]) -> PortResult<String> {
        Err(PortError::upstream("ApiError", "quota exceeded"))
    }
}
