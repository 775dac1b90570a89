//! crates/bookworm_core/src/billing.rs
//!
//! Reconciles local subscription rows with billing-provider webhook events.
//! Signature checking happens before an event ever reaches this module.

use chrono::{DateTime, Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::credentials::normalize_email;
use crate::domain::{Plan, Subscription, SubscriptionStatus};
use crate::ports::{CredentialStore, PortError, PortResult, SubscriptionStore};

//=========================================================================================
// Price Table
//=========================================================================================

/// Static mapping between provider price ids and internal plans.
#[derive(Debug, Clone, Default)]
pub struct PriceTable {
    pub basic: Option<String>,
    pub pro: Option<String>,
    pub patron: Option<String>,
}

impl PriceTable {
    /// Unknown price ids degrade to the generic `paid` plan.
    pub fn plan_for_price(&self, price_id: &str) -> Plan {
        let matches = |candidate: &Option<String>| candidate.as_deref() == Some(price_id);
        if matches(&self.basic) {
            Plan::Basic
        } else if matches(&self.pro) {
            Plan::Pro
        } else if matches(&self.patron) {
            Plan::Patron
        } else {
            Plan::Paid
        }
    }

    pub fn price_for_plan(&self, plan: Plan) -> Option<&str> {
        match plan {
            Plan::Basic => self.basic.as_deref(),
            Plan::Pro => self.pro.as_deref(),
            Plan::Patron => self.patron.as_deref(),
            Plan::Free | Plan::Paid => None,
        }
    }
}

//=========================================================================================
// Events
//=========================================================================================

/// The envelope of a provider webhook event. Only `data.object` is interpreted.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    pub id: String,
    #[serde(rename = "type")]
    pub event_type: String,
    pub data: WebhookEventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEventData {
    pub object: Value,
}

impl WebhookEvent {
    pub fn parse(payload: &[u8]) -> PortResult<Self> {
        serde_json::from_slice(payload)
            .map_err(|e| PortError::Unexpected(format!("Malformed webhook payload: {e}")))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncOutcome {
    Applied {
        user_id: Uuid,
        plan: Plan,
        status: SubscriptionStatus,
    },
    /// The event id was already processed.
    Duplicate,
    Ignored(String),
}

fn str_at<'a>(value: &'a Value, pointer: &str) -> Option<&'a str> {
    value.pointer(pointer).and_then(Value::as_str).filter(|s| !s.is_empty())
}

fn timestamp_at(value: &Value, pointer: &str) -> Option<DateTime<Utc>> {
    value
        .pointer(pointer)
        .and_then(Value::as_i64)
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

//=========================================================================================
// Synchronizer
//=========================================================================================

/// Processed event ids are kept this long. Stripe stops redelivering after
/// three days, so older claims can no longer catch a duplicate.
pub const WEBHOOK_RETENTION_DAYS: i64 = 30;

#[derive(Clone)]
pub struct SubscriptionSynchronizer {
    subscriptions: Arc<dyn SubscriptionStore>,
    users: Arc<dyn CredentialStore>,
    prices: PriceTable,
}

impl SubscriptionSynchronizer {
    pub fn new(
        subscriptions: Arc<dyn SubscriptionStore>,
        users: Arc<dyn CredentialStore>,
        prices: PriceTable,
    ) -> Self {
        Self {
            subscriptions,
            users,
            prices,
        }
    }

    pub fn prices(&self) -> &PriceTable {
        &self.prices
    }

    /// Applies a verified event at most once per event id. When applying
    /// fails the claim is released so a redelivery can try again.
    pub async fn handle(&self, event: &WebhookEvent) -> PortResult<SyncOutcome> {
        let now = Utc::now();
        let fresh = self
            .subscriptions
            .claim_webhook_event(&event.id, &event.event_type, now)
            .await?;
        if !fresh {
            debug!("Webhook event {} already processed.", event.id);
            return Ok(SyncOutcome::Duplicate);
        }

        match self.apply(event).await {
            Ok(outcome) => {
                self.prune_claims(now).await;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(release_err) = self.subscriptions.release_webhook_event(&event.id).await {
                    warn!("Failed to release webhook event {}: {}", event.id, release_err);
                }
                Err(e)
            }
        }
    }

    /// Best-effort cleanup of claims past the retention window.
    async fn prune_claims(&self, now: DateTime<Utc>) {
        let cutoff = now - Duration::days(WEBHOOK_RETENTION_DAYS);
        match self.subscriptions.prune_webhook_events(cutoff).await {
            Ok(pruned) if pruned > 0 => debug!("Pruned {} old webhook event ids.", pruned),
            Ok(_) => {}
            Err(e) => warn!("Failed to prune webhook event ids: {}", e),
        }
    }

    async fn apply(&self, event: &WebhookEvent) -> PortResult<SyncOutcome> {
        let object = &event.data.object;
        match event.event_type.as_str() {
            "checkout.session.completed" => self.apply_checkout_completed(object).await,
            "customer.subscription.created" | "customer.subscription.updated" => {
                self.apply_subscription_change(object, false).await
            }
            "customer.subscription.deleted" => self.apply_subscription_change(object, true).await,
            other => Ok(SyncOutcome::Ignored(format!("unhandled event type {other}"))),
        }
    }

    async fn apply_checkout_completed(&self, object: &Value) -> PortResult<SyncOutcome> {
        let Some(user_id) = self.resolve_checkout_user(object).await? else {
            return Ok(SyncOutcome::Ignored("checkout user could not be resolved".into()));
        };

        let plan = match str_at(object, "/metadata/price_id") {
            Some(price_id) => self.prices.plan_for_price(price_id),
            None => str_at(object, "/metadata/plan")
                .and_then(Plan::parse)
                .unwrap_or(Plan::Paid),
        };

        let existing = self.subscriptions.get_subscription(user_id).await?;
        let subscription = Subscription {
            user_id,
            plan,
            status: SubscriptionStatus::Active,
            customer_id: str_at(object, "/customer")
                .map(str::to_string)
                .or_else(|| existing.as_ref().and_then(|s| s.customer_id.clone())),
            subscription_id: str_at(object, "/subscription")
                .map(str::to_string)
                .or_else(|| existing.as_ref().and_then(|s| s.subscription_id.clone())),
            current_period_end: existing.and_then(|s| s.current_period_end),
            updated_at: Utc::now(),
        };
        self.subscriptions.upsert_subscription(&subscription).await?;

        info!("Checkout completed for user {}: plan {}", user_id, plan);
        Ok(SyncOutcome::Applied {
            user_id,
            plan,
            status: subscription.status,
        })
    }

    async fn apply_subscription_change(
        &self,
        object: &Value,
        deleted: bool,
    ) -> PortResult<SyncOutcome> {
        let customer_id = str_at(object, "/customer");
        let user_id = match self.user_from_metadata(object).await? {
            Some(user_id) => Some(user_id),
            None => match customer_id {
                Some(customer) => self.subscriptions.find_user_by_customer_id(customer).await?,
                None => None,
            },
        };
        let Some(user_id) = user_id else {
            return Ok(SyncOutcome::Ignored("subscription user could not be resolved".into()));
        };

        let (plan, status) = if deleted {
            (Plan::Free, SubscriptionStatus::Canceled)
        } else {
            let plan = str_at(object, "/items/data/0/price/id")
                .map(|price_id| self.prices.plan_for_price(price_id))
                .unwrap_or(Plan::Paid);
            let status = str_at(object, "/status")
                .map(SubscriptionStatus::from_provider)
                .unwrap_or(SubscriptionStatus::Inactive);
            (plan, status)
        };

        let existing = self.subscriptions.get_subscription(user_id).await?;
        let subscription = Subscription {
            user_id,
            plan,
            status,
            customer_id: customer_id
                .map(str::to_string)
                .or_else(|| existing.as_ref().and_then(|s| s.customer_id.clone())),
            subscription_id: str_at(object, "/id").map(str::to_string),
            current_period_end: timestamp_at(object, "/current_period_end")
                .or_else(|| timestamp_at(object, "/items/data/0/current_period_end")),
            updated_at: Utc::now(),
        };
        self.subscriptions.upsert_subscription(&subscription).await?;

        info!("Subscription for user {} is now {} / {}", user_id, plan, status);
        Ok(SyncOutcome::Applied {
            user_id,
            plan,
            status,
        })
    }

    async fn user_from_metadata(&self, object: &Value) -> PortResult<Option<Uuid>> {
        let candidate = str_at(object, "/metadata/user_id")
            .or_else(|| str_at(object, "/client_reference_id"))
            .and_then(|raw| Uuid::parse_str(raw).ok());
        let Some(user_id) = candidate else {
            return Ok(None);
        };
        match self.users.get_user_by_id(user_id).await {
            Ok(user) => Ok(Some(user.user_id)),
            Err(PortError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn resolve_checkout_user(&self, object: &Value) -> PortResult<Option<Uuid>> {
        if let Some(user_id) = self.user_from_metadata(object).await? {
            return Ok(Some(user_id));
        }
        let Some(email) = str_at(object, "/customer_details/email")
            .or_else(|| str_at(object, "/customer_email"))
        else {
            return Ok(None);
        };
        match self.users.get_user_by_email(&normalize_email(email)).await {
            Ok(credentials) => Ok(Some(credentials.user.user_id)),
            Err(PortError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemoryStore;
    use serde_json::json;

    fn prices() -> PriceTable {
        PriceTable {
            basic: Some("price_basic".into()),
            pro: Some("price_pro".into()),
            patron: Some("price_patron".into()),
        }
    }

    fn sync(store: &Arc<MemoryStore>) -> SubscriptionSynchronizer {
        SubscriptionSynchronizer::new(store.clone(), store.clone(), prices())
    }

    fn event(id: &str, event_type: &str, object: Value) -> WebhookEvent {
        WebhookEvent {
            id: id.to_string(),
            event_type: event_type.to_string(),
            data: WebhookEventData { object },
        }
    }

    #[test]
    fn unknown_prices_degrade_to_paid() {
        let table = prices();
        assert_eq!(table.plan_for_price("price_pro"), Plan::Pro);
        assert_eq!(table.plan_for_price("price_mystery"), Plan::Paid);
        assert_eq!(table.price_for_plan(Plan::Patron), Some("price_patron"));
        assert_eq!(table.price_for_plan(Plan::Free), None);
    }

    #[test]
    fn envelope_parses_from_provider_json() {
        let raw = br#"{"id":"evt_1","type":"checkout.session.completed","data":{"object":{"id":"cs_1"}}}"#;
        let parsed = WebhookEvent::parse(raw).unwrap();
        assert_eq!(parsed.id, "evt_1");
        assert_eq!(parsed.event_type, "checkout.session.completed");
        assert!(WebhookEvent::parse(b"not json").is_err());
    }

    #[tokio::test]
    async fn duplicate_checkout_delivery_applies_once() {
        let store = Arc::new(MemoryStore::default());
        let user = store.add_user("u@example.com", false);
        let sync = sync(&store);
        let completed = event(
            "evt_checkout",
            "checkout.session.completed",
            json!({
                "customer": "cus_1",
                "subscription": "sub_1",
                "metadata": { "user_id": user.user_id.to_string(), "price_id": "price_pro" }
            }),
        );

        let first = sync.handle(&completed).await.unwrap();
        assert_eq!(
            first,
            SyncOutcome::Applied {
                user_id: user.user_id,
                plan: Plan::Pro,
                status: SubscriptionStatus::Active
            }
        );
        let after_first = store.get_subscription(user.user_id).await.unwrap().unwrap();

        assert_eq!(sync.handle(&completed).await.unwrap(), SyncOutcome::Duplicate);
        let after_second = store.get_subscription(user.user_id).await.unwrap().unwrap();
        assert_eq!(store.subscription_count(), 1);
        assert_eq!(after_first, after_second);
        assert_eq!(after_second.customer_id.as_deref(), Some("cus_1"));
        assert_eq!(after_second.subscription_id.as_deref(), Some("sub_1"));
    }

    #[tokio::test]
    async fn old_claims_are_pruned_after_a_fresh_event() {
        let store = Arc::new(MemoryStore::default());
        let sync = sync(&store);
        let long_ago = Utc::now() - Duration::days(WEBHOOK_RETENTION_DAYS + 1);
        let recent = Utc::now() - Duration::days(2);
        assert!(store.claim_webhook_event("evt_old", "invoice.paid", long_ago).await.unwrap());
        assert!(store.claim_webhook_event("evt_recent", "invoice.paid", recent).await.unwrap());

        let outcome = sync
            .handle(&event("evt_new", "invoice.paid", json!({})))
            .await
            .unwrap();
        assert!(matches!(outcome, SyncOutcome::Ignored(_)));

        assert!(!store.has_webhook_event("evt_old"));
        assert!(store.has_webhook_event("evt_recent"));
        assert!(store.has_webhook_event("evt_new"));
    }

    #[tokio::test]
    async fn checkout_falls_back_to_email_lookup() {
        let store = Arc::new(MemoryStore::default());
        let user = store.add_user("u@example.com", false);
        let outcome = sync(&store)
            .handle(&event(
                "evt_email",
                "checkout.session.completed",
                json!({ "customer": "cus_9", "customer_details": { "email": "U@Example.com" } }),
            ))
            .await
            .unwrap();
        assert_eq!(
            outcome,
            SyncOutcome::Applied {
                user_id: user.user_id,
                plan: Plan::Paid,
                status: SubscriptionStatus::Active
            }
        );
    }

    #[tokio::test]
    async fn subscription_updates_and_deletes_resolve_by_customer() {
        let store = Arc::new(MemoryStore::default());
        let user = store.add_user("u@example.com", false);
        let sync = sync(&store);
        sync.handle(&event(
            "evt_1",
            "checkout.session.completed",
            json!({ "customer": "cus_1", "metadata": { "user_id": user.user_id.to_string(), "plan": "basic" } }),
        ))
        .await
        .unwrap();

        let updated = sync
            .handle(&event(
                "evt_2",
                "customer.subscription.updated",
                json!({
                    "id": "sub_1",
                    "customer": "cus_1",
                    "status": "trialing",
                    "current_period_end": 1_900_000_000,
                    "items": { "data": [ { "price": { "id": "price_patron" } } ] }
                }),
            ))
            .await
            .unwrap();
        assert_eq!(
            updated,
            SyncOutcome::Applied {
                user_id: user.user_id,
                plan: Plan::Patron,
                status: SubscriptionStatus::Trialing
            }
        );
        let row = store.get_subscription(user.user_id).await.unwrap().unwrap();
        assert_eq!(row.current_period_end.map(|t| t.timestamp()), Some(1_900_000_000));

        sync.handle(&event(
            "evt_3",
            "customer.subscription.deleted",
            json!({ "id": "sub_1", "customer": "cus_1", "status": "canceled" }),
        ))
        .await
        .unwrap();
        let row = store.get_subscription(user.user_id).await.unwrap().unwrap();
        assert_eq!(row.plan, Plan::Free);
        assert_eq!(row.status, SubscriptionStatus::Canceled);
    }

    #[tokio::test]
    async fn unresolvable_and_unknown_events_are_ignored() {
        let store = Arc::new(MemoryStore::default());
        let sync = sync(&store);
        let orphan = sync
            .handle(&event(
                "evt_orphan",
                "customer.subscription.updated",
                json!({ "id": "sub_x", "customer": "cus_unknown", "status": "active" }),
            ))
            .await
            .unwrap();
        assert!(matches!(orphan, SyncOutcome::Ignored(_)));

        let other = sync
            .handle(&event("evt_invoice", "invoice.paid", json!({})))
            .await
            .unwrap();
        assert!(matches!(other, SyncOutcome::Ignored(_)));
        assert_eq!(store.subscription_count(), 0);
    }
}
