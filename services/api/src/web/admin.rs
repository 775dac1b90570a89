//! services/api/src/web/admin.rs
//!
//! Owner-only analytics views. Mounted behind `require_auth` and `require_owner`.

use axum::{
    extract::{Query, State},
    Json,
};
use bookworm_core::domain::{AnalyticsEvent, Plan, Subscriber};
use bookworm_core::ports::{AnalyticsStore, SubscriptionStore};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use crate::error::HttpError;
use crate::web::state::AppState;

pub const DEFAULT_EVENT_LIMIT: i64 = 100;
pub const MAX_EVENT_LIMIT: i64 = 1000;

#[derive(Serialize, ToSchema)]
pub struct EventCount {
    pub event_type: String,
    pub count: i64,
}

#[derive(Serialize, ToSchema)]
pub struct StatsResponse {
    pub total_users: i64,
    pub active_subscriptions: i64,
    pub events_by_type: Vec<EventCount>,
}

#[derive(Serialize, ToSchema)]
pub struct SubscriberResponse {
    pub user_id: Uuid,
    pub email: String,
    pub plan: String,
    pub status: String,
    pub customer_id: Option<String>,
    pub current_period_end: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<Subscriber> for SubscriberResponse {
    fn from(subscriber: Subscriber) -> Self {
        let sub = subscriber.subscription;
        Self {
            user_id: sub.user_id,
            email: subscriber.email,
            plan: sub.plan.to_string(),
            status: sub.status.to_string(),
            customer_id: sub.customer_id,
            current_period_end: sub.current_period_end,
            updated_at: sub.updated_at,
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct EventResponse {
    pub id: i64,
    pub user_id: Option<Uuid>,
    pub event_type: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl From<AnalyticsEvent> for EventResponse {
    fn from(event: AnalyticsEvent) -> Self {
        Self {
            id: event.id,
            user_id: event.user_id,
            event_type: event.event_type,
            metadata: event.metadata,
            created_at: event.created_at,
        }
    }
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct SubscribersQuery {
    /// Restrict to one plan. Without it, every non-free subscriber is listed.
    pub plan: Option<String>,
}

#[derive(Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct EventsQuery {
    pub limit: Option<i64>,
}

/// GET /admin/stats - Totals for the owner dashboard
#[utoipa::path(
    get,
    path = "/admin/stats",
    responses(
        (status = 200, description = "Usage totals", body = StatsResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Owner access required")
    )
)]
pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatsResponse>, HttpError> {
    let stats = state.db.usage_stats().await?;
    Ok(Json(StatsResponse {
        total_users: stats.total_users,
        active_subscriptions: stats.active_subscriptions,
        events_by_type: stats
            .events_by_type
            .into_iter()
            .map(|(event_type, count)| EventCount { event_type, count })
            .collect(),
    }))
}

/// GET /admin/subscribers - Subscribers, optionally filtered by plan
#[utoipa::path(
    get,
    path = "/admin/subscribers",
    params(SubscribersQuery),
    responses(
        (status = 200, description = "Subscriber rows", body = [SubscriberResponse]),
        (status = 400, description = "Unknown plan"),
        (status = 403, description = "Owner access required")
    )
)]
pub async fn subscribers_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SubscribersQuery>,
) -> Result<Json<Vec<SubscriberResponse>>, HttpError> {
    let plan = match query.plan.as_deref().map(str::trim).filter(|p| !p.is_empty()) {
        Some(raw) => Some(
            Plan::parse(raw)
                .ok_or_else(|| HttpError::Validation(format!("Unknown plan '{}'.", raw)))?,
        ),
        None => None,
    };

    let subscribers = state.db.list_subscribers(plan).await?;
    Ok(Json(
        subscribers.into_iter().map(SubscriberResponse::from).collect(),
    ))
}

/// GET /admin/events - The most recent analytics events
#[utoipa::path(
    get,
    path = "/admin/events",
    params(EventsQuery),
    responses(
        (status = 200, description = "Events, newest first", body = [EventResponse]),
        (status = 403, description = "Owner access required")
    )
)]
pub async fn events_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<EventsQuery>,
) -> Result<Json<Vec<EventResponse>>, HttpError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_EVENT_LIMIT)
        .clamp(1, MAX_EVENT_LIMIT);
    let events = state.db.recent_events(limit).await?;
    Ok(Json(events.into_iter().map(EventResponse::from).collect()))
}
