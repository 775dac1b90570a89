//! crates/bookworm_core/src/policy.rs
//!
//! The access policy for paid functionality. Pure: the same identity,
//! subscription snapshot and clock always give the same answer.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::domain::{Identity, Plan, Subscription};

pub const SUBSCRIPTION_REQUIRED_MESSAGE: &str =
    "Your free trial has ended. Choose a plan (Basic, Pro or Patron) to keep using Book Worm.";

/// Why a request was allowed, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum AccessGrant {
    Owner,
    Trial { ends_at: DateTime<Utc> },
    Subscription { plan: Plan },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AccessDenied {
    #[error("{}", SUBSCRIPTION_REQUIRED_MESSAGE)]
    SubscriptionRequired { trial_ended_at: DateTime<Utc> },
}

/// Evaluates owner → trial window → active subscription, stopping at the first match.
pub fn evaluate_access(
    identity: &Identity,
    subscription: Option<&Subscription>,
    now: DateTime<Utc>,
    trial_window: Duration,
) -> Result<AccessGrant, AccessDenied> {
    if identity.is_owner {
        return Ok(AccessGrant::Owner);
    }

    let trial_ends_at = identity.account_created_at + trial_window;
    if now < trial_ends_at {
        return Ok(AccessGrant::Trial { ends_at: trial_ends_at });
    }

    match subscription {
        Some(sub) if sub.status.grants_access() => Ok(AccessGrant::Subscription { plan: sub.plan }),
        _ => Err(AccessDenied::SubscriptionRequired {
            trial_ended_at: trial_ends_at,
        }),
    }
}
