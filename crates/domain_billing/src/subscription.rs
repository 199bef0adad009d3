//! Subscriptions
//!
//! A subscription binds a customer to a plan. Upgrades and downgrades create
//! a new subscription whose `previous_subscription` was terminated at the
//! instant the new one started.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use core_kernel::{CustomerId, SubscriptionId};

use crate::catalog::Plan;

/// Period anchoring
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingTime {
    /// Periods start on calendar boundaries (Monday, 1st of month, 1st of January)
    Calendar,
    /// Periods start on the day of `subscription_at`
    Anniversary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Terminated,
    Canceled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub customer_id: CustomerId,
    pub external_id: String,
    pub plan: Plan,
    pub status: SubscriptionStatus,
    pub billing_time: BillingTime,
    /// Anniversary anchor; defaults to the start date
    pub subscription_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub terminated_at: Option<DateTime<Utc>>,
    pub previous_subscription: Option<Box<Subscription>>,
}

impl Subscription {
    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    pub fn is_terminated(&self) -> bool {
        self.status == SubscriptionStatus::Terminated
    }

    /// The previous subscription when this one replaced it without a gap
    pub fn upgraded_from(&self) -> Option<&Subscription> {
        let previous = self.previous_subscription.as_deref()?;
        match (previous.terminated_at, self.started_at) {
            (Some(terminated_at), Some(started_at)) if terminated_at == started_at => Some(previous),
            _ => None,
        }
    }
}

/// Checks that at most one subscription per external id is active
pub fn ensure_single_active<'a, I>(subscriptions: I) -> Result<(), String>
where
    I: IntoIterator<Item = &'a Subscription>,
{
    let mut seen = std::collections::HashSet::new();
    for subscription in subscriptions.into_iter().filter(|s| s.is_active()) {
        if !seen.insert(subscription.external_id.as_str()) {
            return Err(format!(
                "More than one active subscription for {}",
                subscription.external_id
            ));
        }
    }
    Ok(())
}
