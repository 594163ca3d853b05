//! Subscription manager: composes the plan catalog with stored counters.
//!
//! Checking and recording are separate calls. A caller checks, performs the
//! gated action, then records it; nothing here makes those three steps atomic
//! and a recorded increment is never rolled back. Increments are not retried:
//! a retried increment without an idempotency key can double count.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::subscription::entitlement::can_perform;
use crate::subscription::plan::{Limit, Plan, PlanId};
use crate::subscription::store::{Account, StoreError, UsageStore};
use crate::subscription::usage::{Action, Counter, UsageCounters};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeteredUsage {
    pub used: u32,
    /// `None` when the plan has no catalog entry.
    pub limit: Option<Limit>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageReport {
    pub plan: PlanId,
    pub ai_generations: MeteredUsage,
    pub exports: MeteredUsage,
}

impl UsageReport {
    pub fn from_account(account: &Account) -> Self {
        let limits = account.plan.limits();
        let metered = |counter: Counter| MeteredUsage {
            used: account.counters.get(counter),
            limit: limits.map(|l| counter.limit(l)),
        };
        Self {
            plan: account.plan.clone(),
            ai_generations: metered(Counter::AiGenerations),
            exports: metered(Counter::Exports),
        }
    }
}

#[derive(Clone)]
pub struct SubscriptionManager {
    store: Arc<dyn UsageStore>,
}

impl SubscriptionManager {
    pub fn new(store: Arc<dyn UsageStore>) -> Self {
        Self { store }
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    pub async fn create_account(&self, user_id: Uuid, plan: Plan) -> Result<Account, StoreError> {
        let account = self
            .store
            .create_account(user_id, &PlanId::from(plan))
            .await?;
        info!("Created usage account for user {user_id} on plan {plan}");
        Ok(account)
    }

    /// Whether `user_id` may perform `action` right now.
    ///
    /// An unknown user is denied. Storage failures are returned so the caller
    /// can choose; denying is the safe default.
    pub async fn check_user_limits(
        &self,
        user_id: Uuid,
        action: Action,
    ) -> Result<bool, StoreError> {
        let Some(account) = self.store.fetch_account(user_id).await? else {
            warn!("Limit check for unknown user {user_id}; denying {action:?}");
            return Ok(false);
        };

        if action.counter().is_some() && account.plan.limits().is_none() {
            warn!(
                "User {user_id} has plan '{}' with no catalog entry; denying {action:?}",
                account.plan
            );
            return Ok(false);
        }

        Ok(can_perform(&account.plan, &account.counters, action))
    }

    /// Records one use of `counter`.
    pub async fn increment_usage(
        &self,
        user_id: Uuid,
        counter: Counter,
    ) -> Result<UsageCounters, StoreError> {
        let counters = self.store.increment(user_id, counter, 1).await?;
        info!(
            "Usage for user {user_id}: {} now {}",
            counter.column(),
            counters.get(counter)
        );
        Ok(counters)
    }

    pub async fn get_usage(&self, user_id: Uuid) -> Result<UsageReport, StoreError> {
        let account = self
            .store
            .fetch_account(user_id)
            .await?
            .ok_or(StoreError::UserNotFound(user_id))?;
        Ok(UsageReport::from_account(&account))
    }

    pub async fn reset_usage(&self, user_id: Uuid) -> Result<UsageCounters, StoreError> {
        let counters = self.store.reset(user_id).await?;
        info!("Reset usage counters for user {user_id}");
        Ok(counters)
    }

    /// Moves the user to `plan`. Existing counters carry over untouched.
    pub async fn update_plan(&self, user_id: Uuid, plan: Plan) -> Result<UsageReport, StoreError> {
        let account = self.store.set_plan(user_id, &PlanId::from(plan)).await?;
        info!("User {user_id} moved to plan {plan}");
        Ok(UsageReport::from_account(&account))
    }
}
