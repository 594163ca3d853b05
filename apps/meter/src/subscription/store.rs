//! Usage store: the only place account counters are read or written.
//!
//! Every mutation is a single atomic step against the backing store. There is
//! no read-then-write path: `increment` adds to the stored value in place, so
//! N concurrent increments always advance a counter by exactly N.
//!
//! `AppState` carries an `Arc<dyn UsageStore>`; Postgres in production, the
//! in-memory map for local runs and tests.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::subscription::plan::PlanId;
use crate::subscription::usage::{Counter, UsageCounters};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("User {0} not found")]
    UserNotFound(Uuid),

    #[error("User {0} already exists")]
    AlreadyExists(Uuid),

    #[error("Counter for user {user_id} out of range: {value}")]
    InvalidCounter { user_id: Uuid, value: i64 },

    /// The increment was refused before anything was written.
    #[error("{counter:?} counter for user {user_id} is at its maximum")]
    CounterOverflow { user_id: Uuid, counter: Counter },

    #[error("Storage unavailable: {0}")]
    Unavailable(#[source] sqlx::Error),

    #[error("Storage error: {0}")]
    Database(#[source] sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        if is_connectivity_error(&err) {
            StoreError::Unavailable(err)
        } else {
            StoreError::Database(err)
        }
    }
}

/// Errors meaning the store could not be reached, as opposed to the store
/// answering with a failure.
fn is_connectivity_error(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed
    )
}

/// A user's plan and counters as last written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    pub user_id: Uuid,
    pub plan: PlanId,
    pub counters: UsageCounters,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Creates an account with zeroed counters.
    async fn create_account(&self, user_id: Uuid, plan: &PlanId) -> Result<Account, StoreError>;

    async fn fetch_account(&self, user_id: Uuid) -> Result<Option<Account>, StoreError>;

    /// Atomically adds `by` to one counter and returns the counters after the write.
    async fn increment(
        &self,
        user_id: Uuid,
        counter: Counter,
        by: u32,
    ) -> Result<UsageCounters, StoreError>;

    /// Administrative reset of both counters to zero.
    async fn reset(&self, user_id: Uuid) -> Result<UsageCounters, StoreError>;

    /// Changes the plan. Counters are left exactly as they are.
    async fn set_plan(&self, user_id: Uuid, plan: &PlanId) -> Result<Account, StoreError>;

    /// Short backend label for logs.
    fn backend(&self) -> &'static str;
}

/// Process-local store. Each operation holds the map lock for its whole
/// read-modify-write, which is what makes `increment` atomic here.
#[derive(Default)]
pub struct MemoryUsageStore {
    accounts: Mutex<HashMap<Uuid, Account>>,
}

impl MemoryUsageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Uuid, Account>> {
        self.accounts.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Overwrites counters wholesale. Only tests use this, to model a
    /// non-atomic writer or to seed a counter.
    #[cfg(test)]
    pub(crate) fn overwrite_counters(&self, user_id: Uuid, counters: UsageCounters) {
        if let Some(account) = self.lock().get_mut(&user_id) {
            account.counters = counters;
        }
    }
}

#[async_trait]
impl UsageStore for MemoryUsageStore {
    async fn create_account(&self, user_id: Uuid, plan: &PlanId) -> Result<Account, StoreError> {
        let mut accounts = self.lock();
        if accounts.contains_key(&user_id) {
            return Err(StoreError::AlreadyExists(user_id));
        }
        let account = Account {
            user_id,
            plan: plan.clone(),
            counters: UsageCounters::default(),
            updated_at: Utc::now(),
        };
        accounts.insert(user_id, account.clone());
        Ok(account)
    }

    async fn fetch_account(&self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        Ok(self.lock().get(&user_id).cloned())
    }

    async fn increment(
        &self,
        user_id: Uuid,
        counter: Counter,
        by: u32,
    ) -> Result<UsageCounters, StoreError> {
        let mut accounts = self.lock();
        let account = accounts
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;

        let next = account
            .counters
            .get(counter)
            .checked_add(by)
            .ok_or(StoreError::CounterOverflow { user_id, counter })?;
        *account.counters.get_mut(counter) = next;
        account.updated_at = Utc::now();
        Ok(account.counters)
    }

    async fn reset(&self, user_id: Uuid) -> Result<UsageCounters, StoreError> {
        let mut accounts = self.lock();
        let account = accounts
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        account.counters = UsageCounters::default();
        account.updated_at = Utc::now();
        Ok(account.counters)
    }

    async fn set_plan(&self, user_id: Uuid, plan: &PlanId) -> Result<Account, StoreError> {
        let mut accounts = self.lock();
        let account = accounts
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        account.plan = plan.clone();
        account.updated_at = Utc::now();
        Ok(account.clone())
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Store whose every call fails as if the database were unreachable.
#[cfg(test)]
pub(crate) struct UnreachableStore;

#[cfg(test)]
#[async_trait]
impl UsageStore for UnreachableStore {
    async fn create_account(&self, _: Uuid, _: &PlanId) -> Result<Account, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn fetch_account(&self, _: Uuid) -> Result<Option<Account>, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn increment(&self, _: Uuid, _: Counter, _: u32) -> Result<UsageCounters, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn reset(&self, _: Uuid) -> Result<UsageCounters, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    async fn set_plan(&self, _: Uuid, _: &PlanId) -> Result<Account, StoreError> {
        Err(sqlx::Error::PoolTimedOut.into())
    }

    fn backend(&self) -> &'static str {
        "unreachable"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tokio::sync::Barrier;

    use super::*;
    use crate::subscription::plan::Plan;

    async fn store_with_user() -> (Arc<MemoryUsageStore>, Uuid) {
        let store = Arc::new(MemoryUsageStore::new());
        let user_id = Uuid::new_v4();
        store
            .create_account(user_id, &PlanId::from(Plan::Free))
            .await
            .unwrap();
        (store, user_id)
    }

    #[tokio::test]
    async fn test_new_account_starts_at_zero() {
        let (store, user_id) = store_with_user().await;
        let account = store.fetch_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.counters, UsageCounters::default());
        assert_eq!(account.plan, PlanId::from(Plan::Free));
    }

    #[tokio::test]
    async fn test_duplicate_account_rejected() {
        let (store, user_id) = store_with_user().await;
        let err = store
            .create_account(user_id, &PlanId::from(Plan::Monthly))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == user_id));
    }

    #[tokio::test]
    async fn test_increment_moves_one_counter_by_one() {
        let (store, user_id) = store_with_user().await;
        let after = store
            .increment(user_id, Counter::AiGenerations, 1)
            .await
            .unwrap();
        assert_eq!(after.ai_generations_used, 1);
        assert_eq!(after.exports_used, 0);
    }

    #[tokio::test]
    async fn test_increment_missing_user() {
        let store = MemoryUsageStore::new();
        let missing = Uuid::new_v4();
        let err = store
            .increment(missing, Counter::Exports, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(id) if id == missing));
    }

    #[tokio::test]
    async fn test_increment_overflow_is_an_error() {
        let (store, user_id) = store_with_user().await;
        store.overwrite_counters(
            user_id,
            UsageCounters {
                ai_generations_used: u32::MAX,
                exports_used: 0,
            },
        );
        let err = store
            .increment(user_id, Counter::AiGenerations, 1)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StoreError::CounterOverflow {
                counter: Counter::AiGenerations,
                ..
            }
        ));

        let account = store.fetch_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.counters.ai_generations_used, u32::MAX);
    }

    #[test]
    fn test_only_connectivity_errors_are_unavailable() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        assert!(matches!(
            StoreError::from(sqlx::Error::Io(io)),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolTimedOut),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::PoolClosed),
            StoreError::Unavailable(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::RowNotFound),
            StoreError::Database(_)
        ));
        assert!(matches!(
            StoreError::from(sqlx::Error::ColumnNotFound("exports_used".to_string())),
            StoreError::Database(_)
        ));
    }

    #[tokio::test]
    async fn test_set_plan_keeps_counters() {
        let (store, user_id) = store_with_user().await;
        store.increment(user_id, Counter::Exports, 1).await.unwrap();
        let account = store
            .set_plan(user_id, &PlanId::from(Plan::Yearly))
            .await
            .unwrap();
        assert_eq!(account.plan, PlanId::from(Plan::Yearly));
        assert_eq!(account.counters.exports_used, 1);
    }

    #[tokio::test]
    async fn test_reset_zeroes_both_counters() {
        let (store, user_id) = store_with_user().await;
        store.increment(user_id, Counter::Exports, 2).await.unwrap();
        store
            .increment(user_id, Counter::AiGenerations, 5)
            .await
            .unwrap();
        assert_eq!(store.reset(user_id).await.unwrap(), UsageCounters::default());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_increments_are_not_lost() {
        const N: u32 = 64;
        let (store, user_id) = store_with_user().await;
        let barrier = Arc::new(Barrier::new(N as usize));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    barrier.wait().await;
                    store
                        .increment(user_id, Counter::AiGenerations, 1)
                        .await
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let account = store.fetch_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.counters.ai_generations_used, N);
    }

    /// Every writer reads before any writer writes, so a read-then-write
    /// increment loses all but one update.
    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_read_then_write_increment_loses_updates() {
        const N: u32 = 16;
        let (store, user_id) = store_with_user().await;
        let barrier = Arc::new(Barrier::new(N as usize));

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let store = Arc::clone(&store);
                let barrier = Arc::clone(&barrier);
                tokio::spawn(async move {
                    let read = store.fetch_account(user_id).await.unwrap().unwrap();
                    barrier.wait().await;
                    let mut counters = read.counters;
                    counters.ai_generations_used += 1;
                    store.overwrite_counters(user_id, counters);
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let account = store.fetch_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.counters.ai_generations_used, 1);
        assert_ne!(account.counters.ai_generations_used, N);
    }
}
