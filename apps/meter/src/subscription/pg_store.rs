use async_trait::async_trait;
use sqlx::PgPool;
use tracing::debug;
use uuid::Uuid;

use crate::models::user::{CounterRow, UserRow};
use crate::subscription::plan::PlanId;
use crate::subscription::store::{Account, StoreError, UsageStore};
use crate::subscription::usage::{Counter, UsageCounters};

const USER_COLUMNS: &str = "id, subscription_status, ai_generations_used, exports_used, updated_at";

/// Postgres-backed usage store over the `users` table.
#[derive(Clone)]
pub struct PgUsageStore {
    pool: PgPool,
}

impl PgUsageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

fn to_u32(user_id: Uuid, value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::InvalidCounter { user_id, value })
}

fn counters_from_row(user_id: Uuid, row: CounterRow) -> Result<UsageCounters, StoreError> {
    Ok(UsageCounters {
        ai_generations_used: to_u32(user_id, row.ai_generations_used)?,
        exports_used: to_u32(user_id, row.exports_used)?,
    })
}

fn account_from_row(row: UserRow) -> Result<Account, StoreError> {
    let counters = counters_from_row(
        row.id,
        CounterRow {
            ai_generations_used: row.ai_generations_used,
            exports_used: row.exports_used,
        },
    )?;
    Ok(Account {
        user_id: row.id,
        plan: PlanId::new(row.subscription_status),
        counters,
        updated_at: row.updated_at,
    })
}

#[async_trait]
impl UsageStore for PgUsageStore {
    async fn create_account(&self, user_id: Uuid, plan: &PlanId) -> Result<Account, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            INSERT INTO users (id, subscription_status)
            VALUES ($1, $2)
            ON CONFLICT (id) DO NOTHING
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(plan.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(StoreError::AlreadyExists(user_id))?;
        account_from_row(row)
    }

    async fn fetch_account(&self, user_id: Uuid) -> Result<Option<Account>, StoreError> {
        let row: Option<UserRow> =
            sqlx::query_as(&format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1"))
                .bind(user_id)
                .fetch_optional(&self.pool)
                .await?;

        row.map(account_from_row).transpose()
    }

    async fn increment(
        &self,
        user_id: Uuid,
        counter: Counter,
        by: u32,
    ) -> Result<UsageCounters, StoreError> {
        // Single-statement increment: the database applies `col + $2` under the
        // row lock, so concurrent callers never overwrite each other. The
        // column's upper-bound CHECK rejects an overflowing UPDATE whole.
        let column = counter.column();
        let row: Option<CounterRow> = sqlx::query_as(&format!(
            r#"
            UPDATE users
            SET {column} = {column} + $2, updated_at = now()
            WHERE id = $1
            RETURNING ai_generations_used, exports_used
            "#
        ))
        .bind(user_id)
        .bind(i64::from(by))
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_check_violation() => {
                StoreError::CounterOverflow { user_id, counter }
            }
            e => StoreError::from(e),
        })?;

        let row = row.ok_or(StoreError::UserNotFound(user_id))?;
        debug!("Incremented {column} by {by} for user {user_id}");
        counters_from_row(user_id, row)
    }

    async fn reset(&self, user_id: Uuid) -> Result<UsageCounters, StoreError> {
        let row: Option<CounterRow> = sqlx::query_as(
            r#"
            UPDATE users
            SET ai_generations_used = 0, exports_used = 0, updated_at = now()
            WHERE id = $1
            RETURNING ai_generations_used, exports_used
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(StoreError::UserNotFound(user_id))?;
        counters_from_row(user_id, row)
    }

    async fn set_plan(&self, user_id: Uuid, plan: &PlanId) -> Result<Account, StoreError> {
        let row: Option<UserRow> = sqlx::query_as(&format!(
            r#"
            UPDATE users
            SET subscription_status = $2, updated_at = now()
            WHERE id = $1
            RETURNING {USER_COLUMNS}
            "#
        ))
        .bind(user_id)
        .bind(plan.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let row = row.ok_or(StoreError::UserNotFound(user_id))?;
        account_from_row(row)
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;

    use super::*;
    use crate::db::create_pool;
    use crate::subscription::plan::Plan;

    /// Connects to the database named by `DATABASE_URL` and applies migrations.
    ///
    /// Run with: DATABASE_URL=postgres://... cargo test -p meter -- --ignored
    async fn live_store() -> PgUsageStore {
        let url = std::env::var("DATABASE_URL")
            .expect("DATABASE_URL must be set for --ignored tests");
        PgUsageStore::new(create_pool(&url).await.unwrap())
    }

    async fn live_account(store: &PgUsageStore, plan: Plan) -> Uuid {
        let user_id = Uuid::new_v4();
        store
            .create_account(user_id, &PlanId::from(plan))
            .await
            .unwrap();
        user_id
    }

    #[test]
    fn test_negative_stored_counter_is_rejected() {
        let user_id = Uuid::new_v4();
        let err = counters_from_row(
            user_id,
            CounterRow {
                ai_generations_used: -1,
                exports_used: 0,
            },
        )
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidCounter { value: -1, .. }));
    }

    #[test]
    fn test_unknown_status_survives_row_mapping() {
        let now = Utc::now();
        let row = UserRow {
            id: Uuid::new_v4(),
            subscription_status: "trial".to_string(),
            ai_generations_used: 3,
            exports_used: 1,
            updated_at: now,
        };
        let account = account_from_row(row).unwrap();
        assert_eq!(account.plan.as_str(), "trial");
        assert_eq!(account.counters.ai_generations_used, 3);
        assert!(account.plan.limits().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    #[ignore]
    async fn test_pg_concurrent_increments_are_not_lost() {
        const N: u32 = 32;
        let store = Arc::new(live_store().await);
        let user_id = live_account(&store, Plan::Free).await;

        let handles: Vec<_> = (0..N)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move {
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
        assert_eq!(account.counters.exports_used, 0);
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_create_account_conflict() {
        let store = live_store().await;
        let user_id = live_account(&store, Plan::Free).await;
        let err = store
            .create_account(user_id, &PlanId::from(Plan::Monthly))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists(id) if id == user_id));

        let account = store.fetch_account(user_id).await.unwrap().unwrap();
        assert_eq!(account.plan, PlanId::from(Plan::Free));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_reset_and_set_plan() {
        let store = live_store().await;
        let user_id = live_account(&store, Plan::Free).await;
        store.increment(user_id, Counter::Exports, 3).await.unwrap();

        let account = store
            .set_plan(user_id, &PlanId::from(Plan::Yearly))
            .await
            .unwrap();
        assert_eq!(account.counters.exports_used, 3);

        assert_eq!(store.reset(user_id).await.unwrap(), UsageCounters::default());
        assert!(matches!(
            store.reset(Uuid::new_v4()).await,
            Err(StoreError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    #[ignore]
    async fn test_pg_overflowing_increment_writes_nothing() {
        let store = live_store().await;
        let user_id = live_account(&store, Plan::Monthly).await;
        sqlx::query("UPDATE users SET ai_generations_used = 4294967295 WHERE id = $1")
            .bind(user_id)
            .execute(&store.pool)
            .await
            .unwrap();

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
}
