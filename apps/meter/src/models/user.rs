use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Row shape of the `users` table as far as usage metering is concerned.
#[derive(Debug, Clone, FromRow)]
pub struct UserRow {
    pub id: Uuid,
    pub subscription_status: String,
    pub ai_generations_used: i64,
    pub exports_used: i64,
    pub updated_at: DateTime<Utc>,
}

/// Counter columns returned by an update.
#[derive(Debug, Clone, Copy, FromRow)]
pub struct CounterRow {
    pub ai_generations_used: i64,
    pub exports_used: i64,
}
