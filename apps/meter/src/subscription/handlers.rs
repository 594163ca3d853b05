//! Axum route handlers for the usage and subscription API.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::state::AppState;
use crate::subscription::manager::UsageReport;
use crate::subscription::plan::Plan;
use crate::subscription::pricing::{plan_listings, PlanListing};
use crate::subscription::store::Account;
use crate::subscription::usage::{Action, UsageCounters};

// ────────────────────────────────────────────────────────────────────────────
// Request / Response types
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct UserIdQuery {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub user_id: Uuid,
    pub action: Action,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CheckResponse {
    pub action: Action,
    pub allowed: bool,
}

#[derive(Debug, Deserialize)]
pub struct UsageActionRequest {
    pub user_id: Uuid,
    pub action: Action,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CountersResponse {
    pub user_id: Uuid,
    pub counters: UsageCounters,
}

#[derive(Debug, Deserialize)]
pub struct UserIdRequest {
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub user_id: Uuid,
    #[serde(default = "default_plan")]
    pub plan: Plan,
}

fn default_plan() -> Plan {
    Plan::Free
}

#[derive(Debug, Deserialize)]
pub struct UpdatePlanRequest {
    pub user_id: Uuid,
    pub plan: Plan,
}

// ────────────────────────────────────────────────────────────────────────────
// Handlers
// ────────────────────────────────────────────────────────────────────────────

/// GET /api/v1/plans
pub async fn handle_list_plans() -> Json<Vec<PlanListing>> {
    Json(plan_listings())
}

/// POST /api/v1/accounts
///
/// Creates the usage row for a new user with both counters at zero.
pub async fn handle_create_account(
    State(state): State<AppState>,
    Json(req): Json<CreateAccountRequest>,
) -> Result<(StatusCode, Json<Account>), AppError> {
    let account = state
        .subscriptions
        .create_account(req.user_id, req.plan)
        .await?;
    Ok((StatusCode::CREATED, Json(account)))
}

/// GET /api/v1/usage?user_id=
pub async fn handle_get_usage(
    State(state): State<AppState>,
    Query(params): Query<UserIdQuery>,
) -> Result<Json<UsageReport>, AppError> {
    Ok(Json(state.subscriptions.get_usage(params.user_id).await?))
}

/// GET /api/v1/usage/check?user_id=&action=
///
/// Storage failures surface as 503 rather than a permissive answer.
pub async fn handle_check(
    State(state): State<AppState>,
    Query(params): Query<CheckQuery>,
) -> Result<Json<CheckResponse>, AppError> {
    let allowed = state
        .subscriptions
        .check_user_limits(params.user_id, params.action)
        .await?;
    Ok(Json(CheckResponse {
        action: params.action,
        allowed,
    }))
}

/// POST /api/v1/usage/increment
///
/// Records one completed metered action. Not idempotent: clients must not
/// blindly retry a request whose outcome is unknown.
pub async fn handle_increment(
    State(state): State<AppState>,
    Json(req): Json<UsageActionRequest>,
) -> Result<Json<CountersResponse>, AppError> {
    let counter = req.action.counter().ok_or_else(|| {
        AppError::Validation(format!("{:?} is not a metered action", req.action))
    })?;
    let counters = state
        .subscriptions
        .increment_usage(req.user_id, counter)
        .await?;
    Ok(Json(CountersResponse {
        user_id: req.user_id,
        counters,
    }))
}

/// POST /api/v1/usage/reset
pub async fn handle_reset(
    State(state): State<AppState>,
    Json(req): Json<UserIdRequest>,
) -> Result<Json<CountersResponse>, AppError> {
    let counters = state.subscriptions.reset_usage(req.user_id).await?;
    Ok(Json(CountersResponse {
        user_id: req.user_id,
        counters,
    }))
}

/// PUT /api/v1/subscription
pub async fn handle_update_plan(
    State(state): State<AppState>,
    Json(req): Json<UpdatePlanRequest>,
) -> Result<Json<UsageReport>, AppError> {
    Ok(Json(
        state.subscriptions.update_plan(req.user_id, req.plan).await?,
    ))
}
