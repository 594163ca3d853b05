use crate::subscription::manager::SubscriptionManager;

/// Shared application state injected into all route handlers via Axum extractors.
#[derive(Clone)]
pub struct AppState {
    /// Entitlement checks and usage bookkeeping over the configured store.
    pub subscriptions: SubscriptionManager,
}
