// Usage-metered entitlements: plan catalog, per-user counters, the allow/deny
// decision and the atomic increment that records a metered action.

pub mod entitlement;
pub mod handlers;
pub mod manager;
pub mod pg_store;
pub mod plan;
pub mod pricing;
pub mod store;
pub mod usage;
