use crate::subscription::plan::PlanId;
use crate::subscription::usage::{Action, UsageCounters};

/// Decides whether `action` is allowed for a user on `plan` with `counters`.
///
/// Pure: same inputs, same answer. Unmetered actions are allowed before the
/// catalog is consulted; metered actions on a plan with no catalog entry are
/// denied.
pub fn can_perform(plan: &PlanId, counters: &UsageCounters, action: Action) -> bool {
    let Some(counter) = action.counter() else {
        return true;
    };

    match plan.limits() {
        Some(limits) => counter.limit(limits).allows(counters.get(counter)),
        None => false,
    }
}
