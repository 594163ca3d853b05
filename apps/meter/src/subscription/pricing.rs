use serde::Serialize;

use crate::subscription::plan::{limits_for, Limits, Plan};

/// List price of a paid plan. Amounts are in the currency's minor unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Price {
    pub id: &'static str,
    pub amount: u32,
    pub currency: &'static str,
    pub interval: &'static str,
    pub name: &'static str,
}

static MONTHLY_PRICE: Price = Price {
    id: "price_monthly",
    amount: 1499,
    currency: "usd",
    interval: "month",
    name: "Monthly",
};

static YEARLY_PRICE: Price = Price {
    id: "price_yearly",
    amount: 9900,
    currency: "usd",
    interval: "year",
    name: "Yearly",
};

pub fn price_for(plan: Plan) -> Option<&'static Price> {
    match plan {
        Plan::Monthly => Some(&MONTHLY_PRICE),
        Plan::Yearly => Some(&YEARLY_PRICE),
        Plan::Free | Plan::Cancelled => None,
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PlanListing {
    pub plan: Plan,
    /// `null` when the plan has no catalog entry.
    pub limits: Option<Limits>,
    pub price: Option<Price>,
}

/// Every plan with its limits and price, in catalog order.
pub fn plan_listings() -> Vec<PlanListing> {
    Plan::ALL
        .iter()
        .map(|&plan| PlanListing {
            plan,
            limits: limits_for(plan).copied(),
            price: price_for(plan).copied(),
        })
        .collect()
}
