//! Plan catalog: static limits per subscription plan.
//!
//! The catalog is compiled into the binary and shared read-only by every
//! request. Changing a limit is a deploy, not a runtime operation.
//!
//! `cancelled` deliberately has no entry: lookups for it return `None` and
//! every consumer treats that as zero entitlement.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Wire and storage sentinel for "no limit".
pub const UNLIMITED: i64 = -1;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("unknown plan '{0}'")]
    UnknownPlan(String),

    #[error("invalid limit {0}: expected -1 or a non-negative count")]
    InvalidLimit(i64),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Plan {
    Free,
    Monthly,
    Yearly,
    Cancelled,
}

impl Plan {
    pub const ALL: [Plan; 4] = [Plan::Free, Plan::Monthly, Plan::Yearly, Plan::Cancelled];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Monthly => "monthly",
            Plan::Yearly => "yearly",
            Plan::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Plan {
    type Err = PlanError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "monthly" => Ok(Plan::Monthly),
            "yearly" => Ok(Plan::Yearly),
            "cancelled" => Ok(Plan::Cancelled),
            other => Err(PlanError::UnknownPlan(other.to_string())),
        }
    }
}

/// A plan identifier as stored on the account row.
///
/// Stored values are not guaranteed to name a known [`Plan`], so the raw text
/// is kept around: an unrecognised identifier is reported back verbatim and
/// resolves to no limits at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlanId(String);

impl PlanId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn plan(&self) -> Option<Plan> {
        self.0.parse().ok()
    }

    /// Catalog limits for this identifier; `None` means fail closed.
    pub fn limits(&self) -> Option<&'static Limits> {
        self.plan().and_then(limits_for)
    }
}

impl From<Plan> for PlanId {
    fn from(plan: Plan) -> Self {
        Self(plan.as_str().to_string())
    }
}

impl fmt::Display for PlanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    Unlimited,
    Finite(u32),
}

impl Limit {
    /// True while `used` is still under the limit.
    pub fn allows(self, used: u32) -> bool {
        match self {
            Limit::Unlimited => true,
            Limit::Finite(max) => used < max,
        }
    }

    pub fn as_i64(self) -> i64 {
        match self {
            Limit::Unlimited => UNLIMITED,
            Limit::Finite(max) => i64::from(max),
        }
    }

    pub fn from_i64(raw: i64) -> Result<Self, PlanError> {
        if raw == UNLIMITED {
            return Ok(Limit::Unlimited);
        }
        u32::try_from(raw)
            .map(Limit::Finite)
            .map_err(|_| PlanError::InvalidLimit(raw))
    }
}

impl Serialize for Limit {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.as_i64())
    }
}

impl<'de> Deserialize<'de> for Limit {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = i64::deserialize(deserializer)?;
        Limit::from_i64(raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limits {
    pub ai_generations: Limit,
    pub exports: Limit,
    pub public_profiles: Limit,
}

static FREE_LIMITS: Limits = Limits {
    ai_generations: Limit::Finite(2),
    exports: Limit::Finite(1),
    public_profiles: Limit::Finite(1),
};

static PAID_LIMITS: Limits = Limits {
    ai_generations: Limit::Unlimited,
    exports: Limit::Unlimited,
    public_profiles: Limit::Unlimited,
};

/// Looks up the catalog entry for `plan`.
pub fn limits_for(plan: Plan) -> Option<&'static Limits> {
    match plan {
        Plan::Free => Some(&FREE_LIMITS),
        Plan::Monthly | Plan::Yearly => Some(&PAID_LIMITS),
        // No catalog entry; see module docs.
        Plan::Cancelled => None,
    }
}
