use serde::{Deserialize, Serialize};

use crate::subscription::plan::{Limit, Limits};

/// An action a user asks to perform that may be gated by their plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    AiGeneration,
    Export,
    /// Viewing a public profile is never metered.
    ProfileView,
}

impl Action {
    /// The usage counter this action draws from, if it is metered.
    pub fn counter(self) -> Option<Counter> {
        match self {
            Action::AiGeneration => Some(Counter::AiGenerations),
            Action::Export => Some(Counter::Exports),
            Action::ProfileView => None,
        }
    }
}

/// One of the per-user metered counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    AiGenerations,
    Exports,
}

impl Counter {
    /// Column backing this counter on the `users` table.
    pub fn column(self) -> &'static str {
        match self {
            Counter::AiGenerations => "ai_generations_used",
            Counter::Exports => "exports_used",
        }
    }

    pub fn limit(self, limits: &Limits) -> Limit {
        match self {
            Counter::AiGenerations => limits.ai_generations,
            Counter::Exports => limits.exports,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageCounters {
    pub ai_generations_used: u32,
    pub exports_used: u32,
}

impl UsageCounters {
    pub fn get(&self, counter: Counter) -> u32 {
        match counter {
            Counter::AiGenerations => self.ai_generations_used,
            Counter::Exports => self.exports_used,
        }
    }

    pub fn get_mut(&mut self, counter: Counter) -> &mut u32 {
        match counter {
            Counter::AiGenerations => &mut self.ai_generations_used,
            Counter::Exports => &mut self.exports_used,
        }
    }
}
