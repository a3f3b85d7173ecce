//! Core data objects shared across the budget engine.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{BudgetError, Result};

/// One of the four prompt sections that share a request's token budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Component {
    System,
    Context,
    Instruction,
    Response,
}

impl Component {
    pub const ALL: [Component; 4] = [
        Component::System,
        Component::Context,
        Component::Instruction,
        Component::Response,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Component::System => "system",
            Component::Context => "context",
            Component::Instruction => "instruction",
            Component::Response => "response",
        }
    }
}

/// Task categories that shift the component split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Summarization,
    Qa,
    Chat,
    #[default]
    General,
}

impl TaskType {
    /// Map a task name to a known category. Unknown names get no special
    /// treatment and fall through to `General`.
    pub fn from_name(name: &str) -> Self {
        match name {
            "summarization" => TaskType::Summarization,
            "qa" => TaskType::Qa,
            "chat" => TaskType::Chat,
            _ => TaskType::General,
        }
    }
}

/// Caller-supplied knobs for a single budget request.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TaskRequirements {
    #[serde(default)]
    pub detailed_response: bool,
    #[serde(default)]
    pub minimal_context: bool,
}

/// Integer token budgets per component. Derived from a total by the
/// ratio adjuster; the rounding remainder always lands on `response`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentBudgets {
    pub system: u64,
    pub context: u64,
    pub instruction: u64,
    pub response: u64,
}

impl ComponentBudgets {
    pub fn get(&self, component: Component) -> u64 {
        match component {
            Component::System => self.system,
            Component::Context => self.context,
            Component::Instruction => self.instruction,
            Component::Response => self.response,
        }
    }

    pub fn set(&mut self, component: Component, value: u64) {
        match component {
            Component::System => self.system = value,
            Component::Context => self.context = value,
            Component::Instruction => self.instruction = value,
            Component::Response => self.response = value,
        }
    }

    pub fn total(&self) -> u64 {
        self.system + self.context + self.instruction + self.response
    }
}

/// Smoothed per-component multipliers derived from observed utilization.
/// All factors start at 1.0 and move by exponential smoothing only.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentFactors {
    pub system: f64,
    pub context: f64,
    pub instruction: f64,
    pub response: f64,
}

impl Default for AdjustmentFactors {
    fn default() -> Self {
        Self {
            system: 1.0,
            context: 1.0,
            instruction: 1.0,
            response: 1.0,
        }
    }
}

impl AdjustmentFactors {
    pub fn get(&self, component: Component) -> f64 {
        match component {
            Component::System => self.system,
            Component::Context => self.context,
            Component::Instruction => self.instruction,
            Component::Response => self.response,
        }
    }

    pub fn set(&mut self, component: Component, value: f64) {
        match component {
            Component::System => self.system = value,
            Component::Context => self.context = value,
            Component::Instruction => self.instruction = value,
            Component::Response => self.response = value,
        }
    }
}

/// An immutable observation of one completed request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub model: String,
    pub timestamp: DateTime<Utc>,
    pub token_count: u64,
    pub cost: f64,
    /// Outcome signal in [0, 1].
    pub success_rate: f64,
    /// Quality signal in [0, 1].
    pub quality_score: f64,
    /// Per-component actual consumption. Absent components count as 0 for
    /// aggregation but are excluded from utilization ratios.
    #[serde(default)]
    pub component_actual: BTreeMap<Component, u64>,
    /// Optional idempotency key; duplicate ids within the retained window
    /// are dropped.
    #[serde(default)]
    pub record_id: Option<Uuid>,
}

impl UsageRecord {
    /// A neutral record: full success, full quality, no component detail.
    pub fn new(model: impl Into<String>, timestamp: DateTime<Utc>, token_count: u64, cost: f64) -> Self {
        Self {
            model: model.into(),
            timestamp,
            token_count,
            cost,
            success_rate: 1.0,
            quality_score: 1.0,
            component_actual: BTreeMap::new(),
            record_id: None,
        }
    }

    pub fn with_outcome(mut self, success_rate: f64, quality_score: f64) -> Self {
        self.success_rate = success_rate;
        self.quality_score = quality_score;
        self
    }

    pub fn with_component_actual(mut self, component: Component, tokens: u64) -> Self {
        self.component_actual.insert(component, tokens);
        self
    }

    pub fn with_record_id(mut self, id: Uuid) -> Self {
        self.record_id = Some(id);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.success_rate) {
            return Err(BudgetError::InvalidBudgetRequest(format!(
                "success_rate {} outside [0, 1]",
                self.success_rate
            )));
        }
        if !(0.0..=1.0).contains(&self.quality_score) {
            return Err(BudgetError::InvalidBudgetRequest(format!(
                "quality_score {} outside [0, 1]",
                self.quality_score
            )));
        }
        if !self.cost.is_finite() || self.cost < 0.0 {
            return Err(BudgetError::InvalidBudgetRequest(format!(
                "cost {} must be finite and non-negative",
                self.cost
            )));
        }
        Ok(())
    }
}

/// Provenance recorded when a period rolls over. The seed allocation has
/// no metadata.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RolloverMetadata {
    pub previous_budget: u64,
    pub adjustment_factor: f64,
    /// `None` when the completed period had no recorded usage.
    pub success_rate: Option<f64>,
    pub daily_usage: Option<f64>,
}

/// A time-boxed pool of tokens for one model, plus the per-request
/// component split derived from it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAllocation {
    pub total_budget: u64,
    pub used_budget: u64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub component_budgets: ComponentBudgets,
    pub metadata: Option<RolloverMetadata>,
}

impl BudgetAllocation {
    pub fn remaining_budget(&self) -> u64 {
        self.total_budget.saturating_sub(self.used_budget)
    }

    pub fn consume(&mut self, tokens: u64) {
        self.used_budget = self.used_budget.saturating_add(tokens);
    }
}

/// Point-in-time view of one model's budget and usage.
///
/// Window aggregates are `None` when the recent window holds no records,
/// so callers can tell "no data" apart from "zero usage".
#[derive(Debug, Clone, Serialize)]
pub struct BudgetStatsSnapshot {
    pub model: String,
    pub total_budget: u64,
    pub used_budget: u64,
    pub remaining_budget: u64,
    pub allocation_period_days: f64,
    pub avg_daily_usage: Option<f64>,
    pub success_rate: Option<f64>,
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub average_tokens_per_request: f64,
    pub peak_tokens: u64,
}

/// Time source seam so period expiry can be driven deterministically in
/// tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

pub type SharedClock = Arc<dyn Clock>;

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced clock for tests and simulations.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, delta: Duration) {
        let mut now = self.now.lock().unwrap();
        *now += delta;
    }

    pub fn set(&self, at: DateTime<Utc>) {
        let mut now = self.now.lock().unwrap();
        *now = at;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}
