//! Budget engine - adaptive allocation with feedback control
//!
//! History: bounded window of observed usage
//! Ratio: component splits shaped by task and learned factors
//! Period: time-boxed pools, recomputed at rollover
//! Alerts: threshold evaluation over cumulative period usage
//! Controller: per-model locked orchestration of the above

pub mod alerts;
pub mod controller;
pub mod history;
pub mod period;
pub mod ratio;
pub mod types;

pub use alerts::{AlertEngine, AlertFilter, AlertSeverity, AlertType, BudgetAlert};
pub use controller::AdaptiveBudgetController;
pub use history::{AllocationSample, UsageHistory, UsageTotals, SMOOTHING_ALPHA};
pub use period::{AllocationPeriodTracker, PeriodState};
pub use ratio::RatioAdjuster;
pub use types::{
    AdjustmentFactors, BudgetAllocation, BudgetStatsSnapshot, Clock, Component, ComponentBudgets,
    ManualClock, RolloverMetadata, SharedClock, SystemClock, TaskRequirements, TaskType,
    UsageRecord,
};
