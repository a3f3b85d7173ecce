//! tokenflow: adaptive token budget allocation for LLM workloads
//!
//! Allocates a periodically replenished token budget across models and,
//! within a request, across the four prompt components (system, context,
//! instruction, response). Observed usage feeds back into future
//! allocations: component splits drift toward measured utilization via
//! exponential smoothing, and period pools grow or shrink with recent
//! success rates. Threshold breaches raise alerts that are never
//! retracted.
//!
//! Token counting, cost tables, and the surfaces that invoke the
//! controller are the caller's business; this crate only turns usage
//! events and per-model profiles into budget decisions and alerts.

pub mod budget;
pub mod config;
pub mod error;
pub mod export;
pub mod profile;

pub use budget::{
    AdaptiveBudgetController, AdjustmentFactors, AlertEngine, AlertFilter, AlertSeverity,
    AlertType, AllocationPeriodTracker, BudgetAlert, BudgetAllocation, BudgetStatsSnapshot, Clock,
    Component, ComponentBudgets, ManualClock, PeriodState, RatioAdjuster, RolloverMetadata,
    SharedClock, SystemClock, TaskRequirements, TaskType, UsageHistory, UsageRecord, UsageTotals,
};
pub use config::{BudgetConfig, ControllerSettings};
pub use error::{BudgetError, Result};
pub use export::{AlertExportRow, ExportFormat, MetricsExportRow};
pub use profile::{ComponentRatios, ModelProfile, UsageThresholds};
