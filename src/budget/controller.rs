//! Orchestration: per-model locked state, the public budget API, and the
//! wiring between history, alerts, period tracking, and ratio adjustment.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

use crate::budget::alerts::{AlertEngine, AlertFilter, BudgetAlert};
use crate::budget::history::{UsageHistory, UsageTotals};
use crate::budget::period::AllocationPeriodTracker;
use crate::budget::ratio::RatioAdjuster;
use crate::budget::types::{
    AdjustmentFactors, BudgetAllocation, BudgetStatsSnapshot, ComponentBudgets, SharedClock,
    SystemClock, TaskRequirements, TaskType, UsageRecord,
};
use crate::config::{BudgetConfig, ControllerSettings};
use crate::error::{BudgetError, Result};
use crate::export::{self, AlertExportRow, MetricsExportRow};
use crate::profile::ModelProfile;

/// Everything the controller tracks for one model. Guarded by a single
/// mutex so usage recording, threshold evaluation, and period rollover
/// are serialized per model; different models never contend.
#[derive(Debug)]
struct ModelState {
    profile: ModelProfile,
    history: UsageHistory,
    tracker: AllocationPeriodTracker,
    factors: AdjustmentFactors,
    totals: UsageTotals,
    /// Component split handed out by the most recent budget calculation,
    /// paired with the next usage record for utilization tracking.
    pending_allocation: Option<ComponentBudgets>,
}

/// Allocates token budgets across models and prompt components, learns
/// from observed usage, and raises threshold alerts.
///
/// Shared freely across worker threads; all methods take `&self`.
#[derive(Debug)]
pub struct AdaptiveBudgetController {
    models: RwLock<HashMap<String, Arc<Mutex<ModelState>>>>,
    alerts: Mutex<AlertEngine>,
    settings: ControllerSettings,
    clock: SharedClock,
}

impl AdaptiveBudgetController {
    pub fn new(settings: ControllerSettings) -> Result<Self> {
        Self::with_clock(settings, Arc::new(SystemClock))
    }

    pub fn with_clock(settings: ControllerSettings, clock: SharedClock) -> Result<Self> {
        settings.validate()?;
        let max_alerts = settings.max_alerts;
        Ok(Self {
            models: RwLock::new(HashMap::new()),
            alerts: Mutex::new(AlertEngine::new(max_alerts)),
            settings,
            clock,
        })
    }

    /// Build a controller from a loaded configuration, registering every
    /// profile in the model table.
    pub fn from_config(config: BudgetConfig) -> Result<Self> {
        let controller = Self::new(config.controller)?;
        for (model, profile) in config.models {
            controller.load_model_profile(&model, profile)?;
        }
        Ok(controller)
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Register a model or replace its profile. Replacement does not
    /// rescale the live allocation; the new limits apply from the next
    /// calculation onward.
    pub fn load_model_profile(&self, model: &str, profile: ModelProfile) -> Result<()> {
        profile.validate()?;

        let mut models = self.models.write().expect("model registry lock poisoned");
        if let Some(state) = models.get(model) {
            let mut state = state.lock().expect("model state lock poisoned");
            state.profile = profile;
            tracing::info!(model, "Replaced model profile");
            return Ok(());
        }

        let factors = AdjustmentFactors::default();
        let tracker = AllocationPeriodTracker::new(
            &profile,
            &factors,
            self.settings.initial_budget,
            self.settings.allocation_period(),
            self.settings.min_budget,
            self.settings.max_budget,
            self.clock.now(),
        )?;
        let state = ModelState {
            profile,
            history: UsageHistory::new(self.settings.max_history_records, self.settings.retention()),
            tracker,
            factors,
            totals: UsageTotals::default(),
            pending_allocation: None,
        };
        models.insert(model.to_string(), Arc::new(Mutex::new(state)));
        tracing::info!(model, "Loaded model profile");
        Ok(())
    }

    fn state_for(&self, model: &str) -> Result<Arc<Mutex<ModelState>>> {
        let models = self.models.read().expect("model registry lock poisoned");
        models
            .get(model)
            .cloned()
            .ok_or_else(|| BudgetError::UnknownModel(model.to_string()))
    }

    /// Registered model names, sorted.
    pub fn models(&self) -> Vec<String> {
        let models = self.models.read().expect("model registry lock poisoned");
        let mut names: Vec<String> = models.keys().cloned().collect();
        names.sort();
        names
    }

    /// Compute a request-scoped allocation. The requested size is clamped
    /// to `min(profile.max_tokens, context_length)`; the returned
    /// allocation carries the live pool's period bounds but consuming from
    /// the pool happens only through `record_usage`.
    pub fn calculate_budget(
        &self,
        model: &str,
        task: TaskType,
        requirements: TaskRequirements,
        context_length: Option<u64>,
    ) -> Result<BudgetAllocation> {
        let state = self.state_for(model)?;
        let mut state = state.lock().expect("model state lock poisoned");
        let now = self.clock.now();

        let ModelState {
            profile,
            history,
            tracker,
            factors,
            ..
        } = &mut *state;
        tracker.check_rollover(now, history, factors, profile)?;

        let requested = context_length
            .unwrap_or(profile.max_tokens)
            .min(profile.max_tokens);
        if requested == 0 {
            return Err(BudgetError::InvalidBudgetRequest(format!(
                "requested context length of 0 tokens for model {}",
                model
            )));
        }

        let split = RatioAdjuster::compute_split(profile, task, &requirements, factors, requested)?;
        state.pending_allocation = Some(split);

        let pool = state.tracker.current();
        Ok(BudgetAllocation {
            total_budget: requested,
            used_budget: 0,
            period_start: pool.period_start,
            period_end: pool.period_end,
            component_budgets: split,
            metadata: None,
        })
    }

    /// Report a completed request's consumption. Appends to history,
    /// charges the period pool, evaluates thresholds, rolls the period
    /// over if it elapsed, and folds utilization into the adjustment
    /// factors. Records with an already-seen idempotency key are dropped.
    pub fn record_usage(&self, model: &str, record: UsageRecord) -> Result<()> {
        record.validate()?;
        if record.model != model {
            return Err(BudgetError::InvalidBudgetRequest(format!(
                "record for model {} submitted under model {}",
                record.model, model
            )));
        }

        let state = self.state_for(model)?;
        let mut state = state.lock().expect("model state lock poisoned");
        let now = self.clock.now();

        let allocated = state.pending_allocation.take();
        let token_count = record.token_count;
        let cost = record.cost;
        let at = record.timestamp;
        let totals_record = record.clone();

        if !state.history.record(record, allocated, now) {
            return Ok(());
        }

        state.tracker.consume(token_count, cost);

        {
            let mut alerts = self.alerts.lock().expect("alert log lock poisoned");
            alerts.evaluate(
                model,
                &state.profile.thresholds,
                state.tracker.current().used_budget,
                state.tracker.used_cost(),
                at,
            );
        }

        let ModelState {
            profile,
            history,
            tracker,
            factors,
            ..
        } = &mut *state;
        tracker.check_rollover(now, history, factors, profile)?;
        history.update_factors(factors, self.settings.warmup_records);

        state.totals.update(&totals_record);
        Ok(())
    }

    /// Convenience ingestion for callers that only track token and cost
    /// totals: wraps the pair in a neutral usage record.
    pub fn update_metrics(&self, model: &str, tokens: u64, cost: f64) -> Result<()> {
        let record = UsageRecord::new(model, self.clock.now(), tokens, cost);
        self.record_usage(model, record)
    }

    pub fn get_metrics(&self, model: &str) -> Result<BudgetStatsSnapshot> {
        let state = self.state_for(model)?;
        let state = state.lock().expect("model state lock poisoned");
        let now = self.clock.now();
        let period = self.settings.allocation_period();
        let pool = state.tracker.current();

        Ok(BudgetStatsSnapshot {
            model: model.to_string(),
            total_budget: pool.total_budget,
            used_budget: pool.used_budget,
            remaining_budget: pool.remaining_budget(),
            allocation_period_days: self.settings.allocation_period_days(),
            avg_daily_usage: state.history.average_daily_usage(period, now),
            success_rate: state.history.average_success_rate(period, now),
            total_requests: state.totals.request_count,
            total_tokens: state.totals.total_tokens,
            total_cost: state.totals.total_cost,
            average_tokens_per_request: state.totals.average_tokens_per_request(),
            peak_tokens: state.totals.peak_tokens,
        })
    }

    pub fn get_alerts(&self, filter: &AlertFilter) -> Vec<BudgetAlert> {
        let alerts = self.alerts.lock().expect("alert log lock poisoned");
        alerts.alerts(filter)
    }

    /// Rolled-over allocations for a model, oldest first.
    pub fn allocation_history(&self, model: &str) -> Result<Vec<BudgetAllocation>> {
        let state = self.state_for(model)?;
        let state = state.lock().expect("model state lock poisoned");
        Ok(state.tracker.archived().cloned().collect())
    }

    /// Clear one model's history and counters (or every model's, when no
    /// name is given) and zero its pool consumption. The alert log is
    /// never touched.
    pub fn reset_metrics(&self, model: Option<&str>) -> Result<()> {
        let targets: Vec<Arc<Mutex<ModelState>>> = match model {
            Some(name) => vec![self.state_for(name)?],
            None => {
                let models = self.models.read().expect("model registry lock poisoned");
                models.values().cloned().collect()
            }
        };

        for target in targets {
            let mut state = target.lock().expect("model state lock poisoned");
            state.history.clear();
            state.totals = UsageTotals::default();
            state.factors = AdjustmentFactors::default();
            state.pending_allocation = None;
            state.tracker.reset_usage();
        }
        Ok(())
    }

    /// Serialize every model's budget stats to `path`. Format follows the
    /// file extension; the write is atomic (temp file + rename).
    pub fn export_metrics(&self, path: &Path) -> Result<()> {
        let mut rows: BTreeMap<String, MetricsExportRow> = BTreeMap::new();
        let now = self.clock.now();
        let period = self.settings.allocation_period();

        let models = {
            let registry = self.models.read().expect("model registry lock poisoned");
            registry
                .iter()
                .map(|(name, state)| (name.clone(), Arc::clone(state)))
                .collect::<Vec<_>>()
        };

        for (name, state) in models {
            let state = state.lock().expect("model state lock poisoned");
            let pool = state.tracker.current();
            rows.insert(
                name,
                MetricsExportRow {
                    total_budget: pool.total_budget,
                    used_budget: pool.used_budget,
                    remaining_budget: pool.remaining_budget(),
                    allocation_period_days: self.settings.allocation_period_days(),
                    avg_daily_usage: state
                        .history
                        .average_daily_usage(period, now)
                        .unwrap_or(0.0),
                    success_rate: state
                        .history
                        .average_success_rate(period, now)
                        .unwrap_or(0.0),
                    total_requests: state.totals.request_count,
                },
            );
        }

        export::write_document(path, &rows)
    }

    /// Serialize the alert log to `path`, same format rules as
    /// `export_metrics`.
    pub fn export_alerts(&self, path: &Path) -> Result<()> {
        let rows: Vec<AlertExportRow> = {
            let alerts = self.alerts.lock().expect("alert log lock poisoned");
            alerts
                .alerts(&AlertFilter::default())
                .iter()
                .map(AlertExportRow::from)
                .collect()
        };
        export::write_document(path, &rows)
    }
}
