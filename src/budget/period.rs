//! Allocation period lifecycle: owns the live token pool for one model,
//! detects expiry, and recomputes the pool size from recent history.
//!
//! Expiry is checked lazily on every budget calculation and usage report;
//! there is no background timer. Staleness only matters at the moment an
//! allocation decision is made.

use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::budget::history::UsageHistory;
use crate::budget::ratio::RatioAdjuster;
use crate::budget::types::{
    AdjustmentFactors, BudgetAllocation, RolloverMetadata, TaskRequirements, TaskType,
};
use crate::error::Result;
use crate::profile::ModelProfile;

/// Rolled-over allocations kept for audit.
const ARCHIVE_CAP: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeriodState {
    /// One allocation is live.
    Active,
    /// The period elapsed; the next check installs a fresh allocation.
    Expired,
}

/// Owns the current [`BudgetAllocation`] for one model and replaces it
/// when the period rolls over. Old allocations are archived, never
/// mutated in place.
#[derive(Debug)]
pub struct AllocationPeriodTracker {
    current: BudgetAllocation,
    used_cost: f64,
    archive: VecDeque<BudgetAllocation>,
    period: Duration,
    min_budget: u64,
    max_budget: u64,
}

impl AllocationPeriodTracker {
    pub fn new(
        profile: &ModelProfile,
        factors: &AdjustmentFactors,
        initial_budget: u64,
        period: Duration,
        min_budget: u64,
        max_budget: u64,
        now: DateTime<Utc>,
    ) -> Result<Self> {
        let seed = initial_budget.clamp(min_budget, max_budget);
        let current = Self::build_allocation(profile, factors, seed, period, now, None)?;
        Ok(Self {
            current,
            used_cost: 0.0,
            archive: VecDeque::new(),
            period,
            min_budget,
            max_budget,
        })
    }

    fn build_allocation(
        profile: &ModelProfile,
        factors: &AdjustmentFactors,
        total_budget: u64,
        period: Duration,
        now: DateTime<Utc>,
        metadata: Option<RolloverMetadata>,
    ) -> Result<BudgetAllocation> {
        let component_budgets = RatioAdjuster::compute_split(
            profile,
            TaskType::General,
            &TaskRequirements::default(),
            factors,
            total_budget,
        )?;
        Ok(BudgetAllocation {
            total_budget,
            used_budget: 0,
            period_start: now,
            period_end: now + period,
            component_budgets,
            metadata,
        })
    }

    pub fn current(&self) -> &BudgetAllocation {
        &self.current
    }

    pub fn used_cost(&self) -> f64 {
        self.used_cost
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn state(&self, now: DateTime<Utc>) -> PeriodState {
        if now >= self.current.period_end {
            PeriodState::Expired
        } else {
            PeriodState::Active
        }
    }

    /// Charge consumed tokens and cost against the live pool.
    pub fn consume(&mut self, tokens: u64, cost: f64) {
        self.current.consume(tokens);
        self.used_cost += cost;
    }

    /// Zero the live pool's consumption without replacing it.
    pub fn reset_usage(&mut self) {
        self.current.used_budget = 0;
        self.used_cost = 0.0;
    }

    /// Archived allocations, oldest first.
    pub fn archived(&self) -> impl Iterator<Item = &BudgetAllocation> {
        self.archive.iter()
    }

    /// Lazily roll the period over if it has elapsed. Returns `true` when
    /// a fresh allocation was installed.
    ///
    /// The new pool size follows observed usage, scaled up when recent
    /// requests succeed and down when they fail, then clamped to the
    /// configured bounds. An empty window keeps the previous total
    /// unchanged rather than shrinking on missing data.
    pub fn check_rollover(
        &mut self,
        now: DateTime<Utc>,
        history: &UsageHistory,
        factors: &AdjustmentFactors,
        profile: &ModelProfile,
    ) -> Result<bool> {
        if self.state(now) != PeriodState::Expired {
            return Ok(false);
        }

        let previous_budget = self.current.total_budget;
        let daily_usage = history.average_daily_usage(self.period, now);
        let success_rate = history.average_success_rate(self.period, now);

        let new_budget = match (daily_usage, success_rate) {
            (Some(daily), Some(success)) => {
                let multiplier = if success > 0.9 {
                    1.2
                } else if success > 0.7 {
                    1.1
                } else if success < 0.5 {
                    0.8
                } else {
                    1.0
                };
                let scaled = (daily * multiplier).round() as u64;
                scaled.clamp(self.min_budget, self.max_budget)
            }
            _ => previous_budget,
        };

        let metadata = RolloverMetadata {
            previous_budget,
            adjustment_factor: new_budget as f64 / previous_budget as f64,
            success_rate,
            daily_usage,
        };

        let fresh = Self::build_allocation(
            profile,
            factors,
            new_budget,
            self.period,
            now,
            Some(metadata),
        )?;

        let retired = std::mem::replace(&mut self.current, fresh);
        self.archive.push_back(retired);
        while self.archive.len() > ARCHIVE_CAP {
            self.archive.pop_front();
        }
        self.used_cost = 0.0;

        tracing::info!(
            previous_budget,
            new_budget,
            success_rate = ?success_rate,
            daily_usage = ?daily_usage,
            "Allocation period rolled over"
        );

        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::types::UsageRecord;
    use crate::profile::{ComponentRatios, UsageThresholds};

    fn profile() -> ModelProfile {
        ModelProfile {
            max_tokens: 100_000,
            token_cost: 0.0001,
            component_ratios: ComponentRatios::default(),
            thresholds: UsageThresholds {
                max_tokens_per_period: 1_000_000,
                max_cost_per_period: 100.0,
            },
        }
    }

    fn tracker(now: DateTime<Utc>) -> AllocationPeriodTracker {
        AllocationPeriodTracker::new(
            &profile(),
            &AdjustmentFactors::default(),
            100_000,
            Duration::days(1),
            1_000,
            10_000_000,
            now,
        )
        .unwrap()
    }

    fn populated_history(now: DateTime<Utc>, tokens_per_record: u64, success: f64) -> UsageHistory {
        let mut history = UsageHistory::new(1000, Duration::days(7));
        for i in 0..4 {
            let record = UsageRecord::new(
                "gpt-4",
                now - Duration::hours(i + 1),
                tokens_per_record,
                0.05,
            )
            .with_outcome(success, success);
            history.record(record, None, now);
        }
        history
    }

    #[test]
    fn test_seed_allocation_spans_period() {
        let now = Utc::now();
        let t = tracker(now);
        assert_eq!(t.current().total_budget, 100_000);
        assert_eq!(t.current().used_budget, 0);
        assert_eq!(t.current().period_end, now + Duration::days(1));
        assert_eq!(t.current().component_budgets.total(), 100_000);
        assert!(t.current().metadata.is_none());
        assert_eq!(t.state(now), PeriodState::Active);
    }

    #[test]
    fn test_no_rollover_before_expiry() {
        let now = Utc::now();
        let mut t = tracker(now);
        let history = UsageHistory::new(1000, Duration::days(7));
        let rolled = t
            .check_rollover(
                now + Duration::hours(23),
                &history,
                &AdjustmentFactors::default(),
                &profile(),
            )
            .unwrap();
        assert!(!rolled);
    }

    #[test]
    fn test_empty_window_retains_budget() {
        let now = Utc::now();
        let mut t = tracker(now);
        t.consume(40_000, 4.0);
        let history = UsageHistory::new(1000, Duration::days(7));
        let later = now + Duration::days(1);
        let rolled = t
            .check_rollover(later, &history, &AdjustmentFactors::default(), &profile())
            .unwrap();
        assert!(rolled);
        assert_eq!(t.current().total_budget, 100_000);
        assert_eq!(t.current().used_budget, 0);
        assert_eq!(t.used_cost(), 0.0);
        let metadata = t.current().metadata.unwrap();
        assert_eq!(metadata.previous_budget, 100_000);
        assert!((metadata.adjustment_factor - 1.0).abs() < 1e-9);
        assert!(metadata.success_rate.is_none());
    }

    #[test]
    fn test_high_success_grows_budget() {
        let now = Utc::now();
        let mut t = tracker(now);
        let later = now + Duration::days(1);
        // 4 records x 50_000 tokens within the day -> daily usage 200_000.
        let history = populated_history(later, 50_000, 0.95);
        t.check_rollover(later, &history, &AdjustmentFactors::default(), &profile())
            .unwrap();
        assert_eq!(t.current().total_budget, 240_000);
        let metadata = t.current().metadata.unwrap();
        assert_eq!(metadata.previous_budget, 100_000);
        assert!((metadata.daily_usage.unwrap() - 200_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_moderate_success_grows_slightly() {
        let now = Utc::now();
        let mut t = tracker(now);
        let later = now + Duration::days(1);
        let history = populated_history(later, 50_000, 0.8);
        t.check_rollover(later, &history, &AdjustmentFactors::default(), &profile())
            .unwrap();
        assert_eq!(t.current().total_budget, 220_000);
    }

    #[test]
    fn test_low_success_shrinks_budget() {
        let now = Utc::now();
        let mut t = tracker(now);
        let later = now + Duration::days(1);
        let history = populated_history(later, 50_000, 0.3);
        t.check_rollover(later, &history, &AdjustmentFactors::default(), &profile())
            .unwrap();
        assert_eq!(t.current().total_budget, 160_000);
    }

    #[test]
    fn test_middling_success_tracks_usage() {
        let now = Utc::now();
        let mut t = tracker(now);
        let later = now + Duration::days(1);
        let history = populated_history(later, 50_000, 0.6);
        t.check_rollover(later, &history, &AdjustmentFactors::default(), &profile())
            .unwrap();
        assert_eq!(t.current().total_budget, 200_000);
    }

    #[test]
    fn test_recompute_respects_clamp() {
        let now = Utc::now();
        let mut t = AllocationPeriodTracker::new(
            &profile(),
            &AdjustmentFactors::default(),
            100_000,
            Duration::days(1),
            50_000,
            150_000,
            now,
        )
        .unwrap();
        let later = now + Duration::days(1);

        // Usage far above the cap clamps to max_budget.
        let heavy = populated_history(later, 500_000, 0.95);
        t.check_rollover(later, &heavy, &AdjustmentFactors::default(), &profile())
            .unwrap();
        assert_eq!(t.current().total_budget, 150_000);

        // Usage far below the floor clamps to min_budget.
        let light = populated_history(later + Duration::days(1), 10, 0.95);
        t.check_rollover(
            later + Duration::days(1),
            &light,
            &AdjustmentFactors::default(),
            &profile(),
        )
        .unwrap();
        assert_eq!(t.current().total_budget, 50_000);
    }

    #[test]
    fn test_rollover_archives_previous_allocation() {
        let now = Utc::now();
        let mut t = tracker(now);
        t.consume(12_345, 1.5);
        let later = now + Duration::days(1);
        let history = UsageHistory::new(1000, Duration::days(7));
        t.check_rollover(later, &history, &AdjustmentFactors::default(), &profile())
            .unwrap();
        let archived: Vec<_> = t.archived().collect();
        assert_eq!(archived.len(), 1);
        assert_eq!(archived[0].used_budget, 12_345);
        assert_eq!(archived[0].period_start, now);
    }

    #[test]
    fn test_reset_usage_keeps_pool() {
        let now = Utc::now();
        let mut t = tracker(now);
        t.consume(5_000, 0.5);
        t.reset_usage();
        assert_eq!(t.current().used_budget, 0);
        assert_eq!(t.used_cost(), 0.0);
        assert_eq!(t.current().total_budget, 100_000);
    }
}
