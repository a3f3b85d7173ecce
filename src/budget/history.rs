//! Bounded, time-ordered usage history and the rolling aggregates the
//! rest of the engine feeds on.

use std::collections::{BTreeMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::budget::types::{AdjustmentFactors, Component, ComponentBudgets, UsageRecord};

/// Exponential smoothing weight for new utilization observations. One
/// noisy request moves a factor by at most 20%; a sustained step change
/// settles in about five updates.
pub const SMOOTHING_ALPHA: f64 = 0.2;

/// One allocated-vs-actual pair, the raw material for utilization ratios.
#[derive(Debug, Clone)]
pub struct AllocationSample {
    pub allocated: ComponentBudgets,
    pub actual: BTreeMap<Component, u64>,
    pub timestamp: DateTime<Utc>,
}

/// Lifetime counters for one model. Unlike the window these survive
/// eviction; they reset only with `reset_metrics`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageTotals {
    pub request_count: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub peak_tokens: u64,
}

impl UsageTotals {
    pub fn update(&mut self, record: &UsageRecord) {
        self.request_count += 1;
        self.total_tokens += record.token_count;
        self.total_cost += record.cost;
        self.peak_tokens = self.peak_tokens.max(record.token_count);
    }

    pub fn average_tokens_per_request(&self) -> f64 {
        if self.request_count == 0 {
            return 0.0;
        }
        self.total_tokens as f64 / self.request_count as f64
    }
}

/// Append-only window of usage records for one model, capped by both
/// record count and age so a long-running service stays bounded.
#[derive(Debug)]
pub struct UsageHistory {
    records: VecDeque<UsageRecord>,
    samples: VecDeque<AllocationSample>,
    seen_ids: HashSet<Uuid>,
    max_records: usize,
    retention: Duration,
}

impl UsageHistory {
    pub fn new(max_records: usize, retention: Duration) -> Self {
        Self {
            records: VecDeque::with_capacity(max_records.min(1024)),
            samples: VecDeque::with_capacity(64),
            seen_ids: HashSet::new(),
            max_records,
            retention,
        }
    }

    /// Append a record, pairing it with the allocation it consumed when
    /// one is known. Returns `false` when the record carries an
    /// idempotency key already seen in the retained window.
    pub fn record(
        &mut self,
        record: UsageRecord,
        allocated: Option<ComponentBudgets>,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(id) = record.record_id {
            if !self.seen_ids.insert(id) {
                tracing::debug!(model = %record.model, %id, "Dropping duplicate usage record");
                return false;
            }
        }

        if let Some(allocated) = allocated {
            if !record.component_actual.is_empty() {
                self.samples.push_back(AllocationSample {
                    allocated,
                    actual: record.component_actual.clone(),
                    timestamp: record.timestamp,
                });
            }
        }

        if let Some(last) = self.records.back() {
            if record.timestamp < last.timestamp {
                tracing::debug!(
                    model = %record.model,
                    "Usage record arrived out of order, keeping as-is"
                );
            }
        }

        self.records.push_back(record);
        self.evict(now);
        true
    }

    fn evict(&mut self, now: DateTime<Utc>) {
        let cutoff = now - self.retention;
        while self.records.len() > self.max_records
            || self
                .records
                .front()
                .is_some_and(|r| r.timestamp < cutoff)
        {
            if let Some(evicted) = self.records.pop_front() {
                if let Some(id) = evicted.record_id {
                    self.seen_ids.remove(&id);
                }
            } else {
                break;
            }
        }
        while self.samples.len() > self.max_records
            || self
                .samples
                .front()
                .is_some_and(|s| s.timestamp < cutoff)
        {
            if self.samples.pop_front().is_none() {
                break;
            }
        }
    }

    /// Records newer than `now - period`, oldest first.
    pub fn recent_window(&self, period: Duration, now: DateTime<Utc>) -> Vec<&UsageRecord> {
        let cutoff = now - period;
        self.records
            .iter()
            .filter(|r| r.timestamp > cutoff)
            .collect()
    }

    /// Mean tokens per day over the recent window. `None` when the window
    /// is empty, so callers cannot mistake missing data for zero usage.
    pub fn average_daily_usage(&self, period: Duration, now: DateTime<Utc>) -> Option<f64> {
        let window = self.recent_window(period, now);
        if window.is_empty() {
            return None;
        }
        let total: u64 = window.iter().map(|r| r.token_count).sum();
        let days = period.num_seconds() as f64 / 86_400.0;
        if days <= 0.0 {
            return None;
        }
        Some(total as f64 / days)
    }

    /// Mean success rate over the recent window, `None` when empty.
    pub fn average_success_rate(&self, period: Duration, now: DateTime<Utc>) -> Option<f64> {
        let window = self.recent_window(period, now);
        if window.is_empty() {
            return None;
        }
        let sum: f64 = window.iter().map(|r| r.success_rate).sum();
        Some(sum / window.len() as f64)
    }

    /// Mean actual/allocated ratio per component over the last
    /// `sample_count` paired samples. Components never reported (or never
    /// allocated any tokens) are omitted, not zero-filled.
    pub fn component_utilization(&self, sample_count: usize) -> BTreeMap<Component, f64> {
        let mut sums: BTreeMap<Component, (f64, u32)> = BTreeMap::new();
        for sample in self.samples.iter().rev().take(sample_count) {
            for component in Component::ALL {
                let Some(actual) = sample.actual.get(&component) else {
                    continue;
                };
                let allocated = sample.allocated.get(component);
                if allocated == 0 {
                    continue;
                }
                let ratio = *actual as f64 / allocated as f64;
                let entry = sums.entry(component).or_insert((0.0, 0));
                entry.0 += ratio;
                entry.1 += 1;
            }
        }
        sums.into_iter()
            .map(|(component, (sum, count))| (component, sum / count as f64))
            .collect()
    }

    /// Fold the latest utilization observations into the smoothed factors:
    /// `new = 0.8 * old + 0.2 * mean_utilization`. A no-op until the
    /// paired-sample count reaches the warm-up threshold.
    pub fn update_factors(&self, factors: &mut AdjustmentFactors, warmup: usize) {
        if self.samples.len() < warmup {
            return;
        }
        for (component, utilization) in self.component_utilization(warmup) {
            let old = factors.get(component);
            factors.set(
                component,
                (1.0 - SMOOTHING_ALPHA) * old + SMOOTHING_ALPHA * utilization,
            );
        }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn sample_count(&self) -> usize {
        self.samples.len()
    }

    pub fn clear(&mut self) {
        self.records.clear();
        self.samples.clear();
        self.seen_ids.clear();
    }
}
