//! Threshold alerting over cumulative period usage.
//!
//! Alerts are append-only: once emitted they stay in the log, bounded by
//! count, and are never retracted by metric resets.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::profile::UsageThresholds;

/// A token/cost overrun is critical once it reaches this multiple of the
/// configured threshold.
const CRITICAL_MULTIPLIER: f64 = 1.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    TokenThreshold,
    CostThreshold,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::TokenThreshold => "token_threshold",
            AlertType::CostThreshold => "cost_threshold",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertSeverity {
    Warning,
    Critical,
}

/// An immutable alert emitted when a model's cumulative period usage
/// crosses a configured threshold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetAlert {
    pub alert_type: AlertType,
    pub severity: AlertSeverity,
    pub model: String,
    pub threshold: f64,
    pub current_value: f64,
    pub timestamp: DateTime<Utc>,
    pub message: String,
}

/// Optional, conjunctive filters for querying the alert log.
#[derive(Debug, Clone, Default)]
pub struct AlertFilter {
    pub model: Option<String>,
    pub alert_type: Option<AlertType>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

impl AlertFilter {
    pub fn for_model(model: impl Into<String>) -> Self {
        Self {
            model: Some(model.into()),
            ..Self::default()
        }
    }

    fn matches(&self, alert: &BudgetAlert) -> bool {
        if let Some(model) = &self.model {
            if &alert.model != model {
                return false;
            }
        }
        if let Some(alert_type) = self.alert_type {
            if alert.alert_type != alert_type {
                return false;
            }
        }
        if let Some(start) = self.start_time {
            if alert.timestamp < start {
                return false;
            }
        }
        if let Some(end) = self.end_time {
            if alert.timestamp > end {
                return false;
            }
        }
        true
    }
}

/// Evaluates usage events against per-model thresholds and owns the
/// bounded alert log.
#[derive(Debug)]
pub struct AlertEngine {
    log: VecDeque<BudgetAlert>,
    max_alerts: usize,
}

impl AlertEngine {
    pub fn new(max_alerts: usize) -> Self {
        Self {
            log: VecDeque::new(),
            max_alerts,
        }
    }

    /// Evaluate both threshold rules against the period's cumulative usage
    /// after the latest record. Crossing is strict: hitting a threshold
    /// exactly does not fire. Both rules may fire for the same record.
    pub fn evaluate(
        &mut self,
        model: &str,
        thresholds: &UsageThresholds,
        period_tokens: u64,
        period_cost: f64,
        at: DateTime<Utc>,
    ) -> Vec<BudgetAlert> {
        let mut emitted = Vec::new();

        if period_tokens > thresholds.max_tokens_per_period {
            let threshold = thresholds.max_tokens_per_period as f64;
            let current = period_tokens as f64;
            emitted.push(BudgetAlert {
                alert_type: AlertType::TokenThreshold,
                severity: severity_for(current, threshold),
                model: model.to_string(),
                threshold,
                current_value: current,
                timestamp: at,
                message: format!(
                    "Model {} used {} tokens this period, over the {} token limit",
                    model, period_tokens, thresholds.max_tokens_per_period
                ),
            });
        }

        if period_cost > thresholds.max_cost_per_period {
            emitted.push(BudgetAlert {
                alert_type: AlertType::CostThreshold,
                severity: severity_for(period_cost, thresholds.max_cost_per_period),
                model: model.to_string(),
                threshold: thresholds.max_cost_per_period,
                current_value: period_cost,
                timestamp: at,
                message: format!(
                    "Model {} spent {:.4} this period, over the {:.4} cost limit",
                    model, period_cost, thresholds.max_cost_per_period
                ),
            });
        }

        for alert in &emitted {
            tracing::warn!(
                model,
                alert_type = alert.alert_type.as_str(),
                severity = ?alert.severity,
                current_value = alert.current_value,
                threshold = alert.threshold,
                "Budget threshold exceeded"
            );
            self.log.push_back(alert.clone());
        }
        while self.log.len() > self.max_alerts {
            self.log.pop_front();
        }

        emitted
    }

    /// Query the log; all supplied filters must match.
    pub fn alerts(&self, filter: &AlertFilter) -> Vec<BudgetAlert> {
        self.log
            .iter()
            .filter(|a| filter.matches(a))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }
}

fn severity_for(current: f64, threshold: f64) -> AlertSeverity {
    if current >= CRITICAL_MULTIPLIER * threshold {
        AlertSeverity::Critical
    } else {
        AlertSeverity::Warning
    }
}
