//! Static per-model limits and component ratios, loaded once at startup.

use serde::{Deserialize, Serialize};

use crate::budget::types::Component;
use crate::error::{BudgetError, Result};

/// Ratios must sum to 1.0 within this tolerance; anything else is a
/// configuration error, never silently renormalized.
pub const RATIO_SUM_TOLERANCE: f64 = 1e-6;

/// Fraction of a request's budget given to each prompt section.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ComponentRatios {
    pub system: f64,
    pub context: f64,
    pub instruction: f64,
    pub response: f64,
}

impl Default for ComponentRatios {
    fn default() -> Self {
        Self {
            system: 0.1,
            context: 0.4,
            instruction: 0.2,
            response: 0.3,
        }
    }
}

impl ComponentRatios {
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

    pub fn sum(&self) -> f64 {
        self.system + self.context + self.instruction + self.response
    }

    pub fn validate(&self) -> Result<()> {
        for component in Component::ALL {
            let ratio = self.get(component);
            if !ratio.is_finite() || ratio <= 0.0 || ratio >= 1.0 {
                return Err(BudgetError::Configuration(format!(
                    "Component ratio for {} must be in (0, 1), got {}",
                    component.as_str(),
                    ratio
                )));
            }
        }
        let sum = self.sum();
        if (sum - 1.0).abs() > RATIO_SUM_TOLERANCE {
            return Err(BudgetError::Configuration(format!(
                "Component ratios must sum to 1.0, got {}",
                sum
            )));
        }
        Ok(())
    }
}

/// Per-period alerting thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct UsageThresholds {
    pub max_tokens_per_period: u64,
    pub max_cost_per_period: f64,
}

impl UsageThresholds {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens_per_period == 0 {
            return Err(BudgetError::Configuration(
                "max_tokens_per_period must be positive".to_string(),
            ));
        }
        if !self.max_cost_per_period.is_finite() || self.max_cost_per_period <= 0.0 {
            return Err(BudgetError::Configuration(format!(
                "max_cost_per_period must be positive, got {}",
                self.max_cost_per_period
            )));
        }
        Ok(())
    }
}

/// Immutable per-model configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelProfile {
    /// Hard per-request token ceiling.
    pub max_tokens: u64,
    /// Currency per token.
    pub token_cost: f64,
    #[serde(default)]
    pub component_ratios: ComponentRatios,
    pub thresholds: UsageThresholds,
}

impl ModelProfile {
    pub fn validate(&self) -> Result<()> {
        if self.max_tokens == 0 {
            return Err(BudgetError::Configuration(
                "max_tokens must be positive".to_string(),
            ));
        }
        if !self.token_cost.is_finite() || self.token_cost < 0.0 {
            return Err(BudgetError::Configuration(format!(
                "token_cost must be non-negative, got {}",
                self.token_cost
            )));
        }
        self.component_ratios.validate()?;
        self.thresholds.validate()?;
        Ok(())
    }
}
