use std::collections::HashMap;
use std::path::Path;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::{BudgetError, Result};
use crate::profile::ModelProfile;

/// Controller-wide tuning knobs. All fields default sensibly so a config
/// file only has to name what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControllerSettings {
    /// Length of one allocation period, in seconds.
    #[serde(default = "default_allocation_period_secs")]
    pub allocation_period_secs: u64,

    /// Token pool seeded for a model before any history exists.
    #[serde(default = "default_initial_budget")]
    pub initial_budget: u64,

    /// Floor for recomputed period budgets.
    #[serde(default = "default_min_budget")]
    pub min_budget: u64,

    /// Ceiling for recomputed period budgets.
    #[serde(default = "default_max_budget")]
    pub max_budget: u64,

    /// Paired samples required before adjustment factors start moving.
    #[serde(default = "default_warmup_records")]
    pub warmup_records: usize,

    /// Per-model history window cap, in records.
    #[serde(default = "default_max_history_records")]
    pub max_history_records: usize,

    /// Records older than this many allocation periods are evicted.
    #[serde(default = "default_retention_periods")]
    pub retention_periods: u32,

    /// Alert log cap; oldest alerts are evicted past this.
    #[serde(default = "default_max_alerts")]
    pub max_alerts: usize,
}

fn default_allocation_period_secs() -> u64 {
    86_400
}

fn default_initial_budget() -> u64 {
    100_000
}

fn default_min_budget() -> u64 {
    1_000
}

fn default_max_budget() -> u64 {
    10_000_000
}

fn default_warmup_records() -> usize {
    5
}

fn default_max_history_records() -> usize {
    1_000
}

fn default_retention_periods() -> u32 {
    7
}

fn default_max_alerts() -> usize {
    1_024
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            allocation_period_secs: default_allocation_period_secs(),
            initial_budget: default_initial_budget(),
            min_budget: default_min_budget(),
            max_budget: default_max_budget(),
            warmup_records: default_warmup_records(),
            max_history_records: default_max_history_records(),
            retention_periods: default_retention_periods(),
            max_alerts: default_max_alerts(),
        }
    }
}

impl ControllerSettings {
    pub fn validate(&self) -> Result<()> {
        if self.allocation_period_secs == 0 {
            return Err(BudgetError::Configuration(
                "allocation_period_secs must be positive".to_string(),
            ));
        }
        if self.min_budget == 0 {
            return Err(BudgetError::Configuration(
                "min_budget must be positive".to_string(),
            ));
        }
        if self.min_budget > self.max_budget {
            return Err(BudgetError::Configuration(format!(
                "min_budget {} exceeds max_budget {}",
                self.min_budget, self.max_budget
            )));
        }
        if self.warmup_records == 0 {
            return Err(BudgetError::Configuration(
                "warmup_records must be positive".to_string(),
            ));
        }
        if self.max_history_records == 0 {
            return Err(BudgetError::Configuration(
                "max_history_records must be positive".to_string(),
            ));
        }
        if self.retention_periods == 0 {
            return Err(BudgetError::Configuration(
                "retention_periods must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn allocation_period(&self) -> Duration {
        Duration::seconds(self.allocation_period_secs as i64)
    }

    pub fn allocation_period_days(&self) -> f64 {
        self.allocation_period_secs as f64 / 86_400.0
    }

    pub fn retention(&self) -> Duration {
        self.allocation_period() * self.retention_periods as i32
    }
}

/// Full deployment configuration: controller tuning plus the model
/// profile table, loadable from a TOML or YAML file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BudgetConfig {
    #[serde(default)]
    pub controller: ControllerSettings,

    #[serde(default)]
    pub models: HashMap<String, ModelProfile>,
}

impl BudgetConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| BudgetError::Configuration(format!("Failed to load config: {}", e)))?;

        let parsed: BudgetConfig = raw
            .try_deserialize()
            .map_err(|e| BudgetError::Configuration(format!("Failed to parse config: {}", e)))?;

        parsed.validate()?;
        Ok(parsed)
    }

    /// Fatal at startup: an invalid profile must prevent the controller
    /// from serving any model.
    pub fn validate(&self) -> Result<()> {
        self.controller.validate()?;
        for (model, profile) in &self.models {
            profile.validate().map_err(|e| {
                BudgetError::Configuration(format!("Model {}: {}", model, e))
            })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = ControllerSettings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.allocation_period(), Duration::days(1));
        assert!((settings.allocation_period_days() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_min_above_max_rejected() {
        let settings = ControllerSettings {
            min_budget: 1_000_000,
            max_budget: 1_000,
            ..ControllerSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_load_toml_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[controller]
allocation_period_secs = 3600
initial_budget = 50000

[models.gpt-4]
max_tokens = 8192
token_cost = 0.00003

[models.gpt-4.component_ratios]
system = 0.1
context = 0.4
instruction = 0.2
response = 0.3

[models.gpt-4.thresholds]
max_tokens_per_period = 1000000
max_cost_per_period = 100.0
"#
        )
        .unwrap();

        let config = BudgetConfig::load(file.path()).unwrap();
        assert_eq!(config.controller.allocation_period_secs, 3600);
        assert_eq!(config.controller.initial_budget, 50_000);
        // Unspecified fields fall back to defaults.
        assert_eq!(config.controller.min_budget, 1_000);
        let profile = &config.models["gpt-4"];
        assert_eq!(profile.max_tokens, 8192);
        assert_eq!(profile.thresholds.max_tokens_per_period, 1_000_000);
    }

    #[test]
    fn test_load_rejects_bad_ratios() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
[models.broken]
max_tokens = 8192
token_cost = 0.00003

[models.broken.component_ratios]
system = 0.3
context = 0.4
instruction = 0.2
response = 0.3

[models.broken.thresholds]
max_tokens_per_period = 1000000
max_cost_per_period = 100.0
"#
        )
        .unwrap();

        let err = BudgetConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, BudgetError::Configuration(_)));
        assert!(err.to_string().contains("broken"));
    }

    #[test]
    fn test_load_yaml_config() {
        let mut file = tempfile::Builder::new()
            .suffix(".yaml")
            .tempfile()
            .unwrap();
        writeln!(
            file,
            r#"
controller:
  allocation_period_secs: 43200
models:
  claude-3:
    max_tokens: 200000
    token_cost: 0.000015
    component_ratios:
      system: 0.15
      context: 0.45
      instruction: 0.15
      response: 0.25
    thresholds:
      max_tokens_per_period: 5000000
      max_cost_per_period: 250.0
"#
        )
        .unwrap();

        let config = BudgetConfig::load(file.path()).unwrap();
        assert!((config.controller.allocation_period_days() - 0.5).abs() < 1e-9);
        assert!(config.models.contains_key("claude-3"));
    }
}
