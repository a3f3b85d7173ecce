//! Metrics and alert export. The only part of the controller that touches
//! the filesystem, kept off the request hot path.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::alerts::{AlertType, BudgetAlert};
use crate::error::{BudgetError, Result};

/// Supported export formats, selected by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    Yaml,
}

impl ExportFormat {
    pub fn from_path(path: &Path) -> Result<Self> {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default();
        match extension {
            "json" => Ok(ExportFormat::Json),
            "yaml" | "yml" => Ok(ExportFormat::Yaml),
            other => Err(BudgetError::UnsupportedFormat(format!(
                "unrecognized extension '{}' for {}",
                other,
                path.display()
            ))),
        }
    }
}

/// Per-model stats row written by `export_metrics`. Field names are a
/// stable external contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsExportRow {
    pub total_budget: u64,
    pub used_budget: u64,
    pub remaining_budget: u64,
    pub allocation_period_days: f64,
    pub avg_daily_usage: f64,
    pub success_rate: f64,
    pub total_requests: u64,
}

/// Alert row written by `export_alerts`. Exactly these five fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertExportRow {
    pub timestamp: DateTime<Utc>,
    pub alert_type: AlertType,
    pub message: String,
    pub threshold: f64,
    pub current_value: f64,
}

impl From<&BudgetAlert> for AlertExportRow {
    fn from(alert: &BudgetAlert) -> Self {
        Self {
            timestamp: alert.timestamp,
            alert_type: alert.alert_type,
            message: alert.message.clone(),
            threshold: alert.threshold,
            current_value: alert.current_value,
        }
    }
}

/// Serialize `value` to `path` in the format implied by its extension.
///
/// The payload goes to a sibling temp file first and is renamed into
/// place, so an interrupted export never leaves a partial file committed.
/// Overwrite semantics make retries safe.
pub fn write_document<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let format = ExportFormat::from_path(path)?;
    let payload = match format {
        ExportFormat::Json => serde_json::to_string_pretty(value)?,
        ExportFormat::Yaml => serde_yaml::to_string(value)?,
    };

    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            BudgetError::UnsupportedFormat(format!("path {} has no file name", path.display()))
        })?;
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    fs::create_dir_all(&parent)?;

    let tmp_path = parent.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));
    fs::write(&tmp_path, payload)?;
    if let Err(e) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(e.into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_format_from_extension() {
        assert_eq!(
            ExportFormat::from_path(Path::new("out/metrics.json")).unwrap(),
            ExportFormat::Json
        );
        assert_eq!(
            ExportFormat::from_path(Path::new("metrics.yaml")).unwrap(),
            ExportFormat::Yaml
        );
        assert_eq!(
            ExportFormat::from_path(Path::new("metrics.yml")).unwrap(),
            ExportFormat::Yaml
        );
        assert!(matches!(
            ExportFormat::from_path(Path::new("metrics.csv")),
            Err(BudgetError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            ExportFormat::from_path(Path::new("metrics")),
            Err(BudgetError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_json_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");

        let mut rows = BTreeMap::new();
        rows.insert(
            "gpt-4".to_string(),
            MetricsExportRow {
                total_budget: 100_000,
                used_budget: 40_000,
                remaining_budget: 60_000,
                allocation_period_days: 1.0,
                avg_daily_usage: 40_000.0,
                success_rate: 0.9,
                total_requests: 12,
            },
        );
        write_document(&path, &rows).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        let parsed: BTreeMap<String, MetricsExportRow> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["gpt-4"].total_budget, 100_000);
        assert_eq!(parsed["gpt-4"].remaining_budget, 60_000);
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("alerts.yaml");

        let rows = vec![AlertExportRow {
            timestamp: Utc::now(),
            alert_type: AlertType::TokenThreshold,
            message: "over budget".to_string(),
            threshold: 1_000_000.0,
            current_value: 2_000_000.0,
        }];
        write_document(&path, &rows).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("token_threshold"));
        let parsed: Vec<AlertExportRow> = serde_yaml::from_str(&raw).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].current_value, 2_000_000.0);
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        write_document(&path, &BTreeMap::<String, MetricsExportRow>::new()).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0], "metrics.json");
    }

    #[test]
    fn test_overwrite_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metrics.json");
        let rows = BTreeMap::<String, MetricsExportRow>::new();
        write_document(&path, &rows).unwrap();
        write_document(&path, &rows).unwrap();
        assert!(path.exists());
    }
}
