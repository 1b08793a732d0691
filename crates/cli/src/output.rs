//! Output formatting utilities

use anyhow::{Context, Result};
use clap::ValueEnum;
use colored::Colorize;
use forecast_lib::{
    AccuracyMetrics, AnomalyRecord, AnomalySummary, FeatureImportance, ForecastResult, ModelKind,
};
use serde::Serialize;
use std::fs::File;
use std::path::Path;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Table format (default)
    #[default]
    Table,
    /// JSON format
    Json,
    /// CSV on stdout
    Csv,
}

/// Print a table from a list of items
pub fn print_table<T: Tabled + Serialize>(items: &[T], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Table => {
            if items.is_empty() {
                println!("{}", "No items found".yellow());
                return Ok(());
            }
            let table = Table::new(items).with(Style::rounded()).to_string();
            println!("{}", table);
        }
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&items)?);
        }
        OutputFormat::Csv => {
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for item in items {
                writer.serialize(item)?;
            }
            writer.flush()?;
        }
    }
    Ok(())
}

/// Write rows to a CSV file with a header taken from the row fields
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let file =
        File::create(path).with_context(|| format!("Failed to create {}", path.display()))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer
            .serialize(row)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    writer.flush()?;
    Ok(())
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Print an info message
pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue().bold(), message);
}

/// Format an optional float, blank when absent
pub fn format_optional(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

/// Format a percentage error
pub fn format_percent(value: f64) -> String {
    format!("{:.2}%", value)
}

/// Color an anomaly score; negative means flagged
pub fn color_score(score: f64) -> String {
    let formatted = format!("{:.4}", score);
    if score < 0.0 {
        formatted.red().to_string()
    } else {
        formatted.green().to_string()
    }
}

/// Row of `forecasts_<model>.csv`
#[derive(Debug, Serialize)]
pub struct ForecastRow {
    pub timestamp: String,
    pub predicted: f64,
    pub actual: Option<f64>,
    pub lower_bound: Option<f64>,
    pub upper_bound: Option<f64>,
    pub trend: Option<f64>,
    pub daily_pattern: Option<f64>,
    pub weekly_pattern: Option<f64>,
    pub yearly_pattern: Option<f64>,
    pub utility: String,
    pub model: String,
}

impl From<&ForecastResult> for ForecastRow {
    fn from(f: &ForecastResult) -> Self {
        Self {
            timestamp: f.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            predicted: f.point_estimate,
            actual: f.actual,
            lower_bound: f.lower,
            upper_bound: f.upper,
            trend: f.components.map(|c| c.trend),
            daily_pattern: f.components.map(|c| c.daily),
            weekly_pattern: f.components.map(|c| c.weekly),
            yearly_pattern: f.components.map(|c| c.yearly),
            utility: f.utility.to_string(),
            model: f.model.to_string(),
        }
    }
}

/// Printed forecast row
#[derive(Tabled, Serialize)]
pub struct ForecastDisplayRow {
    #[tabled(rename = "Timestamp")]
    pub timestamp: String,
    #[tabled(rename = "Predicted")]
    pub predicted: String,
    #[tabled(rename = "Actual")]
    pub actual: String,
    #[tabled(rename = "Lower")]
    pub lower: String,
    #[tabled(rename = "Upper")]
    pub upper: String,
}

impl From<&ForecastResult> for ForecastDisplayRow {
    fn from(f: &ForecastResult) -> Self {
        Self {
            timestamp: f.timestamp.format("%Y-%m-%d %H:%M").to_string(),
            predicted: format!("{:.2}", f.point_estimate),
            actual: format_optional(f.actual),
            lower: format_optional(f.lower),
            upper: format_optional(f.upper),
        }
    }
}

/// Row of `model_comparison.csv` and the comparison table
#[derive(Tabled, Serialize)]
pub struct ComparisonRow {
    #[tabled(rename = "Rank")]
    #[serde(skip)]
    pub rank: usize,
    #[tabled(rename = "Model")]
    pub model: String,
    #[tabled(rename = "MAE")]
    pub mae: f64,
    #[tabled(rename = "MAPE")]
    pub mape: f64,
    #[tabled(rename = "RMSE")]
    pub rmse: f64,
}

impl ComparisonRow {
    pub fn ranked(metrics: &[AccuracyMetrics]) -> Vec<Self> {
        metrics
            .iter()
            .enumerate()
            .map(|(i, m)| Self {
                rank: i + 1,
                model: m.model.to_string(),
                mae: round(m.mae, 3),
                mape: round(m.mape, 3),
                rmse: round(m.rmse, 3),
            })
            .collect()
    }
}

/// Row of `feature_importance.csv`
#[derive(Tabled, Serialize)]
pub struct ImportanceRow {
    #[tabled(skip)]
    pub model: String,
    #[tabled(rename = "Feature")]
    pub feature: String,
    #[tabled(rename = "Importance")]
    pub importance: f64,
}

impl ImportanceRow {
    pub fn new(model: ModelKind, f: &FeatureImportance) -> Self {
        Self {
            model: model.to_string(),
            feature: f.feature.clone(),
            importance: round(f.importance, 4),
        }
    }
}

/// Row of `anomalies.csv`
#[derive(Serialize)]
pub struct AnomalyRow {
    pub entity: String,
    pub date: String,
    pub value: f64,
    pub anomaly_score: f64,
    pub is_anomaly: bool,
}

impl From<&AnomalyRecord> for AnomalyRow {
    fn from(r: &AnomalyRecord) -> Self {
        Self {
            entity: r.entity_id.clone(),
            date: r.date.to_string(),
            value: r.observed_value,
            anomaly_score: r.anomaly_score,
            is_anomaly: r.is_anomaly,
        }
    }
}

/// Printed flagged building-day
#[derive(Tabled, Serialize)]
pub struct AnomalyDisplayRow {
    #[tabled(rename = "Entity")]
    pub entity: String,
    #[tabled(rename = "Date")]
    pub date: String,
    #[tabled(rename = "Value")]
    pub value: String,
    #[tabled(rename = "Score")]
    pub score: String,
}

impl From<&AnomalyRecord> for AnomalyDisplayRow {
    fn from(r: &AnomalyRecord) -> Self {
        Self {
            entity: r.entity_id.clone(),
            date: r.date.to_string(),
            value: format!("{:.2}", r.observed_value),
            score: color_score(r.anomaly_score),
        }
    }
}

/// Row of `anomaly_summary.csv` and the summary table
#[derive(Tabled, Serialize)]
pub struct SummaryRow {
    #[tabled(rename = "Entity")]
    pub entity: String,
    #[tabled(rename = "Building")]
    pub building_name: String,
    #[tabled(rename = "Anomalies")]
    pub anomaly_count: usize,
    #[tabled(rename = "Mean Value")]
    pub mean_anomalous_value: f64,
}

impl From<&AnomalySummary> for SummaryRow {
    fn from(s: &AnomalySummary) -> Self {
        Self {
            entity: s.entity_id.clone(),
            building_name: s.building_name.clone().unwrap_or_default(),
            anomaly_count: s.anomaly_count,
            mean_anomalous_value: round(s.mean_anomalous_value, 2),
        }
    }
}

fn round(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparison_rows_are_ranked() {
        let metrics = vec![
            AccuracyMetrics {
                model: ModelKind::GradientBoosted,
                mae: 1.23456,
                mape: 2.5,
                rmse: 1.5,
                samples: 10,
            },
            AccuracyMetrics {
                model: ModelKind::Decomposition,
                mae: 2.0,
                mape: 3.0,
                rmse: 2.5,
                samples: 10,
            },
        ];
        let rows = ComparisonRow::ranked(&metrics);
        assert_eq!(rows[0].rank, 1);
        assert_eq!(rows[0].model, "gradient-boosted");
        assert_eq!(rows[0].mae, 1.235);
        assert_eq!(rows[1].rank, 2);
    }

    #[test]
    fn test_write_csv_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("importance.csv");
        let rows = vec![ImportanceRow {
            model: "gradient-boosted".to_string(),
            feature: "lag_24h".to_string(),
            importance: 0.5,
        }];
        write_csv(&path, &rows).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("model,feature,importance\n"));
        assert!(content.contains("gradient-boosted,lag_24h,0.5"));
    }

    #[test]
    fn test_format_optional() {
        assert_eq!(format_optional(Some(1.0)), "1.00");
        assert_eq!(format_optional(None), "");
    }
}
