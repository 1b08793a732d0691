//! Subcommand implementations

pub mod anomalies;
pub mod forecast;
pub mod run;

use anyhow::{Context, Result};
use forecast_lib::dataset::{read_daily_csv, read_hourly_csv};
use forecast_lib::{DailyRecord, TimeSeriesPoint};
use std::fs::File;
use std::path::Path;
use tracing::info;

/// Read the hourly table, keyed on the configured target column
pub fn load_hourly(path: &Path, target_column: &str) -> Result<Vec<TimeSeriesPoint>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let points = read_hourly_csv(file, target_column)
        .with_context(|| format!("Failed to read hourly table {}", path.display()))?;
    info!(path = %path.display(), rows = points.len(), "Loaded hourly table");
    Ok(points)
}

/// Read the daily per-building table
pub fn load_daily(path: &Path, target_column: &str) -> Result<Vec<DailyRecord>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let records = read_daily_csv(file, target_column)
        .with_context(|| format!("Failed to read daily table {}", path.display()))?;
    info!(path = %path.display(), rows = records.len(), "Loaded daily table");
    Ok(records)
}

/// Create the output directory if needed
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create output directory {}", path.display()))
}
