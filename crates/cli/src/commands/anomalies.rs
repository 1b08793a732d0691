//! Building anomaly scan

use anyhow::Result;
use colored::Colorize;
use forecast_lib::{Pipeline, RunConfig};
use std::path::Path;

use super::run::{print_anomaly_summary, write_anomaly_outputs};
use super::{ensure_dir, load_daily};
use crate::output::{print_success, print_table, AnomalyDisplayRow, OutputFormat, SummaryRow};

pub async fn detect_anomalies(
    config: RunConfig,
    daily: &Path,
    top: usize,
    output_dir: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let records = load_daily(daily, &config.target_column)?;
    let pipeline = Pipeline::new(config);
    let report = pipeline.detect_anomalies(records).await?;

    if let Some(dir) = output_dir {
        ensure_dir(dir)?;
        write_anomaly_outputs(dir, &report)?;
    }

    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Csv => {
            let rows: Vec<SummaryRow> = report.summary.iter().map(SummaryRow::from).collect();
            print_table(&rows, format)?;
        }
        OutputFormat::Table => {
            print_anomaly_summary(&report, top, format)?;

            let mut flagged: Vec<_> = report.records.iter().filter(|r| r.is_anomaly).collect();
            flagged.sort_by(|a, b| a.anomaly_score.total_cmp(&b.anomaly_score));
            if !flagged.is_empty() {
                println!();
                println!("{}", "Most Anomalous Building-Days".bold());
                let rows: Vec<AnomalyDisplayRow> = flagged
                    .into_iter()
                    .take(top)
                    .map(AnomalyDisplayRow::from)
                    .collect();
                print_table(&rows, format)?;
            }
        }
    }

    if let Some(dir) = output_dir {
        print_success(&format!("Wrote anomaly tables to {}", dir.display()));
    }
    Ok(())
}
