//! Full comparison run

use anyhow::Result;
use colored::Colorize;
use forecast_lib::{AnomalyReport, Pipeline, PipelineOutput, RunConfig};
use serde_json::json;
use std::path::{Path, PathBuf};

use super::{ensure_dir, load_daily, load_hourly};
use crate::output::{
    format_percent, print_error, print_info, print_success, print_table, print_warning,
    write_csv, AnomalyRow, ComparisonRow, ForecastRow, ImportanceRow, OutputFormat, SummaryRow,
};

/// Input and output locations for `cef run`
pub struct RunArgs {
    pub hourly: PathBuf,
    pub daily: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
}

pub async fn run_pipeline(config: RunConfig, args: &RunArgs, format: OutputFormat) -> Result<()> {
    let hourly = load_hourly(&args.hourly, &config.target_column)?;
    let daily = match &args.daily {
        Some(path) => Some(load_daily(path, &config.target_column)?),
        None => None,
    };
    let top_n = config.report.top_n;

    let pipeline = Pipeline::new(config);
    let output = pipeline.run(hourly, daily).await?;

    if let Some(dir) = &args.output_dir {
        write_outputs(dir, &output)?;
    }

    match format {
        OutputFormat::Json => {
            let anomalies = match &output.anomalies {
                Some(Ok(report)) => json!(report),
                Some(Err(e)) => json!({ "error": e.to_string() }),
                None => serde_json::Value::Null,
            };
            let document = json!({
                "comparison": output.comparison,
                "anomalies": anomalies,
            });
            println!("{}", serde_json::to_string_pretty(&document)?);
        }
        OutputFormat::Csv => {
            print_table(&ComparisonRow::ranked(&output.comparison.ranking), format)?;
        }
        OutputFormat::Table => print_summary(&output, top_n, format)?,
    }

    if let Some(dir) = &args.output_dir {
        print_success(&format!("Wrote output tables to {}", dir.display()));
    }
    Ok(())
}

fn print_summary(output: &PipelineOutput, top_n: usize, format: OutputFormat) -> Result<()> {
    let comparison = &output.comparison;
    println!(
        "{} (ranked by {})",
        "Model Comparison".bold(),
        comparison.primary_metric.to_string().to_uppercase()
    );
    print_table(&ComparisonRow::ranked(&comparison.ranking), format)?;

    if let Some(best) = comparison.ranking.first() {
        print_success(&format!(
            "Best model: {} (MAPE {})",
            best.model.to_string().cyan(),
            format_percent(best.mape)
        ));
    }
    for failure in &comparison.failures {
        print_warning(&format!("{} failed: {}", failure.model, failure.error));
    }

    for (model, importances) in &comparison.feature_importance {
        println!();
        println!("{} ({})", "Feature Importance".bold(), model);
        let rows: Vec<ImportanceRow> = importances
            .iter()
            .map(|f| ImportanceRow::new(*model, f))
            .collect();
        print_table(&rows, format)?;
    }

    match &output.anomalies {
        Some(Ok(report)) => {
            println!();
            print_anomaly_summary(report, top_n, format)?;
        }
        Some(Err(e)) => print_error(&format!("Anomaly detection failed: {}", e)),
        None => {}
    }
    Ok(())
}

pub(crate) fn print_anomaly_summary(
    report: &AnomalyReport,
    top_n: usize,
    format: OutputFormat,
) -> Result<()> {
    println!("{} ({})", "Anomaly Summary".bold(), report.utility);
    print_info(&format!(
        "{} of {} building-days flagged; {} rows skipped for missing features",
        report.anomaly_count(),
        report.records.len(),
        report.rows_dropped
    ));
    let rows: Vec<SummaryRow> = report
        .top_entities(top_n)
        .iter()
        .map(SummaryRow::from)
        .collect();
    print_table(&rows, format)
}

/// Anomaly tables, shared with `cef anomalies`
pub(crate) fn write_anomaly_outputs(dir: &Path, report: &AnomalyReport) -> Result<()> {
    let records: Vec<AnomalyRow> = report.records.iter().map(AnomalyRow::from).collect();
    write_csv(&dir.join("anomalies.csv"), &records)?;
    let summary: Vec<SummaryRow> = report.summary.iter().map(SummaryRow::from).collect();
    write_csv(&dir.join("anomaly_summary.csv"), &summary)
}

fn write_outputs(dir: &Path, output: &PipelineOutput) -> Result<()> {
    ensure_dir(dir)?;
    for evaluation in &output.evaluations {
        let rows: Vec<ForecastRow> = evaluation.forecasts.iter().map(ForecastRow::from).collect();
        write_csv(&dir.join(format!("forecasts_{}.csv", evaluation.model)), &rows)?;
    }

    // already cut to the configured top N per model
    let importances: Vec<ImportanceRow> = output
        .comparison
        .feature_importance
        .iter()
        .flat_map(|(&model, top)| top.iter().map(move |f| ImportanceRow::new(model, f)))
        .collect();
    if !importances.is_empty() {
        write_csv(&dir.join("feature_importance.csv"), &importances)?;
    }

    write_csv(
        &dir.join("model_comparison.csv"),
        &ComparisonRow::ranked(&output.comparison.ranking),
    )?;

    if let Some(Ok(report)) = &output.anomalies {
        write_anomaly_outputs(dir, report)?;
    }
    Ok(())
}
