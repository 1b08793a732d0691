//! Single-model forecast

use anyhow::Result;
use colored::Colorize;
use forecast_lib::{ModelKind, Pipeline, RunConfig};
use std::path::Path;

use super::load_hourly;
use crate::output::{
    format_percent, print_info, print_success, print_table, write_csv, ForecastDisplayRow,
    ForecastRow, ImportanceRow, OutputFormat,
};

/// Rows shown in table mode; the CSV export always carries all of them
const PREVIEW_ROWS: usize = 24;

pub async fn forecast_model(
    config: RunConfig,
    hourly: &Path,
    model: ModelKind,
    output: Option<&Path>,
    format: OutputFormat,
) -> Result<()> {
    let points = load_hourly(hourly, &config.target_column)?;
    let pipeline = Pipeline::new(config);
    let evaluation = pipeline.evaluate_model(model, points).await?;

    if let Some(path) = output {
        let rows: Vec<ForecastRow> = evaluation.forecasts.iter().map(ForecastRow::from).collect();
        write_csv(path, &rows)?;
    }

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&evaluation.forecasts)?);
        }
        OutputFormat::Csv => {
            let rows: Vec<ForecastRow> =
                evaluation.forecasts.iter().map(ForecastRow::from).collect();
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for row in &rows {
                writer.serialize(row)?;
            }
            writer.flush()?;
        }
        OutputFormat::Table => {
            println!("{} {}", "Forecast".bold(), model.to_string().cyan());
            println!("{}", "=".repeat(50));
            println!("Training rows:          {}", evaluation.train_rows);
            println!("Test rows:              {}", evaluation.test_rows);
            println!("MAE:                    {:.3}", evaluation.metrics.mae);
            println!("MAPE:                   {}", format_percent(evaluation.metrics.mape));
            println!("RMSE:                   {:.3}", evaluation.metrics.rmse);
            println!();

            let preview: Vec<ForecastDisplayRow> = evaluation
                .forecasts
                .iter()
                .take(PREVIEW_ROWS)
                .map(ForecastDisplayRow::from)
                .collect();
            print_table(&preview, format)?;
            if evaluation.forecasts.len() > PREVIEW_ROWS {
                print_info(&format!(
                    "Showing {} of {} forecast rows",
                    PREVIEW_ROWS,
                    evaluation.forecasts.len()
                ));
            }

            if !evaluation.feature_importance.is_empty() {
                println!();
                println!("{}", "Feature Importance".bold());
                let rows: Vec<ImportanceRow> = evaluation
                    .feature_importance
                    .iter()
                    .take(pipeline.config().report.top_n)
                    .map(|f| ImportanceRow::new(model, f))
                    .collect();
                print_table(&rows, format)?;
            }
        }
    }

    if let Some(path) = output {
        print_success(&format!("Wrote forecasts to {}", path.display()));
    }
    Ok(())
}
