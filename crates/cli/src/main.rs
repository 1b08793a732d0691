//! Campus Energy Forecaster CLI
//!
//! Runs the forecasting comparison and the building anomaly pass over CSV
//! exports and prints or writes the resulting tables.

mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use commands::{anomalies, forecast, run};
use forecast_lib::{ModelKind, PipelineMetrics, Utility};
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Campus Energy Forecaster CLI
#[derive(Parser)]
#[command(name = "cef")]
#[command(author, version, about = "Campus Energy Forecaster", long_about = None)]
pub struct Cli {
    /// Run configuration file (TOML or JSON); CEF_* environment variables override it
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, short, global = true, default_value = "table")]
    pub format: output::OutputFormat,

    /// Random seed for sampling and model initialisation
    #[arg(long, global = true)]
    pub seed: Option<u64>,

    /// Utility to forecast and scan (electricity, gas, steam, chilled_water, ...)
    #[arg(long, short, global = true)]
    pub utility: Option<Utility>,

    /// Write the Prometheus text exposition here when the command finishes
    #[arg(long, global = true)]
    pub metrics_out: Option<PathBuf>,

    /// Log format on stderr
    #[arg(long, global = true, env = "CEF_LOG_FORMAT", default_value = "pretty")]
    pub log_format: LogFormat,

    /// Enable debug logging
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train every enabled model, compare them and scan for anomalies
    Run {
        /// Hourly consumption table
        #[arg(long)]
        hourly: PathBuf,

        /// Daily per-building table for anomaly detection
        #[arg(long)]
        daily: Option<PathBuf>,

        /// Directory for the output CSV tables
        #[arg(long, short)]
        output_dir: Option<PathBuf>,

        /// Comma-separated models to run (defaults to the configured set)
        #[arg(long, value_delimiter = ',')]
        models: Vec<ModelKind>,

        /// Share of input rows to keep, in (0, 1]
        #[arg(long)]
        sample_fraction: Option<f64>,
    },

    /// Train and score a single model
    Forecast {
        /// Hourly consumption table
        #[arg(long)]
        hourly: PathBuf,

        /// Model family (decomposition, sequence, gradient-boosted)
        #[arg(long, short)]
        model: ModelKind,

        /// Write the forecast table here as CSV
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Flag unusual building-days in the daily table
    Anomalies {
        /// Daily per-building table
        #[arg(long)]
        daily: PathBuf,

        /// Expected share of outliers, in (0, 0.5]
        #[arg(long)]
        contamination: Option<f64>,

        /// Summary rows to print
        #[arg(long, default_value_t = 10)]
        top: usize,

        /// Directory for anomalies.csv and anomaly_summary.csv
        #[arg(long, short)]
        output_dir: Option<PathBuf>,
    },
}

fn init_tracing(format: LogFormat, verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Json => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init(),
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, cli.verbose);

    let mut run_config = config::load_run_config(cli.config.as_deref())?;
    config::apply_global_overrides(&mut run_config, cli.seed, cli.utility.clone());

    match cli.command {
        Commands::Run {
            hourly,
            daily,
            output_dir,
            models,
            sample_fraction,
        } => {
            if !models.is_empty() {
                run_config.models = models;
            }
            if let Some(fraction) = sample_fraction {
                run_config.sample_fraction = fraction;
            }
            let args = run::RunArgs {
                hourly,
                daily,
                output_dir,
            };
            run::run_pipeline(run_config, &args, cli.format).await?;
        }
        Commands::Forecast {
            hourly,
            model,
            output,
        } => {
            forecast::forecast_model(run_config, &hourly, model, output.as_deref(), cli.format)
                .await?;
        }
        Commands::Anomalies {
            daily,
            contamination,
            top,
            output_dir,
        } => {
            if let Some(contamination) = contamination {
                run_config.anomaly = run_config.anomaly.with_contamination(contamination);
            }
            anomalies::detect_anomalies(run_config, &daily, top, output_dir.as_deref(), cli.format)
                .await?;
        }
    }

    if let Some(path) = cli.metrics_out {
        std::fs::write(&path, PipelineMetrics::new().gather_text())
            .with_context(|| format!("Failed to write metrics to {}", path.display()))?;
    }

    Ok(())
}
