//! Observability infrastructure for the forecasting pipeline
//!
//! Provides:
//! - Prometheus metrics (adapter training latency, adapter outcomes, dropped rows, anomalies)
//! - Structured logging with tracing

use crate::models::{AccuracyMetrics, ModelKind, Utility};
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, Encoder,
    HistogramVec, IntCounter, IntCounterVec, TextEncoder,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for adapter training latency (in seconds)
const TRAINING_BUCKETS: &[f64] = &[
    0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 300.0, 900.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<PipelineMetricsInner> = OnceLock::new();

struct PipelineMetricsInner {
    adapter_latency_seconds: HistogramVec,
    adapters_succeeded: IntCounterVec,
    adapters_failed: IntCounterVec,
    feature_rows_dropped: IntCounter,
    anomalies_flagged: IntCounter,
}

impl PipelineMetricsInner {
    fn new() -> Self {
        Self {
            adapter_latency_seconds: register_histogram_vec!(
                "cef_adapter_latency_seconds",
                "Wall time spent building, training and scoring one model adapter",
                &["model"],
                TRAINING_BUCKETS.to_vec()
            )
            .expect("Failed to register adapter_latency_seconds"),

            adapters_succeeded: register_int_counter_vec!(
                "cef_adapters_succeeded_total",
                "Model adapters that produced scored forecasts",
                &["model"]
            )
            .expect("Failed to register adapters_succeeded"),

            adapters_failed: register_int_counter_vec!(
                "cef_adapters_failed_total",
                "Model adapters that failed and were left out of the comparison",
                &["model"]
            )
            .expect("Failed to register adapters_failed"),

            feature_rows_dropped: register_int_counter!(
                "cef_feature_rows_dropped_total",
                "Hourly rows dropped for lacking lag or rolling history"
            )
            .expect("Failed to register feature_rows_dropped"),

            anomalies_flagged: register_int_counter!(
                "cef_anomalies_flagged_total",
                "Building-days labelled anomalous"
            )
            .expect("Failed to register anomalies_flagged"),
        }
    }
}

/// Pipeline metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share it.
#[derive(Clone)]
pub struct PipelineMetrics {
    _private: (),
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &PipelineMetricsInner {
        GLOBAL_METRICS.get_or_init(PipelineMetricsInner::new)
    }

    pub fn observe_adapter_latency(&self, model: ModelKind, duration_secs: f64) {
        self.inner()
            .adapter_latency_seconds
            .with_label_values(&[model.name()])
            .observe(duration_secs);
    }

    pub fn inc_adapter_succeeded(&self, model: ModelKind) {
        self.inner()
            .adapters_succeeded
            .with_label_values(&[model.name()])
            .inc();
    }

    pub fn inc_adapter_failed(&self, model: ModelKind) {
        self.inner()
            .adapters_failed
            .with_label_values(&[model.name()])
            .inc();
    }

    /// Failures recorded so far for one model
    pub fn adapters_failed(&self, model: ModelKind) -> u64 {
        self.inner()
            .adapters_failed
            .with_label_values(&[model.name()])
            .get()
    }

    pub fn add_feature_rows_dropped(&self, rows: usize) {
        self.inner().feature_rows_dropped.inc_by(rows as u64);
    }

    pub fn add_anomalies_flagged(&self, count: usize) {
        self.inner().anomalies_flagged.inc_by(count as u64);
    }

    /// Text exposition of the default registry
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
            warn!(error = %e, "Failed to encode metrics");
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

/// Structured logger for pipeline events
#[derive(Clone)]
pub struct StructuredLogger {
    run_id: String,
}

impl StructuredLogger {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Log pipeline start
    pub fn run_started(&self, utility: &Utility, rows: usize, models: &[ModelKind], seed: u64) {
        let models: Vec<&str> = models.iter().map(|m| m.name()).collect();
        info!(
            event = "run_started",
            run_id = %self.run_id,
            utility = %utility,
            rows = rows,
            models = ?models,
            seed = seed,
            "Forecasting run started"
        );
    }

    /// Log a scored adapter
    pub fn model_trained(&self, metrics: &AccuracyMetrics, elapsed_secs: f64) {
        info!(
            event = "model_trained",
            run_id = %self.run_id,
            model = %metrics.model,
            mae = metrics.mae,
            mape = metrics.mape,
            rmse = metrics.rmse,
            samples = metrics.samples,
            elapsed_secs = elapsed_secs,
            "Model trained and scored"
        );
    }

    /// Log an adapter left out of the comparison
    pub fn model_failed(&self, model: ModelKind, error: &str) {
        warn!(
            event = "model_failed",
            run_id = %self.run_id,
            model = %model,
            error = %error,
            "Model failed, continuing without it"
        );
    }

    /// Log the anomaly pass outcome
    pub fn anomalies_detected(&self, utility: &Utility, rows: usize, anomalies: usize) {
        info!(
            event = "anomalies_detected",
            run_id = %self.run_id,
            utility = %utility,
            rows = rows,
            anomalies = anomalies,
            "Anomaly detection finished"
        );
    }

    /// Log pipeline completion
    pub fn run_finished(&self, succeeded: usize, failed: usize, best: Option<ModelKind>) {
        if succeeded == 0 {
            warn!(
                event = "run_finished",
                run_id = %self.run_id,
                succeeded = succeeded,
                failed = failed,
                "Forecasting run finished without a usable model"
            );
        } else {
            info!(
                event = "run_finished",
                run_id = %self.run_id,
                succeeded = succeeded,
                failed = failed,
                best_model = ?best.map(|m| m.name()),
                "Forecasting run finished"
            );
        }
    }
}
