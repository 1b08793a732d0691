//! End-to-end run
//!
//! Samples and assembles the hourly series once, fans the enabled model
//! adapters out to blocking worker threads that share it read-only, runs
//! the anomaly pass alongside them, and compiles the comparison once every
//! attempt has finished.

use crate::adapters::{ModelAdapter, ModelEvaluation};
use crate::anomaly::{AnomalyDetector, AnomalyReport};
use crate::config::RunConfig;
use crate::dataset::{assemble_series, sample_rows, Series};
use crate::error::{AnomalyError, DataError, ModelError, ModelResult, ReportingError};
use crate::models::{DailyRecord, ModelKind, TimeSeriesPoint};
use crate::observability::{PipelineMetrics, StructuredLogger};
use crate::report::{ComparisonReport, ComparisonReporter, ModelFailure};
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Everything a run produced
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub comparison: ComparisonReport,
    /// Successful adapters in configured order
    pub evaluations: Vec<ModelEvaluation>,
    /// `None` when no daily table was supplied
    pub anomalies: Option<Result<AnomalyReport, AnomalyError>>,
}

impl PipelineOutput {
    pub fn evaluation(&self, model: ModelKind) -> Option<&ModelEvaluation> {
        self.evaluations.iter().find(|e| e.model == model)
    }
}

type AdapterHandle = JoinHandle<(ModelResult<ModelEvaluation>, f64)>;

pub struct Pipeline {
    config: Arc<RunConfig>,
    metrics: PipelineMetrics,
    logger: StructuredLogger,
}

impl Pipeline {
    pub fn new(config: RunConfig) -> Self {
        let run_id = format!("run-{}-{}", Utc::now().format("%Y%m%dT%H%M%S"), config.seed);
        Self {
            config: Arc::new(config),
            metrics: PipelineMetrics::new(),
            logger: StructuredLogger::new(run_id),
        }
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn metrics(&self) -> &PipelineMetrics {
        &self.metrics
    }

    /// Run every enabled adapter and, when `daily` is given, the anomaly pass
    ///
    /// Adapter failures are recorded in the comparison; only a run with no
    /// successful adapter is an error.
    pub async fn run(
        &self,
        hourly: Vec<TimeSeriesPoint>,
        daily: Option<Vec<DailyRecord>>,
    ) -> Result<PipelineOutput, ReportingError> {
        let models = self.enabled_models();
        self.logger
            .run_started(&self.config.utility, hourly.len(), &models, self.config.seed);

        let anomaly_task = daily.map(|records| self.spawn_anomalies(records));

        let mut evaluations = Vec::new();
        let mut failures = Vec::new();
        match self.prepare_series(&hourly) {
            Ok(series) => {
                let series = Arc::new(series);
                let handles: Vec<(ModelKind, AdapterHandle)> = models
                    .iter()
                    .map(|&kind| (kind, self.spawn_adapter(kind, Arc::clone(&series))))
                    .collect();
                for (kind, handle) in handles {
                    match join_adapter(kind, handle).await {
                        Ok((evaluation, elapsed)) => {
                            self.metrics.observe_adapter_latency(kind, elapsed);
                            self.metrics.inc_adapter_succeeded(kind);
                            self.metrics.add_feature_rows_dropped(evaluation.rows_dropped);
                            self.logger.model_trained(&evaluation.metrics, elapsed);
                            evaluations.push(evaluation);
                        }
                        Err(e) => failures.push(self.record_failure(kind, &e)),
                    }
                }
            }
            Err(e) => {
                let error = ModelError::Data(e);
                for &kind in &models {
                    failures.push(self.record_failure(kind, &error));
                }
            }
        }

        let anomalies = match anomaly_task {
            Some(task) => Some(self.join_anomalies(task).await),
            None => None,
        };

        let reporter = ComparisonReporter::new(self.config.report.clone());
        let failed = failures.len();
        let comparison = match reporter.compile(&evaluations, failures) {
            Ok(report) => report,
            Err(e) => {
                self.logger.run_finished(0, failed, None);
                return Err(e);
            }
        };
        self.logger
            .run_finished(comparison.succeeded(), failed, comparison.best());

        Ok(PipelineOutput {
            comparison,
            evaluations,
            anomalies,
        })
    }

    /// One adapter on its own; the model must be enabled in the run config
    pub async fn evaluate_model(
        &self,
        kind: ModelKind,
        hourly: Vec<TimeSeriesPoint>,
    ) -> ModelResult<ModelEvaluation> {
        if !self.config.is_enabled(kind) {
            return Err(ModelError::Disabled(kind));
        }
        self.logger
            .run_started(&self.config.utility, hourly.len(), &[kind], self.config.seed);
        let series = match self.prepare_series(&hourly) {
            Ok(series) => Arc::new(series),
            Err(e) => {
                let error = ModelError::Data(e);
                self.record_failure(kind, &error);
                return Err(error);
            }
        };
        match join_adapter(kind, self.spawn_adapter(kind, series)).await {
            Ok((evaluation, elapsed)) => {
                self.metrics.observe_adapter_latency(kind, elapsed);
                self.metrics.inc_adapter_succeeded(kind);
                self.logger.model_trained(&evaluation.metrics, elapsed);
                Ok(evaluation)
            }
            Err(e) => {
                self.record_failure(kind, &e);
                Err(e)
            }
        }
    }

    /// Anomaly pass on its own, for runs without an hourly table
    pub async fn detect_anomalies(
        &self,
        daily: Vec<DailyRecord>,
    ) -> Result<AnomalyReport, AnomalyError> {
        let task = self.spawn_anomalies(daily);
        self.join_anomalies(task).await
    }

    /// Configured models, first occurrence kept
    fn enabled_models(&self) -> Vec<ModelKind> {
        let mut models: Vec<ModelKind> = Vec::with_capacity(self.config.models.len());
        for &kind in &self.config.models {
            if !models.contains(&kind) {
                models.push(kind);
            }
        }
        models
    }

    fn prepare_series(&self, hourly: &[TimeSeriesPoint]) -> Result<Series, DataError> {
        self.config.validate()?;
        let sampled = sample_rows(hourly, self.config.sample_fraction, self.config.seed)?;
        if sampled.len() < hourly.len() {
            info!(
                kept = sampled.len(),
                total = hourly.len(),
                fraction = self.config.sample_fraction,
                "Sampled input rows"
            );
        }
        assemble_series(&sampled, &self.config.entity_scope, &self.config.utility)
    }

    fn spawn_adapter(&self, kind: ModelKind, series: Arc<Series>) -> AdapterHandle {
        let adapter = ModelAdapter::from_config(kind, &self.config);
        debug!(model = %kind, rows = series.len(), "Spawning adapter worker");
        tokio::task::spawn_blocking(move || {
            let start = Instant::now();
            let result = adapter.evaluate(&series);
            (result, start.elapsed().as_secs_f64())
        })
    }

    fn spawn_anomalies(
        &self,
        records: Vec<DailyRecord>,
    ) -> JoinHandle<Result<AnomalyReport, AnomalyError>> {
        let detector = AnomalyDetector::new(self.config.anomaly.clone(), self.config.seed);
        let utility = self.config.utility.clone();
        tokio::task::spawn_blocking(move || detector.detect(&records, &utility))
    }

    async fn join_anomalies(
        &self,
        task: JoinHandle<Result<AnomalyReport, AnomalyError>>,
    ) -> Result<AnomalyReport, AnomalyError> {
        let result = match task.await {
            Ok(result) => result,
            Err(e) => Err(AnomalyError::WorkerPanicked(e.to_string())),
        };
        match &result {
            Ok(report) => {
                let flagged = report.anomaly_count();
                self.metrics.add_anomalies_flagged(flagged);
                self.logger
                    .anomalies_detected(&report.utility, report.records.len(), flagged);
            }
            Err(e) => warn!(error = %e, "Anomaly detection failed"),
        }
        result
    }

    fn record_failure(&self, kind: ModelKind, error: &ModelError) -> ModelFailure {
        self.metrics.inc_adapter_failed(kind);
        self.logger.model_failed(kind, &error.to_string());
        ModelFailure::new(kind, error)
    }
}

async fn join_adapter(
    kind: ModelKind,
    handle: AdapterHandle,
) -> ModelResult<(ModelEvaluation, f64)> {
    match handle.await {
        Ok((result, elapsed)) => result.map(|evaluation| (evaluation, elapsed)),
        Err(e) => Err(ModelError::WorkerPanicked {
            model: kind,
            reason: e.to_string(),
        }),
    }
}
