//! Model comparison
//!
//! Ranks the adapters that succeeded, keeps the top feature importances of
//! each, and records the ones that did not. A run with no successful adapter
//! is the only outcome reported as an error.

use crate::adapters::ModelEvaluation;
use crate::error::{ModelError, ReportingError};
use crate::models::{AccuracyMetrics, FeatureImportance, ModelKind};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Metric the ranking is ordered by (ascending)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PrimaryMetric {
    Mae,
    #[default]
    Mape,
    Rmse,
}

impl PrimaryMetric {
    pub fn of(&self, metrics: &AccuracyMetrics) -> f64 {
        match self {
            PrimaryMetric::Mae => metrics.mae,
            PrimaryMetric::Mape => metrics.mape,
            PrimaryMetric::Rmse => metrics.rmse,
        }
    }
}

impl fmt::Display for PrimaryMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PrimaryMetric::Mae => "mae",
            PrimaryMetric::Mape => "mape",
            PrimaryMetric::Rmse => "rmse",
        })
    }
}

impl FromStr for PrimaryMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mae" => Ok(PrimaryMetric::Mae),
            "mape" => Ok(PrimaryMetric::Mape),
            "rmse" => Ok(PrimaryMetric::Rmse),
            other => Err(format!("unknown metric '{other}' (expected mae, mape or rmse)")),
        }
    }
}

/// Reporter parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub primary_metric: PrimaryMetric,
    /// Feature importances kept per model
    pub top_n: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            primary_metric: PrimaryMetric::Mape,
            top_n: 10,
        }
    }
}

/// An adapter that was left out of the comparison
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelFailure {
    pub model: ModelKind,
    pub error: String,
}

impl ModelFailure {
    pub fn new(model: ModelKind, error: &ModelError) -> Self {
        Self {
            model,
            error: error.to_string(),
        }
    }
}

/// Side-by-side view of every attempted model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ComparisonReport {
    pub primary_metric: PrimaryMetric,
    /// Best first
    pub ranking: Vec<AccuracyMetrics>,
    pub failures: Vec<ModelFailure>,
    pub feature_importance: BTreeMap<ModelKind, Vec<FeatureImportance>>,
}

impl ComparisonReport {
    pub fn best(&self) -> Option<ModelKind> {
        self.ranking.first().map(|m| m.model)
    }

    pub fn succeeded(&self) -> usize {
        self.ranking.len()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ComparisonReporter {
    config: ReportConfig,
}

impl ComparisonReporter {
    pub fn new(config: ReportConfig) -> Self {
        Self { config }
    }

    pub fn compile(
        &self,
        evaluations: &[ModelEvaluation],
        failures: Vec<ModelFailure>,
    ) -> Result<ComparisonReport, ReportingError> {
        if evaluations.is_empty() {
            return Err(ReportingError::NoModelsSucceeded {
                failures: failures.len(),
            });
        }

        let metric = self.config.primary_metric;
        let mut ranking: Vec<AccuracyMetrics> =
            evaluations.iter().map(|e| e.metrics.clone()).collect();
        ranking.sort_by(|a, b| {
            metric
                .of(a)
                .total_cmp(&metric.of(b))
                .then_with(|| a.model.name().cmp(b.model.name()))
        });

        let feature_importance = evaluations
            .iter()
            .filter(|e| !e.feature_importance.is_empty())
            .map(|e| {
                let top = e
                    .feature_importance
                    .iter()
                    .take(self.config.top_n)
                    .cloned()
                    .collect();
                (e.model, top)
            })
            .collect();

        let mut failures = failures;
        failures.sort_by(|a, b| a.model.name().cmp(b.model.name()));

        Ok(ComparisonReport {
            primary_metric: metric,
            ranking,
            failures,
            feature_importance,
        })
    }
}
