//! Run configuration
//!
//! One immutable value carries every toggle of a run (seed, sampling,
//! enabled models, per-family parameters). It is passed explicitly to the
//! pipeline so two runs with equal configs and inputs are reproducible.

use crate::adapters::{BoostingConfig, DecompositionConfig, SequenceConfig};
use crate::anomaly::AnomalyConfig;
use crate::dataset::DEFAULT_TARGET_COLUMN;
use crate::error::DataError;
use crate::features::FeatureConfig;
use crate::models::{ModelKind, Utility, CAMPUS_SCOPE};
use crate::report::ReportConfig;
use serde::{Deserialize, Serialize};

/// Default random seed
pub const DEFAULT_SEED: u64 = 42;

/// Complete configuration for one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub seed: u64,
    /// Share of input rows kept before series assembly; 1.0 keeps everything
    pub sample_fraction: f64,
    pub utility: Utility,
    pub entity_scope: String,
    pub target_column: String,
    pub models: Vec<ModelKind>,
    pub features: FeatureConfig,
    pub decomposition: DecompositionConfig,
    pub sequence: SequenceConfig,
    pub boosting: BoostingConfig,
    pub anomaly: AnomalyConfig,
    pub report: ReportConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            seed: DEFAULT_SEED,
            sample_fraction: 1.0,
            utility: Utility::Electricity,
            entity_scope: CAMPUS_SCOPE.to_string(),
            target_column: DEFAULT_TARGET_COLUMN.to_string(),
            models: ModelKind::ALL.to_vec(),
            features: FeatureConfig::default(),
            decomposition: DecompositionConfig::default(),
            sequence: SequenceConfig::default(),
            boosting: BoostingConfig::default(),
            anomaly: AnomalyConfig::default(),
            report: ReportConfig::default(),
        }
    }
}

impl RunConfig {
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_utility(mut self, utility: Utility) -> Self {
        self.utility = utility;
        self
    }

    pub fn with_models(mut self, models: Vec<ModelKind>) -> Self {
        self.models = models;
        self
    }

    pub fn is_enabled(&self, model: ModelKind) -> bool {
        self.models.contains(&model)
    }

    /// Reject settings no stage could run with
    pub fn validate(&self) -> Result<(), DataError> {
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(DataError::InvalidParameter(format!(
                "sample_fraction must be in (0, 1], got {}",
                self.sample_fraction
            )));
        }
        if self.target_column.trim().is_empty() {
            return Err(DataError::InvalidParameter(
                "target_column must not be empty".to_string(),
            ));
        }
        self.decomposition.split.validate()?;
        self.sequence.split.validate()?;
        self.boosting.split.validate()?;
        Ok(())
    }
}
