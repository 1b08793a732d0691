//! Core data models for the forecasting pipeline
//!
//! Every record here is produced by one pipeline stage and consumed read-only
//! by the next. Nothing is mutated after emission.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Default entity scope for campus-wide aggregates
pub const CAMPUS_SCOPE: &str = "campus";

/// Metered utility
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Utility {
    Electricity,
    Gas,
    Water,
    Steam,
    ChilledWater,
    Other(String),
}

impl Utility {
    pub fn as_str(&self) -> &str {
        match self {
            Utility::Electricity => "ELECTRICITY",
            Utility::Gas => "GAS",
            Utility::Water => "WATER",
            Utility::Steam => "STEAM",
            Utility::ChilledWater => "CHILLED_WATER",
            Utility::Other(name) => name,
        }
    }
}

impl fmt::Display for Utility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Utility {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        if normalized.is_empty() {
            return Err("utility name is empty".to_string());
        }
        Ok(match normalized.as_str() {
            "ELECTRICITY" | "ELECTRIC" => Utility::Electricity,
            "GAS" | "NATURAL_GAS" | "NATURALGAS" => Utility::Gas,
            "WATER" => Utility::Water,
            "STEAM" => Utility::Steam,
            "CHILLED_WATER" | "CHILLEDWATER" => Utility::ChilledWater,
            _ => Utility::Other(normalized),
        })
    }
}

impl TryFrom<String> for Utility {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Utility> for String {
    fn from(value: Utility) -> Self {
        value.as_str().to_string()
    }
}

/// One hourly reading for an (entity, utility) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeriesPoint {
    pub entity_scope: String,
    pub utility: Utility,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
    /// Exogenous regressors; `None` marks a missing cell
    #[serde(default)]
    pub regressors: BTreeMap<String, Option<f64>>,
}

/// One day of consumption for a building
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyRecord {
    pub entity_id: String,
    pub utility: Utility,
    pub date: NaiveDate,
    pub energy_value: Option<f64>,
    /// Energy use intensity (energy per unit of gross floor area)
    pub eui: Option<f64>,
    pub gross_area: Option<f64>,
    pub mean_temperature: Option<f64>,
    pub building_name: Option<String>,
}

impl DailyRecord {
    /// EUI as supplied, or derived from gross area when that is positive
    pub fn effective_eui(&self) -> Option<f64> {
        if let Some(eui) = self.eui.filter(|v| v.is_finite()) {
            return Some(eui);
        }
        match (self.energy_value, self.gross_area) {
            (Some(energy), Some(area)) if area > 0.0 => Some(energy / area),
            _ => None,
        }
    }
}

/// A single engineered row for one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub timestamp: DateTime<Utc>,
    pub values: Vec<f64>,
    pub target: f64,
}

/// Model families evaluated by the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModelKind {
    Decomposition,
    Sequence,
    GradientBoosted,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::Decomposition,
        ModelKind::Sequence,
        ModelKind::GradientBoosted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ModelKind::Decomposition => "decomposition",
            ModelKind::Sequence => "sequence",
            ModelKind::GradientBoosted => "gradient-boosted",
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "decomposition" | "prophet" => Ok(ModelKind::Decomposition),
            "sequence" | "lstm" => Ok(ModelKind::Sequence),
            "gradient-boosted" | "gbt" | "xgboost" => Ok(ModelKind::GradientBoosted),
            other => Err(format!("unknown model family '{}'", other)),
        }
    }
}

/// Decomposed components of a forecast
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Components {
    pub trend: f64,
    pub daily: f64,
    pub weekly: f64,
    pub yearly: f64,
}

/// One forecast emitted by a model for one timestamp
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastResult {
    pub model: ModelKind,
    pub utility: Utility,
    pub timestamp: DateTime<Utc>,
    pub point_estimate: f64,
    pub actual: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub components: Option<Components>,
}

/// Accuracy over the test partition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccuracyMetrics {
    pub model: ModelKind,
    pub mae: f64,
    pub mape: f64,
    pub rmse: f64,
    /// Number of matched (actual, predicted) pairs
    pub samples: usize,
}

/// Relative contribution of one input feature
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}

/// Per-row output of the anomaly detector
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyRecord {
    pub entity_id: String,
    pub date: NaiveDate,
    pub observed_value: f64,
    /// Negative means outlier; lower is more anomalous
    pub anomaly_score: f64,
    pub is_anomaly: bool,
}

/// Per-entity anomaly rollup
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub entity_id: String,
    pub building_name: Option<String>,
    pub anomaly_count: usize,
    pub mean_anomalous_value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utility_parsing() {
        assert_eq!("electricity".parse::<Utility>().unwrap(), Utility::Electricity);
        assert_eq!("Natural Gas".parse::<Utility>().unwrap(), Utility::Gas);
        assert_eq!("chilled-water".parse::<Utility>().unwrap(), Utility::ChilledWater);
        assert_eq!(
            "solar".parse::<Utility>().unwrap(),
            Utility::Other("SOLAR".to_string())
        );
        assert!("  ".parse::<Utility>().is_err());
    }

    #[test]
    fn test_utility_serde_roundtrip() {
        let json = serde_json::to_string(&Utility::Steam).unwrap();
        assert_eq!(json, "\"STEAM\"");
        let back: Utility = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Utility::Steam);
    }

    #[test]
    fn test_model_kind_aliases() {
        assert_eq!("xgboost".parse::<ModelKind>().unwrap(), ModelKind::GradientBoosted);
        assert_eq!("LSTM".parse::<ModelKind>().unwrap(), ModelKind::Sequence);
        assert_eq!("prophet".parse::<ModelKind>().unwrap(), ModelKind::Decomposition);
        assert!("arima".parse::<ModelKind>().is_err());
    }

    #[test]
    fn test_effective_eui() {
        let mut record = DailyRecord {
            entity_id: "b1".to_string(),
            utility: Utility::Electricity,
            date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            energy_value: Some(500.0),
            eui: None,
            gross_area: Some(1000.0),
            mean_temperature: None,
            building_name: None,
        };
        assert_eq!(record.effective_eui(), Some(0.5));

        record.gross_area = Some(0.0);
        assert_eq!(record.effective_eui(), None);

        record.eui = Some(2.0);
        assert_eq!(record.effective_eui(), Some(2.0));
    }
}
