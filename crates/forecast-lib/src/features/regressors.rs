//! Exogenous regressor preparation
//!
//! Sporadic gaps are filled (mean or forward fill); columns that are mostly
//! or entirely absent are left out of the run.

use crate::dataset::Series;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Temperature column used to derive degree-day regressors
pub const TEMPERATURE_COLUMN: &str = "temperature_2m";

/// How sporadic regressor gaps are filled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Imputation {
    /// Column mean over the present cells
    #[default]
    Mean,
    /// Last observed value; leading gaps fall back to the mean
    ForwardFill,
}

/// Gap-free regressor columns aligned with a series
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegressorSet {
    pub names: Vec<String>,
    pub columns: Vec<Vec<f64>>,
}

impl RegressorSet {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.columns[i].as_slice())
    }

    /// Keep only the named columns, in the order given
    pub fn select(&self, wanted: &[String]) -> RegressorSet {
        let mut out = RegressorSet::default();
        for name in wanted {
            if let Some(column) = self.column(name) {
                out.names.push(name.clone());
                out.columns.push(column.to_vec());
            }
        }
        out
    }
}

/// Regressor handling knobs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegressorConfig {
    pub imputation: Imputation,
    /// Columns missing in a larger share of rows are omitted
    pub max_missing_fraction: f64,
    pub derive_degree_days: bool,
    /// Degree-day base temperature (°F)
    pub degree_day_base: f64,
}

impl Default for RegressorConfig {
    fn default() -> Self {
        Self {
            imputation: Imputation::Mean,
            max_missing_fraction: 0.5,
            derive_degree_days: true,
            degree_day_base: 65.0,
        }
    }
}

/// Fill, filter and extend the regressor columns of a series
///
/// Missing shares and fill statistics are computed over the whole series,
/// test rows included.
pub fn prepare_regressors(series: &Series, config: &RegressorConfig) -> RegressorSet {
    let rows = series.len();
    let mut set = RegressorSet::default();

    for (name, cells) in &series.regressors {
        let missing = cells.iter().filter(|c| c.is_none()).count();
        if rows == 0 || missing == rows {
            debug!(regressor = %name, "Omitting absent regressor");
            continue;
        }
        let missing_fraction = missing as f64 / rows as f64;
        if missing_fraction > config.max_missing_fraction {
            debug!(
                regressor = %name,
                missing_fraction = missing_fraction,
                "Omitting sparse regressor"
            );
            continue;
        }
        set.names.push(name.clone());
        set.columns.push(impute(cells, config.imputation));
    }

    if config.derive_degree_days {
        let has_hdd = set.names.iter().any(|n| n == "hdd");
        let has_cdd = set.names.iter().any(|n| n == "cdd");
        if let Some(temperature) = set.column(TEMPERATURE_COLUMN).map(<[f64]>::to_vec) {
            if !has_hdd {
                set.names.push("hdd".to_string());
                set.columns.push(heating_degrees(&temperature, config.degree_day_base));
            }
            if !has_cdd {
                set.names.push("cdd".to_string());
                set.columns.push(cooling_degrees(&temperature, config.degree_day_base));
            }
        }
    }

    set
}

/// Fill `None` cells; the column must contain at least one value
pub fn impute(cells: &[Option<f64>], strategy: Imputation) -> Vec<f64> {
    let present: Vec<f64> = cells.iter().flatten().copied().collect();
    let mean = if present.is_empty() {
        0.0
    } else {
        present.iter().sum::<f64>() / present.len() as f64
    };

    match strategy {
        Imputation::Mean => cells.iter().map(|c| c.unwrap_or(mean)).collect(),
        Imputation::ForwardFill => {
            let mut last = None;
            cells
                .iter()
                .map(|c| {
                    if c.is_some() {
                        last = *c;
                    }
                    last.unwrap_or(mean)
                })
                .collect()
        }
    }
}

/// `max(0, base − T)`
pub fn heating_degrees(temperature: &[f64], base: f64) -> Vec<f64> {
    temperature.iter().map(|t| (base - t).max(0.0)).collect()
}

/// `max(0, T − base)`
pub fn cooling_degrees(temperature: &[f64], base: f64) -> Vec<f64> {
    temperature.iter().map(|t| (t - base).max(0.0)).collect()
}
