//! Building-level anomaly detection over daily consumption
//!
//! One forest is fit per utility over every building-day of that utility.
//! Rows are labelled with the shifted isolation score and rolled up per
//! entity for the summary table.

use super::isolation_forest::IsolationForest;
use crate::error::AnomalyError;
use crate::models::{AnomalyRecord, AnomalySummary, DailyRecord, Utility};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Detector parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Expected share of outliers, in (0, 0.5]
    pub contamination: f64,
    pub n_trees: usize,
    /// Rows drawn per tree
    pub sample_size: usize,
    /// Temperature joins the feature set when at least this share of rows carry it
    pub min_temperature_coverage: f64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            contamination: 0.05,
            n_trees: 100,
            sample_size: 256,
            min_temperature_coverage: 0.5,
        }
    }
}

impl AnomalyConfig {
    pub fn with_contamination(mut self, contamination: f64) -> Self {
        self.contamination = contamination;
        self
    }
}

/// Labels and rollup for one utility
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalyReport {
    pub utility: Utility,
    pub feature_names: Vec<String>,
    pub records: Vec<AnomalyRecord>,
    pub summary: Vec<AnomalySummary>,
    /// Rows of this utility dropped for missing a feature
    pub rows_dropped: usize,
    pub offset: f64,
}

impl AnomalyReport {
    pub fn anomaly_count(&self) -> usize {
        self.records.iter().filter(|r| r.is_anomaly).count()
    }

    /// Highest-count entities first
    pub fn top_entities(&self, n: usize) -> &[AnomalySummary] {
        &self.summary[..n.min(self.summary.len())]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Energy,
    Eui,
    Temperature,
}

impl Column {
    fn name(self) -> &'static str {
        match self {
            Column::Energy => "energy",
            Column::Eui => "eui",
            Column::Temperature => "mean_temperature",
        }
    }

    fn value(self, record: &DailyRecord) -> Option<f64> {
        let v = match self {
            Column::Energy => record.energy_value,
            Column::Eui => record.effective_eui(),
            Column::Temperature => record.mean_temperature,
        };
        v.filter(|v| v.is_finite())
    }
}

/// Isolation-forest detector
#[derive(Debug, Clone)]
pub struct AnomalyDetector {
    config: AnomalyConfig,
    seed: u64,
}

impl AnomalyDetector {
    pub fn new(config: AnomalyConfig, seed: u64) -> Self {
        Self { config, seed }
    }

    pub fn config(&self) -> &AnomalyConfig {
        &self.config
    }

    /// Fit on the rows of `utility` and label each of them
    pub fn detect(
        &self,
        records: &[DailyRecord],
        utility: &Utility,
    ) -> Result<AnomalyReport, AnomalyError> {
        let candidates: Vec<&DailyRecord> =
            records.iter().filter(|r| &r.utility == utility).collect();
        if candidates.is_empty() {
            return Err(AnomalyError::NoRows);
        }

        let columns = self.select_columns(&candidates);
        if columns.len() < 2 {
            return Err(AnomalyError::InsufficientFeatures {
                available: columns.len(),
            });
        }

        let mut kept = Vec::with_capacity(candidates.len());
        let mut observed = Vec::with_capacity(candidates.len());
        let mut data = Vec::with_capacity(candidates.len());
        for record in &candidates {
            let row: Option<Vec<f64>> = columns.iter().map(|c| c.value(record)).collect();
            if let (Some(energy), Some(row)) = (record.energy_value, row) {
                kept.push(*record);
                observed.push(energy);
                data.push(row);
            }
        }
        if data.is_empty() {
            return Err(AnomalyError::NoRows);
        }
        let rows_dropped = candidates.len() - data.len();
        debug!(
            utility = %utility,
            rows = data.len(),
            rows_dropped,
            features = columns.len(),
            "Fitting isolation forest"
        );

        let forest = IsolationForest::fit(
            &data,
            self.config.n_trees,
            self.config.sample_size,
            self.config.contamination,
            self.seed,
        )?;

        let records: Vec<AnomalyRecord> = kept
            .iter()
            .zip(&observed)
            .zip(&data)
            .map(|((record, &energy), row)| {
                let score = forest.decision(row);
                AnomalyRecord {
                    entity_id: record.entity_id.clone(),
                    date: record.date,
                    observed_value: energy,
                    anomaly_score: score,
                    is_anomaly: score < 0.0,
                }
            })
            .collect();
        let summary = summarize(&records, &kept);

        let report = AnomalyReport {
            utility: utility.clone(),
            feature_names: columns.iter().map(|c| c.name().to_string()).collect(),
            records,
            summary,
            rows_dropped,
            offset: forest.offset(),
        };
        info!(
            utility = %utility,
            rows = report.records.len(),
            anomalies = report.anomaly_count(),
            entities_flagged = report.summary.len(),
            "Anomaly detection complete"
        );
        Ok(report)
    }

    /// Energy always; EUI when any row has it; temperature only with enough coverage
    fn select_columns(&self, rows: &[&DailyRecord]) -> Vec<Column> {
        let coverage = |column: Column| {
            rows.iter().filter(|r| column.value(r).is_some()).count() as f64 / rows.len() as f64
        };
        let mut columns = vec![Column::Energy];
        if coverage(Column::Eui) > 0.0 {
            columns.push(Column::Eui);
        }
        let temperature = coverage(Column::Temperature);
        if temperature > 0.0 && temperature >= self.config.min_temperature_coverage {
            columns.push(Column::Temperature);
        }
        columns
    }
}

/// Per-entity rollup of flagged rows, most-flagged first
fn summarize(records: &[AnomalyRecord], sources: &[&DailyRecord]) -> Vec<AnomalySummary> {
    let mut names: BTreeMap<&str, &str> = BTreeMap::new();
    for source in sources {
        if let Some(name) = source.building_name.as_deref().filter(|n| !n.trim().is_empty()) {
            names.entry(source.entity_id.as_str()).or_insert(name);
        }
    }

    let mut flagged: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for record in records.iter().filter(|r| r.is_anomaly) {
        let entry = flagged.entry(record.entity_id.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += record.observed_value;
    }

    let mut summary: Vec<AnomalySummary> = flagged
        .into_iter()
        .map(|(entity, (count, total))| AnomalySummary {
            entity_id: entity.to_string(),
            building_name: names.get(entity).map(|n| n.to_string()),
            anomaly_count: count,
            mean_anomalous_value: total / count as f64,
        })
        .collect();
    // BTreeMap order already breaks ties by entity id; the sort is stable
    summary.sort_by(|a, b| b.anomaly_count.cmp(&a.anomaly_count));
    summary
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, NaiveDate};

    fn day(entity: &str, offset: i64, energy: f64) -> DailyRecord {
        DailyRecord {
            entity_id: entity.to_string(),
            utility: Utility::Electricity,
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + Duration::days(offset),
            energy_value: Some(energy),
            eui: None,
            gross_area: Some(10_000.0),
            mean_temperature: Some(40.0 + (offset % 9) as f64),
            building_name: Some(format!("{entity} hall")),
        }
    }

    fn campus_with_spikes() -> Vec<DailyRecord> {
        let mut rows = Vec::new();
        for d in 0..50 {
            let base = 1_000.0 + (d % 11) as f64 * 15.0;
            rows.push(day("b1", d, base));
            let b2 = if d % 10 == 3 { base * 100.0 } else { base * 1.1 };
            rows.push(day("b2", d, b2));
        }
        rows
    }

    #[test]
    fn test_injected_spikes_are_flagged() {
        let detector = AnomalyDetector::new(AnomalyConfig::default(), 42);
        let report = detector.detect(&campus_with_spikes(), &Utility::Electricity).unwrap();
        assert_eq!(report.records.len(), 100);
        assert_eq!(report.anomaly_count(), 5);
        assert!(report
            .records
            .iter()
            .filter(|r| r.is_anomaly)
            .all(|r| r.entity_id == "b2" && r.observed_value > 50_000.0));
        assert_eq!(report.summary[0].entity_id, "b2");
        assert_eq!(report.summary[0].anomaly_count, 5);
        assert_eq!(report.summary[0].building_name.as_deref(), Some("b2 hall"));
    }

    #[test]
    fn test_rows_missing_features_are_dropped() {
        let mut rows = campus_with_spikes();
        rows[0].gross_area = None;
        rows[1].energy_value = None;
        let detector = AnomalyDetector::new(AnomalyConfig::default(), 1);
        let report = detector.detect(&rows, &Utility::Electricity).unwrap();
        assert_eq!(report.rows_dropped, 2);
        assert_eq!(report.feature_names, vec!["energy", "eui", "mean_temperature"]);
    }

    #[test]
    fn test_insufficient_features() {
        let rows: Vec<DailyRecord> = (0..10)
            .map(|d| {
                let mut r = day("b1", d, 100.0);
                r.gross_area = None;
                r.mean_temperature = None;
                r
            })
            .collect();
        let detector = AnomalyDetector::new(AnomalyConfig::default(), 1);
        assert_eq!(
            detector.detect(&rows, &Utility::Electricity).unwrap_err(),
            AnomalyError::InsufficientFeatures { available: 1 }
        );
    }

    #[test]
    fn test_energy_is_required() {
        let rows: Vec<DailyRecord> = (0..40)
            .map(|d| {
                let mut r = day("b1", d, 100.0);
                r.energy_value = None;
                r.eui = Some(0.5);
                r
            })
            .collect();
        let detector = AnomalyDetector::new(AnomalyConfig::default(), 1);
        assert_eq!(
            detector.detect(&rows, &Utility::Electricity).unwrap_err(),
            AnomalyError::NoRows
        );
    }

    #[test]
    fn test_observed_value_is_energy() {
        let rows: Vec<DailyRecord> = (0..40)
            .map(|d| {
                let mut r = day("b1", d, 700.0 + d as f64);
                r.eui = Some(0.5);
                r
            })
            .collect();
        let detector = AnomalyDetector::new(AnomalyConfig::default(), 1);
        let report = detector.detect(&rows, &Utility::Electricity).unwrap();
        assert_eq!(report.feature_names[0], "energy");
        assert_eq!(report.records[0].observed_value, 700.0);
        assert_eq!(report.records[39].observed_value, 739.0);
    }

    #[test]
    fn test_other_utility_has_no_rows() {
        let detector = AnomalyDetector::new(AnomalyConfig::default(), 1);
        assert_eq!(
            detector.detect(&campus_with_spikes(), &Utility::Gas).unwrap_err(),
            AnomalyError::NoRows
        );
    }

    #[test]
    fn test_summary_ties_break_by_entity() {
        let mk = |entity: &str, value: f64| AnomalyRecord {
            entity_id: entity.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            observed_value: value,
            anomaly_score: -0.1,
            is_anomaly: true,
        };
        let records = vec![mk("c", 1.0), mk("a", 2.0), mk("b", 3.0), mk("b", 5.0)];
        let summary = summarize(&records, &[]);
        let order: Vec<&str> = summary.iter().map(|s| s.entity_id.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
        assert_eq!(summary[0].mean_anomalous_value, 4.0);
        assert_eq!(summary[1].building_name, None);
    }
}
