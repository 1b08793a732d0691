//! Flat feature table construction
//!
//! One row per timestamp: calendar encodings, lags, trailing means and
//! regressors. Lags are looked up by timestamp, not by position, so a gap in
//! the series never shifts a lag onto the wrong hour. Rolling windows cover
//! the hourly slots strictly before `t` and must be fully populated.

use super::calendar::{CalendarFeatures, CALENDAR_FEATURES, CYCLICAL_FEATURES};
use super::regressors::{prepare_regressors, RegressorConfig, RegressorSet};
use crate::dataset::Series;
use crate::error::{DataError, DataResult};
use crate::models::FeatureVector;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default lag offsets in hours: persistence, diurnal, weekly
pub const DEFAULT_LAGS_HOURS: [u32; 3] = [1, 24, 168];

/// Default trailing mean windows in hours
pub const DEFAULT_ROLLING_HOURS: [u32; 2] = [24, 168];

/// Feature engineering parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    pub lags_hours: Vec<u32>,
    pub rolling_windows_hours: Vec<u32>,
    pub include_cyclical: bool,
    pub regressors: RegressorConfig,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            lags_hours: DEFAULT_LAGS_HOURS.to_vec(),
            rolling_windows_hours: DEFAULT_ROLLING_HOURS.to_vec(),
            include_cyclical: true,
            regressors: RegressorConfig::default(),
        }
    }
}

impl FeatureConfig {
    pub fn with_lags(mut self, lags_hours: Vec<u32>) -> Self {
        self.lags_hours = lags_hours;
        self
    }

    pub fn with_rolling_windows(mut self, windows_hours: Vec<u32>) -> Self {
        self.rolling_windows_hours = windows_hours;
        self
    }

    /// Longest lookback any feature needs, in hours
    pub fn max_lookback_hours(&self) -> u32 {
        self.lags_hours
            .iter()
            .chain(self.rolling_windows_hours.iter())
            .copied()
            .max()
            .unwrap_or(0)
    }
}

/// Engineered rows plus their column names
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureTable {
    pub names: Vec<String>,
    pub rows: Vec<FeatureVector>,
    /// Position in the source series of each emitted row
    pub source_indices: Vec<usize>,
    /// Source rows skipped for lack of history
    pub dropped: usize,
}

impl FeatureTable {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn timestamps(&self) -> Vec<DateTime<Utc>> {
        self.rows.iter().map(|r| r.timestamp).collect()
    }
}

/// Builds the flat feature view consumed by the tree adapter
pub struct FeatureEngineer {
    config: FeatureConfig,
}

impl FeatureEngineer {
    pub fn new(config: FeatureConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FeatureConfig {
        &self.config
    }

    /// Column names for a given regressor set, in emission order
    pub fn feature_names(&self, regressors: &RegressorSet) -> Vec<String> {
        let mut names: Vec<String> = CALENDAR_FEATURES.iter().map(|s| s.to_string()).collect();
        if self.config.include_cyclical {
            names.extend(CYCLICAL_FEATURES.iter().map(|s| s.to_string()));
        }
        names.extend(self.config.lags_hours.iter().map(|h| format!("lag_{}h", h)));
        names.extend(
            self.config
                .rolling_windows_hours
                .iter()
                .map(|h| format!("rolling_mean_{}h", h)),
        );
        names.extend(regressors.names.iter().cloned());
        names
    }

    /// Build the feature table for a series
    ///
    /// Fails with `InsufficientHistory` when the series cannot cover the
    /// longest lookback even once.
    pub fn build(&self, series: &Series) -> DataResult<FeatureTable> {
        let lookback = self.config.max_lookback_hours() as usize;
        if series.len() <= lookback {
            return Err(DataError::InsufficientHistory {
                needed: lookback + 1,
                got: series.len(),
            });
        }

        let regressors = prepare_regressors(series, &self.config.regressors);
        let names = self.feature_names(&regressors);
        let runs = hourly_run_lengths(&series.timestamps);

        let mut prefix = Vec::with_capacity(series.len() + 1);
        prefix.push(0.0);
        for v in &series.values {
            prefix.push(prefix[prefix.len() - 1] + v);
        }

        let mut rows = Vec::new();
        let mut source_indices = Vec::new();
        let mut dropped = 0usize;

        'rows: for i in 0..series.len() {
            let ts = series.timestamps[i];
            let mut values = Vec::with_capacity(names.len());
            let calendar = CalendarFeatures::from_timestamp(&ts);
            values.extend_from_slice(&calendar.raw());
            if self.config.include_cyclical {
                values.extend_from_slice(&calendar.cyclical());
            }

            for &lag in &self.config.lags_hours {
                match lag_index(&series.timestamps, &runs, i, lag) {
                    Some(j) => values.push(series.values[j]),
                    None => {
                        dropped += 1;
                        continue 'rows;
                    }
                }
            }

            for &window in &self.config.rolling_windows_hours {
                let w = window as usize;
                if w == 0 || runs[i] < w {
                    dropped += 1;
                    continue 'rows;
                }
                values.push((prefix[i] - prefix[i - w]) / w as f64);
            }

            for column in &regressors.columns {
                values.push(column[i]);
            }

            rows.push(FeatureVector {
                timestamp: ts,
                values,
                target: series.values[i],
            });
            source_indices.push(i);
        }

        debug!(
            utility = %series.utility,
            emitted = rows.len(),
            dropped = dropped,
            features = names.len(),
            "Built feature table"
        );

        if rows.is_empty() {
            return Err(DataError::InsufficientHistory {
                needed: lookback + 1,
                got: series.len(),
            });
        }

        Ok(FeatureTable {
            names,
            rows,
            source_indices,
            dropped,
        })
    }
}

/// For each position, how many immediately preceding rows sit exactly one
/// hour apart from each other and from it
pub fn hourly_run_lengths(timestamps: &[DateTime<Utc>]) -> Vec<usize> {
    let hour = Duration::hours(1);
    let mut runs = Vec::with_capacity(timestamps.len());
    for (i, ts) in timestamps.iter().enumerate() {
        let run = if i > 0 && *ts - timestamps[i - 1] == hour {
            runs[i - 1] + 1
        } else {
            0
        };
        runs.push(run);
    }
    runs
}

fn lag_index(
    timestamps: &[DateTime<Utc>],
    runs: &[usize],
    i: usize,
    lag_hours: u32,
) -> Option<usize> {
    let lag = lag_hours as usize;
    if lag == 0 {
        return None;
    }
    if runs[i] >= lag {
        return Some(i - lag);
    }
    let wanted = timestamps[i] - Duration::hours(lag_hours as i64);
    timestamps[..i].binary_search(&wanted).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Utility, CAMPUS_SCOPE};
    use chrono::TimeZone;
    use proptest::prelude::*;
    use std::collections::BTreeMap;

    fn hourly_series(values: &[f64], skip: &[usize]) -> Series {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let mut timestamps = Vec::new();
        let mut kept = Vec::new();
        for (i, v) in values.iter().enumerate() {
            if skip.contains(&i) {
                continue;
            }
            timestamps.push(start + Duration::hours(i as i64));
            kept.push(*v);
        }
        Series {
            entity_scope: CAMPUS_SCOPE.to_string(),
            utility: Utility::Electricity,
            timestamps,
            values: kept,
            regressors: BTreeMap::new(),
        }
    }

    #[test]
    fn test_default_feature_names() {
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let names = engineer.feature_names(&RegressorSet::default());
        assert_eq!(names.len(), 4 + 6 + 3 + 2);
        assert_eq!(names[10], "lag_1h");
        assert_eq!(names[14], "rolling_mean_168h");
    }

    #[test]
    fn test_drops_first_rows_without_history() {
        let values: Vec<f64> = (0..200).map(|i| i as f64).collect();
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let table = engineer.build(&hourly_series(&values, &[])).unwrap();
        assert_eq!(table.len(), 200 - 168);
        assert_eq!(table.dropped, 168);
        assert_eq!(table.source_indices[0], 168);

        let first = &table.rows[0];
        assert_eq!(first.target, 168.0);
        // lag_1h, lag_24h, lag_168h
        assert_eq!(&first.values[10..13], &[167.0, 144.0, 0.0]);
        // mean of 144..=167 and 0..=167, neither includes t
        assert_eq!(first.values[13], (144..168).sum::<i32>() as f64 / 24.0);
        assert_eq!(first.values[14], (0..168).sum::<i32>() as f64 / 168.0);
    }

    #[test]
    fn test_insufficient_history() {
        let engineer = FeatureEngineer::new(FeatureConfig::default());
        let err = engineer.build(&hourly_series(&[1.0; 100], &[])).unwrap_err();
        assert_eq!(err, DataError::InsufficientHistory { needed: 169, got: 100 });
    }

    #[test]
    fn test_gap_is_not_zero_filled() {
        let config = FeatureConfig::default()
            .with_lags(vec![1, 24])
            .with_rolling_windows(vec![3]);
        let engineer = FeatureEngineer::new(config);
        let values: Vec<f64> = (0..60).map(|i| 10.0 + i as f64).collect();
        let table = engineer.build(&hourly_series(&values, &[30])).unwrap();
        let ts: Vec<_> = table.rows.iter().map(|r| r.timestamp).collect();
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        for hour in [31, 32, 33, 54] {
            assert!(
                !ts.contains(&(start + Duration::hours(hour))),
                "hour {} depends on the missing slot",
                hour
            );
        }
        assert!(ts.contains(&(start + Duration::hours(34))));
        // hour 55 has lag_24 from hour 31 through the gap by timestamp lookup
        let row55 = table
            .rows
            .iter()
            .find(|r| r.timestamp == start + Duration::hours(55))
            .unwrap();
        assert_eq!(row55.values[11], 10.0 + 31.0);
    }

    #[test]
    fn test_regressors_appended_last() {
        let mut series = hourly_series(&vec![5.0; 30], &[]);
        series
            .regressors
            .insert("temperature_2m".to_string(), vec![Some(70.0); 30]);
        let config = FeatureConfig::default().with_lags(vec![1]).with_rolling_windows(vec![]);
        let table = FeatureEngineer::new(config).build(&series).unwrap();
        assert_eq!(
            &table.names[table.names.len() - 3..],
            &["temperature_2m", "hdd", "cdd"]
        );
        assert_eq!(&table.rows[0].values[table.names.len() - 3..], &[70.0, 0.0, 5.0]);
    }

    proptest! {
        #[test]
        fn prop_rows_never_reach_before_lookback(
            len in 1usize..400,
            gaps in proptest::collection::vec(0usize..400, 0..8),
        ) {
            let values: Vec<f64> = (0..len).map(|i| (i % 17) as f64).collect();
            let series = hourly_series(&values, &gaps);
            let engineer = FeatureEngineer::new(FeatureConfig::default());
            if let Ok(table) = engineer.build(&series) {
                let lookback = engineer.config().max_lookback_hours() as usize;
                for (row, &idx) in table.rows.iter().zip(&table.source_indices) {
                    prop_assert!(idx >= lookback);
                    prop_assert_eq!(row.timestamp, series.timestamps[idx]);
                    prop_assert!(row.values.iter().all(|v| v.is_finite()));
                }
                prop_assert_eq!(table.len() + table.dropped, series.len());
            }
        }
    }
}
