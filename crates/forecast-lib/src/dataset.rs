//! Input tables and series assembly
//!
//! Reads the hourly and daily CSV tables produced by the ingestion stage and
//! assembles a validated, column-oriented [`Series`] for one
//! (entity_scope, utility) pair.

use crate::error::{DataError, DataResult};
use crate::models::{DailyRecord, TimeSeriesPoint, Utility, CAMPUS_SCOPE};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use csv::StringRecord;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use std::collections::{BTreeMap, BTreeSet};
use std::io::Read;
use tracing::{debug, warn};

/// Default name of the target column in both tables
pub const DEFAULT_TARGET_COLUMN: &str = "energy_kwh";

/// Hourly-table columns that are never treated as regressors
const RESERVED_HOURLY_COLUMNS: &[&str] = &[
    "entity_scope",
    "utility",
    "timestamp",
    "datetime",
    "date",
    "hour",
    "day_of_week",
    "month",
    "is_weekend",
    "meter_count",
];

/// Validated series for one (entity_scope, utility) pair
///
/// Timestamps are strictly increasing. Regressor columns are aligned with
/// `timestamps`; `None` marks a missing cell.
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub entity_scope: String,
    pub utility: Utility,
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
    pub regressors: BTreeMap<String, Vec<Option<f64>>>,
}

impl Series {
    /// Build a series from points that all belong to the same pair
    ///
    /// Points are sorted by timestamp; duplicates, negative or non-finite
    /// values are rejected.
    pub fn from_points(
        entity_scope: &str,
        utility: &Utility,
        mut points: Vec<TimeSeriesPoint>,
    ) -> DataResult<Self> {
        if points.is_empty() {
            return Err(DataError::EmptySeries(utility.to_string()));
        }
        points.sort_by_key(|p| p.timestamp);

        let names: BTreeSet<String> = points
            .iter()
            .flat_map(|p| p.regressors.keys().cloned())
            .collect();

        let mut timestamps = Vec::with_capacity(points.len());
        let mut values = Vec::with_capacity(points.len());
        let mut regressors: BTreeMap<String, Vec<Option<f64>>> = names
            .iter()
            .map(|n| (n.clone(), Vec::with_capacity(points.len())))
            .collect();

        for point in &points {
            if let Some(prev) = timestamps.last() {
                if *prev == point.timestamp {
                    return Err(DataError::UnorderedTimestamps(format!(
                        "duplicate timestamp {}",
                        point.timestamp.to_rfc3339()
                    )));
                }
            }
            if !point.value.is_finite() || point.value < 0.0 {
                return Err(DataError::InvalidValue {
                    timestamp: point.timestamp.to_rfc3339(),
                    reason: format!("value {} must be finite and non-negative", point.value),
                });
            }
            timestamps.push(point.timestamp);
            values.push(point.value);
            for (name, column) in regressors.iter_mut() {
                let cell = point
                    .regressors
                    .get(name)
                    .copied()
                    .flatten()
                    .filter(|v| v.is_finite());
                column.push(cell);
            }
        }

        Ok(Self {
            entity_scope: entity_scope.to_string(),
            utility: utility.clone(),
            timestamps,
            values,
            regressors,
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Select the points for one pair and assemble them into a [`Series`]
pub fn assemble_series(
    points: &[TimeSeriesPoint],
    entity_scope: &str,
    utility: &Utility,
) -> DataResult<Series> {
    let selected: Vec<TimeSeriesPoint> = points
        .iter()
        .filter(|p| p.entity_scope == entity_scope && &p.utility == utility)
        .cloned()
        .collect();
    debug!(
        entity_scope = entity_scope,
        utility = %utility,
        rows = selected.len(),
        "Assembling series"
    );
    Series::from_points(entity_scope, utility, selected)
}

/// Keep a seeded random subset of rows, preserving their original order
///
/// `fraction >= 1.0` returns every row.
pub fn sample_rows<T: Clone>(rows: &[T], fraction: f64, seed: u64) -> DataResult<Vec<T>> {
    if !(fraction > 0.0 && fraction <= 1.0) {
        return Err(DataError::InvalidParameter(format!(
            "sample fraction must be in (0, 1], got {}",
            fraction
        )));
    }
    if fraction >= 1.0 || rows.is_empty() {
        return Ok(rows.to_vec());
    }
    let keep = ((rows.len() as f64) * fraction).round().max(1.0) as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, rows.len(), keep).into_vec();
    picked.sort_unstable();
    Ok(picked.into_iter().map(|i| rows[i].clone()).collect())
}

/// Parse the hourly table
///
/// Rows with an empty target cell are skipped. Every numeric column that is
/// not part of the fixed contract becomes a regressor.
pub fn read_hourly_csv<R: Read>(
    reader: R,
    target_column: &str,
) -> DataResult<Vec<TimeSeriesPoint>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader
        .headers()
        .map_err(|e| DataError::Parse { row: 0, reason: e.to_string() })?
        .clone();

    let target_idx = column_index(&headers, &[target_column])
        .ok_or_else(|| DataError::MissingTargetColumn(target_column.to_string()))?;
    let utility_idx = column_index(&headers, &["utility"])
        .ok_or_else(|| DataError::MissingColumn("utility".to_string()))?;
    let ts_idx = column_index(&headers, &["timestamp", "datetime"])
        .ok_or_else(|| DataError::MissingColumn("timestamp".to_string()))?;
    let scope_idx = column_index(&headers, &["entity_scope"]);

    let regressor_columns: Vec<(usize, String)> = headers
        .iter()
        .enumerate()
        .filter(|(i, name)| *i != target_idx && !RESERVED_HOURLY_COLUMNS.contains(name))
        .map(|(i, name)| (i, name.to_string()))
        .collect();

    let mut points = Vec::new();
    let mut skipped = 0usize;
    for (row, record) in csv_reader.records().enumerate() {
        let row = row + 1;
        let record = record.map_err(|e| DataError::Parse { row, reason: e.to_string() })?;

        let Some(value) = parse_optional_f64(field(&record, target_idx), row)? else {
            skipped += 1;
            continue;
        };
        let utility: Utility = field(&record, utility_idx)
            .parse()
            .map_err(|reason| DataError::Parse { row, reason })?;
        let timestamp = parse_timestamp(field(&record, ts_idx))
            .ok_or_else(|| DataError::Parse {
                row,
                reason: format!("unrecognised timestamp '{}'", field(&record, ts_idx)),
            })?;
        let entity_scope = scope_idx
            .map(|i| field(&record, i))
            .filter(|s| !s.is_empty())
            .unwrap_or(CAMPUS_SCOPE)
            .to_string();

        // Non-numeric regressor cells are treated as missing
        let regressors = regressor_columns
            .iter()
            .map(|(i, name)| (name.clone(), field(&record, *i).parse::<f64>().ok()))
            .collect();

        points.push(TimeSeriesPoint {
            entity_scope,
            utility,
            timestamp,
            value,
            regressors,
        });
    }

    if skipped > 0 {
        warn!(rows = skipped, column = target_column, "Dropped rows with empty target");
    }
    Ok(points)
}

/// Parse the daily building table
pub fn read_daily_csv<R: Read>(reader: R, target_column: &str) -> DataResult<Vec<DailyRecord>> {
    let mut csv_reader = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);
    let headers = csv_reader
        .headers()
        .map_err(|e| DataError::Parse { row: 0, reason: e.to_string() })?
        .clone();

    let target_idx = column_index(&headers, &[target_column])
        .ok_or_else(|| DataError::MissingTargetColumn(target_column.to_string()))?;
    let entity_idx = column_index(&headers, &["entity_id", "simscode"])
        .ok_or_else(|| DataError::MissingColumn("entity_id".to_string()))?;
    let utility_idx = column_index(&headers, &["utility"])
        .ok_or_else(|| DataError::MissingColumn("utility".to_string()))?;
    let date_idx = column_index(&headers, &["date"])
        .ok_or_else(|| DataError::MissingColumn("date".to_string()))?;
    let eui_idx = column_index(&headers, &["eui"]);
    let area_idx = column_index(&headers, &["gross_area", "grossarea"]);
    let temp_idx = column_index(&headers, &["weather_temperature_2m", "mean_temperature"]);
    let name_idx = column_index(&headers, &["building_name", "buildingname"]);

    let mut records = Vec::new();
    for (row, record) in csv_reader.records().enumerate() {
        let row = row + 1;
        let record = record.map_err(|e| DataError::Parse { row, reason: e.to_string() })?;

        let raw_date = field(&record, date_idx);
        let date = parse_date(raw_date).ok_or_else(|| DataError::Parse {
            row,
            reason: format!("unrecognised date '{}'", raw_date),
        })?;
        let utility: Utility = field(&record, utility_idx)
            .parse()
            .map_err(|reason| DataError::Parse { row, reason })?;
        let optional = |idx: Option<usize>| -> DataResult<Option<f64>> {
            match idx {
                Some(i) => parse_optional_f64(field(&record, i), row),
                None => Ok(None),
            }
        };

        records.push(DailyRecord {
            entity_id: field(&record, entity_idx).to_string(),
            utility,
            date,
            energy_value: parse_optional_f64(field(&record, target_idx), row)?,
            eui: optional(eui_idx)?,
            gross_area: optional(area_idx)?,
            mean_temperature: optional(temp_idx)?,
            building_name: name_idx
                .map(|i| field(&record, i))
                .filter(|s| !s.is_empty())
                .map(str::to_string),
        });
    }
    Ok(records)
}

/// Accepts RFC 3339 or naive `YYYY-MM-DD HH:MM:SS` (interpreted as UTC)
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
        .map(|naive| naive.and_utc())
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .or_else(|| parse_timestamp(raw).map(|ts| ts.date_naive()))
}

fn parse_optional_f64(raw: &str, row: usize) -> DataResult<Option<f64>> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| DataError::Parse { row, reason: format!("'{}' is not a number", raw) })
}

fn column_index(headers: &StringRecord, candidates: &[&str]) -> Option<usize> {
    candidates
        .iter()
        .find_map(|c| headers.iter().position(|h| h.eq_ignore_ascii_case(c)))
}

fn field<'a>(record: &'a StringRecord, idx: usize) -> &'a str {
    record.get(idx).unwrap_or("")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const HOURLY: &str = "\
entity_scope,utility,timestamp,energy_kwh,temperature_2m,hour
campus,ELECTRICITY,2025-01-01 00:00:00,120.5,30.0,0
campus,ELECTRICITY,2025-01-01 01:00:00,,31.0,1
campus,ELECTRICITY,2025-01-01T02:00:00Z,118.0,,2
campus,GAS,2025-01-01 00:00:00,40.0,30.0,0
";

    #[test]
    fn test_read_hourly_skips_empty_target() {
        let points = read_hourly_csv(HOURLY.as_bytes(), DEFAULT_TARGET_COLUMN).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].regressors.get("temperature_2m"), Some(&Some(30.0)));
        assert_eq!(points[1].regressors.get("temperature_2m"), Some(&None));
        assert!(!points[0].regressors.contains_key("hour"));
        assert_eq!(points[2].utility, Utility::Gas);
    }

    #[test]
    fn test_missing_target_column() {
        let err = read_hourly_csv(HOURLY.as_bytes(), "kwh").unwrap_err();
        assert_eq!(err, DataError::MissingTargetColumn("kwh".to_string()));

        let daily = "entity_id,utility,date\nb1,ELECTRICITY,2025-01-01\n";
        let err = read_daily_csv(daily.as_bytes(), DEFAULT_TARGET_COLUMN).unwrap_err();
        assert!(matches!(err, DataError::MissingTargetColumn(_)));
    }

    #[test]
    fn test_read_daily_with_aliases() {
        let daily = "\
simscode,buildingname,utility,date,energy_kwh,grossarea,weather_temperature_2m
b1,Library,ELECTRICITY,2025-01-01,500,1000,41.2
b2,,ELECTRICITY,2025-01-01,,2000,
";
        let records = read_daily_csv(daily.as_bytes(), DEFAULT_TARGET_COLUMN).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].building_name.as_deref(), Some("Library"));
        assert_eq!(records[0].effective_eui(), Some(0.5));
        assert_eq!(records[1].energy_value, None);
        assert_eq!(records[1].building_name, None);
    }

    #[test]
    fn test_assemble_series_sorts_and_filters() {
        let points = read_hourly_csv(HOURLY.as_bytes(), DEFAULT_TARGET_COLUMN).unwrap();
        let mut shuffled = points.clone();
        shuffled.reverse();
        let series = assemble_series(&shuffled, CAMPUS_SCOPE, &Utility::Electricity).unwrap();
        assert_eq!(series.len(), 2);
        assert!(series.timestamps[0] < series.timestamps[1]);
        assert_eq!(series.values, vec![120.5, 118.0]);
        assert_eq!(series.regressors["temperature_2m"], vec![Some(30.0), None]);
    }

    #[test]
    fn test_duplicate_timestamps_rejected() {
        let ts = Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap();
        let point = TimeSeriesPoint {
            entity_scope: CAMPUS_SCOPE.to_string(),
            utility: Utility::Electricity,
            timestamp: ts,
            value: 1.0,
            regressors: BTreeMap::new(),
        };
        let err = Series::from_points(CAMPUS_SCOPE, &Utility::Electricity, vec![point.clone(), point])
            .unwrap_err();
        assert!(matches!(err, DataError::UnorderedTimestamps(_)));
    }

    #[test]
    fn test_negative_value_rejected() {
        let point = TimeSeriesPoint {
            entity_scope: CAMPUS_SCOPE.to_string(),
            utility: Utility::Electricity,
            timestamp: Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            value: -3.0,
            regressors: BTreeMap::new(),
        };
        let err =
            Series::from_points(CAMPUS_SCOPE, &Utility::Electricity, vec![point]).unwrap_err();
        assert!(matches!(err, DataError::InvalidValue { .. }));
    }

    #[test]
    fn test_empty_series() {
        let err = assemble_series(&[], CAMPUS_SCOPE, &Utility::Water).unwrap_err();
        assert_eq!(err, DataError::EmptySeries("WATER".to_string()));
    }

    #[test]
    fn test_sample_rows_is_seeded_and_ordered() {
        let rows: Vec<u32> = (0..1000).collect();
        let a = sample_rows(&rows, 0.1, 42).unwrap();
        let b = sample_rows(&rows, 0.1, 42).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 100);
        assert!(a.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sample_rows(&rows, 1.0, 7).unwrap().len(), 1000);
        assert!(sample_rows(&rows, 0.0, 7).is_err());
    }

    #[test]
    fn test_parse_timestamp_formats() {
        let expected = Utc.with_ymd_and_hms(2025, 6, 1, 13, 0, 0).unwrap();
        assert_eq!(parse_timestamp("2025-06-01 13:00:00"), Some(expected));
        assert_eq!(parse_timestamp("2025-06-01T13:00:00Z"), Some(expected));
        assert_eq!(parse_timestamp("2025-06-01T09:00:00-04:00"), Some(expected));
        assert_eq!(parse_timestamp("yesterday"), None);
    }
}
