//! Forecast accuracy over the test partition
//!
//! MAPE uses a denominator of 1 wherever the actual value is exactly zero.
//! That keeps the metric finite on idle meters; it is an approximation, not a
//! true percentage error at zero load.

use crate::error::{DataError, DataResult};
use crate::models::{AccuracyMetrics, ForecastResult, ModelKind};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// Matched `(actual, predicted)` pairs
pub fn align_by_timestamp(
    actual: &[(DateTime<Utc>, f64)],
    predicted: &[(DateTime<Utc>, f64)],
) -> DataResult<Vec<(f64, f64)>> {
    let lookup: BTreeMap<DateTime<Utc>, f64> = actual.iter().copied().collect();
    let pairs: Vec<(f64, f64)> = predicted
        .iter()
        .filter_map(|(ts, p)| lookup.get(ts).map(|a| (*a, *p)))
        .collect();
    if pairs.is_empty() {
        return Err(DataError::NoOverlap);
    }
    Ok(pairs)
}

pub fn mean_absolute_error(pairs: &[(f64, f64)]) -> f64 {
    mean(pairs.iter().map(|(a, p)| (a - p).abs()), pairs.len())
}

pub fn mean_absolute_percentage_error(pairs: &[(f64, f64)]) -> f64 {
    let terms = pairs.iter().map(|(a, p)| {
        let denominator = if *a == 0.0 { 1.0 } else { a.abs() };
        (a - p).abs() / denominator
    });
    mean(terms, pairs.len()) * 100.0
}

pub fn root_mean_squared_error(pairs: &[(f64, f64)]) -> f64 {
    mean(pairs.iter().map(|(a, p)| (a - p).powi(2)), pairs.len()).sqrt()
}

/// Score aligned series for one model
pub fn evaluate(
    model: ModelKind,
    actual: &[(DateTime<Utc>, f64)],
    predicted: &[(DateTime<Utc>, f64)],
) -> DataResult<AccuracyMetrics> {
    let pairs = align_by_timestamp(actual, predicted)?;
    Ok(AccuracyMetrics {
        model,
        mae: mean_absolute_error(&pairs),
        mape: mean_absolute_percentage_error(&pairs),
        rmse: root_mean_squared_error(&pairs),
        samples: pairs.len(),
    })
}

/// Score forecasts that already carry their actual value
pub fn score_forecasts(
    model: ModelKind,
    forecasts: &[ForecastResult],
) -> DataResult<AccuracyMetrics> {
    let actual: Vec<_> = forecasts
        .iter()
        .filter_map(|f| f.actual.map(|a| (f.timestamp, a)))
        .collect();
    let predicted: Vec<_> = forecasts.iter().map(|f| (f.timestamp, f.point_estimate)).collect();
    evaluate(model, &actual, &predicted)
}

fn mean(values: impl Iterator<Item = f64>, count: usize) -> f64 {
    if count == 0 {
        return 0.0;
    }
    values.sum::<f64>() / count as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use chrono::{Duration, TimeZone};
    use proptest::prelude::*;

    fn at(h: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap() + Duration::hours(h)
    }

    #[test]
    fn test_basic_metrics() {
        let actual = vec![(at(0), 100.0), (at(1), 200.0), (at(2), 300.0)];
        let predicted = vec![(at(0), 110.0), (at(1), 190.0), (at(2), 330.0)];
        let m = evaluate(ModelKind::GradientBoosted, &actual, &predicted).unwrap();
        assert_relative_eq!(m.mae, 50.0 / 3.0);
        assert_relative_eq!(m.mape, (0.1 + 0.05 + 0.1) / 3.0 * 100.0, epsilon = 1e-9);
        assert_relative_eq!(m.rmse, ((100.0 + 100.0 + 900.0) / 3.0f64).sqrt());
        assert_eq!(m.samples, 3);
    }

    #[test]
    fn test_alignment_ignores_unmatched() {
        let actual = vec![(at(0), 10.0), (at(2), 30.0)];
        let predicted = vec![(at(1), 99.0), (at(2), 33.0), (at(3), 1.0)];
        let m = evaluate(ModelKind::Sequence, &actual, &predicted).unwrap();
        assert_eq!(m.samples, 1);
        assert_relative_eq!(m.mae, 3.0);
    }

    #[test]
    fn test_no_overlap() {
        let err = evaluate(ModelKind::Sequence, &[(at(0), 1.0)], &[(at(5), 1.0)]).unwrap_err();
        assert_eq!(err, DataError::NoOverlap);
    }

    #[test]
    fn test_zero_actual_uses_unit_denominator() {
        let pairs = vec![(0.0, 2.0), (0.0, 0.0)];
        assert_relative_eq!(mean_absolute_percentage_error(&pairs), 100.0);
    }

    proptest! {
        #[test]
        fn prop_all_zero_actuals_are_finite(preds in proptest::collection::vec(-1e6f64..1e6, 1..200)) {
            let pairs: Vec<(f64, f64)> = preds.iter().map(|p| (0.0, *p)).collect();
            prop_assert!(mean_absolute_percentage_error(&pairs).is_finite());
            prop_assert!(mean_absolute_error(&pairs).is_finite());
            prop_assert!(root_mean_squared_error(&pairs).is_finite());
        }

        #[test]
        fn prop_rmse_bounds_mae(pairs in proptest::collection::vec((0f64..1e4, 0f64..1e4), 1..100)) {
            let mae = mean_absolute_error(&pairs);
            let rmse = root_mean_squared_error(&pairs);
            prop_assert!(rmse + 1e-9 >= mae);
        }
    }
}
