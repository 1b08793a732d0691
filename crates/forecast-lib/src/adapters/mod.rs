//! Model adapters
//!
//! Three model families behind one tagged variant. Each builds its own view
//! of the series, splits it in time, trains on the prefix and forecasts the
//! held-out suffix; none shares state with another.

mod boosting;
mod decomposition;
mod linalg;
mod recurrent;
mod scaler;
mod sequence;

pub use boosting::{BoostingAdapter, BoostingConfig, FittedBoosting, MAX_BINS};
pub use decomposition::{
    DecomposedForecast, DecompositionAdapter, DecompositionConfig, DecompositionFrame,
    FittedDecomposition,
};
pub use linalg::{cholesky_solve, NormalEquations};
pub use recurrent::{Adam, LstmNetwork, NetworkShape};
pub use scaler::MinMaxScaler;
pub use sequence::{FittedSequence, SequenceAdapter, SequenceConfig, SequenceFrame, WindowView};

use crate::config::RunConfig;
use crate::dataset::Series;
use crate::error::ModelResult;
use crate::metrics;
use crate::models::{AccuracyMetrics, FeatureImportance, ForecastResult, ModelKind, Utility};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use tracing::info;

/// Everything one adapter produced for the comparison
#[derive(Debug, Clone, PartialEq)]
pub struct ModelEvaluation {
    pub model: ModelKind,
    pub forecasts: Vec<ForecastResult>,
    pub metrics: AccuracyMetrics,
    /// Empty for families that do not expose importances
    pub feature_importance: Vec<FeatureImportance>,
    pub train_rows: usize,
    pub test_rows: usize,
    /// Series rows that never became a model input for lack of history
    pub rows_dropped: usize,
}

/// One model family, configured for a run
#[derive(Debug, Clone)]
pub enum ModelAdapter {
    Decomposition(DecompositionAdapter),
    Sequence(SequenceAdapter),
    GradientBoosted(BoostingAdapter),
}

impl ModelAdapter {
    pub fn from_config(kind: ModelKind, config: &RunConfig) -> Self {
        let regressors = config.features.regressors.clone();
        match kind {
            ModelKind::Decomposition => ModelAdapter::Decomposition(DecompositionAdapter::new(
                config.decomposition.clone(),
                regressors,
            )),
            ModelKind::Sequence => ModelAdapter::Sequence(SequenceAdapter::new(
                config.sequence.clone(),
                regressors,
                config.seed,
            )),
            ModelKind::GradientBoosted => ModelAdapter::GradientBoosted(BoostingAdapter::new(
                config.boosting.clone(),
                config.features.clone(),
                config.seed,
            )),
        }
    }

    pub fn kind(&self) -> ModelKind {
        match self {
            ModelAdapter::Decomposition(_) => ModelKind::Decomposition,
            ModelAdapter::Sequence(_) => ModelKind::Sequence,
            ModelAdapter::GradientBoosted(_) => ModelKind::GradientBoosted,
        }
    }

    /// Build the view, split, train, forecast the test partition and score it
    pub fn evaluate(&self, series: &Series) -> ModelResult<ModelEvaluation> {
        let evaluation = match self {
            ModelAdapter::Decomposition(adapter) => evaluate_decomposition(adapter, series)?,
            ModelAdapter::Sequence(adapter) => evaluate_sequence(adapter, series)?,
            ModelAdapter::GradientBoosted(adapter) => evaluate_boosting(adapter, series)?,
        };
        info!(
            model = %evaluation.model,
            train_rows = evaluation.train_rows,
            test_rows = evaluation.test_rows,
            mae = evaluation.metrics.mae,
            mape = evaluation.metrics.mape,
            rmse = evaluation.metrics.rmse,
            "Model evaluated"
        );
        Ok(evaluation)
    }
}

fn evaluate_decomposition(
    adapter: &DecompositionAdapter,
    series: &Series,
) -> ModelResult<ModelEvaluation> {
    let frame = adapter.frame(series);
    let split = adapter.config().split.split(&frame.timestamps)?;
    let fitted = adapter.train(&frame, split.train.clone())?;
    let predicted = fitted.predict_frame(&frame, split.test.clone())?;

    let forecasts: Vec<ForecastResult> = split
        .test
        .clone()
        .zip(predicted)
        .map(|(i, p)| ForecastResult {
            model: ModelKind::Decomposition,
            utility: series.utility.clone(),
            timestamp: frame.timestamps[i],
            point_estimate: p.point,
            actual: Some(frame.values[i]),
            lower: Some(p.lower),
            upper: Some(p.upper),
            components: Some(p.components),
        })
        .collect();

    let actual: Vec<_> = split
        .test
        .clone()
        .map(|i| (frame.timestamps[i], frame.values[i]))
        .collect();
    finish(
        ModelKind::Decomposition,
        forecasts,
        &actual,
        Vec::new(),
        split.train.len(),
        0,
    )
}

fn evaluate_sequence(adapter: &SequenceAdapter, series: &Series) -> ModelResult<ModelEvaluation> {
    let frame = adapter.frame(series)?;
    let targets = frame.window_timestamps();
    let split = adapter.config().split.split(&targets)?;
    let fitted = adapter.train(&frame, split.train.clone())?;
    let predicted = fitted.predict(&frame, split.test.clone())?;

    let actual: Vec<_> = split
        .test
        .clone()
        .map(|w| (targets[w], frame.target(&frame.windows[w])))
        .collect();
    let forecasts = point_forecasts(ModelKind::Sequence, &series.utility, &predicted, &actual);
    finish(
        ModelKind::Sequence,
        forecasts,
        &actual,
        Vec::new(),
        split.train.len(),
        series.len().saturating_sub(frame.windows.len()),
    )
}

fn evaluate_boosting(adapter: &BoostingAdapter, series: &Series) -> ModelResult<ModelEvaluation> {
    let table = adapter.frame(series)?;
    let split = adapter.config().split.split(&table.timestamps())?;
    let fitted = adapter.train(&table, split.train.clone())?;
    let predicted = fitted.predict(&table, split.test.clone())?;

    let actual: Vec<_> = split
        .test
        .clone()
        .map(|r| (table.rows[r].timestamp, table.rows[r].target))
        .collect();
    let forecasts = point_forecasts(
        ModelKind::GradientBoosted,
        &series.utility,
        &predicted,
        &actual,
    );
    finish(
        ModelKind::GradientBoosted,
        forecasts,
        &actual,
        fitted.feature_importance(),
        split.train.len(),
        table.dropped,
    )
}

fn point_forecasts(
    model: ModelKind,
    utility: &Utility,
    predicted: &[(DateTime<Utc>, f64)],
    actual: &[(DateTime<Utc>, f64)],
) -> Vec<ForecastResult> {
    let actual: BTreeMap<_, _> = actual.iter().copied().collect();
    predicted
        .iter()
        .map(|(ts, p)| ForecastResult {
            model,
            utility: utility.clone(),
            timestamp: *ts,
            point_estimate: *p,
            actual: actual.get(ts).copied(),
            lower: None,
            upper: None,
            components: None,
        })
        .collect()
}

fn finish(
    model: ModelKind,
    forecasts: Vec<ForecastResult>,
    actual: &[(DateTime<Utc>, f64)],
    feature_importance: Vec<FeatureImportance>,
    train_rows: usize,
    rows_dropped: usize,
) -> ModelResult<ModelEvaluation> {
    let predicted: Vec<_> = forecasts
        .iter()
        .map(|f| (f.timestamp, f.point_estimate))
        .collect();
    let metrics = metrics::evaluate(model, actual, &predicted)?;
    Ok(ModelEvaluation {
        model,
        test_rows: actual.len(),
        forecasts,
        metrics,
        feature_importance,
        train_rows,
        rows_dropped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DataError, ModelError};
    use crate::models::CAMPUS_SCOPE;
    use chrono::{Duration, TimeZone};

    fn series(hours: usize) -> Series {
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Series {
            entity_scope: CAMPUS_SCOPE.to_string(),
            utility: Utility::Electricity,
            timestamps: (0..hours).map(|i| start + Duration::hours(i as i64)).collect(),
            values: (0..hours)
                .map(|i| 80.0 + 30.0 * (2.0 * std::f64::consts::PI * (i % 24) as f64 / 24.0).cos())
                .collect(),
            regressors: BTreeMap::new(),
        }
    }

    fn quick_config() -> RunConfig {
        let mut config = RunConfig::default();
        config.boosting = config.boosting.with_estimators(40);
        config.sequence = config
            .sequence
            .with_window_length(24)
            .with_hidden_size(8)
            .with_max_epochs(2);
        config
    }

    #[test]
    fn test_kind_roundtrip() {
        let config = RunConfig::default();
        for kind in ModelKind::ALL {
            assert_eq!(ModelAdapter::from_config(kind, &config).kind(), kind);
        }
    }

    #[test]
    fn test_decomposition_emits_components_and_intervals() {
        let adapter = ModelAdapter::from_config(ModelKind::Decomposition, &quick_config());
        let eval = adapter.evaluate(&series(24 * 45)).unwrap();
        assert_eq!(eval.test_rows, 30 * 24);
        assert_eq!(eval.forecasts.len(), eval.test_rows);
        assert!(eval.forecasts.iter().all(|f| f.components.is_some() && f.lower.is_some()));
        assert!(eval.feature_importance.is_empty());
        assert!(eval.metrics.mae < 5.0, "mae {}", eval.metrics.mae);
    }

    #[test]
    fn test_boosting_exposes_importance() {
        let adapter = ModelAdapter::from_config(ModelKind::GradientBoosted, &quick_config());
        let eval = adapter.evaluate(&series(24 * 30)).unwrap();
        assert!(!eval.feature_importance.is_empty());
        assert!(eval.forecasts.iter().all(|f| f.actual.is_some()));
        let first_test = eval.forecasts[0].timestamp;
        assert!(first_test > Utc.with_ymd_and_hms(2024, 1, 8, 0, 0, 0).unwrap());
    }

    #[test]
    fn test_sequence_evaluates_on_window_targets() {
        let adapter = ModelAdapter::from_config(ModelKind::Sequence, &quick_config());
        let eval = adapter.evaluate(&series(24 * 10)).unwrap();
        assert_eq!(eval.train_rows + eval.test_rows, 24 * 10 - 24);
        assert!(eval.metrics.rmse.is_finite());
    }

    #[test]
    fn test_short_series_is_a_data_error() {
        let adapter = ModelAdapter::from_config(ModelKind::GradientBoosted, &RunConfig::default());
        let err = adapter.evaluate(&series(48)).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Data(DataError::InsufficientHistory { .. })
        ));
    }
}
