//! Additive trend + seasonality decomposition
//!
//! `y(t) = trend(t) + daily(t) + weekly(t) + yearly(t) + Σ βᵢ·regressorᵢ(t)`
//!
//! The trend is piecewise linear with potential changepoints spread over the
//! first part of the history; each changepoint adds a slope change whose size
//! is ridge-penalised by `1 / changepoint_prior_scale²`, so a small prior
//! scale gives a rigid trend. Seasonalities are Fourier series on absolute
//! time, which lets the fitted model evaluate any future instant, regular or
//! not. All coefficients come from one penalised least-squares solve.

use super::linalg::NormalEquations;
use crate::dataset::Series;
use crate::error::{DataError, ModelError, ModelResult};
use crate::features::{prepare_regressors, RegressorConfig, RegressorSet, TEMPERATURE_COLUMN};
use crate::models::{Components, ModelKind, Utility};
use crate::split::SplitPolicy;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use std::f64::consts::PI;
use std::ops::Range;
use tracing::debug;

const SECONDS_PER_DAY: f64 = 86_400.0;
const DAILY_PERIOD_DAYS: f64 = 1.0;
const WEEKLY_PERIOD_DAYS: f64 = 7.0;
const YEARLY_PERIOD_DAYS: f64 = 365.25;

/// Prior scale on the intercept and base slope
const TREND_PRIOR_SCALE: f64 = 5.0;

/// Decomposition model parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecompositionConfig {
    /// Trend flexibility; larger allows sharper slope changes
    pub changepoint_prior_scale: f64,
    pub n_changepoints: usize,
    /// Share of the history in which changepoints may be placed
    pub changepoint_range: f64,
    pub daily_order: usize,
    pub weekly_order: usize,
    pub yearly_order: usize,
    pub seasonality_prior_scale: f64,
    /// Coverage of the uncertainty interval
    pub interval_width: f64,
    /// Regressors to include when present in the data
    pub regressors: Vec<String>,
    pub split: SplitPolicy,
}

impl Default for DecompositionConfig {
    fn default() -> Self {
        Self {
            changepoint_prior_scale: 0.1,
            n_changepoints: 25,
            changepoint_range: 0.8,
            daily_order: 4,
            weekly_order: 3,
            yearly_order: 10,
            seasonality_prior_scale: 10.0,
            interval_width: 0.8,
            regressors: vec![TEMPERATURE_COLUMN.to_string()],
            split: SplitPolicy::last_days(30),
        }
    }
}

impl DecompositionConfig {
    pub fn with_changepoint_prior_scale(mut self, scale: f64) -> Self {
        self.changepoint_prior_scale = scale;
        self
    }

    pub fn with_split(mut self, split: SplitPolicy) -> Self {
        self.split = split;
        self
    }

    fn validate(&self) -> Result<(), DataError> {
        if !(self.changepoint_prior_scale > 0.0) || !(self.seasonality_prior_scale > 0.0) {
            return Err(DataError::InvalidParameter(
                "decomposition prior scales must be positive".to_string(),
            ));
        }
        if !(self.interval_width > 0.0 && self.interval_width < 1.0) {
            return Err(DataError::InvalidParameter(format!(
                "interval width must be in (0, 1), got {}",
                self.interval_width
            )));
        }
        if !(self.changepoint_range > 0.0 && self.changepoint_range <= 1.0) {
            return Err(DataError::InvalidParameter(format!(
                "changepoint range must be in (0, 1], got {}",
                self.changepoint_range
            )));
        }
        Ok(())
    }
}

/// Plain time axis plus selected regressors
#[derive(Debug, Clone)]
pub struct DecompositionFrame {
    pub utility: Utility,
    pub timestamps: Vec<DateTime<Utc>>,
    pub values: Vec<f64>,
    pub regressors: RegressorSet,
}

impl DecompositionFrame {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    fn regressor_row(&self, i: usize) -> Vec<f64> {
        self.regressors.columns.iter().map(|c| c[i]).collect()
    }
}

/// One point forecast with its interval and components
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecomposedForecast {
    pub point: f64,
    pub lower: f64,
    pub upper: f64,
    pub components: Components,
}

/// Column layout of the design matrix
#[derive(Debug, Clone, PartialEq)]
struct Layout {
    changepoints: usize,
    daily: usize,
    weekly: usize,
    yearly: usize,
    regressors: usize,
}

impl Layout {
    fn trend(&self) -> Range<usize> {
        0..2 + self.changepoints
    }

    fn daily(&self) -> Range<usize> {
        let start = self.trend().end;
        start..start + 2 * self.daily
    }

    fn weekly(&self) -> Range<usize> {
        let start = self.daily().end;
        start..start + 2 * self.weekly
    }

    fn yearly(&self) -> Range<usize> {
        let start = self.weekly().end;
        start..start + 2 * self.yearly
    }

    fn regressors(&self) -> Range<usize> {
        let start = self.yearly().end;
        start..start + self.regressors
    }

    fn width(&self) -> usize {
        self.regressors().end
    }
}

/// Fits the decomposition model
#[derive(Debug, Clone)]
pub struct DecompositionAdapter {
    config: DecompositionConfig,
    regressor_config: RegressorConfig,
}

impl DecompositionAdapter {
    pub fn new(config: DecompositionConfig, regressor_config: RegressorConfig) -> Self {
        Self {
            config,
            regressor_config,
        }
    }

    pub fn config(&self) -> &DecompositionConfig {
        &self.config
    }

    /// Build the view this adapter trains on
    pub fn frame(&self, series: &Series) -> DecompositionFrame {
        let regressors =
            prepare_regressors(series, &self.regressor_config).select(&self.config.regressors);
        DecompositionFrame {
            utility: series.utility.clone(),
            timestamps: series.timestamps.clone(),
            values: series.values.clone(),
            regressors,
        }
    }

    /// Fit on the rows in `train`
    pub fn train(
        &self,
        frame: &DecompositionFrame,
        train: Range<usize>,
    ) -> ModelResult<FittedDecomposition> {
        self.config.validate()?;
        let n = train.len();
        if n < 2 {
            return Err(DataError::InsufficientHistory { needed: 2, got: n }.into());
        }

        let t0 = frame.timestamps[train.start];
        let span_secs = (frame.timestamps[train.end - 1] - t0).num_seconds().max(1) as f64;
        let y_scale = frame.values[train.clone()]
            .iter()
            .fold(0.0f64, |acc, v| acc.max(v.abs()));
        let y_scale = if y_scale > 0.0 { y_scale } else { 1.0 };

        // changepoints at evenly spaced rows within the first part of history
        let eligible = ((n as f64) * self.config.changepoint_range).floor() as usize;
        let k = self.config.n_changepoints.min(eligible.saturating_sub(1));
        let changepoints: Vec<f64> = (1..=k)
            .map(|j| {
                let row = train.start + (j * eligible.saturating_sub(1)) / (k + 1).max(1);
                (frame.timestamps[row] - t0).num_seconds() as f64 / span_secs
            })
            .collect();

        let mut reg_mean = Vec::with_capacity(frame.regressors.len());
        let mut reg_std = Vec::with_capacity(frame.regressors.len());
        for column in &frame.regressors.columns {
            let slice = &column[train.clone()];
            let mean = slice.iter().sum::<f64>() / n as f64;
            let var = slice.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
            let std = var.sqrt();
            reg_mean.push(mean);
            reg_std.push(if std > 0.0 { std } else { 1.0 });
        }

        // a seasonality needs at least one full period of history
        let span_days = span_secs / SECONDS_PER_DAY;
        let active = |order: usize, period: f64| if span_days >= period { order } else { 0 };
        let layout = Layout {
            changepoints: changepoints.len(),
            daily: active(self.config.daily_order, DAILY_PERIOD_DAYS),
            weekly: active(self.config.weekly_order, WEEKLY_PERIOD_DAYS),
            yearly: active(self.config.yearly_order, YEARLY_PERIOD_DAYS),
            regressors: frame.regressors.len(),
        };

        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| DataError::InvalidParameter(e.to_string()))?;
        let mut fitted = FittedDecomposition {
            utility: frame.utility.clone(),
            layout,
            t0,
            span_secs,
            y_scale,
            changepoints,
            regressor_names: frame.regressors.names.clone(),
            reg_mean,
            reg_std,
            beta: vec![],
            sigma: 0.0,
            z: normal.inverse_cdf(0.5 + self.config.interval_width / 2.0),
        };

        let width = fitted.layout.width();
        let mut equations = NormalEquations::new(width);
        for i in train.clone() {
            let x = fitted.design_row(&frame.timestamps[i], &frame.regressor_row(i));
            equations.add_row(&x, frame.values[i] / y_scale);
        }

        let mut penalty = vec![0.0; width];
        let trend = fitted.layout.trend();
        for (j, p) in penalty.iter_mut().enumerate() {
            *p = if j < 2 {
                1.0 / TREND_PRIOR_SCALE.powi(2)
            } else if j < trend.end {
                1.0 / self.config.changepoint_prior_scale.powi(2)
            } else {
                1.0 / self.config.seasonality_prior_scale.powi(2)
            };
        }

        let beta = equations.solve(&penalty).ok_or_else(|| ModelError::NotConverged {
            model: ModelKind::Decomposition,
            reason: "normal equations are not positive definite".to_string(),
        })?;
        if beta.iter().any(|b| !b.is_finite()) {
            return Err(ModelError::NonFinite {
                model: ModelKind::Decomposition,
            });
        }
        fitted.beta = beta.to_vec();

        let sse: f64 = train
            .clone()
            .map(|i| {
                let x = fitted.design_row(&frame.timestamps[i], &frame.regressor_row(i));
                let pred = dot(&x, &fitted.beta) * y_scale;
                (frame.values[i] - pred).powi(2)
            })
            .sum();
        fitted.sigma = (sse / n as f64).sqrt();

        debug!(
            utility = %frame.utility,
            rows = n,
            columns = width,
            changepoints = fitted.changepoints.len(),
            residual_sigma = fitted.sigma,
            "Fitted decomposition"
        );
        Ok(fitted)
    }
}

/// Trained decomposition state
#[derive(Debug, Clone)]
pub struct FittedDecomposition {
    utility: Utility,
    layout: Layout,
    t0: DateTime<Utc>,
    span_secs: f64,
    y_scale: f64,
    changepoints: Vec<f64>,
    regressor_names: Vec<String>,
    reg_mean: Vec<f64>,
    reg_std: Vec<f64>,
    beta: Vec<f64>,
    sigma: f64,
    z: f64,
}

impl FittedDecomposition {
    pub fn utility(&self) -> &Utility {
        &self.utility
    }

    pub fn regressor_names(&self) -> &[String] {
        &self.regressor_names
    }

    /// Residual standard deviation on the training rows, original units
    pub fn residual_sigma(&self) -> f64 {
        self.sigma
    }

    /// Forecast arbitrary instants
    ///
    /// `regressors[i]` holds the regressor values for `timestamps[i]` in the
    /// order of [`Self::regressor_names`].
    pub fn predict(
        &self,
        timestamps: &[DateTime<Utc>],
        regressors: &[Vec<f64>],
    ) -> ModelResult<Vec<DecomposedForecast>> {
        let empty = Vec::new();
        let mut out = Vec::with_capacity(timestamps.len());
        for (i, ts) in timestamps.iter().enumerate() {
            let reg = regressors.get(i).unwrap_or(&empty);
            let x = self.design_row(ts, reg);
            let part = |range: Range<usize>| -> f64 {
                range.map(|j| x[j] * self.beta[j]).sum::<f64>() * self.y_scale
            };
            let components = Components {
                trend: part(self.layout.trend()),
                daily: part(self.layout.daily()),
                weekly: part(self.layout.weekly()),
                yearly: part(self.layout.yearly()),
            };
            let point = components.trend
                + components.daily
                + components.weekly
                + components.yearly
                + part(self.layout.regressors());

            // widen beyond the end of the training history
            let horizon = (self.scaled_time(ts) - 1.0).max(0.0);
            let half_width = self.z * self.sigma * (1.0 + horizon).sqrt();
            if !point.is_finite() || !half_width.is_finite() {
                return Err(ModelError::NonFinite {
                    model: ModelKind::Decomposition,
                });
            }
            out.push(DecomposedForecast {
                point,
                lower: point - half_width,
                upper: point + half_width,
                components,
            });
        }
        Ok(out)
    }

    /// Forecast rows of a frame
    pub fn predict_frame(
        &self,
        frame: &DecompositionFrame,
        rows: Range<usize>,
    ) -> ModelResult<Vec<DecomposedForecast>> {
        let timestamps = &frame.timestamps[rows.clone()];
        let regressors: Vec<Vec<f64>> = rows.map(|i| frame.regressor_row(i)).collect();
        self.predict(timestamps, &regressors)
    }

    fn scaled_time(&self, ts: &DateTime<Utc>) -> f64 {
        (*ts - self.t0).num_seconds() as f64 / self.span_secs
    }

    fn design_row(&self, ts: &DateTime<Utc>, regressors: &[f64]) -> Vec<f64> {
        let mut row = Vec::with_capacity(self.layout.width());
        let t = self.scaled_time(ts);
        row.push(1.0);
        row.push(t);
        row.extend(self.changepoints.iter().map(|s| (t - s).max(0.0)));

        let days = ts.timestamp() as f64 / SECONDS_PER_DAY;
        fourier(&mut row, days, DAILY_PERIOD_DAYS, self.layout.daily);
        fourier(&mut row, days, WEEKLY_PERIOD_DAYS, self.layout.weekly);
        fourier(&mut row, days, YEARLY_PERIOD_DAYS, self.layout.yearly);

        for j in 0..self.layout.regressors {
            let raw = regressors.get(j).copied().unwrap_or(self.reg_mean[j]);
            row.push((raw - self.reg_mean[j]) / self.reg_std[j]);
        }
        row
    }
}

fn fourier(row: &mut Vec<f64>, days: f64, period: f64, order: usize) {
    for k in 1..=order {
        let angle = 2.0 * PI * k as f64 * days / period;
        row.push(angle.sin());
        row.push(angle.cos());
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
