//! Sliding-window sequence regression
//!
//! Each window is an index view `(start, len)` over one row-major buffer of
//! per-hour features; nothing is copied per window until a mini-batch is
//! gathered. Only windows whose rows are consecutive hours are emitted.

use super::recurrent::{Adam, LstmNetwork, NetworkShape};
use super::scaler::MinMaxScaler;
use crate::dataset::Series;
use crate::error::{DataError, ModelError, ModelResult};
use crate::features::{
    hourly_run_lengths, prepare_regressors, CalendarFeatures, RegressorConfig, TEMPERATURE_COLUMN,
};
use crate::models::{ModelKind, Utility};
use crate::split::SplitPolicy;
use chrono::{DateTime, Utc};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::{debug, info};

/// Target column position inside the feature buffer
const TARGET_COLUMN: usize = 0;

/// Windows per forward pass at prediction time
const PREDICT_BATCH: usize = 256;

/// Sequence model parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SequenceConfig {
    /// Hours of history per window
    pub window_length: usize,
    pub hidden_size: usize,
    pub num_layers: usize,
    pub head_size: usize,
    pub dropout: f64,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub max_epochs: usize,
    /// Epochs without training-loss improvement before stopping
    pub patience: usize,
    pub regressors: Vec<String>,
    pub split: SplitPolicy,
}

impl Default for SequenceConfig {
    fn default() -> Self {
        Self {
            window_length: 168,
            hidden_size: 64,
            num_layers: 2,
            head_size: 16,
            dropout: 0.2,
            learning_rate: 0.001,
            batch_size: 32,
            max_epochs: 30,
            patience: 5,
            regressors: vec![TEMPERATURE_COLUMN.to_string()],
            split: SplitPolicy::last_fraction(0.15),
        }
    }
}

impl SequenceConfig {
    pub fn with_window_length(mut self, window_length: usize) -> Self {
        self.window_length = window_length;
        self
    }

    pub fn with_hidden_size(mut self, hidden_size: usize) -> Self {
        self.hidden_size = hidden_size;
        self
    }

    pub fn with_max_epochs(mut self, max_epochs: usize) -> Self {
        self.max_epochs = max_epochs;
        self
    }

    fn validate(&self) -> Result<(), DataError> {
        if self.window_length == 0 || self.hidden_size == 0 || self.batch_size == 0 {
            return Err(DataError::InvalidParameter(
                "window length, hidden size and batch size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout) {
            return Err(DataError::InvalidParameter(format!(
                "dropout must be in [0, 1), got {}",
                self.dropout
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(DataError::InvalidParameter(
                "learning rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// A window of `len` consecutive buffer rows starting at `start`; the
/// target is row `start + len`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowView {
    pub start: usize,
    pub len: usize,
}

impl WindowView {
    pub fn target_row(&self) -> usize {
        self.start + self.len
    }
}

/// Unscaled feature buffer plus the valid windows over it
#[derive(Debug, Clone)]
pub struct SequenceFrame {
    pub utility: Utility,
    pub feature_names: Vec<String>,
    pub timestamps: Vec<DateTime<Utc>>,
    /// Row-major, `width` values per hour
    pub buffer: Vec<f64>,
    pub width: usize,
    pub windows: Vec<WindowView>,
}

impl SequenceFrame {
    pub fn row(&self, i: usize) -> &[f64] {
        &self.buffer[i * self.width..(i + 1) * self.width]
    }

    pub fn target(&self, window: &WindowView) -> f64 {
        self.row(window.target_row())[TARGET_COLUMN]
    }

    /// Target timestamp of every window, in window order
    pub fn window_timestamps(&self) -> Vec<DateTime<Utc>> {
        self.windows
            .iter()
            .map(|w| self.timestamps[w.target_row()])
            .collect()
    }
}

/// Trains the stacked recurrent regressor
#[derive(Debug, Clone)]
pub struct SequenceAdapter {
    config: SequenceConfig,
    regressor_config: RegressorConfig,
    seed: u64,
}

impl SequenceAdapter {
    pub fn new(config: SequenceConfig, regressor_config: RegressorConfig, seed: u64) -> Self {
        Self {
            config,
            regressor_config,
            seed,
        }
    }

    pub fn config(&self) -> &SequenceConfig {
        &self.config
    }

    /// Build the feature buffer and window index for a series
    pub fn frame(&self, series: &Series) -> ModelResult<SequenceFrame> {
        self.config.validate()?;
        let regressors =
            prepare_regressors(series, &self.regressor_config).select(&self.config.regressors);

        let mut feature_names = vec![
            "value".to_string(),
            "hour".to_string(),
            "day_of_week".to_string(),
            "is_weekend".to_string(),
        ];
        feature_names.extend(regressors.names.iter().cloned());
        let width = feature_names.len();

        let mut buffer = Vec::with_capacity(series.len() * width);
        for (i, ts) in series.timestamps.iter().enumerate() {
            let cal = CalendarFeatures::from_timestamp(ts);
            buffer.push(series.values[i]);
            buffer.push(cal.hour as f64);
            buffer.push(cal.day_of_week as f64);
            buffer.push(if cal.is_weekend { 1.0 } else { 0.0 });
            buffer.extend(regressors.columns.iter().map(|c| c[i]));
        }

        let len = self.config.window_length;
        let runs = hourly_run_lengths(&series.timestamps);
        let windows: Vec<WindowView> = (len..series.len())
            .filter(|&target| runs[target] >= len)
            .map(|target| WindowView {
                start: target - len,
                len,
            })
            .collect();

        if windows.is_empty() {
            return Err(DataError::InsufficientHistory {
                needed: len + 1,
                got: series.len(),
            }
            .into());
        }

        debug!(
            utility = %series.utility,
            windows = windows.len(),
            window_length = len,
            features = width,
            "Built sequence windows"
        );

        Ok(SequenceFrame {
            utility: series.utility.clone(),
            feature_names,
            timestamps: series.timestamps.clone(),
            buffer,
            width,
            windows,
        })
    }

    /// Train on the windows in `train`
    ///
    /// Scaling statistics come only from buffer rows up to the last training
    /// target.
    pub fn train(&self, frame: &SequenceFrame, train: Range<usize>) -> ModelResult<FittedSequence> {
        self.config.validate()?;
        if train.is_empty() {
            return Err(DataError::EmptySplit {
                partition: "train",
                rows: frame.windows.len(),
            }
            .into());
        }

        let last_row = frame.windows[train.end - 1].target_row();
        let scaler = MinMaxScaler::fit((0..=last_row).map(|i| frame.row(i)), frame.width);
        let scaled = scale_buffer(frame, &scaler);

        let mut rng = StdRng::seed_from_u64(self.seed);
        let shape = NetworkShape {
            input_size: frame.width,
            hidden_size: self.config.hidden_size,
            num_layers: self.config.num_layers,
            head_size: self.config.head_size,
        };
        let mut network = LstmNetwork::new(shape, &mut rng);
        let mut optimizer = Adam::new(self.config.learning_rate);

        let mut order: Vec<usize> = train.collect();
        let mut best = f64::INFINITY;
        let mut stale = 0usize;
        let mut epochs_run = 0usize;
        let mut last_loss = f64::NAN;

        for epoch in 0..self.config.max_epochs {
            order.shuffle(&mut rng);
            let mut total = 0.0;
            for batch in order.chunks(self.config.batch_size) {
                let (steps, targets) = gather(frame, &scaled, batch);
                let loss = network.train_step(
                    steps,
                    &targets,
                    &mut optimizer,
                    self.config.dropout,
                    &mut rng,
                );
                if !loss.is_finite() {
                    return Err(ModelError::NonFinite {
                        model: ModelKind::Sequence,
                    });
                }
                total += loss * batch.len() as f64;
            }
            let epoch_loss = total / order.len() as f64;
            epochs_run = epoch + 1;
            last_loss = epoch_loss;
            debug!(epoch = epochs_run, loss = epoch_loss, "Sequence epoch finished");

            if epoch_loss < best {
                best = epoch_loss;
                stale = 0;
            } else {
                stale += 1;
                if stale >= self.config.patience {
                    info!(
                        epoch = epochs_run,
                        best_loss = best,
                        "Early stopping sequence training"
                    );
                    break;
                }
            }
        }

        Ok(FittedSequence {
            network,
            scaler,
            epochs_run,
            final_loss: last_loss,
        })
    }
}

/// Trained network with the scaler it was trained under
#[derive(Debug, Clone)]
pub struct FittedSequence {
    network: LstmNetwork,
    scaler: MinMaxScaler,
    epochs_run: usize,
    final_loss: f64,
}

impl FittedSequence {
    pub fn epochs_run(&self) -> usize {
        self.epochs_run
    }

    /// Mean training loss of the last epoch, in scaled units
    pub fn final_loss(&self) -> f64 {
        self.final_loss
    }

    /// Next-step predictions in original units for the given windows
    pub fn predict(
        &self,
        frame: &SequenceFrame,
        windows: Range<usize>,
    ) -> ModelResult<Vec<(DateTime<Utc>, f64)>> {
        let scaled = scale_buffer(frame, &self.scaler);
        let indices: Vec<usize> = windows.collect();
        let mut out = Vec::with_capacity(indices.len());
        for batch in indices.chunks(PREDICT_BATCH) {
            let (steps, _) = gather(frame, &scaled, batch);
            let predicted = self.network.predict(steps);
            for (k, &w) in batch.iter().enumerate() {
                let value = self.scaler.inverse_value(TARGET_COLUMN, predicted[[k, 0]]);
                if !value.is_finite() {
                    return Err(ModelError::NonFinite {
                        model: ModelKind::Sequence,
                    });
                }
                out.push((frame.timestamps[frame.windows[w].target_row()], value));
            }
        }
        Ok(out)
    }
}

fn scale_buffer(frame: &SequenceFrame, scaler: &MinMaxScaler) -> Vec<f64> {
    let mut scaled = frame.buffer.clone();
    for row in scaled.chunks_mut(frame.width) {
        scaler.transform_row(row);
    }
    scaled
}

/// Per-step `(batch × width)` inputs and `(batch × 1)` scaled targets
fn gather(
    frame: &SequenceFrame,
    scaled: &[f64],
    batch: &[usize],
) -> (Vec<Array2<f64>>, Array2<f64>) {
    let width = frame.width;
    let len = batch
        .first()
        .map(|&w| frame.windows[w].len)
        .unwrap_or(0);
    let steps = (0..len)
        .map(|t| {
            Array2::from_shape_fn((batch.len(), width), |(b, f)| {
                let row = frame.windows[batch[b]].start + t;
                scaled[row * width + f]
            })
        })
        .collect();
    let targets = Array2::from_shape_fn((batch.len(), 1), |(b, _)| {
        scaled[frame.windows[batch[b]].target_row() * width + TARGET_COLUMN]
    });
    (steps, targets)
}
