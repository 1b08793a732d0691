//! Gradient-boosted regression trees
//!
//! Squared-error boosting with histogram split finding: every feature is
//! bucketed once into at most `max_bins` quantile bins over the training
//! rows, and each node scans per-bin gradient sums instead of sorting.
//! Rows and columns are subsampled per tree with the run seed.

use crate::dataset::Series;
use crate::error::{DataError, ModelError, ModelResult};
use crate::features::{FeatureConfig, FeatureEngineer, FeatureTable};
use crate::models::{FeatureImportance, ModelKind};
use crate::split::SplitPolicy;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::ops::Range;
use tracing::debug;

/// Upper bound on bins per feature (bin ids are stored as `u8`)
pub const MAX_BINS: usize = 256;

/// Minimum gain for a split to be kept
const MIN_SPLIT_GAIN: f64 = 1e-12;

/// Gradient-boosting parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoostingConfig {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub learning_rate: f64,
    /// Fraction of training rows drawn for each tree
    pub subsample: f64,
    /// Fraction of features drawn for each tree
    pub colsample: f64,
    /// L2 penalty on leaf weights
    pub lambda: f64,
    /// Minimum hessian (row count) on each side of a split
    pub min_child_weight: f64,
    pub max_bins: usize,
    pub split: SplitPolicy,
}

impl Default for BoostingConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            max_depth: 8,
            learning_rate: 0.1,
            subsample: 0.8,
            colsample: 0.8,
            lambda: 1.0,
            min_child_weight: 1.0,
            max_bins: MAX_BINS,
            split: SplitPolicy::last_fraction(0.15),
        }
    }
}

impl BoostingConfig {
    pub fn with_estimators(mut self, n_estimators: usize) -> Self {
        self.n_estimators = n_estimators;
        self
    }

    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    fn validate(&self) -> Result<(), DataError> {
        let in_unit = |v: f64| v > 0.0 && v <= 1.0;
        if !in_unit(self.subsample) || !in_unit(self.colsample) {
            return Err(DataError::InvalidParameter(format!(
                "subsample ({}) and colsample ({}) must be in (0, 1]",
                self.subsample, self.colsample
            )));
        }
        if !(self.learning_rate > 0.0) || self.lambda < 0.0 {
            return Err(DataError::InvalidParameter(
                "learning rate must be positive and lambda non-negative".to_string(),
            ));
        }
        if self.n_estimators == 0 || self.max_bins < 2 {
            return Err(DataError::InvalidParameter(
                "need at least one tree and two bins".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

#[derive(Debug, Clone, PartialEq)]
struct Tree {
    nodes: Vec<Node>,
}

impl Tree {
    fn predict(&self, x: &[f64]) -> f64 {
        let mut idx = 0;
        loop {
            match &self.nodes[idx] {
                Node::Leaf { value } => return *value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    idx = if x[*feature] <= *threshold { *left } else { *right };
                }
            }
        }
    }
}

/// Column-wise bin ids over the training rows
struct BinnedColumns {
    cuts: Vec<Vec<f64>>,
    bins: Vec<Vec<u8>>,
}

impl BinnedColumns {
    fn build(table: &FeatureTable, rows: &Range<usize>, max_bins: usize) -> Self {
        let width = table.names.len();
        let max_bins = max_bins.clamp(2, MAX_BINS);
        let mut cuts = Vec::with_capacity(width);
        let mut bins = Vec::with_capacity(width);
        for f in 0..width {
            let column: Vec<f64> = rows.clone().map(|r| table.rows[r].values[f]).collect();
            let feature_cuts = quantile_cuts(&column, max_bins);
            bins.push(
                column
                    .iter()
                    .map(|v| feature_cuts.partition_point(|c| c < v) as u8)
                    .collect(),
            );
            cuts.push(feature_cuts);
        }
        Self { cuts, bins }
    }
}

/// Split candidates between distinct values; quantile-spaced when there are
/// more distinct values than bins
fn quantile_cuts(column: &[f64], max_bins: usize) -> Vec<f64> {
    let mut sorted = column.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mut distinct = sorted.clone();
    distinct.dedup();

    if distinct.len() <= max_bins {
        return distinct.windows(2).map(|w| (w[0] + w[1]) / 2.0).collect();
    }

    let n = sorted.len();
    let mut cuts: Vec<f64> = (1..max_bins)
        .map(|k| {
            let idx = (k * n / max_bins).min(n - 1);
            let upper = sorted[idx];
            let lower = sorted[..idx].last().copied().unwrap_or(upper);
            (lower + upper) / 2.0
        })
        .collect();
    cuts.dedup();
    cuts
}

struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

/// Fits boosted trees on a flat feature table
#[derive(Debug, Clone)]
pub struct BoostingAdapter {
    config: BoostingConfig,
    features: FeatureConfig,
    seed: u64,
}

impl BoostingAdapter {
    pub fn new(config: BoostingConfig, features: FeatureConfig, seed: u64) -> Self {
        Self {
            config,
            features,
            seed,
        }
    }

    pub fn config(&self) -> &BoostingConfig {
        &self.config
    }

    /// Flat calendar + lag + rolling + regressor view of a series
    pub fn frame(&self, series: &Series) -> ModelResult<FeatureTable> {
        Ok(FeatureEngineer::new(self.features.clone()).build(series)?)
    }

    /// Fit on `rows` of the table
    pub fn train(&self, table: &FeatureTable, rows: Range<usize>) -> ModelResult<FittedBoosting> {
        self.config.validate()?;
        let n = rows.len();
        if n == 0 {
            return Err(DataError::EmptySplit {
                partition: "train",
                rows: table.len(),
            }
            .into());
        }
        let width = table.names.len();
        let binned = BinnedColumns::build(table, &rows, self.config.max_bins);
        let targets: Vec<f64> = rows.clone().map(|r| table.rows[r].target).collect();
        let base_score = targets.iter().sum::<f64>() / n as f64;

        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut predictions = vec![base_score; n];
        let mut gains = vec![0.0; width];
        let mut trees = Vec::with_capacity(self.config.n_estimators);

        let row_sample = ((n as f64) * self.config.subsample).round().clamp(1.0, n as f64) as usize;
        let col_sample =
            ((width as f64) * self.config.colsample).round().clamp(1.0, width.max(1) as f64) as usize;

        for _ in 0..self.config.n_estimators {
            let gradients: Vec<f64> = predictions
                .iter()
                .zip(&targets)
                .map(|(p, y)| p - y)
                .collect();

            let mut sampled_rows: Vec<u32> = index::sample(&mut rng, n, row_sample)
                .into_iter()
                .map(|i| i as u32)
                .collect();
            sampled_rows.sort_unstable();
            let mut features = index::sample(&mut rng, width, col_sample.min(width)).into_vec();
            features.sort_unstable();

            let mut nodes = Vec::new();
            self.grow(
                sampled_rows,
                0,
                &gradients,
                &binned,
                &features,
                &mut nodes,
                &mut gains,
            );
            let tree = Tree { nodes };

            for (k, r) in rows.clone().enumerate() {
                predictions[k] += tree.predict(&table.rows[r].values);
            }
            trees.push(tree);
        }

        if predictions.iter().any(|p| !p.is_finite()) {
            return Err(ModelError::NonFinite {
                model: ModelKind::GradientBoosted,
            });
        }

        let train_rmse = (predictions
            .iter()
            .zip(&targets)
            .map(|(p, y)| (p - y).powi(2))
            .sum::<f64>()
            / n as f64)
            .sqrt();
        debug!(
            rows = n,
            features = width,
            trees = trees.len(),
            train_rmse = train_rmse,
            "Fitted boosted trees"
        );

        Ok(FittedBoosting {
            base_score,
            trees,
            feature_names: table.names.clone(),
            gains,
        })
    }

    #[allow(clippy::too_many_arguments)]
    fn grow(
        &self,
        rows: Vec<u32>,
        depth: usize,
        gradients: &[f64],
        binned: &BinnedColumns,
        features: &[usize],
        nodes: &mut Vec<Node>,
        gains: &mut [f64],
    ) -> usize {
        let lambda = self.config.lambda;
        let g_total: f64 = rows.iter().map(|&r| gradients[r as usize]).sum();
        let h_total = rows.len() as f64;
        let leaf_value = -g_total / (h_total + lambda) * self.config.learning_rate;

        let id = nodes.len();
        nodes.push(Node::Leaf { value: leaf_value });
        if depth >= self.config.max_depth || h_total < 2.0 * self.config.min_child_weight {
            return id;
        }

        let parent_score = g_total * g_total / (h_total + lambda);
        let mut best: Option<SplitCandidate> = None;
        let mut hist_g = [0.0f64; MAX_BINS];
        let mut hist_h = [0.0f64; MAX_BINS];

        for &f in features {
            let n_bins = binned.cuts[f].len() + 1;
            if n_bins < 2 {
                continue;
            }
            hist_g[..n_bins].fill(0.0);
            hist_h[..n_bins].fill(0.0);
            let column = &binned.bins[f];
            for &r in &rows {
                let b = column[r as usize] as usize;
                hist_g[b] += gradients[r as usize];
                hist_h[b] += 1.0;
            }

            let (mut gl, mut hl) = (0.0, 0.0);
            for b in 0..n_bins - 1 {
                gl += hist_g[b];
                hl += hist_h[b];
                let (gr, hr) = (g_total - gl, h_total - hl);
                if hl < self.config.min_child_weight || hr < self.config.min_child_weight {
                    continue;
                }
                let gain =
                    0.5 * (gl * gl / (hl + lambda) + gr * gr / (hr + lambda) - parent_score);
                if gain > MIN_SPLIT_GAIN && best.as_ref().map_or(true, |c| gain > c.gain) {
                    best = Some(SplitCandidate {
                        feature: f,
                        bin: b,
                        gain,
                    });
                }
            }
        }

        let Some(split) = best else {
            return id;
        };

        let column = &binned.bins[split.feature];
        let (left_rows, right_rows): (Vec<u32>, Vec<u32>) = rows
            .into_iter()
            .partition(|&r| (column[r as usize] as usize) <= split.bin);
        gains[split.feature] += split.gain;

        let left = self.grow(left_rows, depth + 1, gradients, binned, features, nodes, gains);
        let right = self.grow(right_rows, depth + 1, gradients, binned, features, nodes, gains);
        nodes[id] = Node::Split {
            feature: split.feature,
            threshold: binned.cuts[split.feature][split.bin],
            left,
            right,
        };
        id
    }
}

/// Trained ensemble
#[derive(Debug, Clone)]
pub struct FittedBoosting {
    base_score: f64,
    trees: Vec<Tree>,
    feature_names: Vec<String>,
    gains: Vec<f64>,
}

impl FittedBoosting {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    pub fn predict_row(&self, x: &[f64]) -> f64 {
        self.base_score + self.trees.iter().map(|t| t.predict(x)).sum::<f64>()
    }

    pub fn predict(
        &self,
        table: &FeatureTable,
        rows: Range<usize>,
    ) -> ModelResult<Vec<(DateTime<Utc>, f64)>> {
        rows.map(|r| {
            let row = &table.rows[r];
            let value = self.predict_row(&row.values);
            if value.is_finite() {
                Ok((row.timestamp, value))
            } else {
                Err(ModelError::NonFinite {
                    model: ModelKind::GradientBoosted,
                })
            }
        })
        .collect()
    }

    /// Total split gain per feature, normalised to sum to 1 and sorted
    /// descending; ties keep column order
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let total: f64 = self.gains.iter().sum();
        let width = self.gains.len().max(1) as f64;
        let mut importances: Vec<FeatureImportance> = self
            .feature_names
            .iter()
            .zip(&self.gains)
            .map(|(name, gain)| FeatureImportance {
                feature: name.clone(),
                importance: if total > 0.0 { gain / total } else { 1.0 / width },
            })
            .collect();
        importances.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        importances
    }
}
