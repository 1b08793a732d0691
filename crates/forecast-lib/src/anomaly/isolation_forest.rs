//! Isolation forest
//!
//! Random axis-aligned partitioning of a row subsample. Outliers sit in
//! sparse regions, so they are separated after fewer splits and end up with
//! shorter average path lengths than inliers.

use crate::error::AnomalyError;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};

/// Euler-Mascheroni constant
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum Node {
    Split {
        feature: usize,
        threshold: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: Node,
}

impl IsolationTree {
    fn grow(data: &[Vec<f64>], rows: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: grow_node(data, rows, 0, max_depth, rng),
        }
    }

    fn path_length(&self, sample: &[f64]) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                Node::Leaf { size } => return depth as f64 + average_path_length(*size),
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if sample[*feature] < *threshold { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

fn grow_node(
    data: &[Vec<f64>],
    rows: Vec<usize>,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= max_depth || rows.len() <= 1 {
        return Node::Leaf { size: rows.len() };
    }

    // Only features that still vary inside this node can split it
    let width = data[rows[0]].len();
    let varying: Vec<(usize, f64, f64)> = (0..width)
        .filter_map(|f| {
            let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                (lo.min(data[r][f]), hi.max(data[r][f]))
            });
            (hi > lo).then_some((f, lo, hi))
        })
        .collect();
    if varying.is_empty() {
        return Node::Leaf { size: rows.len() };
    }

    let (feature, lo, hi) = varying[rng.gen_range(0..varying.len())];
    let threshold = rng.gen_range(lo..hi);
    let (left, right): (Vec<usize>, Vec<usize>) =
        rows.into_iter().partition(|&r| data[r][feature] < threshold);

    Node::Split {
        feature,
        threshold,
        left: Box::new(grow_node(data, left, depth + 1, max_depth, rng)),
        right: Box::new(grow_node(data, right, depth + 1, max_depth, rng)),
    }
}

/// Average path length of an unsuccessful binary search over `n` points
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Percentile with linear interpolation between closest ranks
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let position = (q / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// A fitted forest and its decision offset
#[derive(Debug, Clone)]
pub struct IsolationForest {
    trees: Vec<IsolationTree>,
    /// Rows drawn per tree, capped at the table size
    sample_size: usize,
    offset: f64,
}

impl IsolationForest {
    /// Fit on `data` (row-major, equal widths) and place the offset at the
    /// `contamination` percentile of the training scores.
    pub fn fit(
        data: &[Vec<f64>],
        n_trees: usize,
        sample_size: usize,
        contamination: f64,
        seed: u64,
    ) -> Result<Self, AnomalyError> {
        if !(contamination > 0.0 && contamination <= 0.5) {
            return Err(AnomalyError::InvalidContamination(contamination));
        }
        if data.is_empty() {
            return Err(AnomalyError::NoRows);
        }

        let psi = sample_size.clamp(1, data.len());
        let max_depth = (psi as f64).log2().ceil().max(1.0) as usize;
        let mut rng = StdRng::seed_from_u64(seed);
        let trees = (0..n_trees.max(1))
            .map(|_| {
                let mut rows = index::sample(&mut rng, data.len(), psi).into_vec();
                rows.sort_unstable();
                IsolationTree::grow(data, rows, max_depth, &mut rng)
            })
            .collect();

        let mut forest = Self {
            trees,
            sample_size: psi,
            offset: 0.0,
        };
        let scores: Vec<f64> = data.iter().map(|row| forest.score_sample(row)).collect();
        forest.offset = percentile(&scores, contamination * 100.0).unwrap_or(0.0);
        Ok(forest)
    }

    /// Negated isolation score in [-1, 0); lower is more abnormal
    pub fn score_sample(&self, sample: &[f64]) -> f64 {
        let mean_path = self.trees.iter().map(|t| t.path_length(sample)).sum::<f64>()
            / self.trees.len() as f64;
        let normaliser = average_path_length(self.sample_size);
        if normaliser <= 0.0 {
            return -0.5;
        }
        -(2f64.powf(-mean_path / normaliser))
    }

    /// Score shifted by the offset; negative values are outliers
    pub fn decision(&self, sample: &[f64]) -> f64 {
        self.score_sample(sample) - self.offset
    }

    pub fn offset(&self) -> f64 {
        self.offset
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}
