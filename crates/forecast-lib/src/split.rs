//! Temporal train/test partitioning
//!
//! Splits are index ranges over an ordered view, so the same policy applies
//! to a raw series, a feature table or a list of sequence windows.

use crate::error::{DataError, DataResult};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::ops::Range;

/// How the held-out suffix is chosen
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum SplitPolicy {
    /// Test rows are those later than `max(timestamp) - hours`
    TrailingDuration { hours: i64 },
    /// Test rows are the last `fraction` of rows; the boundary index is
    /// `floor(n * (1 - fraction))`
    TrailingFraction { fraction: f64 },
}

impl SplitPolicy {
    pub fn last_days(days: i64) -> Self {
        SplitPolicy::TrailingDuration { hours: days * 24 }
    }

    pub fn last_fraction(fraction: f64) -> Self {
        SplitPolicy::TrailingFraction { fraction }
    }

    pub fn validate(&self) -> DataResult<()> {
        match *self {
            SplitPolicy::TrailingDuration { hours } if hours <= 0 => Err(
                DataError::InvalidParameter(format!(
                    "split duration must be positive, got {}h",
                    hours
                )),
            ),
            SplitPolicy::TrailingFraction { fraction } if !(fraction > 0.0 && fraction < 1.0) => {
                Err(DataError::InvalidParameter(format!(
                    "split fraction must be in (0, 1), got {}",
                    fraction
                )))
            }
            _ => Ok(()),
        }
    }

    /// Partition an ordered timestamp axis
    ///
    /// `timestamps` must be strictly increasing; every train timestamp then
    /// precedes every test timestamp.
    pub fn split(&self, timestamps: &[DateTime<Utc>]) -> DataResult<TrainTestSplit> {
        self.validate()?;
        let n = timestamps.len();
        let boundary = match *self {
            SplitPolicy::TrailingDuration { hours } => match timestamps.last() {
                Some(last) => {
                    let cutoff = *last - Duration::hours(hours);
                    timestamps.partition_point(|ts| *ts <= cutoff)
                }
                None => 0,
            },
            SplitPolicy::TrailingFraction { fraction } => {
                // epsilon keeps e.g. 100 * (1 - 0.15) from flooring to 84
                ((n as f64) * (1.0 - fraction) + 1e-9).floor() as usize
            }
        };
        if boundary == 0 {
            return Err(DataError::EmptySplit { partition: "train", rows: n });
        }
        if boundary >= n {
            return Err(DataError::EmptySplit { partition: "test", rows: n });
        }
        Ok(TrainTestSplit {
            train: 0..boundary,
            test: boundary..n,
        })
    }
}

/// Index ranges of the training prefix and test suffix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Range<usize>,
    pub test: Range<usize>,
}

impl TrainTestSplit {
    pub fn train_len(&self) -> usize {
        self.train.len()
    }

    pub fn test_len(&self) -> usize {
        self.test.len()
    }
}
