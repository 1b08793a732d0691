//! Error taxonomy for the forecasting pipeline
//!
//! - `DataError`: local, recoverable problems with the data handed to a stage
//! - `ModelError`: an adapter failed internally; the model is excluded from
//!   the comparison
//! - `ReportingError`: nothing usable was produced; the only error that
//!   surfaces as a pipeline failure

use crate::models::ModelKind;
use thiserror::Error;

/// Problems with input data for a single stage
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    #[error("target column '{0}' is missing from the input table")]
    MissingTargetColumn(String),

    #[error("required column '{0}' is missing from the input table")]
    MissingColumn(String),

    #[error("insufficient history: {got} rows, need at least {needed}")]
    InsufficientHistory { needed: usize, got: usize },

    #[error("split would leave an empty {partition} partition ({rows} rows in series)")]
    EmptySplit { partition: &'static str, rows: usize },

    #[error("predicted and actual series share no timestamps")]
    NoOverlap,

    #[error("timestamps must be strictly increasing: {0}")]
    UnorderedTimestamps(String),

    #[error("invalid value at {timestamp}: {reason}")]
    InvalidValue { timestamp: String, reason: String },

    #[error("no rows for utility '{0}'")]
    EmptySeries(String),

    #[error("failed to parse input row {row}: {reason}")]
    Parse { row: usize, reason: String },

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

/// Failure inside a model adapter
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error(transparent)]
    Data(#[from] DataError),

    #[error("{model} optimisation did not converge: {reason}")]
    NotConverged { model: ModelKind, reason: String },

    #[error("{model} produced a non-finite value")]
    NonFinite { model: ModelKind },

    #[error("{0} is disabled in this run")]
    Disabled(ModelKind),

    #[error("{model} worker terminated abnormally: {reason}")]
    WorkerPanicked { model: ModelKind, reason: String },
}

/// Errors raised by the anomaly detector
#[derive(Error, Debug, Clone, PartialEq)]
pub enum AnomalyError {
    #[error("only {available} valid feature columns after dropping incomplete rows, need 2")]
    InsufficientFeatures { available: usize },

    #[error("no complete rows to fit the detector")]
    NoRows,

    #[error("contamination must be in (0, 0.5], got {0}")]
    InvalidContamination(f64),

    #[error("anomaly worker terminated abnormally: {0}")]
    WorkerPanicked(String),
}

/// The run produced nothing reportable
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReportingError {
    #[error("no models succeeded ({failures} attempted)")]
    NoModelsSucceeded { failures: usize },
}

pub type DataResult<T> = std::result::Result<T, DataError>;
pub type ModelResult<T> = std::result::Result<T, ModelError>;
