//! Campus utility forecasting library
//!
//! This crate provides the core functionality for:
//! - Hourly series assembly and feature engineering
//! - Time-ordered train/test splitting
//! - Decomposition, recurrent and gradient-boosted forecasting adapters
//! - Accuracy metrics and model comparison
//! - Isolation-forest anomaly detection over daily building data
//! - Observability

pub mod adapters;
pub mod anomaly;
pub mod config;
pub mod dataset;
pub mod error;
pub mod features;
pub mod metrics;
pub mod models;
pub mod observability;
pub mod pipeline;
pub mod report;
pub mod split;

pub use adapters::{ModelAdapter, ModelEvaluation};
pub use anomaly::{AnomalyConfig, AnomalyDetector, AnomalyReport};
pub use config::RunConfig;
pub use error::{AnomalyError, DataError, ModelError, ReportingError};
pub use models::*;
pub use observability::{PipelineMetrics, StructuredLogger};
pub use pipeline::{Pipeline, PipelineOutput};
pub use report::{ComparisonReport, ComparisonReporter, ModelFailure, PrimaryMetric, ReportConfig};
pub use split::{SplitPolicy, TrainTestSplit};
