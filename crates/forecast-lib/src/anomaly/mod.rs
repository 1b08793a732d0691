//! Anomaly detection over daily building consumption

mod detector;
mod isolation_forest;

pub use detector::{AnomalyConfig, AnomalyDetector, AnomalyReport};
pub use isolation_forest::{average_path_length, percentile, IsolationForest};
