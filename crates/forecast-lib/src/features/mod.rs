//! Feature engineering over irregular hourly series

mod calendar;
mod engineer;
mod regressors;

pub use calendar::{cyclical, CalendarFeatures, CALENDAR_FEATURES, CYCLICAL_FEATURES};
pub use engineer::{
    hourly_run_lengths, FeatureConfig, FeatureEngineer, FeatureTable, DEFAULT_LAGS_HOURS,
    DEFAULT_ROLLING_HOURS,
};
pub use regressors::{
    cooling_degrees, heating_degrees, impute, prepare_regressors, Imputation, RegressorConfig,
    RegressorSet, TEMPERATURE_COLUMN,
};
