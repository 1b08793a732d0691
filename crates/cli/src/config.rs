//! Configuration management for the CLI
//!
//! Layers, lowest first: `RunConfig` defaults, an optional config file,
//! `CEF_*` environment variables (`__` separates nested keys, e.g.
//! `CEF_BOOSTING__N_ESTIMATORS=50`), then command-line flags.

use config::{Config, Environment, File};
use forecast_lib::{RunConfig, Utility};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(#[from] forecast_lib::DataError),
}

/// Load the run configuration from the optional file and the environment
pub fn load_run_config(path: Option<&Path>) -> Result<RunConfig, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    let settings = builder
        .add_source(
            Environment::with_prefix("CEF")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        )
        .build()?;

    let run_config: RunConfig = settings.try_deserialize()?;
    run_config.validate()?;
    Ok(run_config)
}

/// Flags shared by every subcommand
pub fn apply_global_overrides(config: &mut RunConfig, seed: Option<u64>, utility: Option<Utility>) {
    if let Some(seed) = seed {
        config.seed = seed;
    }
    if let Some(utility) = utility {
        config.utility = utility;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forecast_lib::ModelKind;
    use std::io::Write;

    #[test]
    fn test_defaults_without_file() {
        let config = load_run_config(None).unwrap();
        assert_eq!(config.models, ModelKind::ALL.to_vec());
        assert_eq!(config.anomaly.contamination, 0.05);
    }

    #[test]
    fn test_toml_file_overrides_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "seed = 7\nmodels = [\"decomposition\"]\n\n[boosting]\nn_estimators = 25\n"
        )
        .unwrap();

        let config = load_run_config(Some(file.path())).unwrap();
        assert_eq!(config.seed, 7);
        assert_eq!(config.models, vec![ModelKind::Decomposition]);
        assert_eq!(config.boosting.n_estimators, 25);
        assert_eq!(config.boosting.max_depth, 8);
    }

    #[test]
    fn test_invalid_file_values_are_rejected() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(file, "{{\"sample_fraction\": 2.0}}").unwrap();
        assert!(matches!(
            load_run_config(Some(file.path())),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_flag_overrides() {
        let mut config = RunConfig::default();
        apply_global_overrides(&mut config, Some(9), Some(Utility::Steam));
        assert_eq!(config.seed, 9);
        assert_eq!(config.utility, Utility::Steam);
    }
}
