use std::{fs, path::Path};

use anyhow::Result;
use flight_estimator_core::EstimatorConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub estimator: EstimatorConfig,
}

impl CliConfig {
    /// Reads `path`, writing the defaults there first if it does not exist.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            log::info!("wrote default config to {}", path.display());
            return Ok(config);
        }

        let config_str = fs::read_to_string(path)?;
        let config = toml::from_str(&config_str)?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let config_str = toml::to_string_pretty(self)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        fs::write(path, config_str)?;
        Ok(())
    }
}

pub fn load_estimator_config(path: Option<&Path>) -> Result<EstimatorConfig> {
    match path {
        Some(path) => Ok(CliConfig::load(path)?.estimator),
        None => Ok(EstimatorConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use flight_estimator_core::GateConfidence;

    use super::*;

    #[test]
    fn missing_file_is_created_with_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("estimator.toml");

        let config = CliConfig::load(&path).unwrap();
        assert_eq!(config, CliConfig::default());
        assert!(path.exists());
        assert_eq!(CliConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimator.toml");
        fs::write(
            &path,
            "[estimator.phase]\nboost_accel_g = 2.5\n\n[estimator.filter]\ngate_confidence = \"0.999\"\n",
        )
        .unwrap();

        let config = load_estimator_config(Some(&path)).unwrap();
        assert_eq!(config.phase.boost_accel_g, 2.5);
        assert_eq!(config.phase.landed_speed_mps, 1.0);
        assert_eq!(config.filter.gate_confidence, GateConfidence::P999);
        assert_eq!(config.validator, EstimatorConfig::default().validator);
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("estimator.toml");
        fs::write(&path, "[estimator.phase]\nboost_accel_g = \"fast\"\n").unwrap();
        assert!(CliConfig::load(&path).is_err());
    }
}
