use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{ConfigError, Result};
use crate::pipeline::processing::clean::CleanerConfig;
use crate::pipeline::processing::dedup::DedupConfig;
use crate::pipeline::processing::normalize::MatcherConfig;
use crate::pipeline::processing::quantize::QuantizationConfig;
use crate::pipeline::processing::score::ScoringConfig;

/// Settings for one pipeline run. Every section falls back to its defaults,
/// so an empty file is a valid configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Registry file used when none is given on the command line.
    /// Relative paths resolve against the configuration file's directory.
    pub registry_path: Option<PathBuf>,
    pub cleaner: CleanerConfig,
    pub matcher: MatcherConfig,
    pub dedup: DedupConfig,
    pub quantization: QuantizationConfig,
    pub scoring: ScoringConfig,
}

impl PipelineConfig {
    /// Load and validate a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)?;
        let mut config: PipelineConfig = toml::from_str(&content)?;

        if let (Some(registry), Some(dir)) = (config.registry_path.as_ref(), path.parent()) {
            if registry.is_relative() {
                config.registry_path = Some(dir.join(registry));
            }
        }

        config.validate()?;
        info!("Loaded pipeline configuration from {}", path.display());
        Ok(config)
    }

    /// Check every section. Disabled optional stages are still validated so a
    /// bad setting surfaces before it is switched on.
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        self.cleaner.validate()?;
        self.matcher.validate()?;
        self.dedup.validate()?;
        self.quantization.validate()?;
        self.scoring.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PipelineError;
    use crate::pipeline::processing::score::FinalScaling;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: PipelineConfig = toml::from_str("").unwrap();
        assert!(config.validate().is_ok());
        assert!(config.dedup.enabled);
        assert!(config.quantization.enabled);
        assert_eq!(config.matcher.similarity_threshold, 0.85);
        assert_eq!(config.scoring.scaling, FinalScaling::BatchMinMax);
    }

    #[test]
    fn test_partial_sections_override_defaults() {
        let config: PipelineConfig = toml::from_str(
            r#"
            [dedup]
            enabled = false

            [scoring]
            scaling = "weight_ceiling"

            [scoring.weights]
            price = 0.5
            "#,
        )
        .unwrap();
        assert!(!config.dedup.enabled);
        assert_eq!(config.dedup.price_tolerance, 0.05);
        assert_eq!(config.scoring.scaling, FinalScaling::WeightCeiling);
        assert_eq!(config.scoring.weights.price, 0.5);
        assert_eq!(config.scoring.weights.vram, 0.3);
    }

    #[test]
    fn test_load_resolves_registry_relative_to_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(&path, "registry_path = \"registry.toml\"\n").unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.registry_path, Some(dir.path().join("registry.toml")));
    }

    #[test]
    fn test_load_rejects_invalid_weights() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            "[scoring.weights]\nvram = 0\nmig = 0\nnvlink = 0\ntdp = 0\nprice = 0\nquantization = 0\n",
        )
        .unwrap();

        match PipelineConfig::load(&path) {
            Err(PipelineError::Config(ConfigError::AllWeightsZero)) => {}
            other => panic!("unexpected: {:?}", other),
        }
    }
}
