use crate::error::{PipelineError, Result};
use crate::geo::Vintage;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Top-level pipeline configuration, loaded once from a TOML file and passed
/// by reference into each stage. Stages never consult the environment or the
/// working directory on their own.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub inputs: InputPaths,
    /// Directory enriched/imputed outputs and the model artifact are written to
    pub output_dir: PathBuf,
    /// Census vintage whose tract boundaries all covariates are expressed in
    pub target_vintage: Vintage,
    #[serde(default)]
    pub model: ModelConfig,
}

/// Locations of the four tabular inputs plus the crosswalk table.
#[derive(Debug, Clone, Deserialize)]
pub struct InputPaths {
    pub loans: PathBuf,
    pub covariates: PathBuf,
    pub crosswalk: PathBuf,
    pub lenders: PathBuf,
    pub price_index: PathBuf,
}

/// Classifier training parameters.
#[derive(Debug, Clone, Deserialize)]
pub struct ModelConfig {
    /// Fraction of labeled rows used for fitting
    #[serde(default = "default_train_fraction")]
    pub train_fraction: f64,
    /// Fraction used for threshold selection; the remainder is the test split
    #[serde(default = "default_validation_fraction")]
    pub validation_fraction: f64,
    /// Shuffle seed, fixed so splits are reproducible across runs
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Number of boosting rounds
    #[serde(default = "default_rounds")]
    pub rounds: usize,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
}

fn default_train_fraction() -> f64 {
    0.6
}

fn default_validation_fraction() -> f64 {
    0.2
}

fn default_seed() -> u64 {
    20240901
}

fn default_rounds() -> usize {
    200
}

fn default_learning_rate() -> f64 {
    0.1
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            train_fraction: default_train_fraction(),
            validation_fraction: default_validation_fraction(),
            seed: default_seed(),
            rounds: default_rounds(),
            learning_rate: default_learning_rate(),
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;

        let config: PipelineConfig = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let m = &self.model;
        let open_unit = |f: f64| f > 0.0 && f < 1.0;
        if !open_unit(m.train_fraction) || !open_unit(m.validation_fraction) {
            return Err(PipelineError::Config(
                "split fractions must lie in (0, 1)".to_string(),
            ));
        }
        if m.train_fraction + m.validation_fraction >= 1.0 {
            return Err(PipelineError::Config(format!(
                "train + validation fractions leave no test split ({} + {})",
                m.train_fraction, m.validation_fraction
            )));
        }
        if self.target_vintage % 10 != 0 {
            return Err(PipelineError::Config(format!(
                "target vintage {} is not a census decade",
                self.target_vintage
            )));
        }
        Ok(())
    }
}
