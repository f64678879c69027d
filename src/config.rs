//! Configuration for the feature pipeline, training, serving and logging.
//!
//! Values come from an optional TOML file and `UPI_GUARD__SECTION__KEY` environment
//! overrides; anything unspecified falls back to the defaults below.

use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::threshold::CostModel;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub pipeline: PipelineConfig,
    pub training: TrainingConfig,
    pub costs: CostModel,
    pub serving: ServingConfig,
    pub artifacts: ArtifactConfig,
    pub generator: GeneratorConfig,
    pub logging: LoggingConfig,
}

/// Feature engineering parameters
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Trailing window for the per-sender velocity count
    pub velocity_window_secs: i64,
    /// Added to the sender standard deviation before dividing
    pub zscore_epsilon: f64,
    pub pagerank_damping: f64,
    /// Per-node L1 tolerance; the run stops once the total change is below `N * tolerance`
    pub pagerank_tolerance: f64,
    pub pagerank_max_iterations: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct TrainingConfig {
    pub test_fraction: f64,
    pub seed: u64,
    pub smote_neighbors: usize,
    pub n_estimators: usize,
    pub max_depth: u32,
    pub learning_rate: f64,
    /// Sample weight applied to positive rows
    pub scale_pos_weight: f64,
    pub min_leaf_size: usize,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServingConfig {
    pub host: String,
    pub port: u16,
    /// Threshold used when the artifact has no threshold file
    pub default_threshold: f64,
    /// Replace batch-of-one sender aggregates with the training-time snapshot when present
    pub use_sender_profiles: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactConfig {
    pub dir: PathBuf,
}

/// Synthetic dataset parameters
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GeneratorConfig {
    pub rows: usize,
    pub seed: u64,
    pub senders: u32,
    pub receivers: u32,
    pub mule_accounts: usize,
    /// Mule receivers are drawn from `R1..=R{mule_receiver_pool}`
    pub mule_receiver_pool: u32,
    /// Probability that a positive label is flipped back to negative
    pub label_flip_rate: f64,
    pub start_date: String,
    pub rules: LabelRules,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LabelRules {
    pub mule_network: bool,
    pub night_high_amount: bool,
    pub burst_velocity: bool,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// One JSON object per line instead of the human-readable format
    pub json: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            velocity_window_secs: 3600,
            zscore_epsilon: 1e-5,
            pagerank_damping: 0.85,
            pagerank_tolerance: 1e-6,
            pagerank_max_iterations: 100,
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            test_fraction: 0.2,
            seed: 42,
            smote_neighbors: 5,
            n_estimators: 400,
            max_depth: 8,
            learning_rate: 0.05,
            scale_pos_weight: 10.0,
            min_leaf_size: 1,
        }
    }
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            default_threshold: 0.5,
            use_sender_profiles: true,
        }
    }
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("model"),
        }
    }
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            rows: 100_000,
            seed: 42,
            senders: 10_000,
            receivers: 10_000,
            mule_accounts: 100,
            mule_receiver_pool: 5_000,
            label_flip_rate: 0.3,
            start_date: "2024-01-01".to_string(),
            rules: LabelRules::default(),
        }
    }
}

impl Default for LabelRules {
    fn default() -> Self {
        Self {
            mule_network: true,
            night_high_amount: true,
            burst_velocity: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl AppConfig {
    /// Load `upi_guard.toml` from the working directory if present, then environment overrides.
    pub fn load() -> Result<Self> {
        Self::build(File::with_name("upi_guard").required(false))
    }

    /// Load configuration from a specific path; the file must exist.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(File::from(path.as_ref()))
    }

    fn build<S>(file: S) -> Result<Self>
    where
        S: config::Source + Send + Sync + 'static,
    {
        let config = Config::builder()
            .add_source(file)
            .add_source(
                Environment::with_prefix("UPI_GUARD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.pipeline.velocity_window_secs, 3600);
        assert_eq!(config.pipeline.pagerank_damping, 0.85);
        assert_eq!(config.training.n_estimators, 400);
        assert_eq!(config.training.max_depth, 8);
        assert_eq!(config.costs.false_negative, 5000.0);
        assert_eq!(config.costs.false_positive, 200.0);
        assert_eq!(config.serving.default_threshold, 0.5);
        assert_eq!(config.artifacts.dir, PathBuf::from("model"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[training]\nn_estimators = 25\n\n[serving]\nport = 9100").unwrap();

        let config = AppConfig::load_from_path(file.path()).unwrap();
        assert_eq!(config.training.n_estimators, 25);
        assert_eq!(config.training.max_depth, 8);
        assert_eq!(config.serving.port, 9100);
        assert_eq!(config.serving.host, "0.0.0.0");
        assert!(config.generator.rules.burst_velocity);
    }
}
