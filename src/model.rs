//! The classifier seam, the gradient-boosted implementation and the on-disk artifact layout.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use gbdt::config::Config;
use gbdt::decision_tree::{Data, DataVec, ValueType};
use gbdt::gradient_boost::GBDT;
use linfa::Dataset;
use ndarray::{ArrayView2, Ix1};
use tracing::{debug, info};

use crate::config::TrainingConfig;
use crate::error::ArtifactError;

/// Anything that maps aligned feature rows to fraud probabilities.
pub trait FraudClassifier: Send + Sync {
    /// One probability in `[0, 1]` per row of `features`.
    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct GbdtParams {
    pub n_estimators: usize,
    pub max_depth: u32,
    pub learning_rate: f64,
    /// Sample weight for fraud rows; legitimate rows weigh 1
    pub scale_pos_weight: f64,
    pub min_leaf_size: usize,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self::from(&TrainingConfig::default())
    }
}

impl From<&TrainingConfig> for GbdtParams {
    fn from(config: &TrainingConfig) -> Self {
        Self {
            n_estimators: config.n_estimators,
            max_depth: config.max_depth,
            learning_rate: config.learning_rate,
            scale_pos_weight: config.scale_pos_weight,
            min_leaf_size: config.min_leaf_size,
        }
    }
}

pub struct GbdtClassifier {
    model: GBDT,
}

impl GbdtClassifier {
    /// Fits log-likelihood boosted trees. Targets are class indices, 1 = fraud.
    pub fn fit(dataset: &Dataset<f64, usize, Ix1>, params: &GbdtParams) -> Self {
        let records = dataset.records();
        let targets = dataset.targets();

        let mut cfg = Config::new();
        cfg.set_feature_size(records.ncols());
        cfg.set_max_depth(params.max_depth);
        cfg.set_iterations(params.n_estimators);
        cfg.set_shrinkage(params.learning_rate as ValueType);
        cfg.set_loss("LogLikelyhood");
        cfg.set_min_leaf_size(params.min_leaf_size);
        cfg.set_data_sample_ratio(1.0);
        cfg.set_feature_sample_ratio(1.0);
        cfg.set_debug(false);

        let mut training: DataVec = records
            .rows()
            .into_iter()
            .zip(targets.iter())
            .map(|(row, &target)| {
                let (weight, label) = if target > 0 {
                    (params.scale_pos_weight as ValueType, 1.0)
                } else {
                    (1.0, -1.0)
                };
                Data::new_training_data(to_values(row.iter()), weight, label, None)
            })
            .collect();

        debug!(
            rows = training.len(),
            features = records.ncols(),
            trees = params.n_estimators,
            "fitting gradient boosted trees"
        );
        let mut model = GBDT::new(&cfg);
        model.fit(&mut training);
        Self { model }
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let target = utf8_path(path)?;
        self.model
            .save_model(target)
            .map_err(|err| ArtifactError::Model {
                path: path.to_path_buf(),
                message: err.to_string(),
            })
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let source = utf8_path(path)?;
        let model = GBDT::load_model(source).map_err(|err| ArtifactError::Model {
            path: path.to_path_buf(),
            message: err.to_string(),
        })?;
        Ok(Self { model })
    }
}

impl FraudClassifier for GbdtClassifier {
    fn predict_proba(&self, features: ArrayView2<'_, f64>) -> Vec<f64> {
        if features.nrows() == 0 {
            return Vec::new();
        }
        let rows: DataVec = features
            .rows()
            .into_iter()
            .map(|row| Data::new_test_data(to_values(row.iter()), None))
            .collect();
        self.model
            .predict(&rows)
            .into_iter()
            .map(|p| f64::from(p).clamp(0.0, 1.0))
            .collect()
    }
}

fn to_values<'a>(row: impl Iterator<Item = &'a f64>) -> Vec<ValueType> {
    row.map(|&v| v as ValueType).collect()
}

fn utf8_path(path: &Path) -> Result<&str, ArtifactError> {
    path.to_str().ok_or_else(|| ArtifactError::Model {
        path: path.to_path_buf(),
        message: "path is not valid UTF-8".to_string(),
    })
}

/// File locations inside an artifact directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactPaths {
    pub dir: PathBuf,
    pub model: PathBuf,
    pub schema: PathBuf,
    pub threshold: PathBuf,
    pub profiles: PathBuf,
    pub report: PathBuf,
}

impl ArtifactPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            model: dir.join("fraud_model.json"),
            schema: dir.join("feature_columns.json"),
            threshold: dir.join("threshold.txt"),
            profiles: dir.join("sender_profiles.json"),
            report: dir.join("training_report.json"),
            dir,
        }
    }

    pub fn create_dir(&self) -> Result<(), ArtifactError> {
        fs::create_dir_all(&self.dir).map_err(|source| ArtifactError::Io {
            path: self.dir.clone(),
            source,
        })
    }
}

/// Reads the persisted decision threshold; a missing file yields `default`.
pub fn load_threshold(path: &Path, default: f64) -> Result<f64, ArtifactError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            info!(path = %path.display(), default, "no threshold file, using default");
            return Ok(default);
        }
        Err(source) => {
            return Err(ArtifactError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    let value = raw.trim();
    value
        .parse::<f64>()
        .ok()
        .filter(|t| t.is_finite())
        .ok_or_else(|| ArtifactError::InvalidThreshold {
            path: path.to_path_buf(),
            value: value.to_string(),
        })
}

pub fn write_threshold(path: &Path, threshold: f64) -> Result<(), ArtifactError> {
    fs::write(path, format!("{}\n", threshold)).map_err(|source| ArtifactError::Io {
        path: path.to_path_buf(),
        source,
    })
}
