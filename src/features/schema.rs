//! The ordered feature column list recorded at training time, and alignment of
//! later feature tables to it.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::FeatureTable;
use crate::error::ArtifactError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureSchema {
    columns: Vec<String>,
}

impl FeatureSchema {
    pub fn new(columns: Vec<String>) -> Self {
        Self { columns }
    }

    pub fn from_table(table: &FeatureTable) -> Self {
        Self::new(table.columns().to_vec())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Reindexes `table` to this schema: schema columns the table lacks are zero,
    /// table columns outside the schema are dropped.
    pub fn align(&self, table: &FeatureTable) -> Array2<f64> {
        let source: HashMap<&str, usize> = table
            .columns()
            .iter()
            .enumerate()
            .map(|(i, name)| (name.as_str(), i))
            .collect();
        let mapping: Vec<Option<usize>> = self
            .columns
            .iter()
            .map(|name| source.get(name.as_str()).copied())
            .collect();

        let values = table.values();
        Array2::from_shape_fn((table.nrows(), self.columns.len()), |(row, col)| {
            mapping[col].map_or(0.0, |src| values[[row, src]])
        })
    }

    pub fn load(path: &Path) -> Result<Self, ArtifactError> {
        let data = fs::read_to_string(path).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&data).map_err(|source| ArtifactError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ArtifactError> {
        let data = serde_json::to_string_pretty(self).map_err(|source| ArtifactError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, data).map_err(|source| ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}
