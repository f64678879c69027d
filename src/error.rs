//! Error types for each layer, plus the HTTP error returned by the scoring endpoint.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::path::PathBuf;
use thiserror::Error;

/// Failure to read raw transactions into a batch.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to open {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error("expected a JSON object or an array of JSON objects")]
    NotARecord,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("required column `{0}` is missing from the transaction batch")]
    MissingColumn(&'static str),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("got {probabilities} probabilities but {labels} labels")]
    LengthMismatch { probabilities: usize, labels: usize },
}

/// Reading or writing the persisted model artifact.
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed JSON in {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("classifier at {path}: {message}")]
    Model { path: PathBuf, message: String },
    #[error("threshold file {path} does not contain a number: {value:?}")]
    InvalidThreshold { path: PathBuf, value: String },
}

#[derive(Debug, Error)]
pub enum TrainingError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),
    #[error("{missing} of {rows} rows have no fraud_flag label")]
    MissingLabels { missing: usize, rows: usize },
    #[error("class {class} has no samples; cannot train a binary classifier")]
    EmptyClass { class: usize },
    #[error("oversampling needs at least 2 minority rows, found {found}")]
    InsufficientMinority { found: usize },
    #[error("failed to build the neighbour index: {0}")]
    NeighbourIndex(#[from] linfa_nn::BuildError),
    #[error("nearest neighbour query failed: {0}")]
    NeighbourQuery(#[from] linfa_nn::NnError),
    #[error(transparent)]
    Shape(#[from] ndarray::ShapeError),
    #[error(transparent)]
    Threshold(#[from] ThresholdError),
}

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("start date `{0}` is not YYYY-MM-DD")]
    InvalidStartDate(String),
    #[error("invalid sampling parameters: {0}")]
    Distribution(String),
    #[error("generator needs at least one {0}")]
    EmptyPool(&'static str),
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error(transparent)]
    Csv(#[from] csv::Error),
}

pub type AppResult<T> = Result<T, AppError>;

/// Error surfaced by the scoring endpoint.
#[derive(Debug)]
pub enum AppError {
    ValidationError(String),
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.as_str()),
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = Json(json!({
            "error": error_message,
            "status": status.as_u16()
        }));

        (status, body).into_response()
    }
}

impl From<PipelineError> for AppError {
    fn from(err: PipelineError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<LoadError> for AppError {
    fn from(err: LoadError) -> Self {
        AppError::ValidationError(err.to_string())
    }
}
