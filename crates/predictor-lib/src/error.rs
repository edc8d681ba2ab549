//! Error types for the prediction core

use serde::Serialize;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = ModelError> = std::result::Result<T, E>;

/// Errors surfaced by the feature pipeline, the estimators, persistence and
/// the model registry. None of them are retried internally.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("Model '{0}' is not registered")]
    NotRegistered(String),

    #[error("Model '{0}' must be trained before making predictions")]
    NotTrained(String),

    #[error("Dataset is missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),

    #[error("Invalid value {value:?} in column '{column}' at row {row}")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },

    #[error("Failed to read dataset {path}: {source}")]
    DatasetRead {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },

    #[error("Malformed dataset: {0}")]
    Csv(#[from] csv::Error),

    #[error("Invalid training set: {0}")]
    InvalidTrainingSet(String),

    #[error("Expected {expected} features per row, got {found}")]
    FeatureMismatch { expected: usize, found: usize },

    #[error("Invalid hyperparameter: {0}")]
    InvalidParameter(String),

    #[error("Failed to access model file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Model file {path} is corrupt: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Coarse classification used by callers to map errors onto user-facing
/// statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotRegistered,
    NotTrained,
    DataIntegrity,
    Persistence,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotRegistered => "not_registered",
            ErrorKind::NotTrained => "not_trained",
            ErrorKind::DataIntegrity => "data_integrity",
            ErrorKind::Persistence => "persistence",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

impl ModelError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ModelError::NotRegistered(_) => ErrorKind::NotRegistered,
            ModelError::NotTrained(_) => ErrorKind::NotTrained,
            ModelError::MissingColumns(_)
            | ModelError::InvalidValue { .. }
            | ModelError::DatasetRead { .. }
            | ModelError::Csv(_)
            | ModelError::InvalidTrainingSet(_) => ErrorKind::DataIntegrity,
            ModelError::Io { .. } | ModelError::Corrupt { .. } => ErrorKind::Persistence,
            ModelError::FeatureMismatch { .. } | ModelError::InvalidParameter(_) => {
                ErrorKind::InvalidInput
            }
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ModelError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ModelError::Corrupt {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
