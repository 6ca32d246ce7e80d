//! Error types for task orchestration.

use crate::config::ConfigError;
use crate::task::{TaskId, TaskStatus};
use photocloud_data::PlyError;
use photocloud_recon::ReconError;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Failure category recorded on failed tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    ModelInference,
    InsufficientFeatures,
    MalformedPly,
    ImageDecode,
    Storage,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::ModelInference => "model_inference",
            ErrorKind::InsufficientFeatures => "insufficient_features",
            ErrorKind::MalformedPly => "malformed_ply",
            ErrorKind::ImageDecode => "image_decode",
            ErrorKind::Storage => "storage",
            ErrorKind::Internal => "internal",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<&PlyError> for ErrorKind {
    fn from(err: &PlyError) -> Self {
        match err {
            PlyError::Io(_) => ErrorKind::Storage,
            PlyError::Malformed(_) | PlyError::UnsupportedFormat(_) => ErrorKind::MalformedPly,
        }
    }
}

impl From<&ReconError> for ErrorKind {
    fn from(err: &ReconError) -> Self {
        match err {
            ReconError::ImageDecode { .. } => ErrorKind::ImageDecode,
            ReconError::ModelInference(_) => ErrorKind::ModelInference,
            ReconError::InsufficientFeatures(_) => ErrorKind::InsufficientFeatures,
            ReconError::Ply(ply) => ply.into(),
            ReconError::InvalidInput(_) | ReconError::InvalidConfig(_) => ErrorKind::Internal,
        }
    }
}

/// Errors returned to orchestrator callers.
#[derive(Debug, Error)]
pub enum TaskError {
    #[error("Unknown task: {0}")]
    UnknownTask(TaskId),

    #[error("Unknown artifact: {0}")]
    UnknownArtifact(String),

    #[error("Task {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Invalid submission: {0}")]
    InvalidSubmission(String),

    #[error("No tokio runtime available to run tasks")]
    NoRuntime,

    #[error("Storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
