//! Task records and the status view handed to callers

use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use photocloud_data::ReconstructionMethod;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque task identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        matches!(
            (self, next),
            (TaskStatus::Queued, TaskStatus::Processing)
                | (TaskStatus::Processing, TaskStatus::Completed)
                | (TaskStatus::Processing, TaskStatus::Failed)
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TaskStatus::Queued => "queued",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Name of a stored artifact, relative to the artifact directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactRef(String);

impl ArtifactRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ArtifactRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Machine-readable kind plus human-readable detail of a failed task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorSummary {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorSummary {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Registry record of one submission.
#[derive(Debug, Clone)]
pub struct Task {
    pub id: TaskId,
    pub status: TaskStatus,
    /// Filenames of the submitted inputs, in submission order
    pub inputs: Vec<String>,
    /// Set once completed
    pub method: Option<ReconstructionMethod>,
    pub point_count: Option<usize>,
    pub artifact: Option<ArtifactRef>,
    /// Set once failed
    pub error: Option<ErrorSummary>,
    pub warnings: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(id: TaskId, inputs: Vec<String>) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: TaskStatus::Queued,
            inputs,
            method: None,
            point_count: None,
            artifact: None,
            error: None,
            warnings: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn file_count(&self) -> usize {
        self.inputs.len()
    }

    pub fn view(&self) -> TaskStatusView {
        TaskStatusView {
            task_id: self.id,
            status: self.status,
            method: self.method,
            point_count: self.point_count,
            artifact: self.artifact.clone(),
            error: self.error.clone(),
            warnings: self.warnings.clone(),
            file_count: self.file_count(),
            submitted_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

/// Snapshot of a task returned by status queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub task_id: TaskId,
    pub status: TaskStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<ReconstructionMethod>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub point_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<ArtifactRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub file_count: usize,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
