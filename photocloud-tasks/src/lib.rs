//! Photocloud Task Crate
//!
//! Background execution of reconstruction requests. A [`TaskOrchestrator`]
//! admits submissions, runs the reconstruction pipeline on the tokio runtime
//! and answers status queries from a shared [`TaskRegistry`]. Finished point
//! clouds are written as one PLY file per task by the [`ArtifactStore`].
//!
//! Task lifecycle: `queued -> processing -> completed | failed`.

pub mod config;
pub mod error;
pub mod orchestrator;
pub mod registry;
pub mod storage;
pub mod task;

pub use config::{ConfigError, ServiceConfig};
pub use error::{ErrorKind, TaskError};
pub use orchestrator::{Submission, TaskOrchestrator};
pub use registry::{TaskCompletion, TaskRegistry};
pub use storage::ArtifactStore;
pub use task::{ArtifactRef, ErrorSummary, Task, TaskId, TaskStatus, TaskStatusView};
