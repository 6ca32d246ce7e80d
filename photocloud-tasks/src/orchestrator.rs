//! Background task orchestration

use crate::config::ServiceConfig;
use crate::error::{ErrorKind, TaskError};
use crate::registry::{TaskCompletion, TaskRegistry};
use crate::storage::ArtifactStore;
use crate::task::{ArtifactRef, ErrorSummary, Task, TaskId, TaskStatusView};
use photocloud_data::{ImageInput, PlyEncoding, ReconstructionMethod, decode_ply, encode_ply};
use photocloud_recon::PipelineController;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

/// Input of one reconstruction request.
#[derive(Debug, Clone)]
pub enum Submission {
    /// Photographs to reconstruct, in caller order
    Images(Vec<ImageInput>),
    /// A finished PLY file, validated and stored as received
    Ply { bytes: Vec<u8>, filename: String },
}

impl Submission {
    fn input_names(&self) -> Vec<String> {
        match self {
            Submission::Images(images) => images.iter().map(|i| i.filename().to_string()).collect(),
            Submission::Ply { filename, .. } => vec![filename.clone()],
        }
    }
}

/// State shared between the orchestrator handle and running tasks.
struct Shared {
    registry: TaskRegistry,
    store: ArtifactStore,
    pipeline: PipelineController,
    encoding: PlyEncoding,
    permits: Semaphore,
}

/// Admits submissions and runs them to a terminal state in the background.
///
/// `submit` returns as soon as the task is registered. At most
/// `max_concurrent_tasks` reconstructions run at once; the rest stay
/// `queued` until a slot frees up.
pub struct TaskOrchestrator {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl TaskOrchestrator {
    /// Orchestrator on the current tokio runtime.
    pub fn new(config: ServiceConfig) -> Result<Self, TaskError> {
        let handle = Handle::try_current().map_err(|_| TaskError::NoRuntime)?;
        Self::with_handle(config, handle)
    }

    pub fn with_handle(config: ServiceConfig, runtime: Handle) -> Result<Self, TaskError> {
        config.validate()?;
        let pipeline = PipelineController::new(config.pipeline.clone());
        Self::with_pipeline(config, pipeline, runtime)
    }

    /// Orchestrator around a caller-built pipeline.
    pub fn with_pipeline(
        config: ServiceConfig,
        pipeline: PipelineController,
        runtime: Handle,
    ) -> Result<Self, TaskError> {
        config.validate()?;
        let store = ArtifactStore::open(&config.storage_dir)?;
        info!(
            "Task orchestrator ready: {} worker(s), artifacts in {}",
            config.max_concurrent_tasks,
            store.dir().display()
        );
        Ok(Self {
            shared: Arc::new(Shared {
                registry: TaskRegistry::new(),
                store,
                pipeline,
                encoding: config.ply_encoding,
                permits: Semaphore::new(config.max_concurrent_tasks),
            }),
            runtime,
        })
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.shared.registry
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.shared.store
    }

    /// Register a task and schedule it. Never waits on reconstruction.
    pub fn submit(&self, submission: Submission) -> Result<TaskId, TaskError> {
        match &submission {
            Submission::Images(images) if images.is_empty() => {
                return Err(TaskError::InvalidSubmission(
                    "no images supplied".to_string(),
                ));
            }
            Submission::Ply { bytes, .. } if bytes.is_empty() => {
                return Err(TaskError::InvalidSubmission("empty PLY file".to_string()));
            }
            _ => {}
        }

        let id = TaskId::new();
        let task = Task::new(id, submission.input_names());
        info!("Task {} queued with {} file(s)", id, task.file_count());
        self.shared.registry.insert(task);

        let shared = Arc::clone(&self.shared);
        self.runtime.spawn(shared.execute(id, submission));
        Ok(id)
    }

    /// Latest recorded state of a task.
    pub fn get_status(&self, id: TaskId) -> Result<TaskStatusView, TaskError> {
        self.shared.registry.status_view(id)
    }

    /// PLY bytes of a stored artifact.
    pub fn fetch_artifact(&self, artifact: &ArtifactRef) -> Result<Vec<u8>, TaskError> {
        self.shared.store.fetch(artifact)
    }

    /// Poll until the task is completed or failed.
    pub async fn wait_for_terminal(
        &self,
        id: TaskId,
        poll_interval: Duration,
    ) -> Result<TaskStatusView, TaskError> {
        loop {
            let view = self.get_status(id)?;
            if view.status.is_terminal() {
                return Ok(view);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }
}

impl Shared {
    #[tracing::instrument(skip_all, fields(task = %id))]
    async fn execute(self: Arc<Self>, id: TaskId, submission: Submission) {
        let Ok(_permit) = self.permits.acquire().await else {
            error!("Worker pool closed before task {} could start", id);
            return;
        };
        if let Err(e) = self.registry.start(id) {
            warn!("Task {} not started: {}", id, e);
            return;
        }
        info!("Task {} processing", id);

        let worker = Arc::clone(&self);
        let outcome = tokio::task::spawn_blocking(move || worker.run(id, submission))
            .await
            .unwrap_or_else(|join| {
                Err(ErrorSummary::new(
                    ErrorKind::Internal,
                    format!("reconstruction worker stopped: {join}"),
                ))
            });

        let recorded = match outcome {
            Ok(completion) => {
                info!(
                    "Task {} completed: {} points via {}",
                    id, completion.point_count, completion.method
                );
                self.registry.complete(id, completion)
            }
            Err(summary) => {
                warn!("Task {} failed ({}): {}", id, summary.kind, summary.message);
                self.registry.fail(id, summary)
            }
        };
        if let Err(e) = recorded {
            error!("Could not record outcome of task {}: {}", id, e);
        }
    }

    fn run(&self, id: TaskId, submission: Submission) -> Result<TaskCompletion, ErrorSummary> {
        match submission {
            Submission::Images(images) => {
                let result = self
                    .pipeline
                    .run(&images)
                    .map_err(|e| ErrorSummary::new(ErrorKind::from(&e), e.to_string()))?;
                let bytes = encode_ply(&result.cloud, self.encoding)
                    .map_err(|e| ErrorSummary::new(ErrorKind::from(&e), e.to_string()))?;
                let artifact = self.store_artifact(id, &bytes)?;
                Ok(TaskCompletion {
                    method: result.method,
                    point_count: result.cloud.len(),
                    artifact,
                    warnings: result.warnings,
                })
            }
            Submission::Ply { bytes, filename } => {
                let cloud = decode_ply(&bytes).map_err(|e| {
                    ErrorSummary::new(ErrorKind::from(&e), format!("'{filename}': {e}"))
                })?;
                let artifact = self.store_artifact(id, &bytes)?;
                Ok(TaskCompletion {
                    method: ReconstructionMethod::Upload,
                    point_count: cloud.len(),
                    artifact,
                    warnings: Vec::new(),
                })
            }
        }
    }

    fn store_artifact(&self, id: TaskId, bytes: &[u8]) -> Result<ArtifactRef, ErrorSummary> {
        self.store
            .write(id, bytes)
            .map_err(|e| ErrorSummary::new(ErrorKind::Storage, e.to_string()))
    }
}
