//! In-memory task registry

use crate::error::TaskError;
use crate::task::{ArtifactRef, ErrorSummary, Task, TaskId, TaskStatus, TaskStatusView};
use chrono::Utc;
use photocloud_data::ReconstructionMethod;
use std::collections::HashMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::debug;

/// Result fields recorded when a task completes.
#[derive(Debug, Clone)]
pub struct TaskCompletion {
    pub method: ReconstructionMethod,
    pub point_count: usize,
    pub artifact: ArtifactRef,
    pub warnings: Vec<String>,
}

/// Shared store of task records, safe for concurrent readers and writers.
///
/// Every status change goes through [`TaskStatus::can_transition_to`], so a
/// task never leaves a terminal state.
#[derive(Debug, Default)]
pub struct TaskRegistry {
    tasks: RwLock<HashMap<TaskId, Task>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<TaskId, Task>> {
        self.tasks.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn insert(&self, task: Task) {
        debug!("Registered task {} ({} inputs)", task.id, task.file_count());
        self.write().insert(task.id, task);
    }

    pub fn get(&self, id: TaskId) -> Result<Task, TaskError> {
        self.read().get(&id).cloned().ok_or(TaskError::UnknownTask(id))
    }

    pub fn status_view(&self, id: TaskId) -> Result<TaskStatusView, TaskError> {
        self.read()
            .get(&id)
            .map(Task::view)
            .ok_or(TaskError::UnknownTask(id))
    }

    /// All tasks, oldest first.
    pub fn list(&self) -> Vec<Task> {
        let mut tasks: Vec<Task> = self.read().values().cloned().collect();
        tasks.sort_by_key(|t| t.created_at);
        tasks
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// `queued -> processing`
    pub fn start(&self, id: TaskId) -> Result<(), TaskError> {
        self.transition(id, TaskStatus::Processing, |_| {})
    }

    /// `processing -> completed`
    pub fn complete(&self, id: TaskId, completion: TaskCompletion) -> Result<(), TaskError> {
        self.transition(id, TaskStatus::Completed, |task| {
            task.method = Some(completion.method);
            task.point_count = Some(completion.point_count);
            task.artifact = Some(completion.artifact);
            task.warnings = completion.warnings;
        })
    }

    /// `processing -> failed`
    pub fn fail(&self, id: TaskId, error: ErrorSummary) -> Result<(), TaskError> {
        self.transition(id, TaskStatus::Failed, |task| task.error = Some(error))
    }

    fn transition(
        &self,
        id: TaskId,
        next: TaskStatus,
        apply: impl FnOnce(&mut Task),
    ) -> Result<(), TaskError> {
        let mut tasks = self.write();
        let task = tasks.get_mut(&id).ok_or(TaskError::UnknownTask(id))?;
        if !task.status.can_transition_to(next) {
            return Err(TaskError::InvalidTransition {
                id,
                from: task.status,
                to: next,
            });
        }
        apply(task);
        task.status = next;
        task.updated_at = Utc::now();
        debug!("Task {} -> {}", id, next);
        Ok(())
    }
}
