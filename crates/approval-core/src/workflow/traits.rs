//! Downstream task execution trait

use async_trait::async_trait;
use crate::error::Result;
use super::file_context::FileContext;
use approval_types::{TaskId, TaskStatus};

/// Executes the downstream tasks of a workflow.
///
/// The approval gate hands each task the run's shared file context while it
/// holds it exclusively. Tasks may read the context and add files to it.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    /// Whether the workflow defines a task with this id
    fn has_task(&self, task_id: TaskId) -> bool;

    /// Run one task to completion
    async fn run_task(&self, task_id: TaskId, files: &mut FileContext) -> Result<TaskStatus>;
}
