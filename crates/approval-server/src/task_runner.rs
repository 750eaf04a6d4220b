//! Runs downstream workflow tasks as shell commands

use approval_core::config::TaskDefinition;
use approval_core::error::{ApprovalError, Result};
use approval_core::{FileContext, TaskRunner};
use approval_types::{TaskId, TaskStatus};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::process::Command;

/// Environment variable listing the files in context, one path per line
pub const FILES_ENV: &str = "APPROVAL_FILES";
/// Environment variable naming the task being run
pub const TASK_ID_ENV: &str = "APPROVAL_TASK_ID";

pub struct ShellTaskRunner {
    tasks: HashMap<TaskId, TaskDefinition>,
}

impl ShellTaskRunner {
    pub fn new(tasks: impl IntoIterator<Item = TaskDefinition>) -> Self {
        Self {
            tasks: tasks.into_iter().map(|task| (task.id, task)).collect(),
        }
    }
}

#[async_trait]
impl TaskRunner for ShellTaskRunner {
    fn has_task(&self, task_id: TaskId) -> bool {
        self.tasks.contains_key(&task_id)
    }

    async fn run_task(&self, task_id: TaskId, files: &mut FileContext) -> Result<TaskStatus> {
        let task = self.tasks.get(&task_id)
            .ok_or_else(|| ApprovalError::Task(format!("Task {} is not defined", task_id)))?;

        let Some(command) = &task.command else {
            log::info!("Task {} ({}) has no command, nothing to run", task_id, task.name);
            return Ok(TaskStatus::Success);
        };

        let file_list = files.files()
            .iter()
            .map(|file| file.path.display().to_string())
            .collect::<Vec<_>>()
            .join("\n");

        log::info!("Running task {} ({}) with {} file(s)", task_id, task.name, files.len());

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env(FILES_ENV, file_list)
            .env(TASK_ID_ENV, task_id.to_string())
            .output()
            .await
            .map_err(|e| ApprovalError::Task(format!("Failed to spawn task {}: {}", task_id, e)))?;

        if output.status.success() {
            log::debug!("Task {} output: {}", task_id, String::from_utf8_lossy(&output.stdout).trim());
            Ok(TaskStatus::Success)
        } else {
            log::warn!(
                "Task {} ({}) exited with {}: {}",
                task_id,
                task.name,
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            Ok(TaskStatus::Error)
        }
    }
}
