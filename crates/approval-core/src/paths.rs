/// Path constants and utilities for approval signal files
use std::path::{Path, PathBuf};
use once_cell::sync::OnceCell;
use approval_types::{RunId, TaskId, WorkflowId};

// Static storage for configurable approval root
static APPROVAL_ROOT: OnceCell<String> = OnceCell::new();

// Default root constant
const DEFAULT_APPROVAL_ROOT: &str = "/var/lib/approval-gate/approvals";

/// Initialize the approval root directory. Can only be called once.
/// If not called, the default `/var/lib/approval-gate/approvals` will be used.
pub fn init_approval_root(path: String) -> Result<(), String> {
    APPROVAL_ROOT.set(path).map_err(|_| "Approval root already initialized".to_string())
}

/// Get the configured approval root or the default
fn get_approval_root() -> &'static str {
    APPROVAL_ROOT.get().map(|s| s.as_str()).unwrap_or(DEFAULT_APPROVAL_ROOT)
}

// Signal file names
pub const TRIGGER_FILE_NAME: &str = "task.approved";
pub const STOPPED_FILE_NAME: &str = "task.stopped";
pub const REJECTED_FILE_NAME: &str = "workflow.rejected";

pub fn approval_root() -> PathBuf {
    PathBuf::from(get_approval_root())
}

/// Directory holding all signal files of one workflow run
pub fn run_dir(root: &Path, workflow_id: WorkflowId, run_id: RunId) -> PathBuf {
    root.join(workflow_id.to_string()).join(run_id.to_string())
}

/// Directory holding the signal files of one task within a run
pub fn task_dir(root: &Path, workflow_id: WorkflowId, run_id: RunId, task_id: TaskId) -> PathBuf {
    run_dir(root, workflow_id, run_id).join(task_id.to_string())
}

/// `<root>/<workflowId>/<runId>/<taskId>/task.approved`
pub fn trigger_path(root: &Path, workflow_id: WorkflowId, run_id: RunId, task_id: TaskId) -> PathBuf {
    task_dir(root, workflow_id, run_id, task_id).join(TRIGGER_FILE_NAME)
}

pub fn stopped_path(root: &Path, workflow_id: WorkflowId, run_id: RunId, task_id: TaskId) -> PathBuf {
    task_dir(root, workflow_id, run_id, task_id).join(STOPPED_FILE_NAME)
}

pub fn rejected_path(root: &Path, workflow_id: WorkflowId, run_id: RunId) -> PathBuf {
    run_dir(root, workflow_id, run_id).join(REJECTED_FILE_NAME)
}

/// Write a signal file naming the acting user, creating parent directories.
/// The content is written to a sibling temp file first, so the signal never
/// appears without its user.
pub fn write_signal(path: &Path, username: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp_path = path.with_file_name(tmp_name);

    std::fs::write(&tmp_path, username)?;
    std::fs::rename(&tmp_path, path)
}

/// Read the acting user out of a signal file, `None` when the file is absent
pub fn read_signal(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|content| content.trim().to_string())
}
