//! State of one workflow execution as seen by the approval gate

use super::file_context::SharedFileContext;
use crate::constants::UNKNOWN_USER;
use crate::paths;
use approval_types::{RunId, TaskId, UserId, WorkflowId};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

#[derive(Debug, Default)]
struct RunSignals {
    rejected_by: Option<String>,
    stopped: HashMap<TaskId, String>,
}

/// One running instance of a workflow
#[derive(Debug)]
pub struct WorkflowRun {
    workflow_id: WorkflowId,
    run_id: RunId,
    started_by: UserId,
    approval: bool,
    approval_root: PathBuf,
    signals: Mutex<RunSignals>,
    waiting_for_approval: AtomicBool,
    files: SharedFileContext,
}

impl WorkflowRun {
    /// Create a run with a fresh run id, rooted at the configured approval root
    pub fn new(workflow_id: WorkflowId, started_by: UserId) -> Self {
        Self::with_run_id(workflow_id, RunId::new(), started_by)
    }

    pub fn with_run_id(workflow_id: WorkflowId, run_id: RunId, started_by: UserId) -> Self {
        Self {
            workflow_id,
            run_id,
            started_by,
            approval: false,
            approval_root: paths::approval_root(),
            signals: Mutex::new(RunSignals::default()),
            waiting_for_approval: AtomicBool::new(false),
            files: SharedFileContext::new(),
        }
    }

    /// Mark the run as belonging to an approval workflow
    pub fn approval(mut self, approval: bool) -> Self {
        self.approval = approval;
        self
    }

    pub fn approval_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.approval_root = root.into();
        self
    }

    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    pub fn run_id(&self) -> RunId {
        self.run_id
    }

    pub fn started_by(&self) -> &UserId {
        &self.started_by
    }

    pub fn is_approval(&self) -> bool {
        self.approval
    }

    pub fn root(&self) -> &Path {
        &self.approval_root
    }

    pub fn files(&self) -> &SharedFileContext {
        &self.files
    }

    /// Directory holding the signal files of this run
    pub fn run_dir(&self) -> PathBuf {
        paths::run_dir(&self.approval_root, self.workflow_id, self.run_id)
    }

    pub fn trigger_path(&self, task_id: TaskId) -> PathBuf {
        paths::trigger_path(&self.approval_root, self.workflow_id, self.run_id, task_id)
    }

    /// Approve the gate running as `task_id` by writing its trigger file
    pub fn approve(&self, task_id: TaskId, username: &str) -> std::io::Result<PathBuf> {
        let path = self.trigger_path(task_id);
        paths::write_signal(&path, username)?;
        Ok(path)
    }

    /// User who approved `task_id`, if its trigger file exists
    pub fn approved_by(&self, task_id: TaskId) -> Option<String> {
        paths::read_signal(&self.trigger_path(task_id)).map(or_unknown)
    }

    pub fn reject(&self, username: &str) {
        let mut signals = self.lock_signals();
        signals.rejected_by = Some(username.to_string());
    }

    pub fn rejected_by(&self) -> Option<String> {
        self.lock_signals().rejected_by.clone().map(or_unknown)
    }

    pub fn is_rejected(&self) -> bool {
        self.lock_signals().rejected_by.is_some()
    }

    /// Ask the task `task_id` to stop
    pub fn stop(&self, task_id: TaskId, username: &str) {
        let mut signals = self.lock_signals();
        signals.stopped.insert(task_id, username.to_string());
    }

    pub fn stopped_by(&self, task_id: TaskId) -> Option<String> {
        self.lock_signals().stopped.get(&task_id).cloned().map(or_unknown)
    }

    pub fn is_stop_requested(&self, task_id: TaskId) -> bool {
        self.lock_signals().stopped.contains_key(&task_id)
    }

    pub fn set_waiting_for_approval(&self, waiting: bool) {
        self.waiting_for_approval.store(waiting, Ordering::SeqCst);
    }

    pub fn is_waiting_for_approval(&self) -> bool {
        self.waiting_for_approval.load(Ordering::SeqCst)
    }

    fn lock_signals(&self) -> std::sync::MutexGuard<'_, RunSignals> {
        // Signals stay usable even if a writer panicked mid-update
        self.signals.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

fn or_unknown(username: String) -> String {
    if username.trim().is_empty() {
        UNKNOWN_USER.to_string()
    } else {
        username
    }
}
