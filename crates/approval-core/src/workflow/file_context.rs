//! Shared file context of a workflow run
//!
//! Tasks of a run pass files to one another through this context. The
//! approval gate acquires it exclusively for the duration of a dispatch;
//! the scope clears the context on acquisition and again when dropped, so the
//! context is empty outside of a dispatch on every exit path.

use super::approval_types::FileArtifact;
use approval_types::TaskId;
use std::path::Path;
use tokio::sync::{Mutex, MutexGuard};

/// Files currently handed between the tasks of a run
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FileContext {
    files: Vec<FileArtifact>,
}

impl FileContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, artifact: FileArtifact) {
        self.files.push(artifact);
    }

    /// Remove every file with the given path
    pub fn remove_path(&mut self, path: &Path) {
        self.files.retain(|f| f.path != path);
    }

    /// Clear the files of all tasks
    pub fn clear(&mut self) {
        self.files.clear();
    }

    pub fn files(&self) -> &[FileArtifact] {
        &self.files
    }

    /// Files owned by a single task
    pub fn files_of(&self, task_id: TaskId) -> impl Iterator<Item = &FileArtifact> {
        self.files.iter().filter(move |f| f.task_id == task_id)
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }
}

/// File context owned by a workflow run
#[derive(Debug, Default)]
pub struct SharedFileContext {
    inner: Mutex<FileContext>,
}

impl SharedFileContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the context for a dispatch. Waits for any other holder.
    pub async fn acquire(&self) -> FileScope<'_> {
        let mut guard = self.inner.lock().await;
        guard.clear();
        FileScope { guard }
    }

    /// Add a file outside of a dispatch, as a regular task of the run would
    pub async fn add(&self, artifact: FileArtifact) {
        self.inner.lock().await.add(artifact);
    }

    /// Copy of the current files
    pub async fn snapshot(&self) -> FileContext {
        self.inner.lock().await.clone()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.is_empty()
    }
}

/// Exclusive access to the file context, cleared on drop
pub struct FileScope<'a> {
    guard: MutexGuard<'a, FileContext>,
}

impl FileScope<'_> {
    pub fn attach(&mut self, artifact: FileArtifact) {
        self.guard.add(artifact);
    }

    pub fn detach(&mut self, artifact: &FileArtifact) {
        self.guard.remove_path(&artifact.path);
    }

    pub fn context(&mut self) -> &mut FileContext {
        &mut *self.guard
    }
}

impl Drop for FileScope<'_> {
    fn drop(&mut self) {
        if !self.guard.is_empty() {
            log::debug!("Releasing file context with {} leftover file(s)", self.guard.len());
        }
        self.guard.clear();
    }
}
