//! Watches a run directory and turns rejection/stop files into run signals

use approval_core::paths::{self, REJECTED_FILE_NAME, STOPPED_FILE_NAME};
use approval_core::WorkflowRun;
use approval_types::TaskId;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// A signal file recognised inside a run directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signal {
    Rejected { by: String },
    Stopped { task_id: TaskId, by: String },
}

/// Classify `path` relative to the run directory of `run`
pub fn parse_signal(run: &WorkflowRun, path: &Path) -> Option<Signal> {
    let relative = path.strip_prefix(run.run_dir()).ok()?;
    let parts: Vec<&str> = relative.iter().filter_map(|part| part.to_str()).collect();

    match parts.as_slice() {
        [REJECTED_FILE_NAME] => Some(Signal::Rejected {
            by: paths::read_signal(path)?,
        }),
        [task, STOPPED_FILE_NAME] => Some(Signal::Stopped {
            task_id: task.parse().ok()?,
            by: paths::read_signal(path)?,
        }),
        _ => None,
    }
}

/// Apply the signal file at `path` to `run`, if it is one
pub fn apply_signal_file(run: &WorkflowRun, path: &Path) -> Option<Signal> {
    let signal = parse_signal(run, path)?;

    match &signal {
        Signal::Rejected { by } => {
            log::info!("Workflow {} run {} rejected by {}", run.workflow_id(), run.run_id(), by);
            run.reject(by);
        }
        Signal::Stopped { task_id, by } => {
            log::info!("Stop requested for task {} by {}", task_id, by);
            run.stop(*task_id, by);
        }
    }

    Some(signal)
}

/// Apply signal files written before the watcher started
pub fn scan_existing(run: &WorkflowRun) -> usize {
    let run_dir = run.run_dir();
    let mut applied = 0;

    if apply_signal_file(run, &run_dir.join(REJECTED_FILE_NAME)).is_some() {
        applied += 1;
    }

    if let Ok(entries) = std::fs::read_dir(&run_dir) {
        for entry in entries.flatten() {
            if entry.path().is_dir()
                && apply_signal_file(run, &entry.path().join(STOPPED_FILE_NAME)).is_some()
            {
                applied += 1;
            }
        }
    }

    applied
}

/// Watch the run directory until `cancel` fires
pub fn spawn_watcher(run: Arc<WorkflowRun>, cancel: CancellationToken) -> anyhow::Result<JoinHandle<()>> {
    let run_dir = run.run_dir();
    std::fs::create_dir_all(&run_dir)?;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut watcher = RecommendedWatcher::new(
        move |result: Result<Event, notify::Error>| {
            if let Ok(event) = result {
                // Receiver gone means the watcher task has ended
                let _ = tx.send(event);
            }
        },
        notify::Config::default(),
    )?;
    watcher.watch(&run_dir, RecursiveMode::Recursive)?;

    log::info!("Watching {} for rejection and stop signals", run_dir.display());

    let scanned = scan_existing(&run);
    if scanned > 0 {
        log::info!("Applied {} pending signal file(s)", scanned);
    }

    Ok(tokio::spawn(async move {
        // Dropping the watcher stops event delivery
        let _watcher = watcher;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = rx.recv() => {
                    let Some(event) = event else { break };
                    log::debug!("File system event: {:?}", event);

                    if let EventKind::Create(_) | EventKind::Modify(_) = event.kind {
                        for path in event.paths.iter().filter(|p| p.is_file()) {
                            apply_signal_file(&run, path);
                        }
                    }
                }
            }
        }

        log::debug!("Signal watcher stopped");
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approval_types::{UserId, WorkflowId};
    use std::time::Duration;
    use tempfile::TempDir;

    fn run_in(dir: &TempDir) -> WorkflowRun {
        WorkflowRun::new(WorkflowId::new(3), UserId::new("U1"))
            .approval(true)
            .approval_root(dir.path())
    }

    #[test]
    fn test_rejection_file_sets_flag() {
        let dir = TempDir::new().unwrap();
        let run = run_in(&dir);
        let path = run.run_dir().join(REJECTED_FILE_NAME);
        paths::write_signal(&path, "bob\n").unwrap();

        let signal = apply_signal_file(&run, &path);

        assert_eq!(signal, Some(Signal::Rejected { by: "bob".to_string() }));
        assert_eq!(run.rejected_by().as_deref(), Some("bob"));
    }

    #[test]
    fn test_stop_file_targets_its_task() {
        let dir = TempDir::new().unwrap();
        let run = run_in(&dir);
        let path = run.run_dir().join("5").join(STOPPED_FILE_NAME);
        paths::write_signal(&path, "").unwrap();

        apply_signal_file(&run, &path);

        assert!(run.is_stop_requested(TaskId::new(5)));
        assert!(!run.is_stop_requested(TaskId::new(6)));
        assert_eq!(run.stopped_by(TaskId::new(5)).as_deref(), Some("unknown"));
    }

    #[test]
    fn test_unrelated_files_ignored() {
        let dir = TempDir::new().unwrap();
        let run = run_in(&dir);

        let trigger = run.approve(TaskId::new(5), "alice").unwrap();
        let stray = run.run_dir().join("notes.txt");
        paths::write_signal(&stray, "hello").unwrap();
        let bad_task = run.run_dir().join("gate").join(STOPPED_FILE_NAME);
        paths::write_signal(&bad_task, "carol").unwrap();
        let outside = dir.path().join(REJECTED_FILE_NAME);
        paths::write_signal(&outside, "mallory").unwrap();

        for path in [&trigger, &stray, &bad_task, &outside] {
            assert_eq!(apply_signal_file(&run, path), None);
        }
        assert!(!run.is_rejected());
    }

    #[test]
    fn test_scan_picks_up_existing_files() {
        let dir = TempDir::new().unwrap();
        let run = run_in(&dir);
        paths::write_signal(&run.run_dir().join(REJECTED_FILE_NAME), "bob").unwrap();
        paths::write_signal(&run.run_dir().join("7").join(STOPPED_FILE_NAME), "carol").unwrap();

        assert_eq!(scan_existing(&run), 2);
        assert!(run.is_rejected());
        assert_eq!(run.stopped_by(TaskId::new(7)).as_deref(), Some("carol"));
    }

    #[tokio::test]
    async fn test_watcher_applies_new_files() {
        let dir = TempDir::new().unwrap();
        let run = Arc::new(run_in(&dir));
        let cancel = CancellationToken::new();
        let handle = spawn_watcher(run.clone(), cancel.clone()).unwrap();

        paths::write_signal(&run.run_dir().join(REJECTED_FILE_NAME), "bob").unwrap();

        for _ in 0..200 {
            if run.is_rejected() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(run.is_rejected());

        cancel.cancel();
        handle.await.unwrap();
    }
}
