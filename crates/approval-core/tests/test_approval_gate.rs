//! End-to-end tests of the approval gate against an in-memory record store

use approval_core::error::Result;
use approval_core::{
    ApprovalGate, FileArtifact, FileContext, GateSettings, InMemoryStore, MailTransport, Notifier,
    TaskRunner, WorkflowRun,
};
use approval_types::{
    Record, RecordId, TaskId, TaskStatus, User, UserId, VersionRef, WorkflowId,
};
use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

const GATE_TASK: u32 = 5;
const ON_APPROVED: u32 = 10;
const ON_REJECTED: u32 = 11;
const ON_DELETED: u32 = 12;
const ON_STOPPED: [u32; 2] = [13, 14];
const LATEST_VERSION: &str = "/files/R1/v2.pdf";

/// Task runner that records each call and the files it was given
#[derive(Default)]
struct RecordingRunner {
    calls: Mutex<Vec<(TaskId, Vec<FileArtifact>)>>,
}

impl RecordingRunner {
    fn calls(&self) -> Vec<(TaskId, Vec<FileArtifact>)> {
        self.calls.lock().unwrap().clone()
    }

    fn task_ids(&self) -> Vec<u32> {
        self.calls().iter().map(|(id, _)| id.value()).collect()
    }
}

#[async_trait]
impl TaskRunner for RecordingRunner {
    fn has_task(&self, task_id: TaskId) -> bool {
        (10..=14).contains(&task_id.value())
    }

    async fn run_task(&self, task_id: TaskId, files: &mut FileContext) -> Result<TaskStatus> {
        self.calls.lock().unwrap().push((task_id, files.files().to_vec()));
        Ok(TaskStatus::Success)
    }
}

#[derive(Default)]
struct CountingMailer {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl MailTransport for CountingMailer {
    async fn send(&self, to: &str, _subject: &str, _body: &str) -> Result<()> {
        self.sent.lock().unwrap().push(to.to_string());
        Ok(())
    }
}

struct Fixture {
    _dir: TempDir,
    store: Arc<InMemoryStore>,
    runner: Arc<RecordingRunner>,
    run: Arc<WorkflowRun>,
    notifier: Arc<Notifier>,
}

fn settings() -> GateSettings {
    GateSettings {
        record: "R1".to_string(),
        assigned_to: "U2".to_string(),
        on_approved: ON_APPROVED.to_string(),
        on_rejected: ON_REJECTED.to_string(),
        on_deleted: ON_DELETED.to_string(),
        on_stopped: format!("{}, {}", ON_STOPPED[0], ON_STOPPED[1]),
    }
}

fn fixture_with(approval: bool, mailer: Option<Arc<CountingMailer>>) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = TempDir::new().unwrap();

    let store = Arc::new(InMemoryStore::new());
    store.insert_user(User::new(UserId::new("U1"), "admin", "admin@example.com"));
    store.insert_user(User::new(UserId::new("U2"), "reviewer", "reviewer@example.com"));
    store.insert_record(Record::new(RecordId::new("R1"), "Contract"));
    store.add_version(VersionRef {
        record_id: RecordId::new("R1"),
        file_path: PathBuf::from(LATEST_VERSION),
        created_on: Utc::now(),
    });

    let run = Arc::new(
        WorkflowRun::new(WorkflowId::new(1), UserId::new("U1"))
            .approval(approval)
            .approval_root(dir.path()),
    );

    let mut notifier = Notifier::new(store.clone());
    if let Some(mailer) = mailer {
        notifier = notifier.with_mailer(mailer);
    }

    Fixture {
        _dir: dir,
        store,
        runner: Arc::new(RecordingRunner::default()),
        run,
        notifier: Arc::new(notifier),
    }
}

fn fixture() -> Fixture {
    fixture_with(true, None)
}

impl Fixture {
    fn gate(&self, settings: GateSettings) -> ApprovalGate {
        ApprovalGate::new(
            TaskId::new(GATE_TASK),
            settings,
            self.store.clone(),
            self.notifier.clone(),
            self.runner.clone(),
            self.run.clone(),
        )
        .poll_interval(Duration::from_millis(10))
    }

    fn spawn(
        &self,
        gate: ApprovalGate,
        cancel: &CancellationToken,
    ) -> tokio::task::JoinHandle<std::result::Result<TaskStatus, approval_core::Cancelled>> {
        let cancel = cancel.clone();
        tokio::spawn(async move { gate.run(&cancel).await })
    }

    async fn wait_until_waiting(&self) {
        for _ in 0..400 {
            if self.run.is_waiting_for_approval() {
                return;
            }
            sleep(Duration::from_millis(5)).await;
        }
        panic!("gate never started waiting for approval");
    }

    fn record(&self) -> Option<Record> {
        self.store.record(&RecordId::new("R1"))
    }

    fn messages(&self) -> Vec<String> {
        self.store.notifications().into_iter().map(|n| n.message).collect()
    }

    fn latest_artifact(&self) -> Vec<FileArtifact> {
        vec![FileArtifact::new(LATEST_VERSION, TaskId::new(GATE_TASK))]
    }
}

#[tokio::test]
async fn test_approval_after_a_few_ticks() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let handle = fx.spawn(fx.gate(settings()), &cancel);

    fx.wait_until_waiting().await;
    sleep(Duration::from_millis(25)).await;
    let trigger = fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();

    let status = handle.await.unwrap().unwrap();

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(fx.record().unwrap().approved, Some(true));
    assert_eq!(fx.runner.calls(), vec![(TaskId::new(ON_APPROVED), fx.latest_artifact())]);
    assert!(fx.run.files().is_empty().await);
    assert!(!fx.run.is_waiting_for_approval());
    assert!(!trigger.exists(), "trigger file should be removed on exit");

    let messages = fx.messages();
    assert_eq!(messages.len(), 2);
    assert!(messages[0].starts_with("An approval process on the record Contract has started."));
    assert_eq!(messages[1], "The record Contract was approved by the user alice.");
}

#[tokio::test]
async fn test_setup_assigns_record() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let handle = fx.spawn(fx.gate(settings()), &cancel);

    fx.wait_until_waiting().await;
    let record = fx.record().unwrap();
    assert_eq!(record.assigned_to, Some(UserId::new("U2")));
    assert_eq!(record.modified_by, Some(UserId::new("U1")));
    assert!(record.assigned_on.is_some());
    assert_eq!(record.approved, None);
    assert_eq!(fx.messages().len(), 1, "start notification is sent before the first poll");

    fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();
    handle.await.unwrap().unwrap();
}

#[tokio::test]
async fn test_deleted_record_runs_deleted_tasks_without_files() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let handle = fx.spawn(fx.gate(settings()), &cancel);

    fx.wait_until_waiting().await;
    fx.store.delete_record(&RecordId::new("R1"));

    let status = handle.await.unwrap().unwrap();

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(fx.runner.calls(), vec![(TaskId::new(ON_DELETED), vec![])]);
    assert_eq!(fx.store.record_updates(), 1, "only the assignment is persisted");
    assert!(fx.run.files().is_empty().await);

    let messages = fx.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1],
        "The approval process on the record Contract was stopped because the record was deleted."
    );
}

#[tokio::test]
async fn test_deletion_beats_pending_approval() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let gate = fx.gate(settings()).poll_interval(Duration::from_millis(60));
    let handle = fx.spawn(gate, &cancel);

    fx.wait_until_waiting().await;
    sleep(Duration::from_millis(20)).await;

    // No await between the signals, so the gate sees all of them on one tick
    fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();
    fx.run.reject("bob");
    fx.run.stop(TaskId::new(GATE_TASK), "carol");
    fx.store.delete_record(&RecordId::new("R1"));

    let status = handle.await.unwrap().unwrap();

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(fx.runner.calls(), vec![(TaskId::new(ON_DELETED), vec![])]);
}

#[tokio::test]
async fn test_record_missing_at_setup_is_an_error() {
    let fx = fixture();
    fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();
    fx.store.delete_record(&RecordId::new("R1"));

    let status = fx.gate(settings()).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Error);
    assert!(fx.runner.calls().is_empty());
    assert!(fx.store.notifications().is_empty());
}

#[tokio::test]
async fn test_rejected_record_marked_unapproved() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let handle = fx.spawn(fx.gate(settings()), &cancel);

    fx.wait_until_waiting().await;
    fx.run.reject("bob");

    let status = handle.await.unwrap().unwrap();

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(fx.record().unwrap().approved, Some(false));
    assert_eq!(fx.store.record_updates(), 2);
    assert_eq!(fx.runner.calls(), vec![(TaskId::new(ON_REJECTED), fx.latest_artifact())]);
    assert_eq!(fx.messages()[1], "The record Contract was rejected by the user bob.");
    assert!(fx.run.files().is_empty().await);
}

#[tokio::test]
async fn test_approval_wins_over_rejection_on_same_tick() {
    let fx = fixture();
    fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();
    fx.run.reject("bob");

    let status = fx.gate(settings()).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(fx.record().unwrap().approved, Some(true));
    assert_eq!(fx.runner.task_ids(), vec![ON_APPROVED]);
    assert_eq!(fx.messages().len(), 2);
}

#[tokio::test]
async fn test_rejection_wins_over_stop() {
    let fx = fixture();
    fx.run.reject("bob");
    fx.run.stop(TaskId::new(GATE_TASK), "carol");

    fx.gate(settings()).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(fx.runner.task_ids(), vec![ON_REJECTED]);
}

#[tokio::test]
async fn test_stop_request_leaves_record_untouched() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let handle = fx.spawn(fx.gate(settings()), &cancel);

    fx.wait_until_waiting().await;
    fx.run.stop(TaskId::new(GATE_TASK), "carol");

    let status = handle.await.unwrap().unwrap();

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(fx.record().unwrap().approved, None);
    assert_eq!(fx.store.record_updates(), 1);
    assert_eq!(
        fx.runner.calls(),
        vec![
            (TaskId::new(ON_STOPPED[0]), fx.latest_artifact()),
            (TaskId::new(ON_STOPPED[1]), fx.latest_artifact()),
        ]
    );
    assert_eq!(
        fx.messages()[1],
        "The approval process on the record Contract was stopped by the user carol."
    );
}

#[tokio::test]
async fn test_stop_for_other_task_is_ignored() {
    let fx = fixture();
    fx.run.stop(TaskId::new(99), "carol");
    let gate = fx.gate(settings()).max_wait(Some(Duration::from_millis(50)));

    let status = gate.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Error, "gate should time out instead of stopping");
    assert!(fx.runner.calls().is_empty());
}

#[tokio::test]
async fn test_empty_assignee_fails_without_notifications() {
    let fx = fixture();
    let mut settings = settings();
    settings.assigned_to = String::new();

    let status = fx.gate(settings).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Error);
    assert!(fx.store.notifications().is_empty());
    assert!(fx.runner.calls().is_empty());
    assert_eq!(fx.store.record_updates(), 0);
    assert!(!fx.run.is_waiting_for_approval());
}

#[tokio::test]
async fn test_empty_record_id_fails() {
    let fx = fixture();
    let mut settings = settings();
    settings.record = "  ".to_string();

    let status = fx.gate(settings).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Error);
    assert!(fx.store.notifications().is_empty());
}

#[tokio::test]
async fn test_non_approval_workflow_fails() {
    let fx = fixture_with(false, None);

    let status = fx.gate(settings()).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Error);
    assert!(fx.store.notifications().is_empty());
    assert_eq!(fx.record().unwrap().assigned_to, None);
}

#[tokio::test]
async fn test_unknown_record_and_user_fail() {
    let fx = fixture();

    let mut missing_record = settings();
    missing_record.record = "R404".to_string();
    let status = fx.gate(missing_record).run(&CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Error);

    let mut missing_user = settings();
    missing_user.assigned_to = "U404".to_string();
    let status = fx.gate(missing_user).run(&CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Error);

    assert!(fx.store.notifications().is_empty());
    assert_eq!(fx.store.record_updates(), 0);
}

#[tokio::test]
async fn test_invalid_task_list_detected_before_any_mutation() {
    let fx = fixture();

    let mut unknown_task = settings();
    unknown_task.on_rejected = "11, 42".to_string();
    let status = fx.gate(unknown_task).run(&CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Error);

    let mut not_a_number = settings();
    not_a_number.on_deleted = "twelve".to_string();
    let status = fx.gate(not_a_number).run(&CancellationToken::new()).await.unwrap();
    assert_eq!(status, TaskStatus::Error);

    assert!(fx.store.notifications().is_empty());
    assert_eq!(fx.store.record_updates(), 0);
}

#[tokio::test]
async fn test_empty_task_set_still_notifies() {
    let fx = fixture();
    let mut settings = settings();
    settings.on_approved = String::new();
    fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();

    let status = fx.gate(settings).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Success);
    assert!(fx.runner.calls().is_empty());
    assert_eq!(fx.messages().len(), 2);
    assert_eq!(fx.record().unwrap().approved, Some(true));
}

#[tokio::test]
async fn test_stale_files_cleared_before_dispatch() {
    let fx = fixture();
    fx.run.files().add(FileArtifact::new("/files/stale.txt", TaskId::new(3))).await;
    fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();

    fx.gate(settings()).run(&CancellationToken::new()).await.unwrap();

    assert_eq!(fx.runner.calls(), vec![(TaskId::new(ON_APPROVED), fx.latest_artifact())]);
    assert!(fx.run.files().is_empty().await);
}

#[tokio::test]
async fn test_record_without_versions_dispatches_no_file() {
    let fx = fixture();
    let store = Arc::new(InMemoryStore::new());
    store.insert_user(User::new(UserId::new("U1"), "admin", "admin@example.com"));
    store.insert_user(User::new(UserId::new("U2"), "reviewer", "reviewer@example.com"));
    store.insert_record(Record::new(RecordId::new("R1"), "Contract"));
    fx.run.reject("bob");

    let gate = ApprovalGate::new(
        TaskId::new(GATE_TASK),
        settings(),
        store.clone(),
        Arc::new(Notifier::new(store.clone())),
        fx.runner.clone(),
        fx.run.clone(),
    );
    let status = gate.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Success);
    assert_eq!(fx.runner.calls(), vec![(TaskId::new(ON_REJECTED), vec![])]);
    assert_eq!(store.record(&RecordId::new("R1")).unwrap().approved, Some(false));
}

#[tokio::test]
async fn test_cancellation_runs_stopped_tasks_then_propagates() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let handle = fx.spawn(fx.gate(settings()), &cancel);

    fx.wait_until_waiting().await;
    cancel.cancel();

    let result = handle.await.unwrap();

    assert!(result.is_err(), "cancellation must reach the caller");
    assert_eq!(fx.runner.task_ids(), vec![ON_STOPPED[0], ON_STOPPED[1]]);
    assert_eq!(fx.runner.calls()[0].1, fx.latest_artifact());
    assert!(fx.run.files().is_empty().await);
    assert!(!fx.run.is_waiting_for_approval());
    assert_eq!(fx.record().unwrap().approved, None);

    let messages = fx.messages();
    assert_eq!(messages.len(), 2);
    assert_eq!(
        messages[1],
        "The approval process on the record Contract was stopped by the user unknown."
    );
}

#[tokio::test]
async fn test_cancellation_after_deletion_runs_nothing() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let gate = fx.gate(settings()).poll_interval(Duration::from_secs(60));
    let handle = fx.spawn(gate, &cancel);

    fx.wait_until_waiting().await;
    fx.store.delete_record(&RecordId::new("R1"));
    cancel.cancel();

    let result = handle.await.unwrap();

    assert!(result.is_err());
    assert!(fx.runner.calls().is_empty());
    assert_eq!(fx.messages().len(), 1, "only the start notification");
}

#[tokio::test]
async fn test_timeout_ends_with_error_status() {
    let fx = fixture();
    let gate = fx.gate(settings()).max_wait(Some(Duration::from_millis(40)));

    let status = gate.run(&CancellationToken::new()).await.unwrap();

    assert_eq!(status, TaskStatus::Error);
    assert!(fx.runner.calls().is_empty());
    assert!(!fx.run.is_waiting_for_approval());
    assert_eq!(fx.messages().len(), 1);
}

#[tokio::test]
async fn test_email_sent_for_every_notification_when_enabled() {
    let mailer = Arc::new(CountingMailer::default());
    let fx = fixture_with(true, Some(mailer.clone()));
    fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();

    fx.gate(settings()).run(&CancellationToken::new()).await.unwrap();

    let sent = mailer.sent.lock().unwrap().clone();
    assert_eq!(sent, vec!["reviewer@example.com".to_string(); 2]);
    assert_eq!(fx.store.notifications().len(), 2);
}

/// Task runner that interrupts the gate from inside a downstream task
struct InterruptingRunner {
    cancel: CancellationToken,
    calls: Mutex<Vec<TaskId>>,
}

#[async_trait]
impl TaskRunner for InterruptingRunner {
    fn has_task(&self, task_id: TaskId) -> bool {
        (10..=14).contains(&task_id.value())
    }

    async fn run_task(&self, task_id: TaskId, _files: &mut FileContext) -> Result<TaskStatus> {
        self.calls.lock().unwrap().push(task_id);
        self.cancel.cancel();
        Ok(TaskStatus::Success)
    }
}

#[tokio::test]
async fn test_cancellation_during_dispatch_is_reported() {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let runner = Arc::new(InterruptingRunner {
        cancel: cancel.clone(),
        calls: Mutex::new(Vec::new()),
    });
    fx.run.approve(TaskId::new(GATE_TASK), "alice").unwrap();

    let gate = ApprovalGate::new(
        TaskId::new(GATE_TASK),
        settings(),
        fx.store.clone(),
        fx.notifier.clone(),
        runner.clone(),
        fx.run.clone(),
    );
    let result = gate.run(&cancel).await;

    assert!(result.is_err(), "an interruption during dispatch must reach the caller");
    // Approved tasks ran once and no Stopped tasks were added afterwards
    assert_eq!(*runner.calls.lock().unwrap(), vec![TaskId::new(ON_APPROVED)]);
    assert_eq!(fx.record().unwrap().approved, Some(true));
    assert_eq!(fx.messages().len(), 2);
    assert!(fx.run.files().is_empty().await);
}

#[tokio::test]
async fn test_cancellation_wins_over_setup_failure() {
    let fx = fixture();
    let mut settings = settings();
    settings.assigned_to = String::new();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = fx.gate(settings).run(&cancel).await;

    assert!(result.is_err());
    assert!(fx.runner.calls().is_empty());
    assert!(fx.store.notifications().is_empty());
}

async fn cancel_after_user_removed(user: &str) -> Fixture {
    let fx = fixture();
    let cancel = CancellationToken::new();
    let gate = fx.gate(settings()).poll_interval(Duration::from_secs(60));
    let handle = fx.spawn(gate, &cancel);

    fx.wait_until_waiting().await;
    fx.store.delete_user(&UserId::new(user));
    cancel.cancel();

    let result = handle.await.unwrap();
    assert!(result.is_err(), "cancellation must reach the caller");
    fx
}

#[tokio::test]
async fn test_cancellation_without_assignee_runs_nothing() {
    let fx = cancel_after_user_removed("U2").await;

    assert!(fx.runner.calls().is_empty());
    assert_eq!(fx.messages().len(), 1, "only the start notification");
    assert!(!fx.run.is_waiting_for_approval());
}

#[tokio::test]
async fn test_cancellation_without_starter_runs_nothing() {
    let fx = cancel_after_user_removed("U1").await;

    assert!(fx.runner.calls().is_empty());
    assert_eq!(fx.messages().len(), 1, "only the start notification");
    assert!(!fx.run.is_waiting_for_approval());
}
