//! Approval gate: pauses a workflow run until a record is reviewed
//!
//! A gate assigns a record to a reviewer, then polls the record store and the
//! run's signals until one outcome is reached:
//!
//! ```text
//!   setup ──▶ start notification ──▶ assign record ──▶ poll ─┬─▶ Deleted
//!                                                            ├─▶ Approved
//!                                                            ├─▶ Rejected
//!                                                            └─▶ Stopped
//! ```
//!
//! Each outcome notifies the assignee, updates the record (Approved/Rejected
//! only), then runs the outcome's downstream tasks with the record's latest
//! version in the run's file context (except for Deleted). A cancelled wait
//! runs the Stopped tasks before the cancellation is returned to the caller.

use super::approval_types::{
    outcome_message, parse_task_list, start_message, FileArtifact, GateSettings, OutcomeTasks,
    TickObservation,
};
use super::run::WorkflowRun;
use super::traits::TaskRunner;
use crate::constants::{DEFAULT_POLL_INTERVAL_MS, UNKNOWN_USER};
use crate::error::{ApprovalError, Cancelled, Result};
use crate::services::Notifier;
use crate::store::RecordStore;
use approval_types::{Outcome, Record, RecordId, TaskId, TaskStatus, User, UserId};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

/// Record and users resolved during setup
struct Session {
    record_id: RecordId,
    record_name: String,
    starter: User,
    assignee: User,
    tasks: OutcomeTasks,
}

/// One approval task of a workflow run
pub struct ApprovalGate {
    task_id: TaskId,
    settings: GateSettings,
    store: Arc<dyn RecordStore>,
    notifier: Arc<Notifier>,
    runner: Arc<dyn TaskRunner>,
    run: Arc<WorkflowRun>,
    poll_interval: Duration,
    max_wait: Option<Duration>,
}

impl ApprovalGate {
    pub fn new(
        task_id: TaskId,
        settings: GateSettings,
        store: Arc<dyn RecordStore>,
        notifier: Arc<Notifier>,
        runner: Arc<dyn TaskRunner>,
        run: Arc<WorkflowRun>,
    ) -> Self {
        Self {
            task_id,
            settings,
            store,
            notifier,
            runner,
            run,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            max_wait: None,
        }
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Stop waiting after `max_wait`; `None` waits indefinitely
    pub fn max_wait(mut self, max_wait: Option<Duration>) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn task_id(&self) -> TaskId {
        self.task_id
    }

    /// File whose presence approves this gate
    pub fn trigger_path(&self) -> PathBuf {
        self.run.trigger_path(self.task_id)
    }

    /// Run the gate to a terminal status.
    ///
    /// Every failure except cancellation ends in `TaskStatus::Error`. A
    /// cancelled wait runs the Stopped tasks first, then returns `Err(Cancelled)`.
    /// A cancellation seen after setup failed or an outcome completed is
    /// returned as `Err(Cancelled)` without running any further tasks.
    pub async fn run(&self, cancel: &CancellationToken) -> std::result::Result<TaskStatus, Cancelled> {
        info!("Approval process starting on the record {} ...", self.settings.record.trim());

        let result = self.execute(cancel).await;
        self.run.set_waiting_for_approval(false);

        // Outcome tasks already ran, only the interruption is left to report
        if cancel.is_cancelled() && !matches!(result, Err(ApprovalError::Cancelled)) {
            warn!(
                "Approval process on record {} was interrupted after it ended",
                self.settings.record.trim()
            );
            return Err(Cancelled);
        }

        let status = match result {
            Ok(outcome) => {
                info!("Approval process on record {} ended: {}", self.settings.record.trim(), outcome);
                TaskStatus::Success
            }
            Err(ApprovalError::Cancelled) => {
                warn!("Approval process on record {} was interrupted", self.settings.record.trim());
                self.compensate_cancellation().await;
                return Err(Cancelled);
            }
            Err(e) => {
                error!("An error occurred during approval process: {}", e);
                TaskStatus::Error
            }
        };

        info!("Approval process finished.");
        Ok(status)
    }

    async fn execute(&self, cancel: &CancellationToken) -> Result<Outcome> {
        let session = self.setup().await?;

        self.run.set_waiting_for_approval(true);
        let outcome = self.wait_for_outcome(&session, cancel).await?;
        self.run.set_waiting_for_approval(false);

        let trigger = self.trigger_path();
        match outcome {
            Outcome::Approved => info!("Task approved: {}", trigger.display()),
            Outcome::Rejected => info!("This workflow has been rejected."),
            Outcome::Deleted | Outcome::Stopped => {}
        }

        if trigger.exists() {
            if let Err(e) = std::fs::remove_file(&trigger) {
                warn!("Failed to remove trigger {}: {}", trigger.display(), e);
            }
        }

        Ok(outcome)
    }

    /// Validate settings, resolve participants, notify and assign the record
    async fn setup(&self) -> Result<Session> {
        if !self.run.is_approval() {
            return Err(ApprovalError::Config(
                "This workflow is not an approval workflow. Mark this workflow as an approval workflow to use this task.".to_string()
            ));
        }

        let record_id = self.settings.record_id();
        if record_id.is_empty() {
            return Err(ApprovalError::Config("The record id setting is empty.".to_string()));
        }

        let assignee_id = self.settings.assignee_id();
        if assignee_id.is_empty() {
            return Err(ApprovalError::Config("The assignedTo id setting is empty.".to_string()));
        }

        let tasks = self.settings.outcome_tasks()?;
        if let Some(unknown) = tasks.all().find(|task| !self.runner.has_task(*task)) {
            return Err(ApprovalError::Config(format!(
                "Task {} referenced by the approval settings does not exist in the workflow.",
                unknown
            )));
        }

        let mut record = self.store.get_record(&record_id).await?
            .ok_or_else(|| ApprovalError::NotFound(format!("Record {} does not exist in the database.", record_id)))?;

        let assignee = self.require_user(&assignee_id).await?;
        let starter = self.require_user(self.run.started_by()).await?;

        self.notifier.notify(&starter, &assignee, start_message(&record.name)).await?;
        info!(
            "User {} notified for the start of approval process on the record {} - {}.",
            assignee.username, record.id, record.name
        );

        record.modified_by = Some(starter.id.clone());
        record.assigned_to = Some(assignee.id.clone());
        record.assigned_on = Some(Utc::now());
        self.store.update_record(&record).await?;
        info!("Record {} - {} assigned to {}.", record.id, record.name, assignee.username);

        Ok(Session {
            record_id,
            record_name: record.name,
            starter,
            assignee,
            tasks,
        })
    }

    async fn require_user(&self, id: &UserId) -> Result<User> {
        self.store.get_user(id).await?
            .ok_or_else(|| ApprovalError::NotFound(format!("The user {} does not exist in the database.", id)))
    }

    async fn wait_for_outcome(&self, session: &Session, cancel: &CancellationToken) -> Result<Outcome> {
        let started = Instant::now();

        loop {
            if cancel.is_cancelled() {
                return Err(ApprovalError::Cancelled);
            }

            if let Some((outcome, record)) = self.poll_once(session).await? {
                self.complete(session, outcome, record).await?;
                return Ok(outcome);
            }

            if let Some(max_wait) = self.max_wait {
                if started.elapsed() >= max_wait {
                    return Err(ApprovalError::TimedOut(max_wait));
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(ApprovalError::Cancelled),
                _ = sleep(self.poll_interval) => {}
            }
        }
    }

    /// Read the current state and classify it. The record is returned for
    /// every outcome except Deleted.
    async fn poll_once(&self, session: &Session) -> Result<Option<(Outcome, Option<Record>)>> {
        let record = self.store.get_record(&session.record_id).await?;

        let observation = TickObservation {
            record_missing: record.is_none(),
            approval_triggered: self.trigger_path().exists(),
            rejected: self.run.is_rejected(),
            stop_requested: self.run.is_stop_requested(self.task_id),
        };

        Ok(observation.outcome().map(|outcome| (outcome, record)))
    }

    /// Notify, update the record, then dispatch the outcome's tasks
    async fn complete(&self, session: &Session, outcome: Outcome, record: Option<Record>) -> Result<()> {
        let record_name = record.as_ref().map(|r| r.name.as_str()).unwrap_or(session.record_name.as_str());
        let message = outcome_message(outcome, record_name, &self.acting_user(outcome));

        self.notifier.notify(&session.starter, &session.assignee, message).await?;
        info!(
            "User {} notified: record {} - {} {}.",
            session.assignee.username, session.record_id, record_name, outcome
        );

        let approved = match outcome {
            Outcome::Approved => Some(true),
            Outcome::Rejected => Some(false),
            Outcome::Deleted | Outcome::Stopped => None,
        };
        if let (Some(approved), Some(mut record)) = (approved, record) {
            record.approved = Some(approved);
            self.store.update_record(&record).await?;
            info!("Record {} - {} updated.", record.id, record.name);
        }

        let artifact = match outcome {
            Outcome::Deleted => None,
            _ => self.latest_artifact(&session.record_id).await?,
        };

        self.dispatch(session.tasks.for_outcome(outcome), artifact).await;
        Ok(())
    }

    /// Latest version of the record as a file owned by this task
    async fn latest_artifact(&self, record_id: &RecordId) -> Result<Option<FileArtifact>> {
        Ok(self.store
            .get_latest_version(record_id)
            .await?
            .map(|version| FileArtifact::new(version.file_path, self.task_id)))
    }

    /// Run `tasks` in order with the file context cleared and `artifact` attached
    async fn dispatch(&self, tasks: &[TaskId], artifact: Option<FileArtifact>) {
        let mut scope = self.run.files().acquire().await;

        if let Some(artifact) = &artifact {
            scope.attach(artifact.clone());
        }

        for &task_id in tasks {
            match self.runner.run_task(task_id, scope.context()).await {
                Ok(TaskStatus::Success) => debug!("Task {} completed", task_id),
                Ok(TaskStatus::Error) => warn!("Task {} finished with an error status", task_id),
                Err(e) => error!("Task {} failed: {}", task_id, e),
            }
        }

        if let Some(artifact) = &artifact {
            scope.detach(artifact);
        }
    }

    fn acting_user(&self, outcome: Outcome) -> String {
        let user = match outcome {
            Outcome::Approved => self.run.approved_by(self.task_id),
            Outcome::Rejected => self.run.rejected_by(),
            Outcome::Stopped => self.run.stopped_by(self.task_id),
            Outcome::Deleted => None,
        };
        user.unwrap_or_else(|| UNKNOWN_USER.to_string())
    }

    /// Best-effort Stopped handling for an interrupted wait. Never fails.
    async fn compensate_cancellation(&self) {
        let record_id = self.settings.record_id();

        let record = match self.store.get_record(&record_id).await {
            Ok(Some(record)) => record,
            Ok(None) => return,
            Err(e) => {
                debug!("Skipping stop handling, record {} unavailable: {}", record_id, e);
                return;
            }
        };

        let starter = self.store.get_user(self.run.started_by()).await.ok().flatten();
        let assignee = self.store.get_user(&self.settings.assignee_id()).await.ok().flatten();
        let (Some(starter), Some(assignee)) = (starter, assignee) else {
            return;
        };

        let tasks = match parse_task_list(&self.settings.on_stopped, Outcome::Stopped) {
            Ok(tasks) => tasks,
            Err(e) => {
                debug!("Skipping stop handling: {}", e);
                return;
            }
        };

        let message = outcome_message(Outcome::Stopped, &record.name, &self.acting_user(Outcome::Stopped));
        match self.notifier.notify(&starter, &assignee, message).await {
            Ok(_) => info!(
                "User {} notified for the stop of the approval process of the record {} - {}.",
                assignee.username, record.id, record.name
            ),
            Err(e) => warn!("Failed to store stop notification for record {}: {}", record.id, e),
        }

        let artifact = self.latest_artifact(&record_id).await.unwrap_or_else(|e| {
            warn!("Latest version of record {} unavailable: {}", record_id, e);
            None
        });

        self.dispatch(&tasks, artifact).await;
    }
}
