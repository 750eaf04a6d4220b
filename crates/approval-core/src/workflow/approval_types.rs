//! Strongly typed approval gate types
//! Settings, per-outcome task lists and outcome priority

use serde::{Deserialize, Serialize};
use crate::error::{ApprovalError, Result};
use approval_types::{Outcome, RecordId, TaskId, UserId};
use std::path::PathBuf;

/// Raw settings of an approval task, as written in a workflow definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GateSettings {
    #[serde(default)]
    pub record: String,
    #[serde(default)]
    pub assigned_to: String,
    #[serde(default)]
    pub on_approved: String,
    #[serde(default)]
    pub on_rejected: String,
    #[serde(default)]
    pub on_deleted: String,
    #[serde(default)]
    pub on_stopped: String,
}

impl GateSettings {
    pub fn record_id(&self) -> RecordId {
        RecordId::new(self.record.trim())
    }

    pub fn assignee_id(&self) -> UserId {
        UserId::new(self.assigned_to.trim())
    }

    /// Parse the four task lists
    pub fn outcome_tasks(&self) -> Result<OutcomeTasks> {
        Ok(OutcomeTasks {
            on_approved: parse_task_list(&self.on_approved, Outcome::Approved)?,
            on_rejected: parse_task_list(&self.on_rejected, Outcome::Rejected)?,
            on_deleted: parse_task_list(&self.on_deleted, Outcome::Deleted)?,
            on_stopped: parse_task_list(&self.on_stopped, Outcome::Stopped)?,
        })
    }
}

/// Parse a comma separated list of task ids, skipping empty entries
pub fn parse_task_list(list: &str, outcome: Outcome) -> Result<Vec<TaskId>> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry.parse::<TaskId>().map_err(|e| {
                ApprovalError::Config(format!("{} setting: {}", outcome.setting_name(), e))
            })
        })
        .collect()
}

/// Downstream tasks configured for each outcome
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutcomeTasks {
    pub on_approved: Vec<TaskId>,
    pub on_rejected: Vec<TaskId>,
    pub on_deleted: Vec<TaskId>,
    pub on_stopped: Vec<TaskId>,
}

impl OutcomeTasks {
    pub fn for_outcome(&self, outcome: Outcome) -> &[TaskId] {
        match outcome {
            Outcome::Approved => &self.on_approved,
            Outcome::Rejected => &self.on_rejected,
            Outcome::Deleted => &self.on_deleted,
            Outcome::Stopped => &self.on_stopped,
        }
    }

    pub fn all(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.on_approved.iter()
            .chain(&self.on_rejected)
            .chain(&self.on_deleted)
            .chain(&self.on_stopped)
            .copied()
    }
}

/// Conditions observed during one poll of the record store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickObservation {
    pub record_missing: bool,
    pub approval_triggered: bool,
    pub rejected: bool,
    pub stop_requested: bool,
}

impl TickObservation {
    /// The outcome this tick resolves to.
    ///
    /// First match wins: Deleted, Approved, Rejected, Stopped.
    pub fn outcome(&self) -> Option<Outcome> {
        if self.record_missing {
            Some(Outcome::Deleted)
        } else if self.approval_triggered {
            Some(Outcome::Approved)
        } else if self.rejected {
            Some(Outcome::Rejected)
        } else if self.stop_requested {
            Some(Outcome::Stopped)
        } else {
            None
        }
    }
}

/// A file handed from one task to the others
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileArtifact {
    pub path: PathBuf,
    pub task_id: TaskId,
}

impl FileArtifact {
    pub fn new(path: impl Into<PathBuf>, task_id: TaskId) -> Self {
        Self {
            path: path.into(),
            task_id,
        }
    }
}

pub fn start_message(record_name: &str) -> String {
    format!(
        "An approval process on the record {} has started. You must update that record by adding new file versions. You can also add comments on that record.",
        record_name
    )
}

/// Text of the notification sent when `outcome` terminates the gate
pub fn outcome_message(outcome: Outcome, record_name: &str, acting_user: &str) -> String {
    match outcome {
        Outcome::Deleted => format!(
            "The approval process on the record {} was stopped because the record was deleted.",
            record_name
        ),
        Outcome::Approved => format!("The record {} was approved by the user {}.", record_name, acting_user),
        Outcome::Rejected => format!("The record {} was rejected by the user {}.", record_name, acting_user),
        Outcome::Stopped => format!(
            "The approval process on the record {} was stopped by the user {}.",
            record_name, acting_user
        ),
    }
}
