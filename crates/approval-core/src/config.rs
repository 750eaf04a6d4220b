//! Configuration management for the approval gate

use serde::{Deserialize, Serialize};
use crate::constants::{DEFAULT_POLL_INTERVAL_MS, DEFAULT_SMTP_PORT};
use crate::error::{ApprovalError, Result};
use crate::workflow::approval_types::GateSettings;
use approval_types::{TaskId, UserId, WorkflowId};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Prefix of environment variables overriding file settings, e.g. `APPROVAL__EMAIL__ENABLED`
const ENV_PREFIX: &str = "APPROVAL";
const ENV_SEPARATOR: &str = "__";

/// Engine-wide configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Root directory for approval signal files, falls back to `paths::approval_root()`
    #[serde(default)]
    pub approval_root: Option<PathBuf>,

    #[serde(default)]
    pub polling: PollingConfig,

    #[serde(default)]
    pub email: EmailConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_poll_interval_ms")]
    pub interval_ms: u64,

    /// Give up waiting after this many seconds; unset means wait indefinitely
    #[serde(default)]
    pub max_wait_secs: Option<u64>,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_poll_interval_ms(),
            max_wait_secs: None,
        }
    }
}

impl PollingConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn max_wait(&self) -> Option<Duration> {
        self.max_wait_secs.map(Duration::from_secs)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmailConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub smtp: SmtpConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    #[serde(default)]
    pub host: String,

    #[serde(default = "default_smtp_port")]
    pub port: u16,

    #[serde(default)]
    pub enable_tls: bool,

    #[serde(default)]
    pub user: String,

    #[serde(default)]
    pub password: String,

    #[serde(default)]
    pub from: String,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_smtp_port(),
            enable_tls: false,
            user: String::new(),
            password: String::new(),
            from: String::new(),
        }
    }
}

// Default functions
fn default_poll_interval_ms() -> u64 {
    DEFAULT_POLL_INTERVAL_MS
}

fn default_smtp_port() -> u16 {
    DEFAULT_SMTP_PORT
}

impl EngineConfig {
    /// Load configuration from a JSON file, with `APPROVAL__*` environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let path_str = path.to_str()
            .ok_or_else(|| ApprovalError::Config(format!("Config path {:?} is not valid UTF-8", path)))?;

        let config: Self = config::Config::builder()
            .add_source(config::File::new(path_str, config::FileFormat::Json))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator(ENV_SEPARATOR))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = config::Config::builder()
            .add_source(config::File::from_str(json, config::FileFormat::Json))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.polling.interval_ms == 0 {
            return Err(ApprovalError::Config("Polling interval must be greater than zero".to_string()));
        }

        if self.email.enabled {
            if self.email.smtp.host.is_empty() {
                return Err(ApprovalError::Config(
                    "SMTP host is required when e-mail notifications are enabled".to_string()
                ));
            }
            if self.email.smtp.from.is_empty() {
                return Err(ApprovalError::Config(
                    "SMTP from address is required when e-mail notifications are enabled".to_string()
                ));
            }
        }

        Ok(())
    }
}

/// A downstream task of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDefinition {
    pub id: TaskId,
    pub name: String,
    /// Shell command executed when the task runs; tasks without one are no-ops
    #[serde(default)]
    pub command: Option<String>,
}

/// The approval task of a workflow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDefinition {
    pub task_id: TaskId,
    pub settings: GateSettings,
}

/// A workflow containing one approval gate and its downstream tasks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowId,
    pub name: String,
    pub started_by: UserId,
    /// Marks the workflow as an approval workflow
    #[serde(default)]
    pub approval: bool,
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    pub gate: GateDefinition,
}

impl WorkflowDefinition {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ApprovalError::Config(format!("Failed to read workflow file: {}", e)))?;

        Self::from_json_str(&content)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let definition: Self = serde_json::from_str(json)
            .map_err(|e| ApprovalError::Config(format!("Failed to parse workflow: {}", e)))?;

        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for task in &self.tasks {
            if !seen.insert(task.id) {
                return Err(ApprovalError::Config(format!("Duplicate task id {}", task.id)));
            }
        }

        if seen.contains(&self.gate.task_id) {
            return Err(ApprovalError::Config(format!(
                "Task id {} is used by both the approval gate and a downstream task",
                self.gate.task_id
            )));
        }

        Ok(())
    }
}
