//! Approval Gate Core Library
//!
//! Record approval for workflow runs: the approval gate state machine, the
//! record store it polls, the notifications it sends and the file context it
//! hands to downstream tasks.

pub mod config;
pub mod constants;
pub mod clients;
pub mod services;
pub mod store;
pub mod workflow;
pub mod error;
pub mod paths;

// Re-export main types for easy access
pub use config::{EngineConfig, WorkflowDefinition};
pub use error::{ApprovalError, Cancelled, Result};

// Re-export client and service types
pub use clients::{MailTransport, SmtpMailer};
pub use services::Notifier;
pub use store::{InMemoryStore, JsonFileStore, RecordStore};

// Re-export workflow types
pub use workflow::{
    ApprovalGate,
    FileArtifact,
    FileContext,
    GateSettings,
    OutcomeTasks,
    SharedFileContext,
    TaskRunner,
    TickObservation,
    WorkflowRun,
};
