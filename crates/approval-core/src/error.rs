//! Error types for the approval gate

use thiserror::Error;

/// Main error type for all approval operations
#[derive(Error, Debug)]
pub enum ApprovalError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Notification delivery failed: {0}")]
    TransientIo(String),

    #[error("Approval wait was interrupted")]
    Cancelled,

    #[error("Approval wait timed out after {0:?}")]
    TimedOut(std::time::Duration),

    #[error("Record store error: {0}")]
    Store(String),

    #[error("Downstream task error: {0}")]
    Task(String),

    #[error("File system error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<approval_types::ParseIdError> for ApprovalError {
    fn from(e: approval_types::ParseIdError) -> Self {
        ApprovalError::Config(e.to_string())
    }
}

impl From<config::ConfigError> for ApprovalError {
    fn from(e: config::ConfigError) -> Self {
        ApprovalError::Config(e.to_string())
    }
}

/// Result type for approval operations
pub type Result<T> = std::result::Result<T, ApprovalError>;

/// Interruption of a running gate, surfaced to the caller after compensation
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Approval gate was cancelled")]
pub struct Cancelled;
