//! Client modules for external services

pub mod smtp;

// Re-export all client types
pub use smtp::{MailTransport, SmtpMailer};
