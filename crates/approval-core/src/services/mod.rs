//! Service modules for business logic

pub mod notifier;

// Re-export service types
pub use notifier::Notifier;
