//! Workflow management module

pub mod approval_types;
pub mod approval_gate;
pub mod file_context;
pub mod run;
pub mod traits;

pub use self::approval_types::*;
pub use approval_gate::ApprovalGate;
pub use file_context::{FileContext, FileScope, SharedFileContext};
pub use run::WorkflowRun;
pub use traits::TaskRunner;
