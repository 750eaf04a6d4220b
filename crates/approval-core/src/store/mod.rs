//! Record store backends

pub mod memory;
pub mod json_file;

pub use memory::{Database, InMemoryStore};
pub use json_file::JsonFileStore;

use async_trait::async_trait;
use crate::error::Result;
use approval_types::{Notification, Record, RecordId, User, UserId, VersionRef};

/// Persistence backend for records, users, versions and notifications.
///
/// Lookups return `Ok(None)` when the entity does not exist; `Err` is reserved
/// for backend failures.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_record(&self, id: &RecordId) -> Result<Option<Record>>;

    async fn get_user(&self, id: &UserId) -> Result<Option<User>>;

    /// Persist a modified record, replacing the stored one with the same id
    async fn update_record(&self, record: &Record) -> Result<()>;

    /// Most recent content revision of a record
    async fn get_latest_version(&self, id: &RecordId) -> Result<Option<VersionRef>>;

    async fn insert_notification(&self, notification: &Notification) -> Result<()>;
}
