//! Record store backed by a single JSON file
//!
//! Every call reads the file again, so edits made by other processes (a
//! record deleted by an administrator, a new version uploaded) are seen on
//! the next poll.

use super::{Database, RecordStore};
use async_trait::async_trait;
use crate::error::{ApprovalError, Result};
use approval_types::{Notification, Record, RecordId, User, UserId, VersionRef};
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

pub struct JsonFileStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    /// Open a store file, creating an empty database if it does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if !path.exists() {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let json = serde_json::to_string_pretty(&Database::default())
                .map_err(|e| ApprovalError::Serialization(format!("Failed to serialize database: {}", e)))?;
            std::fs::write(&path, json)?;
            log::info!("Created empty record store at {}", path.display());
        }

        Ok(Self {
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the whole database from disk
    pub async fn load(&self) -> Result<Database> {
        let json = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| ApprovalError::Store(format!("Failed to read {}: {}", self.path.display(), e)))?;

        serde_json::from_str(&json)
            .map_err(|e| ApprovalError::Deserialization(format!("Failed to parse {}: {}", self.path.display(), e)))
    }

    /// Write the database to a temp file and rename it into place
    async fn save(&self, db: &Database) -> Result<()> {
        let json = serde_json::to_string_pretty(db)
            .map_err(|e| ApprovalError::Serialization(format!("Failed to serialize database: {}", e)))?;

        let tmp_path = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp_path, json).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }

    /// Apply a change to the stored database
    async fn modify<F>(&self, change: F) -> Result<()>
    where
        F: FnOnce(&mut Database) -> Result<()> + Send,
    {
        let _guard = self.write_lock.lock().await;
        let mut db = self.load().await?;
        change(&mut db)?;
        self.save(&db).await
    }
}

#[async_trait]
impl RecordStore for JsonFileStore {
    async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        Ok(self.load().await?.records.remove(id))
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.load().await?.users.remove(id))
    }

    async fn update_record(&self, record: &Record) -> Result<()> {
        self.modify(|db| db.update_record(record)).await
    }

    async fn get_latest_version(&self, id: &RecordId) -> Result<Option<VersionRef>> {
        Ok(self.load().await?.latest_version(id))
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.modify(|db| {
            db.notifications.push(notification.clone());
            Ok(())
        })
        .await
    }
}
