//! In-process record store

use super::RecordStore;
use async_trait::async_trait;
use crate::error::{ApprovalError, Result};
use approval_types::{Notification, Record, RecordId, User, UserId, VersionRef};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

/// Everything a record store holds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Database {
    #[serde(default)]
    pub records: HashMap<RecordId, Record>,
    #[serde(default)]
    pub users: HashMap<UserId, User>,
    /// Versions per record, oldest first
    #[serde(default)]
    pub versions: HashMap<RecordId, Vec<VersionRef>>,
    #[serde(default)]
    pub notifications: Vec<Notification>,
}

impl Database {
    pub fn latest_version(&self, id: &RecordId) -> Option<VersionRef> {
        self.versions
            .get(id)
            .and_then(|versions| versions.iter().max_by_key(|v| v.created_on))
            .cloned()
    }

    pub fn update_record(&mut self, record: &Record) -> Result<()> {
        match self.records.get_mut(&record.id) {
            Some(stored) => {
                *stored = record.clone();
                Ok(())
            }
            None => Err(ApprovalError::NotFound(format!("Record {} does not exist", record.id))),
        }
    }
}

/// Record store kept in memory
#[derive(Debug, Default)]
pub struct InMemoryStore {
    db: Mutex<Database>,
    record_updates: Mutex<usize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_database(db: Database) -> Self {
        Self {
            db: Mutex::new(db),
            record_updates: Mutex::new(0),
        }
    }

    pub fn insert_user(&self, user: User) {
        self.lock().users.insert(user.id.clone(), user);
    }

    pub fn insert_record(&self, record: Record) {
        self.lock().records.insert(record.id.clone(), record);
    }

    pub fn delete_record(&self, id: &RecordId) -> Option<Record> {
        self.lock().records.remove(id)
    }

    pub fn delete_user(&self, id: &UserId) -> Option<User> {
        self.lock().users.remove(id)
    }

    pub fn add_version(&self, version: VersionRef) {
        self.lock()
            .versions
            .entry(version.record_id.clone())
            .or_default()
            .push(version);
    }

    /// Current state of a record, bypassing the async interface
    pub fn record(&self, id: &RecordId) -> Option<Record> {
        self.lock().records.get(id).cloned()
    }

    pub fn notifications(&self) -> Vec<Notification> {
        self.lock().notifications.clone()
    }

    /// Number of successful `update_record` calls
    pub fn record_updates(&self) -> usize {
        *self.record_updates.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn lock(&self) -> MutexGuard<'_, Database> {
        self.db.lock().unwrap_or_else(|p| p.into_inner())
    }
}

#[async_trait]
impl RecordStore for InMemoryStore {
    async fn get_record(&self, id: &RecordId) -> Result<Option<Record>> {
        Ok(self.lock().records.get(id).cloned())
    }

    async fn get_user(&self, id: &UserId) -> Result<Option<User>> {
        Ok(self.lock().users.get(id).cloned())
    }

    async fn update_record(&self, record: &Record) -> Result<()> {
        self.lock().update_record(record)?;
        *self.record_updates.lock().unwrap_or_else(|p| p.into_inner()) += 1;
        Ok(())
    }

    async fn get_latest_version(&self, id: &RecordId) -> Result<Option<VersionRef>> {
        Ok(self.lock().latest_version(id))
    }

    async fn insert_notification(&self, notification: &Notification) -> Result<()> {
        self.lock().notifications.push(notification.clone());
        Ok(())
    }
}
