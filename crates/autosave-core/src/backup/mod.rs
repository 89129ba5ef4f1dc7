//! Local backup store
//!
//! Process-local durability net for unsaved text. Written on a short
//! debounce regardless of remote outcome; cleared only after a confirmed
//! save of the newest text.

mod file;

pub use file::FileBackupStore;

use crate::error::BackupError;
use crate::types::{BackupRecord, DocumentId};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Durable key/value cache of backup records keyed by document
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Replace the backup for `document` with `text`
    async fn write(&self, document: &DocumentId, text: &str) -> Result<BackupRecord, BackupError>;

    /// Read the backup for `document`, if any
    async fn read(&self, document: &DocumentId) -> Result<Option<BackupRecord>, BackupError>;

    /// Remove the backup for `document`; a missing record is not an error
    async fn clear(&self, document: &DocumentId) -> Result<(), BackupError>;
}

/// In-memory backup store
///
/// Outlives individual sessions, so a session reopened in the same process
/// (a reloaded tab) still finds its backup.
#[derive(Debug, Default)]
pub struct MemoryBackupStore {
    records: RwLock<HashMap<DocumentId, BackupRecord>>,
}

impl MemoryBackupStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a record with an explicit timestamp
    pub fn insert(&self, record: BackupRecord) {
        self.records
            .write()
            .insert(record.document_id.clone(), record);
    }

    /// Number of stored records
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl BackupStore for MemoryBackupStore {
    async fn write(&self, document: &DocumentId, text: &str) -> Result<BackupRecord, BackupError> {
        let record = BackupRecord::now(document.clone(), text);
        self.records.write().insert(document.clone(), record.clone());
        Ok(record)
    }

    async fn read(&self, document: &DocumentId) -> Result<Option<BackupRecord>, BackupError> {
        Ok(self.records.read().get(document).cloned())
    }

    async fn clear(&self, document: &DocumentId) -> Result<(), BackupError> {
        self.records.write().remove(document);
        Ok(())
    }
}
