//! File-backed backup store
//!
//! One JSON record per document. Writes go to a temp file in the same
//! directory and are renamed into place, so a crash mid-write leaves either
//! the old record or the new one.

use super::BackupStore;
use crate::error::BackupError;
use crate::types::{BackupRecord, DocumentId};
use async_trait::async_trait;
use std::fmt::Write as _;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// Backup store persisting records under a directory
#[derive(Debug, Clone)]
pub struct FileBackupStore {
    dir: PathBuf,
}

impl FileBackupStore {
    /// Open (and create if needed) a backup directory
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, BackupError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self { dir })
    }

    /// Backup directory
    #[inline]
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the record for `document`
    #[must_use]
    pub fn record_path(&self, document: &DocumentId) -> PathBuf {
        self.dir.join(format!("{}.json", file_stem(document.as_str())))
    }
}

#[async_trait]
impl BackupStore for FileBackupStore {
    async fn write(&self, document: &DocumentId, text: &str) -> Result<BackupRecord, BackupError> {
        let record = BackupRecord::now(document.clone(), text);
        let bytes = serde_json::to_vec(&record)?;

        let path = self.record_path(document);
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::trace!(document = %document, bytes = bytes.len(), "backup written");
        Ok(record)
    }

    async fn read(&self, document: &DocumentId) -> Result<Option<BackupRecord>, BackupError> {
        match tokio::fs::read(self.record_path(document)).await {
            Ok(bytes) => {
                let record: BackupRecord = serde_json::from_slice(&bytes)?;
                if record.document_id != *document {
                    return Err(BackupError::Mismatch {
                        expected: document.clone(),
                        found: record.document_id,
                    });
                }
                Ok(Some(record))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn clear(&self, document: &DocumentId) -> Result<(), BackupError> {
        match tokio::fs::remove_file(self.record_path(document)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Map an opaque id onto a file stem, one stem per id
///
/// Lowercase letters, digits, `-` and `_` are kept; every other byte becomes
/// `%XX`. Escaping uppercase keeps ids distinct on case-insensitive
/// filesystems.
fn file_stem(id: &str) -> String {
    let mut out = String::with_capacity(id.len());
    for b in id.bytes() {
        if b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'-' | b'_') {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let doc = DocumentId::new("memo-7");

        let store = FileBackupStore::open(dir.path()).await.unwrap();
        let written = store.write(&doc, "Title\nunsaved body").await.unwrap();
        drop(store);

        let reopened = FileBackupStore::open(dir.path()).await.unwrap();
        let read = reopened.read(&doc).await.unwrap().unwrap();
        assert_eq!(read, written);
    }

    #[tokio::test]
    async fn file_store_clear_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::open(dir.path()).await.unwrap();
        let doc = DocumentId::new("memo");

        store.clear(&doc).await.unwrap();
        store.write(&doc, "x").await.unwrap();
        store.clear(&doc).await.unwrap();
        assert!(store.read(&doc).await.unwrap().is_none());
        assert!(!store.record_path(&doc).exists());
    }

    #[tokio::test]
    async fn file_store_rejects_corrupt_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::open(dir.path()).await.unwrap();
        let doc = DocumentId::new("memo");
        std::fs::write(store.record_path(&doc), b"{not json").unwrap();

        assert!(matches!(
            store.read(&doc).await,
            Err(BackupError::Serialization(_))
        ));
    }

    #[test]
    fn file_stem_keeps_ids_inside_dir() {
        assert_eq!(file_stem("../etc/passwd"), "%2E%2E%2Fetc%2Fpasswd");
        assert_eq!(file_stem("memo_1-a"), "memo_1-a");
        assert_eq!(file_stem("Memo"), "%4Demo");
    }

    #[tokio::test]
    async fn similar_ids_get_separate_records() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::open(dir.path()).await.unwrap();
        let ids = ["memo.1", "memo_1", "memo/1", "memo%2E1", "MEMO_1"].map(DocumentId::new);

        for id in &ids {
            store.write(id, &format!("text of {id}")).await.unwrap();
        }
        for id in &ids {
            let record = store.read(id).await.unwrap().unwrap();
            assert_eq!(record.document_id, *id);
            assert_eq!(record.text, format!("text of {id}"));
        }

        store.clear(&ids[1]).await.unwrap();
        assert!(store.read(&ids[1]).await.unwrap().is_none());
        assert_eq!(store.read(&ids[0]).await.unwrap().unwrap().text, "text of memo.1");
    }

    #[tokio::test]
    async fn record_for_another_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileBackupStore::open(dir.path()).await.unwrap();
        let doc = DocumentId::new("memo");
        let foreign = BackupRecord::now(DocumentId::new("other"), "not yours");
        std::fs::write(store.record_path(&doc), serde_json::to_vec(&foreign).unwrap()).unwrap();

        assert!(matches!(
            store.read(&doc).await,
            Err(BackupError::Mismatch { .. })
        ));
    }
}
