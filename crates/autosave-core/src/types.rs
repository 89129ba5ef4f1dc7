//! Core types for the autosave coordinator
//!
//! Defines the values that flow between components:
//! - Document, author and session identifiers
//! - The persisted document and its version token
//! - Edit events, save requests and save results
//! - Local backup records and the UI-facing save status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use ulid::Ulid;

/// Opaque document identifier supplied by the caller
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(pub String);

impl DocumentId {
    /// Create new document ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque author identity, passed through to the remote store untouched
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(pub String);

impl AuthorId {
    /// Create new author ID
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identity
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One open editing session (a tab or window)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Server-assigned document version, strictly increasing per successful write
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Version(pub u64);

impl Version {
    /// The version the server assigns after a write against `self`
    #[inline]
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The unit of persistence, as returned by the remote store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    /// Document identifier
    pub id: DocumentId,
    /// First line of the text
    pub title: String,
    /// Everything after the first line
    pub body: String,
    /// Version token for optimistic concurrency
    pub version: Version,
    /// Remote modification time
    pub updated_at: DateTime<Utc>,
}

impl Document {
    /// Create a document from full text
    #[must_use]
    pub fn from_text(
        id: DocumentId,
        text: &str,
        version: Version,
        updated_at: DateTime<Utc>,
    ) -> Self {
        let (title, body) = split_title_body(text);
        Self {
            id,
            title,
            body,
            version,
            updated_at,
        }
    }

    /// Reassemble the full editable text
    #[must_use]
    pub fn text(&self) -> String {
        join_title_body(&self.title, &self.body)
    }
}

/// Split full text into `(title, body)` at the first newline.
///
/// The body is empty when the text has no newline. A trailing `\r` on the
/// title line is dropped.
#[must_use]
pub fn split_title_body(text: &str) -> (String, String) {
    match text.split_once('\n') {
        Some((title, body)) => (
            title.strip_suffix('\r').unwrap_or(title).to_string(),
            body.to_string(),
        ),
        None => (text.to_string(), String::new()),
    }
}

/// Inverse of [`split_title_body`] for text without `\r\n` line endings
#[must_use]
pub fn join_title_body(title: &str, body: &str) -> String {
    if body.is_empty() {
        title.to_string()
    } else {
        format!("{title}\n{body}")
    }
}

/// Text as it reads back after a split and join
///
/// `"Title\n"` becomes `"Title"` and a `\r` ending the title line is dropped.
#[must_use]
pub fn normalize_text(text: &str) -> String {
    let (title, body) = split_title_body(text);
    join_title_body(&title, &body)
}

/// An observed edit: the full current text plus its local sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditEvent {
    /// Full text after the edit
    pub text: String,
    /// Strictly increasing per document per session
    pub sequence: u64,
    /// When the edit was observed
    pub observed_at: Instant,
}

/// Materialized intent to persist one snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveRequest {
    /// Derived title
    pub title: String,
    /// Derived body
    pub body: String,
    /// Version token the write is conditional on
    pub expected_version: Version,
    /// Sequence of the edit this snapshot was built from
    pub sequence: u64,
}

impl SaveRequest {
    /// Build a request from an edit event
    #[must_use]
    pub fn from_edit(edit: &EditEvent, expected_version: Version) -> Self {
        let (title, body) = split_title_body(&edit.text);
        Self {
            title,
            body,
            expected_version,
            sequence: edit.sequence,
        }
    }

    /// Reassemble the full text carried by this request
    #[must_use]
    pub fn text(&self) -> String {
        join_title_body(&self.title, &self.body)
    }
}

/// Outcome of a persistence call, tagged with the request it answers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveResult {
    /// Sequence of the answered request
    pub sequence: u64,
    /// What happened
    pub outcome: SaveOutcome,
}

impl SaveResult {
    /// Create new result
    #[inline]
    #[must_use]
    pub fn new(sequence: u64, outcome: SaveOutcome) -> Self {
        Self { sequence, outcome }
    }
}

/// Tagged save outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Write accepted
    Success {
        /// Version assigned by the server
        new_version: Version,
        /// Server modification time
        updated_at: DateTime<Utc>,
    },
    /// `expected_version` was stale; never retried automatically
    Conflict {
        /// Current server copy, when the store supplied one
        server: Option<Box<Document>>,
    },
    /// Timeout, connection drop or unexpected status
    TransportFailure {
        /// Whether another attempt may still succeed
        retryable: bool,
        /// Human-readable cause
        reason: String,
    },
}

impl SaveOutcome {
    /// Check if this is a success
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Check if this is a conflict
    #[inline]
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// Last-known-unsaved text kept in the local backup store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupRecord {
    /// Document the text belongs to
    pub document_id: DocumentId,
    /// Full editable text
    pub text: String,
    /// When the backup was written
    pub timestamp: DateTime<Utc>,
}

impl BackupRecord {
    /// Create a record stamped with the current time
    #[must_use]
    pub fn now(document_id: DocumentId, text: impl Into<String>) -> Self {
        Self {
            document_id,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Whether this backup should be offered over `document` at load time
    #[must_use]
    pub fn supersedes(&self, document: &Document) -> bool {
        self.timestamp > document.updated_at && normalize_text(&self.text) != document.text()
    }
}

/// Save state shown to the user
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SaveStatus {
    /// Nothing edited since open
    #[default]
    Idle,
    /// Edits waiting for the quiet period
    PendingEdit,
    /// A request is in flight
    Saving,
    /// Latest save confirmed
    Saved,
    /// Retries exhausted; local text is intact
    Error,
    /// Offline with unsaved work queued
    OfflineQueued,
    /// Server copy moved on; caller must choose
    Conflict,
}

impl SaveStatus {
    /// Wire/display name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::PendingEdit => "pendingEdit",
            Self::Saving => "saving",
            Self::Saved => "saved",
            Self::Error => "error",
            Self::OfflineQueued => "offlineQueued",
            Self::Conflict => "conflict",
        }
    }
}

impl std::fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
