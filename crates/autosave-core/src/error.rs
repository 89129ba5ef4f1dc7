//! Error types for the autosave coordinator
//!
//! Provides error handling for:
//! - Remote store calls (conflict vs transport classification)
//! - Local backup persistence
//! - Configuration loading
//! - Session handle misuse

use crate::types::{Document, DocumentId};

/// Main autosave error type
#[derive(Debug, thiserror::Error)]
pub enum AutosaveError {
    /// Remote store call failed
    #[error("remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Local backup store failed
    #[error("backup store error: {0}")]
    Backup(#[from] BackupError),

    /// Configuration rejected
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The session task has stopped
    #[error("session closed")]
    SessionClosed,

    /// `resolve_conflict` called while no conflict is outstanding
    #[error("session is not in conflict")]
    NotInConflict,
}

/// Remote store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum RemoteError {
    /// Version precondition failed
    #[error("version conflict")]
    Conflict {
        /// Current server copy, if the store returned one
        current: Option<Box<Document>>,
    },

    /// Document does not exist
    #[error("document not found")]
    NotFound,

    /// Unexpected status code
    #[error("unexpected status {code}: {message}")]
    Status {
        /// Status code
        code: u16,
        /// Response body or reason
        message: String,
    },

    /// Connection-level failure
    #[error("transport failure: {0}")]
    Transport(String),

    /// Attempt exceeded its deadline
    #[error("request timed out after {millis}ms")]
    Timeout {
        /// Deadline that elapsed
        millis: u64,
    },
}

impl RemoteError {
    /// Check if another attempt may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Conflict { .. } | Self::NotFound)
    }
}

impl From<reqwest::Error> for RemoteError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            Self::Status {
                code: status.as_u16(),
                message: e.to_string(),
            }
        } else {
            Self::Transport(e.to_string())
        }
    }
}

/// Local backup store errors
#[derive(Debug, thiserror::Error)]
pub enum BackupError {
    /// Filesystem failure
    #[error("backup i/o failed: {0}")]
    Io(#[from] std::io::Error),

    /// Record could not be encoded or decoded
    #[error("backup record malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Record on disk belongs to a different document
    #[error("backup record for {found} found where {expected} was expected")]
    Mismatch {
        /// Document that was asked for
        expected: DocumentId,
        /// Document named by the record
        found: DocumentId,
    },
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML could not be parsed
    #[error("invalid config file: {0}")]
    Parse(#[from] toml::de::Error),

    /// Config file could not be read
    #[error("cannot read config file: {0}")]
    Io(#[from] std::io::Error),

    /// A value is out of range
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        /// Offending field
        field: &'static str,
        /// Why it was rejected
        reason: String,
    },
}
