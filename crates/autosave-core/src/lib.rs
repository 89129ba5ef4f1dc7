//! Autosave Core - document autosave coordinator
//!
//! Keeps a remotely persisted text document in sync with local edits:
//! - Debounces edits into saves after a quiet period, with an immediate flush
//! - Allows at most one outstanding save per document and coalesces the rest
//!   into one trailing save
//! - Detects version conflicts and never retries them automatically
//! - Keeps a local backup of unsaved text independent of remote outcome
//! - Warns sibling sessions of the same document and propagates versions
//!
//! # Example
//!
//! ```rust,ignore
//! use autosave_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), AutosaveError> {
//! let ctx = SessionContext::new(
//!     AutosaveConfig::new(),
//!     Arc::new(HttpRemoteStore::new("https://memos.example.test")),
//!     Arc::new(MemoryBackupStore::new()),
//! );
//! let opened = AutosaveSession::open(ctx, DocumentId::new("memo-1"), AuthorId::new("me")).await?;
//!
//! opened.session.on_edit("Groceries\nmilk").await?;
//! opened.session.flush_now().await?;
//! let status = opened.session.close().await?;
//! println!("final status: {status}");
//! # Ok(())
//! # }
//! ```

pub mod backup;
pub mod client;
pub mod config;
pub mod connectivity;
pub mod coordinator;
pub mod error;
pub mod ledger;
pub mod notifier;
pub mod remote;
pub mod scheduler;
pub mod session;
pub mod types;

// Re-exports for convenience
pub use backup::{BackupStore, FileBackupStore, MemoryBackupStore};
pub use client::{PersistenceClient, RetryPolicy};
pub use config::AutosaveConfig;
pub use connectivity::ConnectivityMonitor;
pub use coordinator::{Applied, Completion, Dispatch, Resolution, SaveCoordinator};
pub use error::{AutosaveError, BackupError, ConfigError, RemoteError};
pub use ledger::{Confidence, VersionLedger};
pub use notifier::{NoticeKind, SessionChannel, SessionHub, SiblingNotice};
pub use remote::{
    HttpRemoteStore, InMemoryRemoteStore, RemoteStore, UpdateAck, UpdateCall, VersionedUpdate,
    AUTHOR_HEADER,
};
pub use scheduler::{SaveScheduler, BACKUP_MAX_DEFER_FACTOR};
pub use session::{AutosaveSession, OpenedSession, RecoveryOffer, SessionContext, SessionEvent};
pub use types::{
    AuthorId, BackupRecord, Document, DocumentId, EditEvent, SaveOutcome, SaveRequest, SaveResult,
    SaveStatus, SessionId, Version,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for embedding an autosave session
    pub use crate::{
        AuthorId, AutosaveConfig, AutosaveError, AutosaveSession, BackupStore,
        ConnectivityMonitor, Document, DocumentId, FileBackupStore, HttpRemoteStore,
        InMemoryRemoteStore, MemoryBackupStore, OpenedSession, RecoveryOffer, RemoteStore,
        Resolution, SaveStatus, SessionContext, SessionEvent, SessionHub,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
