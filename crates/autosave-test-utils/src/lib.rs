//! Testing utilities for the autosave workspace
//!
//! Shared fixtures, a session harness and status/event waiters.

#![allow(missing_docs)]

use autosave_core::{
    AuthorId, AutosaveConfig, AutosaveError, AutosaveSession, ConnectivityMonitor, Document,
    DocumentId, InMemoryRemoteStore, MemoryBackupStore, OpenedSession, SaveStatus,
    SessionContext, SessionEvent, SessionHub, Version,
};
use chrono::{Duration as ChronoDuration, Utc};
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound for any wait in virtual time
pub const WAIT_LIMIT: Duration = Duration::from_secs(120);

pub fn memo_id() -> DocumentId {
    DocumentId::new("memo")
}

pub fn author() -> AuthorId {
    AuthorId::new("test-author")
}

/// Server document last modified five minutes ago
pub fn server_document(text: &str, version: u64) -> Document {
    Document::from_text(
        memo_id(),
        text,
        Version(version),
        Utc::now() - ChronoDuration::minutes(5),
    )
}

/// Everything a session needs, with handles kept for assertions
#[derive(Debug, Clone)]
pub struct Harness {
    pub config: AutosaveConfig,
    pub remote: Arc<InMemoryRemoteStore>,
    pub backup: Arc<MemoryBackupStore>,
    pub hub: SessionHub,
    pub connectivity: ConnectivityMonitor,
}

impl Harness {
    /// Harness over an empty document at version 0
    pub fn new() -> Self {
        Self::with_document("", 0)
    }

    /// Harness over a seeded document
    pub fn with_document(text: &str, version: u64) -> Self {
        let config = AutosaveConfig::default();
        Self {
            remote: Arc::new(InMemoryRemoteStore::with_document(server_document(
                text, version,
            ))),
            backup: Arc::new(MemoryBackupStore::new()),
            hub: SessionHub::new(config.notifier_capacity),
            connectivity: ConnectivityMonitor::new(true),
            config,
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: AutosaveConfig) -> Self {
        self.config = config;
        self
    }

    pub fn context(&self) -> SessionContext {
        SessionContext::new(self.config.clone(), self.remote.clone(), self.backup.clone())
            .with_hub(self.hub.clone())
            .with_connectivity(self.connectivity.clone())
    }

    pub async fn open(&self) -> Result<OpenedSession, AutosaveError> {
        AutosaveSession::open(self.context(), memo_id(), author()).await
    }

    /// Open `count` sibling sessions on the same document
    pub async fn open_many(&self, count: usize) -> Result<Vec<OpenedSession>, AutosaveError> {
        join_all((0..count).map(|_| self.open())).await.into_iter().collect()
    }

    /// Server copy of the memo
    pub fn server(&self) -> Document {
        self.remote.get(&memo_id()).expect("memo seeded")
    }
}

impl Default for Harness {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait until the session reports `want`
pub async fn wait_for_status(session: &AutosaveSession, want: SaveStatus) {
    let mut rx = session.watch_status();
    let reached = tokio::time::timeout(WAIT_LIMIT, rx.wait_for(|s| *s == want)).await;
    match reached {
        Ok(Ok(_)) => {}
        Ok(Err(_)) => panic!("session stopped before reaching {want}"),
        Err(_) => panic!("timed out waiting for {want}, last status {}", session.status()),
    }
}

/// Wait for the first event matching `pred`
pub async fn wait_for_event<F>(rx: &mut broadcast::Receiver<SessionEvent>, mut pred: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    let found = tokio::time::timeout(WAIT_LIMIT, async {
        loop {
            match rx.recv().await {
                Ok(event) if pred(&event) => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => panic!("event stream closed"),
            }
        }
    })
    .await;
    found.expect("timed out waiting for event")
}

/// Type `text` one character at a time, `gap` apart
pub async fn type_text(session: &AutosaveSession, prefix: &str, text: &str, gap: Duration) {
    let mut current = prefix.to_string();
    for ch in text.chars() {
        current.push(ch);
        session.on_edit(current.clone()).await.expect("session open");
        tokio::time::sleep(gap).await;
    }
}
