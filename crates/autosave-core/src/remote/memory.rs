//! In-memory remote store
//!
//! Behaves like the real endpoint (versioned writes, conflicts on a stale
//! version) and adds knobs for latency and injected failures. Every update
//! is journaled with its start and finish instants so overlapping calls can
//! be detected.

use super::{RemoteStore, UpdateAck, VersionedUpdate};
use crate::error::RemoteError;
use crate::types::{AuthorId, Document, DocumentId, Version};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

/// Journal entry for one update call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateCall {
    /// Target document
    pub document: DocumentId,
    /// Caller identity
    pub author: AuthorId,
    /// Body as received
    pub update: VersionedUpdate,
    /// When the call arrived
    pub started: Instant,
    /// When the call returned
    pub finished: Option<Instant>,
    /// Whether the write was applied
    pub applied: bool,
}

#[derive(Debug, Default)]
struct State {
    documents: HashMap<DocumentId, Document>,
    latency: Duration,
    fail_next: u32,
    calls: Vec<UpdateCall>,
    fetches: usize,
    in_flight: usize,
    max_in_flight: usize,
}

/// In-process remote store
#[derive(Debug, Default)]
pub struct InMemoryRemoteStore {
    state: Mutex<State>,
}

impl InMemoryRemoteStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create store holding one document
    #[must_use]
    pub fn with_document(document: Document) -> Self {
        let store = Self::new();
        store.insert(document);
        store
    }

    /// Insert or replace a document
    pub fn insert(&self, document: Document) {
        self.state
            .lock()
            .documents
            .insert(document.id.clone(), document);
    }

    /// Current server copy
    #[must_use]
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.state.lock().documents.get(id).cloned()
    }

    /// Write as another client would, bumping the version
    pub fn external_write(&self, id: &DocumentId, text: &str) -> Option<Version> {
        let mut state = self.state.lock();
        let doc = state.documents.get_mut(id)?;
        let next = doc.version.next();
        *doc = Document::from_text(id.clone(), text, next, Utc::now());
        Some(next)
    }

    /// Delay applied to every call
    pub fn set_latency(&self, latency: Duration) {
        self.state.lock().latency = latency;
    }

    /// Fail the next `n` calls with a 503
    pub fn fail_next(&self, n: u32) {
        self.state.lock().fail_next = n;
    }

    /// Update journal
    #[must_use]
    pub fn calls(&self) -> Vec<UpdateCall> {
        self.state.lock().calls.clone()
    }

    /// Number of update calls received
    #[must_use]
    pub fn update_count(&self) -> usize {
        self.state.lock().calls.len()
    }

    /// Number of fetch calls received
    #[must_use]
    pub fn fetch_count(&self) -> usize {
        self.state.lock().fetches
    }

    /// Highest number of update calls ever outstanding at once
    #[must_use]
    pub fn max_concurrent_updates(&self) -> usize {
        self.state.lock().max_in_flight
    }

    fn take_injected_failure(state: &mut State) -> bool {
        if state.fail_next > 0 {
            state.fail_next -= 1;
            true
        } else {
            false
        }
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemoteStore {
    async fn fetch(&self, document: &DocumentId) -> Result<Document, RemoteError> {
        let (latency, fail) = {
            let mut state = self.state.lock();
            state.fetches += 1;
            (state.latency, Self::take_injected_failure(&mut state))
        };
        tokio::time::sleep(latency).await;
        if fail {
            return Err(unavailable());
        }
        self.get(document).ok_or(RemoteError::NotFound)
    }

    async fn update(
        &self,
        document: &DocumentId,
        author: &AuthorId,
        update: &VersionedUpdate,
    ) -> Result<UpdateAck, RemoteError> {
        let (index, latency, fail) = {
            let mut state = self.state.lock();
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
            state.calls.push(UpdateCall {
                document: document.clone(),
                author: author.clone(),
                update: update.clone(),
                started: Instant::now(),
                finished: None,
                applied: false,
            });
            let fail = Self::take_injected_failure(&mut state);
            (state.calls.len() - 1, state.latency, fail)
        };

        tokio::time::sleep(latency).await;

        let mut state = self.state.lock();
        state.in_flight -= 1;
        state.calls[index].finished = Some(Instant::now());
        if fail {
            return Err(unavailable());
        }

        let Some(current) = state.documents.get(document).cloned() else {
            return Err(RemoteError::NotFound);
        };
        if current.version != update.expected_version {
            return Err(RemoteError::Conflict {
                current: Some(Box::new(current)),
            });
        }

        let ack = UpdateAck {
            version: current.version.next(),
            updated_at: Utc::now(),
        };
        state.documents.insert(
            document.clone(),
            Document {
                id: document.clone(),
                title: update.title.clone(),
                body: update.body.clone(),
                version: ack.version,
                updated_at: ack.updated_at,
            },
        );
        state.calls[index].applied = true;
        Ok(ack)
    }
}

fn unavailable() -> RemoteError {
    RemoteError::Status {
        code: 503,
        message: "injected failure".to_string(),
    }
}
