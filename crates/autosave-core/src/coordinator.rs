//! Save coordinator (single-flight queue)
//!
//! Owns the version ledger plus two slots per document:
//! - `pending`: newest save request not yet sent (overwritten, never queued)
//! - `in_flight`: the one outstanding remote call, a save or a refetch
//!
//! The coordinator performs no I/O. Every mutating method returns the
//! [`Dispatch`] the owning task must start next, if any. A completed call is
//! always followed by an immediate check of the pending slot, which is what
//! produces trailing saves without a second quiet period.

use crate::error::{AutosaveError, RemoteError};
use crate::ledger::{Confidence, VersionLedger};
use crate::types::{Document, SaveOutcome, SaveRequest, SaveResult, SaveStatus, Version};
use chrono::{DateTime, Utc};

/// Remote call the owning task must start
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// Send a versioned write
    Save(SaveRequest),
    /// Fetch the current server copy before saving again
    Refetch,
}

/// Caller's choice after a conflict
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// Keep the local text and save it on top of the server version
    KeepLocal,
    /// Replace the local text with the server copy
    TakeServer,
}

/// What a completed call did to coordinator state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Applied {
    /// Ledger advanced
    Saved {
        /// Sequence of the confirmed request
        sequence: u64,
        /// New ledger version
        version: Version,
        /// Server modification time
        updated_at: DateTime<Utc>,
    },
    /// Result arrived out of order and was discarded
    Stale {
        /// Sequence of the discarded result
        sequence: u64,
    },
    /// Server version moved on; automatic saving stops
    Conflict {
        /// Current server copy, when known
        server: Option<Box<Document>>,
    },
    /// Retries exhausted while online
    Failed {
        /// Cause of the last attempt's failure
        reason: String,
    },
    /// Call failed while offline; the request waits for reconnect
    Requeued,
    /// A refetch confirmed the server holds what we last saved
    Rebased {
        /// Server version adopted by the ledger
        version: Version,
    },
    /// A conflict resolution refetch completed
    Resolved {
        /// Choice that was applied
        resolution: Resolution,
        /// Server copy the ledger is now anchored on
        server: Box<Document>,
    },
}

/// Outcome of handling a completed call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    /// State change
    pub applied: Applied,
    /// Next call to start, if the pending slot could be promoted
    pub next: Option<Dispatch>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LastOutcome {
    Nothing,
    Saved,
    Failed,
}

#[derive(Debug, Clone)]
enum InFlight {
    Save(SaveRequest),
    Refetch { resolving: Option<Resolution> },
}

/// Single-flight save queue for one document
#[derive(Debug)]
pub struct SaveCoordinator {
    ledger: VersionLedger,
    pending: Option<SaveRequest>,
    in_flight: Option<InFlight>,
    online: bool,
    confirmed_text: String,
    last_outcome: LastOutcome,
}

impl SaveCoordinator {
    /// Create coordinator anchored on a freshly fetched document
    #[must_use]
    pub fn new(document: &Document, online: bool) -> Self {
        Self {
            ledger: VersionLedger::new(document.version),
            pending: None,
            in_flight: None,
            online,
            confirmed_text: document.text(),
            last_outcome: LastOutcome::Nothing,
        }
    }

    /// Version ledger (read-only)
    #[inline]
    #[must_use]
    pub fn ledger(&self) -> &VersionLedger {
        &self.ledger
    }

    /// Request waiting for the slot
    #[inline]
    #[must_use]
    pub fn pending(&self) -> Option<&SaveRequest> {
        self.pending.as_ref()
    }

    /// Whether a remote call is outstanding
    #[inline]
    #[must_use]
    pub fn is_in_flight(&self) -> bool {
        self.in_flight.is_some()
    }

    /// Sequence of the in-flight save, if any
    #[must_use]
    pub fn in_flight_sequence(&self) -> Option<u64> {
        match &self.in_flight {
            Some(InFlight::Save(req)) => Some(req.sequence),
            _ => None,
        }
    }

    /// Last text the server confirmed
    #[inline]
    #[must_use]
    pub fn confirmed_text(&self) -> &str {
        &self.confirmed_text
    }

    /// Whether saving is halted on a conflict
    #[inline]
    #[must_use]
    pub fn in_conflict(&self) -> bool {
        self.ledger.confidence() == Confidence::Invalid
    }

    /// Whether `sequence` is neither confirmed nor queued nor in flight
    #[must_use]
    pub fn is_unsaved(&self, sequence: u64) -> bool {
        let confirmed = self.ledger.applied_sequence().is_some_and(|s| s >= sequence);
        let queued = self.pending.as_ref().is_some_and(|r| r.sequence >= sequence);
        let sending = self.in_flight_sequence().is_some_and(|s| s >= sequence);
        sequence > 0 && !confirmed && !queued && !sending
    }

    /// Whether no call is outstanding and nothing can be dispatched
    #[must_use]
    pub fn is_quiescent(&self) -> bool {
        self.in_flight.is_none()
            && (self.pending.is_none() || !self.online || self.in_conflict())
    }

    /// Store `request` as pending, replacing any older unsent one, and
    /// dispatch it if the slot is free.
    pub fn enqueue(&mut self, request: SaveRequest) -> Option<Dispatch> {
        if let Some(replaced) = self.pending.replace(request) {
            tracing::debug!(
                replaced = replaced.sequence,
                "coalesced pending save into newer edit"
            );
        }
        self.try_dispatch()
    }

    /// Drop the pending request without sending it
    pub fn discard_pending(&mut self) -> Option<SaveRequest> {
        self.pending.take()
    }

    /// Apply a save result and promote the pending slot
    pub fn on_save_result(&mut self, result: SaveResult) -> Completion {
        let request = match self.in_flight.take() {
            Some(InFlight::Save(req)) if req.sequence == result.sequence => req,
            other => {
                self.in_flight = other;
                tracing::warn!(
                    sequence = result.sequence,
                    "discarding save result that is not in flight"
                );
                return Completion {
                    applied: Applied::Stale {
                        sequence: result.sequence,
                    },
                    next: None,
                };
            }
        };

        let applied = match result.outcome {
            SaveOutcome::Success {
                new_version,
                updated_at,
            } => {
                if new_version != request.expected_version.next() {
                    tracing::warn!(
                        expected = %request.expected_version.next(),
                        actual = %new_version,
                        "server assigned unexpected version"
                    );
                }
                if self.ledger.advance(new_version, request.sequence) {
                    self.confirmed_text = request.text();
                    self.last_outcome = LastOutcome::Saved;
                    Applied::Saved {
                        sequence: request.sequence,
                        version: new_version,
                        updated_at,
                    }
                } else {
                    tracing::warn!(
                        sequence = request.sequence,
                        applied = ?self.ledger.applied_sequence(),
                        "discarding stale save result"
                    );
                    Applied::Stale {
                        sequence: request.sequence,
                    }
                }
            }
            SaveOutcome::Conflict { server } => {
                tracing::warn!(
                    sequence = request.sequence,
                    expected = %request.expected_version,
                    "save rejected with version conflict"
                );
                self.ledger.on_conflict();
                Applied::Conflict { server }
            }
            SaveOutcome::TransportFailure { reason, .. } => self.on_failure(Some(request), reason),
        };

        Completion {
            applied,
            next: self.try_dispatch(),
        }
    }

    /// Apply a refetch result and promote the pending slot
    pub fn on_refetch(&mut self, result: Result<Document, RemoteError>) -> Completion {
        let resolving = match self.in_flight.take() {
            Some(InFlight::Refetch { resolving }) => resolving,
            other => {
                self.in_flight = other;
                tracing::warn!("discarding refetch result that is not in flight");
                return Completion {
                    applied: Applied::Failed {
                        reason: "unsolicited refetch".to_string(),
                    },
                    next: None,
                };
            }
        };

        let applied = match (result, resolving) {
            (Ok(server), Some(resolution)) => {
                // The caller re-enqueues the newest local text for KeepLocal.
                self.ledger.rebase(server.version);
                self.confirmed_text = server.text();
                self.pending = None;
                if resolution == Resolution::TakeServer {
                    self.last_outcome = LastOutcome::Saved;
                }
                tracing::info!(version = %server.version, ?resolution, "conflict resolved");
                Applied::Resolved {
                    resolution,
                    server: Box::new(server),
                }
            }
            (Ok(server), None) => {
                if server.version == self.ledger.current() || server.text() == self.confirmed_text
                {
                    self.ledger.rebase(server.version);
                    Applied::Rebased {
                        version: server.version,
                    }
                } else {
                    tracing::warn!(
                        local = %self.ledger.current(),
                        server = %server.version,
                        "server copy diverged from last confirmed text"
                    );
                    self.ledger.on_conflict();
                    Applied::Conflict {
                        server: Some(Box::new(server)),
                    }
                }
            }
            (Err(e), resolving) => {
                // The ledger is still stale, so a pending request would only
                // trigger another refetch. Park it until the next edit or flush.
                if resolving.is_none() && self.online {
                    if let Some(parked) = self.pending.take() {
                        tracing::debug!(sequence = parked.sequence, "parked save after failed refetch");
                    }
                }
                self.on_failure(None, e.to_string())
            }
        };

        Completion {
            applied,
            next: self.try_dispatch(),
        }
    }

    /// Start resolving a conflict; the returned refetch must be dispatched
    pub fn resolve(&mut self, resolution: Resolution) -> Result<Dispatch, AutosaveError> {
        if !self.in_conflict() || self.in_flight.is_some() {
            return Err(AutosaveError::NotInConflict);
        }
        self.in_flight = Some(InFlight::Refetch {
            resolving: Some(resolution),
        });
        Ok(Dispatch::Refetch)
    }

    /// Record a connectivity transition
    pub fn set_online(&mut self, online: bool) -> Option<Dispatch> {
        self.online = online;
        if online {
            self.try_dispatch()
        } else {
            None
        }
    }

    /// A sibling session confirmed `version`
    pub fn on_sibling_saved(&mut self, version: Version) -> bool {
        self.ledger.on_sibling_saved(version)
    }

    /// Status to display, given whether an edit is waiting on the debounce
    #[must_use]
    pub fn status(&self, debounce_armed: bool) -> SaveStatus {
        let queued = self.pending.is_some() || debounce_armed;
        if self.in_conflict() && !self.is_in_flight() {
            SaveStatus::Conflict
        } else if self.in_flight.is_some() {
            SaveStatus::Saving
        } else if !self.online && queued {
            SaveStatus::OfflineQueued
        } else if queued {
            SaveStatus::PendingEdit
        } else {
            match self.last_outcome {
                LastOutcome::Nothing => SaveStatus::Idle,
                LastOutcome::Saved => SaveStatus::Saved,
                LastOutcome::Failed => SaveStatus::Error,
            }
        }
    }

    fn on_failure(&mut self, request: Option<SaveRequest>, reason: String) -> Applied {
        if self.online {
            tracing::error!(%reason, "save failed after retries");
            self.last_outcome = LastOutcome::Failed;
            Applied::Failed { reason }
        } else {
            if self.pending.is_none() {
                self.pending = request;
            }
            tracing::info!(%reason, "call failed while offline; waiting for reconnect");
            Applied::Requeued
        }
    }

    fn try_dispatch(&mut self) -> Option<Dispatch> {
        if self.in_flight.is_some() || self.pending.is_none() || !self.online {
            return None;
        }
        match self.ledger.confidence() {
            Confidence::Invalid => None,
            Confidence::Stale { announced } => {
                tracing::debug!(%announced, "refetching before save");
                self.in_flight = Some(InFlight::Refetch { resolving: None });
                Some(Dispatch::Refetch)
            }
            Confidence::Confident => {
                let mut request = self.pending.take()?;
                request.expected_version = self.ledger.current();
                tracing::debug!(
                    sequence = request.sequence,
                    expected = %request.expected_version,
                    "dispatching save"
                );
                self.in_flight = Some(InFlight::Save(request.clone()));
                Some(Dispatch::Save(request))
            }
        }
    }
}
