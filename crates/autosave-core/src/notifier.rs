//! Cross-session notifier
//!
//! Best-effort publish/subscribe between sessions (tabs) of the same
//! document within one process. Advisory only: a lagging or absent receiver
//! loses notices and nothing waits on delivery.

use crate::types::{DocumentId, SessionId, Version};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};

/// Notice payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    /// A session opened the document for editing
    EditingStarted,
    /// A session confirmed a save at `version`
    Saved {
        /// Confirmed version
        version: Version,
    },
}

/// Notice as received by a sibling
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SiblingNotice {
    /// Sending session
    pub from: SessionId,
    /// What happened
    pub kind: NoticeKind,
}

#[derive(Debug)]
struct HubInner {
    channels: DashMap<DocumentId, broadcast::Sender<SiblingNotice>>,
    capacity: usize,
}

/// Process-local hub of per-document channels
#[derive(Debug, Clone)]
pub struct SessionHub {
    inner: Arc<HubInner>,
}

impl SessionHub {
    /// Create hub with per-document buffer capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                channels: DashMap::new(),
                capacity: capacity.max(1),
            }),
        }
    }

    /// Join the channel for `document` as `session`
    #[must_use]
    pub fn join(&self, document: &DocumentId, session: SessionId) -> SessionChannel {
        let rx = self
            .inner
            .channels
            .entry(document.clone())
            .or_insert_with(|| broadcast::channel(self.inner.capacity).0)
            .subscribe();
        let tx = self
            .inner
            .channels
            .get(document)
            .map(|entry| entry.value().clone());

        SessionChannel {
            hub: self.clone(),
            document: document.clone(),
            session,
            tx,
            rx,
        }
    }

    /// Number of documents with at least one joined session
    #[must_use]
    pub fn document_count(&self) -> usize {
        self.inner.channels.len()
    }

    fn release(&self, document: &DocumentId) {
        // The departing receiver is still alive while this runs.
        self.inner
            .channels
            .remove_if(document, |_, tx| tx.receiver_count() <= 1);
    }
}

impl Default for SessionHub {
    fn default() -> Self {
        Self::new(32)
    }
}

/// One session's membership in a document channel
#[derive(Debug)]
pub struct SessionChannel {
    hub: SessionHub,
    document: DocumentId,
    session: SessionId,
    tx: Option<broadcast::Sender<SiblingNotice>>,
    rx: broadcast::Receiver<SiblingNotice>,
}

impl SessionChannel {
    /// This session's ID
    #[inline]
    #[must_use]
    pub fn session(&self) -> SessionId {
        self.session
    }

    /// Broadcast to siblings; delivery is not confirmed
    pub fn announce(&self, kind: NoticeKind) {
        if let Some(tx) = &self.tx {
            // Err only means no receivers besides possibly ourselves.
            let _ = tx.send(SiblingNotice {
                from: self.session,
                kind,
            });
        }
    }

    /// Next notice from another session; `None` once the channel closes
    pub async fn recv(&mut self) -> Option<SiblingNotice> {
        loop {
            match self.rx.recv().await {
                Ok(notice) if notice.from == self.session => continue,
                Ok(notice) => return Some(notice),
                Err(RecvError::Lagged(skipped)) => {
                    tracing::debug!(document = %self.document, skipped, "sibling notices dropped");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.hub.release(&self.document);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn siblings_receive_but_sender_does_not() {
        let hub = SessionHub::new(8);
        let doc = DocumentId::new("memo");
        let mut a = hub.join(&doc, SessionId::new());
        let mut b = hub.join(&doc, SessionId::new());

        a.announce(NoticeKind::Saved {
            version: Version(3),
        });

        let got = b.recv().await.unwrap();
        assert_eq!(got.from, a.session());
        assert_eq!(
            got.kind,
            NoticeKind::Saved {
                version: Version(3)
            }
        );

        let own = tokio::time::timeout(Duration::from_millis(20), a.recv()).await;
        assert!(own.is_err());
    }

    #[tokio::test]
    async fn documents_are_isolated() {
        let hub = SessionHub::new(8);
        let a = hub.join(&DocumentId::new("one"), SessionId::new());
        let mut b = hub.join(&DocumentId::new("two"), SessionId::new());

        a.announce(NoticeKind::EditingStarted);
        let got = tokio::time::timeout(Duration::from_millis(20), b.recv()).await;
        assert!(got.is_err());
    }

    #[test]
    fn last_member_leaving_removes_channel() {
        let hub = SessionHub::default();
        let doc = DocumentId::new("memo");
        let a = hub.join(&doc, SessionId::new());
        let b = hub.join(&doc, SessionId::new());
        assert_eq!(hub.document_count(), 1);

        drop(a);
        assert_eq!(hub.document_count(), 1);
        drop(b);
        assert_eq!(hub.document_count(), 0);
    }

    #[tokio::test]
    async fn lagging_receiver_skips_ahead() {
        let hub = SessionHub::new(2);
        let doc = DocumentId::new("memo");
        let a = hub.join(&doc, SessionId::new());
        let mut b = hub.join(&doc, SessionId::new());

        for v in 1..=5 {
            a.announce(NoticeKind::Saved {
                version: Version(v),
            });
        }
        let got = b.recv().await.unwrap();
        assert_eq!(
            got.kind,
            NoticeKind::Saved {
                version: Version(4)
            }
        );
    }
}
