//! Version ledger
//!
//! Holds the last server-confirmed version of the open document. Only the
//! coordinator owns a ledger; nothing else mutates it.

use crate::types::Version;

/// How far the ledger's version can be trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confidence {
    /// Version matches the last confirmed write or fetch
    Confident,
    /// A sibling session announced a newer version
    Stale {
        /// Announced version
        announced: Version,
    },
    /// The server rejected our version; a refetch is mandatory
    Invalid,
}

/// Last server-confirmed version for optimistic concurrency
#[derive(Debug, Clone)]
pub struct VersionLedger {
    version: Version,
    applied_sequence: Option<u64>,
    confidence: Confidence,
}

impl VersionLedger {
    /// Start from the version of a freshly fetched document
    #[inline]
    #[must_use]
    pub fn new(version: Version) -> Self {
        Self {
            version,
            applied_sequence: None,
            confidence: Confidence::Confident,
        }
    }

    /// Current version token
    #[inline]
    #[must_use]
    pub fn current(&self) -> Version {
        self.version
    }

    /// Highest sequence applied so far
    #[inline]
    #[must_use]
    pub fn applied_sequence(&self) -> Option<u64> {
        self.applied_sequence
    }

    /// Current confidence
    #[inline]
    #[must_use]
    pub fn confidence(&self) -> Confidence {
        self.confidence
    }

    /// Whether a save may be sent with [`Self::current`] as-is
    #[inline]
    #[must_use]
    pub fn is_confident(&self) -> bool {
        self.confidence == Confidence::Confident
    }

    /// Whether a save would first need a refetch
    #[inline]
    #[must_use]
    pub fn needs_refetch(&self) -> bool {
        !self.is_confident()
    }

    /// Whether a sequence number would be discarded as stale
    #[inline]
    #[must_use]
    pub fn is_stale_sequence(&self, sequence: u64) -> bool {
        self.applied_sequence.is_some_and(|applied| sequence < applied)
    }

    /// Apply a confirmed write.
    ///
    /// Applies only when `sequence` is at least the highest one already
    /// applied and never moves the version backwards. Returns whether the
    /// ledger changed.
    pub fn advance(&mut self, version: Version, sequence: u64) -> bool {
        if self.is_stale_sequence(sequence) || version < self.version {
            return false;
        }
        self.version = version;
        self.applied_sequence = Some(sequence);
        if let Confidence::Stale { announced } = self.confidence {
            if announced <= version {
                self.confidence = Confidence::Confident;
            }
        }
        true
    }

    /// The server rejected our version
    pub fn on_conflict(&mut self) {
        self.confidence = Confidence::Invalid;
    }

    /// A sibling session reported a newer version
    ///
    /// Returns whether the ledger became stale.
    pub fn on_sibling_saved(&mut self, announced: Version) -> bool {
        if announced <= self.version {
            return false;
        }
        match self.confidence {
            Confidence::Invalid => false,
            Confidence::Stale { announced: prev } if prev >= announced => false,
            _ => {
                self.confidence = Confidence::Stale { announced };
                true
            }
        }
    }

    /// Re-anchor on a freshly fetched server version
    pub fn rebase(&mut self, version: Version) {
        self.version = version;
        self.confidence = Confidence::Confident;
    }
}
