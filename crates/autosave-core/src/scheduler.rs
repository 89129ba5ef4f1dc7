//! Save scheduler
//!
//! Debounces the edit stream into save-worthy snapshots. Two independent
//! deadlines are tracked:
//! - the save deadline, restarted by every edit, fires after the quiet period
//! - the backup deadline, much shorter, feeds the local backup store
//!
//! The scheduler holds no timers itself. The owning task sleeps until
//! [`SaveScheduler::next_deadline`] and then calls the `take_due_*` methods,
//! which keeps every transition testable with explicit instants.

use crate::config::AutosaveConfig;
use crate::types::EditEvent;
use std::time::Duration;
use tokio::time::Instant;

/// Backup writes are deferred at most this many debounce windows during
/// continuous typing.
pub const BACKUP_MAX_DEFER_FACTOR: u32 = 4;

/// Edit debouncer with an independent backup path
#[derive(Debug)]
pub struct SaveScheduler {
    quiet_period: Duration,
    backup_debounce: Duration,
    last_sequence: u64,
    latest: Option<EditEvent>,
    save_deadline: Option<Instant>,
    backup_deadline: Option<Instant>,
    backup_cap: Option<Instant>,
}

impl SaveScheduler {
    /// Create scheduler with explicit windows
    #[inline]
    #[must_use]
    pub fn new(quiet_period: Duration, backup_debounce: Duration) -> Self {
        Self {
            quiet_period,
            backup_debounce,
            last_sequence: 0,
            latest: None,
            save_deadline: None,
            backup_deadline: None,
            backup_cap: None,
        }
    }

    /// Create scheduler from configuration
    #[inline]
    #[must_use]
    pub fn from_config(config: &AutosaveConfig) -> Self {
        Self::new(config.quiet_period(), config.backup_debounce())
    }

    /// Record an edit and restart both debounce windows
    pub fn on_edit(&mut self, text: String, now: Instant) -> EditEvent {
        self.last_sequence += 1;
        let event = EditEvent {
            text,
            sequence: self.last_sequence,
            observed_at: now,
        };

        self.save_deadline = Some(now + self.quiet_period);

        let cap = *self
            .backup_cap
            .get_or_insert(now + self.backup_debounce * BACKUP_MAX_DEFER_FACTOR);
        self.backup_deadline = Some((now + self.backup_debounce).min(cap));

        self.latest = Some(event.clone());
        tracing::trace!(sequence = event.sequence, "edit recorded");
        event
    }

    /// Emit the latest edit if the quiet period has elapsed
    pub fn take_due_save(&mut self, now: Instant) -> Option<EditEvent> {
        match self.save_deadline {
            Some(deadline) if deadline <= now => {
                self.save_deadline = None;
                self.latest.clone()
            }
            _ => None,
        }
    }

    /// Emit the latest text for backup if its debounce has elapsed
    pub fn take_due_backup(&mut self, now: Instant) -> Option<EditEvent> {
        match self.backup_deadline {
            Some(deadline) if deadline <= now => self.take_backup_now(),
            _ => None,
        }
    }

    /// Cancel the quiet-period wait and emit the pending edit immediately.
    ///
    /// Returns `None` when no edit is waiting on the debounce.
    pub fn flush_now(&mut self) -> Option<EditEvent> {
        self.save_deadline.take()?;
        self.latest.clone()
    }

    /// Cancel the backup wait and emit the pending backup text immediately
    pub fn take_backup_now(&mut self) -> Option<EditEvent> {
        self.backup_deadline.take()?;
        self.backup_cap = None;
        self.latest.clone()
    }

    /// Drop a pending backup write already covered by a confirmed save
    pub fn cancel_backup_through(&mut self, sequence: u64) {
        if self.backup_deadline.is_some() && self.last_sequence <= sequence {
            self.backup_deadline = None;
            self.backup_cap = None;
        }
    }

    /// Replace the text wholesale without creating a save (conflict resolution)
    pub fn reset_text(&mut self, text: String, now: Instant) -> EditEvent {
        self.last_sequence += 1;
        self.save_deadline = None;
        self.backup_deadline = None;
        self.backup_cap = None;
        let event = EditEvent {
            text,
            sequence: self.last_sequence,
            observed_at: now,
        };
        self.latest = Some(event.clone());
        event
    }

    /// Earliest armed deadline
    #[must_use]
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.save_deadline, self.backup_deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Whether an edit is waiting on the quiet period
    #[inline]
    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.save_deadline.is_some()
    }

    /// Whether a backup write is waiting on its debounce
    #[inline]
    #[must_use]
    pub fn backup_pending(&self) -> bool {
        self.backup_deadline.is_some()
    }

    /// Most recent edit
    #[inline]
    #[must_use]
    pub fn latest(&self) -> Option<&EditEvent> {
        self.latest.as_ref()
    }

    /// Sequence of the most recent edit (0 before any edit)
    #[inline]
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence
    }
}
