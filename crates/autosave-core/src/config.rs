//! Autosave configuration
//!
//! All timings are stored in milliseconds so the struct round-trips through
//! TOML unchanged; accessors hand out [`Duration`]s.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Autosave configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutosaveConfig {
    /// Quiet period before an edit is saved remotely
    pub quiet_period_ms: u64,
    /// Debounce for local backup writes
    pub backup_debounce_ms: u64,
    /// Hard timeout per persistence attempt
    pub request_timeout_ms: u64,
    /// Transport attempts per request before giving up
    pub max_attempts: u32,
    /// First retry delay
    pub backoff_base_ms: u64,
    /// Retry delay ceiling
    pub backoff_max_ms: u64,
    /// Session command channel capacity
    pub command_buffer: usize,
    /// Per-document sibling notice capacity
    pub notifier_capacity: usize,
}

impl AutosaveConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With quiet period
    #[inline]
    #[must_use]
    pub fn with_quiet_period(mut self, period: Duration) -> Self {
        self.quiet_period_ms = duration_ms(period);
        self
    }

    /// With backup debounce
    #[inline]
    #[must_use]
    pub fn with_backup_debounce(mut self, debounce: Duration) -> Self {
        self.backup_debounce_ms = duration_ms(debounce);
        self
    }

    /// With per-attempt timeout
    #[inline]
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_ms = duration_ms(timeout);
        self
    }

    /// With retry budget
    #[inline]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// With backoff bounds
    #[inline]
    #[must_use]
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.backoff_base_ms = duration_ms(base);
        self.backoff_max_ms = duration_ms(max);
        self
    }

    /// Quiet period
    #[inline]
    #[must_use]
    pub fn quiet_period(&self) -> Duration {
        Duration::from_millis(self.quiet_period_ms)
    }

    /// Backup debounce
    #[inline]
    #[must_use]
    pub fn backup_debounce(&self) -> Duration {
        Duration::from_millis(self.backup_debounce_ms)
    }

    /// Per-attempt timeout
    #[inline]
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Parse from TOML text and validate
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file and validate
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    /// Reject values the coordinator cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quiet_period_ms == 0 {
            return Err(invalid("quiet_period_ms", "must be positive"));
        }
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms", "must be positive"));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts", "must be at least 1"));
        }
        if self.backup_debounce_ms >= self.quiet_period_ms {
            return Err(invalid(
                "backup_debounce_ms",
                format!(
                    "must be shorter than quiet_period_ms ({})",
                    self.quiet_period_ms
                ),
            ));
        }
        if self.backoff_max_ms < self.backoff_base_ms {
            return Err(invalid("backoff_max_ms", "must not be below backoff_base_ms"));
        }
        if self.command_buffer == 0 || self.notifier_capacity == 0 {
            return Err(invalid("command_buffer", "channel capacities must be positive"));
        }
        Ok(())
    }
}

impl Default for AutosaveConfig {
    fn default() -> Self {
        Self {
            quiet_period_ms: 2_000,
            backup_debounce_ms: 300,
            request_timeout_ms: 15_000,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8_000,
            command_buffer: 64,
            notifier_capacity: 32,
        }
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
