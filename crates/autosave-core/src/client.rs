//! Persistence client
//!
//! Performs the versioned write with a hard per-attempt timeout and
//! classifies the outcome:
//! - version mismatch -> `Conflict`, never retried
//! - timeout, unexpected status or connection failure -> `TransportFailure`,
//!   retried with exponential backoff until the attempt budget is spent
//! - missing document -> `TransportFailure`, not retried

use crate::config::AutosaveConfig;
use crate::error::RemoteError;
use crate::remote::{RemoteStore, VersionedUpdate};
use crate::types::{AuthorId, Document, DocumentId, SaveOutcome, SaveRequest, SaveResult};
use std::sync::Arc;
use std::time::Duration;

/// Bounded exponential backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay after the first failure
    pub base_delay: Duration,
    /// Delay ceiling
    pub max_delay: Duration,
}

impl RetryPolicy {
    /// Create policy from configuration
    #[inline]
    #[must_use]
    pub fn from_config(config: &AutosaveConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_base_ms),
            max_delay: Duration::from_millis(config.backoff_max_ms),
        }
    }

    /// Delay before attempt `attempt + 1`, where `attempt` starts at 1
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&AutosaveConfig::default())
    }
}

/// Client performing versioned writes against a [`RemoteStore`]
#[derive(Clone)]
pub struct PersistenceClient {
    remote: Arc<dyn RemoteStore>,
    timeout: Duration,
    retry: RetryPolicy,
}

impl std::fmt::Debug for PersistenceClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistenceClient")
            .field("timeout", &self.timeout)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

impl PersistenceClient {
    /// Create client
    #[inline]
    #[must_use]
    pub fn new(remote: Arc<dyn RemoteStore>, timeout: Duration, retry: RetryPolicy) -> Self {
        Self {
            remote,
            timeout,
            retry,
        }
    }

    /// Create client from configuration
    #[inline]
    #[must_use]
    pub fn from_config(remote: Arc<dyn RemoteStore>, config: &AutosaveConfig) -> Self {
        Self::new(remote, config.request_timeout(), RetryPolicy::from_config(config))
    }

    /// Retry policy in use
    #[inline]
    #[must_use]
    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Read the open document, retrying transport failures like [`send`](Self::send)
    pub async fn fetch(&self, document: &DocumentId) -> Result<Document, RemoteError> {
        let mut attempt = 1;
        loop {
            let err = match self.fetch_once(document).await {
                Ok(server) => return Ok(server),
                Err(e) => e,
            };
            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= self.retry.max_attempts {
                tracing::error!(
                    document = %document,
                    attempts = attempt,
                    reason = %err,
                    "fetch attempts exhausted"
                );
                return Err(err);
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                document = %document,
                attempt,
                delay_ms = duration_ms(delay),
                reason = %err,
                "fetch attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn fetch_once(&self, document: &DocumentId) -> Result<Document, RemoteError> {
        match tokio::time::timeout(self.timeout, self.remote.fetch(document)).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::Timeout {
                millis: duration_ms(self.timeout),
            }),
        }
    }

    /// One bounded attempt; failures carry [`RemoteError::is_retryable`]
    pub async fn attempt(
        &self,
        document: &DocumentId,
        author: &AuthorId,
        request: &SaveRequest,
    ) -> SaveResult {
        let update = VersionedUpdate::from(request);
        let call = self.remote.update(document, author, &update);
        let outcome = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(ack)) => SaveOutcome::Success {
                new_version: ack.version,
                updated_at: ack.updated_at,
            },
            Ok(Err(RemoteError::Conflict { current })) => SaveOutcome::Conflict { server: current },
            Ok(Err(e)) => SaveOutcome::TransportFailure {
                retryable: e.is_retryable(),
                reason: e.to_string(),
            },
            Err(_) => SaveOutcome::TransportFailure {
                retryable: true,
                reason: RemoteError::Timeout {
                    millis: duration_ms(self.timeout),
                }
                .to_string(),
            },
        };
        SaveResult::new(request.sequence, outcome)
    }

    /// Send with retries; the final transport failure is not retryable
    pub async fn send(
        &self,
        document: &DocumentId,
        author: &AuthorId,
        request: &SaveRequest,
    ) -> SaveResult {
        let mut attempt = 1;
        loop {
            let result = self.attempt(document, author, request).await;
            let SaveOutcome::TransportFailure { reason, retryable } = &result.outcome else {
                return result;
            };
            if !*retryable {
                tracing::error!(
                    document = %document,
                    sequence = request.sequence,
                    %reason,
                    "save failed permanently"
                );
                return result;
            }

            if attempt >= self.retry.max_attempts {
                tracing::error!(
                    document = %document,
                    sequence = request.sequence,
                    attempts = attempt,
                    %reason,
                    "save attempts exhausted"
                );
                return SaveResult::new(
                    request.sequence,
                    SaveOutcome::TransportFailure {
                        retryable: false,
                        reason: reason.clone(),
                    },
                );
            }

            let delay = self.retry.delay_for(attempt);
            tracing::warn!(
                document = %document,
                sequence = request.sequence,
                attempt,
                delay_ms = duration_ms(delay),
                %reason,
                "save attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
