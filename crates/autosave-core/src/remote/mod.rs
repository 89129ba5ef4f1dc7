//! Remote store seam
//!
//! The coordinator only knows the wire contract: a read of the open
//! document and a versioned, conditional update. Implementations:
//! - [`HttpRemoteStore`]: JSON over HTTP with an `If-Match` precondition
//! - [`InMemoryRemoteStore`]: in-process store with latency and fault injection

mod http;
mod memory;

pub use http::{HttpRemoteStore, AUTHOR_HEADER};
pub use memory::{InMemoryRemoteStore, UpdateCall};

use crate::error::RemoteError;
use crate::types::{AuthorId, Document, DocumentId, SaveRequest, Version};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Versioned update body
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionedUpdate {
    /// New title
    pub title: String,
    /// New body
    pub body: String,
    /// Version the write is conditional on
    pub expected_version: Version,
}

impl From<&SaveRequest> for VersionedUpdate {
    fn from(req: &SaveRequest) -> Self {
        Self {
            title: req.title.clone(),
            body: req.body.clone(),
            expected_version: req.expected_version,
        }
    }
}

/// Successful update response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAck {
    /// Version assigned by the server
    pub version: Version,
    /// Server modification time
    pub updated_at: DateTime<Utc>,
}

/// Remote document store
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Read the current server copy
    async fn fetch(&self, document: &DocumentId) -> Result<Document, RemoteError>;

    /// Conditionally write a new version
    async fn update(
        &self,
        document: &DocumentId,
        author: &AuthorId,
        update: &VersionedUpdate,
    ) -> Result<UpdateAck, RemoteError>;
}
