//! HTTP remote store
//!
//! `GET {base}/memos/{id}` reads the document; `PUT {base}/memos/{id}`
//! writes it with the expected version both in the JSON body and in an
//! `If-Match` precondition.

use super::{RemoteStore, UpdateAck, VersionedUpdate};
use crate::error::RemoteError;
use crate::types::{AuthorId, Document, DocumentId, Version};
use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use std::fmt::Write as _;

/// Header carrying the opaque author identity
pub const AUTHOR_HEADER: &str = "x-author-id";

/// Remote store speaking JSON over HTTP
#[derive(Debug, Clone)]
pub struct HttpRemoteStore {
    client: Client,
    base_url: String,
}

impl HttpRemoteStore {
    /// Create store for `base_url` (no trailing slash needed)
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    /// Create store reusing an existing client
    #[must_use]
    pub fn with_client(client: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    /// Resource URL for a document
    #[must_use]
    pub fn document_url(&self, document: &DocumentId) -> String {
        format!("{}/memos/{}", self.base_url, encode_segment(document.as_str()))
    }
}

#[async_trait]
impl RemoteStore for HttpRemoteStore {
    async fn fetch(&self, document: &DocumentId) -> Result<Document, RemoteError> {
        let resp = self.client.get(self.document_url(document)).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
            _ => Err(status_error(resp).await),
        }
    }

    async fn update(
        &self,
        document: &DocumentId,
        author: &AuthorId,
        update: &VersionedUpdate,
    ) -> Result<UpdateAck, RemoteError> {
        let resp = self
            .client
            .put(self.document_url(document))
            .header(reqwest::header::IF_MATCH, if_match(update.expected_version))
            .header(AUTHOR_HEADER, author.as_str())
            .json(update)
            .send()
            .await?;

        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                // The body is optional; a missing or foreign body still means conflict.
                let current = resp.json::<Document>().await.ok().map(Box::new);
                Err(RemoteError::Conflict { current })
            }
            StatusCode::NOT_FOUND => Err(RemoteError::NotFound),
            _ => Err(status_error(resp).await),
        }
    }
}

fn if_match(version: Version) -> String {
    format!("\"{version}\"")
}

async fn status_error(resp: Response) -> RemoteError {
    let code = resp.status().as_u16();
    let message = resp.text().await.unwrap_or_default();
    RemoteError::Status { code, message }
}

/// Percent-encode everything outside the URL path-segment unreserved set
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for b in raw.bytes() {
        if b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'~') {
            out.push(char::from(b));
        } else {
            let _ = write!(out, "%{b:02X}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_url_encodes_id() {
        let store = HttpRemoteStore::new("https://api.example.test/");
        assert_eq!(
            store.document_url(&DocumentId::new("a b/c")),
            "https://api.example.test/memos/a%20b%2Fc"
        );
    }

    #[test]
    fn encode_segment_escapes_multibyte_and_percent() {
        assert_eq!(encode_segment("50%é"), "50%25%C3%A9");
        assert_eq!(crate::AUTHOR_HEADER, "x-author-id");
    }

    #[test]
    fn if_match_is_quoted() {
        assert_eq!(if_match(Version(12)), "\"12\"");
    }

    #[test]
    fn update_body_uses_camel_case() {
        let body = VersionedUpdate {
            title: "T".to_string(),
            body: "B".to_string(),
            expected_version: Version(4),
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"title": "T", "body": "B", "expectedVersion": 4})
        );
    }
}
