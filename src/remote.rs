//! Remote index service client.
//!
//! The dispatcher and the undo path talk to the index service only through the
//! [`RemoteIndex`] trait, so tests can substitute an in-memory double.
//! [`HttpRemoteIndex`] is the production implementation:
//!
//! | Call | Endpoint | Body |
//! |------|----------|------|
//! | ingest | `POST <base>/add-master-object/file/` | `{chunks, filename, collection, type}` |
//! | delete | `POST <base>/remove-master-objects/uuid/` | `{collection, uuid}` |
//!
//! A non-2xx answer is not an `Err`: the status and body are returned as a
//! [`RemoteResponse`] so the caller can record them. Only transport failures
//! (connect, timeout, unreadable body) are errors.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::debug;

use crate::config::RemoteConfig;
use crate::error::RemoteError;

/// Request body of the ingest endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IngestPayload {
    pub chunks: Vec<String>,
    pub filename: String,
    pub collection: String,
    #[serde(rename = "type")]
    pub doc_type: String,
}

/// Request body of the delete endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct RemovePayload {
    pub collection: String,
    pub uuid: String,
}

/// Status and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteResponse {
    pub status: u16,
    pub body: String,
}

impl RemoteResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Convert a non-2xx response into a [`RemoteError::Status`].
    pub fn into_result(self) -> Result<RemoteResponse, RemoteError> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(RemoteError::Status {
                status: self.status,
                body: self.body,
            })
        }
    }
}

/// The remote indexing service.
#[async_trait]
pub trait RemoteIndex: Send + Sync {
    /// Push one document's chunks (or one sub-batch of them).
    async fn ingest(&self, payload: &IngestPayload) -> Result<RemoteResponse, RemoteError>;

    /// Delete a previously ingested object by its compensating identifier.
    async fn remove(&self, payload: &RemovePayload) -> Result<RemoteResponse, RemoteError>;
}

/// Extract the compensating identifier from an ingest response body.
///
/// The service answers `{"msg": "<uuid>", ...}` on success. Bodies that are
/// not JSON objects or whose `msg` is missing, empty or not a string carry no
/// identifier.
pub fn compensating_id(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    json.get("msg")
        .and_then(|m| m.as_str())
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(str::to_string)
}

/// [`RemoteIndex`] over HTTP using a shared `reqwest` client.
pub struct HttpRemoteIndex {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl HttpRemoteIndex {
    pub fn new(config: &RemoteConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        let api_key = config
            .api_key_env
            .as_deref()
            .and_then(|var| std::env::var(var).ok())
            .filter(|key| !key.is_empty());

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post<T: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &T,
    ) -> Result<RemoteResponse, RemoteError> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client.post(&url).json(body);
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        debug!(%url, status, "remote call completed");
        Ok(RemoteResponse { status, body })
    }
}

#[async_trait]
impl RemoteIndex for HttpRemoteIndex {
    async fn ingest(&self, payload: &IngestPayload) -> Result<RemoteResponse, RemoteError> {
        self.post("/add-master-object/file/", payload).await
    }

    async fn remove(&self, payload: &RemovePayload) -> Result<RemoteResponse, RemoteError> {
        self.post("/remove-master-objects/uuid/", payload).await
    }
}
