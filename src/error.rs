//! Error types for the relay pipeline.
//!
//! Only [`RelayError::Configuration`] and [`RelayError::Archive`] fail a whole
//! dispatch invocation. Per-file and per-call failures travel as data inside
//! the dispatch report and undo results.

use thiserror::Error;

use crate::models::EntryId;

/// Result alias for relay operations.
pub type Result<T> = std::result::Result<T, RelayError>;

/// Invocation-level and component errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// Missing collection/doc-type label or no files selected.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Malformed, oversized, or unsafe input archive.
    #[error("archive error: {0}")]
    Archive(String),
}

impl RelayError {
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    pub fn archive(message: impl Into<String>) -> Self {
        Self::Archive(message.into())
    }
}

/// Failure of a single call to the remote index service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// The request never produced an HTTP response (connect, timeout, body read).
    #[error("transport error: {0}")]
    Transport(String),

    /// The service answered with a non-2xx status.
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
}

impl From<reqwest::Error> for RemoteError {
    fn from(err: reqwest::Error) -> Self {
        RemoteError::Transport(err.to_string())
    }
}

/// Undo attempted on an entry recorded for a different user.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("entry {entry} was ingested by '{owner}' and cannot be undone by '{acting}'")]
pub struct OwnershipError {
    pub entry: EntryId,
    pub owner: String,
    pub acting: String,
}

/// Why a selected audit entry could not be undone. Ownership refusals are
/// reported separately as [`OwnershipError`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum UndoError {
    #[error("no audit entry with id {0}")]
    NotFound(EntryId),

    #[error("no audit entry at position {0}")]
    NoSuchPosition(usize),

    #[error("stored response carries no compensating identifier")]
    MissingIdentifier,

    #[error("delete call failed: {0}")]
    Remote(#[from] RemoteError),
}
