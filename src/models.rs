//! Core data models used throughout the relay.
//!
//! These types represent the chunks, remote calls, and audit records that flow
//! through the dispatch and undo paths.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

use crate::tier::SizeTier;

/// Stable surrogate key of an audit entry, assigned at append time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntryId(pub u64);

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A bounded fragment of a document's extracted text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    /// Position within the source document, contiguous from 0.
    pub index: usize,
    pub text: String,
    pub word_count: usize,
    pub char_count: usize,
    /// SHA-256 of `text`, lowercase hex.
    pub hash: String,
}

/// One network exchange with the remote ingest endpoint.
///
/// Created by the dispatcher once the call completes (successfully or not)
/// and owned by the audit log afterwards.
#[derive(Debug, Clone, Serialize)]
pub struct IngestionCall {
    /// Dispatch invocation this call belongs to.
    pub run_id: Uuid,
    /// Path of the extracted file on local disk.
    pub file: PathBuf,
    /// Name sent as `filename` in the request body.
    pub filename: String,
    pub collection: String,
    pub doc_type: String,
    pub tier: SizeTier,
    /// Zero-based sub-batch number within the file.
    pub batch_index: usize,
    pub batch_count: usize,
    pub chunks: Vec<String>,
    /// SHA-256 over the chunk hashes of this payload.
    pub payload_digest: String,
    /// HTTP status; `None` when no response was received.
    pub status: Option<u16>,
    /// Response body, or the transport error text when `status` is `None`.
    pub response: String,
    pub user: String,
    pub at: DateTime<Utc>,
}

impl IngestionCall {
    pub fn is_success(&self) -> bool {
        matches!(self.status, Some(s) if (200..300).contains(&s))
    }
}

/// An [`IngestionCall`] as recorded by the audit log.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    pub id: EntryId,
    pub call: IngestionCall,
    /// Identifier returned by the remote on ingest, used for the delete call.
    pub compensating_id: Option<String>,
}

/// Outcome summary of one ingest call, as returned to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct CallResult {
    pub entry_id: EntryId,
    pub file: PathBuf,
    pub filename: String,
    pub tier: SizeTier,
    pub batch_index: usize,
    pub batch_count: usize,
    pub chunk_count: usize,
    pub status: Option<u16>,
    pub response: String,
    pub success: bool,
}

impl CallResult {
    pub fn from_entry(entry: &AuditEntry) -> Self {
        let call = &entry.call;
        Self {
            entry_id: entry.id,
            file: call.file.clone(),
            filename: call.filename.clone(),
            tier: call.tier,
            batch_index: call.batch_index,
            batch_count: call.batch_count,
            chunk_count: call.chunks.len(),
            status: call.status,
            response: call.response.clone(),
            success: call.is_success(),
        }
    }
}

/// An audit entry as listed over the API: call metadata without the chunk
/// text that was sent.
#[derive(Debug, Clone, Serialize)]
pub struct AuditRecord {
    pub entry_id: EntryId,
    pub run_id: Uuid,
    pub filename: String,
    pub collection: String,
    pub doc_type: String,
    pub tier: SizeTier,
    pub batch_index: usize,
    pub batch_count: usize,
    pub chunk_count: usize,
    pub payload_digest: String,
    pub status: Option<u16>,
    pub response: String,
    pub success: bool,
    pub user: String,
    pub at: DateTime<Utc>,
    pub compensating_id: Option<String>,
}

impl AuditRecord {
    pub fn from_entry(entry: &AuditEntry) -> Self {
        let call = &entry.call;
        Self {
            entry_id: entry.id,
            run_id: call.run_id,
            filename: call.filename.clone(),
            collection: call.collection.clone(),
            doc_type: call.doc_type.clone(),
            tier: call.tier,
            batch_index: call.batch_index,
            batch_count: call.batch_count,
            chunk_count: call.chunks.len(),
            payload_digest: call.payload_digest.clone(),
            status: call.status,
            response: call.response.clone(),
            success: call.is_success(),
            user: call.user.clone(),
            at: call.at,
            compensating_id: entry.compensating_id.clone(),
        }
    }
}

/// A selected file that produced no chunks and therefore no call.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedFile {
    pub file: PathBuf,
    pub reason: String,
}

/// Input of one dispatch invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct DispatchRequest {
    pub files: Vec<PathBuf>,
    pub collection: String,
    pub doc_type: String,
    pub user: String,
}

/// Aggregate result of one dispatch invocation.
#[derive(Debug, Clone, Serialize)]
pub struct DispatchReport {
    pub run_id: Uuid,
    /// Ordered by input file order, then sub-batch index.
    pub calls: Vec<CallResult>,
    pub skipped: Vec<SkippedFile>,
}

impl DispatchReport {
    pub fn succeeded(&self) -> usize {
        self.calls.iter().filter(|c| c.success).count()
    }

    pub fn failed(&self) -> usize {
        self.calls.len() - self.succeeded()
    }
}
