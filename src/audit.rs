//! Process-lifetime audit log of ingestion calls, with compensating undo.
//!
//! The log is an explicitly owned object shared as `Arc<AuditLog>` between
//! the dispatcher (which appends one entry per completed call) and the undo
//! path. It is never persisted.
//!
//! Entries are keyed by a stable [`EntryId`] assigned at append time, so
//! deleting one entry never changes the key of another and concurrent appends
//! are safe during an undo. Positional selection, as offered to front ends
//! that show the log as a list, is resolved to ids from one snapshot before
//! any deletion happens.
//!
//! # Undo
//!
//! For each selected entry (highest id first):
//!
//! 1. Refuse it with an [`OwnershipError`] when ownership is enforced and the
//!    acting user is not the user who ingested it. The log is left unchanged.
//! 2. If the original call did not succeed there is nothing to compensate:
//!    the entry is dismissed without a remote call.
//! 3. Otherwise issue `remove {collection, uuid}` with the identifier taken
//!    from the stored response, and drop the entry once the remote confirms.
//!
//! Undo is not transactional. Every selected entry gets its own
//! [`UndoResult`]; entries already removed stay removed when a later delete
//! fails.

use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuditConfig;
use crate::error::{OwnershipError, UndoError};
use crate::models::{AuditEntry, EntryId, IngestionCall};
use crate::remote::{compensating_id, RemoteIndex, RemoteResponse, RemovePayload};

#[derive(Default)]
struct AuditState {
    /// Sorted by id: ids only grow and removal keeps relative order.
    entries: Vec<AuditEntry>,
    next_id: u64,
}

pub struct AuditLog {
    state: Mutex<AuditState>,
    enforce_ownership: bool,
}

/// Per-entry outcome of an undo request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UndoOutcome {
    /// Remote delete confirmed; entry removed from the log.
    Removed { identifier: String },
    /// The original call had failed; entry removed without a remote call.
    Dismissed,
    /// Entry belongs to another user; nothing changed.
    Refused(OwnershipError),
    /// Entry kept (or never existed).
    Failed(UndoError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UndoResult {
    /// `None` when a selected position did not resolve to an entry.
    pub entry_id: Option<EntryId>,
    /// Position at selection time, for positional requests.
    pub position: Option<usize>,
    pub outcome: UndoOutcome,
}

impl UndoResult {
    pub fn is_success(&self) -> bool {
        matches!(
            self.outcome,
            UndoOutcome::Removed { .. } | UndoOutcome::Dismissed
        )
    }
}

/// The parts of an entry the undo path needs, copied out under the lock.
struct UndoTarget {
    owner: String,
    collection: String,
    succeeded: bool,
    identifier: Option<String>,
}

impl AuditLog {
    pub fn new(enforce_ownership: bool) -> Self {
        Self {
            state: Mutex::new(AuditState::default()),
            enforce_ownership,
        }
    }

    pub fn from_config(config: &AuditConfig) -> Self {
        Self::new(config.enforce_ownership)
    }

    /// Record a completed call and return its id.
    pub fn append(&self, call: IngestionCall) -> EntryId {
        self.append_with(call, |entry| entry.id)
    }

    /// Record a completed call and build a view of the new entry while the
    /// log is still locked.
    pub fn append_with<R>(&self, call: IngestionCall, view: impl FnOnce(&AuditEntry) -> R) -> R {
        let compensating_id = if call.is_success() {
            compensating_id(&call.response)
        } else {
            None
        };

        let mut state = self.state.lock();
        let id = EntryId(state.next_id);
        state.next_id += 1;
        let entry = AuditEntry {
            id,
            call,
            compensating_id,
        };
        let result = view(&entry);
        state.entries.push(entry);
        result
    }

    /// Snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<AuditEntry> {
        self.state.lock().entries.clone()
    }

    pub fn entries_for(&self, user: &str) -> Vec<AuditEntry> {
        self.state
            .lock()
            .entries
            .iter()
            .filter(|e| e.call.user == user)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: EntryId) -> Option<AuditEntry> {
        let state = self.state.lock();
        find(&state.entries, id).map(|pos| state.entries[pos].clone())
    }

    /// Current position of an entry in the log.
    pub fn position_of(&self, id: EntryId) -> Option<usize> {
        find(&self.state.lock().entries, id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn target(&self, id: EntryId) -> Option<UndoTarget> {
        let state = self.state.lock();
        let entry = &state.entries[find(&state.entries, id)?];
        Some(UndoTarget {
            owner: entry.call.user.clone(),
            collection: entry.call.collection.clone(),
            succeeded: entry.call.is_success(),
            identifier: entry.compensating_id.clone(),
        })
    }

    fn remove(&self, id: EntryId) -> Option<AuditEntry> {
        let mut state = self.state.lock();
        let pos = find(&state.entries, id)?;
        Some(state.entries.remove(pos))
    }

    /// Undo the selected entries, highest id first.
    pub async fn undo(
        &self,
        ids: &[EntryId],
        acting_user: &str,
        remote: &dyn RemoteIndex,
    ) -> Vec<UndoResult> {
        let mut ordered = ids.to_vec();
        ordered.sort_unstable_by(|a, b| b.cmp(a));
        ordered.dedup();

        let mut results = Vec::with_capacity(ordered.len());
        for id in ordered {
            results.push(self.undo_one(id, None, acting_user, remote).await);
        }
        results
    }

    /// Undo entries selected by their current positions in the log.
    ///
    /// Positions are resolved against one snapshot taken before any deletion
    /// and processed in descending order.
    pub async fn undo_positions(
        &self,
        positions: &[usize],
        acting_user: &str,
        remote: &dyn RemoteIndex,
    ) -> Vec<UndoResult> {
        let snapshot: Vec<EntryId> = self.state.lock().entries.iter().map(|e| e.id).collect();

        let mut ordered = positions.to_vec();
        ordered.sort_unstable_by(|a, b| b.cmp(a));
        ordered.dedup();

        let mut results = Vec::with_capacity(ordered.len());
        for pos in ordered {
            let result = match snapshot.get(pos) {
                Some(&id) => self.undo_one(id, Some(pos), acting_user, remote).await,
                None => UndoResult {
                    entry_id: None,
                    position: Some(pos),
                    outcome: UndoOutcome::Failed(UndoError::NoSuchPosition(pos)),
                },
            };
            results.push(result);
        }
        results
    }

    /// Undo every entry recorded by one dispatch invocation.
    pub async fn undo_run(
        &self,
        run_id: Uuid,
        acting_user: &str,
        remote: &dyn RemoteIndex,
    ) -> Vec<UndoResult> {
        let ids: Vec<EntryId> = self
            .state
            .lock()
            .entries
            .iter()
            .filter(|e| e.call.run_id == run_id)
            .map(|e| e.id)
            .collect();
        self.undo(&ids, acting_user, remote).await
    }

    async fn undo_one(
        &self,
        id: EntryId,
        position: Option<usize>,
        acting_user: &str,
        remote: &dyn RemoteIndex,
    ) -> UndoResult {
        let outcome = self.compensate(id, acting_user, remote).await;
        UndoResult {
            entry_id: Some(id),
            position,
            outcome,
        }
    }

    async fn compensate(
        &self,
        id: EntryId,
        acting_user: &str,
        remote: &dyn RemoteIndex,
    ) -> UndoOutcome {
        let acting_user = acting_user.trim();
        let Some(target) = self.target(id) else {
            return UndoOutcome::Failed(UndoError::NotFound(id));
        };

        if self.enforce_ownership && target.owner != acting_user {
            warn!(entry = %id, owner = %target.owner, acting = %acting_user, "undo refused");
            return UndoOutcome::Refused(OwnershipError {
                entry: id,
                owner: target.owner,
                acting: acting_user.to_string(),
            });
        }

        if !target.succeeded {
            self.remove(id);
            info!(entry = %id, "dismissed failed call without remote delete");
            return UndoOutcome::Dismissed;
        }

        let Some(identifier) = target.identifier else {
            warn!(entry = %id, "no compensating identifier in stored response");
            return UndoOutcome::Failed(UndoError::MissingIdentifier);
        };

        let payload = RemovePayload {
            collection: target.collection,
            uuid: identifier.clone(),
        };
        match remote
            .remove(&payload)
            .await
            .and_then(RemoteResponse::into_result)
        {
            Ok(_) => {
                self.remove(id);
                info!(entry = %id, uuid = %identifier, "undo completed");
                UndoOutcome::Removed { identifier }
            }
            Err(e) => {
                warn!(entry = %id, uuid = %identifier, error = %e, "remote delete failed");
                UndoOutcome::Failed(UndoError::Remote(e))
            }
        }
    }
}

fn find(entries: &[AuditEntry], id: EntryId) -> Option<usize> {
    entries.binary_search_by_key(&id, |e| e.id).ok()
}
