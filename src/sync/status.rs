//! Synchronizer diagnostics
//!
//! State shared between the running synchronizer and whoever reports on
//! it: cursor position, per-key apply states, dead letters.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::warn;

use crate::models::{ApplyState, ArtifactKey, ArtifactKind, EventOp};
use crate::observe::{CountingObserver, Outcome};

use super::cursor::SyncCursor;

/// Apply abandoned after exhausting its retries
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct DeadLetter {
    pub key: ArtifactKey,
    pub kind: ArtifactKind,
    pub op: EventOp,
    pub version: u64,
    pub attempts: u32,
    pub error: String,
    pub at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct ApplyRecord {
    version: u64,
    state: ApplyState,
}

#[derive(Debug, Default)]
pub(crate) struct SyncShared {
    pub(crate) cursor: SyncCursor,
    pub(crate) counters: CountingObserver,
    applies: Mutex<HashMap<ArtifactKey, ApplyRecord>>,
    dead_letters: Mutex<Vec<DeadLetter>>,
    pending_retries: AtomicUsize,
}

impl SyncShared {
    /// Start tracking a new apply of `key` at `version`
    pub(crate) fn begin(&self, key: &ArtifactKey, version: u64) {
        self.applies.lock().insert(
            key.clone(),
            ApplyRecord {
                version,
                state: ApplyState::Pending,
            },
        );
        self.transition(key, version, ApplyState::Applying);
    }

    pub(crate) fn transition(&self, key: &ArtifactKey, version: u64, next: ApplyState) {
        let mut applies = self.applies.lock();
        let Some(record) = applies.get_mut(key) else {
            return;
        };
        if record.version != version {
            return;
        }
        if !record.state.can_transition_to(next) {
            warn!(
                "Unexpected apply transition for {} v{}: {} -> {}",
                key, version, record.state, next
            );
        }
        record.state = next;
    }

    pub(crate) fn forget_tenant(&self, tenant: &str) {
        self.applies.lock().retain(|k, _| k.tenant_domain != tenant);
    }

    pub(crate) fn dead_letter(&self, letter: DeadLetter) {
        let mut letters = self.dead_letters.lock();
        letters.retain(|l| l.key != letter.key);
        letters.push(letter);
    }

    /// Drop dead letters for `key` older than a committed `version`
    pub(crate) fn clear_dead_letter(&self, key: &ArtifactKey, version: u64) {
        self.dead_letters
            .lock()
            .retain(|l| !(l.key == *key && l.version <= version));
    }

    pub(crate) fn set_pending_retries(&self, count: usize) {
        self.pending_retries.store(count, Ordering::Release);
    }
}

/// Point-in-time view of the synchronizer
#[derive(Clone, Debug, Serialize)]
pub struct SyncStatus {
    pub checkpoint: Option<u64>,
    pub pending_retries: usize,
    pub dead_letters: Vec<DeadLetter>,
    pub in_flight: usize,
    pub outcomes: BTreeMap<String, u64>,
}

impl SyncStatus {
    /// Nothing left to push and nothing abandoned
    pub fn is_converged(&self) -> bool {
        self.pending_retries == 0 && self.dead_letters.is_empty() && self.in_flight == 0
    }
}

/// Read-only handle to a synchronizer's diagnostics
#[derive(Clone, Debug)]
pub struct SyncStatusHandle {
    shared: Arc<SyncShared>,
}

impl SyncStatusHandle {
    pub(crate) fn new(shared: Arc<SyncShared>) -> Self {
        Self { shared }
    }

    pub fn checkpoint(&self) -> Option<u64> {
        self.shared.cursor.checkpoint()
    }

    pub fn apply_state(&self, key: &ArtifactKey) -> Option<ApplyState> {
        self.shared.applies.lock().get(key).map(|r| r.state)
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.lock().clone()
    }

    pub fn count(&self, outcome: Outcome) -> u64 {
        self.shared.counters.count(outcome)
    }

    pub fn status(&self) -> SyncStatus {
        let in_flight = self
            .shared
            .applies
            .lock()
            .values()
            .filter(|r| !r.state.is_terminal())
            .count();

        SyncStatus {
            checkpoint: self.shared.cursor.checkpoint(),
            pending_retries: self.shared.pending_retries.load(Ordering::Acquire),
            dead_letters: self.dead_letters(),
            in_flight,
            outcomes: self.shared.counters.snapshot(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn letter(key: &ArtifactKey, version: u64) -> DeadLetter {
        DeadLetter {
            key: key.clone(),
            kind: ArtifactKind::Api,
            op: EventOp::Deploy,
            version,
            attempts: 3,
            error: "Engine unavailable".to_string(),
            at: Utc::now(),
        }
    }

    #[test]
    fn test_apply_lifecycle() {
        let shared = Arc::new(SyncShared::default());
        let handle = SyncStatusHandle::new(Arc::clone(&shared));
        let key = ArtifactKey::new("t1", "PetStore", "v1");

        shared.begin(&key, 5);
        assert_eq!(handle.apply_state(&key), Some(ApplyState::Applying));
        assert_eq!(handle.status().in_flight, 1);

        shared.transition(&key, 5, ApplyState::Failed);
        shared.transition(&key, 5, ApplyState::Retrying);
        shared.transition(&key, 5, ApplyState::Committed);
        assert_eq!(handle.apply_state(&key), Some(ApplyState::Committed));
        assert!(handle.status().is_converged());
    }

    #[test]
    fn test_stale_transition_ignored() {
        let shared = SyncShared::default();
        let key = ArtifactKey::new("t1", "PetStore", "v1");

        shared.begin(&key, 6);
        shared.transition(&key, 5, ApplyState::Committed);

        let handle = SyncStatusHandle::new(Arc::new(shared));
        assert_eq!(handle.apply_state(&key), Some(ApplyState::Applying));
    }

    #[test]
    fn test_dead_letters_replaced_and_cleared() {
        let shared = Arc::new(SyncShared::default());
        let handle = SyncStatusHandle::new(Arc::clone(&shared));
        let key = ArtifactKey::new("t1", "PetStore", "v1");

        shared.dead_letter(letter(&key, 5));
        shared.dead_letter(letter(&key, 6));
        assert_eq!(handle.dead_letters().len(), 1);
        assert_eq!(handle.dead_letters()[0].version, 6);

        shared.clear_dead_letter(&key, 5);
        assert_eq!(handle.dead_letters().len(), 1);
        shared.clear_dead_letter(&key, 7);
        assert!(handle.dead_letters().is_empty());
    }
}
