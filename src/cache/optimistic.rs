//! Optimistic updates.
//!
//! A patch writes a speculative value into the store before the mutation
//! reaches the backend. On success the authoritative value replaces it; on
//! failure the previous entry is restored and a `RollbackNotice` is sent.
//!
//! Overlapping patches on one key are ordered by a per-key sequence. Only
//! the most recently started patch may commit its value; a rollback only
//! restores when the entry still holds that patch's write. In every other
//! case the key is invalidated and the next read asks the backend.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use metrics::counter;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::application::error::FetchError;
use crate::domain::MutationRequest;

use super::keys::CacheKey;
use super::lock::mutex_lock;
use super::store::{CacheEntry, QueryStore};

const SOURCE: &str = "cache::optimistic";
const NOTICE_CHANNEL_CAPACITY: usize = 64;
const METRIC_OPTIMISTIC_ROLLBACK: &str = "storeops_optimistic_rollback_total";

/// A speculative write awaiting the backend's answer.
#[derive(Debug)]
pub struct OptimisticPatch {
    key: CacheKey,
    previous: Option<CacheEntry>,
    speculative: Value,
    seq: u64,
    applied_version: u64,
}

impl OptimisticPatch {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }

    /// Entry as it was before the patch, `None` if the key was absent.
    pub fn previous(&self) -> Option<&CacheEntry> {
        self.previous.as_ref()
    }

    pub fn speculative(&self) -> &Value {
        &self.speculative
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// A later patch owns the key; it was invalidated instead.
    Superseded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackOutcome {
    Restored,
    /// The entry moved on since the patch; it was invalidated instead.
    Superseded,
}

/// Sent to the UI when a speculative change had to be undone.
#[derive(Debug, Clone)]
pub struct RollbackNotice {
    pub key: CacheKey,
    pub request: MutationRequest,
    pub speculative: Value,
    pub error: FetchError,
    pub outcome: RollbackOutcome,
}

impl RollbackNotice {
    pub fn message(&self) -> &'static str {
        self.error.user_message()
    }
}

#[derive(Debug, Default)]
struct KeyState {
    latest: u64,
    outstanding: usize,
}

#[derive(Clone)]
pub struct OptimisticCoordinator {
    store: QueryStore,
    state: Arc<Mutex<HashMap<CacheKey, KeyState>>>,
    sequence: Arc<AtomicU64>,
    notices: broadcast::Sender<RollbackNotice>,
}

impl OptimisticCoordinator {
    pub fn new(store: QueryStore) -> Self {
        let (notices, _) = broadcast::channel(NOTICE_CHANNEL_CAPACITY);
        Self {
            store,
            state: Arc::new(Mutex::new(HashMap::new())),
            sequence: Arc::new(AtomicU64::new(0)),
            notices,
        }
    }

    pub fn notices(&self) -> broadcast::Receiver<RollbackNotice> {
        self.notices.subscribe()
    }

    /// Snapshot `key` and write `speculative` over it.
    pub fn begin(&self, key: &CacheKey, speculative: Value) -> OptimisticPatch {
        let mut state = mutex_lock(&self.state, SOURCE, "begin");
        let seq = self.sequence.fetch_add(1, Ordering::SeqCst) + 1;
        let previous = self.store.get(key);
        let applied_version = self.store.write_speculative(key, speculative.clone());

        let key_state = state.entry(key.clone()).or_default();
        key_state.latest = seq;
        key_state.outstanding += 1;

        OptimisticPatch {
            key: key.clone(),
            previous,
            speculative,
            seq,
            applied_version,
        }
    }

    pub fn commit(&self, patch: OptimisticPatch, authoritative: Value) -> CommitOutcome {
        let mut state = mutex_lock(&self.state, SOURCE, "commit");
        let is_latest = state
            .get(&patch.key)
            .is_some_and(|key_state| key_state.latest == patch.seq);

        let outcome = if is_latest {
            self.store.set(&patch.key, authoritative);
            CommitOutcome::Committed
        } else {
            info!(key = %patch.key, "Optimistic commit superseded by a later patch");
            self.store.invalidate_key(&patch.key);
            CommitOutcome::Superseded
        };
        release(&mut state, &patch.key);
        outcome
    }

    pub fn rollback(
        &self,
        patch: OptimisticPatch,
        request: MutationRequest,
        error: FetchError,
    ) -> RollbackNotice {
        let outcome = {
            let mut state = mutex_lock(&self.state, SOURCE, "rollback");
            let restored = self.store.restore_if_version(
                &patch.key,
                patch.previous.clone(),
                patch.applied_version,
            );
            release(&mut state, &patch.key);
            if restored {
                RollbackOutcome::Restored
            } else {
                self.store.invalidate_key(&patch.key);
                RollbackOutcome::Superseded
            }
        };

        warn!(
            key = %patch.key,
            outcome = ?outcome,
            error = %error,
            "Optimistic update rolled back"
        );
        counter!(
            METRIC_OPTIMISTIC_ROLLBACK,
            "outcome" => match outcome {
                RollbackOutcome::Restored => "restored",
                RollbackOutcome::Superseded => "superseded",
            }
        )
        .increment(1);

        let notice = RollbackNotice {
            key: patch.key,
            request,
            speculative: patch.speculative,
            error,
            outcome,
        };
        let _ = self.notices.send(notice.clone());
        notice
    }

    /// Patches begun on `key` and not yet settled.
    pub fn outstanding(&self, key: &CacheKey) -> usize {
        mutex_lock(&self.state, SOURCE, "outstanding")
            .get(key)
            .map_or(0, |key_state| key_state.outstanding)
    }
}

fn release(state: &mut HashMap<CacheKey, KeyState>, key: &CacheKey) {
    if let Some(key_state) = state.get_mut(key) {
        key_state.outstanding = key_state.outstanding.saturating_sub(1);
        if key_state.outstanding == 0 {
            state.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::cache::config::CacheConfig;
    use crate::cache::keys::build_key;
    use crate::domain::{Operation, Resource};

    fn setup() -> (OptimisticCoordinator, QueryStore, CacheKey) {
        let store = QueryStore::new(CacheConfig::default());
        let key = build_key(Resource::Orders, Operation::detail("o-1"), None);
        (OptimisticCoordinator::new(store.clone()), store, key)
    }

    fn request() -> MutationRequest {
        MutationRequest::update(Resource::Orders, "o-1", json!({"status": "shipped"}))
    }

    #[test]
    fn failed_patch_restores_previous_entry_exactly() {
        let (coordinator, store, key) = setup();
        store.set(&key, json!({"id": "o-1", "status": "pending", "items": [1, 2]}));
        let before = store.get(&key).expect("entry");
        let before_bytes = serde_json::to_vec(&before.data).expect("encode");

        let patch = coordinator.begin(&key, json!({"id": "o-1", "status": "shipped"}));
        assert_eq!(store.peek(&key), Some(json!({"id": "o-1", "status": "shipped"})));

        let notice = coordinator.rollback(patch, request(), FetchError::from_status(500, "boom"));
        assert_eq!(notice.outcome, RollbackOutcome::Restored);

        let after = store.get(&key).expect("entry");
        assert_eq!(after, before);
        assert_eq!(serde_json::to_vec(&after.data).expect("encode"), before_bytes);
        assert_eq!(coordinator.outstanding(&key), 0);
    }

    #[test]
    fn rollback_of_absent_key_removes_it() {
        let (coordinator, store, key) = setup();
        let patch = coordinator.begin(&key, json!({"id": "o-1"}));
        assert!(store.get(&key).is_some());

        coordinator.rollback(patch, request(), FetchError::network("reset"));
        assert!(store.get(&key).is_none());
    }

    #[test]
    fn successful_patch_writes_authoritative_value() {
        let (coordinator, store, key) = setup();
        store.set(&key, json!({"status": "pending"}));

        let patch = coordinator.begin(&key, json!({"status": "shipped"}));
        let outcome = coordinator.commit(patch, json!({"status": "shipped", "updatedAt": "now"}));

        assert_eq!(outcome, CommitOutcome::Committed);
        let entry = store.get(&key).expect("entry");
        assert_eq!(entry.data, Some(json!({"status": "shipped", "updatedAt": "now"})));
        assert!(entry.is_fresh(store.now()));
    }

    #[test]
    fn earlier_failure_does_not_clobber_later_patch() {
        let (coordinator, store, key) = setup();
        store.set(&key, json!({"status": "pending"}));

        let first = coordinator.begin(&key, json!({"status": "paid"}));
        let second = coordinator.begin(&key, json!({"status": "shipped"}));
        assert_eq!(second.previous().and_then(|entry| entry.data.clone()), Some(json!({"status": "paid"})));

        let notice = coordinator.rollback(first, request(), FetchError::from_status(409, "conflict"));
        assert_eq!(notice.outcome, RollbackOutcome::Superseded);
        assert_eq!(store.peek(&key), Some(json!({"status": "shipped"})));
        assert!(store.get(&key).expect("entry").invalidated);

        assert_eq!(
            coordinator.commit(second, json!({"status": "shipped"})),
            CommitOutcome::Committed
        );
        assert!(!store.get(&key).expect("entry").invalidated);
    }

    #[test]
    fn stale_commit_invalidates_instead_of_writing() {
        let (coordinator, store, key) = setup();
        let first = coordinator.begin(&key, json!(1));
        let second = coordinator.begin(&key, json!(2));

        assert_eq!(coordinator.commit(first, json!("first")), CommitOutcome::Superseded);
        assert_eq!(store.peek(&key), Some(json!(2)));
        assert_eq!(coordinator.commit(second, json!("second")), CommitOutcome::Committed);
        assert_eq!(store.peek(&key), Some(json!("second")));
    }

    #[tokio::test]
    async fn rollback_notice_is_broadcast() {
        let (coordinator, _, key) = setup();
        let mut notices = coordinator.notices();

        let patch = coordinator.begin(&key, json!({}));
        coordinator.rollback(patch, request(), FetchError::from_status(422, "bad status"));

        let notice = notices.recv().await.expect("notice");
        assert_eq!(notice.key, key);
        assert_eq!(notice.message(), "Some of the submitted values are invalid.");
        assert_eq!(notice.request, request());
    }
}
