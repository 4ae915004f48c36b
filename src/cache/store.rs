//! Query store.
//!
//! Process-wide map from `CacheKey` to `CacheEntry`. Reads are
//! stale-while-revalidate, concurrent loads of one key share a single
//! backend call, and subscriber counts keep mounted views alive through
//! cleanup.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use metrics::counter;
use serde_json::Value;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::application::error::FetchError;

use super::clock::{Clock, SystemClock};
use super::config::{CacheConfig, TtlClass};
use super::keys::{CacheKey, KeyPrefix};
use super::lock::{mutex_lock, rw_read, rw_write};

const SOURCE: &str = "cache::store";
const CHANGE_CHANNEL_CAPACITY: usize = 256;

pub(crate) const METRIC_CACHE_HIT: &str = "storeops_cache_hit_total";
pub(crate) const METRIC_CACHE_MISS: &str = "storeops_cache_miss_total";
pub(crate) const METRIC_CACHE_INVALIDATED: &str = "storeops_cache_invalidated_total";
pub(crate) const METRIC_CACHE_EVICT: &str = "storeops_cache_evict_total";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// One cached query result and its bookkeeping.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub data: Option<Value>,
    pub fetched_at: OffsetDateTime,
    pub stale_after: OffsetDateTime,
    pub ttl_class: TtlClass,
    pub subscriber_count: usize,
    pub status: EntryStatus,
    /// Set by `invalidate`; cleared by the next successful write.
    pub invalidated: bool,
    /// Store sequence number of the last data write.
    pub version: u64,
    pub last_error: Option<FetchError>,
}

impl CacheEntry {
    fn empty(ttl_class: TtlClass, now: OffsetDateTime) -> Self {
        Self {
            data: None,
            fetched_at: now,
            stale_after: now,
            ttl_class,
            subscriber_count: 0,
            status: EntryStatus::Idle,
            invalidated: false,
            version: 0,
            last_error: None,
        }
    }

    pub fn is_stale(&self, now: OffsetDateTime) -> bool {
        self.invalidated || now > self.stale_after
    }

    /// Data present and within its staleness window.
    pub fn is_fresh(&self, now: OffsetDateTime) -> bool {
        self.data.is_some() && !self.is_stale(now)
    }

    pub fn age(&self, now: OffsetDateTime) -> Duration {
        Duration::try_from(now - self.fetched_at).unwrap_or(Duration::ZERO)
    }
}

/// Notification sent to views when an entry changes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreChange {
    Updated(CacheKey),
    Invalidated(CacheKey),
    Evicted(CacheKey),
}

type LoadFuture = Shared<BoxFuture<'static, Result<Value, FetchError>>>;

struct Inflight {
    started: u64,
    invalidated: bool,
    future: LoadFuture,
}

struct StoreInner {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    subscribers: Mutex<HashMap<CacheKey, usize>>,
    inflight: Mutex<HashMap<CacheKey, Inflight>>,
    sequence: AtomicU64,
    changes: broadcast::Sender<StoreChange>,
}

/// Shared handle to the query store. Cloning is cheap.
#[derive(Clone)]
pub struct QueryStore {
    inner: Arc<StoreInner>,
}

impl QueryStore {
    pub fn new(config: CacheConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: CacheConfig, clock: Arc<dyn Clock>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(StoreInner {
                config,
                clock,
                entries: RwLock::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                inflight: Mutex::new(HashMap::new()),
                sequence: AtomicU64::new(1),
                changes,
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    pub fn now(&self) -> OffsetDateTime {
        self.inner.clock.now()
    }

    /// Receive a `StoreChange` for every write, invalidation and eviction.
    pub fn changes(&self) -> broadcast::Receiver<StoreChange> {
        self.inner.changes.subscribe()
    }

    fn next_sequence(&self) -> u64 {
        self.inner.sequence.fetch_add(1, Ordering::SeqCst)
    }

    fn notify(&self, change: StoreChange) {
        // No receivers is the common case outside interactive views.
        let _ = self.inner.changes.send(change);
    }

    // ------------------------------------------------------------------
    // Reads and writes
    // ------------------------------------------------------------------

    /// Current entry for `key`, without side effects.
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        let mut entry = rw_read(&self.inner.entries, SOURCE, "get").get(key).cloned()?;
        entry.subscriber_count = self.subscriber_count(key);
        Some(entry)
    }

    /// Cached data regardless of staleness.
    pub fn peek(&self, key: &CacheKey) -> Option<Value> {
        rw_read(&self.inner.entries, SOURCE, "peek")
            .get(key)
            .and_then(|entry| entry.data.clone())
    }

    pub fn version_of(&self, key: &CacheKey) -> Option<u64> {
        rw_read(&self.inner.entries, SOURCE, "version_of")
            .get(key)
            .map(|entry| entry.version)
    }

    /// Store `data` as a fresh, successful result. Returns the write's version.
    pub fn set(&self, key: &CacheKey, data: Value) -> u64 {
        let version = self.next_sequence();
        let now = self.now();
        {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "set");
            self.apply_data(&mut entries, key, data, version, now, false);
        }
        self.notify(StoreChange::Updated(key.clone()));
        version
    }

    fn apply_data(
        &self,
        entries: &mut HashMap<CacheKey, CacheEntry>,
        key: &CacheKey,
        data: Value,
        version: u64,
        now: OffsetDateTime,
        invalidated: bool,
    ) {
        let class = key.ttl_class();
        let stale_after = now + self.inner.config.policy(class).stale_after();
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::empty(class, now));
        entry.data = Some(data);
        entry.fetched_at = now;
        entry.stale_after = stale_after;
        entry.status = EntryStatus::Success;
        entry.invalidated = invalidated;
        entry.version = version;
        entry.last_error = None;
    }

    /// Overwrite the data of `key` without touching its freshness. An entry
    /// created this way is born stale.
    pub fn write_speculative(&self, key: &CacheKey, data: Value) -> u64 {
        let version = self.next_sequence();
        let now = self.now();
        {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "write_speculative");
            let entry = entries
                .entry(key.clone())
                .or_insert_with(|| CacheEntry::empty(key.ttl_class(), now));
            entry.data = Some(data);
            entry.version = version;
        }
        self.notify(StoreChange::Updated(key.clone()));
        version
    }

    /// Put `previous` back (or drop the entry when it had none), but only if
    /// the entry still carries the write identified by `expected_version`.
    pub fn restore_if_version(
        &self,
        key: &CacheKey,
        previous: Option<CacheEntry>,
        expected_version: u64,
    ) -> bool {
        let change = {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "restore_if_version");
            match entries.get(key) {
                Some(current) if current.version == expected_version => {}
                _ => return false,
            }
            match previous {
                Some(mut previous) => {
                    previous.subscriber_count = 0;
                    entries.insert(key.clone(), previous);
                    StoreChange::Updated(key.clone())
                }
                None => {
                    entries.remove(key);
                    StoreChange::Evicted(key.clone())
                }
            }
        };
        self.notify(change);
        true
    }

    // ------------------------------------------------------------------
    // Invalidation and eviction
    // ------------------------------------------------------------------

    /// Mark every entry under `prefix` stale. Data is kept. Idempotent.
    pub fn invalidate(&self, prefix: &KeyPrefix) -> usize {
        self.invalidate_where("invalidate", |key| key.starts_with(prefix))
    }

    pub fn invalidate_key(&self, key: &CacheKey) -> bool {
        self.invalidate_where("invalidate_key", |candidate| candidate == key) > 0
    }

    fn invalidate_where(&self, op: &'static str, matches: impl Fn(&CacheKey) -> bool) -> usize {
        let mut changed = Vec::new();
        {
            let mut entries = rw_write(&self.inner.entries, SOURCE, op);
            for (key, entry) in entries.iter_mut() {
                if matches(key) && !entry.invalidated {
                    entry.invalidated = true;
                    changed.push(key.clone());
                }
            }
        }
        {
            let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, op);
            for (key, pending) in inflight.iter_mut() {
                if matches(key) {
                    pending.invalidated = true;
                }
            }
        }

        for key in &changed {
            counter!(METRIC_CACHE_INVALIDATED, "class" => key.ttl_class().as_str()).increment(1);
            self.notify(StoreChange::Invalidated(key.clone()));
        }
        changed.len()
    }

    /// Remove `key` entirely. A fetch still in flight for it is detached and
    /// its result discarded.
    pub fn evict(&self, key: &CacheKey) -> bool {
        self.evict_where("evict", |candidate| candidate == key) > 0
    }

    pub fn evict_prefix(&self, prefix: &KeyPrefix) -> usize {
        self.evict_where("evict_prefix", |key| key.starts_with(prefix))
    }

    fn evict_where(&self, op: &'static str, matches: impl Fn(&CacheKey) -> bool) -> usize {
        let mut removed = Vec::new();
        rw_write(&self.inner.entries, SOURCE, op).retain(|key, _| {
            let hit = matches(key);
            if hit {
                removed.push(key.clone());
            }
            !hit
        });
        mutex_lock(&self.inner.inflight, SOURCE, op).retain(|key, _| !matches(key));

        for key in &removed {
            counter!(METRIC_CACHE_EVICT, "reason" => "explicit").increment(1);
            self.notify(StoreChange::Evicted(key.clone()));
        }
        removed.len()
    }

    /// Drop unsubscribed entries older than their eviction window.
    pub fn cleanup(&self) -> usize {
        let now = self.now();
        let subscribed = self.subscribed_keys();
        let loading = self.loading_keys();

        let mut removed = Vec::new();
        rw_write(&self.inner.entries, SOURCE, "cleanup").retain(|key, entry| {
            let keep = subscribed.contains(key)
                || loading.contains(key)
                || entry.age(now) <= self.inner.config.eviction_window(entry.ttl_class);
            if !keep {
                removed.push(key.clone());
            }
            keep
        });

        if !removed.is_empty() {
            counter!(METRIC_CACHE_EVICT, "reason" => "cleanup").increment(removed.len() as u64);
            info!(evicted = removed.len(), "Query store cleanup evicted entries");
        }
        for key in &removed {
            self.notify(StoreChange::Evicted(key.clone()));
        }
        removed.len()
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Return fresh data for `key`, or load it with `loader`.
    ///
    /// Concurrent callers for the same key share one `loader` invocation. The
    /// load runs to completion even if every caller goes away.
    pub async fn fetch_query<F, Fut>(&self, key: &CacheKey, loader: F) -> Result<Value, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        self.load(key, loader, false).await
    }

    /// Load `key` even when it is fresh. Joins a load already in flight.
    pub async fn refetch<F, Fut>(&self, key: &CacheKey, loader: F) -> Result<Value, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        self.load(key, loader, true).await
    }

    async fn load<F, Fut>(&self, key: &CacheKey, loader: F, force: bool) -> Result<Value, FetchError>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        if !self.inner.config.enabled {
            return loader().await;
        }

        let class = key.ttl_class().as_str();
        if !force {
            let now = self.now();
            let fresh = rw_read(&self.inner.entries, SOURCE, "load")
                .get(key)
                .filter(|entry| entry.is_fresh(now))
                .and_then(|entry| entry.data.clone());
            if let Some(data) = fresh {
                counter!(METRIC_CACHE_HIT, "class" => class).increment(1);
                return Ok(data);
            }
        }
        counter!(METRIC_CACHE_MISS, "class" => class).increment(1);

        self.join_or_start(key, loader).await
    }

    fn join_or_start<F, Fut>(&self, key: &CacheKey, loader: F) -> LoadFuture
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<Value, FetchError>> + Send + 'static,
    {
        let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, "join_or_start");
        if let Some(pending) = inflight.get(key) {
            debug!(key = %key, "Joining in-flight fetch");
            return pending.future.clone();
        }

        let started = self.next_sequence();
        self.mark_loading(key);

        let store = self.clone();
        let owned_key = key.clone();
        let future = async move {
            let result = loader().await;
            store.complete_fetch(&owned_key, started, &result);
            result
        }
        .boxed()
        .shared();

        inflight.insert(
            key.clone(),
            Inflight {
                started,
                invalidated: false,
                future: future.clone(),
            },
        );
        drop(inflight);

        tokio::spawn(future.clone());
        future
    }

    fn mark_loading(&self, key: &CacheKey) {
        let now = self.now();
        let mut entries = rw_write(&self.inner.entries, SOURCE, "mark_loading");
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::empty(key.ttl_class(), now));
        entry.status = EntryStatus::Loading;
    }

    fn complete_fetch(&self, key: &CacheKey, started: u64, result: &Result<Value, FetchError>) {
        let registration = {
            let mut inflight = mutex_lock(&self.inner.inflight, SOURCE, "complete_fetch");
            match inflight.get(key) {
                Some(pending) if pending.started == started => inflight.remove(key),
                _ => None,
            }
        };
        let Some(registration) = registration else {
            debug!(key = %key, "Discarding fetch result for evicted key");
            return;
        };

        let now = self.now();
        let version = self.next_sequence();
        {
            let mut entries = rw_write(&self.inner.entries, SOURCE, "complete_fetch");
            match result {
                Ok(data) => {
                    if entries.get(key).is_some_and(|entry| entry.version > started) {
                        debug!(key = %key, "Discarding fetch result superseded by a newer write");
                        if let Some(entry) = entries.get_mut(key) {
                            entry.status = EntryStatus::Success;
                        }
                        return;
                    }
                    self.apply_data(
                        &mut entries,
                        key,
                        data.clone(),
                        version,
                        now,
                        registration.invalidated,
                    );
                }
                Err(err) => {
                    let entry = entries
                        .entry(key.clone())
                        .or_insert_with(|| CacheEntry::empty(key.ttl_class(), now));
                    entry.status = EntryStatus::Error;
                    entry.last_error = Some(err.clone());
                }
            }
        }
        self.notify(StoreChange::Updated(key.clone()));
    }

    pub fn is_loading(&self, key: &CacheKey) -> bool {
        mutex_lock(&self.inner.inflight, SOURCE, "is_loading").contains_key(key)
    }

    // ------------------------------------------------------------------
    // Subscribers
    // ------------------------------------------------------------------

    /// Register interest in `key` until the returned guard is dropped.
    pub fn subscribe(&self, key: &CacheKey) -> Subscription {
        *mutex_lock(&self.inner.subscribers, SOURCE, "subscribe")
            .entry(key.clone())
            .or_insert(0) += 1;
        Subscription {
            store: self.clone(),
            key: key.clone(),
        }
    }

    fn unsubscribe(&self, key: &CacheKey) {
        let mut subscribers = mutex_lock(&self.inner.subscribers, SOURCE, "unsubscribe");
        if let Some(count) = subscribers.get_mut(key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                subscribers.remove(key);
            }
        }
    }

    pub fn subscriber_count(&self, key: &CacheKey) -> usize {
        mutex_lock(&self.inner.subscribers, SOURCE, "subscriber_count")
            .get(key)
            .copied()
            .unwrap_or(0)
    }

    fn subscribed_keys(&self) -> HashSet<CacheKey> {
        mutex_lock(&self.inner.subscribers, SOURCE, "subscribed_keys")
            .keys()
            .cloned()
            .collect()
    }

    fn loading_keys(&self) -> HashSet<CacheKey> {
        mutex_lock(&self.inner.inflight, SOURCE, "loading_keys")
            .keys()
            .cloned()
            .collect()
    }

    /// Subscribed keys that are invalidated or past their auto-refetch
    /// interval, and not already loading.
    pub fn entries_due_for_refetch(&self) -> Vec<CacheKey> {
        let now = self.now();
        let subscribed = self.subscribed_keys();
        let loading = self.loading_keys();
        let entries = rw_read(&self.inner.entries, SOURCE, "entries_due_for_refetch");

        let mut due: Vec<CacheKey> = subscribed
            .into_iter()
            .filter(|key| !loading.contains(key))
            .filter(|key| match entries.get(key) {
                Some(entry) => {
                    entry.invalidated
                        || self
                            .inner
                            .config
                            .policy(entry.ttl_class)
                            .refetch_interval()
                            .is_some_and(|interval| entry.age(now) >= interval)
                }
                None => false,
            })
            .collect();
        due.sort();
        due
    }

    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = rw_read(&self.inner.entries, SOURCE, "keys")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        rw_read(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Keeps a key subscribed while alive.
#[must_use = "dropping a subscription unsubscribes immediately"]
pub struct Subscription {
    store: QueryStore,
    key: CacheKey,
}

impl Subscription {
    pub fn key(&self) -> &CacheKey {
        &self.key
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.store.unsubscribe(&self.key);
    }
}
