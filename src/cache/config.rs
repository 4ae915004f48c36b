//! Cache configuration.
//!
//! TTL classes and store limits, loaded from the `[cache]` table of
//! `storeops.toml`.

use std::time::Duration;

use serde::Deserialize;

use crate::domain::{Operation, Resource};

const DEFAULT_NAMESPACE: &str = "admin";
const DEFAULT_CLEANUP_THRESHOLD_SECS: u64 = 60 * 60;
const DEFAULT_MAINTENANCE_INTERVAL_MS: u64 = 15_000;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1_024;

/// Named cache policy bundle applied to a group of queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TtlClass {
    Dashboard,
    Realtime,
    Lists,
    Details,
    Analytics,
}

impl TtlClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TtlClass::Dashboard => "dashboard",
            TtlClass::Realtime => "realtime",
            TtlClass::Lists => "lists",
            TtlClass::Details => "details",
            TtlClass::Analytics => "analytics",
        }
    }

    /// Class a query falls into.
    pub fn for_query(resource: Resource, operation: &Operation) -> Self {
        match (resource, operation) {
            (Resource::Activity, _) => TtlClass::Realtime,
            (Resource::Analytics, _) => TtlClass::Analytics,
            (_, Operation::Stats | Operation::Overview) => TtlClass::Dashboard,
            (_, Operation::Detail(_)) => TtlClass::Details,
            (_, Operation::List | Operation::Sales) => TtlClass::Lists,
        }
    }
}

/// Staleness window, hard-evict window and optional auto-refetch cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct TtlPolicy {
    pub stale_after_secs: u64,
    pub hard_evict_after_secs: u64,
    #[serde(default)]
    pub refetch_interval_secs: Option<u64>,
}

impl TtlPolicy {
    const fn new(stale_after_secs: u64, hard_evict_after_secs: u64, refetch: Option<u64>) -> Self {
        Self {
            stale_after_secs,
            hard_evict_after_secs,
            refetch_interval_secs: refetch,
        }
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn hard_evict_after(&self) -> Duration {
        Duration::from_secs(self.hard_evict_after_secs)
    }

    pub fn refetch_interval(&self) -> Option<Duration> {
        self.refetch_interval_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

/// Per-class TTL policies.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TtlTable {
    pub dashboard: TtlPolicy,
    pub realtime: TtlPolicy,
    pub lists: TtlPolicy,
    pub details: TtlPolicy,
    pub analytics: TtlPolicy,
}

impl Default for TtlTable {
    fn default() -> Self {
        Self {
            dashboard: TtlPolicy::new(2 * 60, 10 * 60, Some(5 * 60)),
            realtime: TtlPolicy::new(30, 2 * 60, Some(60)),
            lists: TtlPolicy::new(5 * 60, 15 * 60, None),
            details: TtlPolicy::new(10 * 60, 30 * 60, None),
            analytics: TtlPolicy::new(15 * 60, 60 * 60, None),
        }
    }
}

impl TtlTable {
    pub fn policy(&self, class: TtlClass) -> &TtlPolicy {
        match class {
            TtlClass::Dashboard => &self.dashboard,
            TtlClass::Realtime => &self.realtime,
            TtlClass::Lists => &self.lists,
            TtlClass::Details => &self.details,
            TtlClass::Analytics => &self.analytics,
        }
    }
}

/// Cache configuration from `storeops.toml`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable the query cache. When off, every read goes to the backend.
    pub enabled: bool,
    /// First segment of every cache key.
    pub namespace: String,
    /// Ceiling on how long an unsubscribed entry survives `cleanup`.
    pub cleanup_threshold_secs: u64,
    /// Cadence (ms) of the cleanup/auto-refetch task.
    pub maintenance_interval_ms: u64,
    /// Maximum events per consumption batch.
    pub consume_batch_limit: usize,
    /// Maximum pending invalidation events before the oldest are dropped.
    pub event_queue_limit: usize,
    pub ttl: TtlTable,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            namespace: DEFAULT_NAMESPACE.to_string(),
            cleanup_threshold_secs: DEFAULT_CLEANUP_THRESHOLD_SECS,
            maintenance_interval_ms: DEFAULT_MAINTENANCE_INTERVAL_MS,
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            ttl: TtlTable::default(),
        }
    }
}

impl CacheConfig {
    pub fn cleanup_threshold(&self) -> Duration {
        Duration::from_secs(self.cleanup_threshold_secs)
    }

    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_millis(self.maintenance_interval_ms.max(1))
    }

    pub fn policy(&self, class: TtlClass) -> &TtlPolicy {
        self.ttl.policy(class)
    }

    /// How long an unsubscribed entry of `class` may linger.
    pub fn eviction_window(&self, class: TtlClass) -> Duration {
        self.policy(class)
            .hard_evict_after()
            .min(self.cleanup_threshold())
    }
}
