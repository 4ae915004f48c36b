//! Cache consumer.
//!
//! Drains queued events and applies the merged invalidation plan to the
//! query store.

use std::sync::Arc;
use std::time::Instant;

use metrics::histogram;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use super::config::CacheConfig;
use super::events::EventQueue;
use super::keys::KeyBuilder;
use super::planner::InvalidationPlan;
use super::store::QueryStore;

const METRIC_CACHE_CONSUME_MS: &str = "storeops_cache_consume_ms";

/// Counts from applying one plan.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlanOutcome {
    pub invalidated: usize,
    pub evicted: usize,
}

pub struct CacheConsumer {
    config: CacheConfig,
    keys: KeyBuilder,
    store: QueryStore,
    queue: Arc<EventQueue>,
}

impl CacheConsumer {
    pub fn new(config: CacheConfig, store: QueryStore, queue: Arc<EventQueue>) -> Self {
        Self {
            keys: KeyBuilder::with_namespace(config.namespace.clone()),
            config,
            store,
            queue,
        }
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    /// Consume pending events and apply their plan.
    ///
    /// If the queue dropped events since the last run, every key in the
    /// namespace is invalidated as well. Returns true if anything was applied.
    #[instrument(skip(self))]
    pub fn consume(&self) -> bool {
        let started_at = Instant::now();
        let overflowed = self.queue.take_overflow();
        let events = self.queue.drain(self.config.consume_batch_limit);
        if events.is_empty() && !overflowed {
            return false;
        }

        let event_count = events.len();
        let event_ids: Vec<Uuid> = events.iter().map(|event| event.id).collect();
        let mut plan = InvalidationPlan::from_events(&self.keys, events);
        if overflowed {
            warn!(
                namespace = self.keys.namespace(),
                "Cache events were dropped, invalidating the whole namespace"
            );
            plan.merge(InvalidationPlan::everything(&self.keys));
        }
        info!(
            event_count,
            event_ids = ?event_ids,
            plan = %plan,
            "Cache consumption starting"
        );

        let outcome = self.apply(&plan);
        info!(
            event_count,
            invalidated = outcome.invalidated,
            evicted = outcome.evicted,
            "Cache consumption complete"
        );

        histogram!(METRIC_CACHE_CONSUME_MS)
            .record(started_at.elapsed().as_secs_f64() * 1000.0);
        true
    }

    /// Evictions run first so an evicted detail is not also left behind as
    /// an invalidated entry.
    pub fn apply(&self, plan: &InvalidationPlan) -> PlanOutcome {
        let evicted = plan
            .evict
            .iter()
            .map(|prefix| self.store.evict_prefix(prefix))
            .sum();
        let invalidated = plan
            .invalidate
            .iter()
            .map(|prefix| self.store.invalidate(prefix))
            .sum();
        PlanOutcome {
            invalidated,
            evicted,
        }
    }
}
