//! Cache trigger service.
//!
//! Entry point for code that learns the backend changed: publishes a cache
//! event and, by default, consumes it right away so the next read refetches.

use std::sync::Arc;

use tracing::debug;

use crate::domain::{MutationAction, Resource};

use super::config::CacheConfig;
use super::consumer::CacheConsumer;
use super::events::{EventKind, EventQueue, RealtimeEvent, RealtimeEventKind};

pub struct CacheTrigger {
    config: CacheConfig,
    queue: Arc<EventQueue>,
    consumer: Arc<CacheConsumer>,
}

impl CacheTrigger {
    pub fn new(config: CacheConfig, queue: Arc<EventQueue>, consumer: Arc<CacheConsumer>) -> Self {
        Self {
            config,
            queue,
            consumer,
        }
    }

    /// Publish an event and optionally consume immediately.
    ///
    /// Without `consume_now` the event waits for the next explicit
    /// consumption (the maintenance task drains the queue on every tick).
    pub fn trigger(&self, kind: EventKind, consume_now: bool) {
        if !self.config.enabled {
            debug!(event_kind = ?kind, "Cache trigger skipped: cache disabled");
            return;
        }

        self.queue.publish(kind);
        if consume_now {
            self.consumer.consume();
        }
    }

    /// A create/update/delete was accepted by the backend.
    pub fn mutation_succeeded(&self, resource: Resource, action: MutationAction, id: Option<&str>) {
        self.trigger(
            EventKind::Mutation {
                resource,
                action,
                id: id.map(str::to_string),
            },
            true,
        );
    }

    /// A push arrived on the realtime channel.
    pub fn realtime_event(&self, event: &RealtimeEvent) {
        if event.kind == RealtimeEventKind::Connected {
            return;
        }
        self.trigger(
            EventKind::Realtime {
                kind: event.kind,
                id: event.entity_id(),
            },
            true,
        );
    }

    /// Drain whatever is queued.
    pub fn flush(&self) -> bool {
        self.consumer.consume()
    }
}
