//! Cache events.
//!
//! Mutation completions and realtime pushes are queued as `CacheEvent`s and
//! turned into invalidation plans by the consumer.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use metrics::counter;
use serde_json::Value;
use storeops_api_types::StreamMessage;
use time::OffsetDateTime;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{MutationAction, Resource};

use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const METRIC_EVENTS_DROPPED: &str = "storeops_cache_events_dropped_total";

/// Monotonic epoch for ordering events within this process.
pub type Epoch = u64;

/// Realtime event types pushed by the backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RealtimeEventKind {
    Connected,
    StatsUpdate,
    OrderUpdate,
    ProductUpdate,
    CustomerUpdate,
}

impl RealtimeEventKind {
    pub fn from_wire(kind: &str) -> Option<Self> {
        match kind {
            "connected" => Some(Self::Connected),
            "stats_update" => Some(Self::StatsUpdate),
            "order_update" => Some(Self::OrderUpdate),
            "product_update" => Some(Self::ProductUpdate),
            "customer_update" => Some(Self::CustomerUpdate),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::StatsUpdate => "stats_update",
            Self::OrderUpdate => "order_update",
            Self::ProductUpdate => "product_update",
            Self::CustomerUpdate => "customer_update",
        }
    }

    /// Resource whose cached reads this event makes stale.
    pub fn resource(self) -> Option<Resource> {
        match self {
            Self::Connected => None,
            Self::StatsUpdate => Some(Resource::Dashboard),
            Self::OrderUpdate => Some(Resource::Orders),
            Self::ProductUpdate => Some(Resource::Products),
            Self::CustomerUpdate => Some(Resource::Customers),
        }
    }
}

/// A decoded push from the event stream.
#[derive(Debug, Clone, PartialEq)]
pub struct RealtimeEvent {
    pub kind: RealtimeEventKind,
    pub timestamp: OffsetDateTime,
    pub payload: Option<Value>,
}

impl RealtimeEvent {
    /// Decode a stream message. Unknown event types yield `None`.
    pub fn from_message(message: StreamMessage, received_at: OffsetDateTime) -> Option<Self> {
        let kind = RealtimeEventKind::from_wire(&message.kind)?;
        Some(Self {
            kind,
            timestamp: message.timestamp.unwrap_or(received_at),
            payload: message.data,
        })
    }

    /// Id of the changed entity, when the payload names one.
    pub fn entity_id(&self) -> Option<String> {
        let payload = self.payload.as_ref()?;
        let id = payload.get("id").or_else(|| match self.kind {
            RealtimeEventKind::OrderUpdate => payload.get("orderId"),
            RealtimeEventKind::ProductUpdate => payload.get("productId"),
            RealtimeEventKind::CustomerUpdate => payload.get("customerId"),
            _ => None,
        })?;
        match id {
            Value::String(text) if !text.trim().is_empty() => Some(text.trim().to_string()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        }
    }
}

/// What happened that may have made cached reads stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A mutation succeeded on the backend.
    Mutation {
        resource: Resource,
        action: MutationAction,
        id: Option<String>,
    },
    /// The backend pushed a change notification.
    Realtime {
        kind: RealtimeEventKind,
        id: Option<String>,
    },
}

/// Cache event with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency.
    pub id: Uuid,
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// Bounded in-memory queue of pending cache events.
///
/// When full, the oldest event is dropped and the queue is flagged as
/// overflowed until the next consumer takes the flag.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
    overflowed: AtomicBool,
    limit: usize,
}

impl EventQueue {
    pub fn new(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            overflowed: AtomicBool::new(false),
            limit: limit.max(1),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, kind: EventKind) -> Uuid {
        let event = CacheEvent::new(kind, self.next_epoch());
        let id = event.id;
        info!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            "Cache event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    event_id = %dropped.id,
                    event_epoch = dropped.epoch,
                    limit = self.limit,
                    "Cache event queue full, dropped oldest event"
                );
                counter!(METRIC_EVENTS_DROPPED).increment(1);
                self.overflowed.store(true, Ordering::SeqCst);
            }
        }
        queue.push_back(event);
        id
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        queue.drain(..count).collect()
    }

    /// Whether events were dropped since the last call. Clears the flag.
    pub fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::SeqCst)
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new(1_024)
    }
}
