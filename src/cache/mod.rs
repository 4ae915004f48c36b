//! Query cache and coherency layer.
//!
//! Reads are cached in a [`QueryStore`] keyed by [`CacheKey`]. Writes and
//! realtime pushes become [`CacheEvent`]s that the [`CacheTrigger`] queues
//! and the [`CacheConsumer`] turns into an [`InvalidationPlan`].
//!
//! TTL classes are configured via `storeops.toml`:
//!
//! ```toml
//! [cache]
//! namespace = "admin"
//! cleanup_threshold_secs = 3600
//!
//! [cache.ttl.dashboard]
//! stale_after_secs = 120
//! hard_evict_after_secs = 600
//! refetch_interval_secs = 300
//! ```

pub mod clock;
mod config;
mod consumer;
mod events;
mod keys;
mod lock;
mod optimistic;
mod planner;
pub mod realtime;
mod store;
mod trigger;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, TtlClass, TtlPolicy, TtlTable};
pub use consumer::{CacheConsumer, PlanOutcome};
pub use events::{CacheEvent, Epoch, EventKind, EventQueue, RealtimeEvent, RealtimeEventKind};
pub use keys::{CacheKey, KeyBuilder, KeyPrefix, ParamsDigest, build_key};
pub use optimistic::{
    CommitOutcome, OptimisticCoordinator, OptimisticPatch, RollbackNotice, RollbackOutcome,
};
pub use planner::InvalidationPlan;
pub use realtime::{
    ChannelState, CloseReason, EventSource, EventStream, RealtimeChannel, RealtimeConfig,
    RealtimeHandle,
};
pub use store::{CacheEntry, EntryStatus, QueryStore, StoreChange, Subscription};
pub use trigger::CacheTrigger;
