use std::sync::Once;

use metrics::{Unit, describe_counter, describe_histogram};
use tracing_error::ErrorLayer;
use tracing_subscriber::{
    EnvFilter, fmt,
    layer::{Layer, SubscriberExt},
    util::SubscriberInitExt,
};

use crate::config::{LogFormat, LoggingSettings};

use super::error::InfraError;

static METRIC_DESCRIPTIONS: Once = Once::new();

/// Install a global tracing subscriber using the provided logging settings.
///
/// Logs go to stderr so `storeops get` output stays pipeable.
pub fn init(logging: &LoggingSettings) -> Result<(), InfraError> {
    describe_metrics();

    let env_filter = EnvFilter::builder()
        .with_default_directive(logging.level.into())
        .from_env_lossy();

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer()
            .compact()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(ErrorLayer::default())
        .with(fmt_layer)
        .try_init()
        .map_err(|err| {
            InfraError::telemetry(format!("failed to install tracing subscriber: {err}"))
        })
}

pub fn describe_metrics() {
    METRIC_DESCRIPTIONS.call_once(|| {
        describe_counter!(
            "storeops_cache_hit_total",
            Unit::Count,
            "Reads answered from a fresh cache entry."
        );
        describe_counter!(
            "storeops_cache_miss_total",
            Unit::Count,
            "Reads that had to load from the backend."
        );
        describe_counter!(
            "storeops_cache_invalidated_total",
            Unit::Count,
            "Entries marked stale by invalidation."
        );
        describe_counter!(
            "storeops_cache_evict_total",
            Unit::Count,
            "Entries removed by eviction or cleanup."
        );
        describe_counter!(
            "storeops_cache_events_dropped_total",
            Unit::Count,
            "Cache events dropped due to queue overflow."
        );
        describe_histogram!(
            "storeops_cache_consume_ms",
            Unit::Milliseconds,
            "Cache event consumption latency in milliseconds."
        );
        describe_counter!(
            "storeops_fetch_retry_total",
            Unit::Count,
            "Backend reads retried after a failure."
        );
        describe_counter!(
            "storeops_realtime_reconnect_total",
            Unit::Count,
            "Realtime channel reconnect attempts."
        );
        describe_counter!(
            "storeops_optimistic_rollback_total",
            Unit::Count,
            "Optimistic updates rolled back after a failed mutation."
        );
    });
}
