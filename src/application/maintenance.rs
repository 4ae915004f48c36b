//! Periodic store upkeep: drains deferred cache events, evicts idle
//! entries and refetches subscribed keys that are due.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::cache::CacheTrigger;

use super::query::QueryClient;

/// What one maintenance pass did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub consumed_events: bool,
    pub evicted: usize,
    pub refetched: usize,
    pub failed: usize,
}

pub async fn run_maintenance_tick(client: &QueryClient, trigger: &CacheTrigger) -> TickReport {
    let consumed_events = trigger.flush();
    let evicted = client.store().cleanup();

    let due = client.store().entries_due_for_refetch();
    let results = join_all(due.iter().map(|key| client.refetch(key))).await;

    let mut report = TickReport {
        consumed_events,
        evicted,
        ..TickReport::default()
    };
    for (key, result) in due.iter().zip(results) {
        match result {
            Ok(_) => report.refetched += 1,
            Err(err) => {
                report.failed += 1;
                warn!(key = %key, error = %err, "Background refetch failed");
            }
        }
    }
    debug!(?report, "Maintenance tick complete");
    report
}

pub struct MaintenanceHandle {
    shutdown: watch::Sender<bool>,
    task: Option<JoinHandle<()>>,
}

impl MaintenanceHandle {
    pub async fn stop(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "Maintenance task ended abnormally");
            }
        }
    }
}

impl Drop for MaintenanceHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

pub fn spawn_maintenance(
    client: QueryClient,
    trigger: Arc<CacheTrigger>,
    every: Duration,
) -> MaintenanceHandle {
    let (shutdown, mut stop) = watch::channel(false);
    let task = tokio::spawn(async move {
        info!(interval_ms = u64::try_from(every.as_millis()).unwrap_or(u64::MAX), "Maintenance task started");
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = stop_requested(&mut stop) => break,
                _ = ticker.tick() => {
                    run_maintenance_tick(&client, &trigger).await;
                }
            }
        }
        info!("Maintenance task stopped");
    });

    MaintenanceHandle {
        shutdown,
        task: Some(task),
    }
}

/// Resolves once a stop is requested or the handle is gone.
async fn stop_requested(stop: &mut watch::Receiver<bool>) {
    let _ = stop.wait_for(|stop| *stop).await;
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use serde_json::{Value, json};

    use super::*;
    use crate::application::error::FetchError;
    use crate::application::fetch::{Fetcher, RetryPolicy};
    use crate::application::session::SessionMonitor;
    use crate::cache::clock::ManualClock;
    use crate::cache::{CacheConfig, CacheConsumer, EventQueue, QueryStore};
    use crate::domain::{FetchRequest, Operation, Resource};

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Fetcher for CountingFetcher {
        async fn fetch(&self, _: &FetchRequest) -> Result<Value, FetchError> {
            Ok(json!(self.calls.fetch_add(1, Ordering::SeqCst)))
        }
    }

    fn setup() -> (QueryClient, Arc<CacheTrigger>, Arc<ManualClock>, Arc<CountingFetcher>) {
        let config = CacheConfig::default();
        let clock = Arc::new(ManualClock::default());
        let store = QueryStore::with_clock(config.clone(), clock.clone());
        let queue = Arc::new(EventQueue::default());
        let consumer = Arc::new(CacheConsumer::new(config.clone(), store.clone(), queue.clone()));
        let trigger = Arc::new(CacheTrigger::new(config, queue, consumer));
        let fetcher = Arc::new(CountingFetcher::default());
        let client = QueryClient::new(
            store,
            fetcher.clone(),
            RetryPolicy::none(),
            Duration::from_secs(5),
            SessionMonitor::new(),
        );
        (client, trigger, clock, fetcher)
    }

    #[tokio::test]
    async fn tick_refetches_due_subscriptions_and_evicts_idle_entries() {
        let (client, trigger, clock, fetcher) = setup();
        let stats = client.key(Resource::Dashboard, Operation::Stats, None);
        let idle = client.key(Resource::Products, Operation::List, None);

        client.query_key(&stats).await.expect("stats");
        client.query_key(&idle).await.expect("products");
        let _watching = client.subscribe(&stats);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);

        clock.advance(Duration::from_secs(16 * 60));
        let report = run_maintenance_tick(&client, &trigger).await;

        assert_eq!(report.refetched, 1);
        assert_eq!(report.evicted, 1);
        assert!(client.store().get(&idle).is_none());
        assert_eq!(client.store().peek(&stats), Some(json!(2)));
    }

    #[tokio::test]
    async fn tick_drains_deferred_events() {
        let (client, trigger, _, _) = setup();
        let list = client.key(Resource::Orders, Operation::List, None);
        client.query_key(&list).await.expect("orders");

        trigger.trigger(
            crate::cache::EventKind::Realtime {
                kind: crate::cache::RealtimeEventKind::OrderUpdate,
                id: None,
            },
            false,
        );
        let report = run_maintenance_tick(&client, &trigger).await;

        assert!(report.consumed_events);
        assert!(client.store().get(&list).expect("list").invalidated);
    }

    #[tokio::test(start_paused = true)]
    async fn spawned_task_runs_ticks_until_stopped() {
        let (client, trigger, _, _) = setup();
        let list = client.key(Resource::Orders, Operation::List, None);
        client.query_key(&list).await.expect("orders");
        trigger.trigger(
            crate::cache::EventKind::Realtime {
                kind: crate::cache::RealtimeEventKind::OrderUpdate,
                id: None,
            },
            false,
        );

        let handle = spawn_maintenance(client.clone(), trigger, Duration::from_secs(15));
        tokio::time::sleep(Duration::from_secs(40)).await;
        assert!(client.store().get(&list).expect("list").invalidated);

        handle.stop().await;
    }
}
