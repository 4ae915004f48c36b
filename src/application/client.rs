//! Wiring for the data layer.
//!
//! `DataLayer` owns one store, event queue, consumer and trigger, and hands
//! out the query client, mutation executor and realtime channel built on
//! top of them.

use std::sync::Arc;

use tracing::info;

use crate::cache::{
    CacheConsumer, CacheTrigger, EventQueue, EventSource, OptimisticCoordinator, QueryStore,
    RealtimeChannel, RealtimeConfig, RealtimeHandle,
};
use crate::config::Settings;
use crate::infra::error::InfraError;
use crate::infra::http::HttpApiClient;

use super::fetch::Fetcher;
use super::maintenance::{MaintenanceHandle, spawn_maintenance};
use super::mutations::{MutationExecutor, Mutator};
use super::query::QueryClient;
use super::session::SessionMonitor;

pub struct DataLayer {
    store: QueryStore,
    trigger: Arc<CacheTrigger>,
    query: QueryClient,
    mutations: MutationExecutor,
    session: SessionMonitor,
    events: Arc<dyn EventSource>,
    realtime: RealtimeConfig,
}

impl DataLayer {
    /// Build against the admin API named in `settings`.
    pub fn connect(settings: &Settings) -> Result<Self, InfraError> {
        let api = HttpApiClient::new(
            settings.api.base_url.as_str(),
            settings.api.token.clone(),
            settings.api.request_timeout,
        )?;
        let events = Arc::new(api.event_source(&settings.api.events_path)?);
        let api = Arc::new(api);
        info!(base_url = %settings.api.base_url, "Admin API client configured");
        Ok(Self::with_backend(settings, api.clone(), api, events))
    }

    /// Build against arbitrary backends.
    pub fn with_backend(
        settings: &Settings,
        fetcher: Arc<dyn Fetcher>,
        mutator: Arc<dyn Mutator>,
        events: Arc<dyn EventSource>,
    ) -> Self {
        let store = QueryStore::new(settings.cache.clone());
        Self::assemble(store, settings, fetcher, mutator, events)
    }

    /// Build on an existing store, e.g. one driven by a manual clock.
    pub fn assemble(
        store: QueryStore,
        settings: &Settings,
        fetcher: Arc<dyn Fetcher>,
        mutator: Arc<dyn Mutator>,
        events: Arc<dyn EventSource>,
    ) -> Self {
        let cache = store.config().clone();
        let queue = Arc::new(EventQueue::new(cache.event_queue_limit));
        let consumer = Arc::new(CacheConsumer::new(cache.clone(), store.clone(), queue.clone()));
        let trigger = Arc::new(CacheTrigger::new(cache, queue, consumer));
        let session = SessionMonitor::new();

        let query = QueryClient::new(
            store.clone(),
            fetcher,
            settings.retry.clone(),
            settings.api.request_timeout,
            session.clone(),
        );
        let mutations = MutationExecutor::new(
            mutator,
            trigger.clone(),
            OptimisticCoordinator::new(store.clone()),
            session.clone(),
            settings.api.request_timeout,
        );

        Self {
            store,
            trigger,
            query,
            mutations,
            session,
            events,
            realtime: settings.realtime.clone(),
        }
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    pub fn trigger(&self) -> &Arc<CacheTrigger> {
        &self.trigger
    }

    pub fn query(&self) -> &QueryClient {
        &self.query
    }

    pub fn mutations(&self) -> &MutationExecutor {
        &self.mutations
    }

    pub fn session(&self) -> &SessionMonitor {
        &self.session
    }

    /// Open the realtime channel. Returns `None` when it is disabled.
    pub fn open_realtime(&self) -> Option<RealtimeHandle> {
        if !self.realtime.enabled {
            info!("Realtime channel disabled by configuration");
            return None;
        }
        let channel = RealtimeChannel::new(
            self.events.clone(),
            self.trigger.clone(),
            self.realtime.clone(),
        );
        Some(channel.spawn())
    }

    pub fn spawn_maintenance(&self) -> MaintenanceHandle {
        spawn_maintenance(
            self.query.clone(),
            self.trigger.clone(),
            self.store.config().maintenance_interval(),
        )
    }
}
