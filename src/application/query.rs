//! Cached reads.
//!
//! `QueryClient` is what views call: it builds the cache key, serves fresh
//! entries from the store, and otherwise loads through the `Fetcher` with
//! retry, timeout and session-expiry handling.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use futures::future::BoxFuture;
use serde::de::DeserializeOwned;
use serde_json::Value;
use storeops_api_types::{Sanitize, decode};

use crate::cache::{CacheKey, KeyBuilder, QueryStore, Subscription};
use crate::domain::{FetchRequest, Operation, QueryParams, Resource};

use super::error::FetchError;
use super::fetch::{Fetcher, RetryPolicy, with_timeout};
use super::session::SessionMonitor;

#[derive(Clone)]
pub struct QueryClient {
    store: QueryStore,
    keys: KeyBuilder,
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    timeout: Duration,
    session: SessionMonitor,
}

impl QueryClient {
    pub fn new(
        store: QueryStore,
        fetcher: Arc<dyn Fetcher>,
        retry: RetryPolicy,
        timeout: Duration,
        session: SessionMonitor,
    ) -> Self {
        Self {
            keys: KeyBuilder::with_namespace(store.config().namespace.clone()),
            store,
            fetcher,
            retry,
            timeout,
            session,
        }
    }

    pub fn store(&self) -> &QueryStore {
        &self.store
    }

    pub fn keys(&self) -> &KeyBuilder {
        &self.keys
    }

    pub fn session(&self) -> &SessionMonitor {
        &self.session
    }

    pub fn key(
        &self,
        resource: Resource,
        operation: Operation,
        params: Option<&QueryParams>,
    ) -> CacheKey {
        self.keys.build(resource, operation, params)
    }

    pub async fn query(
        &self,
        resource: Resource,
        operation: Operation,
        params: Option<&QueryParams>,
    ) -> Result<Value, FetchError> {
        let key = self.key(resource, operation, params);
        self.query_key(&key).await
    }

    /// Read `key` with the configured request timeout.
    pub async fn query_key(&self, key: &CacheKey) -> Result<Value, FetchError> {
        self.query_with_timeout(key, self.timeout).await
    }

    pub async fn query_with_timeout(
        &self,
        key: &CacheKey,
        timeout: Duration,
    ) -> Result<Value, FetchError> {
        let request = key.fetch_request();
        request.endpoint()?;
        self.store
            .fetch_query(key, self.loader(request, timeout))
            .await
    }

    /// Read and decode into a sanitized record.
    pub async fn query_as<T>(
        &self,
        resource: Resource,
        operation: Operation,
        params: Option<&QueryParams>,
    ) -> Result<T, FetchError>
    where
        T: DeserializeOwned + Sanitize,
    {
        let value = self.query(resource, operation, params).await?;
        Ok(decode::<T>(value)?)
    }

    /// Load `key` from the backend even if the cached copy is fresh.
    pub async fn refetch(&self, key: &CacheKey) -> Result<Value, FetchError> {
        let request = key.fetch_request();
        request.endpoint()?;
        self.store
            .refetch(key, self.loader(request, self.timeout))
            .await
    }

    pub fn subscribe(&self, key: &CacheKey) -> Subscription {
        self.store.subscribe(key)
    }

    fn loader(
        &self,
        request: FetchRequest,
        timeout: Duration,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<Value, FetchError>> + Send + 'static {
        let fetcher = Arc::clone(&self.fetcher);
        let retry = self.retry.clone();
        let session = self.session.clone();
        move || load(fetcher, retry, session, request, timeout).boxed()
    }
}

async fn load(
    fetcher: Arc<dyn Fetcher>,
    retry: RetryPolicy,
    session: SessionMonitor,
    request: FetchRequest,
    timeout: Duration,
) -> Result<Value, FetchError> {
    if session.is_expired() {
        return Err(FetchError::Unauthorized {
            detail: "session expired".to_string(),
        });
    }

    let operation = format!("{}.{}", request.resource, request.operation);
    let result = retry
        .run(&operation, |_| with_timeout(timeout, fetcher.fetch(&request)))
        .await;

    if let Err(err) = &result {
        if err.is_session_expiry() {
            session.expire(format!("{operation}: {err}"));
        }
    }
    result
}
