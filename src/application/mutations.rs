//! Backend writes.
//!
//! `MutationExecutor` runs a create/update/delete, and on success publishes
//! the cache event that invalidates affected reads. Writes are not retried
//! automatically; a failed optimistic write hands the caller a
//! `RollbackNotice` it can pass back to `retry`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument, warn};

use crate::cache::{CacheKey, CacheTrigger, OptimisticCoordinator, RollbackNotice};
use crate::domain::{MutationAction, MutationRequest, Operation};

use super::error::FetchError;
use super::fetch::with_timeout;
use super::session::SessionMonitor;

/// Performs one backend write and returns the unwrapped payload.
#[async_trait]
pub trait Mutator: Send + Sync {
    async fn mutate(&self, request: &MutationRequest) -> Result<Value, FetchError>;
}

/// A speculative value for one cached read, applied while a write is in
/// flight.
#[derive(Debug, Clone)]
pub struct OptimisticWrite {
    pub key: CacheKey,
    pub value: Value,
}

pub struct MutationExecutor {
    mutator: Arc<dyn Mutator>,
    trigger: Arc<CacheTrigger>,
    optimistic: OptimisticCoordinator,
    session: SessionMonitor,
    timeout: Duration,
}

impl MutationExecutor {
    pub fn new(
        mutator: Arc<dyn Mutator>,
        trigger: Arc<CacheTrigger>,
        optimistic: OptimisticCoordinator,
        session: SessionMonitor,
        timeout: Duration,
    ) -> Self {
        Self {
            mutator,
            trigger,
            optimistic,
            session,
            timeout,
        }
    }

    pub fn optimistic(&self) -> &OptimisticCoordinator {
        &self.optimistic
    }

    /// Run `request`; on success invalidate the reads it affects.
    #[instrument(skip(self, request), fields(resource = %request.resource, action = %request.action))]
    pub async fn execute(&self, request: &MutationRequest) -> Result<Value, FetchError> {
        let data = self.send(request).await?;
        self.invalidate_for(request, &data);
        Ok(data)
    }

    /// Run `request` with `write` applied to the store until the backend
    /// answers. On success a detail key for the written entity takes the
    /// server's copy; any other key keeps the speculative value until the
    /// invalidation that follows refetches it. Failure restores the previous
    /// value and returns the error; the rollback notice is also broadcast to
    /// `OptimisticCoordinator` subscribers.
    #[instrument(skip(self, request, write), fields(resource = %request.resource, action = %request.action, key = %write.key))]
    pub async fn execute_optimistic(
        &self,
        request: &MutationRequest,
        write: OptimisticWrite,
    ) -> Result<Value, FetchError> {
        let patch = self.optimistic.begin(&write.key, write.value);
        match self.send(request).await {
            Ok(data) => {
                let authoritative = if data.is_null() || !holds_entity(&write.key, request) {
                    patch.speculative().clone()
                } else {
                    data.clone()
                };
                self.optimistic.commit(patch, authoritative);
                self.invalidate_for(request, &data);
                Ok(data)
            }
            Err(err) => {
                self.optimistic.rollback(patch, request.clone(), err.clone());
                Err(err)
            }
        }
    }

    /// Re-issue a rolled-back write with the same speculative value.
    pub async fn retry(&self, notice: &RollbackNotice) -> Result<Value, FetchError> {
        info!(key = %notice.key, "Retrying rolled-back mutation");
        self.execute_optimistic(
            &notice.request,
            OptimisticWrite {
                key: notice.key.clone(),
                value: notice.speculative.clone(),
            },
        )
        .await
    }

    async fn send(&self, request: &MutationRequest) -> Result<Value, FetchError> {
        request.endpoint()?;
        let result = with_timeout(self.timeout, self.mutator.mutate(request)).await;
        if let Err(err) = &result {
            warn!(error = %err, "Mutation failed");
            if err.is_session_expiry() {
                self.session.expire(format!(
                    "{} {}: {err}",
                    request.action, request.resource
                ));
            }
        }
        result
    }

    fn invalidate_for(&self, request: &MutationRequest, data: &Value) {
        let created_id = match request.action {
            MutationAction::Create => entity_id(data),
            MutationAction::Update | MutationAction::Delete => None,
        };
        let id = request.id.as_deref().or(created_id.as_deref());
        self.trigger
            .mutation_succeeded(request.resource, request.action, id);
    }
}

/// Whether `key` caches the single entity `request` writes.
fn holds_entity(key: &CacheKey, request: &MutationRequest) -> bool {
    if key.resource() != request.resource {
        return false;
    }
    match (key.operation(), request.id.as_deref()) {
        (Operation::Detail(cached), Some(id)) => cached == id,
        (Operation::Detail(_), None) => true,
        _ => false,
    }
}

fn entity_id(data: &Value) -> Option<String> {
    match data.get("id")? {
        Value::String(id) => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
