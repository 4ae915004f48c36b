//! Invalidation planning.
//!
//! Maps mutations and realtime pushes to the key prefixes they make stale,
//! and merges a batch of events into one plan.

use std::collections::{BTreeSet, HashSet};
use std::fmt;

use crate::domain::{MutationAction, Resource};

use super::events::{CacheEvent, EventKind, RealtimeEventKind};
use super::keys::{KeyBuilder, KeyPrefix};

/// Prefixes to mark stale and prefixes to drop outright.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct InvalidationPlan {
    pub invalidate: BTreeSet<KeyPrefix>,
    pub evict: BTreeSet<KeyPrefix>,
}

impl fmt::Display for InvalidationPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let join = |set: &BTreeSet<KeyPrefix>| {
            set.iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        };
        write!(
            f,
            "InvalidationPlan {{ invalidate: [{}], evict: [{}] }}",
            join(&self.invalidate),
            join(&self.evict)
        )
    }
}

impl InvalidationPlan {
    /// Keys made stale by a successful mutation.
    ///
    /// | action | invalidate                                   | evict              |
    /// |--------|----------------------------------------------|--------------------|
    /// | create | `{r}.list`, `{r}.stats`, `dashboard`          |                    |
    /// | update | `{r}.detail.{id}`, `{r}.list`, `dashboard`    |                    |
    /// | delete | `{r}.list`, `{r}.stats`, `dashboard`          | `{r}.detail.{id}`  |
    ///
    /// An update without an id invalidates every detail of the resource; a
    /// delete without one does the same instead of evicting.
    pub fn for_mutation(
        keys: &KeyBuilder,
        resource: Resource,
        action: MutationAction,
        id: Option<&str>,
    ) -> Self {
        let mut plan = Self::default();
        plan.invalidate.insert(keys.resource(Resource::Dashboard));
        if resource == Resource::Dashboard {
            return plan;
        }

        plan.invalidate.insert(keys.operation(resource, "list"));
        match action {
            MutationAction::Create => {
                plan.invalidate.insert(keys.operation(resource, "stats"));
            }
            MutationAction::Update => {
                plan.invalidate.insert(detail_prefix(keys, resource, id));
            }
            MutationAction::Delete => {
                plan.invalidate.insert(keys.operation(resource, "stats"));
                match id {
                    Some(id) => {
                        plan.evict.insert(keys.detail(resource, id));
                    }
                    None => {
                        plan.invalidate.insert(keys.operation(resource, "detail"));
                    }
                }
            }
        }
        plan
    }

    /// Realtime pushes are treated as updates of the resource they name.
    pub fn for_realtime(keys: &KeyBuilder, kind: RealtimeEventKind, id: Option<&str>) -> Self {
        match kind.resource() {
            Some(resource) => Self::for_mutation(keys, resource, MutationAction::Update, id),
            None => Self::default(),
        }
    }

    /// Merge a batch of events into one plan.
    ///
    /// - Deduplicates by event id
    /// - Every remaining event contributes its full plan; plans only grow
    /// - A prefix that is evicted is not also invalidated
    pub fn from_events(keys: &KeyBuilder, events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();

        for event in events.into_iter().filter(|event| seen_ids.insert(event.id)) {
            let event_plan = match event.kind {
                EventKind::Mutation {
                    resource,
                    action,
                    id,
                } => Self::for_mutation(keys, resource, action, id.as_deref()),
                EventKind::Realtime { kind, id } => Self::for_realtime(keys, kind, id.as_deref()),
            };
            plan.merge(event_plan);
        }

        let evicted = plan.evict.clone();
        plan.invalidate.retain(|prefix| !evicted.contains(prefix));
        plan
    }

    /// Plan covering every key in the namespace.
    pub fn everything(keys: &KeyBuilder) -> Self {
        let mut plan = Self::default();
        plan.invalidate.insert(keys.namespace_prefix());
        plan
    }

    pub fn merge(&mut self, other: Self) {
        self.invalidate.extend(other.invalidate);
        self.evict.extend(other.evict);
    }

    pub fn is_empty(&self) -> bool {
        self.invalidate.is_empty() && self.evict.is_empty()
    }
}

fn detail_prefix(keys: &KeyBuilder, resource: Resource, id: Option<&str>) -> KeyPrefix {
    match id {
        Some(id) => keys.detail(resource, id),
        None => keys.operation(resource, "detail"),
    }
}
