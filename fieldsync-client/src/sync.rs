//! Event-driven cache synchronizer.
//!
//! Applies `<kind>-created` / `<kind>-updated` events from the realtime
//! connection to the query cache in place, so cached collections stay current
//! without refetching.

use std::sync::Arc;

use fieldsync_cache::{PatchOptions, PatchOutcome, QueryCache, QueryKey};
use fieldsync_core::{owner_id, DomainEvent};
use tracing::{debug, warn};

use crate::realtime::{ConnectionManager, Subscription};

/// Per-collection outcomes of applying one event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub outcomes: Vec<(QueryKey, PatchOutcome)>,
}

impl SyncReport {
    pub fn applied(&self) -> usize {
        self.count(PatchOutcome::Applied)
    }

    pub fn conflicts(&self) -> usize {
        self.count(PatchOutcome::Conflict)
    }

    pub fn is_noop(&self) -> bool {
        self.applied() == 0
    }

    fn count(&self, outcome: PatchOutcome) -> usize {
        self.outcomes.iter().filter(|(_, o)| *o == outcome).count()
    }
}

/// Apply a single domain event to the query cache.
///
/// Created entities are prepended to the root collection of their kind and,
/// for owned kinds, to the owner-scoped collection. Updated entities are
/// merged into every cached collection under the kind's root. Collections
/// that are not cached are never created.
pub fn apply_event(cache: &QueryCache, event: &DomainEvent, options: PatchOptions) -> SyncReport {
    let kind = event.kind();
    let entity = event.entity();
    let mut report = SyncReport::default();

    match event {
        DomainEvent::EntityCreated { .. } => {
            let mut targets = vec![QueryKey::collection(kind.collection())];
            if let Some(field) = kind.owner_field() {
                if let Some(owner) = owner_id(entity, field, cache.id_field()) {
                    targets.push(QueryKey::owned(kind.collection(), field, owner));
                }
            }
            for key in targets {
                let outcome = cache.insert_entity(&key, entity, options);
                report.outcomes.push((key, outcome));
            }
        }
        DomainEvent::EntityUpdated { .. } => {
            for key in cache.keys_with_root(kind.collection()) {
                let outcome = cache.patch_entity(&key, entity, options);
                report.outcomes.push((key, outcome));
            }
        }
    }

    if report.outcomes.iter().any(|(_, o)| *o == PatchOutcome::MissingId) {
        warn!(event = %event.event_name(), "Realtime entity has no id, ignored");
    } else {
        debug!(
            event = %event.event_name(),
            applied = report.applied(),
            conflicts = report.conflicts(),
            "Applied realtime event to query cache"
        );
    }
    report
}

/// Listener registrations feeding [`apply_event`]. Released on
/// [`teardown`](Self::teardown) or drop.
pub struct CacheSynchronizer {
    subscriptions: Vec<Subscription>,
}

impl CacheSynchronizer {
    pub fn attach(manager: &ConnectionManager, cache: Arc<QueryCache>, options: PatchOptions) -> Self {
        let subscriptions = DomainEvent::wire_names()
            .into_iter()
            .map(|name| {
                let cache = cache.clone();
                let event_name = name.clone();
                manager.on(&name, move |payload| {
                    match DomainEvent::from_wire(&event_name, payload.clone()) {
                        Some(event) => {
                            apply_event(&cache, &event, options);
                        }
                        None => debug!(event = %event_name, "Unrecognized realtime event"),
                    }
                })
            })
            .collect();
        Self { subscriptions }
    }

    pub fn is_attached(&self) -> bool {
        self.subscriptions.iter().any(Subscription::is_active)
    }

    pub fn teardown(&mut self) {
        for subscription in &mut self.subscriptions {
            subscription.unsubscribe();
        }
        self.subscriptions.clear();
    }
}
