//! Query-keyed collection cache.
//!
//! Collections are ordered lists of JSON entities addressed by a [`QueryKey`]
//! such as `claims` or `claims/farmer/42`. Patches from the realtime channel
//! go through [`QueryCache::insert_entity`] and [`QueryCache::patch_entity`],
//! which refuse to touch a collection with an in-flight local mutation unless
//! forced.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use fieldsync_core::{entity_id, shallow_merge, DEFAULT_ID_FIELD};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Root collection, e.g. `claims`.
    pub fn collection(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// Owner-scoped collection, e.g. `claims/farmer/42`.
    pub fn owned(
        collection: impl Into<String>,
        owner_field: impl Into<String>,
        owner_id: impl Into<String>,
    ) -> Self {
        Self(vec![collection.into(), owner_field.into(), owner_id.into()])
    }

    pub fn root(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or("")
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PatchOptions {
    /// Apply even while a local mutation on the collection is in flight.
    pub force: bool,
}

impl PatchOptions {
    pub fn forced() -> Self {
        Self { force: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    Applied,
    /// Collection not cached, or (for updates) entity not in it.
    Untouched,
    /// Skipped because a local mutation on the collection is in flight.
    Conflict,
    /// Incoming entity carries no identifier.
    MissingId,
}

/// Marks a collection as having a local write in flight until dropped.
#[must_use = "the mutation is only tracked while the guard is alive"]
pub struct MutationGuard {
    key: QueryKey,
    in_flight: Arc<Mutex<HashMap<QueryKey, usize>>>,
}

impl MutationGuard {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

impl Drop for MutationGuard {
    fn drop(&mut self) {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            if let Some(count) = in_flight.get_mut(&self.key) {
                *count -= 1;
                if *count == 0 {
                    in_flight.remove(&self.key);
                }
            }
        }
    }
}

pub struct QueryCache {
    records: RwLock<HashMap<QueryKey, Vec<Value>>>,
    in_flight: Arc<Mutex<HashMap<QueryKey, usize>>>,
    id_field: String,
    changes: broadcast::Sender<QueryKey>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self::with_id_field(DEFAULT_ID_FIELD)
    }

    pub fn with_id_field(id_field: impl Into<String>) -> Self {
        let (changes, _rx) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            records: RwLock::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            id_field: id_field.into(),
            changes,
        }
    }

    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// Receives the key of every collection that changes.
    pub fn subscribe(&self) -> broadcast::Receiver<QueryKey> {
        self.changes.subscribe()
    }

    /// Store a freshly fetched collection, replacing any previous contents.
    pub fn set_collection(&self, key: QueryKey, entities: Vec<Value>) {
        if let Ok(mut records) = self.records.write() {
            records.insert(key.clone(), entities);
        }
        self.notify(key);
    }

    pub fn collection(&self, key: &QueryKey) -> Option<Vec<Value>> {
        self.records.read().ok()?.get(key).cloned()
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        self.records
            .read()
            .map(|records| records.contains_key(key))
            .unwrap_or(false)
    }

    /// Drop every cached collection, notifying each removed key.
    pub fn clear(&self) {
        let mut removed: Vec<QueryKey> = match self.records.write() {
            Ok(mut records) => records.drain().map(|(key, _)| key).collect(),
            Err(_) => return,
        };
        removed.sort();
        for key in removed {
            self.notify(key);
        }
    }

    /// Cached keys whose first segment is `root`, in sorted order.
    pub fn keys_with_root(&self, root: &str) -> Vec<QueryKey> {
        let mut keys: Vec<QueryKey> = self
            .records
            .read()
            .map(|records| {
                records
                    .keys()
                    .filter(|key| key.root() == root)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn begin_mutation(&self, key: QueryKey) -> MutationGuard {
        if let Ok(mut in_flight) = self.in_flight.lock() {
            *in_flight.entry(key.clone()).or_insert(0) += 1;
        }
        MutationGuard {
            key,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn is_mutating(&self, key: &QueryKey) -> bool {
        self.in_flight
            .lock()
            .map(|in_flight| in_flight.contains_key(key))
            .unwrap_or(false)
    }

    /// Created-entity semantics: prepend to an existing collection.
    ///
    /// Never creates the collection. If an entity with the same id is already
    /// present (e.g. inserted optimistically) it is merged in place instead.
    pub fn insert_entity(&self, key: &QueryKey, entity: &Value, options: PatchOptions) -> PatchOutcome {
        let Some(id) = entity_id(entity, &self.id_field) else {
            return PatchOutcome::MissingId;
        };
        if self.blocked(key, options) {
            return PatchOutcome::Conflict;
        }

        let outcome = match self.records.write() {
            Ok(mut records) => match records.get_mut(key) {
                Some(entities) => {
                    match position_of(entities, &id, &self.id_field) {
                        Some(index) => {
                            entities[index] = shallow_merge(&entities[index], entity);
                        }
                        None => entities.insert(0, entity.clone()),
                    }
                    PatchOutcome::Applied
                }
                None => PatchOutcome::Untouched,
            },
            Err(_) => PatchOutcome::Untouched,
        };

        if outcome == PatchOutcome::Applied {
            self.notify(key.clone());
        }
        outcome
    }

    /// Updated-entity semantics: shallow-merge into the entity with the same
    /// id. Absent entities are not inserted.
    pub fn patch_entity(&self, key: &QueryKey, entity: &Value, options: PatchOptions) -> PatchOutcome {
        let Some(id) = entity_id(entity, &self.id_field) else {
            return PatchOutcome::MissingId;
        };
        if self.blocked(key, options) {
            return PatchOutcome::Conflict;
        }

        let outcome = match self.records.write() {
            Ok(mut records) => match records.get_mut(key) {
                Some(entities) => match position_of(entities, &id, &self.id_field) {
                    Some(index) => {
                        entities[index] = shallow_merge(&entities[index], entity);
                        PatchOutcome::Applied
                    }
                    None => PatchOutcome::Untouched,
                },
                None => PatchOutcome::Untouched,
            },
            Err(_) => PatchOutcome::Untouched,
        };

        if outcome == PatchOutcome::Applied {
            self.notify(key.clone());
        }
        outcome
    }

    fn blocked(&self, key: &QueryKey, options: PatchOptions) -> bool {
        if options.force || !self.is_mutating(key) {
            return false;
        }
        debug!(key = %key, "Skipping patch while a local mutation is in flight");
        true
    }

    fn notify(&self, key: QueryKey) {
        // No subscribers is fine.
        let _ = self.changes.send(key);
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn position_of(entities: &[Value], id: &str, id_field: &str) -> Option<usize> {
    entities
        .iter()
        .position(|entity| entity_id(entity, id_field).as_deref() == Some(id))
}
