//! Event listener registry and subscription handles.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use serde_json::Value;

pub type Handler = Arc<dyn Fn(&Value) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Default)]
pub(crate) struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<(ListenerId, Handler)>>>,
}

impl ListenerRegistry {
    pub(crate) fn add(&self, event: &str, handler: Handler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners
            .entry(event.to_string())
            .or_default()
            .push((id, handler));
        id
    }

    pub(crate) fn remove(&self, event: &str, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        let Some(handlers) = listeners.get_mut(event) else {
            return false;
        };
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        let removed = handlers.len() != before;
        if handlers.is_empty() {
            listeners.remove(event);
        }
        removed
    }

    pub(crate) fn clear(&self) {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    pub(crate) fn contains(&self, event: &str, id: ListenerId) -> bool {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .is_some_and(|handlers| handlers.iter().any(|(existing, _)| *existing == id))
    }

    pub(crate) fn count(&self, event: &str) -> usize {
        self.listeners
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(event)
            .map_or(0, Vec::len)
    }

    /// Invoke every handler for `event`. Handlers run outside the lock so
    /// they may register or remove listeners themselves.
    pub(crate) fn dispatch(&self, event: &str, payload: &Value) -> usize {
        let handlers: Vec<Handler> = {
            let listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            match listeners.get(event) {
                Some(handlers) => handlers.iter().map(|(_, h)| h.clone()).collect(),
                None => return 0,
            }
        };
        for handler in &handlers {
            handler(payload);
        }
        handlers.len()
    }
}

/// Handle for a registered listener. Unsubscribes when dropped.
#[must_use = "dropping a Subscription removes the listener"]
pub struct Subscription {
    event: String,
    id: ListenerId,
    registry: Weak<ListenerRegistry>,
    active: bool,
}

impl Subscription {
    pub(crate) fn new(event: &str, id: ListenerId, registry: &Arc<ListenerRegistry>) -> Self {
        Self {
            event: event.to_string(),
            id,
            registry: Arc::downgrade(registry),
            active: true,
        }
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    pub fn event(&self) -> &str {
        &self.event
    }

    /// `false` once unsubscribed, or once the registry dropped the listener
    /// (e.g. on `ConnectionManager::disconnect`).
    pub fn is_active(&self) -> bool {
        self.active
            && self
                .registry
                .upgrade()
                .is_some_and(|registry| registry.contains(&self.event, self.id))
    }

    /// Idempotent.
    pub fn unsubscribe(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(&self.event, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("event", &self.event)
            .field("id", &self.id)
            .field("active", &self.active)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    fn counter() -> (Arc<AtomicUsize>, Handler) {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = hits.clone();
        (
            hits,
            Arc::new(move |_: &Value| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        )
    }

    #[test]
    fn test_dispatch_reaches_only_named_event() {
        let registry = ListenerRegistry::default();
        let (hits, handler) = counter();
        registry.add("claim-updated", handler);

        assert_eq!(registry.dispatch("claim-updated", &json!({})), 1);
        assert_eq!(registry.dispatch("farmer-updated", &json!({})), 0);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_subscription_unsubscribes_once_and_on_drop() {
        let registry = Arc::new(ListenerRegistry::default());
        let (_, first) = counter();
        let (_, second) = counter();

        let id = registry.add("connect", first);
        let mut sub = Subscription::new("connect", id, &registry);
        let id = registry.add("connect", second);
        let other = Subscription::new("connect", id, &registry);
        assert_eq!(registry.count("connect"), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert!(!sub.is_active());
        assert_eq!(registry.count("connect"), 1);

        drop(other);
        assert_eq!(registry.count("connect"), 0);
    }

    #[test]
    fn test_subscription_inactive_after_registry_clear() {
        let registry = Arc::new(ListenerRegistry::default());
        let (_, handler) = counter();
        let id = registry.add("claim-updated", handler);
        let sub = Subscription::new("claim-updated", id, &registry);
        assert!(sub.is_active());

        registry.clear();
        assert!(!sub.is_active());

        drop(registry);
        assert!(!sub.is_active());
    }

    #[test]
    fn test_handler_may_mutate_registry() {
        let registry = Arc::new(ListenerRegistry::default());
        let inner = Arc::downgrade(&registry);
        registry.add(
            "connect",
            Arc::new(move |_: &Value| {
                if let Some(registry) = inner.upgrade() {
                    registry.clear();
                }
            }),
        );
        assert_eq!(registry.dispatch("connect", &Value::Null), 1);
        assert_eq!(registry.count("connect"), 0);
    }
}
