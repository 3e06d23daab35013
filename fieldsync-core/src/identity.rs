//! Identity state observed by the realtime layer.
//!
//! The credential store itself lives outside this workspace. What the sync
//! layer needs from it is the `{is_authenticated, identity, initialized}`
//! triple, published here through a `watch` channel so observers always see
//! the latest value and never a backlog.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;

/// Broadcast channel shared by every administrator.
pub const ADMIN_CHANNEL: &str = "admin-room";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Farmer,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Farmer => "farmer",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Identity {
    pub id: String,
    pub role: Role,
}

impl Identity {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }

    /// Name of the channel this identity receives its updates on.
    ///
    /// Administrators share the role-scoped [`ADMIN_CHANNEL`]; everyone else
    /// gets an identity-scoped `<role>-<id>` channel.
    pub fn channel_name(&self) -> String {
        match self.role {
            Role::Admin => ADMIN_CHANNEL.to_string(),
            role => format!("{}-{}", role, self.id),
        }
    }
}

/// Point-in-time view of the auth store.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthSnapshot {
    pub is_authenticated: bool,
    pub identity: Option<Identity>,
    /// False until the store has been hydrated from wherever credentials live.
    pub initialized: bool,
}

impl AuthSnapshot {
    /// The identity, but only while authenticated.
    pub fn active_identity(&self) -> Option<&Identity> {
        if self.is_authenticated {
            self.identity.as_ref()
        } else {
            None
        }
    }
}

/// Observable auth state with `login` / `logout` transitions.
#[derive(Clone)]
pub struct AuthStore {
    tx: Arc<watch::Sender<AuthSnapshot>>,
}

impl AuthStore {
    /// New store in the not-yet-hydrated state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(AuthSnapshot::default());
        Self { tx: Arc::new(tx) }
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.tx.subscribe()
    }

    /// Mark hydration complete without changing who is logged in.
    pub fn mark_initialized(&self) {
        self.tx.send_if_modified(|state| {
            if state.initialized {
                return false;
            }
            state.initialized = true;
            true
        });
    }

    pub fn login(&self, identity: Identity) {
        self.tx.send_modify(|state| {
            state.is_authenticated = true;
            state.identity = Some(identity);
            state.initialized = true;
        });
    }

    pub fn logout(&self) {
        self.tx.send_modify(|state| {
            state.is_authenticated = false;
            state.identity = None;
        });
    }
}

impl Default for AuthStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admin_uses_role_channel() {
        let admin = Identity::new("7", Role::Admin);
        assert_eq!(admin.channel_name(), "admin-room");
    }

    #[test]
    fn test_farmer_uses_identity_channel() {
        let farmer = Identity::new("42", Role::Farmer);
        assert_eq!(farmer.channel_name(), "farmer-42");
    }

    #[test]
    fn test_login_logout_transitions() {
        let store = AuthStore::new();
        let rx = store.subscribe();
        assert!(!rx.borrow().initialized);

        store.login(Identity::new("42", Role::Farmer));
        let snapshot = store.snapshot();
        assert!(snapshot.is_authenticated);
        assert!(snapshot.initialized);
        assert_eq!(snapshot.active_identity().map(|i| i.id.as_str()), Some("42"));

        store.logout();
        let snapshot = rx.borrow().clone();
        assert!(!snapshot.is_authenticated);
        assert!(snapshot.identity.is_none());
        assert!(snapshot.initialized);
    }

    #[test]
    fn test_mark_initialized_is_idempotent() {
        let store = AuthStore::new();
        let mut rx = store.subscribe();
        store.mark_initialized();
        assert!(rx.has_changed().unwrap_or(false));
        rx.borrow_and_update();
        store.mark_initialized();
        assert!(!rx.has_changed().unwrap_or(true));
    }

    #[test]
    fn test_role_serde() {
        let identity: Identity =
            serde_json::from_str(r#"{"id":"9","role":"admin"}"#).unwrap();
        assert_eq!(identity.role, Role::Admin);
    }
}
