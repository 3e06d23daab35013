//! Realtime connection manager.
//!
//! One process-wide transport handle with listener bookkeeping, channel
//! membership, and an observable connection status. Each transport handle is
//! tagged with a generation; callbacks from a handle that has been replaced
//! or torn down are ignored.

mod connection;
mod link;
mod listeners;

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;

use fieldsync_core::ClientConfig;
use once_cell::sync::OnceCell;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use connection::Lifecycle;
use listeners::ListenerRegistry;

pub use connection::ReconnectPolicy;
pub use link::{Connector, Frame, Link, LinkError, WsConnector};
pub use listeners::{Handler, ListenerId, Subscription};

pub const JOIN_EVENT: &str = "join-room";
pub const LEAVE_EVENT: &str = "leave-room";

static INSTANCE: OnceCell<ConnectionManager> = OnceCell::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Still not connected after the single wait; the join was dropped.
    Dropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RealtimeOptions {
    pub url: String,
    pub reconnect: ReconnectPolicy,
    pub join_retry_delay: Duration,
}

impl RealtimeOptions {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            reconnect: ReconnectPolicy::default(),
            join_retry_delay: Duration::from_millis(1_000),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            url: config.socket_url(None),
            reconnect: ReconnectPolicy::from_config(config),
            join_retry_delay: Duration::from_millis(config.realtime.join_retry_delay_ms),
        }
    }
}

struct ConnectionHandle {
    generation: u64,
    url: String,
    outbound: Option<mpsc::UnboundedSender<Frame>>,
    task: JoinHandle<()>,
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

#[derive(Default)]
struct ConnectionState {
    generation: u64,
    handle: Option<ConnectionHandle>,
    channels: BTreeSet<String>,
}

struct ManagerInner {
    connector: Arc<dyn Connector>,
    options: RealtimeOptions,
    state: Mutex<ConnectionState>,
    status: watch::Sender<ConnectionStatus>,
    listeners: Arc<ListenerRegistry>,
}

impl ManagerInner {
    fn state(&self) -> MutexGuard<'_, ConnectionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(state: &ConnectionState, generation: u64) -> bool {
        state
            .handle
            .as_ref()
            .is_some_and(|handle| handle.generation == generation)
    }
}

/// Callback sink handed to a connection task, bound to its generation.
pub(crate) struct Dispatch {
    inner: Weak<ManagerInner>,
    generation: u64,
}

impl Dispatch {
    pub(crate) fn attach(&self, outbound: mpsc::UnboundedSender<Frame>) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        let mut state = inner.state();
        match state.handle.as_mut() {
            Some(handle) if handle.generation == self.generation => {
                handle.outbound = Some(outbound);
                true
            }
            _ => false,
        }
    }

    pub(crate) fn lifecycle(&self, event: Lifecycle) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        {
            let mut state = inner.state();
            if !ManagerInner::is_current(&state, self.generation) {
                debug!(generation = self.generation, event = event.event_name(), "Ignoring stale lifecycle event");
                return false;
            }
            let url = state.handle.as_ref().map(|h| h.url.clone()).unwrap_or_default();
            let status = match &event {
                Lifecycle::Connected | Lifecycle::Reconnected { .. } => ConnectionStatus::Connected,
                Lifecycle::Disconnected { .. }
                | Lifecycle::ConnectError { .. }
                | Lifecycle::ReconnectFailed => ConnectionStatus::Disconnected,
                Lifecycle::ReconnectAttempt { attempt } => {
                    ConnectionStatus::Reconnecting { attempt: *attempt }
                }
            };
            if let Lifecycle::Disconnected { .. } = event {
                if let Some(handle) = state.handle.as_mut() {
                    handle.outbound = None;
                }
                state.channels.clear();
            }
            inner.status.send_replace(status);

            match &event {
                Lifecycle::Connected => info!(url = %url, "Realtime connected"),
                Lifecycle::Disconnected { reason } => warn!(url = %url, reason = %reason, "Realtime disconnected"),
                Lifecycle::ConnectError { message } => error!(url = %url, error = %message, "Realtime connection error"),
                Lifecycle::ReconnectAttempt { attempt } => info!(url = %url, attempt, "Realtime reconnect attempt"),
                Lifecycle::Reconnected { attempt } => info!(url = %url, attempt, "Realtime reconnected"),
                Lifecycle::ReconnectFailed => error!(url = %url, "Realtime reconnection failed, giving up"),
            }
        }
        inner.listeners.dispatch(event.event_name(), &event.payload());
        true
    }

    pub(crate) fn frame(&self, frame: Frame) -> bool {
        let Some(inner) = self.inner.upgrade() else {
            return false;
        };
        if !ManagerInner::is_current(&inner.state(), self.generation) {
            return false;
        }
        let handled = inner.listeners.dispatch(&frame.event, &frame.data);
        if handled == 0 {
            debug!(event = %frame.event, "No listener for realtime event");
        }
        true
    }
}

/// Cheap to clone; all clones share one transport handle.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

/// Non-owning manager reference for handlers stored inside the manager.
#[derive(Clone)]
pub struct WeakConnectionManager {
    inner: Weak<ManagerInner>,
}

impl WeakConnectionManager {
    pub fn upgrade(&self) -> Option<ConnectionManager> {
        self.inner.upgrade().map(|inner| ConnectionManager { inner })
    }
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn Connector>, options: RealtimeOptions) -> Self {
        let (status, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            inner: Arc::new(ManagerInner {
                connector,
                options,
                state: Mutex::new(ConnectionState::default()),
                status,
                listeners: Arc::new(ListenerRegistry::default()),
            }),
        }
    }

    pub fn from_config(config: &ClientConfig) -> Self {
        let connector = WsConnector::new(config.auth.bearer_token.clone());
        Self::new(Arc::new(connector), RealtimeOptions::from_config(config))
    }

    /// Register the process-wide manager. Fails with the given manager if
    /// one is already installed.
    pub fn install(manager: ConnectionManager) -> Result<(), ConnectionManager> {
        INSTANCE.set(manager)
    }

    pub fn instance() -> Option<&'static ConnectionManager> {
        INSTANCE.get()
    }

    pub fn downgrade(&self) -> WeakConnectionManager {
        WeakConnectionManager {
            inner: Arc::downgrade(&self.inner),
        }
    }

    pub fn options(&self) -> &RealtimeOptions {
        &self.inner.options
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.inner.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.inner.status.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.status() == ConnectionStatus::Connected
    }

    /// Open the transport if there is no live handle. A handle that is
    /// connecting or reconnecting counts as live; a dead one is torn down
    /// and replaced.
    pub fn connect(&self, url: Option<&str>) {
        let mut state = self.inner.state();
        if state.handle.is_some() && self.status() != ConnectionStatus::Disconnected {
            debug!(status = ?self.status(), "Realtime connect skipped, handle is live");
            return;
        }

        if state.handle.take().is_some() {
            debug!("Tearing down stale realtime handle");
        }
        state.channels.clear();

        state.generation += 1;
        let generation = state.generation;
        let url = url.unwrap_or(self.inner.options.url.as_str()).to_string();
        info!(url = %url, generation, "Realtime connecting");
        self.inner.status.send_replace(ConnectionStatus::Connecting);

        let dispatch = Dispatch {
            inner: Arc::downgrade(&self.inner),
            generation,
        };
        let task = tokio::spawn(connection::run(
            self.inner.connector.clone(),
            url.clone(),
            self.inner.options.reconnect,
            dispatch,
        ));
        state.handle = Some(ConnectionHandle {
            generation,
            url,
            outbound: None,
            task,
        });
    }

    /// Idempotent. Removes every listener, closes the transport, and forgets
    /// channel membership.
    pub fn disconnect(&self) {
        let handle = {
            let mut state = self.inner.state();
            state.channels.clear();
            state.handle.take()
        };
        self.inner.listeners.clear();
        if let Some(handle) = handle {
            info!(url = %handle.url, generation = handle.generation, "Realtime disconnected by client");
            drop(handle);
        }
        self.inner.status.send_replace(ConnectionStatus::Disconnected);
    }

    pub fn on<F>(&self, event: &str, handler: F) -> Subscription
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        let id = self.inner.listeners.add(event, Arc::new(handler));
        Subscription::new(event, id, &self.inner.listeners)
    }

    pub fn off(&self, event: &str, id: ListenerId) -> bool {
        self.inner.listeners.remove(event, id)
    }

    pub fn listener_count(&self, event: &str) -> usize {
        self.inner.listeners.count(event)
    }

    /// Send an event. Returns `false` and drops the event when not connected.
    pub fn emit(&self, event: &str, payload: Value) -> bool {
        let outbound = {
            let state = self.inner.state();
            state.handle.as_ref().and_then(|h| h.outbound.clone())
        };
        match outbound {
            Some(outbound) if self.is_connected() => {
                outbound.send(Frame::new(event, payload)).is_ok()
            }
            _ => {
                warn!(event, "Realtime not connected, event dropped");
                false
            }
        }
    }

    /// Join immediately if connected; returns `false` otherwise.
    pub fn try_join_channel(&self, name: &str) -> bool {
        if !self.emit(JOIN_EVENT, Value::String(name.to_string())) {
            return false;
        }
        self.inner.state().channels.insert(name.to_string());
        info!(channel = name, "Joined channel");
        true
    }

    /// Join a channel, connecting first if needed and waiting once for the
    /// connection before giving up.
    pub async fn join_channel(&self, name: &str) -> JoinOutcome {
        if self.is_connected() && self.try_join_channel(name) {
            return JoinOutcome::Joined;
        }

        self.connect(None);
        tokio::time::sleep(self.inner.options.join_retry_delay).await;

        if self.is_connected() && self.try_join_channel(name) {
            JoinOutcome::Joined
        } else {
            warn!(channel = name, "Realtime still not connected, join dropped");
            JoinOutcome::Dropped
        }
    }

    pub fn leave_channel(&self, name: &str) -> bool {
        let was_member = self.inner.state().channels.remove(name);
        if !self.is_connected() {
            debug!(channel = name, "Realtime not connected, leave is local only");
            return was_member;
        }
        self.emit(LEAVE_EVENT, Value::String(name.to_string()));
        info!(channel = name, "Left channel");
        was_member
    }

    pub fn channels(&self) -> Vec<String> {
        self.inner.state().channels.iter().cloned().collect()
    }
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("url", &self.inner.options.url)
            .field("status", &self.status())
            .field("channels", &self.channels())
            .finish()
    }
}
