//! Identity lifecycle binder.
//!
//! Keeps the realtime connection and channel membership in step with the
//! authenticated identity: connect and join the identity's channel on login,
//! switch channels when the identity changes, leave and disconnect on logout.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use fieldsync_core::{AuthSnapshot, AuthStore, ClientConfig, Identity};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::realtime::{ConnectionManager, JoinOutcome, Subscription};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BinderOptions {
    /// Delay before the single deferred retry of a failed join.
    pub retry_delay: Duration,
}

impl Default for BinderOptions {
    fn default() -> Self {
        Self {
            retry_delay: Duration::from_millis(2_000),
        }
    }
}

impl BinderOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            retry_delay: Duration::from_millis(config.binder.retry_delay_ms),
        }
    }
}

/// What a single auth snapshot caused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinderAction {
    /// Auth state not initialized yet.
    Waiting,
    /// Already in the right channel.
    Unchanged,
    Joined(String),
    RetryScheduled(String),
    Dropped(String),
    Disconnected,
}

#[derive(Default)]
struct BinderState {
    retry: Option<JoinHandle<()>>,
    rejoin: Option<Subscription>,
}

impl BinderState {
    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            retry.abort();
        }
    }
}

struct BinderInner {
    manager: ConnectionManager,
    auth: AuthStore,
    options: BinderOptions,
    /// Channel this binder believes it is in. Read by the reconnect handler.
    channel: Arc<RwLock<Option<String>>>,
    state: Mutex<BinderState>,
}

#[derive(Clone)]
pub struct IdentityBinder {
    inner: Arc<BinderInner>,
}

impl IdentityBinder {
    pub fn new(manager: ConnectionManager, auth: AuthStore, options: BinderOptions) -> Self {
        Self {
            inner: Arc::new(BinderInner {
                manager,
                auth,
                options,
                channel: Arc::new(RwLock::new(None)),
                state: Mutex::new(BinderState::default()),
            }),
        }
    }

    pub fn current_channel(&self) -> Option<String> {
        read_channel(&self.inner.channel)
    }

    /// Apply one auth snapshot. Transitions are serialized.
    pub async fn apply(&self, snapshot: &AuthSnapshot) -> BinderAction {
        if !snapshot.initialized {
            return BinderAction::Waiting;
        }
        match snapshot.active_identity() {
            Some(identity) => self.bind(identity, true).await,
            None => self.unbind().await,
        }
    }

    /// Watch the auth store and apply every snapshot until shutdown.
    pub fn spawn(self) -> BinderHandle {
        let mut snapshots = self.inner.auth.subscribe();
        let binder = self.clone();
        let task = tokio::spawn(async move {
            loop {
                let snapshot = snapshots.borrow_and_update().clone();
                let action = binder.apply(&snapshot).await;
                debug!(?action, "Identity binder applied auth snapshot");
                if snapshots.changed().await.is_err() {
                    break;
                }
            }
        });
        BinderHandle { binder: self, task }
    }

    async fn bind(&self, identity: &Identity, allow_retry: bool) -> BinderAction {
        let mut state = self.inner.state.lock().await;
        let manager = &self.inner.manager;

        if !manager.is_connected() {
            manager.connect(None);
        }
        if state.rejoin.is_none() {
            state.rejoin = Some(self.register_rejoin());
        }

        let target = identity.channel_name();
        let current = self.current_channel();
        if current.as_deref() == Some(target.as_str()) {
            return BinderAction::Unchanged;
        }

        if let Some(previous) = current {
            manager.leave_channel(&previous);
            self.set_channel(None);
            info!(from = %previous, to = %target, "Switching identity channel");
        }

        match manager.join_channel(&target).await {
            JoinOutcome::Joined => {
                if allow_retry {
                    state.cancel_retry();
                } else {
                    state.retry = None;
                }
                self.set_channel(Some(target.clone()));
                BinderAction::Joined(target)
            }
            JoinOutcome::Dropped if allow_retry => {
                state.cancel_retry();
                state.retry = Some(self.schedule_retry(identity.clone()));
                warn!(
                    channel = %target,
                    retry_ms = self.inner.options.retry_delay.as_millis() as u64,
                    "Channel join dropped, retry scheduled"
                );
                BinderAction::RetryScheduled(target)
            }
            JoinOutcome::Dropped => {
                warn!(channel = %target, "Channel join dropped after retry");
                BinderAction::Dropped(target)
            }
        }
    }

    async fn unbind(&self) -> BinderAction {
        let mut state = self.inner.state.lock().await;
        state.cancel_retry();
        state.rejoin = None;

        if let Some(channel) = self.take_channel() {
            self.inner.manager.leave_channel(&channel);
        }
        self.inner.manager.disconnect();
        BinderAction::Disconnected
    }

    fn register_rejoin(&self) -> Subscription {
        let manager = self.inner.manager.downgrade();
        let channel = self.inner.channel.clone();
        self.inner.manager.on("connect", move |_| {
            let Some(name) = read_channel(&channel) else {
                return;
            };
            if let Some(manager) = manager.upgrade() {
                if manager.try_join_channel(&name) {
                    info!(channel = %name, "Rejoined channel after reconnect");
                }
            }
        })
    }

    fn schedule_retry(&self, identity: Identity) -> JoinHandle<()> {
        let binder = self.clone();
        let delay = self.inner.options.retry_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            // Only retry if the same identity is still active.
            let snapshot = binder.inner.auth.snapshot();
            if snapshot.active_identity() != Some(&identity) {
                debug!("Identity changed before join retry, skipping");
                return;
            }
            let action = binder.bind(&identity, false).await;
            debug!(?action, "Deferred channel join finished");
        })
    }

    fn take_channel(&self) -> Option<String> {
        match self.inner.channel.write() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    fn set_channel(&self, channel: Option<String>) {
        match self.inner.channel.write() {
            Ok(mut slot) => *slot = channel,
            Err(poisoned) => *poisoned.into_inner() = channel,
        }
    }
}

fn read_channel(slot: &RwLock<Option<String>>) -> Option<String> {
    match slot.read() {
        Ok(channel) => channel.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

/// Running binder. Dropping it stops observation without touching the
/// connection.
pub struct BinderHandle {
    binder: IdentityBinder,
    task: JoinHandle<()>,
}

impl BinderHandle {
    pub fn binder(&self) -> &IdentityBinder {
        &self.binder
    }

    pub fn current_channel(&self) -> Option<String> {
        self.binder.current_channel()
    }

    /// Stop observing. Disconnects only when nobody is signed in; a live
    /// authenticated session is left to the next transition.
    pub async fn shutdown(self) {
        self.task.abort();
        if self.binder.inner.auth.snapshot().is_authenticated {
            let mut state = self.binder.inner.state.lock().await;
            state.cancel_retry();
            state.rejoin = None;
            debug!("Identity binder stopped, session left connected");
        } else {
            self.binder.unbind().await;
            debug!("Identity binder stopped and disconnected");
        }
    }
}

impl Drop for BinderHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}
