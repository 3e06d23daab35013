//! Connection task: opens the link, pumps inbound frames, and reconnects
//! with capped exponential backoff.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_core::ClientConfig;
use serde_json::Value;

use super::link::{Connector, Link};
use super::Dispatch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(1_000),
            max_delay: Duration::from_millis(5_000),
        }
    }
}

impl ReconnectPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            max_attempts: config.realtime.reconnection_attempts,
            base_delay: Duration::from_millis(config.realtime.reconnection_delay_ms),
            max_delay: Duration::from_millis(config.realtime.reconnection_delay_max_ms),
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        self.base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay)
    }
}

/// Transport lifecycle, surfaced to listeners under [`Lifecycle::event_name`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Lifecycle {
    Connected,
    Disconnected { reason: String },
    ConnectError { message: String },
    ReconnectAttempt { attempt: u32 },
    Reconnected { attempt: u32 },
    ReconnectFailed,
}

impl Lifecycle {
    pub(crate) fn event_name(&self) -> &'static str {
        match self {
            Lifecycle::Connected => "connect",
            Lifecycle::Disconnected { .. } => "disconnect",
            Lifecycle::ConnectError { .. } => "connect_error",
            Lifecycle::ReconnectAttempt { .. } => "reconnect_attempt",
            Lifecycle::Reconnected { .. } => "reconnect",
            Lifecycle::ReconnectFailed => "reconnect_failed",
        }
    }

    pub(crate) fn payload(&self) -> Value {
        match self {
            Lifecycle::Connected | Lifecycle::ReconnectFailed => Value::Null,
            Lifecycle::Disconnected { reason } => Value::String(reason.clone()),
            Lifecycle::ConnectError { message } => Value::String(message.clone()),
            Lifecycle::ReconnectAttempt { attempt } | Lifecycle::Reconnected { attempt } => {
                Value::from(*attempt)
            }
        }
    }
}

/// Runs until the reconnect budget is spent or the handle goes stale.
pub(crate) async fn run(
    connector: Arc<dyn Connector>,
    url: String,
    policy: ReconnectPolicy,
    dispatch: Dispatch,
) {
    // Consecutive failures since the last successful open.
    let mut failures: u32 = 0;

    loop {
        if failures > 0 {
            if failures > policy.max_attempts {
                dispatch.lifecycle(Lifecycle::ReconnectFailed);
                return;
            }
            if !dispatch.lifecycle(Lifecycle::ReconnectAttempt { attempt: failures }) {
                return;
            }
            tokio::time::sleep(policy.delay_for(failures)).await;
        }

        let Link {
            outbound,
            mut inbound,
        } = match connector.open(&url).await {
            Ok(link) => link,
            Err(err) => {
                let message = err.to_string();
                if !dispatch.lifecycle(Lifecycle::ConnectError { message }) {
                    return;
                }
                failures += 1;
                continue;
            }
        };

        if !dispatch.attach(outbound) {
            return;
        }
        let recovered_after = failures;
        if !dispatch.lifecycle(Lifecycle::Connected) {
            return;
        }
        if recovered_after > 0
            && !dispatch.lifecycle(Lifecycle::Reconnected {
                attempt: recovered_after,
            })
        {
            return;
        }

        while let Some(frame) = inbound.recv().await {
            if !dispatch.frame(frame) {
                return;
            }
        }

        if !dispatch.lifecycle(Lifecycle::Disconnected {
            reason: "transport close".to_string(),
        }) {
            return;
        }
        failures = 1;
    }
}
