//! FieldSync Test Utilities
//!
//! Shared test infrastructure for the FieldSync workspace:
//! - Scripted HTTP transport with call recording
//! - In-process realtime connector with a controllable remote end
//! - Entity and identity fixtures
//! - Proptest generators

pub use fieldsync_cache::{QueryCache, QueryKey};
pub use fieldsync_client::{
    ApiRequest, Connector, Frame, HttpTransport, Link, LinkError, RawResponse, RealtimeOptions,
    ReconnectPolicy, TransportError,
};
pub use fieldsync_core::{Identity, Role};

use async_trait::async_trait;
use proptest::prelude::*;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

// ============================================================================
// SCRIPTED HTTP TRANSPORT
// ============================================================================

/// One scripted reaction to a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Respond(RawResponse),
    Fail(TransportError),
    /// Never completes; only the executor's timeout ends the attempt.
    Hang,
}

impl Reply {
    pub fn json(status: u16, body: Value) -> Self {
        Reply::Respond(RawResponse::new(status, body.to_string()))
    }

    pub fn ok(body: Value) -> Self {
        Self::json(200, body)
    }

    pub fn network(message: &str) -> Self {
        Reply::Fail(TransportError::Network(message.to_string()))
    }
}

#[derive(Default)]
struct Script {
    replies: VecDeque<Reply>,
    fallback: Option<Reply>,
    calls: Vec<ApiRequest>,
}

/// [`HttpTransport`] that answers from a queue of [`Reply`]s and records
/// every request it sees.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replies(replies: impl IntoIterator<Item = Reply>) -> Self {
        let transport = Self::new();
        for reply in replies {
            transport.push(reply);
        }
        transport
    }

    pub fn push(&self, reply: Reply) {
        self.script.lock().unwrap().replies.push_back(reply);
    }

    /// Reply used once the queue is empty. Without one, an empty queue hangs.
    pub fn set_fallback(&self, reply: Reply) {
        self.script.lock().unwrap().fallback = Some(reply);
    }

    pub fn calls(&self) -> Vec<ApiRequest> {
        self.script.lock().unwrap().calls.clone()
    }

    pub fn call_count(&self) -> usize {
        self.script.lock().unwrap().calls.len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, TransportError> {
        let reply = {
            let mut script = self.script.lock().unwrap();
            script.calls.push(request.clone());
            script
                .replies
                .pop_front()
                .or_else(|| script.fallback.clone())
                .unwrap_or(Reply::Hang)
        };
        match reply {
            Reply::Respond(response) => Ok(response),
            Reply::Fail(err) => Err(err),
            Reply::Hang => std::future::pending().await,
        }
    }
}

// ============================================================================
// IN-PROCESS REALTIME CONNECTOR
// ============================================================================

/// Server side of a [`ChannelConnector`] link.
pub struct RemoteEnd {
    pub url: String,
    to_client: mpsc::UnboundedSender<Frame>,
    from_client: mpsc::UnboundedReceiver<Frame>,
}

impl RemoteEnd {
    pub fn send(&self, event: &str, data: Value) -> bool {
        self.to_client.send(Frame::new(event, data)).is_ok()
    }

    /// Next frame sent by the client, or `None` once the client closed.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.from_client.recv().await
    }

    /// Frames already sent by the client.
    pub fn drain(&mut self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }

    /// Simulate the server dropping the connection.
    pub fn close(self) {}
}

#[derive(Default)]
struct ConnectorState {
    refuse_remaining: u32,
    opened_urls: Vec<String>,
    attempts: usize,
}

/// [`Connector`] backed by in-process channels. Each successful open hands a
/// [`RemoteEnd`] to [`accept`](Self::accept).
#[derive(Clone)]
pub struct ChannelConnector {
    state: Arc<Mutex<ConnectorState>>,
    accepted_tx: mpsc::UnboundedSender<RemoteEnd>,
    accepted_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<RemoteEnd>>>,
}

impl Default for ChannelConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl ChannelConnector {
    pub fn new() -> Self {
        let (accepted_tx, accepted_rx) = mpsc::unbounded_channel();
        Self {
            state: Arc::new(Mutex::new(ConnectorState::default())),
            accepted_tx,
            accepted_rx: Arc::new(tokio::sync::Mutex::new(accepted_rx)),
        }
    }

    /// Refuse the next `count` open attempts.
    pub fn refuse_next(&self, count: u32) {
        self.state.lock().unwrap().refuse_remaining = count;
    }

    pub fn attempts(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    pub fn opened_urls(&self) -> Vec<String> {
        self.state.lock().unwrap().opened_urls.clone()
    }

    /// Wait for the next successful open.
    pub async fn accept(&self) -> RemoteEnd {
        let mut accepted = self.accepted_rx.lock().await;
        accepted
            .recv()
            .await
            .expect("connector holds its own sender")
    }
}

#[async_trait]
impl Connector for ChannelConnector {
    async fn open(&self, url: &str) -> Result<Link, LinkError> {
        {
            let mut state = self.state.lock().unwrap();
            state.attempts += 1;
            if state.refuse_remaining > 0 {
                state.refuse_remaining -= 1;
                return Err(LinkError::Refused(url.to_string()));
            }
            state.opened_urls.push(url.to_string());
        }

        let (outbound, from_client) = mpsc::unbounded_channel();
        let (to_client, inbound) = mpsc::unbounded_channel();
        let _ = self.accepted_tx.send(RemoteEnd {
            url: url.to_string(),
            to_client,
            from_client,
        });
        Ok(Link { outbound, inbound })
    }
}

/// Realtime options with short, deterministic delays.
pub fn test_realtime_options() -> RealtimeOptions {
    RealtimeOptions {
        url: "ws://test.invalid".to_string(),
        reconnect: ReconnectPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(400),
        },
        join_retry_delay: Duration::from_millis(1_000),
    }
}

// ============================================================================
// FIXTURES
// ============================================================================

pub fn admin() -> Identity {
    Identity::new("1", Role::Admin)
}

pub fn farmer_identity(id: &str) -> Identity {
    Identity::new(id, Role::Farmer)
}

pub fn claim(id: &str, farmer: &str, status: &str) -> Value {
    json!({"_id": id, "farmer": farmer, "status": status, "crop": "maize"})
}

pub fn farmer(id: &str, name: &str) -> Value {
    json!({"_id": id, "name": name, "region": "north"})
}

/// Query cache holding the admin claims list and farmer 42's claims.
pub fn seeded_query_cache() -> QueryCache {
    let cache = QueryCache::new();
    cache.set_collection(
        QueryKey::collection("claims"),
        vec![claim("C1", "42", "pending"), claim("C2", "7", "pending")],
    );
    cache.set_collection(
        QueryKey::owned("claims", "farmer", "42"),
        vec![claim("C1", "42", "pending")],
    );
    cache
}

// ============================================================================
// GENERATORS
// ============================================================================

pub fn arb_identity() -> impl Strategy<Value = Identity> {
    (
        "[0-9a-f]{1,8}",
        prop_oneof![Just(Role::Admin), Just(Role::Farmer)],
    )
        .prop_map(|(id, role)| Identity::new(id, role))
}

/// Flat entity with an `_id` and a few scalar fields.
pub fn arb_entity() -> impl Strategy<Value = Value> {
    (
        "[A-Z][0-9]{1,4}",
        proptest::collection::hash_map("[a-z]{1,6}", "[a-z0-9]{0,8}", 0..4),
    )
        .prop_map(|(id, fields)| {
            let mut entity = serde_json::Map::new();
            for (key, value) in fields {
                entity.insert(key, Value::String(value));
            }
            entity.insert("_id".to_string(), Value::String(id));
            Value::Object(entity)
        })
}
