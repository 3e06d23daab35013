//! FieldSync client library exports.

pub mod agent;
pub mod binder;
pub mod cached;
pub mod error;
pub mod executor;
pub mod realtime;
pub mod request;
pub mod sync;
pub mod telemetry;
pub mod transport;

pub use agent::AgentError;
pub use binder::{BinderAction, BinderHandle, BinderOptions, IdentityBinder};
pub use cached::CachedClient;
pub use error::RequestError;
pub use executor::{RequestExecutor, RequestPolicy};
pub use realtime::{
    ConnectionManager, ConnectionStatus, Connector, Frame, JoinOutcome, Link, LinkError,
    ListenerId, RealtimeOptions, ReconnectPolicy, Subscription, WeakConnectionManager,
    WsConnector,
};
pub use request::ApiRequest;
pub use sync::{apply_event, CacheSynchronizer, SyncReport};
pub use transport::{HttpTransport, RawResponse, ReqwestTransport, TransportError};
