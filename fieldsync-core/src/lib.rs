//! FieldSync Core - Shared Types
//!
//! Identity and auth state, typed domain events, entity helpers, and the
//! client configuration. No I/O beyond reading the config file.

pub mod config;
pub mod entity;
pub mod event;
pub mod identity;

pub use config::{
    AuthConfig, BinderConfig, CacheConfig, ClientConfig, ConfigError, LogFormat, LoggingConfig,
    Mode, RealtimeConfig, RequestConfig, SessionConfig, WarmupConfig,
};
pub use entity::{entity_id, owner_id, shallow_merge, DEFAULT_ID_FIELD};
pub use event::{ChangeType, DomainEvent, EntityKind};
pub use identity::{AuthSnapshot, AuthStore, Identity, Role, ADMIN_CHANNEL};
