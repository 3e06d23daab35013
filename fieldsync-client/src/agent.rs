//! Wiring for the `fieldsync` sync agent.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_cache::{LmdbStore, PatchOptions, QueryCache, QueryKey, ReadThroughCache};
use fieldsync_core::{AuthStore, CacheConfig, ConfigError};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cached::CachedClient;
use crate::error::RequestError;
use crate::realtime::{ConnectionManager, ConnectionStatus};
use crate::request::ApiRequest;
use crate::sync::CacheSynchronizer;
use crate::telemetry::TelemetryError;

#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
    #[error("Request error: {0}")]
    Request(#[from] RequestError),
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Response cache over LMDB when a durable path is configured. Falls back to
/// a process-local durable tier if the environment cannot be opened.
pub fn build_response_cache(config: &CacheConfig) -> ReadThroughCache {
    let Some(path) = &config.durable_path else {
        return ReadThroughCache::in_memory();
    };
    match LmdbStore::open(path, config.map_size_mb) {
        Ok(store) => {
            info!(path = %path.display(), "Durable response cache opened");
            ReadThroughCache::new(store)
        }
        Err(fault) => {
            warn!(path = %path.display(), error = %fault, "Durable cache unavailable, using memory only");
            ReadThroughCache::in_memory()
        }
    }
}

/// Query key for an API path: `/api/claims/farmer/42` maps to
/// `claims/farmer/42`. Query strings are ignored.
pub fn query_key_for_path(path: &str) -> Option<QueryKey> {
    let path = path.split('?').next().unwrap_or_default();
    let path = path.strip_prefix("/api").unwrap_or(path);
    let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        None
    } else {
        Some(QueryKey::new(segments))
    }
}

/// Fetch each path through the cached façade and seed the query cache with
/// collection responses. Failures are logged per path.
pub async fn warm_up(client: &CachedClient, queries: &QueryCache, paths: &[String], ttl: Duration) -> usize {
    let mut seeded = 0;
    for path in paths {
        match client.fetch_cached(&ApiRequest::get(path.as_str()), ttl).await {
            Ok(Value::Array(entities)) => {
                if let Some(key) = query_key_for_path(path) {
                    info!(path = %path, key = %key, count = entities.len(), "Seeded query cache");
                    queries.set_collection(key, entities);
                    seeded += 1;
                }
            }
            Ok(_) => info!(path = %path, "Warm-up response is not a collection, cached only"),
            Err(err) => warn!(path = %path, error = %err, "Warm-up fetch failed"),
        }
    }
    seeded
}

/// Keep a synchronizer attached whenever the connection is up.
///
/// `ConnectionManager::disconnect` drops every listener, so registrations are
/// re-created after each fresh connection.
pub fn spawn_sync_attachment(
    manager: ConnectionManager,
    queries: Arc<QueryCache>,
    options: PatchOptions,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut status = manager.watch_status();
        let mut synchronizer: Option<CacheSynchronizer> = None;
        loop {
            let current = *status.borrow_and_update();
            match current {
                ConnectionStatus::Connected => {
                    if !synchronizer.as_ref().is_some_and(CacheSynchronizer::is_attached) {
                        synchronizer = Some(CacheSynchronizer::attach(&manager, queries.clone(), options));
                        info!("Cache synchronizer attached");
                    }
                }
                ConnectionStatus::Disconnected => {
                    if let Some(mut attached) = synchronizer.take() {
                        attached.teardown();
                    }
                }
                ConnectionStatus::Connecting | ConnectionStatus::Reconnecting { .. } => {}
            }
            if status.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Drop cached responses and collections when the session logs out.
/// Process shutdown is not a logout; the durable tier survives it.
pub fn spawn_logout_purge(
    auth: AuthStore,
    responses: Arc<ReadThroughCache>,
    queries: Arc<QueryCache>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut snapshots = auth.subscribe();
        let mut was_authenticated = snapshots.borrow_and_update().is_authenticated;
        while snapshots.changed().await.is_ok() {
            let authenticated = snapshots.borrow_and_update().is_authenticated;
            if was_authenticated && !authenticated {
                responses.clear();
                queries.clear();
                info!("Session logged out, cached data purged");
            }
            was_authenticated = authenticated;
        }
    })
}
