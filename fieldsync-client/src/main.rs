//! FieldSync sync agent entry point.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_cache::{PatchOptions, QueryCache};
use fieldsync_client::agent::{self, AgentError};
use fieldsync_client::telemetry;
use fieldsync_client::{
    BinderOptions, CachedClient, ConnectionManager, IdentityBinder, RequestExecutor,
};
use fieldsync_core::{AuthStore, ClientConfig};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<(), AgentError> {
    let config = ClientConfig::load()?;
    telemetry::init_logging(config.logging.format)?;

    let executor = Arc::new(RequestExecutor::from_config(&config)?);
    let responses = Arc::new(agent::build_response_cache(&config.cache));
    let client = CachedClient::new(executor, responses.clone());
    let ttl = Duration::from_millis(config.cache.default_ttl_ms);

    let manager = ConnectionManager::from_config(&config);
    if ConnectionManager::install(manager.clone()).is_err() {
        warn!("Connection manager already installed");
    }
    info!(url = %manager.options().url, "Realtime endpoint resolved");

    let queries = Arc::new(QueryCache::new());
    let sync_task = agent::spawn_sync_attachment(manager.clone(), queries.clone(), PatchOptions::default());

    let auth = AuthStore::new();
    let purge_task = agent::spawn_logout_purge(auth.clone(), responses.clone(), queries.clone());
    let binder = IdentityBinder::new(manager.clone(), auth.clone(), BinderOptions::from_config(&config)).spawn();

    match &config.session.identity {
        Some(identity) => {
            info!(id = %identity.id, role = %identity.role, "Logging in configured identity");
            auth.login(identity.clone());
        }
        None => auth.mark_initialized(),
    }

    let seeded = agent::warm_up(&client, &queries, &config.warmup.paths, ttl).await;
    info!(seeded, "Warm-up complete");

    let mut changes = queries.subscribe();
    let change_log = tokio::spawn(async move {
        loop {
            match changes.recv().await {
                Ok(key) => info!(key = %key, "Query cache updated"),
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Query change log lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    change_log.abort();
    purge_task.abort();
    binder.shutdown().await;
    sync_task.abort();
    manager.disconnect();

    let stats = responses.stats();
    info!(
        hit_rate = stats.hit_rate(),
        faults = stats.faults,
        "Response cache stats"
    );
    Ok(())
}
