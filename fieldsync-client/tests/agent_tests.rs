use fieldsync_cache::{PatchOptions, QueryCache, QueryKey, ReadThroughCache};
use fieldsync_client::agent::{spawn_logout_purge, spawn_sync_attachment, warm_up};
use fieldsync_client::{
    CachedClient, ConnectionManager, ConnectionStatus, RequestExecutor, RequestPolicy,
};
use fieldsync_core::AuthStore;
use fieldsync_test_utils::{
    claim, farmer_identity, seeded_query_cache, test_realtime_options, ChannelConnector, RemoteEnd,
    Reply, ScriptedTransport,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

const TTL: Duration = Duration::from_secs(60);

fn manager(connector: &ChannelConnector) -> ConnectionManager {
    ConnectionManager::new(Arc::new(connector.clone()), test_realtime_options())
}

async fn wait_for_status(manager: &ConnectionManager, target: ConnectionStatus) {
    let mut status = manager.watch_status();
    tokio::time::timeout(Duration::from_secs(30), status.wait_for(|s| *s == target))
        .await
        .expect("status not reached in time")
        .expect("status channel closed");
}

async fn connected(manager: &ConnectionManager, connector: &ChannelConnector) -> RemoteEnd {
    manager.connect(None);
    let remote = connector.accept().await;
    wait_for_status(manager, ConnectionStatus::Connected).await;
    remote
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}

fn claim_status(queries: &QueryCache, id: &str) -> Option<String> {
    queries
        .collection(&QueryKey::collection("claims"))?
        .iter()
        .find(|entity| entity["_id"] == id)
        .and_then(|entity| entity["status"].as_str().map(str::to_string))
}

// ============================================================================
// SYNCHRONIZER ATTACHMENT
// ============================================================================

#[tokio::test(start_paused = true)]
async fn synchronizer_attaches_once_connected() {
    let connector = ChannelConnector::new();
    let manager = manager(&connector);
    let queries = Arc::new(seeded_query_cache());
    let task = spawn_sync_attachment(manager.clone(), queries.clone(), PatchOptions::default());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(manager.listener_count("claim-updated"), 0);

    let remote = connected(&manager, &connector).await;
    eventually(|| manager.listener_count("claim-updated") == 1).await;

    remote.send("claim-updated", claim("C1", "42", "approved"));
    eventually(|| claim_status(&queries, "C1").as_deref() == Some("approved")).await;
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn synchronizer_detaches_on_disconnect_and_returns_on_reconnect() {
    let connector = ChannelConnector::new();
    let manager = manager(&connector);
    let queries = Arc::new(seeded_query_cache());
    let task = spawn_sync_attachment(manager.clone(), queries.clone(), PatchOptions::default());

    let _first = connected(&manager, &connector).await;
    eventually(|| manager.listener_count("claim-updated") == 1).await;

    manager.disconnect();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.listener_count("claim-updated"), 0);

    let second = connected(&manager, &connector).await;
    eventually(|| manager.listener_count("claim-updated") == 1).await;

    second.send("claim-updated", claim("C2", "7", "rejected"));
    eventually(|| claim_status(&queries, "C2").as_deref() == Some("rejected")).await;
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn synchronizer_survives_disconnect_immediately_followed_by_connect() {
    let connector = ChannelConnector::new();
    let manager = manager(&connector);
    let queries = Arc::new(seeded_query_cache());
    let task = spawn_sync_attachment(manager.clone(), queries.clone(), PatchOptions::default());

    let _first = connected(&manager, &connector).await;
    eventually(|| manager.listener_count("claim-updated") == 1).await;

    // No await in between: the watcher never observes `Disconnected`.
    manager.disconnect();
    manager.connect(None);
    let second = connector.accept().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    eventually(|| manager.listener_count("claim-updated") == 1).await;

    second.send("claim-updated", json!({"_id": "C1", "status": "approved"}));
    eventually(|| claim_status(&queries, "C1").as_deref() == Some("approved")).await;
    task.abort();
}

// ============================================================================
// WARM-UP AND LOGOUT PURGE
// ============================================================================

#[tokio::test(start_paused = true)]
async fn warm_up_seeds_collections_only() {
    let transport = ScriptedTransport::with_replies([
        Reply::ok(json!([claim("C1", "42", "pending")])),
        Reply::ok(json!({"open": 3})),
        Reply::json(404, json!({"message": "Not found"})),
    ]);
    let executor = RequestExecutor::new(Arc::new(transport.clone()), RequestPolicy::default());
    let client = CachedClient::new(Arc::new(executor), Arc::new(ReadThroughCache::in_memory()));
    let queries = QueryCache::new();
    let paths = vec![
        "/api/claims".to_string(),
        "/api/claims/stats".to_string(),
        "/api/farmers".to_string(),
    ];

    let seeded = warm_up(&client, &queries, &paths, TTL).await;

    assert_eq!(seeded, 1);
    assert_eq!(transport.call_count(), 3);
    assert_eq!(
        queries.collection(&QueryKey::collection("claims")),
        Some(vec![claim("C1", "42", "pending")])
    );
    assert_eq!(queries.keys_with_root("claims"), vec![QueryKey::collection("claims")]);
    assert!(queries.keys_with_root("farmers").is_empty());
    assert_eq!(client.cache().get("GET:/api/claims/stats"), Some(json!({"open": 3})));
}

#[tokio::test(start_paused = true)]
async fn logout_purges_cached_data() {
    let auth = AuthStore::new();
    let responses = Arc::new(ReadThroughCache::in_memory());
    let queries = Arc::new(seeded_query_cache());
    responses.set("GET:/api/claims", json!([claim("C1", "42", "pending")]), None);

    auth.login(farmer_identity("42"));
    let task = spawn_logout_purge(auth.clone(), responses.clone(), queries.clone());
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(queries.contains(&QueryKey::collection("claims")));

    auth.logout();
    eventually(|| !queries.contains(&QueryKey::collection("claims"))).await;
    assert_eq!(responses.get("GET:/api/claims"), None);
    task.abort();
}

#[tokio::test(start_paused = true)]
async fn installed_manager_is_shared_process_wide() {
    let connector = ChannelConnector::new();
    let manager = manager(&connector);

    assert!(ConnectionManager::install(manager.clone()).is_ok());
    assert!(ConnectionManager::install(manager.clone()).is_err());

    let instance = ConnectionManager::instance().expect("manager installed");
    instance.connect(None);
    let _remote = connector.accept().await;
    wait_for_status(&manager, ConnectionStatus::Connected).await;
    assert!(manager.is_connected());
    instance.disconnect();
}
