use fieldsync_cache::{cache_key, durable_key, DurableStore, LmdbStore, ReadThroughCache};
use proptest::prelude::*;
use serde_json::{json, Value};
use std::time::Duration;

#[test]
fn lmdb_backed_cache_survives_reload() {
    let dir = tempfile::tempdir().unwrap();
    let key = cache_key("GET", "/api/farmers").unwrap();
    let farmers = json!([{"_id": "F1", "name": "Ada"}, {"_id": "F2", "name": "Grace"}]);

    {
        let cache = ReadThroughCache::new(LmdbStore::open(dir.path(), 8).unwrap());
        cache.set(&key, farmers.clone(), Some(Duration::from_secs(60)));
    }

    let cache = ReadThroughCache::new(LmdbStore::open(dir.path(), 8).unwrap());
    assert_eq!(cache.get(&key), Some(farmers));
    assert_eq!(cache.stats().durable_hits, 1);
}

#[test]
fn lmdb_durable_entry_uses_namespaced_envelope() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(LmdbStore::open(dir.path(), 8).unwrap());
    let cache = ReadThroughCache::new(store.clone());
    cache.set("GET:/api/claims", json!([1, 2]), None);

    let raw = store.read(&durable_key("GET:/api/claims")).unwrap().unwrap();
    let envelope: Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(envelope["data"], json!([1, 2]));
    assert!(envelope["expiry"].is_null());
}

#[test]
fn lmdb_expired_entry_removed_on_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = std::sync::Arc::new(LmdbStore::open(dir.path(), 8).unwrap());
    let cache = ReadThroughCache::new(store.clone());
    cache.set("GET:/api/claims", json!([1]), Some(Duration::from_millis(10)));

    std::thread::sleep(Duration::from_millis(40));
    assert_eq!(cache.get("GET:/api/claims"), None);
    assert_eq!(store.read(&durable_key("GET:/api/claims")).unwrap(), None);
}

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[a-z0-9 ]{0,12}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 16, 4, |inner| {
        prop_oneof![
            proptest::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            proptest::collection::hash_map("[a-z_]{1,6}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #[test]
    fn set_then_get_returns_equal_value(url in "/api/[a-z]{1,10}", value in json_value()) {
        let cache = ReadThroughCache::in_memory();
        let key = cache_key("GET", &url).unwrap();
        cache.set(&key, value.clone(), Some(Duration::from_secs(60)));
        prop_assert_eq!(cache.get(&key), Some(value));
    }
}
