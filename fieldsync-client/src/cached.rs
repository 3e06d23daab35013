//! Cached request façade with stale-while-revalidate reads.
//!
//! A cache hit is returned immediately and a single background refresh is
//! spawned to update the entry. Refresh failures keep the cached value.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_cache::ReadThroughCache;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::RequestError;
use crate::executor::RequestExecutor;
use crate::request::ApiRequest;

#[derive(Clone)]
pub struct CachedClient {
    executor: Arc<RequestExecutor>,
    cache: Arc<ReadThroughCache>,
}

impl CachedClient {
    pub fn new(executor: Arc<RequestExecutor>, cache: Arc<ReadThroughCache>) -> Self {
        Self { executor, cache }
    }

    pub fn executor(&self) -> &RequestExecutor {
        &self.executor
    }

    pub fn cache(&self) -> &ReadThroughCache {
        &self.cache
    }

    pub async fn fetch_cached(
        &self,
        request: &ApiRequest,
        ttl: Duration,
    ) -> Result<Value, RequestError> {
        let Some(key) = request.cache_key() else {
            return self.executor.execute(request).await;
        };

        if let Some(value) = self.cache.get(&key) {
            debug!(key = %key, "Serving cached response, refreshing in background");
            self.spawn_refresh(key, request.clone(), ttl);
            return Ok(value);
        }

        let value = self.executor.execute(request).await?;
        self.cache.set(&key, value.clone(), Some(ttl));
        Ok(value)
    }

    /// Typed variant of [`fetch_cached`](Self::fetch_cached).
    pub async fn fetch_cached_as<T: DeserializeOwned>(
        &self,
        request: &ApiRequest,
        ttl: Duration,
    ) -> Result<T, RequestError> {
        let value = self.fetch_cached(request, ttl).await?;
        serde_json::from_value(value).map_err(|e| RequestError::InvalidResponse(e.to_string()))
    }

    fn spawn_refresh(&self, key: String, request: ApiRequest, ttl: Duration) -> JoinHandle<()> {
        let executor = self.executor.clone();
        let cache = self.cache.clone();
        tokio::spawn(async move {
            match executor.execute(&request).await {
                Ok(value) => {
                    cache.set(&key, value, Some(ttl));
                    debug!(key = %key, "Background refresh stored");
                }
                Err(err) => {
                    debug!(key = %key, error = %err, "Background refresh failed, keeping cached value");
                }
            }
        })
    }
}
