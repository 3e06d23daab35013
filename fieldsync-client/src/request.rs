//! Request descriptor shared by the executor and the cached façade.

use reqwest::Method;
use serde_json::Value;

#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base URL, or an absolute URL.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn put(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PUT, path).with_body(body)
    }

    pub fn patch(path: impl Into<String>, body: Value) -> Self {
        Self::new(Method::PATCH, path).with_body(body)
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::DELETE, path)
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Cache key for this request, `None` when the method is not cacheable.
    pub fn cache_key(&self) -> Option<String> {
        fieldsync_cache::cache_key(self.method.as_str(), &self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_only_reads_have_cache_keys() {
        assert_eq!(
            ApiRequest::get("/api/claims").cache_key().as_deref(),
            Some("GET:/api/claims")
        );
        assert_eq!(ApiRequest::post("/api/claims", json!({})).cache_key(), None);
        assert_eq!(ApiRequest::delete("/api/claims/1").cache_key(), None);
    }

    #[test]
    fn test_builder_keeps_headers_in_order() {
        let request = ApiRequest::get("/api/farmers")
            .with_header("x-trace", "a")
            .with_header("x-tenant", "b");
        assert_eq!(
            request.headers,
            vec![
                ("x-trace".to_string(), "a".to_string()),
                ("x-tenant".to_string(), "b".to_string())
            ]
        );
    }
}
