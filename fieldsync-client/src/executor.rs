//! Resilient request executor.
//!
//! Every attempt runs under a per-attempt timeout. Timeouts and network
//! failures are retried with exponential backoff; anything the server
//! answered is returned immediately.

use std::sync::Arc;
use std::time::Duration;

use fieldsync_core::ClientConfig;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::RequestError;
use crate::request::ApiRequest;
use crate::transport::{HttpTransport, RawResponse, ReqwestTransport};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestPolicy {
    /// Retries after the first attempt.
    pub retries: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
}

impl Default for RequestPolicy {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout: Duration::from_secs(15),
            backoff_base: Duration::from_secs(1),
        }
    }
}

impl RequestPolicy {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            retries: config.request.retries,
            timeout: Duration::from_millis(config.request.timeout_ms),
            backoff_base: Duration::from_millis(config.request.backoff_base_ms),
        }
    }

    /// Wait after failed attempt `attempt` (zero-based): `base * 2^attempt`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.backoff_base
            .saturating_mul(2u32.saturating_pow(attempt))
    }
}

pub struct RequestExecutor {
    transport: Arc<dyn HttpTransport>,
    policy: RequestPolicy,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn HttpTransport>, policy: RequestPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn from_config(config: &ClientConfig) -> Result<Self, RequestError> {
        let transport = ReqwestTransport::new(config)?;
        Ok(Self::new(Arc::new(transport), RequestPolicy::from_config(config)))
    }

    pub fn policy(&self) -> &RequestPolicy {
        &self.policy
    }

    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, RequestError> {
        self.execute_with(request, &self.policy).await
    }

    pub async fn execute_with(
        &self,
        request: &ApiRequest,
        policy: &RequestPolicy,
    ) -> Result<Value, RequestError> {
        let mut attempt: u32 = 0;
        loop {
            debug!(
                method = %request.method,
                path = %request.path,
                attempt,
                "Sending request"
            );

            let error = match self.attempt(request, policy.timeout).await {
                Ok(value) => return Ok(value),
                Err(err) if !err.is_retryable() => return Err(err),
                Err(err) => err,
            };

            if attempt >= policy.retries {
                warn!(
                    method = %request.method,
                    path = %request.path,
                    attempts = attempt + 1,
                    error = %error,
                    "Request failed, retries exhausted"
                );
                return Err(error);
            }

            let wait = policy.backoff_for(attempt);
            warn!(
                method = %request.method,
                path = %request.path,
                attempt,
                wait_ms = wait.as_millis() as u64,
                error = %error,
                "Request failed, retrying"
            );
            tokio::time::sleep(wait).await;
            attempt += 1;
        }
    }

    async fn attempt(&self, request: &ApiRequest, timeout: Duration) -> Result<Value, RequestError> {
        let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
            Err(_) => return Err(RequestError::Timeout { after: timeout }),
            Ok(result) => result?,
        };
        parse_response(response)
    }
}

fn parse_response(response: RawResponse) -> Result<Value, RequestError> {
    if response.is_success() {
        if response.body.trim().is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_str(&response.body)
            .map_err(|e| RequestError::InvalidResponse(e.to_string()));
    }

    Err(RequestError::Rejected {
        status: response.status,
        message: rejection_message(response.status, &response.body),
    })
}

/// Server-provided `message`, then `error`, then a generic status line.
fn rejection_message(status: u16, body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|payload| {
            ["message", "error"].iter().find_map(|field| {
                payload
                    .get(*field)
                    .and_then(Value::as_str)
                    .filter(|text| !text.is_empty())
                    .map(str::to_string)
            })
        })
        .unwrap_or_else(|| format!("Request failed with status {}", status))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::transport::TransportError;

    enum Step {
        Respond(RawResponse),
        Fail(TransportError),
        Hang,
    }

    struct Steps {
        queue: Mutex<VecDeque<Step>>,
        calls: Mutex<u32>,
    }

    impl Steps {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(Self {
                queue: Mutex::new(steps.into()),
                calls: Mutex::new(0),
            })
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl HttpTransport for Steps {
        async fn send(&self, _request: &ApiRequest) -> Result<RawResponse, TransportError> {
            *self.calls.lock().unwrap() += 1;
            let step = self.queue.lock().unwrap().pop_front();
            match step {
                Some(Step::Respond(response)) => Ok(response),
                Some(Step::Fail(err)) => Err(err),
                Some(Step::Hang) | None => std::future::pending().await,
            }
        }
    }

    fn executor(steps: &Arc<Steps>) -> RequestExecutor {
        RequestExecutor::new(steps.clone(), RequestPolicy::default())
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RequestPolicy::default();
        assert_eq!(policy.backoff_for(0), Duration::from_secs(1));
        assert_eq!(policy.backoff_for(1), Duration::from_secs(2));
        assert_eq!(policy.backoff_for(2), Duration::from_secs(4));
    }

    #[test]
    fn test_rejection_message_precedence() {
        assert_eq!(
            rejection_message(400, r#"{"message":"Bad claim","error":"x"}"#),
            "Bad claim"
        );
        assert_eq!(rejection_message(403, r#"{"error":"Forbidden"}"#), "Forbidden");
        assert_eq!(
            rejection_message(502, "<html>gateway</html>"),
            "Request failed with status 502"
        );
        assert_eq!(
            rejection_message(500, r#"{"message":""}"#),
            "Request failed with status 500"
        );
    }

    #[tokio::test]
    async fn test_success_parses_body() {
        let steps = Steps::new(vec![Step::Respond(RawResponse::new(200, r#"[{"_id":"C1"}]"#))]);
        let value = executor(&steps).execute(&ApiRequest::get("/api/claims")).await.unwrap();
        assert_eq!(value, json!([{"_id": "C1"}]));
        assert_eq!(steps.calls(), 1);
    }

    #[tokio::test]
    async fn test_empty_success_body_is_null() {
        let steps = Steps::new(vec![Step::Respond(RawResponse::new(204, ""))]);
        let value = executor(&steps)
            .execute(&ApiRequest::delete("/api/claims/C1"))
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejection_is_not_retried() {
        let steps = Steps::new(vec![Step::Respond(RawResponse::new(
            404,
            r#"{"message":"Claim not found"}"#,
        ))]);
        let started = tokio::time::Instant::now();
        let err = executor(&steps)
            .execute(&ApiRequest::get("/api/claims/404"))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RequestError::Rejected {
                status: 404,
                message: "Claim not found".into()
            }
        );
        assert_eq!(steps.calls(), 1);
        assert_eq!(started.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_network_failures_back_off_then_succeed() {
        let steps = Steps::new(vec![
            Step::Fail(TransportError::Network("refused".into())),
            Step::Fail(TransportError::Network("refused".into())),
            Step::Respond(RawResponse::new(200, "{}")),
        ]);
        let started = tokio::time::Instant::now();
        let value = executor(&steps).execute(&ApiRequest::get("/api/farmers")).await.unwrap();
        assert_eq!(value, json!({}));
        assert_eq!(steps.calls(), 3);
        // 1s + 2s of backoff.
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeouts_exhaust_retries() {
        let steps = Steps::new(vec![Step::Hang, Step::Hang, Step::Hang, Step::Hang]);
        let policy = RequestPolicy {
            retries: 3,
            timeout: Duration::from_secs(15),
            backoff_base: Duration::from_secs(1),
        };
        let started = tokio::time::Instant::now();
        let err = RequestExecutor::new(steps.clone(), policy)
            .execute(&ApiRequest::get("/api/claims"))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Request timed out after 15 seconds");
        assert_eq!(steps.calls(), 4);
        // Four 15s attempts plus 1s + 2s + 4s of backoff.
        assert_eq!(started.elapsed(), Duration::from_secs(67));
    }

    #[tokio::test]
    async fn test_invalid_json_is_not_retried() {
        let steps = Steps::new(vec![Step::Respond(RawResponse::new(200, "{not json"))]);
        let err = executor(&steps)
            .execute(&ApiRequest::get("/api/claims"))
            .await
            .unwrap_err();
        assert!(matches!(err, RequestError::InvalidResponse(_)));
        assert_eq!(steps.calls(), 1);
    }
}
