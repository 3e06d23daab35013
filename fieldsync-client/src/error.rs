//! Request error taxonomy.
//!
//! Only these errors reach callers. Cache, channel, and transport faults are
//! contained by their components and surface through logs and status flags.

use std::time::Duration;

use crate::transport::TransportError;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("Request timed out after {} seconds", format_seconds(.after))]
    Timeout { after: Duration },
    #[error("Network error: {0}")]
    Network(String),
    /// Non-2xx response. The message comes from the response body when it
    /// carries one.
    #[error("{message}")]
    Rejected { status: u16, message: String },
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
    #[error("Invalid request: {0}")]
    InvalidRequest(String),
    #[error("Config error: {0}")]
    Config(String),
}

impl RequestError {
    /// Timeouts and network failures are worth another attempt; anything the
    /// server answered is not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RequestError::Timeout { .. } | RequestError::Network(_))
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RequestError::Rejected { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<TransportError> for RequestError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Network(message) => RequestError::Network(message),
            TransportError::InvalidRequest(message) => RequestError::InvalidRequest(message),
        }
    }
}

fn format_seconds(duration: &Duration) -> String {
    let millis = duration.as_millis();
    if millis % 1_000 == 0 {
        (millis / 1_000).to_string()
    } else {
        format!("{:.1}", duration.as_secs_f64())
    }
}
