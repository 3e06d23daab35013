//! Configuration loading for FieldSync clients.
//!
//! `api_base_url` is required. Every other section has defaults matching the
//! documented client behavior and may be omitted from the file.

use crate::identity::Identity;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "FIELDSYNC_CONFIG";
/// Explicit realtime endpoint override.
pub const SOCKET_URL_ENV: &str = "FIELDSYNC_SOCKET_URL";
/// API endpoint override; the realtime URL is derived from it.
pub const API_URL_ENV: &str = "FIELDSYNC_API_URL";

const DEVELOPMENT_SOCKET_URL: &str = "ws://localhost:5000";

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClientConfig {
    pub api_base_url: String,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub request: RequestConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub realtime: RealtimeConfig,
    #[serde(default)]
    pub binder: BinderConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub warmup: WarmupConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Development,
    Production,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    pub bearer_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RequestConfig {
    pub retries: u32,
    pub timeout_ms: u64,
    pub backoff_base_ms: u64,
}

impl Default for RequestConfig {
    fn default() -> Self {
        Self {
            retries: 3,
            timeout_ms: 15_000,
            backoff_base_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Directory for the durable tier. Without one the durable tier is
    /// process-local.
    pub durable_path: Option<PathBuf>,
    pub map_size_mb: usize,
    pub default_ttl_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            durable_path: None,
            map_size_mb: 64,
            default_ttl_ms: 5 * 60 * 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RealtimeConfig {
    pub reconnection_attempts: u32,
    pub reconnection_delay_ms: u64,
    pub reconnection_delay_max_ms: u64,
    pub join_retry_delay_ms: u64,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            reconnection_attempts: 5,
            reconnection_delay_ms: 1_000,
            reconnection_delay_max_ms: 5_000,
            join_retry_delay_ms: 1_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BinderConfig {
    pub retry_delay_ms: u64,
}

impl Default for BinderConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 2_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub format: LogFormat,
}

/// Identity to log in with at startup (headless agent use).
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    pub identity: Option<Identity>,
}

/// GET paths fetched through the cache once the agent starts.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WarmupConfig {
    pub paths: Vec<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing configuration file path (use --config or FIELDSYNC_CONFIG)")]
    MissingConfigPath,
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Invalid config value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let path = config_path_from_args().or_else(config_path_from_env);
        let path = path.ok_or(ConfigError::MissingConfigPath)?;
        Self::from_path(&path)
    }

    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config: ClientConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Config with defaults for everything but the API endpoint.
    pub fn for_api(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            mode: Mode::default(),
            auth: AuthConfig::default(),
            request: RequestConfig::default(),
            cache: CacheConfig::default(),
            realtime: RealtimeConfig::default(),
            binder: BinderConfig::default(),
            logging: LoggingConfig::default(),
            session: SessionConfig::default(),
            warmup: WarmupConfig::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let api = self.api_base_url.trim();
        if api.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must not be empty".to_string(),
            });
        }
        if !api.starts_with("http://") && !api.starts_with("https://") {
            return Err(ConfigError::InvalidValue {
                field: "api_base_url",
                reason: "must start with http:// or https://".to_string(),
            });
        }
        if self.auth.bearer_token.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ConfigError::InvalidValue {
                field: "auth.bearer_token",
                reason: "must not be blank when set".to_string(),
            });
        }
        if self.request.timeout_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request.timeout_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.request.backoff_base_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "request.backoff_base_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.cache.map_size_mb == 0 {
            return Err(ConfigError::InvalidValue {
                field: "cache.map_size_mb",
                reason: "must be > 0".to_string(),
            });
        }
        if self.realtime.reconnection_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "realtime.reconnection_delay_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.realtime.reconnection_delay_max_ms < self.realtime.reconnection_delay_ms {
            return Err(ConfigError::InvalidValue {
                field: "realtime.reconnection_delay_max_ms",
                reason: "must be >= reconnection_delay_ms".to_string(),
            });
        }
        if self.realtime.join_retry_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "realtime.join_retry_delay_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if self.binder.retry_delay_ms == 0 {
            return Err(ConfigError::InvalidValue {
                field: "binder.retry_delay_ms",
                reason: "must be > 0".to_string(),
            });
        }
        if let Some(identity) = &self.session.identity {
            if identity.id.trim().is_empty() {
                return Err(ConfigError::InvalidValue {
                    field: "session.identity.id",
                    reason: "must not be empty".to_string(),
                });
            }
        }
        if let Some(path) = self.warmup.paths.iter().find(|p| !p.starts_with('/')) {
            return Err(ConfigError::InvalidValue {
                field: "warmup.paths",
                reason: format!("'{}' must start with '/'", path),
            });
        }
        Ok(())
    }

    /// Realtime endpoint, honoring `explicit` and then the environment.
    pub fn socket_url(&self, explicit: Option<&str>) -> String {
        resolve_socket_url(
            explicit,
            std::env::var(SOCKET_URL_ENV).ok().as_deref(),
            std::env::var(API_URL_ENV).ok().as_deref(),
            self.mode,
            &self.api_base_url,
        )
    }
}

/// Precedence: explicit argument, socket URL env, API URL env, mode default.
pub fn resolve_socket_url(
    explicit: Option<&str>,
    socket_env: Option<&str>,
    api_env: Option<&str>,
    mode: Mode,
    api_base_url: &str,
) -> String {
    if let Some(url) = non_blank(explicit).or_else(|| non_blank(socket_env)) {
        return url.to_string();
    }
    if let Some(api) = non_blank(api_env) {
        return socket_url_from_api(api);
    }
    match mode {
        Mode::Development => DEVELOPMENT_SOCKET_URL.to_string(),
        Mode::Production => socket_url_from_api(api_base_url),
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// `https://host/api` -> `wss://host`.
fn socket_url_from_api(api: &str) -> String {
    let trimmed = api.trim().trim_end_matches('/');
    let trimmed = trimmed.strip_suffix("/api").unwrap_or(trimmed);
    if let Some(rest) = trimmed.strip_prefix("https://") {
        format!("wss://{}", rest)
    } else if let Some(rest) = trimmed.strip_prefix("http://") {
        format!("ws://{}", rest)
    } else {
        trimmed.to_string()
    }
}

fn config_path_from_env() -> Option<PathBuf> {
    std::env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from)
}

fn config_path_from_args() -> Option<PathBuf> {
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config" {
            return args.next().map(PathBuf::from);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_socket_url_precedence() {
        let base = "https://api.example.org/api";
        assert_eq!(
            resolve_socket_url(Some("ws://explicit"), Some("ws://env"), None, Mode::Production, base),
            "ws://explicit"
        );
        assert_eq!(
            resolve_socket_url(None, Some("ws://env"), Some("http://api-env/api"), Mode::Production, base),
            "ws://env"
        );
        assert_eq!(
            resolve_socket_url(None, None, Some("http://api-env:8080/api/"), Mode::Production, base),
            "ws://api-env:8080"
        );
        assert_eq!(
            resolve_socket_url(None, None, None, Mode::Development, base),
            "ws://localhost:5000"
        );
        assert_eq!(
            resolve_socket_url(None, None, None, Mode::Production, base),
            "wss://api.example.org"
        );
    }

    #[test]
    fn test_blank_overrides_are_ignored() {
        assert_eq!(
            resolve_socket_url(Some("  "), Some(""), None, Mode::Development, "http://x"),
            "ws://localhost:5000"
        );
    }
}
