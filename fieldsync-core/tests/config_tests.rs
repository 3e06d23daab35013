use fieldsync_core::config::ConfigError;
use fieldsync_core::{ClientConfig, LogFormat, Mode, Role};
use std::io::Write;

const FULL_CONFIG: &str = r#"
api_base_url = "https://api.example.org/api"
mode = "production"

[auth]
bearer_token = "token-123"

[request]
retries = 2
timeout_ms = 5000
backoff_base_ms = 250

[cache]
durable_path = "/tmp/fieldsync-cache"
map_size_mb = 16
default_ttl_ms = 60000

[realtime]
reconnection_attempts = 4
reconnection_delay_ms = 500
reconnection_delay_max_ms = 4000
join_retry_delay_ms = 750

[binder]
retry_delay_ms = 1500

[logging]
format = "json"

[session]
identity = { id = "42", role = "farmer" }

[warmup]
paths = ["/api/farmers", "/api/claims"]
"#;

fn base_config() -> ClientConfig {
    ClientConfig::for_api("http://localhost:5000/api")
}

#[test]
fn config_parses_all_sections() {
    let config = ClientConfig::from_toml(FULL_CONFIG).unwrap();
    assert_eq!(config.mode, Mode::Production);
    assert_eq!(config.auth.bearer_token.as_deref(), Some("token-123"));
    assert_eq!(config.request.retries, 2);
    assert_eq!(config.cache.map_size_mb, 16);
    assert_eq!(config.realtime.join_retry_delay_ms, 750);
    assert_eq!(config.binder.retry_delay_ms, 1500);
    assert_eq!(config.logging.format, LogFormat::Json);
    let identity = config.session.identity.unwrap();
    assert_eq!(identity.role, Role::Farmer);
    assert_eq!(config.warmup.paths.len(), 2);
}

#[test]
fn config_defaults_apply_to_missing_sections() {
    let config = ClientConfig::from_toml(r#"api_base_url = "http://localhost:5000/api""#).unwrap();
    assert_eq!(config.mode, Mode::Development);
    assert_eq!(config.request.retries, 3);
    assert_eq!(config.request.timeout_ms, 15_000);
    assert_eq!(config.request.backoff_base_ms, 1_000);
    assert_eq!(config.realtime.reconnection_attempts, 5);
    assert!(config.session.identity.is_none());
}

#[test]
fn config_partial_section_keeps_other_defaults() {
    let config = ClientConfig::from_toml(
        r#"
api_base_url = "http://localhost:5000/api"
[request]
retries = 0
"#,
    )
    .unwrap();
    assert_eq!(config.request.retries, 0);
    assert_eq!(config.request.timeout_ms, 15_000);
}

#[test]
fn config_rejects_unknown_fields() {
    let result = ClientConfig::from_toml(
        r#"
api_base_url = "http://localhost:5000/api"
surprise = true
"#,
    );
    assert!(matches!(result, Err(ConfigError::Parse(_))));
}

#[test]
fn config_requires_http_api_url() {
    let mut config = base_config();
    config.api_base_url = "ftp://example.org".to_string();
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { field: "api_base_url", .. })
    ));
}

#[test]
fn config_requires_positive_timeout() {
    let mut config = base_config();
    config.request.timeout_ms = 0;
    assert!(config.validate().is_err());
}

#[test]
fn config_requires_ordered_reconnect_delays() {
    let mut config = base_config();
    config.realtime.reconnection_delay_ms = 5_000;
    config.realtime.reconnection_delay_max_ms = 1_000;
    assert!(matches!(
        config.validate(),
        Err(ConfigError::InvalidValue { field: "realtime.reconnection_delay_max_ms", .. })
    ));
}

#[test]
fn config_requires_absolute_warmup_paths() {
    let mut config = base_config();
    config.warmup.paths = vec!["api/farmers".to_string()];
    assert!(config.validate().is_err());
}

#[test]
fn config_loads_from_file() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(FULL_CONFIG.as_bytes()).unwrap();
    let config = ClientConfig::from_path(file.path()).unwrap();
    assert_eq!(config.api_base_url, "https://api.example.org/api");
}
