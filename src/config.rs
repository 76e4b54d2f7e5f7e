//! Structural validation of every configuration object (spec §6). Every
//! config struct is plain `serde`-derived data the application builds
//! directly (builder-style wiring — no DI/reflection, per DESIGN NOTES),
//! with a `validate()` that rejects anything spec §6 doesn't recognize,
//! grounded on the teacher's `Config::validate` in `src/config.rs` (same
//! "reject every unrecognized/out-of-range field with a field-naming
//! message" shape, but returning a typed error instead of `anyhow::bail!`).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::instance::{Filter, Metadata, Protocol};

/// One variant per class of validation failure, each naming the offending
/// field so the message is actionable without string-matching.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigValidationError {
    #[error("'{field}' must not be empty")]
    Empty { field: &'static str },

    #[error("'{field}' must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        min: i64,
        max: i64,
        value: i64,
    },

    #[error("'{field}' must be greater than zero")]
    MustBePositive { field: &'static str },

    #[error("'{field}' has an invalid value: {value}")]
    InvalidFormat { field: &'static str, value: String },

    #[error("unknown configuration option '{field}'")]
    UnknownOption { field: String },
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigValidationError> {
    if value.trim().is_empty() {
        Err(ConfigValidationError::Empty { field })
    } else {
        Ok(())
    }
}

fn require_port(field: &'static str, port: i32) -> Result<(), ConfigValidationError> {
    if (0..=65535).contains(&port) {
        Ok(())
    } else {
        Err(ConfigValidationError::OutOfRange {
            field,
            min: 0,
            max: 65535,
            value: port as i64,
        })
    }
}

fn require_positive_duration(
    field: &'static str,
    duration: Option<Duration>,
) -> Result<(), ConfigValidationError> {
    match duration {
        Some(d) if d.is_zero() => Err(ConfigValidationError::MustBePositive { field }),
        _ => Ok(()),
    }
}

/// Convert a `serde_json` deserialization failure that names an unrecognized
/// field (from `#[serde(deny_unknown_fields)]`) into a typed validation
/// error rather than leaking a raw `serde_json::Error`.
fn map_deserialize_error(field_hint: &'static str, err: serde_json::Error) -> ConfigValidationError {
    let msg = err.to_string();
    if msg.contains("unknown field") {
        ConfigValidationError::UnknownOption { field: msg }
    } else {
        ConfigValidationError::InvalidFormat {
            field: field_hint,
            value: msg,
        }
    }
}

/// Registrar configuration (spec §6: `name`, `port`, `host`, `protocol`,
/// `healthCheckPath`, `healthCheckInterval`, `metadata`, `zone`, `tags`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegistrarConfig {
    pub name: String,
    pub port: i32,
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub health_check_path: Option<String>,
    #[serde(default)]
    pub health_check_interval: Option<Duration>,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub zone: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

impl RegistrarConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        require_non_empty("name", &self.name)?;
        require_port("port", self.port)?;
        require_positive_duration("healthCheckInterval", self.health_check_interval)?;
        Ok(())
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigValidationError> {
        let cfg: Self = serde_json::from_value(value).map_err(|e| map_deserialize_error("registrar", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn default_health_check_path(&self) -> &str {
        self.health_check_path.as_deref().unwrap_or("/health")
    }

    pub fn health_check_interval_or_default(&self) -> Duration {
        self.health_check_interval.unwrap_or(Duration::from_secs(30))
    }
}

/// Discovery client configuration (spec §6: `cacheEnabled`, `cacheTTL`, `refreshInterval`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DiscoveryClientConfig {
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    #[serde(default)]
    pub cache_ttl: Option<Duration>,
    #[serde(default)]
    pub refresh_interval: Option<Duration>,
}

fn default_true() -> bool {
    true
}

impl Default for DiscoveryClientConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl: None,
            refresh_interval: None,
        }
    }
}

impl DiscoveryClientConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        require_positive_duration("cacheTTL", self.cache_ttl)?;
        require_positive_duration("refreshInterval", self.refresh_interval)?;
        Ok(())
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigValidationError> {
        let cfg: Self = serde_json::from_value(value).map_err(|e| map_deserialize_error("discoveryClient", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn cache_ttl_or_default(&self) -> Duration {
        self.cache_ttl.unwrap_or(Duration::from_secs(30))
    }
}

/// Service client configuration (spec §6: `serviceName`, `loadBalancingStrategy`,
/// `filter`, `timeout`, `retries`, `retryDelay`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceClientConfig {
    pub service_name: String,
    #[serde(default = "default_strategy")]
    pub load_balancing_strategy: String,
    #[serde(default)]
    pub filter: Option<Filter>,
    #[serde(default = "default_timeout")]
    pub timeout: Duration,
    #[serde(default = "default_retries")]
    pub retries: u32,
    #[serde(default = "default_retry_delay")]
    pub retry_delay: Duration,
}

fn default_strategy() -> String {
    "round-robin".to_string()
}
fn default_timeout() -> Duration {
    Duration::from_secs(5)
}
fn default_retries() -> u32 {
    3
}
fn default_retry_delay() -> Duration {
    Duration::from_millis(1000)
}

impl ServiceClientConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        require_non_empty("serviceName", &self.service_name)?;
        if self.timeout.is_zero() {
            return Err(ConfigValidationError::MustBePositive { field: "timeout" });
        }
        Ok(())
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigValidationError> {
        let cfg: Self = serde_json::from_value(value).map_err(|e| map_deserialize_error("serviceClient", e))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

/// Redis backend configuration (spec §6: `keyPrefix`, `ttl` seconds, `host`,
/// `port`). `host`/`port` are the sole connection knobs; [`Self::url`]
/// builds the actual `redis://` URL the backend connects with, so there is
/// no separate `url` field that could silently disagree with `port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisBackendConfig {
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
    #[serde(default = "default_redis_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_redis_host")]
    pub host: String,
    #[serde(default = "default_redis_port")]
    pub port: i32,
}

fn default_key_prefix() -> String {
    "hazeljs:discovery:".to_string()
}
fn default_redis_ttl_secs() -> u64 {
    90
}
fn default_redis_host() -> String {
    "127.0.0.1".to_string()
}
fn default_redis_port() -> i32 {
    6379
}

impl Default for RedisBackendConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            ttl_secs: default_redis_ttl_secs(),
            host: default_redis_host(),
            port: default_redis_port(),
        }
    }
}

impl RedisBackendConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if self.ttl_secs == 0 {
            return Err(ConfigValidationError::MustBePositive { field: "ttl" });
        }
        require_non_empty("host", &self.host)?;
        require_port("port", self.port)?;
        Ok(())
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigValidationError> {
        let cfg: Self = serde_json::from_value(value).map_err(|e| map_deserialize_error("redisBackend", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The `redis://host:port` URL the backend connects with.
    pub fn url(&self) -> String {
        format!("redis://{}:{}", self.host, self.port)
    }
}

/// Consul backend configuration (spec §6: `ttl` matching `\d+[smh]`, `host`,
/// `port`). `host`/`port` are the sole connection knobs; [`Self::address`]
/// builds the agent base URL the backend issues HTTP calls against, so
/// there is no separate `address` field that could silently disagree with
/// `port`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsulBackendConfig {
    #[serde(default = "default_consul_ttl")]
    pub ttl: String,
    #[serde(default = "default_consul_host")]
    pub host: String,
    #[serde(default = "default_consul_port")]
    pub port: i32,
    #[serde(default)]
    pub token: Option<String>,
}

fn default_consul_ttl() -> String {
    "30s".to_string()
}
fn default_consul_host() -> String {
    "127.0.0.1".to_string()
}
fn default_consul_port() -> i32 {
    8500
}

impl Default for ConsulBackendConfig {
    fn default() -> Self {
        Self {
            ttl: default_consul_ttl(),
            host: default_consul_host(),
            port: default_consul_port(),
            token: None,
        }
    }
}

static TTL_PATTERN: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

fn ttl_pattern() -> &'static regex::Regex {
    TTL_PATTERN.get_or_init(|| regex::Regex::new(r"^\d+[smh]$").unwrap())
}

impl ConsulBackendConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        if !ttl_pattern().is_match(&self.ttl) {
            return Err(ConfigValidationError::InvalidFormat {
                field: "ttl",
                value: self.ttl.clone(),
            });
        }
        require_non_empty("host", &self.host)?;
        require_port("port", self.port)?;
        Ok(())
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigValidationError> {
        let cfg: Self = serde_json::from_value(value).map_err(|e| map_deserialize_error("consulBackend", e))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// The agent base URL the backend issues HTTP calls against.
    pub fn address(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// Parse a Consul-style TTL string (`\d+[smh]`) into a [`Duration`],
/// falling back to the default 30s when the format doesn't match (spec
/// §4.1.3: "otherwise the default 30s applies"). Kept independent of
/// [`ConsulBackendConfig::validate`] so a backend constructed from
/// already-validated config still degrades gracefully if ever fed a raw
/// string directly (e.g. in tests).
pub fn parse_consul_ttl(ttl: &str) -> Duration {
    let full = regex::Regex::new(r"^(\d+)([smh])$").unwrap();
    let Some(captures) = full.captures(ttl) else {
        return Duration::from_secs(30);
    };
    let value: u64 = captures[1].parse().unwrap_or(30);
    match &captures[2] {
        "s" => Duration::from_secs(value),
        "m" => Duration::from_secs(value * 60),
        "h" => Duration::from_secs(value * 3600),
        _ => Duration::from_secs(30),
    }
}

/// Kubernetes backend configuration (spec §6: `namespace`, `labelSelector`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubernetesBackendConfig {
    pub namespace: String,
    #[serde(default = "default_label_selector")]
    pub label_selector: String,
}

fn default_label_selector() -> String {
    "app.kubernetes.io/managed-by=hazeljs".to_string()
}

impl KubernetesBackendConfig {
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        require_non_empty("namespace", &self.namespace)?;
        Ok(())
    }

    pub fn from_json(value: serde_json::Value) -> Result<Self, ConfigValidationError> {
        let cfg: Self = serde_json::from_value(value).map_err(|e| map_deserialize_error("kubernetesBackend", e))?;
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn registrar_rejects_empty_name() {
        let cfg = RegistrarConfig {
            name: "".to_string(),
            port: 8080,
            host: None,
            protocol: Protocol::Http,
            health_check_path: None,
            health_check_interval: None,
            metadata: Metadata::new(),
            zone: None,
            tags: Vec::new(),
        };
        assert_eq!(cfg.validate(), Err(ConfigValidationError::Empty { field: "name" }));
    }

    #[test]
    fn registrar_port_boundaries() {
        // B1: 0 and 65535 accepted; -1 and 65536 rejected.
        let base = RegistrarConfig {
            name: "svc".to_string(),
            port: 0,
            host: None,
            protocol: Protocol::Http,
            health_check_path: None,
            health_check_interval: None,
            metadata: Metadata::new(),
            zone: None,
            tags: Vec::new(),
        };
        assert!(base.validate().is_ok());

        let mut high = base.clone();
        high.port = 65535;
        assert!(high.validate().is_ok());

        let mut negative = base.clone();
        negative.port = -1;
        assert!(negative.validate().is_err());

        let mut too_high = base.clone();
        too_high.port = 65536;
        assert!(too_high.validate().is_err());
    }

    #[test]
    fn discovery_client_rejects_zero_cache_ttl() {
        let cfg = DiscoveryClientConfig {
            cache_enabled: true,
            cache_ttl: Some(Duration::ZERO),
            refresh_interval: None,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn service_client_requires_service_name() {
        let cfg = ServiceClientConfig {
            service_name: "  ".to_string(),
            load_balancing_strategy: "round-robin".to_string(),
            filter: None,
            timeout: Duration::from_secs(5),
            retries: 3,
            retry_delay: Duration::from_millis(1000),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn consul_ttl_pattern_validation() {
        let mut cfg = ConsulBackendConfig::default();
        cfg.ttl = "30s".to_string();
        assert!(cfg.validate().is_ok());
        cfg.ttl = "5m".to_string();
        assert!(cfg.validate().is_ok());
        cfg.ttl = "1h".to_string();
        assert!(cfg.validate().is_ok());
        cfg.ttl = "thirty seconds".to_string();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn consul_ttl_parse_falls_back_to_default() {
        assert_eq!(parse_consul_ttl("30s"), Duration::from_secs(30));
        assert_eq!(parse_consul_ttl("2m"), Duration::from_secs(120));
        assert_eq!(parse_consul_ttl("1h"), Duration::from_secs(3600));
        assert_eq!(parse_consul_ttl("garbage"), Duration::from_secs(30));
    }

    #[test]
    fn consul_address_reflects_configured_host_and_port() {
        let cfg = ConsulBackendConfig {
            host: "consul.internal".to_string(),
            port: 8501,
            ..Default::default()
        };
        assert_eq!(cfg.address(), "http://consul.internal:8501");
    }

    #[test]
    fn redis_url_reflects_configured_host_and_port() {
        let cfg = RedisBackendConfig {
            host: "redis.internal".to_string(),
            port: 7000,
            ..Default::default()
        };
        assert_eq!(cfg.url(), "redis://redis.internal:7000");
    }

    #[test]
    fn kubernetes_requires_non_empty_namespace() {
        let cfg = KubernetesBackendConfig {
            namespace: "".to_string(),
            label_selector: default_label_selector(),
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn unknown_option_rejected() {
        let value = json!({"name": "svc", "port": 8080, "bogusField": true});
        let err = RegistrarConfig::from_json(value).unwrap_err();
        assert!(matches!(err, ConfigValidationError::UnknownOption { .. }));
    }
}
