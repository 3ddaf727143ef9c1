//! Application configuration structures.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cache::DEFAULT_CACHE_TTL;
use crate::collector::{
    AggregatorConfig, DEFAULT_BATCH_SIZE, DEFAULT_INITIAL_DELAY,
    DEFAULT_REGISTRY_SNAPSHOT_INTERVAL, DEFAULT_RPC_PORT, SampleSize, Schedule,
};
use crate::credits::DEFAULT_CREDITS_TTL;
use crate::storage::{DEFAULT_CHANNEL_CAPACITY, DEFAULT_RETENTION};
use crate::transport::{DEFAULT_PLAIN_TIMEOUT, DEFAULT_SECURE_TIMEOUT, TransportConfig};

use super::network::{NetworkClass, NetworkConfig, validate_networks};
use super::validation::{ConfigError, expand_env_vars, expand_optional, validate_http_url};

/// Default database URL.
pub const DEFAULT_DATABASE_URL: &str = "sqlite:data/podscope.db";

/// Default node-history batch size.
pub const DEFAULT_WRITE_BATCH_SIZE: usize = 500;

/// Default node-history flush interval.
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// Server Configuration
// =============================================================================

/// Web server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Server bind address (default: "0.0.0.0").
    pub bind: String,

    /// Server port (default: 8080).
    pub port: u16,

    /// Allowed CORS origins; empty allows any origin, `*` likewise.
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
            cors_origins: Vec::new(),
        }
    }
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Snapshot store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite URL; empty disables persistence.
    pub url: String,

    /// MPSC channel capacity for write operations.
    pub channel_capacity: usize,

    /// Node-history rows buffered before a write.
    pub batch_size: usize,

    /// Maximum time a buffered row waits.
    #[serde(with = "humantime_serde")]
    pub flush_interval: Duration,

    /// Records older than this are purged after each cycle.
    #[serde(with = "humantime_serde")]
    pub retention: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DATABASE_URL.to_string(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_WRITE_BATCH_SIZE,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
            retention: DEFAULT_RETENTION,
        }
    }
}

impl DatabaseConfig {
    pub fn is_enabled(&self) -> bool {
        !self.url.trim().is_empty()
    }
}

// =============================================================================
// Collector Configuration
// =============================================================================

/// Collection cadence, sampling and probing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    /// Fixed interval between cycles (exclusive with `cron`).
    #[serde(with = "humantime_serde")]
    pub interval: Option<Duration>,

    /// Cron expression, 5 fields (`*/5 * * * *`) or 6 with seconds.
    pub cron: Option<String>,

    /// Delay before the first cycle after startup.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,

    /// Pods probed per network per cycle: a number or `all`.
    pub sample_size: SampleSize,

    /// Probes in flight at once.
    pub batch_size: usize,

    /// Pause between probe waves.
    #[serde(with = "humantime_serde")]
    pub batch_delay: Duration,

    /// No new probe wave starts after this much time in one network.
    #[serde(with = "humantime_serde")]
    pub cycle_budget: Option<Duration>,

    /// Port of the node-local RPC service.
    pub rpc_port: u16,

    /// Deadline for node-local calls.
    #[serde(with = "humantime_serde")]
    pub node_timeout: Duration,

    /// Deadline for external (https) calls.
    #[serde(with = "humantime_serde")]
    pub secure_timeout: Duration,

    /// Minimum spacing between stored registry listings per network.
    #[serde(with = "humantime_serde")]
    pub registry_snapshot_interval: Duration,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval: None,
            cron: None,
            initial_delay: DEFAULT_INITIAL_DELAY,
            sample_size: SampleSize::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::ZERO,
            cycle_budget: None,
            rpc_port: DEFAULT_RPC_PORT,
            node_timeout: DEFAULT_PLAIN_TIMEOUT,
            secure_timeout: DEFAULT_SECURE_TIMEOUT,
            registry_snapshot_interval: DEFAULT_REGISTRY_SNAPSHOT_INTERVAL,
        }
    }
}

impl CollectorConfig {
    /// The cycle schedule: cron, interval, or the 5 minute default.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` when both are set or the cron
    /// expression is invalid.
    pub fn schedule(&self) -> Result<Schedule, ConfigError> {
        match (&self.interval, &self.cron) {
            (Some(_), Some(_)) => Err(ConfigError::ValidationError(
                "collector interval and cron are mutually exclusive".to_string(),
            )),
            (None, Some(expr)) => Schedule::cron(normalize_cron(expr))
                .map_err(|e| ConfigError::ValidationError(format!("collector cron: {e}"))),
            (Some(interval), None) => Ok(Schedule::interval(*interval)),
            (None, None) => Ok(Schedule::default()),
        }
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            sample_size: self.sample_size,
            batch_size: self.batch_size,
            batch_delay: self.batch_delay,
            cycle_budget: self.cycle_budget,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            plain_timeout: self.node_timeout,
            secure_timeout: self.secure_timeout,
        }
    }
}

/// Accept classic 5-field cron by pinning seconds to 0.
fn normalize_cron(expr: &str) -> String {
    let expr = expr.trim();
    if expr.split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    }
}

// =============================================================================
// Cache, Credits, Alerts, Integrations
// =============================================================================

/// Hot cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which a cached snapshot is reported stale.
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_CACHE_TTL,
        }
    }
}

/// Pod-credit passthrough.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CreditsConfig {
    /// Upstream credit service; unset disables `/api/pod-credits`.
    pub url: Option<String>,

    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
}

impl Default for CreditsConfig {
    fn default() -> Self {
        Self {
            url: None,
            ttl: DEFAULT_CREDITS_TTL,
        }
    }
}

/// Outbound alert channel. Without a webhook, alerts are only logged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub webhook_url: Option<String>,

    /// Bearer token sent to the webhook.
    pub token: Option<String>,
}

/// Credentials of downstream consumers, reported by `/readyz`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IntegrationsConfig {
    pub assistant_api_key: Option<String>,
}

impl IntegrationsConfig {
    /// Names of the integrations that have credentials.
    pub fn configured(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if self.assistant_api_key.is_some() {
            names.push("assistant");
        }
        names
    }
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub collector: CollectorConfig,
    pub cache: CacheConfig,
    pub credits: CreditsConfig,
    pub alerts: AlertsConfig,
    pub integrations: IntegrationsConfig,
    pub networks: Vec<NetworkConfig>,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config = Self::from_yaml(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse YAML and expand `${VAR}` references in URL and credential fields.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yaml::from_str(content)?;
        config.expand_env();
        Ok(config)
    }

    fn expand_env(&mut self) {
        self.database.url = expand_env_vars(&self.database.url);
        expand_optional(&mut self.credits.url);
        expand_optional(&mut self.alerts.webhook_url);
        expand_optional(&mut self.alerts.token);
        expand_optional(&mut self.integrations.assistant_api_key);
        for network in &mut self.networks {
            network.rpc_url = expand_env_vars(&network.rpc_url);
        }
    }

    /// Point networks at new RPC URLs; unknown ids are added as test networks.
    pub fn apply_endpoint_overrides(&mut self, endpoints: BTreeMap<String, String>) {
        for (id, url) in endpoints {
            match self.networks.iter_mut().find(|n| n.id == id) {
                Some(network) => network.rpc_url = url,
                None => self.networks.push(NetworkConfig {
                    name: id.clone(),
                    id,
                    rpc_url: url,
                    class: NetworkClass::Test,
                }),
            }
        }
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.server.bind.parse::<IpAddr>().map_err(|_| {
            ConfigError::ValidationError(format!(
                "invalid server bind address: '{}'",
                self.server.bind
            ))
        })?;
        if self.server.port == 0 {
            return Err(ConfigError::ValidationError(
                "server port must be non-zero".to_string(),
            ));
        }
        for origin in &self.server.cors_origins {
            if origin != "*" {
                validate_http_url("server.cors_origins", origin)?;
            }
        }

        if self.database.is_enabled() {
            if self.database.channel_capacity == 0 {
                return Err(ConfigError::ValidationError(
                    "database channel_capacity must be positive".to_string(),
                ));
            }
            if self.database.batch_size == 0 {
                return Err(ConfigError::ValidationError(
                    "database batch_size must be positive".to_string(),
                ));
            }
            if self.database.retention.is_zero() {
                return Err(ConfigError::ValidationError(
                    "database retention must be positive".to_string(),
                ));
            }
        }

        self.collector.schedule()?;
        if self.collector.batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "collector batch_size must be positive".to_string(),
            ));
        }
        if self.collector.sample_size == SampleSize::Limit(0) {
            return Err(ConfigError::ValidationError(
                "collector sample_size must be at least 1".to_string(),
            ));
        }
        if self.collector.rpc_port == 0 {
            return Err(ConfigError::ValidationError(
                "collector rpc_port must be non-zero".to_string(),
            ));
        }

        if self.cache.ttl.is_zero() {
            return Err(ConfigError::ValidationError(
                "cache ttl must be positive".to_string(),
            ));
        }
        if let Some(url) = &self.credits.url {
            validate_http_url("credits.url", url)?;
        }
        if let Some(url) = &self.alerts.webhook_url {
            validate_http_url("alerts.webhook_url", url)?;
        }

        validate_networks(&self.networks)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const SAMPLE: &str = r#"
server:
  bind: 127.0.0.1
  port: 9090
  cors_origins: ["https://dash.example.org"]
database:
  url: "sqlite::memory:"
  retention: 7d
collector:
  cron: "*/5 * * * *"
  sample_size: all
  batch_size: 8
  batch_delay: 250ms
  cycle_budget: 2m
alerts:
  webhook_url: https://hooks.example.org/alerts
  token: ${PODSCOPE_TEST_UNSET_TOKEN:-fallback}
networks:
  - id: devnet
    rpc_url: https://devnet.example.org/rpc
  - id: mainnet
    name: Mainnet
    rpc_url: https://mainnet.example.org/rpc
    class: production
"#;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.database.url, DEFAULT_DATABASE_URL);
        assert_eq!(config.database.retention, DEFAULT_RETENTION);
        assert_eq!(config.collector.schedule().unwrap(), Schedule::default());
        assert_eq!(config.collector.sample_size, SampleSize::Limit(20));
        assert_eq!(config.collector.rpc_port, 6000);
        assert_eq!(config.cache.ttl, Duration::from_secs(60));
    }

    #[test]
    fn test_load_yaml_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = AppConfig::load(file.path()).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.cors_origins.len(), 1);
        assert_eq!(config.database.retention, Duration::from_secs(7 * 86_400));
        assert_eq!(
            config.collector.schedule().unwrap(),
            Schedule::Cron("0 */5 * * * *".to_string())
        );
        assert_eq!(config.collector.sample_size, SampleSize::All);
        assert_eq!(config.collector.batch_delay, Duration::from_millis(250));
        assert_eq!(config.collector.cycle_budget, Some(Duration::from_secs(120)));
        assert_eq!(config.alerts.token.as_deref(), Some("fallback"));
        assert_eq!(config.networks.len(), 2);
        assert_eq!(config.networks[1].class, NetworkClass::Production);

        let aggregator = config.collector.aggregator_config();
        assert_eq!(aggregator.batch_size, 8);
    }

    #[test]
    fn test_interval_and_cron_exclusive() {
        let mut config = AppConfig::default();
        config.collector.interval = Some(Duration::from_secs(60));
        assert_eq!(
            config.collector.schedule().unwrap(),
            Schedule::Interval(Duration::from_secs(60))
        );

        config.collector.cron = Some("0 * * * * *".to_string());
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("mutually exclusive"));
    }

    #[test]
    fn test_invalid_cron_rejected() {
        let config = AppConfig::from_yaml("collector:\n  cron: \"not a cron\"\n").unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("collector cron"));
    }

    #[test]
    fn test_sample_size_zero_rejected_at_parse() {
        assert!(AppConfig::from_yaml("collector:\n  sample_size: 0\n").is_err());
        assert!(AppConfig::from_yaml("collector:\n  sample_size: some\n").is_err());
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = AppConfig::default();
        config.server.bind = "not-an-ip".to_string();
        assert!(
            config
                .validate()
                .unwrap_err()
                .to_string()
                .contains("invalid server bind address")
        );

        let mut config = AppConfig::default();
        config.collector.batch_size = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.credits.url = Some("credits.example.org".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_empty_database_url_disables_store() {
        let mut config = AppConfig::default();
        config.database.url = String::new();
        config.database.channel_capacity = 0;
        assert!(!config.database.is_enabled());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_endpoint_overrides() {
        let mut config = AppConfig::from_yaml(SAMPLE).unwrap();
        config.apply_endpoint_overrides(BTreeMap::from([
            ("devnet".to_string(), "http://10.0.0.1:6000/rpc".to_string()),
            ("localnet".to_string(), "http://127.0.0.1:6000/rpc".to_string()),
        ]));

        assert_eq!(config.networks.len(), 3);
        assert_eq!(config.networks[0].rpc_url, "http://10.0.0.1:6000/rpc");
        assert_eq!(config.networks[2].id, "localnet");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_integrations_configured() {
        let mut integrations = IntegrationsConfig::default();
        assert!(integrations.configured().is_empty());
        integrations.assistant_api_key = Some("key".to_string());
        assert_eq!(integrations.configured(), vec!["assistant"]);
    }

    #[test]
    fn test_shipped_config_is_valid() {
        let config = AppConfig::from_yaml(include_str!("../../configs/config.yaml")).unwrap();
        config.validate().unwrap();
        assert_eq!(config.networks.len(), 2);
        assert_eq!(config.collector.schedule().unwrap(), Schedule::interval(Duration::from_secs(300)));
        assert!(config.credits.url.is_none());
    }
}
