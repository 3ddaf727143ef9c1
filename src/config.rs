//! Configuration module for podscope.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Server settings (bind address, port, CORS origins)
//! - Database settings (URL, write buffering, retention)
//! - Collection cadence, sampling and probe fan-out
//! - Hot cache, pod-credit passthrough, alerting and integrations
//! - The monitored networks

mod app;
mod network;
mod validation;

pub use app::{
    AlertsConfig, AppConfig, CacheConfig, CollectorConfig, CreditsConfig, DatabaseConfig,
    IntegrationsConfig, ServerConfig,
};
pub use network::{NetworkClass, NetworkConfig, parse_endpoint_map};
pub use validation::{ConfigError, expand_env_vars, parse_duration};
