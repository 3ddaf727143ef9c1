//! Monitored network definitions.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

use super::validation::{ConfigError, validate_http_url};

/// Whether a network carries real value.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum NetworkClass {
    #[default]
    Test,
    Production,
}

/// One monitored network and its registry entry endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Stable identifier used in URLs, cache keys and storage.
    pub id: String,

    /// Display name (defaults to the id).
    #[serde(default)]
    pub name: String,

    /// JSON-RPC entry endpoint serving `get-pods`.
    pub rpc_url: String,

    #[serde(default)]
    pub class: NetworkClass,
}

impl NetworkConfig {
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// Validate a network list: unique non-empty ids and http(s) RPC URLs.
pub(crate) fn validate_networks(networks: &[NetworkConfig]) -> Result<(), ConfigError> {
    let mut seen = HashSet::new();
    for network in networks {
        let id = network.id.trim();
        if id.is_empty() {
            return Err(ConfigError::ValidationError(
                "network id must not be empty".to_string(),
            ));
        }
        if id.contains('/') || id.chars().any(char::is_whitespace) {
            return Err(ConfigError::ValidationError(format!(
                "network id '{id}' must not contain '/' or whitespace"
            )));
        }
        if !seen.insert(id) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate network id: '{id}'"
            )));
        }
        validate_http_url(&format!("networks.{id}.rpc_url"), &network.rpc_url)?;
    }
    Ok(())
}

/// Parse a `network=url,network=url` endpoint map.
///
/// # Examples
///
/// ```
/// use podscope::config::parse_endpoint_map;
///
/// let map = parse_endpoint_map("devnet=https://a.example/rpc, mainnet=https://b.example/rpc").unwrap();
/// assert_eq!(map["mainnet"], "https://b.example/rpc");
/// ```
pub fn parse_endpoint_map(input: &str) -> Result<BTreeMap<String, String>, ConfigError> {
    let mut map = BTreeMap::new();
    for entry in input.split(',').map(str::trim).filter(|e| !e.is_empty()) {
        let Some((network, url)) = entry.split_once('=') else {
            return Err(ConfigError::ValidationError(format!(
                "invalid RPC endpoint entry '{entry}' (expected network=url)"
            )));
        };
        let (network, url) = (network.trim(), url.trim());
        if network.is_empty() || url.is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "invalid RPC endpoint entry '{entry}' (expected network=url)"
            )));
        }
        map.insert(network.to_string(), url.to_string());
    }
    Ok(map)
}
