//! Registry client: fetches a network's pod list.

use std::time::Duration;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::collector::{NodeRecord, Registry};
use crate::config::NetworkConfig;
use crate::transport::{RpcMethod, SharedTransport, TransportError};

/// Errors from a registry fetch.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RegistryError {
    /// The registry endpoint could not be reached or answered garbage.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The registry answered, but listed no pods.
    #[error("no pods found")]
    Empty,
}

impl RegistryError {
    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(e) => e.kind(),
            Self::Empty => "registry_empty",
        }
    }
}

#[derive(Debug, Deserialize)]
struct PodsPayload {
    #[serde(default)]
    pods: Option<Vec<NodeRecord>>,
    #[serde(default)]
    total_count: Option<u64>,
}

/// Fetches registries through the transport layer.
#[derive(Clone)]
pub struct RegistryClient {
    transport: SharedTransport,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl RegistryClient {
    /// Create a client using the transport's default deadline.
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            timeout: None,
        }
    }

    /// Override the per-call deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Call `get-pods` on the network's entry endpoint.
    ///
    /// Pods come back in registry order; use [`Registry::sort_freshest_first`]
    /// before sampling.
    ///
    /// # Errors
    /// - `RegistryError::Transport` if the endpoint fails or the payload has the wrong shape
    /// - `RegistryError::Empty` if the pod list is missing or empty
    pub async fn get_pods(&self, network: &NetworkConfig) -> Result<Registry, RegistryError> {
        let value = self
            .transport
            .call(&network.rpc_url, RpcMethod::GetPods, self.timeout)
            .await?;
        let registry = parse_registry(value)?;
        tracing::debug!(
            network = %network.id,
            pods = registry.pods.len(),
            total = registry.total_count,
            "Registry fetched"
        );
        Ok(registry)
    }
}

/// Parse a `get-pods` result.
pub(crate) fn parse_registry(value: Value) -> Result<Registry, RegistryError> {
    let payload: PodsPayload = serde_json::from_value(value)
        .map_err(|e| TransportError::MalformedResponse(format!("invalid pod list: {e}")))?;

    let pods = payload.pods.unwrap_or_default();
    if pods.is_empty() {
        return Err(RegistryError::Empty);
    }

    let listed = pods.len() as u64;
    let total_count = payload.total_count.unwrap_or(listed).max(listed);
    Ok(Registry { pods, total_count })
}

/// Count peers in a node's own `get-pods` answer; an empty list is zero peers.
pub(crate) fn count_peers(value: Value) -> Option<u64> {
    let payload: PodsPayload = serde_json::from_value(value).ok()?;
    let listed = payload.pods.as_ref().map_or(0, |p| p.len() as u64);
    Some(payload.total_count.unwrap_or(listed).max(listed))
}
