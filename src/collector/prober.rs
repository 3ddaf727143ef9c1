//! Node prober: one node, three concurrent calls, one [`NodeStats`].

use std::time::Duration;

use serde_json::Value;

use crate::collector::registry::count_peers;
use crate::collector::{NodeRecord, NodeStats, NodeStatus};
use crate::transport::{RpcMethod, SharedTransport, TransportError, node_rpc_endpoint};

/// Default RPC port that pod nodes listen on.
pub const DEFAULT_RPC_PORT: u16 = 6000;

/// Probes individual nodes.
///
/// Probe failures are data, not errors: `probe` always returns a populated
/// [`NodeStats`], classifying the node offline when it answered nothing useful.
#[derive(Clone)]
pub struct NodeProber {
    transport: SharedTransport,
    rpc_port: u16,
    timeout: Option<Duration>,
}

impl std::fmt::Debug for NodeProber {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeProber")
            .field("rpc_port", &self.rpc_port)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl NodeProber {
    pub fn new(transport: SharedTransport, rpc_port: u16) -> Self {
        Self {
            transport,
            rpc_port,
            timeout: None,
        }
    }

    /// Override the per-call deadline (defaults to the transport's plain timeout).
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Probe one node by address.
    ///
    /// The node is offline iff both `get-version` and `get-stats` fail;
    /// `get-pods` is best-effort.
    pub async fn probe(&self, address: &str) -> NodeStats {
        let endpoint = node_rpc_endpoint(address, self.rpc_port);
        let (version, stats, peers) = tokio::join!(
            self.transport
                .call(&endpoint, RpcMethod::GetVersion, self.timeout),
            self.transport.call(&endpoint, RpcMethod::GetStats, self.timeout),
            self.transport.call(&endpoint, RpcMethod::GetPods, self.timeout),
        );

        let node = classify(address, version, stats, peers);
        if let Some(error) = &node.error {
            tracing::debug!(address = %address, status = %node.status, error = %error, "Probe incomplete");
        }
        node
    }

    /// Probe a registry entry, filling identity and last-known version from the registry.
    pub async fn probe_record(&self, record: &NodeRecord) -> NodeStats {
        let mut node = self.probe(&record.address).await;
        node.pubkey = record.pubkey.clone();
        if node.version.is_none() {
            node.version = record.version.clone();
        }
        node
    }
}

/// Build a [`NodeStats`] from the three call outcomes.
fn classify(
    address: &str,
    version: Result<Value, TransportError>,
    stats: Result<Value, TransportError>,
    peers: Result<Value, TransportError>,
) -> NodeStats {
    let mut node = NodeStats::offline(address);
    let mut failures = Vec::new();

    let version_ok = match version {
        Ok(value) => {
            node.version = parse_version(&value);
            true
        }
        Err(e) => {
            failures.push(format!("get-version: {e}"));
            false
        }
    };

    let stats_ok = match stats {
        Ok(value) => {
            apply_stats(&mut node, &value);
            true
        }
        Err(e) => {
            failures.push(format!("get-stats: {e}"));
            false
        }
    };

    match peers {
        Ok(value) => node.peers_count = count_peers(value),
        Err(e) => failures.push(format!("get-pods: {e}")),
    }

    if version_ok || stats_ok {
        node.status = NodeStatus::Online;
    }
    if !failures.is_empty() {
        node.error = Some(failures.join("; "));
    }
    node
}

/// `get-version` answers either `{"version": "x"}` or a bare string.
fn parse_version(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Object(map) => map
            .get("version")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned),
        _ => None,
    }
}

fn apply_stats(node: &mut NodeStats, value: &Value) {
    node.cpu_percent = value
        .get("cpu_percent")
        .and_then(Value::as_f64)
        .filter(|v| v.is_finite());
    node.ram_used = field_u64(value, "ram_used");
    node.ram_total = field_u64(value, "ram_total");
    node.file_size = field_u64(value, "file_size");
    node.uptime_seconds = field_u64(value, "uptime").or_else(|| field_u64(value, "uptime_seconds"));
    node.active_streams = field_u64(value, "active_streams");
    node.packets_received = field_u64(value, "packets_received");
    node.packets_sent = field_u64(value, "packets_sent");
    node.total_bytes = field_u64(value, "total_bytes");
    node.ram_percent = ram_percent(node.ram_used, node.ram_total);
}

/// Integer fields sometimes arrive as floats.
fn field_u64(value: &Value, key: &str) -> Option<u64> {
    let field = value.get(key)?;
    field.as_u64().or_else(|| {
        field
            .as_f64()
            .filter(|v| v.is_finite() && *v >= 0.0)
            .map(|v| v as u64)
    })
}

fn ram_percent(used: Option<u64>, total: Option<u64>) -> Option<f64> {
    match (used, total) {
        (Some(used), Some(total)) if total > 0 => Some(used as f64 / total as f64 * 100.0),
        _ => None,
    }
}
