//! Transport Layer
//!
//! Performs one JSON-RPC call against one endpoint under a deadline and
//! returns a typed [`Result`]. The concrete [`HttpTransport`] chooses between a
//! challenge-aware path (TLS entry endpoints) and a plain, fast-failing path
//! (node-local ports).

mod challenge;
mod error;
mod http;

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use strum_macros::{AsRefStr, Display, EnumString};

pub use challenge::is_challenge;
pub use error::TransportError;
pub use http::{
    DEFAULT_PLAIN_TIMEOUT, DEFAULT_SECURE_TIMEOUT, HttpTransport, Strategy, TransportConfig,
};

/// RPC methods understood by pod nodes and registry endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, Display, AsRefStr)]
#[strum(serialize_all = "kebab-case")]
pub enum RpcMethod {
    /// Software version of the node.
    GetVersion,
    /// Resource statistics of the node.
    GetStats,
    /// Pod list (registry on entry endpoints, peer list on nodes).
    GetPods,
}

/// A single-call RPC transport.
///
/// Implementations are stateless beyond connection reuse and never panic on
/// network failures.
#[async_trait::async_trait]
pub trait RpcTransport: Send + Sync + 'static {
    /// Call `method` on `endpoint`.
    ///
    /// `timeout` overrides the strategy default when set.
    async fn call(
        &self,
        endpoint: &str,
        method: RpcMethod,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError>;
}

/// Shared transport handle.
pub type SharedTransport = Arc<dyn RpcTransport>;

/// Map a registry address (`host:gossip_port`) onto the node's RPC endpoint.
///
/// Addresses that already carry an `http(s)://` scheme are used verbatim.
pub fn node_rpc_endpoint(address: &str, rpc_port: u16) -> String {
    let lower = address.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return address.to_string();
    }

    let host = match address.rsplit_once(':') {
        Some((host, port)) if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) => host,
        _ => address,
    };
    format!("http://{host}:{rpc_port}/rpc")
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted in-memory transport for deterministic tests.

    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use serde_json::json;

    use super::*;

    /// Transport answering from a script. Unscripted calls fail with a
    /// connection error. Optionally sleeps per call and tracks how many
    /// `get-version` calls (one per probed node) are in flight at once.
    #[derive(Default)]
    pub(crate) struct ScriptedTransport {
        responses: Mutex<HashMap<(String, RpcMethod), Result<Value, TransportError>>>,
        calls: Mutex<Vec<(String, RpcMethod)>>,
        latency: Duration,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    impl ScriptedTransport {
        pub(crate) fn new() -> Self {
            Self::default()
        }

        pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
            self.latency = latency;
            self
        }

        pub(crate) fn respond(
            &self,
            endpoint: &str,
            method: RpcMethod,
            result: Result<Value, TransportError>,
        ) {
            self.responses
                .lock()
                .unwrap()
                .insert((endpoint.to_string(), method), result);
        }

        /// Script a healthy node: version, stats and an empty peer list.
        pub(crate) fn healthy_node(&self, endpoint: &str, version: &str, cpu: f64, file_size: u64) {
            self.respond(endpoint, RpcMethod::GetVersion, Ok(json!({ "version": version })));
            self.respond(
                endpoint,
                RpcMethod::GetStats,
                Ok(stats_json(cpu, 2_000, 8_000, file_size, 3)),
            );
            self.respond(
                endpoint,
                RpcMethod::GetPods,
                Ok(json!({ "pods": [], "total_count": 0 })),
            );
        }

        pub(crate) fn max_in_flight(&self) -> usize {
            self.max_in_flight.load(Ordering::SeqCst)
        }

        pub(crate) fn calls(&self) -> Vec<(String, RpcMethod)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait::async_trait]
    impl RpcTransport for ScriptedTransport {
        async fn call(
            &self,
            endpoint: &str,
            method: RpcMethod,
            _timeout: Option<Duration>,
        ) -> Result<Value, TransportError> {
            self.calls
                .lock()
                .unwrap()
                .push((endpoint.to_string(), method));

            let tracked = method == RpcMethod::GetVersion;
            if tracked {
                let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            }
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            if tracked {
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
            }

            self.responses
                .lock()
                .unwrap()
                .get(&(endpoint.to_string(), method))
                .cloned()
                .unwrap_or_else(|| Err(TransportError::Connection("connection refused".into())))
        }
    }

    pub(crate) fn stats_json(
        cpu: f64,
        ram_used: u64,
        ram_total: u64,
        file_size: u64,
        streams: u64,
    ) -> Value {
        json!({
            "cpu_percent": cpu,
            "ram_used": ram_used,
            "ram_total": ram_total,
            "file_size": file_size,
            "uptime": 3600,
            "active_streams": streams,
            "packets_received": 100,
            "packets_sent": 120,
            "total_bytes": 4096,
        })
    }

    /// `get-pods` payload from `(address, pubkey, version, last_seen)` tuples.
    pub(crate) fn pods_json(pods: &[(&str, &str, &str, i64)]) -> Value {
        let pods: Vec<Value> = pods
            .iter()
            .map(|(address, pubkey, version, last_seen)| {
                json!({
                    "address": address,
                    "pubkey": pubkey,
                    "version": version,
                    "last_seen_timestamp": last_seen,
                })
            })
            .collect();
        let total = pods.len();
        json!({ "pods": pods, "total_count": total })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_rpc_method_names() {
        assert_eq!(RpcMethod::GetVersion.as_ref(), "get-version");
        assert_eq!(RpcMethod::GetStats.as_ref(), "get-stats");
        assert_eq!(RpcMethod::GetPods.as_ref(), "get-pods");
        assert_eq!(RpcMethod::from_str("get-pods").unwrap(), RpcMethod::GetPods);
        assert!(RpcMethod::from_str("get-secrets").is_err());
    }

    #[test]
    fn test_node_rpc_endpoint() {
        assert_eq!(
            node_rpc_endpoint("10.0.0.5:9001", 6000),
            "http://10.0.0.5:6000/rpc"
        );
        assert_eq!(node_rpc_endpoint("10.0.0.5", 6000), "http://10.0.0.5:6000/rpc");
        assert_eq!(node_rpc_endpoint("[::1]:9001", 6000), "http://[::1]:6000/rpc");
        assert_eq!(
            node_rpc_endpoint("https://node.example.org/rpc", 6000),
            "https://node.example.org/rpc"
        );
    }
}
