//! Fan-out aggregator: registry -> sample -> batched probes -> snapshot.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use tokio::time::Instant;

use crate::clock::SharedClock;
use crate::collector::registry::{RegistryClient, RegistryError};
use crate::collector::{
    NetworkSnapshot, NodeProber, NodeRecord, NodeStats, Registry, SampleSize,
};
use crate::config::NetworkConfig;

/// Default number of probes in flight at once.
pub const DEFAULT_BATCH_SIZE: usize = 5;

/// Fan-out tuning.
#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    /// Pods probed per network per cycle.
    pub sample_size: SampleSize,
    /// Probes in flight per wave.
    pub batch_size: usize,
    /// Pause between waves.
    pub batch_delay: Duration,
    /// Wall-clock budget per network; no new wave starts after it elapses.
    pub cycle_budget: Option<Duration>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            sample_size: SampleSize::default(),
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::ZERO,
            cycle_budget: None,
        }
    }
}

/// Everything one network's collection produced.
#[derive(Debug, Clone)]
pub struct NetworkCollection {
    pub snapshot: NetworkSnapshot,
    /// Per-node results, in probe order.
    pub nodes: Vec<NodeStats>,
    /// The registry as fetched, freshest first.
    pub registry: Registry,
}

/// Collects one network at a time.
#[derive(Clone)]
pub struct FanOutAggregator {
    registry: RegistryClient,
    prober: NodeProber,
    config: AggregatorConfig,
    clock: SharedClock,
}

impl std::fmt::Debug for FanOutAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FanOutAggregator")
            .field("prober", &self.prober)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FanOutAggregator {
    pub fn new(
        registry: RegistryClient,
        prober: NodeProber,
        config: AggregatorConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            registry,
            prober,
            config,
            clock,
        }
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Fetch the registry, probe the freshest `sample` pods, and aggregate.
    ///
    /// The snapshot is built only after every dispatched probe has settled.
    ///
    /// # Errors
    /// Returns the registry error when the registry cannot be fetched or is
    /// empty; node failures never surface here.
    pub async fn collect_network(
        &self,
        network: &NetworkConfig,
        sample: SampleSize,
    ) -> Result<NetworkCollection, RegistryError> {
        let mut registry = self.registry.get_pods(network).await?;
        registry.sort_freshest_first();

        let selected = sample.select(&registry.pods);
        let nodes = self.probe_all(selected).await;
        if nodes.len() < selected.len() {
            tracing::warn!(
                network = %network.id,
                probed = nodes.len(),
                selected = selected.len(),
                "Cycle budget exhausted before the sample was probed"
            );
        }

        let snapshot = aggregate(
            &network.id,
            registry.total_count,
            &nodes,
            self.clock.now(),
        );
        Ok(NetworkCollection {
            snapshot,
            nodes,
            registry,
        })
    }

    /// Probe `records` in sequential waves of `batch_size`.
    ///
    /// Nodes left over when the budget runs out are not probed and are not
    /// part of the result.
    pub async fn probe_all(&self, records: &[NodeRecord]) -> Vec<NodeStats> {
        let deadline = self.config.cycle_budget.map(|budget| Instant::now() + budget);
        let batch_size = self.config.batch_size.max(1);
        let mut results = Vec::with_capacity(records.len());

        for (wave, batch) in records.chunks(batch_size).enumerate() {
            if wave > 0 && !self.config.batch_delay.is_zero() {
                tokio::time::sleep(self.config.batch_delay).await;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }
            let probes = batch.iter().map(|record| self.prober.probe_record(record));
            results.extend(join_all(probes).await);
        }
        results
    }
}

/// Reduce probed nodes to a snapshot.
///
/// Counts cover the sample only. Resource sums and means cover online nodes;
/// the version distribution covers every sampled node with a known version.
pub fn aggregate(
    network: &str,
    total_pods: u64,
    nodes: &[NodeStats],
    timestamp: DateTime<Utc>,
) -> NetworkSnapshot {
    let online: Vec<&NodeStats> = nodes.iter().filter(|n| n.status.is_online()).collect();
    let sampled_pods = nodes.len() as u64;
    let online_pods = online.len() as u64;

    let mut version_distribution = BTreeMap::new();
    for version in nodes.iter().filter_map(|n| n.version.as_deref()) {
        *version_distribution.entry(version.to_string()).or_insert(0) += 1;
    }

    NetworkSnapshot {
        network: network.to_string(),
        timestamp,
        total_pods,
        sampled_pods,
        online_pods,
        offline_pods: sampled_pods - online_pods,
        total_storage: online.iter().filter_map(|n| n.file_size).sum(),
        avg_cpu: mean(online.iter().filter_map(|n| n.cpu_percent)),
        avg_ram: mean(online.iter().filter_map(|n| n.ram_percent)),
        total_streams: online.iter().filter_map(|n| n.active_streams).sum(),
        total_bytes: online.iter().filter_map(|n| n.total_bytes).sum(),
        version_distribution,
        estimate: sampled_pods < total_pods,
    }
}

/// Arithmetic mean of finite values; zero for an empty input.
fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values
        .filter(|v| v.is_finite())
        .fold((0.0, 0u64), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;

    use super::*;
    use crate::clock::SystemClock;
    use crate::collector::{DEFAULT_RPC_PORT, NodeStatus};
    use crate::config::NetworkClass;
    use crate::transport::testing::{ScriptedTransport, pods_json};
    use crate::transport::{RpcMethod, TransportError};

    const REGISTRY_URL: &str = "https://devnet.example.org/rpc";

    fn network() -> NetworkConfig {
        NetworkConfig {
            id: "devnet".to_string(),
            name: "Devnet".to_string(),
            rpc_url: REGISTRY_URL.to_string(),
            class: NetworkClass::Test,
        }
    }

    fn aggregator(transport: Arc<ScriptedTransport>, config: AggregatorConfig) -> FanOutAggregator {
        FanOutAggregator::new(
            RegistryClient::new(transport.clone()),
            NodeProber::new(transport, DEFAULT_RPC_PORT),
            config,
            SystemClock::shared(),
        )
    }

    fn node(status: NodeStatus, cpu: Option<f64>, version: Option<&str>) -> NodeStats {
        let mut n = NodeStats::offline("a:1");
        n.status = status;
        n.cpu_percent = cpu;
        n.version = version.map(str::to_owned);
        n
    }

    #[tokio::test]
    async fn test_two_online_one_timed_out() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            REGISTRY_URL,
            RpcMethod::GetPods,
            Ok(pods_json(&[
                ("10.0.0.1:9001", "pk1", "0.7.0", 300),
                ("10.0.0.2:9001", "pk2", "0.7.1", 200),
                ("10.0.0.3:9001", "pk3", "0.6.0", 100),
            ])),
        );
        transport.healthy_node("http://10.0.0.1:6000/rpc", "0.7.0", 10.0, 500);
        transport.healthy_node("http://10.0.0.2:6000/rpc", "0.7.1", 30.0, 700);
        let timeout = Err(TransportError::Timeout(Duration::from_secs(5)));
        transport.respond("http://10.0.0.3:6000/rpc", RpcMethod::GetVersion, timeout.clone());
        transport.respond("http://10.0.0.3:6000/rpc", RpcMethod::GetStats, timeout);

        let collection = aggregator(transport, AggregatorConfig::default())
            .collect_network(&network(), SampleSize::default())
            .await
            .unwrap();
        let snapshot = collection.snapshot;

        assert_eq!(snapshot.total_pods, 3);
        assert_eq!(snapshot.sampled_pods, 3);
        assert_eq!(snapshot.online_pods, 2);
        assert_eq!(snapshot.offline_pods, 1);
        assert_eq!(snapshot.avg_cpu, 20.0);
        assert_eq!(snapshot.total_storage, 1_200);
        assert_eq!(snapshot.total_streams, 6);
        assert!(!snapshot.estimate);
        // Offline node counted under its registry-reported version.
        assert_eq!(snapshot.version_distribution.get("0.6.0"), Some(&1));
        assert_eq!(collection.nodes.len(), 3);
    }

    #[tokio::test]
    async fn test_registry_failure_propagates() {
        let transport = Arc::new(ScriptedTransport::new());
        let result = aggregator(transport, AggregatorConfig::default())
            .collect_network(&network(), SampleSize::default())
            .await;
        assert!(matches!(result, Err(RegistryError::Transport(_))));
    }

    #[tokio::test]
    async fn test_sample_takes_freshest_prefix() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.respond(
            REGISTRY_URL,
            RpcMethod::GetPods,
            Ok(json!({
                "pods": [
                    { "address": "10.0.0.1:9001", "last_seen_timestamp": 1 },
                    { "address": "10.0.0.2:9001", "last_seen_timestamp": 3 },
                    { "address": "10.0.0.3:9001", "last_seen_timestamp": 2 },
                ],
                "total_count": 3,
            })),
        );

        let collection = aggregator(transport, AggregatorConfig::default())
            .collect_network(&network(), SampleSize::Limit(2))
            .await
            .unwrap();
        let probed: Vec<&str> = collection.nodes.iter().map(|n| n.address.as_str()).collect();
        assert_eq!(probed, vec!["10.0.0.2:9001", "10.0.0.3:9001"]);
        assert_eq!(collection.snapshot.sampled_pods, 2);
        assert!(collection.snapshot.estimate);
    }

    #[tokio::test(start_paused = true)]
    async fn test_batch_width_caps_in_flight_probes() {
        let transport = Arc::new(ScriptedTransport::new().with_latency(Duration::from_millis(100)));
        let records: Vec<NodeRecord> = (0..12)
            .map(|i| NodeRecord {
                address: format!("10.0.1.{i}:9001"),
                pubkey: None,
                last_seen_timestamp: None,
                version: None,
            })
            .collect();
        let config = AggregatorConfig {
            batch_size: 5,
            ..AggregatorConfig::default()
        };

        let started = Instant::now();
        let nodes = aggregator(transport.clone(), config).probe_all(&records).await;
        assert_eq!(nodes.len(), 12);
        assert_eq!(transport.max_in_flight(), 5);
        // ceil(12 / 5) sequential waves.
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
        assert!(elapsed < Duration::from_millis(400), "{elapsed:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn test_budget_stops_new_waves() {
        let transport = Arc::new(ScriptedTransport::new().with_latency(Duration::from_secs(1)));
        let records: Vec<NodeRecord> = (0..6)
            .map(|i| NodeRecord {
                address: format!("10.0.2.{i}:9001"),
                pubkey: None,
                last_seen_timestamp: None,
                version: None,
            })
            .collect();
        let config = AggregatorConfig {
            batch_size: 2,
            cycle_budget: Some(Duration::from_millis(1_500)),
            ..AggregatorConfig::default()
        };

        let nodes = aggregator(transport, config).probe_all(&records).await;
        // Wave 1 ends at 1s, wave 2 starts inside the budget and finishes, wave 3 is skipped.
        assert_eq!(nodes.len(), 4);
    }

    #[test]
    fn test_aggregate_no_online_nodes_is_zero_not_nan() {
        let nodes = vec![
            node(NodeStatus::Offline, None, Some("0.7.0")),
            node(NodeStatus::Offline, None, None),
        ];
        let snapshot = aggregate("devnet", 10, &nodes, Utc::now());
        assert_eq!(snapshot.online_pods, 0);
        assert_eq!(snapshot.offline_pods, 2);
        assert_eq!(snapshot.avg_cpu, 0.0);
        assert_eq!(snapshot.avg_ram, 0.0);
        assert_eq!(snapshot.total_storage, 0);
        assert_eq!(snapshot.version_distribution.len(), 1);
        assert!(snapshot.estimate);
    }

    #[test]
    fn test_aggregate_means_skip_offline_and_missing() {
        let nodes = vec![
            node(NodeStatus::Online, Some(40.0), Some("0.7.0")),
            node(NodeStatus::Online, None, Some("0.7.0")),
            node(NodeStatus::Offline, Some(99.0), Some("0.6.0")),
        ];
        let snapshot = aggregate("devnet", 3, &nodes, Utc::now());
        assert_eq!(snapshot.avg_cpu, 40.0);
        assert_eq!(snapshot.version_distribution.get("0.7.0"), Some(&2));
        assert_eq!(snapshot.version_distribution.get("0.6.0"), Some(&1));
    }
}
