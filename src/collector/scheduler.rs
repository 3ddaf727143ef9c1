//! Collector scheduler: drives collection cycles over every configured network.
//!
//! One cycle walks the networks sequentially. Each successful network updates
//! the hot cache, the snapshot store and the status tracker; a failed network
//! is logged and left exactly as it was. Alerts and retention run once the
//! whole cycle has finished.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use crate::cache::HotCache;
use crate::clock::SharedClock;
use crate::collector::aggregator::{FanOutAggregator, NetworkCollection};
use crate::collector::alerts::{
    AlertSink, AlertSubscriptions, StatusTracker, StatusTransition, build_alert_events,
};
use crate::collector::{NetworkSnapshot, Ticker};
use crate::config::NetworkConfig;
use crate::storage::{PurgeReport, SnapshotWriter, StorageAdmin};

/// Minimum spacing between two stored registry listings of one network.
pub const DEFAULT_REGISTRY_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Result of one network within a cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum NetworkOutcome {
    Collected {
        network: String,
        sampled: u64,
        online: u64,
        offline: u64,
    },
    Failed {
        network: String,
        kind: &'static str,
        error: String,
    },
}

impl NetworkOutcome {
    pub fn network(&self) -> &str {
        match self {
            Self::Collected { network, .. } | Self::Failed { network, .. } => network,
        }
    }

    pub fn is_collected(&self) -> bool {
        matches!(self, Self::Collected { .. })
    }
}

/// Summary of one full cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(with = "humantime_serde")]
    pub duration: Duration,
    pub networks: Vec<NetworkOutcome>,
    pub transitions: Vec<StatusTransition>,
    /// Alert events handed to the sink.
    pub alerts: usize,
    /// Retention pass result, when a store is attached and the pass succeeded.
    pub purged: Option<PurgeReport>,
}

impl CycleReport {
    pub fn collected(&self) -> usize {
        self.networks.iter().filter(|n| n.is_collected()).count()
    }
}

struct AlertRouting {
    subscriptions: Arc<AlertSubscriptions>,
    sink: Arc<dyn AlertSink>,
}

struct StoreHandles {
    writer: SnapshotWriter,
    admin: StorageAdmin,
}

/// Owns the per-cycle state: status tracker and registry snapshot bookkeeping.
pub struct CollectorScheduler {
    networks: Vec<NetworkConfig>,
    aggregator: FanOutAggregator,
    hot_cache: Arc<HotCache<NetworkSnapshot>>,
    store: Option<StoreHandles>,
    alerts: Option<AlertRouting>,
    registry_snapshot_interval: Duration,
    tracker: Mutex<StatusTracker>,
    last_registry_snapshot: Mutex<HashMap<String, DateTime<Utc>>>,
    clock: SharedClock,
}

impl std::fmt::Debug for CollectorScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectorScheduler")
            .field("networks", &self.networks.len())
            .field("store", &self.store.is_some())
            .field("alerts", &self.alerts.is_some())
            .finish_non_exhaustive()
    }
}

impl CollectorScheduler {
    pub fn new(
        networks: Vec<NetworkConfig>,
        aggregator: FanOutAggregator,
        hot_cache: Arc<HotCache<NetworkSnapshot>>,
        clock: SharedClock,
    ) -> Self {
        Self {
            networks,
            aggregator,
            hot_cache,
            store: None,
            alerts: None,
            registry_snapshot_interval: DEFAULT_REGISTRY_SNAPSHOT_INTERVAL,
            tracker: Mutex::new(StatusTracker::new()),
            last_registry_snapshot: Mutex::new(HashMap::new()),
            clock,
        }
    }

    /// Persist snapshots and run retention after each cycle.
    pub fn with_store(mut self, writer: SnapshotWriter, admin: StorageAdmin) -> Self {
        self.store = Some(StoreHandles { writer, admin });
        self
    }

    /// Deliver status transitions of subscribed pubkeys to `sink`.
    pub fn with_alerts(
        mut self,
        subscriptions: Arc<AlertSubscriptions>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        self.alerts = Some(AlertRouting {
            subscriptions,
            sink,
        });
        self
    }

    pub fn with_registry_snapshot_interval(mut self, interval: Duration) -> Self {
        self.registry_snapshot_interval = interval;
        self
    }

    pub fn networks(&self) -> &[NetworkConfig] {
        &self.networks
    }

    /// Run cycles on every tick until the ticker ends or `shutdown` fires.
    ///
    /// A cycle in progress always runs to completion. Returns the number of
    /// cycles run.
    pub async fn run<T: Ticker>(&self, mut ticker: T, mut shutdown: watch::Receiver<bool>) -> u64 {
        let mut cycles = 0;
        loop {
            let ticked = tokio::select! {
                ticked = ticker.tick() => ticked,
                _ = shutdown.changed() => false,
            };
            if !ticked || *shutdown.borrow() {
                break;
            }
            self.run_cycle().await;
            cycles += 1;
        }
        tracing::info!(cycles, "Collector scheduler stopped");
        cycles
    }

    /// Collect every network once, then deliver alerts and purge expired rows.
    pub async fn run_cycle(&self) -> CycleReport {
        let cycle_id = Uuid::new_v4();
        let started_at = self.clock.now();
        let started = Instant::now();
        let sample = self.aggregator.config().sample_size;

        tracing::debug!(%cycle_id, networks = self.networks.len(), "Collection cycle started");

        let mut outcomes = Vec::with_capacity(self.networks.len());
        let mut transitions = Vec::new();
        for network in &self.networks {
            match self.aggregator.collect_network(network, sample).await {
                Ok(collection) => {
                    let outcome = NetworkOutcome::Collected {
                        network: network.id.clone(),
                        sampled: collection.snapshot.sampled_pods,
                        online: collection.snapshot.online_pods,
                        offline: collection.snapshot.offline_pods,
                    };
                    transitions.extend(self.apply(network, collection, cycle_id));
                    outcomes.push(outcome);
                }
                Err(e) => {
                    tracing::warn!(
                        network = %network.id,
                        kind = e.kind(),
                        error = %e,
                        "Network collection failed; keeping previous data"
                    );
                    outcomes.push(NetworkOutcome::Failed {
                        network: network.id.clone(),
                        kind: e.kind(),
                        error: e.to_string(),
                    });
                }
            }
        }

        let alerts = self.deliver_alerts(&transitions).await;
        let purged = self.purge().await;

        let report = CycleReport {
            cycle_id,
            started_at,
            duration: started.elapsed(),
            networks: outcomes,
            transitions,
            alerts,
            purged,
        };
        tracing::info!(
            %cycle_id,
            collected = report.collected(),
            failed = report.networks.len() - report.collected(),
            transitions = report.transitions.len(),
            alerts = report.alerts,
            duration_ms = report.duration.as_millis() as u64,
            "Collection cycle finished"
        );
        report
    }

    /// Publish one network's results; returns its status transitions.
    fn apply(
        &self,
        network: &NetworkConfig,
        collection: NetworkCollection,
        cycle_id: Uuid,
    ) -> Vec<StatusTransition> {
        let NetworkCollection {
            snapshot,
            nodes,
            registry,
        } = collection;

        if let Some(store) = &self.store {
            if let Err(e) = store.writer.save_network_snapshot(&snapshot, cycle_id) {
                tracing::error!(network = %network.id, error = %e, "Failed to store network snapshot");
            }
            if let Err(e) = store.writer.save_node_history(&network.id, &nodes, cycle_id) {
                tracing::error!(network = %network.id, error = %e, "Failed to store node history");
            }
            if self.registry_snapshot_due(&network.id) {
                match store.writer.save_registry_snapshot(&network.id, &registry) {
                    Ok(at) => {
                        if let Ok(mut last) = self.last_registry_snapshot.lock() {
                            last.insert(network.id.clone(), at);
                        }
                    }
                    Err(e) => {
                        tracing::error!(network = %network.id, error = %e, "Failed to store registry snapshot");
                    }
                }
            }
        }

        tracing::debug!(
            network = %network.id,
            online = snapshot.online_pods,
            offline = snapshot.offline_pods,
            total = snapshot.total_pods,
            "Network collected"
        );
        self.hot_cache.set(&network.id, snapshot);

        match self.tracker.lock() {
            Ok(mut tracker) => tracker.observe(&network.id, &nodes),
            Err(_) => Vec::new(),
        }
    }

    fn registry_snapshot_due(&self, network: &str) -> bool {
        let Ok(last) = self.last_registry_snapshot.lock() else {
            return true;
        };
        let Some(at) = last.get(network) else {
            return true;
        };
        (self.clock.now() - *at)
            .to_std()
            .is_ok_and(|elapsed| elapsed >= self.registry_snapshot_interval)
    }

    async fn deliver_alerts(&self, transitions: &[StatusTransition]) -> usize {
        let Some(routing) = &self.alerts else {
            return 0;
        };
        if transitions.is_empty() {
            return 0;
        }

        let events = build_alert_events(transitions, &routing.subscriptions, self.clock.now());
        if events.is_empty() {
            return 0;
        }
        match routing.sink.deliver(&events).await {
            Ok(()) => events.len(),
            Err(e) => {
                tracing::warn!(kind = e.kind(), error = %e, events = events.len(), "Alert delivery failed");
                0
            }
        }
    }

    async fn purge(&self) -> Option<PurgeReport> {
        let store = self.store.as_ref()?;
        match store.admin.purge_expired().await {
            Ok(report) => {
                if report.total() > 0 {
                    tracing::info!(
                        network_snapshots = report.network_snapshots,
                        node_history = report.node_history,
                        registry_snapshots = report.registry_snapshots,
                        "Expired records purged"
                    );
                }
                Some(report)
            }
            Err(e) => {
                tracing::error!(error = %e, "Retention purge failed");
                None
            }
        }
    }
}
