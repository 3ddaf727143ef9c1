//! User-facing storage facades.
//!
//! - `SnapshotWriter`: non-blocking writes via MPSC, timestamps from the store clock
//! - `SnapshotReader`: history, roll-up and latest-state queries
//! - `StorageAdmin`: expiry and lifecycle

use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::collector::{NetworkSnapshot, NodeStats, NodeStatus, Registry};
use crate::storage::StorageError;
use crate::storage::actor::{Command, NodeRow, RegistryRow, SnapshotRow};
use crate::storage::types::{
    AggregatedStats, BucketInterval, HistoryPeriod, HistoryPoint, NodeHistoryRecord, PurgeReport,
    RegistrySnapshot, from_db_int, from_millis, round_to, to_db_int,
};

// =============================================================================
// Writer
// =============================================================================

/// Non-blocking snapshot writer.
///
/// Uses `try_send`: a write is dropped (and counted) if the channel is full,
/// so collection never waits on the store. Every call stamps its rows with
/// the store clock; all rows of one call share that timestamp.
#[derive(Clone)]
pub struct SnapshotWriter {
    tx: mpsc::Sender<Command>,
    clock: SharedClock,
    dropped_writes: Arc<AtomicU64>,
}

impl std::fmt::Debug for SnapshotWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotWriter")
            .field("dropped_writes", &self.dropped_writes())
            .finish_non_exhaustive()
    }
}

impl SnapshotWriter {
    pub(crate) fn new(tx: mpsc::Sender<Command>, clock: SharedClock) -> Self {
        Self {
            tx,
            clock,
            dropped_writes: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Total writes dropped because the channel was full or closed.
    pub fn dropped_writes(&self) -> u64 {
        self.dropped_writes.load(Ordering::Relaxed)
    }

    /// Append a network snapshot. Returns the assigned timestamp.
    pub fn save_network_snapshot(
        &self,
        snapshot: &NetworkSnapshot,
        cycle_id: Uuid,
    ) -> Result<DateTime<Utc>, StorageError> {
        let ts = self.clock.now();
        let row = SnapshotRow {
            network: snapshot.network.clone(),
            ts: ts.timestamp_millis(),
            cycle_id: cycle_id.to_string(),
            total_pods: to_db_int(snapshot.total_pods),
            sampled_pods: to_db_int(snapshot.sampled_pods),
            online_pods: to_db_int(snapshot.online_pods),
            offline_pods: to_db_int(snapshot.offline_pods),
            total_storage: to_db_int(snapshot.total_storage),
            avg_cpu: snapshot.avg_cpu,
            avg_ram: snapshot.avg_ram,
            total_streams: to_db_int(snapshot.total_streams),
            total_bytes: to_db_int(snapshot.total_bytes),
            version_distribution: serde_json::to_string(&snapshot.version_distribution)?,
            estimate: snapshot.estimate,
        };
        self.send(Command::InsertSnapshot(row), "network snapshot")?;
        Ok(ts)
    }

    /// Append one history row per node, all sharing one timestamp.
    pub fn save_node_history(
        &self,
        network: &str,
        nodes: &[NodeStats],
        cycle_id: Uuid,
    ) -> Result<DateTime<Utc>, StorageError> {
        let ts = self.clock.now();
        if nodes.is_empty() {
            return Ok(ts);
        }
        let millis = ts.timestamp_millis();
        let cycle = cycle_id.to_string();
        let rows = nodes
            .iter()
            .map(|n| NodeRow {
                network: network.to_string(),
                address: n.address.clone(),
                pubkey: n.pubkey.clone(),
                ts: millis,
                cycle_id: cycle.clone(),
                status: n.status.as_ref().to_string(),
                version: n.version.clone(),
                cpu_percent: n.cpu_percent,
                ram_used: n.ram_used.map(to_db_int),
                ram_total: n.ram_total.map(to_db_int),
                ram_percent: n.ram_percent,
                file_size: n.file_size.map(to_db_int),
                uptime_seconds: n.uptime_seconds.map(to_db_int),
                active_streams: n.active_streams.map(to_db_int),
                packets_received: n.packets_received.map(to_db_int),
                packets_sent: n.packets_sent.map(to_db_int),
                total_bytes: n.total_bytes.map(to_db_int),
                peers_count: n.peers_count.map(to_db_int),
                error: n.error.clone(),
            })
            .collect();
        self.send(Command::InsertNodeHistory(rows), "node history")?;
        Ok(ts)
    }

    /// Append a full registry listing.
    pub fn save_registry_snapshot(
        &self,
        network: &str,
        registry: &Registry,
    ) -> Result<DateTime<Utc>, StorageError> {
        let ts = self.clock.now();
        let row = RegistryRow {
            network: network.to_string(),
            ts: ts.timestamp_millis(),
            total_count: to_db_int(registry.total_count),
            pods: serde_json::to_string(&registry.pods)?,
        };
        self.send(Command::InsertRegistry(row), "registry snapshot")?;
        Ok(ts)
    }

    /// Flush buffered rows and wait until they are committed.
    pub async fn flush(&self) -> Result<(), StorageError> {
        let (reply, done) = oneshot::channel();
        self.tx
            .send(Command::Flush(reply))
            .await
            .map_err(|_| StorageError::ChannelSend)?;
        done.await
            .map_err(|_| StorageError::Internal("writer dropped flush reply".to_string()))
    }

    fn send(&self, cmd: Command, what: &str) -> Result<(), StorageError> {
        if self.tx.try_send(cmd).is_err() {
            tracing::warn!(what, "Channel full, dropping write");
            self.dropped_writes.fetch_add(1, Ordering::Relaxed);
            return Err(StorageError::ChannelSend);
        }
        Ok(())
    }
}

// =============================================================================
// Reader
// =============================================================================

#[derive(sqlx::FromRow)]
struct BucketRow {
    bucket: i64,
    total_pods: Option<f64>,
    online_pods: Option<f64>,
    offline_pods: Option<f64>,
    total_storage: Option<f64>,
    avg_cpu: Option<f64>,
    avg_ram: Option<f64>,
    total_streams: Option<f64>,
    total_bytes: Option<f64>,
    samples: i64,
}

#[derive(sqlx::FromRow)]
struct RollupRow {
    snapshot_count: i64,
    network_count: i64,
    avg_online: Option<f64>,
    min_online: Option<i64>,
    max_online: Option<i64>,
    avg_cpu: Option<f64>,
    avg_ram: Option<f64>,
}

#[derive(sqlx::FromRow)]
struct SnapshotRecordRow {
    network: String,
    ts: i64,
    total_pods: i64,
    sampled_pods: i64,
    online_pods: i64,
    offline_pods: i64,
    total_storage: i64,
    avg_cpu: f64,
    avg_ram: f64,
    total_streams: i64,
    total_bytes: i64,
    version_distribution: String,
    estimate: bool,
}

#[derive(sqlx::FromRow)]
struct NodeRecordRow {
    network: String,
    address: String,
    pubkey: Option<String>,
    ts: i64,
    cycle_id: String,
    status: String,
    version: Option<String>,
    cpu_percent: Option<f64>,
    ram_used: Option<i64>,
    ram_total: Option<i64>,
    ram_percent: Option<f64>,
    file_size: Option<i64>,
    uptime_seconds: Option<i64>,
    active_streams: Option<i64>,
    packets_received: Option<i64>,
    packets_sent: Option<i64>,
    total_bytes: Option<i64>,
    peers_count: Option<i64>,
    error: Option<String>,
}

#[derive(sqlx::FromRow)]
struct RegistryRecordRow {
    network: String,
    ts: i64,
    total_count: i64,
    pods: String,
}

const SNAPSHOT_COLUMNS: &str = "network, ts, total_pods, sampled_pods, online_pods, offline_pods, \
     total_storage, avg_cpu, avg_ram, total_streams, total_bytes, version_distribution, estimate";

/// Read facade over the snapshot store.
///
/// Range queries end at the store clock's "now", so results are repeatable
/// for a fixed clock and unchanged data.
#[derive(Clone)]
pub struct SnapshotReader {
    pool: SqlitePool,
    clock: SharedClock,
}

impl std::fmt::Debug for SnapshotReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnapshotReader").finish_non_exhaustive()
    }
}

impl SnapshotReader {
    pub(crate) fn new(pool: SqlitePool, clock: SharedClock) -> Self {
        Self { pool, clock }
    }

    /// Cheap reachability check.
    pub async fn ping(&self) -> Result<(), StorageError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    fn range(&self, period: HistoryPeriod) -> (i64, i64) {
        let now = self.clock.now();
        let start = now - period.duration();
        (start.timestamp_millis(), now.timestamp_millis())
    }

    /// Bucketed history for one network, oldest bucket first.
    ///
    /// Each bucket averages every snapshot whose timestamp falls inside it;
    /// `interval` defaults to the period's default width.
    pub async fn network_history(
        &self,
        network: &str,
        period: HistoryPeriod,
        interval: Option<BucketInterval>,
    ) -> Result<Vec<HistoryPoint>, StorageError> {
        let interval = interval.unwrap_or_else(|| period.default_interval());
        let width = interval.millis();
        let (start, end) = self.range(period);

        let rows: Vec<BucketRow> = sqlx::query_as(
            "SELECT (ts / ?) * ? AS bucket,
                    AVG(total_pods) AS total_pods,
                    AVG(online_pods) AS online_pods,
                    AVG(offline_pods) AS offline_pods,
                    AVG(total_storage) AS total_storage,
                    AVG(avg_cpu) AS avg_cpu,
                    AVG(avg_ram) AS avg_ram,
                    AVG(total_streams) AS total_streams,
                    AVG(total_bytes) AS total_bytes,
                    COUNT(*) AS samples
             FROM network_snapshots
             WHERE network = ? AND ts >= ? AND ts <= ?
             GROUP BY bucket
             ORDER BY bucket ASC",
        )
        .bind(width)
        .bind(width)
        .bind(network)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(HistoryPoint::from).collect())
    }

    /// Raw per-node history in chronological order.
    pub async fn node_history(
        &self,
        address: &str,
        period: HistoryPeriod,
    ) -> Result<Vec<NodeHistoryRecord>, StorageError> {
        let (start, end) = self.range(period);
        let rows: Vec<NodeRecordRow> = sqlx::query_as(
            "SELECT network, address, pubkey, ts, cycle_id, status, version, cpu_percent,
                    ram_used, ram_total, ram_percent, file_size, uptime_seconds, active_streams,
                    packets_received, packets_sent, total_bytes, peers_count, error
             FROM node_history
             WHERE address = ? AND ts >= ? AND ts <= ?
             ORDER BY ts ASC, id ASC",
        )
        .bind(address)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(NodeHistoryRecord::try_from).collect()
    }

    /// Roll-up across every network for the period.
    pub async fn aggregated_stats(
        &self,
        period: HistoryPeriod,
    ) -> Result<AggregatedStats, StorageError> {
        let (start, end) = self.range(period);
        let row: RollupRow = sqlx::query_as(
            "SELECT COUNT(*) AS snapshot_count,
                    COUNT(DISTINCT network) AS network_count,
                    AVG(online_pods) AS avg_online,
                    MIN(online_pods) AS min_online,
                    MAX(online_pods) AS max_online,
                    AVG(avg_cpu) AS avg_cpu,
                    AVG(avg_ram) AS avg_ram
             FROM network_snapshots
             WHERE ts >= ? AND ts <= ?",
        )
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(AggregatedStats {
            period,
            snapshot_count: from_db_int(row.snapshot_count),
            network_count: from_db_int(row.network_count),
            avg_online: round_to(row.avg_online.unwrap_or(0.0), 2),
            min_online: row.min_online.map_or(0, from_db_int),
            max_online: row.max_online.map_or(0, from_db_int),
            avg_cpu: round_to(row.avg_cpu.unwrap_or(0.0), 2),
            avg_ram: round_to(row.avg_ram.unwrap_or(0.0), 2),
        })
    }

    /// The most recent snapshot of every network, ordered by network id.
    pub async fn latest_snapshots(&self) -> Result<Vec<NetworkSnapshot>, StorageError> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM (
                 SELECT *, ROW_NUMBER() OVER (PARTITION BY network ORDER BY ts DESC, id DESC) AS rn
                 FROM network_snapshots
             ) WHERE rn = 1
             ORDER BY network ASC"
        );
        let rows: Vec<SnapshotRecordRow> = sqlx::query_as(&sql).fetch_all(&self.pool).await?;
        rows.into_iter().map(NetworkSnapshot::try_from).collect()
    }

    /// The most recent snapshot of one network.
    pub async fn latest_snapshot(
        &self,
        network: &str,
    ) -> Result<Option<NetworkSnapshot>, StorageError> {
        let sql = format!(
            "SELECT {SNAPSHOT_COLUMNS} FROM network_snapshots
             WHERE network = ? ORDER BY ts DESC, id DESC LIMIT 1"
        );
        let row: Option<SnapshotRecordRow> = sqlx::query_as(&sql)
            .bind(network)
            .fetch_optional(&self.pool)
            .await?;
        row.map(NetworkSnapshot::try_from).transpose()
    }

    /// The most recent registry listing of one network.
    pub async fn latest_registry_snapshot(
        &self,
        network: &str,
    ) -> Result<Option<RegistrySnapshot>, StorageError> {
        let row: Option<RegistryRecordRow> = sqlx::query_as(
            "SELECT network, ts, total_count, pods FROM registry_snapshots
             WHERE network = ? ORDER BY ts DESC, id DESC LIMIT 1",
        )
        .bind(network)
        .fetch_optional(&self.pool)
        .await?;

        row.map(|r| {
            Ok(RegistrySnapshot {
                network: r.network,
                timestamp: from_millis(r.ts),
                total_count: from_db_int(r.total_count),
                pods: serde_json::from_str(&r.pods)?,
            })
        })
        .transpose()
    }
}

impl From<BucketRow> for HistoryPoint {
    fn from(r: BucketRow) -> Self {
        let count = |v: Option<f64>| round_to(v.unwrap_or(0.0), 0).max(0.0) as u64;
        let pct = |v: Option<f64>| round_to(v.unwrap_or(0.0), 2);
        Self {
            timestamp: from_millis(r.bucket),
            total_pods: count(r.total_pods),
            online_pods: count(r.online_pods),
            offline_pods: count(r.offline_pods),
            total_storage: count(r.total_storage),
            avg_cpu: pct(r.avg_cpu),
            avg_ram: pct(r.avg_ram),
            total_streams: count(r.total_streams),
            total_bytes: count(r.total_bytes),
            samples: from_db_int(r.samples),
        }
    }
}

impl TryFrom<SnapshotRecordRow> for NetworkSnapshot {
    type Error = StorageError;

    fn try_from(r: SnapshotRecordRow) -> Result<Self, Self::Error> {
        let version_distribution: BTreeMap<String, u64> =
            serde_json::from_str(&r.version_distribution)?;
        Ok(Self {
            network: r.network,
            timestamp: from_millis(r.ts),
            total_pods: from_db_int(r.total_pods),
            sampled_pods: from_db_int(r.sampled_pods),
            online_pods: from_db_int(r.online_pods),
            offline_pods: from_db_int(r.offline_pods),
            total_storage: from_db_int(r.total_storage),
            avg_cpu: r.avg_cpu,
            avg_ram: r.avg_ram,
            total_streams: from_db_int(r.total_streams),
            total_bytes: from_db_int(r.total_bytes),
            version_distribution,
            estimate: r.estimate,
        })
    }
}

impl TryFrom<NodeRecordRow> for NodeHistoryRecord {
    type Error = StorageError;

    fn try_from(r: NodeRecordRow) -> Result<Self, Self::Error> {
        let status = NodeStatus::from_str(&r.status)
            .map_err(|_| StorageError::InvalidData(format!("unknown node status '{}'", r.status)))?;
        let cycle_id = Uuid::parse_str(&r.cycle_id)
            .map_err(|e| StorageError::InvalidData(format!("invalid cycle id: {e}")))?;
        Ok(Self {
            network: r.network,
            timestamp: from_millis(r.ts),
            cycle_id,
            node: NodeStats {
                address: r.address,
                pubkey: r.pubkey,
                status,
                version: r.version,
                cpu_percent: r.cpu_percent,
                ram_used: r.ram_used.map(from_db_int),
                ram_total: r.ram_total.map(from_db_int),
                ram_percent: r.ram_percent,
                file_size: r.file_size.map(from_db_int),
                uptime_seconds: r.uptime_seconds.map(from_db_int),
                active_streams: r.active_streams.map(from_db_int),
                packets_received: r.packets_received.map(from_db_int),
                packets_sent: r.packets_sent.map(from_db_int),
                total_bytes: r.total_bytes.map(from_db_int),
                peers_count: r.peers_count.map(from_db_int),
                error: r.error,
            },
        })
    }
}

// =============================================================================
// Admin
// =============================================================================

/// Storage administration.
#[derive(Clone)]
pub struct StorageAdmin {
    tx: mpsc::Sender<Command>,
    clock: SharedClock,
    retention: Duration,
}

impl std::fmt::Debug for StorageAdmin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageAdmin")
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl StorageAdmin {
    pub(crate) fn new(tx: mpsc::Sender<Command>, clock: SharedClock, retention: Duration) -> Self {
        Self {
            tx,
            clock,
            retention,
        }
    }

    pub fn retention(&self) -> Duration {
        self.retention
    }

    /// Physically delete every record older than the retention window.
    pub async fn purge_expired(&self) -> Result<PurgeReport, StorageError> {
        let window = chrono::Duration::from_std(self.retention)
            .map_err(|e| StorageError::Internal(format!("invalid retention: {e}")))?;
        let cutoff = self.clock.now() - window;

        let (reply, report) = oneshot::channel();
        self.tx
            .send(Command::Purge {
                cutoff: cutoff.timestamp_millis(),
                reply,
            })
            .await
            .map_err(|_| StorageError::ChannelSend)?;
        report
            .await
            .map_err(|_| StorageError::Internal("writer dropped purge reply".to_string()))?
    }

    /// Ask the writer to flush and stop.
    pub async fn shutdown(&self) -> Result<(), StorageError> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| StorageError::ChannelSend)
    }
}
