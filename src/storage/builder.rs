//! Storage builder and handles.
//!
//! Provides a builder pattern for constructing the storage layer
//! and a handles struct for accessing all storage facades.

use std::path::Path;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::clock::{SharedClock, SystemClock};
use crate::storage::actor::{DEFAULT_BATCH_FLUSH_INTERVAL, DEFAULT_BATCH_SIZE, DbActor};
use crate::storage::db::SqlitePool;
use crate::storage::schema::init_schema;
use crate::storage::types::DEFAULT_RETENTION;
use crate::storage::{SnapshotReader, SnapshotWriter, StorageAdmin, StorageError};

/// Default channel capacity for writer commands.
///
/// One cycle sends a handful of commands per network, so this leaves ample
/// headroom even when the database stalls for several cycles.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Builder for constructing the storage layer.
pub struct StorageBuilder {
    url: String,
    channel_capacity: usize,
    batch_size: usize,
    batch_flush_interval: Duration,
    retention: Duration,
    clock: SharedClock,
}

impl std::fmt::Debug for StorageBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageBuilder")
            .field("url", &self.url)
            .field("channel_capacity", &self.channel_capacity)
            .field("batch_size", &self.batch_size)
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

impl StorageBuilder {
    /// Create a new storage builder for a SQLite URL
    /// (`sqlite:data/podscope.db`, `sqlite::memory:`).
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_flush_interval: DEFAULT_BATCH_FLUSH_INTERVAL,
            retention: DEFAULT_RETENTION,
            clock: SystemClock::shared(),
        }
    }

    /// Set the channel capacity for writer commands.
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    /// Set the batch size for node history buffering.
    ///
    /// The actor will flush buffered rows when this threshold is reached.
    /// Default: 500 rows.
    pub fn batch_size(mut self, size: usize) -> Self {
        self.batch_size = size;
        self
    }

    /// Set the batch flush interval for node history buffering.
    ///
    /// The actor will flush buffered rows after this duration, even if
    /// the batch size threshold hasn't been reached. Default: 1 second.
    pub fn batch_flush_interval(mut self, interval: Duration) -> Self {
        self.batch_flush_interval = interval;
        self
    }

    /// Set the retention window. Default: 30 days.
    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    /// Clock used to stamp writes, bound range queries and compute expiry cutoffs.
    pub fn clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Connect, create the schema, and spawn the writer actor.
    pub async fn build(self) -> Result<StorageHandles, StorageError> {
        ensure_parent_dir(&self.url)?;

        let pool = SqlitePool::connect(&self.url).await?;
        init_schema(pool.inner()).await?;

        let (actor_handle, tx) = DbActor::spawn(
            pool.inner().clone(),
            self.channel_capacity,
            self.batch_size,
            self.batch_flush_interval,
        );

        tracing::info!(url = %self.url, retention = ?self.retention, "Storage initialized");
        Ok(StorageHandles {
            writer: SnapshotWriter::new(tx.clone(), self.clock.clone()),
            reader: SnapshotReader::new(pool.inner().clone(), self.clock.clone()),
            admin: StorageAdmin::new(tx, self.clock, self.retention),
            pool,
            actor_handle: Some(actor_handle),
        })
    }

    /// [`build`](Self::build), with any failure reported as
    /// [`StorageError::Unavailable`] so the caller can run without persistence.
    pub async fn open(self) -> Result<StorageHandles, StorageError> {
        let url = self.url.clone();
        self.build().await.map_err(|e| match e {
            StorageError::Unavailable(_) => e,
            other => StorageError::Unavailable(format!("{url}: {other}")),
        })
    }
}

/// Create the database file's parent directory if it doesn't exist.
fn ensure_parent_dir(url: &str) -> Result<(), StorageError> {
    let Some(path) = url
        .strip_prefix("sqlite://")
        .or_else(|| url.strip_prefix("sqlite:"))
    else {
        return Ok(());
    };
    let path = path.split('?').next().unwrap_or_default();
    if path.is_empty() || path.starts_with(':') || path.starts_with("file:") {
        return Ok(());
    }

    if let Some(parent) = Path::new(path).parent()
        && !parent.as_os_str().is_empty()
        && !parent.exists()
    {
        std::fs::create_dir_all(parent).map_err(|e| {
            StorageError::Internal(format!(
                "Failed to create database directory '{}': {}",
                parent.display(),
                e
            ))
        })?;
    }
    Ok(())
}

/// Handles to all storage layer facades.
pub struct StorageHandles {
    /// Writer facade for snapshots, node history and registry listings.
    pub writer: SnapshotWriter,
    /// Facade for history and latest-state queries.
    pub reader: SnapshotReader,
    /// Facade for expiry and lifecycle.
    pub admin: StorageAdmin,
    pool: SqlitePool,
    actor_handle: Option<JoinHandle<()>>,
}

impl std::fmt::Debug for StorageHandles {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageHandles").finish_non_exhaustive()
    }
}

impl StorageHandles {
    /// Gracefully shutdown the storage layer.
    ///
    /// Sends shutdown to the writer actor (which flushes its buffer), waits for
    /// it to finish, then closes the pool.
    pub async fn shutdown(mut self) -> Result<(), StorageError> {
        self.admin.shutdown().await?;

        if let Some(handle) = self.actor_handle.take() {
            handle
                .await
                .map_err(|e| StorageError::Internal(format!("Failed to join actor task: {e}")))?;
        }
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{TimeZone, Utc};
    use uuid::Uuid;

    use super::*;
    use crate::clock::ManualClock;
    use crate::collector::{NetworkSnapshot, NodeRecord, NodeStats, NodeStatus, Registry};
    use crate::storage::{BucketInterval, HistoryPeriod};

    fn start() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    async fn store(clock: Arc<ManualClock>) -> StorageHandles {
        StorageBuilder::new("sqlite::memory:")
            .channel_capacity(64)
            .clock(clock)
            .build()
            .await
            .unwrap()
    }

    fn snapshot(network: &str, online: u64, cpu: f64) -> NetworkSnapshot {
        NetworkSnapshot {
            network: network.to_string(),
            timestamp: start(),
            total_pods: 10,
            sampled_pods: 4,
            online_pods: online,
            offline_pods: 4 - online,
            total_storage: 1_000,
            avg_cpu: cpu,
            avg_ram: 50.0,
            total_streams: 3,
            total_bytes: 4_096,
            version_distribution: [("0.7.0".to_string(), 4)].into_iter().collect(),
            estimate: true,
        }
    }

    fn node(address: &str, status: NodeStatus) -> NodeStats {
        let mut n = NodeStats::offline(address);
        n.status = status;
        n.pubkey = Some(format!("pk-{address}"));
        n.cpu_percent = Some(7.5);
        n.file_size = Some(u64::MAX);
        n
    }

    #[tokio::test]
    async fn test_latest_snapshots_one_per_network() {
        let clock = ManualClock::new(start());
        let handles = store(clock.clone()).await;
        let cycle = Uuid::new_v4();

        handles
            .writer
            .save_network_snapshot(&snapshot("devnet", 1, 10.0), cycle)
            .unwrap();
        handles
            .writer
            .save_network_snapshot(&snapshot("mainnet", 2, 20.0), cycle)
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));
        let stamped = handles
            .writer
            .save_network_snapshot(&snapshot("devnet", 3, 30.0), cycle)
            .unwrap();
        handles.writer.flush().await.unwrap();

        let latest = handles.reader.latest_snapshots().await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].network, "devnet");
        assert_eq!(latest[0].online_pods, 3);
        assert_eq!(latest[0].timestamp, stamped);
        assert_eq!(latest[0].version_distribution.get("0.7.0"), Some(&4));
        assert!(latest[0].estimate);
        assert_eq!(latest[1].network, "mainnet");

        let one = handles.reader.latest_snapshot("mainnet").await.unwrap();
        assert_eq!(one.unwrap().online_pods, 2);
        assert!(handles.reader.latest_snapshot("nope").await.unwrap().is_none());

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_network_history_buckets_and_is_repeatable() {
        let clock = ManualClock::new(start());
        let handles = store(clock.clone()).await;
        let cycle = Uuid::new_v4();

        // Two snapshots in the 12:00 bucket, one in 12:15.
        handles
            .writer
            .save_network_snapshot(&snapshot("devnet", 1, 10.0), cycle)
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));
        handles
            .writer
            .save_network_snapshot(&snapshot("devnet", 2, 15.555), cycle)
            .unwrap();
        clock.advance(chrono::Duration::minutes(10));
        handles
            .writer
            .save_network_snapshot(&snapshot("devnet", 4, 40.0), cycle)
            .unwrap();
        handles.writer.flush().await.unwrap();

        let history = handles
            .reader
            .network_history("devnet", HistoryPeriod::Day, None)
            .await
            .unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].timestamp, start());
        assert_eq!(history[0].samples, 2);
        assert_eq!(history[0].online_pods, 2); // round(1.5)
        assert_eq!(history[0].avg_cpu, 12.78); // round2(12.7775)
        assert_eq!(history[1].online_pods, 4);

        let again = handles
            .reader
            .network_history("devnet", HistoryPeriod::Day, None)
            .await
            .unwrap();
        assert_eq!(history, again);

        let hourly = handles
            .reader
            .network_history("devnet", HistoryPeriod::Day, Some(BucketInterval::OneHour))
            .await
            .unwrap();
        assert_eq!(hourly.len(), 1);
        assert_eq!(hourly[0].samples, 3);

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_node_history_chronological() {
        let clock = ManualClock::new(start());
        let handles = store(clock.clone()).await;

        let first = handles
            .writer
            .save_node_history(
                "devnet",
                &[node("a:1", NodeStatus::Offline), node("b:1", NodeStatus::Online)],
                Uuid::new_v4(),
            )
            .unwrap();
        clock.advance(chrono::Duration::minutes(5));
        handles
            .writer
            .save_node_history("devnet", &[node("a:1", NodeStatus::Online)], Uuid::new_v4())
            .unwrap();
        handles.writer.flush().await.unwrap();

        let records = handles
            .reader
            .node_history("a:1", HistoryPeriod::OneHour)
            .await
            .unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].timestamp, first);
        assert_eq!(records[0].node.status, NodeStatus::Offline);
        assert_eq!(records[1].node.status, NodeStatus::Online);
        assert_eq!(records[1].node.pubkey.as_deref(), Some("pk-a:1"));
        assert_eq!(records[1].node.file_size, Some(i64::MAX as u64));

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_aggregated_stats() {
        let clock = ManualClock::new(start());
        let handles = store(clock.clone()).await;

        let empty = handles
            .reader
            .aggregated_stats(HistoryPeriod::Day)
            .await
            .unwrap();
        assert_eq!(empty.snapshot_count, 0);
        assert_eq!(empty.avg_cpu, 0.0);

        let cycle = Uuid::new_v4();
        handles
            .writer
            .save_network_snapshot(&snapshot("devnet", 1, 10.0), cycle)
            .unwrap();
        handles
            .writer
            .save_network_snapshot(&snapshot("mainnet", 3, 30.0), cycle)
            .unwrap();
        handles.writer.flush().await.unwrap();

        let stats = handles
            .reader
            .aggregated_stats(HistoryPeriod::Day)
            .await
            .unwrap();
        assert_eq!(stats.snapshot_count, 2);
        assert_eq!(stats.network_count, 2);
        assert_eq!(stats.avg_online, 2.0);
        assert_eq!(stats.min_online, 1);
        assert_eq!(stats.max_online, 3);
        assert_eq!(stats.avg_cpu, 20.0);

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_records_gone_after_purge() {
        let clock = ManualClock::new(start() - chrono::Duration::days(40));
        let handles = store(clock.clone()).await;
        let cycle = Uuid::new_v4();

        handles
            .writer
            .save_network_snapshot(&snapshot("devnet", 1, 10.0), cycle)
            .unwrap();
        handles
            .writer
            .save_node_history("devnet", &[node("a:1", NodeStatus::Online)], cycle)
            .unwrap();

        clock.set(start());
        handles
            .writer
            .save_network_snapshot(&snapshot("devnet", 2, 20.0), cycle)
            .unwrap();

        let report = handles.admin.purge_expired().await.unwrap();
        assert_eq!(report.network_snapshots, 1);
        assert_eq!(report.node_history, 1);
        assert_eq!(report.total(), 2);

        // Even a query wide enough to reach the old rows finds nothing.
        clock.set(start() - chrono::Duration::days(39));
        let history = handles
            .reader
            .node_history("a:1", HistoryPeriod::Month)
            .await
            .unwrap();
        assert!(history.is_empty());
        clock.set(start());
        let latest = handles.reader.latest_snapshots().await.unwrap();
        assert_eq!(latest.len(), 1);
        assert_eq!(latest[0].online_pods, 2);

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_registry_snapshot_roundtrip() {
        let clock = ManualClock::new(start());
        let handles = store(clock).await;
        let registry = Registry {
            pods: vec![NodeRecord {
                address: "10.0.0.1:9001".into(),
                pubkey: Some("pk1".into()),
                last_seen_timestamp: Some(99),
                version: Some("0.7.0".into()),
            }],
            total_count: 1,
        };

        handles
            .writer
            .save_registry_snapshot("devnet", &registry)
            .unwrap();
        handles.writer.flush().await.unwrap();

        let stored = handles
            .reader
            .latest_registry_snapshot("devnet")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.pods, registry.pods);
        assert_eq!(stored.timestamp, start());

        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_file_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let url = format!("sqlite:{}", dir.path().join("nested/podscope.db").display());

        let handles = StorageBuilder::new(&url).build().await.unwrap();
        handles
            .writer
            .save_node_history("devnet", &[node("a:1", NodeStatus::Online)], Uuid::new_v4())
            .unwrap();
        // Shutdown flushes the buffered row.
        handles.shutdown().await.unwrap();

        let handles = StorageBuilder::new(&url).build().await.unwrap();
        let records = handles
            .reader
            .node_history("a:1", HistoryPeriod::OneHour)
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        handles.shutdown().await.unwrap();
    }

    #[tokio::test]
    async fn test_open_reports_unreachable_store_as_unavailable() {
        let blocker = tempfile::NamedTempFile::new().unwrap();
        let url = format!("sqlite:{}", blocker.path().join("podscope.db").display());

        let err = StorageBuilder::new(&url).open().await.unwrap_err();
        assert!(matches!(err, StorageError::Unavailable(_)), "got {err:?}");
        assert_eq!(err.kind(), "store_unavailable");
        assert!(err.to_string().contains(&url));
    }

    #[test]
    fn test_ensure_parent_dir_ignores_memory_urls() {
        assert!(ensure_parent_dir("sqlite::memory:").is_ok());
        assert!(ensure_parent_dir("sqlite:file:x?mode=memory").is_ok());
    }
}
