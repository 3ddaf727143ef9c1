//! Writer actor: a tokio task that owns every write, fed by an MPSC channel.
//!
//! Single-writer pattern: snapshots and registry listings are inserted as they
//! arrive; node history rows are batch-buffered and flushed when the buffer
//! reaches the batch size or the flush interval elapses.

use std::time::Duration;

use sqlx::SqlitePool;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::storage::StorageError;
use crate::storage::types::PurgeReport;

// =============================================================================
// Constants
// =============================================================================

/// Default number of buffered node rows before flush.
pub const DEFAULT_BATCH_SIZE: usize = 500;

/// Default maximum time before buffer flush.
pub const DEFAULT_BATCH_FLUSH_INTERVAL: Duration = Duration::from_secs(1);

/// Idle wake-up when nothing is buffered.
const IDLE_WAKEUP: Duration = Duration::from_secs(60);

// =============================================================================
// Rows
// =============================================================================

/// A network snapshot ready for insertion.
#[derive(Debug, Clone)]
pub struct SnapshotRow {
    pub network: String,
    pub ts: i64,
    pub cycle_id: String,
    pub total_pods: i64,
    pub sampled_pods: i64,
    pub online_pods: i64,
    pub offline_pods: i64,
    pub total_storage: i64,
    pub avg_cpu: f64,
    pub avg_ram: f64,
    pub total_streams: i64,
    pub total_bytes: i64,
    pub version_distribution: String,
    pub estimate: bool,
}

/// A node history row ready for insertion.
#[derive(Debug, Clone)]
pub struct NodeRow {
    pub network: String,
    pub address: String,
    pub pubkey: Option<String>,
    pub ts: i64,
    pub cycle_id: String,
    pub status: String,
    pub version: Option<String>,
    pub cpu_percent: Option<f64>,
    pub ram_used: Option<i64>,
    pub ram_total: Option<i64>,
    pub ram_percent: Option<f64>,
    pub file_size: Option<i64>,
    pub uptime_seconds: Option<i64>,
    pub active_streams: Option<i64>,
    pub packets_received: Option<i64>,
    pub packets_sent: Option<i64>,
    pub total_bytes: Option<i64>,
    pub peers_count: Option<i64>,
    pub error: Option<String>,
}

/// A registry listing ready for insertion.
#[derive(Debug, Clone)]
pub struct RegistryRow {
    pub network: String,
    pub ts: i64,
    pub total_count: i64,
    pub pods: String,
}

// =============================================================================
// Commands
// =============================================================================

/// Commands sent to the writer actor.
#[derive(Debug)]
pub enum Command {
    /// Insert a network snapshot (immediate insert).
    InsertSnapshot(SnapshotRow),
    /// Insert node history rows (batch insert).
    InsertNodeHistory(Vec<NodeRow>),
    /// Insert a registry listing (immediate insert).
    InsertRegistry(RegistryRow),
    /// Force flush all buffers; replies once the rows are committed.
    Flush(oneshot::Sender<()>),
    /// Delete every row with `ts` below the cutoff (Unix millis).
    Purge {
        cutoff: i64,
        reply: oneshot::Sender<Result<PurgeReport, StorageError>>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// =============================================================================
// Buffers
// =============================================================================

/// Buffer for batch inserts with time-based and size-based flushing.
struct BatchBuffer<T> {
    items: Vec<T>,
    last_flush: Instant,
    batch_size: usize,
    flush_interval: Duration,
}

impl<T> BatchBuffer<T> {
    fn new(batch_size: usize, flush_interval: Duration) -> Self {
        let batch_size = batch_size.max(1);
        Self {
            items: Vec::with_capacity(batch_size),
            last_flush: Instant::now(),
            batch_size,
            flush_interval,
        }
    }

    fn extend(&mut self, items: Vec<T>) {
        // Reset flush timer on first item to avoid treating long-idle buffers as overdue
        if self.items.is_empty() {
            self.last_flush = Instant::now();
        }
        self.items.extend(items);
    }

    fn should_flush(&self) -> bool {
        self.items.len() >= self.batch_size
            || (!self.items.is_empty() && self.last_flush.elapsed() >= self.flush_interval)
    }

    fn deadline(&self) -> Option<Instant> {
        (!self.items.is_empty()).then(|| self.last_flush + self.flush_interval)
    }

    fn take(&mut self) -> Vec<T> {
        self.last_flush = Instant::now();
        std::mem::take(&mut self.items)
    }

    fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

// =============================================================================
// Actor
// =============================================================================

/// Database writer actor with batch buffering for node history.
pub struct DbActor {
    pool: SqlitePool,
    rx: mpsc::Receiver<Command>,
    node_buffer: BatchBuffer<NodeRow>,
}

impl DbActor {
    /// Spawn the writer actor task.
    ///
    /// The schema must already exist on `pool`.
    pub fn spawn(
        pool: SqlitePool,
        channel_capacity: usize,
        batch_size: usize,
        batch_flush_interval: Duration,
    ) -> (JoinHandle<()>, mpsc::Sender<Command>) {
        let (tx, rx) = mpsc::channel(channel_capacity.max(1));
        let actor = DbActor {
            pool,
            rx,
            node_buffer: BatchBuffer::new(batch_size, batch_flush_interval),
        };
        let handle = tokio::spawn(actor.run());
        (handle, tx)
    }

    async fn run(mut self) {
        tracing::info!("DbActor started");

        loop {
            let deadline = self
                .node_buffer
                .deadline()
                .unwrap_or_else(|| Instant::now() + IDLE_WAKEUP);

            tokio::select! {
                cmd = self.rx.recv() => match cmd {
                    Some(cmd) => {
                        if self.handle_command(cmd).await {
                            break; // Shutdown requested
                        }
                    }
                    None => {
                        tracing::warn!("Channel disconnected, shutting down");
                        self.flush_all().await;
                        break;
                    }
                },
                _ = tokio::time::sleep_until(deadline) => {
                    // Timeout: flush overdue
                }
            }

            if self.node_buffer.should_flush() {
                self.flush_all().await;
            }
        }

        tracing::info!("DbActor stopped");
    }

    async fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::InsertSnapshot(row) => {
                if let Err(e) = self.insert_snapshot(&row).await {
                    tracing::error!(error = %e, network = %row.network, "Snapshot insert failed");
                }
            }
            Command::InsertNodeHistory(rows) => {
                self.node_buffer.extend(rows);
            }
            Command::InsertRegistry(row) => {
                if let Err(e) = self.insert_registry(&row).await {
                    tracing::error!(error = %e, network = %row.network, "Registry snapshot insert failed");
                }
            }
            Command::Flush(reply) => {
                self.flush_all().await;
                let _ = reply.send(());
            }
            Command::Purge { cutoff, reply } => {
                // Buffered rows may already be past the cutoff.
                self.flush_all().await;
                let _ = reply.send(self.purge(cutoff).await);
            }
            Command::Shutdown => {
                tracing::info!("DbActor shutting down");
                self.flush_all().await;
                return true;
            }
        }
        false
    }

    async fn flush_all(&mut self) {
        if !self.node_buffer.is_empty() {
            let count = self.node_buffer.len();
            let rows = self.node_buffer.take();
            if let Err(e) = self.insert_nodes_batch(&rows).await {
                tracing::error!(error = %e, count, "Node history batch insert failed");
            }
        }
    }

    // =========================================================================
    // Insert Operations
    // =========================================================================

    async fn insert_snapshot(&self, r: &SnapshotRow) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO network_snapshots (network, ts, cycle_id, total_pods, sampled_pods,
                 online_pods, offline_pods, total_storage, avg_cpu, avg_ram, total_streams,
                 total_bytes, version_distribution, estimate)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&r.network)
        .bind(r.ts)
        .bind(&r.cycle_id)
        .bind(r.total_pods)
        .bind(r.sampled_pods)
        .bind(r.online_pods)
        .bind(r.offline_pods)
        .bind(r.total_storage)
        .bind(r.avg_cpu)
        .bind(r.avg_ram)
        .bind(r.total_streams)
        .bind(r.total_bytes)
        .bind(&r.version_distribution)
        .bind(r.estimate)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert buffered node rows in one transaction.
    async fn insert_nodes_batch(&self, rows: &[NodeRow]) -> Result<(), StorageError> {
        if rows.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for r in rows {
            sqlx::query(
                "INSERT INTO node_history (network, address, pubkey, ts, cycle_id, status, version,
                     cpu_percent, ram_used, ram_total, ram_percent, file_size, uptime_seconds,
                     active_streams, packets_received, packets_sent, total_bytes, peers_count, error)
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(&r.network)
            .bind(&r.address)
            .bind(&r.pubkey)
            .bind(r.ts)
            .bind(&r.cycle_id)
            .bind(&r.status)
            .bind(&r.version)
            .bind(r.cpu_percent)
            .bind(r.ram_used)
            .bind(r.ram_total)
            .bind(r.ram_percent)
            .bind(r.file_size)
            .bind(r.uptime_seconds)
            .bind(r.active_streams)
            .bind(r.packets_received)
            .bind(r.packets_sent)
            .bind(r.total_bytes)
            .bind(r.peers_count)
            .bind(&r.error)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        tracing::debug!(count = rows.len(), "Node history batch inserted");
        Ok(())
    }

    async fn insert_registry(&self, r: &RegistryRow) -> Result<(), StorageError> {
        sqlx::query(
            "INSERT INTO registry_snapshots (network, ts, total_count, pods) VALUES (?, ?, ?, ?)",
        )
        .bind(&r.network)
        .bind(r.ts)
        .bind(r.total_count)
        .bind(&r.pods)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    // =========================================================================
    // Expiry
    // =========================================================================

    async fn purge(&self, cutoff: i64) -> Result<PurgeReport, StorageError> {
        let mut tx = self.pool.begin().await?;
        let network_snapshots = sqlx::query("DELETE FROM network_snapshots WHERE ts < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let node_history = sqlx::query("DELETE FROM node_history WHERE ts < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let registry_snapshots = sqlx::query("DELETE FROM registry_snapshots WHERE ts < ?")
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(PurgeReport {
            cutoff: chrono::DateTime::from_timestamp_millis(cutoff),
            network_snapshots,
            node_history,
            registry_snapshots,
        })
    }
}
