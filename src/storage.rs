//! Storage Layer
//!
//! SQLite snapshot store with async read/write separation:
//! - **Writer**: Async task with exclusive writes using tokio mpsc channel
//! - **Reader**: Connection pool for concurrent reads
//!
//! # Components
//!
//! - [`SnapshotWriter`]: Non-blocking writes of network snapshots, node history and registry listings
//! - [`SnapshotReader`]: Bucketed history, roll-ups and latest-state queries
//! - [`StorageAdmin`]: Retention purge and shutdown
//! - [`StorageBuilder`] / [`StorageHandles`]: Initialization and lifecycle management

mod actor;
mod builder;
pub mod db;
mod error;
mod facades;
mod schema;
mod types;

pub use builder::{DEFAULT_CHANNEL_CAPACITY, StorageBuilder, StorageHandles};
pub use error::StorageError;
pub use facades::{SnapshotReader, SnapshotWriter, StorageAdmin};
pub use types::{
    AggregatedStats, BucketInterval, DEFAULT_RETENTION, HistoryPeriod, HistoryPoint,
    NodeHistoryRecord, PurgeReport, RegistrySnapshot,
};
