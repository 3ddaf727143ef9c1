//! podscope - fleet data collection and caching pipeline
//!
//! Periodically reads each network's pod registry, probes a sample of pods
//! over JSON-RPC, and turns the results into network snapshots, per-node
//! history and status alerts. The `podscope` binary serves the results over a
//! read-only HTTP API.
//!
//! # Architecture
//!
//! - **Transport**: JSON-RPC over HTTP with bot-challenge detection
//! - **Collector**: Registry client, node prober, fan-out aggregator and scheduler
//! - **Cache**: In-memory latest snapshot per network with staleness tracking
//! - **Storage**: SQLite snapshot store behind a single-writer actor
//! - **Credits**: Cached passthrough to the pod-credit service
//! - **Server**: Axum read API
//!
//! # Example
//!
//! ```rust,ignore
//! use podscope::storage::StorageBuilder;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let handles = StorageBuilder::new("sqlite:data/podscope.db").build().await?;
//!     let latest = handles.reader.latest_snapshots().await?;
//!     println!("{} networks on record", latest.len());
//!     handles.shutdown().await?;
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod clock;
pub mod collector;
pub mod config;
pub mod credits;
pub mod server;
pub mod storage;
pub mod transport;

pub use cache::HotCache;
pub use collector::{CollectorScheduler, FanOutAggregator, NetworkSnapshot};
pub use config::AppConfig;
pub use server::{AppState, create_router};
pub use storage::{SnapshotReader, SnapshotWriter, StorageBuilder, StorageHandles};
pub use transport::{HttpTransport, RpcTransport, TransportError};
