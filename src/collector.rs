//! Collector Layer
//!
//! Polls each network's registry, probes a sample of its pods, and turns the
//! results into snapshots, node history and status alerts.
//!
//! # Architecture
//!
//! - [`RegistryClient`]: Fetches a network's pod list
//! - [`NodeProber`]: Queries one pod's version, stats and peers concurrently
//! - [`FanOutAggregator`]: Samples the registry and probes in bounded waves
//! - [`Schedule`] / [`Ticker`]: Cycle cadence (interval or cron) with injectable time
//! - [`CollectorScheduler`]: Runs cycles, feeds the hot cache, store and alert sink
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! use podscope::cache::HotCache;
//! use podscope::clock::SystemClock;
//! use podscope::collector::{
//!     AggregatorConfig, CollectorScheduler, FanOutAggregator, NodeProber, RegistryClient,
//!     DEFAULT_RPC_PORT,
//! };
//! use podscope::transport::{HttpTransport, SharedTransport, TransportConfig};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let transport: SharedTransport = Arc::new(HttpTransport::new(TransportConfig::default())?);
//! let clock = SystemClock::shared();
//! let aggregator = FanOutAggregator::new(
//!     RegistryClient::new(transport.clone()),
//!     NodeProber::new(transport, DEFAULT_RPC_PORT),
//!     AggregatorConfig::default(),
//!     clock.clone(),
//! );
//! let cache = Arc::new(HotCache::new(Duration::from_secs(60), clock.clone()));
//! let scheduler = CollectorScheduler::new(Vec::new(), aggregator, cache, clock);
//! let report = scheduler.run_cycle().await;
//! println!("{} networks collected", report.collected());
//! # Ok(())
//! # }
//! ```

pub mod aggregator;
pub mod alerts;
mod prober;
pub(crate) mod registry;
mod schedule;
mod scheduler;
mod types;

pub use aggregator::{
    AggregatorConfig, DEFAULT_BATCH_SIZE, FanOutAggregator, NetworkCollection, aggregate,
};
pub use alerts::{
    AlertError, AlertEvent, AlertSink, AlertSubscriptions, LogAlertSink, StatusTracker,
    StatusTransition, Subscription, WebhookAlertSink,
};
pub use prober::{DEFAULT_RPC_PORT, NodeProber};
pub use registry::{RegistryClient, RegistryError};
pub use schedule::{
    CollectorError, DEFAULT_INITIAL_DELAY, DEFAULT_INTERVAL, MIN_INTERVAL, ManualTicker,
    ManualTrigger, Schedule, ScheduleTicker, Ticker,
};
pub use scheduler::{
    CollectorScheduler, CycleReport, DEFAULT_REGISTRY_SNAPSHOT_INTERVAL, NetworkOutcome,
};
pub use types::{
    DEFAULT_SAMPLE_SIZE, NetworkSnapshot, NodeRecord, NodeStats, NodeStatus, Registry, SampleSize,
};
