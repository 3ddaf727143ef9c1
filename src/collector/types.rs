//! Core data types shared by the collection pipeline.
//!
//! - [`NodeRecord`] / [`Registry`]: what a network's registry reports
//! - [`NodeStats`]: one node's point-in-time measurement
//! - [`NetworkSnapshot`]: the per-network aggregate of one cycle
//! - [`SampleSize`]: how many registry entries get probed per cycle

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Default number of pods probed per network per cycle.
pub const DEFAULT_SAMPLE_SIZE: usize = 20;

/// A pod as listed by a registry.
///
/// Re-fetched every cycle and replaced wholesale, never patched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRecord {
    /// Gossip address (`host:port`).
    pub address: String,
    /// Public-key identity, when the registry exposes one.
    #[serde(default)]
    pub pubkey: Option<String>,
    /// Last time the registry heard from the pod (Unix seconds).
    #[serde(default, alias = "last_seen")]
    pub last_seen_timestamp: Option<i64>,
    /// Software version reported to the registry.
    #[serde(default)]
    pub version: Option<String>,
}

/// A registry fetch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Registry {
    pub pods: Vec<NodeRecord>,
    pub total_count: u64,
}

impl Registry {
    /// Sort pods by descending last-seen time; pods without a timestamp go last.
    ///
    /// Sampling takes a prefix of this order, so the freshest pods get probed.
    pub fn sort_freshest_first(&mut self) {
        self.pods
            .sort_by(|a, b| b.last_seen_timestamp.cmp(&a.last_seen_timestamp));
    }
}

/// Node liveness classification.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NodeStatus {
    Online,
    Offline,
}

impl NodeStatus {
    pub fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

/// One node's measurement from a single probe.
///
/// Immutable once produced: consumed by the aggregator, then persisted.
/// Fields are `None` when the node did not report them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeStats {
    pub address: String,
    pub pubkey: Option<String>,
    pub status: NodeStatus,
    pub version: Option<String>,
    pub cpu_percent: Option<f64>,
    pub ram_used: Option<u64>,
    pub ram_total: Option<u64>,
    /// `ram_used / ram_total * 100`, omitted when the total is unknown or zero.
    pub ram_percent: Option<f64>,
    /// Storage committed by the node, in bytes.
    pub file_size: Option<u64>,
    pub uptime_seconds: Option<u64>,
    pub active_streams: Option<u64>,
    pub packets_received: Option<u64>,
    pub packets_sent: Option<u64>,
    pub total_bytes: Option<u64>,
    pub peers_count: Option<u64>,
    /// Summary of failed calls, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl NodeStats {
    /// A node that answered nothing.
    pub fn offline(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            pubkey: None,
            status: NodeStatus::Offline,
            version: None,
            cpu_percent: None,
            ram_used: None,
            ram_total: None,
            ram_percent: None,
            file_size: None,
            uptime_seconds: None,
            active_streams: None,
            packets_received: None,
            packets_sent: None,
            total_bytes: None,
            peers_count: None,
            error: None,
        }
    }
}

/// Aggregate of one network for one collection cycle.
///
/// Online/offline counts and resource figures cover only the probed sample,
/// so they are an estimate of the registry whenever `estimate` is true.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSnapshot {
    pub network: String,
    pub timestamp: DateTime<Utc>,
    /// Registry size.
    pub total_pods: u64,
    /// Pods actually probed this cycle.
    pub sampled_pods: u64,
    pub online_pods: u64,
    pub offline_pods: u64,
    /// Sum of `file_size` over online sampled pods (bytes).
    pub total_storage: u64,
    /// Mean CPU percent over online sampled pods; 0 when none.
    pub avg_cpu: f64,
    /// Mean RAM percent over online sampled pods; 0 when none.
    pub avg_ram: f64,
    pub total_streams: u64,
    pub total_bytes: u64,
    /// Reported version -> pod count, over the whole sample.
    pub version_distribution: BTreeMap<String, u64>,
    /// True when the counts come from a subset of the registry.
    pub estimate: bool,
}

/// Number of registry entries probed per cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SampleSizeRepr", into = "SampleSizeRepr")]
pub enum SampleSize {
    /// Probe at most this many pods (freshest first).
    Limit(usize),
    /// Probe the whole registry.
    All,
}

impl Default for SampleSize {
    fn default() -> Self {
        Self::Limit(DEFAULT_SAMPLE_SIZE)
    }
}

impl SampleSize {
    /// The prefix of `pods` to probe.
    pub fn select<'a>(&self, pods: &'a [NodeRecord]) -> &'a [NodeRecord] {
        match *self {
            Self::Limit(n) => &pods[..n.min(pods.len())],
            Self::All => pods,
        }
    }
}

impl fmt::Display for SampleSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Limit(n) => write!(f, "{n}"),
            Self::All => f.write_str("all"),
        }
    }
}

impl FromStr for SampleSize {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") {
            return Ok(Self::All);
        }
        match s.parse::<usize>() {
            Ok(0) => Err("sample size must be at least 1".to_string()),
            Ok(n) => Ok(Self::Limit(n)),
            Err(_) => Err(format!("invalid sample size '{s}', expected a number or 'all'")),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum SampleSizeRepr {
    Count(usize),
    Keyword(String),
}

impl TryFrom<SampleSizeRepr> for SampleSize {
    type Error = String;

    fn try_from(repr: SampleSizeRepr) -> Result<Self, Self::Error> {
        match repr {
            SampleSizeRepr::Count(0) => Err("sample size must be at least 1".to_string()),
            SampleSizeRepr::Count(n) => Ok(Self::Limit(n)),
            SampleSizeRepr::Keyword(s) => s.parse(),
        }
    }
}

impl From<SampleSize> for SampleSizeRepr {
    fn from(size: SampleSize) -> Self {
        match size {
            SampleSize::Limit(n) => Self::Count(n),
            SampleSize::All => Self::Keyword("all".to_string()),
        }
    }
}
