//! Persisted record types and history query vocabulary.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumIter, EnumString};
use uuid::Uuid;

use crate::collector::{NodeRecord, NodeStats};

/// Default retention window for all persisted records.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(30 * 24 * 3600);

// =============================================================================
// Query Vocabulary
// =============================================================================

/// Look-back window for history queries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    EnumIter,
)]
pub enum HistoryPeriod {
    #[strum(serialize = "1h")]
    #[serde(rename = "1h")]
    OneHour,
    #[strum(serialize = "6h")]
    #[serde(rename = "6h")]
    SixHours,
    #[default]
    #[strum(serialize = "24h")]
    #[serde(rename = "24h")]
    Day,
    #[strum(serialize = "7d")]
    #[serde(rename = "7d")]
    Week,
    #[strum(serialize = "30d")]
    #[serde(rename = "30d")]
    Month,
}

impl HistoryPeriod {
    pub fn duration(self) -> chrono::Duration {
        match self {
            Self::OneHour => chrono::Duration::hours(1),
            Self::SixHours => chrono::Duration::hours(6),
            Self::Day => chrono::Duration::hours(24),
            Self::Week => chrono::Duration::days(7),
            Self::Month => chrono::Duration::days(30),
        }
    }

    /// Bucket width used when the caller does not pick one.
    pub fn default_interval(self) -> BucketInterval {
        match self {
            Self::OneHour => BucketInterval::OneMinute,
            Self::SixHours => BucketInterval::FiveMinutes,
            Self::Day => BucketInterval::FifteenMinutes,
            Self::Week => BucketInterval::OneHour,
            Self::Month => BucketInterval::SixHours,
        }
    }
}

/// Bucket width for history queries.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    EnumString,
    Display,
    AsRefStr,
    EnumIter,
)]
pub enum BucketInterval {
    #[strum(serialize = "1m")]
    #[serde(rename = "1m")]
    OneMinute,
    #[strum(serialize = "5m")]
    #[serde(rename = "5m")]
    FiveMinutes,
    #[strum(serialize = "15m")]
    #[serde(rename = "15m")]
    FifteenMinutes,
    #[strum(serialize = "1h")]
    #[serde(rename = "1h")]
    OneHour,
    #[strum(serialize = "6h")]
    #[serde(rename = "6h")]
    SixHours,
}

impl BucketInterval {
    pub fn millis(self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Self::OneMinute => MINUTE,
            Self::FiveMinutes => 5 * MINUTE,
            Self::FifteenMinutes => 15 * MINUTE,
            Self::OneHour => 60 * MINUTE,
            Self::SixHours => 360 * MINUTE,
        }
    }
}

// =============================================================================
// Query Results
// =============================================================================

/// One bucket of a network's history: the average of every snapshot in it.
///
/// Counts are rounded to whole numbers, percentages to two decimals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryPoint {
    /// Bucket start.
    pub timestamp: DateTime<Utc>,
    pub total_pods: u64,
    pub online_pods: u64,
    pub offline_pods: u64,
    pub total_storage: u64,
    pub avg_cpu: f64,
    pub avg_ram: f64,
    pub total_streams: u64,
    pub total_bytes: u64,
    /// Snapshots averaged into this bucket.
    pub samples: u64,
}

/// Roll-up across every network for a period.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStats {
    pub period: HistoryPeriod,
    pub snapshot_count: u64,
    pub network_count: u64,
    pub avg_online: f64,
    pub min_online: u64,
    pub max_online: u64,
    pub avg_cpu: f64,
    pub avg_ram: f64,
}

/// One persisted node observation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeHistoryRecord {
    pub network: String,
    pub timestamp: DateTime<Utc>,
    pub cycle_id: Uuid,
    #[serde(flatten)]
    pub node: NodeStats,
}

/// A full registry listing captured at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrySnapshot {
    pub network: String,
    pub timestamp: DateTime<Utc>,
    pub total_count: u64,
    pub pods: Vec<NodeRecord>,
}

/// Rows removed by one expiry pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PurgeReport {
    pub cutoff: Option<DateTime<Utc>>,
    pub network_snapshots: u64,
    pub node_history: u64,
    pub registry_snapshots: u64,
}

impl PurgeReport {
    pub fn total(&self) -> u64 {
        self.network_snapshots + self.node_history + self.registry_snapshots
    }
}

// =============================================================================
// Column Helpers
// =============================================================================

/// SQLite integers are signed; saturate on the way in.
pub(crate) fn to_db_int(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

pub(crate) fn from_db_int(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

pub(crate) fn from_millis(ts: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ts).unwrap_or(DateTime::UNIX_EPOCH)
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
