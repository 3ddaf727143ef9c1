//! History endpoints backed by the snapshot store and the hot cache.
//!
//! Without a store every history query answers with empty data; the latest
//! view still works from the hot cache.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use strum::IntoEnumIterator;

use super::{ApiError, ApiResult, AppState};
use crate::collector::NetworkSnapshot;
use crate::storage::{
    AggregatedStats, BucketInterval, HistoryPeriod, HistoryPoint, NodeHistoryRecord,
    RegistrySnapshot,
};

#[derive(Debug, Deserialize)]
pub(super) struct PeriodParams {
    pub(super) period: Option<String>,
    pub(super) interval: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(super) struct LatestParams {
    network: Option<String>,
}

/// Accepted query values, comma separated.
fn choices<T: IntoEnumIterator + AsRef<str>>() -> String {
    T::iter()
        .map(|v| v.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `period` query value; `24h` when omitted.
pub(super) fn parse_period(raw: Option<&str>) -> ApiResult<HistoryPeriod> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(HistoryPeriod::default()),
        Some(s) => s.parse().map_err(|_| {
            ApiError::bad_request(format!(
                "unknown period '{s}' (expected one of {})",
                choices::<HistoryPeriod>()
            ))
        }),
    }
}

/// `interval` query value; the period's default when omitted.
pub(super) fn parse_interval(raw: Option<&str>) -> ApiResult<Option<BucketInterval>> {
    match raw.map(str::trim).filter(|s| !s.is_empty()) {
        None => Ok(None),
        Some(s) => s.parse().map(Some).map_err(|_| {
            ApiError::bad_request(format!(
                "unknown interval '{s}' (expected one of {})",
                choices::<BucketInterval>()
            ))
        }),
    }
}

#[derive(Debug, Serialize)]
pub(super) struct NetworkHistoryResponse {
    network: String,
    period: HistoryPeriod,
    interval: BucketInterval,
    points: Vec<HistoryPoint>,
}

/// `GET /api/history/network/{network}?period=&interval=`
pub(super) async fn network_history_handler(
    State(state): State<Arc<AppState>>,
    Path(network): Path<String>,
    Query(params): Query<PeriodParams>,
) -> ApiResult<Json<NetworkHistoryResponse>> {
    let network = state.network(&network)?;
    let period = parse_period(params.period.as_deref())?;
    let interval = parse_interval(params.interval.as_deref())?;

    let points = match &state.store {
        Some(reader) => reader.network_history(&network.id, period, interval).await?,
        None => Vec::new(),
    };
    Ok(Json(NetworkHistoryResponse {
        network: network.id.clone(),
        period,
        interval: interval.unwrap_or_else(|| period.default_interval()),
        points,
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct NodeHistoryResponse {
    address: String,
    period: HistoryPeriod,
    records: Vec<NodeHistoryRecord>,
}

/// `GET /api/history/node/{address}?period=`
pub(super) async fn node_history_handler(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
    Query(params): Query<PeriodParams>,
) -> ApiResult<Json<NodeHistoryResponse>> {
    let period = parse_period(params.period.as_deref())?;
    let records = match &state.store {
        Some(reader) => reader.node_history(&address, period).await?,
        None => Vec::new(),
    };
    Ok(Json(NodeHistoryResponse {
        address,
        period,
        records,
    }))
}

/// `GET /api/history/stats?period=`
pub(super) async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PeriodParams>,
) -> ApiResult<Json<AggregatedStats>> {
    let period = parse_period(params.period.as_deref())?;
    let stats = match &state.store {
        Some(reader) => reader.aggregated_stats(period).await?,
        None => AggregatedStats {
            period,
            snapshot_count: 0,
            network_count: 0,
            avg_online: 0.0,
            min_online: 0,
            max_online: 0,
            avg_cpu: 0.0,
            avg_ram: 0.0,
        },
    };
    Ok(Json(stats))
}

/// Latest known state of one network and where it came from.
#[derive(Debug, Clone, Serialize)]
pub struct LatestView {
    pub network: String,
    /// `cache` or `store`.
    pub source: &'static str,
    /// The cached copy is older than the cache TTL.
    pub stale: bool,
    pub age_seconds: Option<u64>,
    pub snapshot: NetworkSnapshot,
}

/// Fresh cache entry, else the stored latest, else a stale cache entry.
async fn latest_view(state: &AppState, network: &str) -> ApiResult<Option<LatestView>> {
    let cached = state.hot_cache.get(network);
    if let Some(hit) = &cached
        && !hit.stale
    {
        return Ok(Some(LatestView {
            network: network.to_string(),
            source: "cache",
            stale: false,
            age_seconds: Some(hit.age.as_secs()),
            snapshot: NetworkSnapshot::clone(&hit.value),
        }));
    }

    if let Some(reader) = &state.store
        && let Some(snapshot) = reader.latest_snapshot(network).await?
        && cached
            .as_ref()
            .is_none_or(|hit| snapshot.timestamp >= hit.value.timestamp)
    {
        return Ok(Some(LatestView {
            network: network.to_string(),
            source: "store",
            stale: false,
            age_seconds: None,
            snapshot,
        }));
    }

    Ok(cached.map(|hit| LatestView {
        network: network.to_string(),
        source: "cache",
        stale: true,
        age_seconds: Some(hit.age.as_secs()),
        snapshot: NetworkSnapshot::clone(&hit.value),
    }))
}

/// `GET /api/history/latest?network=`: one network, or every configured
/// network that has data.
pub(super) async fn latest_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LatestParams>,
) -> ApiResult<Response> {
    if let Some(network) = params.network.filter(|n| !n.trim().is_empty()) {
        let network = state.network(network.trim())?;
        let view = latest_view(&state, &network.id)
            .await?
            .ok_or_else(|| ApiError::not_found(format!("no data yet for network '{}'", network.id)))?;
        return Ok(Json(view).into_response());
    }

    let mut views = Vec::with_capacity(state.networks.len());
    for network in state.networks.iter() {
        if let Some(view) = latest_view(&state, &network.id).await? {
            views.push(view);
        }
    }
    Ok(Json(serde_json::json!({ "networks": views })).into_response())
}

/// `GET /api/history/registry/{network}`: latest stored registry listing.
pub(super) async fn registry_snapshot_handler(
    State(state): State<Arc<AppState>>,
    Path(network): Path<String>,
) -> ApiResult<Json<RegistrySnapshot>> {
    let network = state.network(&network)?;
    let Some(reader) = &state.store else {
        return Err(ApiError::not_found("no registry snapshots: store disabled"));
    };
    reader
        .latest_registry_snapshot(&network.id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::not_found(format!("no registry snapshot for '{}'", network.id)))
}
