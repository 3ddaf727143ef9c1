//! Chart-ready series derived from bucketed history.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::history::{PeriodParams, parse_interval, parse_period};
use super::{ApiResult, AppState};
use crate::storage::{BucketInterval, HistoryPeriod, HistoryPoint, SnapshotReader};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NodesPoint {
    pub timestamp: DateTime<Utc>,
    pub online: u64,
    pub offline: u64,
    pub total: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourcesPoint {
    pub timestamp: DateTime<Utc>,
    pub cpu: f64,
    pub ram: f64,
    pub streams: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoragePoint {
    pub timestamp: DateTime<Utc>,
    pub total_storage: u64,
    pub total_bytes: u64,
}

/// One network's history split into the three chart series.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ChartSeries {
    pub nodes: Vec<NodesPoint>,
    pub resources: Vec<ResourcesPoint>,
    pub storage: Vec<StoragePoint>,
}

impl From<&[HistoryPoint]> for ChartSeries {
    fn from(points: &[HistoryPoint]) -> Self {
        let mut series = Self::default();
        for p in points {
            series.nodes.push(NodesPoint {
                timestamp: p.timestamp,
                online: p.online_pods,
                offline: p.offline_pods,
                total: p.total_pods,
            });
            series.resources.push(ResourcesPoint {
                timestamp: p.timestamp,
                cpu: p.avg_cpu,
                ram: p.avg_ram,
                streams: p.total_streams,
            });
            series.storage.push(StoragePoint {
                timestamp: p.timestamp,
                total_storage: p.total_storage,
                total_bytes: p.total_bytes,
            });
        }
        series
    }
}

async fn series(
    store: Option<&SnapshotReader>,
    network: &str,
    period: HistoryPeriod,
    interval: Option<BucketInterval>,
) -> ApiResult<ChartSeries> {
    let Some(reader) = store else {
        return Ok(ChartSeries::default());
    };
    let points = reader.network_history(network, period, interval).await?;
    Ok(ChartSeries::from(points.as_slice()))
}

#[derive(Debug, Serialize)]
pub(super) struct NetworkChartResponse {
    network: String,
    period: HistoryPeriod,
    interval: BucketInterval,
    #[serde(flatten)]
    series: ChartSeries,
}

/// `GET /api/charts/network/{network}?period=&interval=`
pub(super) async fn network_chart_handler(
    State(state): State<Arc<AppState>>,
    Path(network): Path<String>,
    Query(params): Query<PeriodParams>,
) -> ApiResult<Json<NetworkChartResponse>> {
    let network = state.network(&network)?;
    let period = parse_period(params.period.as_deref())?;
    let interval = parse_interval(params.interval.as_deref())?;

    let series = series(state.store.as_ref(), &network.id, period, interval).await?;
    Ok(Json(NetworkChartResponse {
        network: network.id.clone(),
        period,
        interval: interval.unwrap_or_else(|| period.default_interval()),
        series,
    }))
}

#[derive(Debug, Serialize)]
pub(super) struct ComparisonResponse {
    period: HistoryPeriod,
    interval: BucketInterval,
    networks: BTreeMap<String, ChartSeries>,
}

/// `GET /api/charts/comparison?period=&interval=`: the same series keyed by network.
pub(super) async fn comparison_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PeriodParams>,
) -> ApiResult<Json<ComparisonResponse>> {
    let period = parse_period(params.period.as_deref())?;
    let interval = parse_interval(params.interval.as_deref())?;

    let mut networks = BTreeMap::new();
    for network in state.networks.iter() {
        let series = series(state.store.as_ref(), &network.id, period, interval).await?;
        networks.insert(network.id.clone(), series);
    }
    Ok(Json(ComparisonResponse {
        period,
        interval: interval.unwrap_or_else(|| period.default_interval()),
        networks,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use axum::http::StatusCode;
    use chrono::TimeZone;
    use uuid::Uuid;

    use super::super::create_router;
    use super::super::test_support::*;
    use super::*;
    use crate::clock::ManualClock;
    use crate::collector::NetworkSnapshot;
    use crate::storage::StorageBuilder;
    use crate::transport::testing::ScriptedTransport;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn point(online: u64) -> HistoryPoint {
        HistoryPoint {
            timestamp: start(),
            total_pods: 10,
            online_pods: online,
            offline_pods: 10 - online,
            total_storage: 500,
            avg_cpu: 11.5,
            avg_ram: 22.25,
            total_streams: 4,
            total_bytes: 9_000,
            samples: 1,
        }
    }

    #[test]
    fn test_series_split() {
        let series = ChartSeries::from([point(7), point(8)].as_slice());
        assert_eq!(series.nodes.len(), 2);
        assert_eq!(series.nodes[1].online, 8);
        assert_eq!(series.nodes[1].offline, 2);
        assert_eq!(series.resources[0].ram, 22.25);
        assert_eq!(series.storage[0].total_bytes, 9_000);
    }

    #[tokio::test]
    async fn test_chart_endpoints() {
        let clock = ManualClock::new(start());
        let handles = StorageBuilder::new("sqlite::memory:")
            .clock(clock.clone())
            .build()
            .await
            .unwrap();
        let snapshot = NetworkSnapshot {
            network: "devnet".to_string(),
            timestamp: start(),
            total_pods: 4,
            sampled_pods: 4,
            online_pods: 3,
            offline_pods: 1,
            total_storage: 300,
            avg_cpu: 10.0,
            avg_ram: 20.0,
            total_streams: 6,
            total_bytes: 700,
            version_distribution: BTreeMap::new(),
            estimate: false,
        };
        handles
            .writer
            .save_network_snapshot(&snapshot, Uuid::new_v4())
            .unwrap();
        handles.writer.flush().await.unwrap();

        let state = state(Arc::new(ScriptedTransport::new()), clock)
            .with_store(handles.reader.clone());
        let router = create_router(state, &[]);

        let (status, body) = get_json(router.clone(), "/api/charts/network/devnet?period=6h").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["interval"], "5m");
        assert_eq!(body["nodes"][0]["online"], 3);
        assert_eq!(body["resources"][0]["cpu"], 10.0);
        assert_eq!(body["storage"][0]["total_storage"], 300);

        let (status, body) = get_json(router.clone(), "/api/charts/comparison").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["networks"]["devnet"]["nodes"][0]["total"], 4);

        let (status, _) = get_json(router, "/api/charts/comparison?period=1y").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        handles.shutdown().await.unwrap();
    }
}
