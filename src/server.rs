//! Web server module for podscope.
//!
//! Read API over the collection pipeline: registry passthrough, a generic RPC
//! proxy, history and chart series from the snapshot store, the hot-cache
//! latest view, the pod-credit passthrough and the alert subscription table.

mod alerts;
mod charts;
mod credits;
mod error;
mod history;
mod pods;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
};
use serde::Serialize;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, TraceLayer},
};

use crate::cache::HotCache;
use crate::collector::{AlertSubscriptions, DEFAULT_RPC_PORT, NetworkSnapshot, RegistryClient};
use crate::config::{IntegrationsConfig, NetworkConfig};
use crate::credits::CreditsClient;
use crate::storage::{SnapshotReader, StorageError};
use crate::transport::SharedTransport;

pub use charts::{ChartSeries, NodesPoint, ResourcesPoint, StoragePoint};
pub use error::{ApiError, ApiResult};
pub use history::LatestView;

/// Shared application state.
///
/// Every field is a cheap handle; the composition root owns the underlying
/// cache, store and subscription table.
#[derive(Clone)]
pub struct AppState {
    pub networks: Arc<Vec<NetworkConfig>>,
    pub registry: RegistryClient,
    pub transport: SharedTransport,
    /// Port used when `/api/rpc` is given a bare node address.
    pub rpc_port: u16,
    /// `None` when no persistent store is configured or it could not be opened.
    pub store: Option<SnapshotReader>,
    /// Why the configured store could not be opened.
    pub store_unavailable: Option<String>,
    pub hot_cache: Arc<HotCache<NetworkSnapshot>>,
    pub credits: Option<Arc<CreditsClient>>,
    pub subscriptions: Arc<AlertSubscriptions>,
    pub integrations: IntegrationsConfig,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("networks", &self.networks.len())
            .field("store", &self.store.is_some())
            .field("store_unavailable", &self.store_unavailable)
            .field("credits", &self.credits.is_some())
            .finish_non_exhaustive()
    }
}

impl AppState {
    pub fn new(
        networks: Vec<NetworkConfig>,
        transport: SharedTransport,
        hot_cache: Arc<HotCache<NetworkSnapshot>>,
    ) -> Self {
        Self {
            networks: Arc::new(networks),
            registry: RegistryClient::new(transport.clone()),
            transport,
            rpc_port: DEFAULT_RPC_PORT,
            store: None,
            store_unavailable: None,
            hot_cache,
            credits: None,
            subscriptions: Arc::new(AlertSubscriptions::new()),
            integrations: IntegrationsConfig::default(),
        }
    }

    pub fn with_store(mut self, reader: SnapshotReader) -> Self {
        self.store = Some(reader);
        self
    }

    /// Serve without persistence after the configured store failed to open.
    pub fn with_store_unavailable(mut self, err: &StorageError) -> Self {
        self.store = None;
        self.store_unavailable = Some(match err {
            StorageError::Unavailable(reason) => reason.clone(),
            other => other.to_string(),
        });
        self
    }

    pub fn with_credits(mut self, credits: CreditsClient) -> Self {
        self.credits = Some(Arc::new(credits));
        self
    }

    pub fn with_subscriptions(mut self, subscriptions: Arc<AlertSubscriptions>) -> Self {
        self.subscriptions = subscriptions;
        self
    }

    pub fn with_integrations(mut self, integrations: IntegrationsConfig) -> Self {
        self.integrations = integrations;
        self
    }

    pub fn with_rpc_port(mut self, rpc_port: u16) -> Self {
        self.rpc_port = rpc_port;
        self
    }

    /// Look up a configured network.
    pub(crate) fn network(&self, id: &str) -> ApiResult<&NetworkConfig> {
        self.networks
            .iter()
            .find(|n| n.id == id)
            .ok_or_else(|| ApiError::not_found(format!("unknown network: '{id}'")))
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    db: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    networks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    integrations: Option<Vec<&'static str>>,
}

/// Create the Axum router with all routes.
///
/// `cors_origins` empty (or containing `*`) allows any origin.
pub fn create_router(state: AppState, cors_origins: &[String]) -> Router {
    let app_state = Arc::new(state);

    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .route("/api/pods", get(pods::all_pods_handler))
        .route("/api/pods/{network}", get(pods::network_pods_handler))
        .route("/api/rpc", post(pods::rpc_handler))
        .route(
            "/api/history/network/{network}",
            get(history::network_history_handler),
        )
        .route(
            "/api/history/node/{address}",
            get(history::node_history_handler),
        )
        .route("/api/history/stats", get(history::stats_handler))
        .route("/api/history/latest", get(history::latest_handler))
        .route(
            "/api/history/registry/{network}",
            get(history::registry_snapshot_handler),
        )
        .route(
            "/api/charts/network/{network}",
            get(charts::network_chart_handler),
        )
        .route("/api/charts/comparison", get(charts::comparison_handler))
        .route("/api/pod-credits", get(credits::pod_credits_handler))
        .route(
            "/api/alerts/subscriptions",
            get(alerts::list_handler).post(alerts::subscribe_handler),
        )
        .route(
            "/api/alerts/subscriptions/{pubkey}/{subscriber}",
            delete(alerts::unsubscribe_handler),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::default().include_headers(false)),
        )
        .layer(cors_layer(cors_origins))
        .with_state(app_state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    if origins.is_empty() || origins.iter().any(|o| o == "*") {
        return CorsLayer::permissive();
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| {
            HeaderValue::from_str(o.trim_end_matches('/'))
                .inspect_err(|e| tracing::warn!(origin = %o, error = %e, "Ignoring invalid CORS origin"))
                .ok()
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE])
}

/// Liveness probe.
async fn healthz_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        db: None,
        networks: None,
        integrations: None,
    })
}

/// Readiness probe: store reachability plus configured integrations.
///
/// A store that failed to open at startup reports `degraded` but stays ready.
async fn readyz_handler(State(state): State<Arc<AppState>>) -> Response {
    let db_status = match (&state.store, &state.store_unavailable) {
        (None, Some(reason)) => Ok(format!("unavailable: {reason}")),
        (None, None) => Ok("disabled".to_string()),
        (Some(reader), _) => reader
            .ping()
            .await
            .map(|_| "ready".to_string())
            .map_err(|e| e.to_string()),
    };

    let networks = Some(state.networks.len());
    let integrations = Some(state.integrations.configured());
    let status = match &state.store_unavailable {
        Some(_) => "degraded",
        None => "ok",
    };
    match db_status {
        Ok(db) => Json(HealthResponse {
            status: status.to_string(),
            db: Some(db),
            networks,
            integrations,
        })
        .into_response(),
        Err(err) => {
            tracing::error!(error = %err, "Readiness check failed");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(HealthResponse {
                    status: "not_ready".to_string(),
                    db: Some(err),
                    networks,
                    integrations,
                }),
            )
                .into_response()
        }
    }
}
