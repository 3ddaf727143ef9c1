//! Registry passthrough and the generic RPC proxy.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    response::{IntoResponse, Response},
};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use super::{ApiError, ApiResult, AppState};
use crate::collector::{NodeRecord, RegistryError};
use crate::config::{NetworkClass, NetworkConfig};
use crate::transport::{RpcMethod, node_rpc_endpoint};

/// One network's live registry.
#[derive(Debug, Serialize)]
pub(super) struct NetworkPods {
    network: String,
    name: String,
    class: NetworkClass,
    total_count: u64,
    pods: Vec<NodeRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<&'static str>,
}

impl NetworkPods {
    fn new(network: &NetworkConfig) -> Self {
        Self {
            network: network.id.clone(),
            name: network.display_name().to_string(),
            class: network.class,
            total_count: 0,
            pods: Vec::new(),
            error: None,
            kind: None,
        }
    }
}

/// `GET /api/pods/{network}`: live registry, not cached.
///
/// An empty registry is a valid answer here and returns an empty list.
pub(super) async fn network_pods_handler(
    State(state): State<Arc<AppState>>,
    Path(network): Path<String>,
) -> ApiResult<Json<NetworkPods>> {
    let network = state.network(&network)?;
    let mut body = NetworkPods::new(network);
    match state.registry.get_pods(network).await {
        Ok(registry) => {
            body.total_count = registry.total_count;
            body.pods = registry.pods;
        }
        Err(RegistryError::Empty) => {}
        Err(e) => return Err(ApiError::from(e)),
    }
    Ok(Json(body))
}

/// `GET /api/pods`: every network's live registry; failures are reported per network.
pub(super) async fn all_pods_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let fetches = state.networks.iter().map(|network| {
        let state = state.clone();
        async move {
            let mut body = NetworkPods::new(network);
            match state.registry.get_pods(network).await {
                Ok(registry) => {
                    body.total_count = registry.total_count;
                    body.pods = registry.pods;
                }
                Err(RegistryError::Empty) => {}
                Err(e) => {
                    tracing::warn!(network = %network.id, error = %e, "Registry passthrough failed");
                    body.kind = Some(e.kind());
                    body.error = Some(e.to_string());
                }
            }
            body
        }
    });
    let networks = join_all(fetches).await;
    let total_count: u64 = networks.iter().map(|n| n.total_count).sum();
    Json(json!({ "networks": networks, "total_count": total_count }))
}

/// Body of `POST /api/rpc`.
#[derive(Debug, Deserialize)]
pub(super) struct RpcRequest {
    endpoint: Option<String>,
    method: Option<String>,
}

/// `POST /api/rpc`: forward one call through the transport.
///
/// Transport failures are answered with 200 and an `error` field: an
/// unreachable node is data, not a server fault.
pub(super) async fn rpc_handler(
    State(state): State<Arc<AppState>>,
    request: Result<Json<RpcRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = request?;
    let endpoint = request
        .endpoint
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .ok_or_else(|| ApiError::bad_request("missing required field: endpoint"))?;
    let method = request
        .method
        .filter(|m| !m.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("missing required field: method"))?;
    let method: RpcMethod = method
        .trim()
        .parse()
        .map_err(|_| ApiError::bad_request(format!("unsupported method: '{method}'")))?;

    let target = node_rpc_endpoint(&endpoint, state.rpc_port);
    match state.transport.call(&target, method, None).await {
        Ok(result) => Ok(Json(json!({ "result": result })).into_response()),
        Err(e) => {
            tracing::debug!(endpoint = %target, %method, error = %e, "Proxied RPC failed");
            Ok(Json(json!({ "error": e.to_string(), "kind": e.kind() })).into_response())
        }
    }
}
