//! Alert subscription table.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};

use super::{ApiError, ApiResult, AppState};
use crate::collector::Subscription;

/// `GET /api/alerts/subscriptions`
pub(super) async fn list_handler(State(state): State<Arc<AppState>>) -> Json<Value> {
    let subscriptions = state.subscriptions.list();
    Json(json!({ "count": subscriptions.len(), "subscriptions": subscriptions }))
}

#[derive(Debug, Deserialize)]
pub(super) struct SubscribeRequest {
    pubkey: Option<String>,
    subscriber: Option<String>,
}

fn required(value: Option<String>, field: &str) -> ApiResult<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("missing required field: {field}")))
}

/// `POST /api/alerts/subscriptions`: 201 when new, 200 when already present.
pub(super) async fn subscribe_handler(
    State(state): State<Arc<AppState>>,
    request: Result<Json<SubscribeRequest>, JsonRejection>,
) -> ApiResult<Response> {
    let Json(request) = request?;
    let subscription = Subscription {
        pubkey: required(request.pubkey, "pubkey")?,
        subscriber: required(request.subscriber, "subscriber")?,
    };
    let added = state
        .subscriptions
        .subscribe(&subscription.pubkey, &subscription.subscriber);
    if added {
        tracing::info!(pubkey = %subscription.pubkey, subscriber = %subscription.subscriber, "Alert subscription added");
    }
    let status = if added { StatusCode::CREATED } else { StatusCode::OK };
    Ok((status, Json(subscription)).into_response())
}

/// `DELETE /api/alerts/subscriptions/{pubkey}/{subscriber}`
pub(super) async fn unsubscribe_handler(
    State(state): State<Arc<AppState>>,
    Path((pubkey, subscriber)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    if state.subscriptions.unsubscribe(&pubkey, &subscriber) {
        tracing::info!(%pubkey, %subscriber, "Alert subscription removed");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found(format!(
            "no subscription for '{subscriber}' on '{pubkey}'"
        )))
    }
}
