use std::sync::Arc;

use axum::{Json, extract::State};

use super::{ApiError, ApiResult, AppState};
use crate::credits::CreditsResponse;

/// `GET /api/pod-credits`: the credit document, served through the hot cache.
pub(super) async fn pod_credits_handler(
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<CreditsResponse>> {
    let credits = state
        .credits
        .as_ref()
        .ok_or_else(|| ApiError::Unavailable("credit service is not configured".to_string()))?;
    let response = credits.fetch().await.map_err(|e| {
        tracing::warn!(url = %credits.url(), error = %e, "Credit fetch failed with nothing cached");
        ApiError::from(e)
    })?;
    Ok(Json(response))
}
