//! API error responses.

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::collector::RegistryError;
use crate::storage::StorageError;
use crate::transport::TransportError;

/// Error returned by API handlers, rendered as `{"error": ..., "kind": ...}`.
#[derive(Debug)]
pub enum ApiError {
    /// Malformed request: missing field, unknown period/interval/method.
    BadRequest(String),
    /// Unknown network, subscription or record.
    NotFound(String),
    /// An upstream (registry, credit service) could not be reached.
    Upstream { kind: &'static str, message: String },
    /// A dependency is not configured.
    Unavailable(String),
    Storage(StorageError),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.clone()),
            Self::NotFound(msg) => (StatusCode::NOT_FOUND, "not_found", msg.clone()),
            Self::Upstream { kind, message } => (StatusCode::BAD_GATEWAY, kind, message.clone()),
            Self::Unavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable", msg.clone()),
            Self::Storage(e) => {
                let status = match e {
                    StorageError::Unavailable(_) | StorageError::ChannelSend => {
                        StatusCode::SERVICE_UNAVAILABLE
                    }
                    _ => StatusCode::INTERNAL_SERVER_ERROR,
                };
                (status, e.kind(), e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = self.parts();
        if status.is_server_error() {
            tracing::error!(kind, error = %message, "Request failed");
        } else {
            tracing::debug!(kind, error = %message, status = status.as_u16(), "Request rejected");
        }
        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}

impl From<StorageError> for ApiError {
    fn from(e: StorageError) -> Self {
        Self::Storage(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(e: JsonRejection) -> Self {
        Self::BadRequest(e.body_text())
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        Self::Upstream {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

impl From<TransportError> for ApiError {
    fn from(e: TransportError) -> Self {
        Self::Upstream {
            kind: e.kind(),
            message: e.to_string(),
        }
    }
}

/// Handler result.
pub type ApiResult<T> = Result<T, ApiError>;
