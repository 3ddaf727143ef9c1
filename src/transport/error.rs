//! Transport error taxonomy.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by a single RPC call.
///
/// Every failure mode of a call is folded into one of these variants; nothing
/// escapes the transport boundary as a panic.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum TransportError {
    /// The deadline elapsed and the request was dropped.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Connection-level failure (refused, reset, DNS, TLS).
    #[error("connection error: {0}")]
    Connection(String),

    /// An edge-protection interstitial was returned instead of the API response.
    #[error("blocked by anti-bot challenge (status {status})")]
    ChallengeBlocked { status: u16 },

    /// Non-2xx response without a challenge page.
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    /// Body was not JSON, or not the expected JSON-RPC envelope.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Well-formed JSON-RPC error object.
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
}

impl TransportError {
    /// Stable identifier used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "transport_timeout",
            Self::Connection(_) => "transport_error",
            Self::ChallengeBlocked { .. } => "challenge_blocked",
            Self::Status(_) => "transport_error",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Rpc { .. } => "rpc_error",
        }
    }

    /// Map a reqwest failure onto the taxonomy.
    pub(crate) fn from_reqwest(err: &reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            Self::Timeout(timeout)
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Connection(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            TransportError::Timeout(Duration::from_secs(5)).kind(),
            "transport_timeout"
        );
        assert_eq!(
            TransportError::ChallengeBlocked { status: 403 }.kind(),
            "challenge_blocked"
        );
        assert_eq!(
            TransportError::MalformedResponse("x".into()).kind(),
            "malformed_response"
        );
        assert_eq!(TransportError::Status(502).kind(), "transport_error");
    }

    #[test]
    fn test_error_display() {
        let err = TransportError::Rpc {
            code: -32601,
            message: "Method not found".into(),
        };
        assert_eq!(err.to_string(), "rpc error -32601: Method not found");
    }
}
