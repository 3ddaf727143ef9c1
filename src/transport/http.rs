//! reqwest-backed transport with two request strategies.
//!
//! - **Secure** (`https://`): the public entry endpoints sit behind edge
//!   protection, so requests carry a browser-like header set and get a longer
//!   deadline.
//! - **Plain** (anything else): node-local RPC ports. No extra headers and a
//!   short deadline so an offline node costs at most a few seconds.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};

use super::challenge::is_challenge;
use super::{RpcMethod, RpcTransport, TransportError};

/// Default deadline for node-local calls.
pub const DEFAULT_PLAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Default deadline for external TLS calls.
pub const DEFAULT_SECURE_TIMEOUT: Duration = Duration::from_secs(10);

/// Browser user agent presented on the secure path.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Request strategy selected per endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    /// Challenge-tolerant path with browser headers.
    Secure,
    /// Lightweight path for node-local ports.
    Plain,
}

impl Strategy {
    /// Pick a strategy from the endpoint's scheme.
    pub fn for_endpoint(endpoint: &str) -> Self {
        let is_tls = endpoint
            .get(..8)
            .is_some_and(|scheme| scheme.eq_ignore_ascii_case("https://"));
        if is_tls { Self::Secure } else { Self::Plain }
    }
}

/// Deadlines for each strategy.
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Deadline for plain (node-local) calls.
    pub plain_timeout: Duration,
    /// Deadline for secure (external) calls.
    pub secure_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            plain_timeout: DEFAULT_PLAIN_TIMEOUT,
            secure_timeout: DEFAULT_SECURE_TIMEOUT,
        }
    }
}

/// Stateless HTTP transport.
#[derive(Clone)]
pub struct HttpTransport {
    plain: Client,
    secure: Client,
    config: TransportConfig,
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl HttpTransport {
    /// Build both HTTP clients.
    ///
    /// # Errors
    /// Returns `TransportError::Connection` if a client cannot be constructed
    /// (e.g., the TLS backend fails to initialize).
    pub fn new(config: TransportConfig) -> Result<Self, TransportError> {
        let plain = Client::builder()
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to build HTTP client: {e}")))?;

        let secure = Client::builder()
            .user_agent(BROWSER_USER_AGENT)
            .default_headers(browser_headers())
            .build()
            .map_err(|e| TransportError::Connection(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            plain,
            secure,
            config,
        })
    }

    /// Deadline applied when the caller does not supply one.
    pub fn default_timeout(&self, strategy: Strategy) -> Duration {
        match strategy {
            Strategy::Secure => self.config.secure_timeout,
            Strategy::Plain => self.config.plain_timeout,
        }
    }

    /// Fetch an arbitrary JSON document (no JSON-RPC envelope).
    pub async fn get_json(&self, url: &str, timeout: Option<Duration>) -> Result<Value, TransportError> {
        let strategy = Strategy::for_endpoint(url);
        let timeout = timeout.unwrap_or_else(|| self.default_timeout(strategy));
        let request = self.client(strategy).get(url);
        let (status, body) = execute(request, timeout).await?;
        parse_body(status, &body)
    }

    fn client(&self, strategy: Strategy) -> &Client {
        match strategy {
            Strategy::Secure => &self.secure,
            Strategy::Plain => &self.plain,
        }
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn call(
        &self,
        endpoint: &str,
        method: RpcMethod,
        timeout: Option<Duration>,
    ) -> Result<Value, TransportError> {
        let strategy = Strategy::for_endpoint(endpoint);
        let timeout = timeout.unwrap_or_else(|| self.default_timeout(strategy));
        let payload = json!({ "jsonrpc": "2.0", "id": 1, "method": method.as_ref() });

        let request = self.client(strategy).post(endpoint).json(&payload);
        let (status, body) = execute(request, timeout).await?;
        let value = parse_body(status, &body)?;
        unwrap_rpc_result(value)
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert("sec-fetch-mode", HeaderValue::from_static("cors"));
    headers.insert("sec-fetch-site", HeaderValue::from_static("cross-site"));
    headers
}

/// Send the request under a deadline; the future is dropped on timeout.
async fn execute(request: RequestBuilder, timeout: Duration) -> Result<(u16, String), TransportError> {
    let exchange = async {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>((status, body))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(Ok(pair)) => Ok(pair),
        Ok(Err(e)) => Err(TransportError::from_reqwest(&e, timeout)),
        Err(_) => Err(TransportError::Timeout(timeout)),
    }
}

/// Challenge check first (edge pages usually arrive as 403/503), then status, then JSON.
fn parse_body(status: u16, body: &str) -> Result<Value, TransportError> {
    if is_challenge(body) {
        return Err(TransportError::ChallengeBlocked { status });
    }
    if !(200..300).contains(&status) {
        return Err(TransportError::Status(status));
    }
    serde_json::from_str(body).map_err(|e| TransportError::MalformedResponse(e.to_string()))
}

/// Extract `result` from a JSON-RPC envelope.
fn unwrap_rpc_result(value: Value) -> Result<Value, TransportError> {
    let Value::Object(mut envelope) = value else {
        return Err(TransportError::MalformedResponse(
            "expected a JSON-RPC object".to_string(),
        ));
    };

    if let Some(err) = envelope.remove("error").filter(|e| !e.is_null()) {
        let code = err.get("code").and_then(Value::as_i64).unwrap_or(0);
        let message = err
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_owned)
            .unwrap_or_else(|| err.to_string());
        return Err(TransportError::Rpc { code, message });
    }

    envelope
        .remove("result")
        .ok_or_else(|| TransportError::MalformedResponse("missing result member".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strategy_for_endpoint() {
        assert_eq!(
            Strategy::for_endpoint("https://rpc.example.org/rpc"),
            Strategy::Secure
        );
        assert_eq!(
            Strategy::for_endpoint("HTTPS://rpc.example.org/rpc"),
            Strategy::Secure
        );
        assert_eq!(
            Strategy::for_endpoint("http://10.0.0.1:6000/rpc"),
            Strategy::Plain
        );
        assert_eq!(Strategy::for_endpoint("10.0.0.1:6000"), Strategy::Plain);
    }

    #[test]
    fn test_default_timeouts() {
        let transport = HttpTransport::new(TransportConfig::default()).unwrap();
        assert_eq!(
            transport.default_timeout(Strategy::Plain),
            DEFAULT_PLAIN_TIMEOUT
        );
        assert_eq!(
            transport.default_timeout(Strategy::Secure),
            DEFAULT_SECURE_TIMEOUT
        );
    }

    #[test]
    fn test_parse_body_challenge_beats_status() {
        let body = "<html><title>Just a moment...</title></html>";
        assert_eq!(
            parse_body(403, body),
            Err(TransportError::ChallengeBlocked { status: 403 })
        );
    }

    #[test]
    fn test_parse_body_status_and_json() {
        assert_eq!(parse_body(502, "bad gateway"), Err(TransportError::Status(502)));
        assert!(matches!(
            parse_body(200, "not json"),
            Err(TransportError::MalformedResponse(_))
        ));
        assert_eq!(parse_body(200, r#"{"a":1}"#).unwrap()["a"], 1);
    }

    #[test]
    fn test_unwrap_rpc_result() {
        let ok = json!({"jsonrpc": "2.0", "id": 1, "result": {"version": "0.7.1"}});
        assert_eq!(unwrap_rpc_result(ok).unwrap()["version"], "0.7.1");

        let err = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "Method not found"}});
        assert_eq!(
            unwrap_rpc_result(err),
            Err(TransportError::Rpc {
                code: -32601,
                message: "Method not found".to_string()
            })
        );

        assert!(matches!(
            unwrap_rpc_result(json!({"jsonrpc": "2.0", "id": 1})),
            Err(TransportError::MalformedResponse(_))
        ));
        assert!(matches!(
            unwrap_rpc_result(json!([1, 2])),
            Err(TransportError::MalformedResponse(_))
        ));
    }

    // =========================================================================
    // Live mock endpoint
    // =========================================================================

    mod live {
        use axum::Router;
        use axum::body::Bytes;
        use axum::http::{HeaderMap as AxumHeaders, StatusCode};
        use axum::response::{Html, IntoResponse, Json};
        use axum::routing::{get, post};
        use tokio::net::TcpListener;

        use super::*;

        async fn rpc(body: Bytes) -> Json<Value> {
            let request: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
            match request["method"].as_str() {
                Some("get-version") => Json(json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "result": { "version": "0.7.1" },
                })),
                _ => Json(json!({
                    "jsonrpc": "2.0",
                    "id": request["id"],
                    "error": { "code": -32601, "message": "Method not found" },
                })),
            }
        }

        async fn slow() -> Json<Value> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Json(json!({ "jsonrpc": "2.0", "id": 1, "result": {} }))
        }

        async fn challenge() -> impl IntoResponse {
            (
                StatusCode::FORBIDDEN,
                Html("<!DOCTYPE html><html><head><title>Just a moment...</title></head></html>"),
            )
        }

        async fn echo_headers(headers: AxumHeaders) -> Json<Value> {
            let get = |name: &str| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .map(str::to_owned)
            };
            Json(json!({
                "user_agent": get("user-agent"),
                "accept_language": get("accept-language"),
                "sec_fetch_mode": get("sec-fetch-mode"),
            }))
        }

        async fn serve() -> String {
            let app = Router::new()
                .route("/rpc", post(rpc))
                .route("/slow", post(slow))
                .route("/challenge", post(challenge))
                .route("/headers", get(echo_headers));
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            tokio::spawn(async move {
                axum::serve(listener, app).await.unwrap();
            });
            format!("http://{addr}")
        }

        fn transport() -> HttpTransport {
            HttpTransport::new(TransportConfig::default()).unwrap()
        }

        #[tokio::test]
        async fn test_call_returns_result_member() {
            let base = serve().await;
            let result = transport()
                .call(&format!("{base}/rpc"), RpcMethod::GetVersion, None)
                .await
                .unwrap();
            assert_eq!(result["version"], "0.7.1");
        }

        #[tokio::test]
        async fn test_slow_endpoint_times_out() {
            let base = serve().await;
            let deadline = Duration::from_millis(100);
            let started = std::time::Instant::now();
            let result = transport()
                .call(&format!("{base}/slow"), RpcMethod::GetStats, Some(deadline))
                .await;
            assert_eq!(result, Err(TransportError::Timeout(deadline)));
            assert!(started.elapsed() < Duration::from_secs(2));
        }

        #[tokio::test]
        async fn test_challenge_page_is_blocked() {
            let base = serve().await;
            let result = transport()
                .call(&format!("{base}/challenge"), RpcMethod::GetPods, None)
                .await;
            assert_eq!(result, Err(TransportError::ChallengeBlocked { status: 403 }));
        }

        #[tokio::test]
        async fn test_rpc_error_envelope() {
            let base = serve().await;
            let result = transport()
                .call(&format!("{base}/rpc"), RpcMethod::GetStats, None)
                .await;
            assert_eq!(
                result,
                Err(TransportError::Rpc {
                    code: -32601,
                    message: "Method not found".to_string()
                })
            );
        }

        #[tokio::test]
        async fn test_secure_client_sends_browser_headers() {
            let base = serve().await;
            let transport = transport();
            let url = format!("{base}/headers");
            let timeout = Duration::from_secs(2);

            let (_, body) = execute(transport.client(Strategy::Secure).get(&url), timeout)
                .await
                .unwrap();
            let seen: Value = serde_json::from_str(&body).unwrap();
            assert_eq!(seen["user_agent"], BROWSER_USER_AGENT);
            assert_eq!(seen["accept_language"], "en-US,en;q=0.9");
            assert_eq!(seen["sec_fetch_mode"], "cors");

            let (_, body) = execute(transport.client(Strategy::Plain).get(&url), timeout)
                .await
                .unwrap();
            let seen: Value = serde_json::from_str(&body).unwrap();
            assert!(seen["sec_fetch_mode"].is_null());
            assert_ne!(seen["user_agent"], BROWSER_USER_AGENT);
        }

        #[tokio::test]
        async fn test_connection_refused_is_typed() {
            let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
            let addr = listener.local_addr().unwrap();
            drop(listener);

            let result = transport()
                .call(&format!("http://{addr}/rpc"), RpcMethod::GetVersion, None)
                .await;
            assert!(
                matches!(result, Err(TransportError::Connection(_))),
                "got {result:?}"
            );
        }
    }
}
