//! Pod-credit passthrough.
//!
//! Proxies the external reputation-credit service through a short-lived hot
//! cache. When a refresh fails, the last good document is served flagged as
//! cached instead of surfacing the failure.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::cache::HotCache;
use crate::clock::SharedClock;
use crate::transport::{HttpTransport, TransportError};

/// Default cache lifetime for the credit document.
pub const DEFAULT_CREDITS_TTL: Duration = Duration::from_secs(60);

const CACHE_KEY: &str = "pod-credits";

/// A credit document and where it came from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreditsResponse {
    pub data: Value,
    /// Served from cache rather than fetched by this request.
    pub cached: bool,
    /// Older than the TTL (only after a failed refresh).
    pub stale: bool,
    pub fetched_at: DateTime<Utc>,
}

/// Cached client for the credit service.
pub struct CreditsClient {
    transport: HttpTransport,
    url: String,
    timeout: Option<Duration>,
    cache: HotCache<Value>,
    /// Held while refreshing so concurrent callers share one upstream call.
    refresh: Mutex<()>,
}

impl std::fmt::Debug for CreditsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditsClient")
            .field("url", &self.url)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl CreditsClient {
    pub fn new(transport: HttpTransport, url: impl Into<String>, ttl: Duration, clock: SharedClock) -> Self {
        Self {
            transport,
            url: url.into(),
            timeout: None,
            cache: HotCache::new(ttl, clock),
            refresh: Mutex::new(()),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Return the credit document, refreshing it when the cached copy expired.
    ///
    /// # Errors
    /// Returns the transport error only when the refresh fails and nothing
    /// was ever cached.
    pub async fn fetch(&self) -> Result<CreditsResponse, TransportError> {
        if let Some(fresh) = self.fresh() {
            return Ok(fresh);
        }

        let _refresh = self.refresh.lock().await;
        // Another caller may have refreshed while we waited.
        if let Some(fresh) = self.fresh() {
            return Ok(fresh);
        }

        let cached = self.cache.get(CACHE_KEY);
        match self.transport.get_json(&self.url, self.timeout).await {
            Ok(data) => {
                self.cache.set(CACHE_KEY, data.clone());
                let fetched_at = self
                    .cache
                    .get(CACHE_KEY)
                    .map_or_else(Utc::now, |hit| hit.stored_at);
                Ok(CreditsResponse {
                    data,
                    cached: false,
                    stale: false,
                    fetched_at,
                })
            }
            Err(e) => match cached {
                Some(hit) => {
                    tracing::warn!(url = %self.url, kind = e.kind(), error = %e, "Credit refresh failed; serving cached copy");
                    Ok(CreditsResponse {
                        data: Value::clone(&hit.value),
                        cached: true,
                        stale: true,
                        fetched_at: hit.stored_at,
                    })
                }
                None => {
                    tracing::warn!(url = %self.url, kind = e.kind(), error = %e, "Credit service unreachable");
                    Err(e)
                }
            },
        }
    }

    fn fresh(&self) -> Option<CreditsResponse> {
        self.cache
            .get(CACHE_KEY)
            .filter(|hit| !hit.stale)
            .map(|hit| CreditsResponse {
                data: Value::clone(&hit.value),
                cached: true,
                stale: false,
                fetched_at: hit.stored_at,
            })
    }
}
