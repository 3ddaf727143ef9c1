//! Status-transition alerting.
//!
//! The scheduler feeds each network's probe results into a [`StatusTracker`],
//! matches the resulting transitions against [`AlertSubscriptions`], and hands
//! one [`AlertEvent`] per subscribed pubkey to an [`AlertSink`].

use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::collector::{NodeStats, NodeStatus};

/// Default deadline for webhook delivery.
pub const DEFAULT_WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// A node whose classification changed between two successful cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusTransition {
    pub network: String,
    pub pubkey: String,
    pub address: String,
    pub previous: NodeStatus,
    pub current: NodeStatus,
}

/// A transition delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertEvent {
    pub network: String,
    pub pubkey: String,
    pub address: String,
    pub previous: NodeStatus,
    pub current: NodeStatus,
    pub subscribers: Vec<String>,
    pub detected_at: DateTime<Utc>,
}

/// A single `(pubkey, subscriber)` pair.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Subscription {
    pub pubkey: String,
    pub subscriber: String,
}

/// Errors from alert delivery.
#[derive(Debug, Error)]
pub enum AlertError {
    #[error("alert delivery failed: {0}")]
    Delivery(String),

    #[error("alert endpoint returned HTTP {0}")]
    Status(u16),
}

impl AlertError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Delivery(_) => "alert_delivery",
            Self::Status(_) => "alert_status",
        }
    }
}

#[derive(Debug, Clone)]
struct Observation {
    status: NodeStatus,
    address: String,
}

/// Last classification per pubkey per network.
///
/// Each successful collection replaces that network's entries wholesale, so
/// only nodes seen in two consecutive successful cycles can transition.
/// Networks that failed a cycle are simply not observed and keep their state.
#[derive(Debug, Default)]
pub struct StatusTracker {
    networks: HashMap<String, HashMap<String, Observation>>,
}

impl StatusTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `nodes` as the current view of `network` and return transitions.
    ///
    /// Nodes without a pubkey cannot be tracked and are ignored.
    pub fn observe(&mut self, network: &str, nodes: &[NodeStats]) -> Vec<StatusTransition> {
        let current: HashMap<String, Observation> = nodes
            .iter()
            .filter_map(|node| {
                let pubkey = node.pubkey.clone()?;
                Some((
                    pubkey,
                    Observation {
                        status: node.status,
                        address: node.address.clone(),
                    },
                ))
            })
            .collect();

        let mut transitions = Vec::new();
        if let Some(previous) = self.networks.get(network) {
            for (pubkey, now) in &current {
                if let Some(before) = previous.get(pubkey)
                    && before.status != now.status
                {
                    transitions.push(StatusTransition {
                        network: network.to_string(),
                        pubkey: pubkey.clone(),
                        address: now.address.clone(),
                        previous: before.status,
                        current: now.status,
                    });
                }
            }
        }
        transitions.sort_by(|a, b| a.pubkey.cmp(&b.pubkey));

        self.networks.insert(network.to_string(), current);
        transitions
    }

    /// Number of nodes tracked for `network`.
    pub fn tracked(&self, network: &str) -> usize {
        self.networks.get(network).map_or(0, HashMap::len)
    }
}

/// Subscriber table: pubkey -> subscriber ids.
///
/// Owned by the composition root and shared between the scheduler (read) and
/// the API (read/write).
#[derive(Debug, Default)]
pub struct AlertSubscriptions {
    inner: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl AlertSubscriptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscription. Returns `false` if it already existed.
    pub fn subscribe(&self, pubkey: &str, subscriber: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        inner
            .entry(pubkey.to_string())
            .or_default()
            .insert(subscriber.to_string())
    }

    /// Remove a subscription. Returns `false` if it did not exist.
    pub fn unsubscribe(&self, pubkey: &str, subscriber: &str) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
        let Some(subscribers) = inner.get_mut(pubkey) else {
            return false;
        };
        let removed = subscribers.remove(subscriber);
        if subscribers.is_empty() {
            inner.remove(pubkey);
        }
        removed
    }

    /// Subscribers of `pubkey`, sorted.
    pub fn subscribers(&self, pubkey: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .get(pubkey)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Every subscription, sorted by pubkey then subscriber.
    pub fn list(&self) -> Vec<Subscription> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        let mut all: Vec<Subscription> = inner
            .iter()
            .flat_map(|(pubkey, subscribers)| {
                subscribers.iter().map(move |subscriber| Subscription {
                    pubkey: pubkey.clone(),
                    subscriber: subscriber.clone(),
                })
            })
            .collect();
        all.sort();
        all
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner.values().map(BTreeSet::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Turn transitions into events for subscribed pubkeys (one per pubkey per network).
pub fn build_alert_events(
    transitions: &[StatusTransition],
    subscriptions: &AlertSubscriptions,
    detected_at: DateTime<Utc>,
) -> Vec<AlertEvent> {
    transitions
        .iter()
        .filter_map(|t| {
            let subscribers = subscriptions.subscribers(&t.pubkey);
            if subscribers.is_empty() {
                return None;
            }
            Some(AlertEvent {
                network: t.network.clone(),
                pubkey: t.pubkey.clone(),
                address: t.address.clone(),
                previous: t.previous,
                current: t.current,
                subscribers,
                detected_at,
            })
        })
        .collect()
}

/// Outbound alert channel.
#[async_trait]
pub trait AlertSink: Send + Sync + 'static {
    /// Deliver a batch of events from one cycle.
    async fn deliver(&self, events: &[AlertEvent]) -> Result<(), AlertError>;
}

/// Sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAlertSink;

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, events: &[AlertEvent]) -> Result<(), AlertError> {
        for event in events {
            tracing::info!(
                network = %event.network,
                pubkey = %event.pubkey,
                address = %event.address,
                previous = %event.previous,
                current = %event.current,
                subscribers = event.subscribers.len(),
                "Node status changed"
            );
        }
        Ok(())
    }
}

/// Sink posting `{"events": [...]}` to a webhook.
#[derive(Clone)]
pub struct WebhookAlertSink {
    client: reqwest::Client,
    url: String,
    token: Option<String>,
    timeout: Duration,
}

impl std::fmt::Debug for WebhookAlertSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebhookAlertSink")
            .field("url", &self.url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .finish_non_exhaustive()
    }
}

impl WebhookAlertSink {
    pub fn new(url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            token: token.filter(|t| !t.is_empty()),
            timeout: DEFAULT_WEBHOOK_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl AlertSink for WebhookAlertSink {
    async fn deliver(&self, events: &[AlertEvent]) -> Result<(), AlertError> {
        let mut request = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(&json!({ "events": events }));
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AlertError::Delivery(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(AlertError::Status(status.as_u16()));
        }
        tracing::debug!(count = events.len(), "Alerts delivered to webhook");
        Ok(())
    }
}
