use std::collections::{HashMap, HashSet};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One upstream account with its own connection and webhook configuration.
///
/// An `InstanceConfig` describes *where events come from* and *where they go*.
/// It is a pure configuration object with no internal state, immutable after
/// load.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    /// Position of the instance in the configuration (1-based).
    pub number: u32,

    /// Unique instance name. Keys the registry.
    pub name: String,

    /// Instance-specific webhook URLs, in configured order.
    pub webhooks: Vec<String>,

    /// Event-type filter. Empty means no filter: all events pass.
    pub events: HashSet<EventType>,
}

impl InstanceConfig {
    /// Create a new instance with no webhooks and no filter.
    pub fn new(number: u32, name: impl Into<String>) -> Self {
        Self {
            number,
            name: name.into(),
            webhooks: Vec::new(),
            events: HashSet::new(),
        }
    }

    /// Append an instance-specific webhook URL.
    pub fn with_webhook(mut self, url: impl Into<String>) -> Self {
        self.webhooks.push(url.into());
        self
    }

    /// Restrict forwarding to the given event types.
    pub fn with_event_filter<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.events = types.into_iter().map(|t| EventType(t.into())).collect();
        self
    }

    /// Whether an event of this type should be fanned out.
    ///
    /// An empty filter passes everything. Filtering decides forwarding,
    /// not counting.
    pub fn passes_filter(&self, event_type: &EventType) -> bool {
        self.events.is_empty() || self.events.contains(event_type)
    }
}

/// Upstream event type.
///
/// This is a strongly-typed wrapper to avoid accidental mixing of event
/// types with other string identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventType(pub String);

impl EventType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single notification decoded from an upstream connection.
///
/// The payload is pass-through: it is delivered to webhooks exactly as the
/// upstream decoded it, never transformed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Decoded event type.
    pub event_type: EventType,

    /// Opaque JSON payload as decoded upstream.
    pub payload: serde_json::Value,

    /// Name of the instance the event was received on.
    pub instance_name: String,

    /// Receipt timestamp, milliseconds since the Unix epoch.
    pub received_at_ms: u64,
}

impl Event {
    /// Create an event stamped with the current time.
    pub fn new(
        instance_name: impl Into<String>,
        event_type: EventType,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_type,
            payload,
            instance_name: instance_name.into(),
            received_at_ms: now_millis(),
        }
    }
}

/// Per-attempt delivery parameters, shared by every instance.
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Total attempts per (event, webhook) pair. Minimum 1.
    pub retry_attempts: u32,

    /// Fixed wait between failed attempts.
    pub retry_delay: Duration,

    /// Maximum time allowed for a single HTTP attempt.
    pub timeout: Duration,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            retry_attempts: 3,
            retry_delay: Duration::from_millis(1_000),
            timeout: Duration::from_millis(10_000),
        }
    }
}

/// Backoff schedule for upstream reconnection.
///
/// Exponential with cap, plus uniform jitter. Reconnection never gives up;
/// the attempt counter is observability only.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub base_ms: u64,
    pub max_ms: u64,
    pub jitter_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base_ms: 500,
            max_ms: 30_000,
            jitter_ms: 250,
        }
    }
}

/// Lifecycle state of one upstream connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Read-only connection snapshot for health reporting.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub state: ConnectionState,
    /// Opaque id of the currently established connection, if any.
    pub connection_id: Option<String>,
    pub reconnect_attempts: u64,
}

/// Per-instance delivery counters.
///
/// Snapshot type: the live counters are owned by the instance's forwarder.
/// One event may fan out to N webhooks, each contributing independently to
/// the forward counters, so `total_events` is not comparable to their sum.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStats {
    pub total_events: u64,
    pub successful_forwards: u64,
    pub failed_forwards: u64,
    pub by_event_type: HashMap<String, u64>,
}

pub(crate) fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_filter_passes_everything() {
        let instance = InstanceConfig::new(1, "main");
        assert!(instance.passes_filter(&EventType::new("messages.upsert")));
        assert!(instance.passes_filter(&EventType::new("qrcode.updated")));
    }

    #[test]
    fn filter_restricts_to_members() {
        let instance =
            InstanceConfig::new(1, "main").with_event_filter(["messages.upsert"]);
        assert!(instance.passes_filter(&EventType::new("messages.upsert")));
        assert!(!instance.passes_filter(&EventType::new("qrcode.updated")));
    }

    #[test]
    fn builder_preserves_webhook_order() {
        let instance = InstanceConfig::new(1, "main")
            .with_webhook("http://a.example.com")
            .with_webhook("http://b.example.com");
        assert_eq!(
            instance.webhooks,
            vec!["http://a.example.com", "http://b.example.com"]
        );
    }
}
