//! A single-process upstream-to-webhook event relay.
//!
//! This crate relays real-time events from multiple independent upstream
//! accounts ("instances") to HTTP webhook consumers, with **per-destination
//! retry, per-instance event filtering, and delivery statistics**.
//!
//! ## Guarantees
//! - Best-effort, at-least-once delivery per webhook, with bounded retries
//! - Per-instance isolation: no failure crosses an instance boundary
//! - Automatic reconnection with capped, jittered exponential backoff
//! - Atomic statistics under concurrent delivery completion
//!
//! ## Non-Guarantees
//! - Exactly-once delivery
//! - Durability of events or stats across restarts
//! - Upstream protocol framing (supplied via the [`EventSource`] seam)
//!
//! Delivery and connection failures are surfaced through stats counters and
//! connection status only; they never crash the process.

mod config;
mod connection;
mod error;
mod forwarder;
mod registry;
mod source;
mod stats;
mod types;

pub use config::RelayConfig;
pub use connection::UpstreamConnection;
pub use error::{ConfigError, ConnectError, FailureReason};
pub use forwarder::Forwarder;
pub use registry::InstanceRegistry;
pub use source::{ChannelSource, EventSource, EventStream};
pub use stats::GlobalStats;
pub use types::{
    ConnectionState, ConnectionStatus, DeliveryConfig, Event, EventType, InstanceConfig,
    InstanceStats, ReconnectPolicy,
};
