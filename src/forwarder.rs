use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::sleep;
use tracing::{debug, error, warn};

use crate::error::FailureReason;
use crate::types::{DeliveryConfig, Event, InstanceConfig, InstanceStats};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Per-instance delivery engine.
///
/// Receives decoded events from the instance's upstream connection, applies
/// the event-type filter, and fans each passing event out to the effective
/// webhook set. Each (event, webhook) pair runs its own retry sequence,
/// concurrently with all others; a slow or dead webhook never delays the
/// rest.
pub struct Forwarder {
    instance: InstanceConfig,
    /// Effective destination list: instance webhooks, then global ones.
    /// Computed once from the configuration, which is immutable after load.
    webhooks: Vec<String>,
    delivery: DeliveryConfig,
    client: reqwest::Client,
    stats: Arc<StatsCells>,
}

/// Live counters, shared with in-flight delivery tasks.
#[derive(Default)]
struct StatsCells {
    total_events: AtomicU64,
    successful_forwards: AtomicU64,
    failed_forwards: AtomicU64,
    by_event_type: Mutex<HashMap<String, u64>>,
}

impl Forwarder {
    /// `webhooks` is the instance's effective destination list, as computed
    /// by [`RelayConfig::effective_webhooks`](crate::RelayConfig::effective_webhooks).
    pub fn new(
        instance: InstanceConfig,
        webhooks: Vec<String>,
        delivery: DeliveryConfig,
        client: reqwest::Client,
    ) -> Self {
        Self {
            instance,
            webhooks,
            delivery,
            client,
            stats: Arc::new(StatsCells::default()),
        }
    }

    /// Ingest one decoded event.
    ///
    /// Counts the event unconditionally, then fans it out unless the
    /// instance filter excludes its type. Delivery sequences are spawned and
    /// run to their terminal outcome on their own; they are not awaited here
    /// and survive a later disconnect of the instance.
    pub async fn ingest(&self, event: Event) {
        metric_inc("relay.events.ingested");
        self.stats.total_events.fetch_add(1, Ordering::SeqCst);
        {
            let mut by_type = self.stats.by_event_type.lock().await;
            *by_type.entry(event.event_type.0.clone()).or_insert(0) += 1;
        }

        if !self.instance.passes_filter(&event.event_type) {
            debug!(
                instance = %self.instance.name,
                event_type = %event.event_type,
                "event filtered out"
            );
            return;
        }

        let payload = Arc::new(event.payload);
        for url in &self.webhooks {
            tokio::spawn(deliver_sequence(
                self.client.clone(),
                url.clone(),
                self.instance.name.clone(),
                event.event_type.0.clone(),
                payload.clone(),
                self.delivery.clone(),
                self.stats.clone(),
            ));
        }
    }

    /// Read-only snapshot of the instance counters.
    pub async fn stats(&self) -> InstanceStats {
        InstanceStats {
            total_events: self.stats.total_events.load(Ordering::SeqCst),
            successful_forwards: self.stats.successful_forwards.load(Ordering::SeqCst),
            failed_forwards: self.stats.failed_forwards.load(Ordering::SeqCst),
            by_event_type: self.stats.by_event_type.lock().await.clone(),
        }
    }

    /// Zero every counter and clear the per-type breakdown.
    pub async fn reset_stats(&self) {
        self.stats.total_events.store(0, Ordering::SeqCst);
        self.stats.successful_forwards.store(0, Ordering::SeqCst);
        self.stats.failed_forwards.store(0, Ordering::SeqCst);
        self.stats.by_event_type.lock().await.clear();
    }
}

/// One bounded retry sequence for a single (event, webhook) pair.
///
/// Attempts are strictly sequential with a fixed delay between them; the
/// sequence terminates on the first success or once attempts are exhausted,
/// incrementing exactly one of the forward counters.
async fn deliver_sequence(
    client: reqwest::Client,
    url: String,
    instance: String,
    event_type: String,
    payload: Arc<serde_json::Value>,
    delivery: DeliveryConfig,
    stats: Arc<StatsCells>,
) {
    let attempts = delivery.retry_attempts.max(1);

    for attempt in 1..=attempts {
        match attempt_delivery(&client, &url, &payload, &delivery).await {
            Ok(()) => {
                stats.successful_forwards.fetch_add(1, Ordering::SeqCst);
                metric_inc("relay.delivery.success");
                debug!(
                    instance = %instance,
                    url = %url,
                    event_type = %event_type,
                    attempt,
                    "webhook delivered"
                );
                return;
            }
            Err(reason) => {
                warn!(
                    instance = %instance,
                    url = %url,
                    event_type = %event_type,
                    attempt,
                    error = %reason,
                    "webhook delivery attempt failed"
                );
                if attempt < attempts {
                    sleep(delivery.retry_delay).await;
                }
            }
        }
    }

    stats.failed_forwards.fetch_add(1, Ordering::SeqCst);
    metric_inc("relay.delivery.failed");
    error!(
        instance = %instance,
        url = %url,
        event_type = %event_type,
        attempts,
        "webhook delivery failed after all attempts"
    );
}

/// Single HTTP POST of the untransformed payload.
async fn attempt_delivery(
    client: &reqwest::Client,
    url: &str,
    payload: &serde_json::Value,
    delivery: &DeliveryConfig,
) -> Result<(), FailureReason> {
    let response = client
        .post(url)
        .timeout(delivery.timeout)
        .json(payload)
        .send()
        .await;

    match response {
        Ok(resp) if resp.status().is_success() => Ok(()),
        Ok(resp) => Err(FailureReason::Status(resp.status().as_u16())),
        Err(err) if err.is_timeout() => Err(FailureReason::Timeout),
        Err(_) => Err(FailureReason::Network),
    }
}
