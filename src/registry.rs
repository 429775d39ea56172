use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;

use crate::config::RelayConfig;
use crate::connection::UpstreamConnection;
use crate::forwarder::Forwarder;
use crate::source::EventSource;
use crate::stats::{aggregate, GlobalStats};
use crate::types::{ConnectionStatus, InstanceConfig, InstanceStats};

/// Owns every instance's connection and delivery engine, keyed by name.
///
/// The registry composes the per-instance components and exposes bulk
/// lifecycle and cross-instance stat queries; it contains no delivery logic
/// itself. Instances are fully isolated: one instance's connection or
/// webhook failures never affect another.
pub struct InstanceRegistry {
    config: RelayConfig,
    client: reqwest::Client,
    instances: HashMap<String, InstanceEntry>,
}

struct InstanceEntry {
    connection: UpstreamConnection,
    forwarder: Arc<Forwarder>,
}

impl InstanceRegistry {
    /// Create an empty registry over an immutable configuration.
    ///
    /// One HTTP client is shared by every instance's deliveries.
    pub fn new(config: RelayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
            instances: HashMap::new(),
        }
    }

    /// Add and start every configured instance, resolving each one's
    /// upstream source through `make_source`.
    pub async fn initialize<F>(&mut self, make_source: F)
    where
        F: Fn(&InstanceConfig) -> Arc<dyn EventSource>,
    {
        let configs = self.config.instances.clone();
        for instance in configs {
            let source = make_source(&instance);
            self.add_instance(instance, source).await;
        }

        info!(instances = self.instances.len(), "instance registry initialized");
    }

    /// Wire one forwarder and one upstream connection for the instance,
    /// store them under its name, and start connecting.
    pub async fn add_instance(&mut self, instance: InstanceConfig, source: Arc<dyn EventSource>) {
        info!(
            instance = %instance.name,
            own_webhooks = instance.webhooks.len(),
            global_webhooks = self.config.global_webhooks.len(),
            filtered_events = instance.events.len(),
            "configuring instance"
        );

        let name = instance.name.clone();
        let webhooks = self.config.effective_webhooks(&instance);
        let forwarder = Arc::new(Forwarder::new(
            instance,
            webhooks,
            self.config.delivery.clone(),
            self.client.clone(),
        ));
        let connection = UpstreamConnection::new(
            name.clone(),
            source,
            forwarder.clone(),
            self.config.reconnect.clone(),
        );
        connection.connect().await;

        self.instances.insert(
            name,
            InstanceEntry {
                connection,
                forwarder,
            },
        );
    }

    /// Stats snapshot for one instance, if it exists.
    pub async fn instance_stats(&self, name: &str) -> Option<InstanceStats> {
        match self.instances.get(name) {
            Some(entry) => Some(entry.forwarder.stats().await),
            None => None,
        }
    }

    /// Stats snapshots for every instance, keyed by name.
    pub async fn all_stats(&self) -> HashMap<String, InstanceStats> {
        let mut stats = HashMap::with_capacity(self.instances.len());
        for (name, entry) in &self.instances {
            stats.insert(name.clone(), entry.forwarder.stats().await);
        }
        stats
    }

    /// Element-wise sum of all instance stats, with the derived success rate.
    pub async fn global_stats(&self) -> GlobalStats {
        let mut per_instance = Vec::with_capacity(self.instances.len());
        for entry in self.instances.values() {
            per_instance.push(entry.forwarder.stats().await);
        }
        aggregate(per_instance.iter(), self.instances.len())
    }

    /// Connection health snapshot for every instance.
    pub async fn instances_status(&self) -> HashMap<String, ConnectionStatus> {
        let mut status = HashMap::with_capacity(self.instances.len());
        for (name, entry) in &self.instances {
            status.insert(name.clone(), entry.connection.status().await);
        }
        status
    }

    /// Disconnect every instance. In-flight deliveries still complete.
    pub async fn disconnect_all(&self) {
        info!("disconnecting all instances");
        for entry in self.instances.values() {
            entry.connection.disconnect().await;
        }
    }

    /// Zero every instance's counters.
    pub async fn reset_all_stats(&self) {
        for entry in self.instances.values() {
            entry.forwarder.reset_stats().await;
        }
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}
