use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::error::ConfigError;
use crate::types::{DeliveryConfig, EventType, InstanceConfig, ReconnectPolicy};

/// Complete relay configuration, immutable for the process lifetime.
///
/// Constructed once at start-up, either directly or from the environment,
/// and handed to the `InstanceRegistry` by value. There is no hot-reload.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Configured instances, in declaration order.
    pub instances: Vec<InstanceConfig>,

    /// Webhook URLs appended to every instance's own list at delivery time.
    pub global_webhooks: Vec<String>,

    /// Shared per-delivery retry/timeout parameters.
    pub delivery: DeliveryConfig,

    /// Shared upstream reconnection backoff.
    pub reconnect: ReconnectPolicy,
}

impl RelayConfig {
    pub fn new(instances: Vec<InstanceConfig>) -> Self {
        Self {
            instances,
            global_webhooks: Vec::new(),
            delivery: DeliveryConfig::default(),
            reconnect: ReconnectPolicy::default(),
        }
    }

    /// Append a webhook URL applied to every instance.
    pub fn with_global_webhook(mut self, url: impl Into<String>) -> Self {
        self.global_webhooks.push(url.into());
        self
    }

    pub fn with_delivery(mut self, delivery: DeliveryConfig) -> Self {
        self.delivery = delivery;
        self
    }

    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Load configuration from process environment variables.
    ///
    /// Instances are numbered `INSTANCE_1_NAME` / `INSTANCE_1_WEBHOOKS` /
    /// `INSTANCE_1_EVENTS`, `INSTANCE_2_...` and so on; enumeration stops at
    /// the first gap. `GLOBAL_WEBHOOKS` is a comma-separated URL list.
    /// `RETRY_ATTEMPTS`, `RETRY_DELAY` and `TIMEOUT` (both in milliseconds)
    /// override the delivery defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::from_vars(&vars)
    }

    /// Load configuration from an explicit variable map. See [`Self::from_env`].
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut instances = Vec::new();
        let mut number = 1u32;

        loop {
            let name = vars.get(&format!("INSTANCE_{}_NAME", number));
            let webhooks = vars.get(&format!("INSTANCE_{}_WEBHOOKS", number));

            let (Some(name), Some(webhooks)) = (name, webhooks) else {
                break;
            };

            let events: HashSet<EventType> = vars
                .get(&format!("INSTANCE_{}_EVENTS", number))
                .map(|raw| split_list(raw).map(EventType::new).collect())
                .unwrap_or_default();

            instances.push(InstanceConfig {
                number,
                name: name.trim().to_string(),
                webhooks: split_list(webhooks).collect(),
                events,
            });

            number += 1;
        }

        let global_webhooks = vars
            .get("GLOBAL_WEBHOOKS")
            .map(|raw| split_list(raw).collect())
            .unwrap_or_default();

        let delivery = DeliveryConfig {
            retry_attempts: parse_var(vars, "RETRY_ATTEMPTS", 3)?,
            retry_delay: Duration::from_millis(parse_var(vars, "RETRY_DELAY", 1_000)?),
            timeout: Duration::from_millis(parse_var(vars, "TIMEOUT", 10_000)?),
        };

        let config = Self {
            instances,
            global_webhooks,
            delivery,
            reconnect: ReconnectPolicy::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the core assumes: at least one instance, unique
    /// names, and at least one effective webhook per instance.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.instances.is_empty() {
            return Err(ConfigError::NoInstances);
        }

        let mut seen = HashSet::new();
        for instance in &self.instances {
            if !seen.insert(instance.name.as_str()) {
                return Err(ConfigError::DuplicateInstance {
                    instance: instance.name.clone(),
                });
            }
            if instance.webhooks.is_empty() && self.global_webhooks.is_empty() {
                return Err(ConfigError::NoWebhooks {
                    instance: instance.name.clone(),
                });
            }
        }

        Ok(())
    }

    /// The full destination list for one instance: its own webhooks first,
    /// then the global ones. Duplicates are kept; a URL present in both
    /// lists receives each event twice.
    pub fn effective_webhooks(&self, instance: &InstanceConfig) -> Vec<String> {
        instance
            .webhooks
            .iter()
            .chain(self.global_webhooks.iter())
            .cloned()
            .collect()
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = String> + '_ {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_var<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidNumber {
            key: key.to_string(),
            value: raw.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn parses_numbered_instances() {
        let config = RelayConfig::from_vars(&vars(&[
            ("INSTANCE_1_NAME", "main"),
            ("INSTANCE_1_WEBHOOKS", "http://a.example.com, http://b.example.com"),
            ("INSTANCE_1_EVENTS", "messages.upsert,qrcode.updated"),
            ("INSTANCE_2_NAME", "backup"),
            ("INSTANCE_2_WEBHOOKS", "http://c.example.com"),
        ]))
        .unwrap();

        assert_eq!(config.instances.len(), 2);
        assert_eq!(config.instances[0].name, "main");
        assert_eq!(config.instances[0].webhooks.len(), 2);
        assert_eq!(config.instances[0].events.len(), 2);
        assert_eq!(config.instances[1].number, 2);
        assert!(config.instances[1].events.is_empty());
    }

    #[test]
    fn stops_at_first_gap() {
        let config = RelayConfig::from_vars(&vars(&[
            ("INSTANCE_1_NAME", "main"),
            ("INSTANCE_1_WEBHOOKS", "http://a.example.com"),
            ("INSTANCE_3_NAME", "orphan"),
            ("INSTANCE_3_WEBHOOKS", "http://c.example.com"),
        ]))
        .unwrap();

        assert_eq!(config.instances.len(), 1);
    }

    #[test]
    fn delivery_overrides_are_parsed() {
        let config = RelayConfig::from_vars(&vars(&[
            ("INSTANCE_1_NAME", "main"),
            ("INSTANCE_1_WEBHOOKS", "http://a.example.com"),
            ("RETRY_ATTEMPTS", "5"),
            ("RETRY_DELAY", "250"),
            ("TIMEOUT", "2000"),
        ]))
        .unwrap();

        assert_eq!(config.delivery.retry_attempts, 5);
        assert_eq!(config.delivery.retry_delay, Duration::from_millis(250));
        assert_eq!(config.delivery.timeout, Duration::from_millis(2_000));
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = RelayConfig::from_vars(&vars(&[
            ("INSTANCE_1_NAME", "main"),
            ("INSTANCE_1_WEBHOOKS", "http://a.example.com"),
            ("RETRY_ATTEMPTS", "many"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::InvalidNumber { .. }));
    }

    #[test]
    fn rejects_empty_configuration() {
        let err = RelayConfig::from_vars(&vars(&[])).unwrap_err();
        assert_eq!(err, ConfigError::NoInstances);
    }

    #[test]
    fn rejects_instance_without_any_webhook() {
        let err = RelayConfig::from_vars(&vars(&[
            ("INSTANCE_1_NAME", "main"),
            ("INSTANCE_1_WEBHOOKS", " , "),
        ]))
        .unwrap_err();

        assert_eq!(
            err,
            ConfigError::NoWebhooks {
                instance: "main".to_string()
            }
        );
    }

    #[test]
    fn global_webhooks_satisfy_validation() {
        let config = RelayConfig::from_vars(&vars(&[
            ("INSTANCE_1_NAME", "main"),
            ("INSTANCE_1_WEBHOOKS", " , "),
            ("GLOBAL_WEBHOOKS", "http://g.example.com"),
        ]))
        .unwrap();

        let effective = config.effective_webhooks(&config.instances[0]);
        assert_eq!(effective, vec!["http://g.example.com"]);
    }

    #[test]
    fn rejects_duplicate_names() {
        let err = RelayConfig::from_vars(&vars(&[
            ("INSTANCE_1_NAME", "main"),
            ("INSTANCE_1_WEBHOOKS", "http://a.example.com"),
            ("INSTANCE_2_NAME", "main"),
            ("INSTANCE_2_WEBHOOKS", "http://b.example.com"),
        ]))
        .unwrap_err();

        assert!(matches!(err, ConfigError::DuplicateInstance { .. }));
    }

    #[test]
    fn effective_webhooks_keep_duplicates_and_order() {
        let instance = InstanceConfig::new(1, "main")
            .with_webhook("http://shared.example.com")
            .with_webhook("http://own.example.com");
        let config =
            RelayConfig::new(vec![instance.clone()]).with_global_webhook("http://shared.example.com");

        assert_eq!(
            config.effective_webhooks(&instance),
            vec![
                "http://shared.example.com",
                "http://own.example.com",
                "http://shared.example.com",
            ]
        );
    }
}
