use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use event_relay::{ChannelSource, EventType, InstanceConfig, InstanceRegistry, RelayConfig};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = RelayConfig::new(vec![])
        .with_global_webhook("http://localhost:9000/audit");

    let (source, tx) = ChannelSource::new(32);
    let instance = InstanceConfig::new(1, "main")
        .with_webhook("http://localhost:9000/hook")
        .with_event_filter(["messages.upsert"]);

    let mut registry = InstanceRegistry::new(config);
    registry.add_instance(instance, Arc::new(source)).await;

    tx.send((
        EventType::new("messages.upsert"),
        json!({"key": {"remoteJid": "555@c.us"}, "message": {"text": "hello"}}),
    ))
    .await
    .unwrap();
    tx.send((EventType::new("qrcode.updated"), json!({"qr": "..."})))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;

    let global = registry.global_stats().await;
    println!(
        "instances={} events={} ok={} failed={} rate={}",
        global.total_instances,
        global.total_events,
        global.successful_forwards,
        global.failed_forwards,
        global.success_rate
    );

    registry.disconnect_all().await;
}
