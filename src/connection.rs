use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::forwarder::Forwarder;
use crate::source::EventSource;
use crate::types::{ConnectionState, ConnectionStatus, Event, ReconnectPolicy};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

/// Supervisor for one instance's persistent upstream connection.
///
/// `connect()` spawns a background task that drives the
/// `Disconnected -> Connecting -> Connected` state machine: it establishes
/// the connection through the instance's `EventSource`, pumps decoded events
/// into the forwarder in receipt order, and on loss or failure re-enters
/// `Connecting` after a capped exponential backoff. Reconnection never gives
/// up on its own; only `disconnect()` stops it.
pub struct UpstreamConnection {
    name: String,
    source: Arc<dyn EventSource>,
    forwarder: Arc<Forwarder>,
    policy: ReconnectPolicy,
    shared: Arc<ConnShared>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct ConnShared {
    state: RwLock<ConnectionState>,
    connection_id: RwLock<Option<String>>,
    reconnect_attempts: AtomicU64,
    running: AtomicBool,
    notify: Notify,
}

impl ConnShared {
    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }
}

impl UpstreamConnection {
    pub fn new(
        name: impl Into<String>,
        source: Arc<dyn EventSource>,
        forwarder: Arc<Forwarder>,
        policy: ReconnectPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            source,
            forwarder,
            policy,
            shared: Arc::new(ConnShared {
                state: RwLock::new(ConnectionState::Disconnected),
                connection_id: RwLock::new(None),
                reconnect_attempts: AtomicU64::new(0),
                running: AtomicBool::new(false),
                notify: Notify::new(),
            }),
            task: Mutex::new(None),
        }
    }

    /// Begin connecting in the background. No-op while already running.
    pub async fn connect(&self) {
        let mut task = self.task.lock().await;
        if self.shared.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let handle = tokio::spawn(run_loop(
            self.name.clone(),
            self.source.clone(),
            self.forwarder.clone(),
            self.policy.clone(),
            self.shared.clone(),
        ));
        *task = Some(handle);
    }

    /// Tear the connection down and suppress further reconnection.
    ///
    /// Delivery sequences already dispatched for prior events are not
    /// aborted; they run to their terminal outcome. Terminal until
    /// `connect()` is called again.
    pub async fn disconnect(&self) {
        // Take the task lock first so connect/disconnect serialize.
        let mut task = self.task.lock().await;
        if !self.shared.running.swap(false, Ordering::SeqCst) {
            return;
        }

        // notify_one stores a permit, so the supervisor wakes even if it is
        // not currently parked on the Notify.
        self.shared.notify.notify_one();
        if let Some(handle) = task.take() {
            let _ = handle.await;
        }

        info!(instance = %self.name, "upstream disconnected");
    }

    pub async fn is_connected(&self) -> bool {
        *self.shared.state.read().await == ConnectionState::Connected
    }

    pub fn reconnect_attempts(&self) -> u64 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    pub async fn status(&self) -> ConnectionStatus {
        let state = *self.shared.state.read().await;
        ConnectionStatus {
            connected: state == ConnectionState::Connected,
            state,
            connection_id: self.shared.connection_id.read().await.clone(),
            reconnect_attempts: self.reconnect_attempts(),
        }
    }
}

async fn run_loop(
    name: String,
    source: Arc<dyn EventSource>,
    forwarder: Arc<Forwarder>,
    policy: ReconnectPolicy,
    shared: Arc<ConnShared>,
) {
    // Consecutive failed connects, for the backoff curve. Distinct from the
    // observability counter, which never resets.
    let mut consecutive_failures: u32 = 0;

    'supervisor: loop {
        if !shared.running.load(Ordering::SeqCst) {
            break;
        }
        shared.set_state(ConnectionState::Connecting).await;

        let connect_result = tokio::select! {
            _ = shared.notify.notified() => {
                // A permit can be left over from a previous disconnect;
                // only stop if this run is actually being torn down.
                if shared.running.load(Ordering::SeqCst) {
                    continue 'supervisor;
                }
                break 'supervisor;
            }
            result = source.connect() => result,
        };

        match connect_result {
            Ok(mut stream) => {
                consecutive_failures = 0;
                let connection_id = new_connection_id();
                *shared.connection_id.write().await = Some(connection_id.clone());
                shared.set_state(ConnectionState::Connected).await;
                metric_inc("relay.connection.established");
                info!(instance = %name, connection_id = %connection_id, "upstream connected");

                loop {
                    let next = tokio::select! {
                        _ = shared.notify.notified() => {
                            if shared.running.load(Ordering::SeqCst) {
                                continue;
                            }
                            break 'supervisor;
                        }
                        next = stream.next_event() => next,
                    };

                    match next {
                        Some((event_type, payload)) => {
                            forwarder
                                .ingest(Event::new(name.clone(), event_type, payload))
                                .await;
                        }
                        None => {
                            // Transition out of Connected immediately; the
                            // backoff below must not report a live connection.
                            shared.set_state(ConnectionState::Connecting).await;
                            shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                            consecutive_failures = 1;
                            metric_inc("relay.connection.lost");
                            warn!(
                                instance = %name,
                                connection_id = %connection_id,
                                "upstream connection lost"
                            );
                            break;
                        }
                    }
                }

                *shared.connection_id.write().await = None;
            }
            Err(err) => {
                shared.reconnect_attempts.fetch_add(1, Ordering::SeqCst);
                consecutive_failures = consecutive_failures.saturating_add(1);
                metric_inc("relay.connection.failed");
                warn!(
                    instance = %name,
                    error = %err,
                    consecutive_failures,
                    "upstream connect failed"
                );
            }
        }

        if !shared.running.load(Ordering::SeqCst) {
            break;
        }

        let delay =
            reconnect_delay(&policy, consecutive_failures.max(1)) + jitter_delay(policy.jitter_ms);
        debug!(instance = %name, delay_ms = delay.as_millis() as u64, "reconnect scheduled");
        tokio::select! {
            _ = shared.notify.notified() => {
                if !shared.running.load(Ordering::SeqCst) {
                    break;
                }
            }
            _ = sleep(delay) => {}
        }
    }

    *shared.connection_id.write().await = None;
    shared.set_state(ConnectionState::Disconnected).await;
    debug!(instance = %name, "connection supervisor stopped");
}

/// Exponential backoff with cap, before jitter.
fn reconnect_delay(policy: &ReconnectPolicy, attempt: u32) -> Duration {
    let base = policy.base_ms.max(1);
    let max = policy.max_ms.max(base);
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1));
    let exp = base.saturating_mul(pow);
    Duration::from_millis(exp.min(max))
}

fn jitter_delay(jitter_ms: u64) -> Duration {
    if jitter_ms == 0 {
        return Duration::from_millis(0);
    }
    Duration::from_millis(fastrand::u64(0..=jitter_ms))
}

fn new_connection_id() -> String {
    format!("{:016x}", fastrand::u64(..))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_up_to_cap() {
        let policy = ReconnectPolicy {
            base_ms: 500,
            max_ms: 30_000,
            jitter_ms: 0,
        };

        assert_eq!(reconnect_delay(&policy, 1), Duration::from_millis(500));
        assert_eq!(reconnect_delay(&policy, 2), Duration::from_millis(1_000));
        assert_eq!(reconnect_delay(&policy, 3), Duration::from_millis(2_000));
        assert_eq!(reconnect_delay(&policy, 7), Duration::from_millis(30_000));
        assert_eq!(reconnect_delay(&policy, 64), Duration::from_millis(30_000));
    }

    #[test]
    fn jitter_stays_within_bound() {
        for _ in 0..100 {
            assert!(jitter_delay(250) <= Duration::from_millis(250));
        }
        assert_eq!(jitter_delay(0), Duration::from_millis(0));
    }
}
