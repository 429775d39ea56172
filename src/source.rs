use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use crate::error::ConnectError;
use crate::types::EventType;

/// An upstream real-time event source for one instance.
///
/// Implementors own the wire protocol; the relay core only consumes the
/// connect/disconnect lifecycle and a stream of already-decoded events.
/// `connect` is called again, after backoff, every time the previous
/// connection fails or is lost.
#[async_trait]
pub trait EventSource: Send + Sync {
    async fn connect(&self) -> Result<Box<dyn EventStream>, ConnectError>;
}

/// One established upstream connection.
///
/// Events must be yielded in receipt order as seen on the wire.
#[async_trait]
pub trait EventStream: Send {
    /// The next decoded `(type, payload)` pair, or `None` once the
    /// connection is lost.
    async fn next_event(&mut self) -> Option<(EventType, serde_json::Value)>;
}

/// Channel-backed source for embedding and testing.
///
/// Events pushed through the paired sender are yielded by the stream in
/// order. The connection can be established once; after the sender is
/// dropped the stream reports loss and further connects fail.
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::Receiver<(EventType, serde_json::Value)>>>,
}

impl ChannelSource {
    pub fn new(buffer: usize) -> (Self, mpsc::Sender<(EventType, serde_json::Value)>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let source = Self {
            receiver: Mutex::new(Some(rx)),
        };
        (source, tx)
    }
}

#[async_trait]
impl EventSource for ChannelSource {
    async fn connect(&self) -> Result<Box<dyn EventStream>, ConnectError> {
        let mut guard = self.receiver.lock().await;
        match guard.take() {
            Some(rx) => Ok(Box::new(ChannelStream { rx })),
            None => Err(ConnectError::Unreachable(
                "channel source already consumed".to_string(),
            )),
        }
    }
}

struct ChannelStream {
    rx: mpsc::Receiver<(EventType, serde_json::Value)>,
}

#[async_trait]
impl EventStream for ChannelStream {
    async fn next_event(&mut self) -> Option<(EventType, serde_json::Value)> {
        self.rx.recv().await
    }
}
