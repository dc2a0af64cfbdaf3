use crate::errors::TransportError;
use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

/// Something the transport observed on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// Connection established and acknowledged
    Connected,
    ConnectFailed(String),
    Disconnected(String),
    /// Named inbound event with its first argument
    Message { event: String, payload: Value },
}

/// A transport event tagged with the connection attempt it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportDelivery {
    pub attempt: u64,
    pub event: TransportEvent,
}

/// Where a transport delivers events for one connection attempt.
///
/// Events from an attempt the coordinator has moved past are dropped on
/// arrival, so a transport never needs to cancel its own callbacks.
#[derive(Debug, Clone)]
pub struct TransportSink {
    attempt: u64,
    tx: mpsc::UnboundedSender<TransportDelivery>,
}

impl TransportSink {
    pub fn new(attempt: u64, tx: mpsc::UnboundedSender<TransportDelivery>) -> Self {
        Self { attempt, tx }
    }

    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Deliver an event. Returns `false` once the receiving side is gone.
    pub fn send(&self, event: TransportEvent) -> bool {
        self.tx
            .send(TransportDelivery {
                attempt: self.attempt,
                event,
            })
            .is_ok()
    }

    pub fn connected(&self) -> bool {
        self.send(TransportEvent::Connected)
    }

    pub fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.send(TransportEvent::Disconnected(reason.into()))
    }

    pub fn message(&self, event: impl Into<String>, payload: Value) -> bool {
        self.send(TransportEvent::Message {
            event: event.into(),
            payload,
        })
    }
}

/// Persistent bidirectional signaling channel.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Start connecting. The acknowledgment (or failure) arrives later through `sink`,
    /// as do all inbound messages for this attempt.
    async fn connect(&self, sink: TransportSink) -> Result<(), TransportError>;

    async fn disconnect(&self) -> Result<(), TransportError>;

    async fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), TransportError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_tags_attempt() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = TransportSink::new(7, tx);
        assert!(sink.connected());
        assert!(sink.message("roster", serde_json::json!([])));

        let first = rx.try_recv().unwrap();
        assert_eq!(first.attempt, 7);
        assert_eq!(first.event, TransportEvent::Connected);
        assert!(matches!(
            rx.try_recv().unwrap().event,
            TransportEvent::Message { .. }
        ));

        drop(rx);
        assert!(!sink.disconnected("gone"));
    }
}
