//! In-process signaling server
//!
//! Records everything the coordinator sends and lets a test play the server
//! side: acknowledge or refuse a connect, push inbound events, drop the line.
//! With a room configured it answers `join-room` with a roster the way a
//! real server would.

use crate::config::EventNames;
use crate::errors::TransportError;
use crate::signaling::{PeerId, SignalingTransport, TransportEvent, TransportSink};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One outbound `emit` as seen on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedMessage {
    pub event: String,
    pub args: Vec<Value>,
}

#[derive(Debug, Default)]
struct LoopbackState {
    sink: Option<TransportSink>,
    refusals: VecDeque<String>,
    connects: usize,
    disconnects: usize,
    emitted: Vec<EmittedMessage>,
}

#[derive(Debug)]
pub struct LoopbackTransport {
    auto_ack: bool,
    room: Option<Vec<PeerId>>,
    events: EventNames,
    state: Mutex<LoopbackState>,
}

impl Default for LoopbackTransport {
    fn default() -> Self {
        Self {
            auto_ack: false,
            room: None,
            events: EventNames::default(),
            state: Mutex::new(LoopbackState::default()),
        }
    }
}

impl LoopbackTransport {
    /// A transport that only acknowledges when told to.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acknowledge every connect as soon as it is issued.
    pub fn with_auto_ack(mut self) -> Self {
        self.auto_ack = true;
        self
    }

    /// Answer each `join-room` with a roster of `peers` plus the joiner.
    pub fn with_room<I, P>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<PeerId>,
    {
        self.room = Some(peers.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_event_names(mut self, events: EventNames) -> Self {
        self.events = events;
        self
    }

    /// Make the next `connect` call return an error immediately.
    pub fn refuse_next_connect(&self, reason: impl Into<String>) {
        self.lock().refusals.push_back(reason.into());
    }

    pub fn is_connected(&self) -> bool {
        self.lock().sink.is_some()
    }

    /// Attempt number of the open connection, if any
    pub fn current_attempt(&self) -> Option<u64> {
        self.lock().sink.as_ref().map(TransportSink::attempt)
    }

    /// Deliver the connection acknowledgment for the open attempt.
    pub fn acknowledge(&self) -> bool {
        self.with_sink(|sink| sink.connected())
    }

    /// Report that the pending connect never came up.
    pub fn fail_connect(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let sent = self.with_sink(|sink| sink.send(TransportEvent::ConnectFailed(reason)));
        self.lock().sink = None;
        sent
    }

    /// Server-side hangup.
    pub fn drop_connection(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        let sent = self.with_sink(|sink| sink.disconnected(reason));
        self.lock().sink = None;
        sent
    }

    /// Push an inbound event for the open attempt.
    pub fn deliver(&self, event: impl Into<String>, payload: Value) -> bool {
        let event = event.into();
        self.with_sink(|sink| sink.message(event, payload))
    }

    pub fn connect_count(&self) -> usize {
        self.lock().connects
    }

    pub fn disconnect_count(&self) -> usize {
        self.lock().disconnects
    }

    pub fn emitted(&self) -> Vec<EmittedMessage> {
        self.lock().emitted.clone()
    }

    pub fn emitted_named(&self, event: &str) -> Vec<EmittedMessage> {
        self.lock()
            .emitted
            .iter()
            .filter(|message| message.event == event)
            .cloned()
            .collect()
    }

    fn with_sink<F>(&self, send: F) -> bool
    where
        F: FnOnce(&TransportSink) -> bool,
    {
        let sink = self.lock().sink.clone();
        match sink {
            Some(sink) => send(&sink),
            None => false,
        }
    }

    fn answer_join(&self, sink: &TransportSink, args: &[Value]) {
        let Some(peers) = &self.room else {
            return;
        };
        let mut roster: Vec<Value> = peers
            .iter()
            .map(|peer| Value::String(peer.as_str().to_string()))
            .collect();
        if let Some(joiner) = args.get(1) {
            roster.push(joiner.clone());
        }
        sink.message(self.events.roster.clone(), Value::Array(roster));
    }

    fn lock(&self) -> MutexGuard<'_, LoopbackState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl SignalingTransport for LoopbackTransport {
    async fn connect(&self, sink: TransportSink) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.connects += 1;
        if let Some(reason) = state.refusals.pop_front() {
            log::debug!("Loopback refusing connect: {}", reason);
            return Err(TransportError::ConnectFailed(reason));
        }
        if self.auto_ack {
            sink.connected();
        }
        state.sink = Some(sink);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        let mut state = self.lock();
        state.disconnects += 1;
        state.sink = None;
        Ok(())
    }

    async fn emit(&self, event: &str, args: Vec<Value>) -> Result<(), TransportError> {
        let sink = {
            let mut state = self.lock();
            let Some(sink) = state.sink.clone() else {
                return Err(TransportError::EmitFailed(format!(
                    "'{}' emitted while not connected",
                    event
                )));
            };
            state.emitted.push(EmittedMessage {
                event: event.to_string(),
                args: args.clone(),
            });
            sink
        };
        if event == self.events.join_room {
            self.answer_join(&sink, &args);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signaling::TransportDelivery;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_records_emits_and_answers_join() {
        let transport = LoopbackTransport::new().with_auto_ack().with_room(["a", "b"]);
        let (tx, mut rx) = mpsc::unbounded_channel::<TransportDelivery>();

        transport.connect(TransportSink::new(1, tx)).await.unwrap();
        assert_eq!(rx.recv().await.unwrap().event, TransportEvent::Connected);

        transport
            .emit("join-room", vec![json!("room"), json!("me")])
            .await
            .unwrap();
        let roster = rx.recv().await.unwrap();
        assert_eq!(roster.attempt, 1);
        assert_eq!(
            roster.event,
            TransportEvent::Message {
                event: "roster".to_string(),
                payload: json!(["a", "b", "me"]),
            }
        );
        assert_eq!(transport.emitted_named("join-room").len(), 1);
    }

    #[tokio::test]
    async fn test_emit_without_connection_fails() {
        let transport = LoopbackTransport::new();
        let result = transport.emit("join-room", Vec::new()).await;
        assert!(matches!(result, Err(TransportError::EmitFailed(_))));
        assert!(transport.emitted().is_empty());
    }

    #[tokio::test]
    async fn test_refused_connect_and_hangup() {
        let transport = LoopbackTransport::new();
        let (tx, mut rx) = mpsc::unbounded_channel();

        transport.refuse_next_connect("server down");
        assert!(transport
            .connect(TransportSink::new(1, tx.clone()))
            .await
            .is_err());
        assert!(!transport.is_connected());

        transport.connect(TransportSink::new(2, tx)).await.unwrap();
        assert_eq!(transport.current_attempt(), Some(2));
        assert!(transport.drop_connection("bye"));
        assert!(!transport.is_connected());
        assert!(!transport.acknowledge());
        assert_eq!(
            rx.recv().await.unwrap().event,
            TransportEvent::Disconnected("bye".to_string())
        );
        assert_eq!(transport.connect_count(), 2);
    }
}
