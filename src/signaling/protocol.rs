//! Signaling wire messages
//!
//! Messages travel as a named event plus positional JSON arguments, the way
//! socket-style channels carry them. Event names come from [`EventNames`].

use crate::config::EventNames;
use crate::errors::ProtocolError;
use crate::signaling::identity::{LocalIdentity, PeerId, RoomCode};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundMessage {
    /// Announce the local participant to a room
    JoinRoom {
        room_code: RoomCode,
        identity: LocalIdentity,
    },
    /// Tell the room the local participant replaced its capture stream
    UpdateStream {
        room_code: RoomCode,
        identity: LocalIdentity,
    },
}

impl OutboundMessage {
    pub fn event_name<'a>(&self, names: &'a EventNames) -> &'a str {
        match self {
            OutboundMessage::JoinRoom { .. } => &names.join_room,
            OutboundMessage::UpdateStream { .. } => &names.update_stream,
        }
    }

    /// Positional arguments, `[roomCode, localIdentity]` for both messages.
    pub fn args(&self) -> Vec<Value> {
        match self {
            OutboundMessage::JoinRoom {
                room_code,
                identity,
            }
            | OutboundMessage::UpdateStream {
                room_code,
                identity,
            } => vec![
                Value::String(room_code.as_str().to_string()),
                Value::String(identity.as_str().to_string()),
            ],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// The server announced a participant entering the room
    JoinedRoom(PeerId),
    /// Authoritative snapshot of everyone in the room
    Roster(Vec<PeerId>),
    PeerLeft(PeerId),
}

impl InboundMessage {
    /// Decode a named event. `payload` is the event's first argument.
    pub fn parse(names: &EventNames, event: &str, payload: &Value) -> Result<Self, ProtocolError> {
        if event == names.joined_room {
            parse_peer_id(event, payload).map(InboundMessage::JoinedRoom)
        } else if event == names.peer_left {
            parse_peer_id(event, payload).map(InboundMessage::PeerLeft)
        } else if event == names.roster {
            parse_roster(payload).map(InboundMessage::Roster)
        } else {
            Err(ProtocolError::UnknownEvent(event.to_string()))
        }
    }
}

fn parse_peer_id(event: &str, payload: &Value) -> Result<PeerId, ProtocolError> {
    match payload {
        Value::String(id) if !id.is_empty() => Ok(PeerId::new(id.clone())),
        other => Err(ProtocolError::MalformedPeerId {
            event: event.to_string(),
            detail: format!("expected a non-empty string, got {}", other),
        }),
    }
}

fn parse_roster(payload: &Value) -> Result<Vec<PeerId>, ProtocolError> {
    let entries = payload.as_array().ok_or_else(|| {
        ProtocolError::MalformedRosterPayload(format!("expected a list, got {}", payload))
    })?;

    entries
        .iter()
        .map(|entry| match entry {
            Value::String(id) if !id.is_empty() => Ok(PeerId::new(id.clone())),
            other => Err(ProtocolError::MalformedRosterPayload(format!(
                "roster entry {} is not a peer id",
                other
            ))),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_outbound_join_args() {
        let names = EventNames::default();
        let message = OutboundMessage::JoinRoom {
            room_code: RoomCode::new("abc-defg-hij").unwrap(),
            identity: LocalIdentity::new("me").unwrap(),
        };
        assert_eq!(message.event_name(&names), "join-room");
        assert_eq!(message.args(), vec![json!("abc-defg-hij"), json!("me")]);
    }

    #[test]
    fn test_parse_roster() {
        let names = EventNames::default();
        let parsed = InboundMessage::parse(&names, "roster", &json!(["a", "b"])).unwrap();
        assert_eq!(
            parsed,
            InboundMessage::Roster(vec![PeerId::from("a"), PeerId::from("b")])
        );
    }

    #[test]
    fn test_malformed_roster_payloads() {
        let names = EventNames::default();
        for payload in [json!("a"), json!({"peers": []}), json!(["a", 7]), json!([""])] {
            assert!(matches!(
                InboundMessage::parse(&names, "roster", &payload),
                Err(ProtocolError::MalformedRosterPayload(_))
            ));
        }
    }

    #[test]
    fn test_parse_peer_events() {
        let names = EventNames::default();
        assert_eq!(
            InboundMessage::parse(&names, "peer-left", &json!("x")).unwrap(),
            InboundMessage::PeerLeft(PeerId::from("x"))
        );
        assert_eq!(
            InboundMessage::parse(&names, "joined-room", &json!("y")).unwrap(),
            InboundMessage::JoinedRoom(PeerId::from("y"))
        );
        assert!(matches!(
            InboundMessage::parse(&names, "peer-left", &json!(null)),
            Err(ProtocolError::MalformedPeerId { .. })
        ));
        assert!(matches!(
            InboundMessage::parse(&names, "chat", &json!("hi")),
            Err(ProtocolError::UnknownEvent(_))
        ));
    }
}
