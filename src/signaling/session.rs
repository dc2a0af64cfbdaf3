//! Room-join handshake state machine
//!
//! The session never touches the transport itself. Every handler returns the
//! [`SessionAction`]s the owner must perform, in order. This keeps the
//! ordering contract (no join before a stream exists and the transport has
//! acknowledged) checkable without any I/O.

use crate::assert_invariant;
use crate::errors::{ProtocolError, SignalingError};
use crate::invariant_ppt::{
    JOIN_REQUIRES_STREAM_AND_TRANSPORT, ROSTER_EXCLUDES_LOCAL, SINGLE_JOIN_PER_ATTEMPT,
};
use crate::signaling::identity::{LocalIdentity, PeerId, RoomCode};
use crate::signaling::protocol::OutboundMessage;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    AwaitingStream,
    Connecting,
    Joined,
    Left,
    Disconnected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::AwaitingStream => "AwaitingStream",
            SessionState::Connecting => "Connecting",
            SessionState::Joined => "Joined",
            SessionState::Left => "Left",
            SessionState::Disconnected => "Disconnected",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a new transport connection for this attempt
    Connect { attempt: u64 },
    Emit(OutboundMessage),
    Disconnect,
}

#[derive(Debug)]
pub struct SignalingSession {
    identity: LocalIdentity,
    room_code: RoomCode,
    state: SessionState,
    join_requested: bool,
    stream_ready: bool,
    transport_acked: bool,
    join_emitted: bool,
    attempt: u64,
    roster: BTreeSet<PeerId>,
    last_announced: Option<PeerId>,
}

impl SignalingSession {
    pub fn new(identity: LocalIdentity, room_code: RoomCode) -> Self {
        Self {
            identity,
            room_code,
            state: SessionState::Idle,
            join_requested: false,
            stream_ready: false,
            transport_acked: false,
            join_emitted: false,
            attempt: 0,
            roster: BTreeSet::new(),
            last_announced: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn identity(&self) -> &LocalIdentity {
        &self.identity
    }

    pub fn room_code(&self) -> &RoomCode {
        &self.room_code
    }

    pub fn roster(&self) -> &BTreeSet<PeerId> {
        &self.roster
    }

    pub fn join_requested(&self) -> bool {
        self.join_requested
    }

    /// Current connection attempt; 0 before the first connect.
    pub fn attempt(&self) -> u64 {
        self.attempt
    }

    /// Most recent peer the server announced via `joined-room`
    pub fn last_announced_peer(&self) -> Option<&PeerId> {
        self.last_announced.as_ref()
    }

    pub fn request_join(&mut self) -> Vec<SessionAction> {
        self.join_requested = true;
        match self.state {
            SessionState::Connecting | SessionState::Joined => Vec::new(),
            SessionState::Idle
            | SessionState::AwaitingStream
            | SessionState::Left
            | SessionState::Disconnected => {
                if self.stream_ready {
                    self.start_attempt()
                } else {
                    self.transition(SessionState::AwaitingStream);
                    Vec::new()
                }
            }
        }
    }

    /// Drop the join intent. Before a connection exists this just returns to
    /// `Idle`; afterwards it is the same as [`SignalingSession::leave`].
    pub fn withdraw_join(&mut self) -> Vec<SessionAction> {
        self.join_requested = false;
        match self.state {
            SessionState::AwaitingStream => {
                self.transition(SessionState::Idle);
                Vec::new()
            }
            SessionState::Connecting | SessionState::Joined => self.close_connection(),
            _ => Vec::new(),
        }
    }

    pub fn leave(&mut self) -> Result<Vec<SessionAction>, SignalingError> {
        match self.state {
            SessionState::Connecting | SessionState::Joined => {
                self.join_requested = false;
                Ok(self.close_connection())
            }
            state => Err(SignalingError::InvalidState {
                operation: "leave",
                state: state.to_string(),
            }),
        }
    }

    /// A capture stream was installed.
    pub fn on_stream_ready(&mut self) -> Vec<SessionAction> {
        self.stream_ready = true;
        match self.state {
            SessionState::AwaitingStream if self.join_requested => self.start_attempt(),
            SessionState::Connecting if self.transport_acked => self.emit_join(),
            SessionState::Joined => {
                log::debug!("Announcing replaced stream to room {}", self.room_code);
                vec![SessionAction::Emit(OutboundMessage::UpdateStream {
                    room_code: self.room_code.clone(),
                    identity: self.identity.clone(),
                })]
            }
            _ => Vec::new(),
        }
    }

    /// The capture stream was released and nothing replaced it.
    pub fn on_stream_lost(&mut self) {
        self.stream_ready = false;
    }

    pub fn on_transport_connected(&mut self) -> Vec<SessionAction> {
        if self.state != SessionState::Connecting {
            log::debug!("Ignoring transport acknowledgment in state {}", self.state);
            return Vec::new();
        }
        if self.transport_acked {
            return Vec::new();
        }
        self.transport_acked = true;

        if self.stream_ready {
            self.emit_join()
        } else {
            log::info!("Transport connected, holding join until a capture stream exists");
            Vec::new()
        }
    }

    /// Replace the roster with the server's snapshot.
    ///
    /// A snapshot that lists nobody but the local participant is rejected and
    /// the previous roster is kept.
    pub fn on_roster_received(&mut self, peers: Vec<PeerId>) -> Result<(), ProtocolError> {
        if self.state != SessionState::Joined {
            log::debug!("Ignoring roster in state {}", self.state);
            return Ok(());
        }
        if !peers.is_empty() && peers.iter().all(|peer| self.identity.matches(peer)) {
            return Err(ProtocolError::MalformedRosterPayload(
                "roster lists only the local participant".to_string(),
            ));
        }

        self.roster = peers
            .into_iter()
            .filter(|peer| !self.identity.matches(peer))
            .collect();
        assert_invariant!(
            !self.roster.contains(self.identity.peer_id()),
            ROSTER_EXCLUDES_LOCAL,
            "SignalingSession::on_roster_received"
        );
        log::info!("Roster updated: {} peer(s)", self.roster.len());
        Ok(())
    }

    pub fn on_peer_joined(&mut self, peer: PeerId) {
        if matches!(self.state, SessionState::Connecting | SessionState::Joined) {
            log::info!("Peer {} joined room {}", peer, self.room_code);
            self.last_announced = Some(peer);
        }
    }

    /// Remove a departed peer. Unknown ids are ignored; returns whether one was removed.
    pub fn on_peer_disconnected(&mut self, peer: &PeerId) -> bool {
        let removed = self.roster.remove(peer);
        if removed {
            log::info!("Peer {} left room {}", peer, self.room_code);
        } else {
            log::debug!("Departure of unknown peer {} ignored", peer);
        }
        removed
    }

    /// The connection dropped or never came up. Returns `false` if there was
    /// no live attempt to end.
    pub fn on_transport_disconnected(&mut self) -> bool {
        if !matches!(self.state, SessionState::Connecting | SessionState::Joined) {
            return false;
        }
        self.transition(SessionState::Disconnected);
        self.reset_connection();
        true
    }

    fn start_attempt(&mut self) -> Vec<SessionAction> {
        self.attempt += 1;
        self.transport_acked = false;
        self.join_emitted = false;
        self.transition(SessionState::Connecting);
        vec![SessionAction::Connect {
            attempt: self.attempt,
        }]
    }

    fn emit_join(&mut self) -> Vec<SessionAction> {
        assert_invariant!(
            self.stream_ready && self.transport_acked,
            JOIN_REQUIRES_STREAM_AND_TRANSPORT,
            "SignalingSession::emit_join"
        );
        assert_invariant!(
            !self.join_emitted,
            SINGLE_JOIN_PER_ATTEMPT,
            "SignalingSession::emit_join"
        );
        self.join_emitted = true;
        self.transition(SessionState::Joined);
        vec![SessionAction::Emit(OutboundMessage::JoinRoom {
            room_code: self.room_code.clone(),
            identity: self.identity.clone(),
        })]
    }

    fn close_connection(&mut self) -> Vec<SessionAction> {
        self.transition(SessionState::Left);
        self.reset_connection();
        vec![SessionAction::Disconnect]
    }

    fn reset_connection(&mut self) {
        self.transport_acked = false;
        self.join_emitted = false;
        self.roster.clear();
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            log::info!("Signaling session {} -> {}", self.state, next);
            self.state = next;
        }
    }
}
