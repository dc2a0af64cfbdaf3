//! Room signaling: identities, wire messages, transport contract and the join handshake

pub mod identity;
pub mod protocol;
pub mod session;
pub mod transport;

pub use identity::{LocalIdentity, PeerId, RoomCode};
pub use protocol::{InboundMessage, OutboundMessage};
pub use session::{SessionAction, SessionState, SignalingSession};
pub use transport::{SignalingTransport, TransportDelivery, TransportEvent, TransportSink};
