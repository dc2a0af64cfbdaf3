//! Testing utilities for crabcall
//!
//! In-memory stand-ins for the capture device and the signaling server, so
//! the whole join pipeline can run offline and deterministically.

pub mod capture;
pub mod loopback;

pub use capture::SyntheticCaptureProvider;
pub use loopback::{EmittedMessage, LoopbackTransport};
