//! crabcall: local media and signaling coordination for group-call entry
//!
//! This crate decides when the local camera and microphone are live, derives
//! the capture request from user toggles and the display surface's shape, and
//! drives the room-join handshake that announces the participant and
//! discovers the peers already in the room.
//!
//! # Features
//! - Mic/camera toggles with aspect-ratio-aware capture requests
//! - At most one live capture stream, with stale requests superseded
//! - Join handshake gated on a ready stream and an acknowledged transport
//! - Authoritative peer roster that never lists the local participant
//! - Optional automatic rejoin after transport loss
//!
//! # Usage
//! ```rust,ignore
//! use crabcall::{Coordinator, LocalIdentity, RoomCode};
//!
//! let mut coordinator = Coordinator::builder(provider, transport)
//!     .identity(LocalIdentity::new("peer-1")?)
//!     .room_code(RoomCode::new("abc-defg-hij")?)
//!     .build()?;
//!
//! coordinator.report_surface_size(1280.0, 720.0)?;
//! coordinator.toggle_mic()?;
//! coordinator.request_join().await?;
//!
//! let (handle, _task) = coordinator.spawn();
//! handle.wait_for(|s| s.session_state == SessionState::Joined).await?;
//! ```
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod invariant_ppt;
pub mod media;
pub mod signaling;

// Testing utilities - synthetic collaborators for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::CoordinatorConfig;
pub use coordinator::{
    Coordinator, CoordinatorBuilder, CoordinatorHandle, CoordinatorSnapshot, UserCommand,
};
pub use errors::{
    CaptureError, ConfigError, CoordinatorError, ProtocolError, SignalingError, TransportError,
};
pub use media::{
    AspectChange, AspectRatioTracker, CaptureConfig, CaptureConfigBuilder, CaptureIntent,
    CaptureLifecycleManager, CaptureProvider, CaptureStream, MediaConstraints, TrackKind,
};
pub use signaling::{
    LocalIdentity, PeerId, RoomCode, SessionState, SignalingSession, SignalingTransport,
    TransportSink,
};

/// Initialize logging for the coordinator
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "crabcall=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
}
