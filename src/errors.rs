use thiserror::Error;

/// Failure reported by the capture provider when a stream request cannot be satisfied.
#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum CaptureError {
    #[error("Capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("No capture device available: {0}")]
    NoDevice(String),
    #[error("Capture constraints unsatisfiable: {0}")]
    ConstraintsUnsatisfiable(String),
}

impl CaptureError {
    /// Provider-supplied reason text
    pub fn reason(&self) -> &str {
        match self {
            CaptureError::PermissionDenied(reason)
            | CaptureError::NoDevice(reason)
            | CaptureError::ConstraintsUnsatisfiable(reason) => reason,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum TransportError {
    #[error("Transport connect failed: {0}")]
    ConnectFailed(String),
    #[error("Transport disconnected: {0}")]
    Disconnected(String),
    #[error("Transport emit failed: {0}")]
    EmitFailed(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error, serde::Serialize, serde::Deserialize)]
pub enum ProtocolError {
    #[error("Malformed roster payload: {0}")]
    MalformedRosterPayload(String),
    #[error("Malformed peer id in '{event}': {detail}")]
    MalformedPeerId { event: String, detail: String },
    #[error("Unknown signaling event: {0}")]
    UnknownEvent(String),
}

/// Misuse of the signaling contract by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SignalingError {
    #[error("Local identity must be assigned before joining")]
    MissingIdentity,
    #[error("Room code must be supplied before joining")]
    MissingRoomCode,
    #[error("Operation '{operation}' is not valid in state {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error(transparent)]
    Capture(#[from] CaptureError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    #[error(transparent)]
    Signaling(#[from] SignalingError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("Coordinator requires a running tokio runtime")]
    NoRuntime,
    #[error("Coordinator has shut down")]
    Closed,
}
