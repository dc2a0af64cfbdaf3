//! Local capture: intent, surface shape, capture requests and stream ownership

pub mod aspect;
pub mod constraints;
pub mod lifecycle;
pub mod provider;
pub mod types;

pub use aspect::{AspectChange, AspectRatioTracker};
pub use constraints::{round_ratio, CaptureConfigBuilder, ASPECT_RATIO_PRECISION};
pub use lifecycle::{CaptureLifecycleManager, CaptureRequest, ReconcileOutcome, ReconcileStep};
pub use provider::CaptureProvider;
pub use types::{
    AspectRatioSpec, CaptureConfig, CaptureIntent, CaptureStream, MediaConstraints, MediaTrack,
    SurfaceGeometry, TrackKind, VideoSpec,
};
