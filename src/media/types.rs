use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use uuid::Uuid;

/// User-requested microphone/camera state.
///
/// Only explicit toggle commands change it; capture and signaling logic
/// read it but never write it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CaptureIntent {
    pub mic_enabled: bool,
    pub cam_enabled: bool,
}

impl CaptureIntent {
    pub fn new(mic_enabled: bool, cam_enabled: bool) -> Self {
        Self {
            mic_enabled,
            cam_enabled,
        }
    }

    /// Flip the microphone flag, returning the new value
    pub fn toggle_mic(&mut self) -> bool {
        self.mic_enabled = !self.mic_enabled;
        self.mic_enabled
    }

    /// Flip the camera flag, returning the new value
    pub fn toggle_cam(&mut self) -> bool {
        self.cam_enabled = !self.cam_enabled;
        self.cam_enabled
    }

    pub fn wants_capture(&self) -> bool {
        self.mic_enabled || self.cam_enabled
    }
}

/// Point-in-time size of the display surface.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SurfaceGeometry {
    pub width: f64,
    pub height: f64,
}

impl SurfaceGeometry {
    /// Returns `None` unless both dimensions are finite and positive.
    pub fn new(width: f64, height: f64) -> Option<Self> {
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if valid(width) && valid(height) {
            Some(Self { width, height })
        } else {
            None
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width / self.height
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AspectRatioSpec {
    pub aspect_ratio: f64,
}

/// Video part of a capture request; serializes as `false` or `{"aspectRatio": r}`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum VideoSpec {
    Off,
    On(AspectRatioSpec),
}

impl VideoSpec {
    pub fn is_on(&self) -> bool {
        matches!(self, VideoSpec::On(_))
    }

    pub fn aspect_ratio(&self) -> Option<f64> {
        match self {
            VideoSpec::Off => None,
            VideoSpec::On(spec) => Some(spec.aspect_ratio),
        }
    }
}

impl Serialize for VideoSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            VideoSpec::Off => serializer.serialize_bool(false),
            VideoSpec::On(spec) => spec.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for VideoSpec {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Flag(bool),
            Spec(AspectRatioSpec),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Flag(false) => Ok(VideoSpec::Off),
            Repr::Flag(true) => Err(de::Error::custom(
                "video must be false or carry an aspect ratio",
            )),
            Repr::Spec(spec) => Ok(VideoSpec::On(spec)),
        }
    }
}

/// What a stream request asks the capture provider for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MediaConstraints {
    pub video: VideoSpec,
    pub audio: bool,
}

impl MediaConstraints {
    pub fn wants(&self, kind: TrackKind) -> bool {
        match kind {
            TrackKind::Video => self.video.is_on(),
            TrackKind::Audio => self.audio,
        }
    }

    pub fn kinds(&self) -> Vec<TrackKind> {
        TrackKind::ALL
            .into_iter()
            .filter(|kind| self.wants(*kind))
            .collect()
    }

    /// Track kinds to drop if `target` can be reached from `self` by removal alone.
    ///
    /// Returns `None` when `target` adds a modality or changes the video
    /// constraints, since those need a fresh stream.
    pub fn narrowing_to(&self, target: &MediaConstraints) -> Option<Vec<TrackKind>> {
        if target.audio && !self.audio {
            return None;
        }
        match (&self.video, &target.video) {
            (VideoSpec::Off, VideoSpec::On(_)) => return None,
            (VideoSpec::On(current), VideoSpec::On(wanted)) if current != wanted => return None,
            _ => {}
        }

        Some(
            TrackKind::ALL
                .into_iter()
                .filter(|kind| self.wants(*kind) && !target.wants(*kind))
                .collect(),
        )
    }
}

/// Derived capture request, or the sentinel meaning "release and do not request".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CaptureConfig {
    NoCapture,
    Capture(MediaConstraints),
}

impl CaptureConfig {
    pub fn constraints(&self) -> Option<&MediaConstraints> {
        match self {
            CaptureConfig::NoCapture => None,
            CaptureConfig::Capture(constraints) => Some(constraints),
        }
    }

    pub fn is_no_capture(&self) -> bool {
        matches!(self, CaptureConfig::NoCapture)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
}

impl TrackKind {
    pub const ALL: [TrackKind; 2] = [TrackKind::Video, TrackKind::Audio];
}

impl fmt::Display for TrackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackKind::Video => write!(f, "video"),
            TrackKind::Audio => write!(f, "audio"),
        }
    }
}

/// One live hardware track. Clones share the same liveness flag.
#[derive(Debug, Clone)]
pub struct MediaTrack {
    id: String,
    kind: TrackKind,
    label: String,
    live: Arc<AtomicBool>,
}

impl MediaTrack {
    pub fn new(kind: TrackKind, label: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            label: label.into(),
            live: Arc::new(AtomicBool::new(true)),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn kind(&self) -> TrackKind {
        self.kind
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    /// Stop the track. Returns `false` if it was already stopped.
    pub fn stop(&self) -> bool {
        self.live.swap(false, Ordering::SeqCst)
    }
}

impl PartialEq for MediaTrack {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

/// Handle to a set of live tracks produced by one provider request.
#[derive(Debug, Clone)]
pub struct CaptureStream {
    id: Uuid,
    constraints: MediaConstraints,
    tracks: Vec<MediaTrack>,
    acquired_at: DateTime<Utc>,
}

impl CaptureStream {
    pub fn new(constraints: MediaConstraints, tracks: Vec<MediaTrack>) -> Self {
        Self {
            id: Uuid::new_v4(),
            constraints,
            tracks,
            acquired_at: Utc::now(),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn constraints(&self) -> &MediaConstraints {
        &self.constraints
    }

    pub fn tracks(&self) -> &[MediaTrack] {
        &self.tracks
    }

    pub fn acquired_at(&self) -> DateTime<Utc> {
        self.acquired_at
    }

    pub fn tracks_of(&self, kind: TrackKind) -> impl Iterator<Item = &MediaTrack> {
        self.tracks.iter().filter(move |track| track.kind == kind)
    }

    /// True while any track is still live
    pub fn is_live(&self) -> bool {
        self.tracks.iter().any(MediaTrack::is_live)
    }

    pub fn has_live(&self, kind: TrackKind) -> bool {
        self.tracks_of(kind).any(MediaTrack::is_live)
    }

    /// Stop every track, returning how many were live.
    pub fn stop_all(&self) -> usize {
        self.tracks.iter().filter(|track| track.stop()).count()
    }

    /// Stop tracks of one kind, returning how many were live.
    pub fn stop_kind(&self, kind: TrackKind) -> usize {
        self.tracks_of(kind).filter(|track| track.stop()).count()
    }

    pub(crate) fn narrow_to(&mut self, constraints: MediaConstraints) {
        self.constraints = constraints;
    }
}

impl PartialEq for CaptureStream {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}
