use crate::media::types::{AspectRatioSpec, CaptureConfig, CaptureIntent, MediaConstraints, VideoSpec};

/// Decimal digits kept on the requested aspect ratio.
pub const ASPECT_RATIO_PRECISION: i32 = 6;

/// Round a ratio to [`ASPECT_RATIO_PRECISION`] decimal digits.
pub fn round_ratio(ratio: f64) -> f64 {
    let scale = 10f64.powi(ASPECT_RATIO_PRECISION);
    (ratio * scale).round() / scale
}

/// Maps user intent and surface shape to a capture request.
pub struct CaptureConfigBuilder;

impl CaptureConfigBuilder {
    pub fn build(intent: CaptureIntent, ratio: f64) -> CaptureConfig {
        if !intent.wants_capture() {
            return CaptureConfig::NoCapture;
        }

        let video = if intent.cam_enabled {
            VideoSpec::On(AspectRatioSpec {
                aspect_ratio: round_ratio(ratio),
            })
        } else {
            VideoSpec::Off
        };

        CaptureConfig::Capture(MediaConstraints {
            video,
            audio: intent.mic_enabled,
        })
    }
}
