//! Display-surface aspect ratio tracking
//!
//! Layout observers fire on every sub-pixel resize. The tracker turns those
//! samples into a ratio that only changes when the shape really changed.

use crate::media::types::SurfaceGeometry;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AspectChange {
    Changed(f64),
    NoChange,
}

#[derive(Debug, Clone)]
pub struct AspectRatioTracker {
    last_emitted: f64,
    epsilon: f64,
}

impl AspectRatioTracker {
    /// `initial` is treated as already emitted.
    pub fn new(initial: f64, epsilon: f64) -> Self {
        Self {
            last_emitted: initial,
            epsilon: epsilon.abs(),
        }
    }

    pub fn current(&self) -> f64 {
        self.last_emitted
    }

    /// Feed one surface observation.
    ///
    /// Samples with a non-positive or non-finite dimension are ignored.
    pub fn observe(&mut self, width: f64, height: f64) -> AspectChange {
        let Some(geometry) = SurfaceGeometry::new(width, height) else {
            log::debug!("Ignoring degenerate surface size {}x{}", width, height);
            return AspectChange::NoChange;
        };

        let ratio = geometry.aspect_ratio();
        if (ratio - self.last_emitted).abs() <= self.epsilon {
            return AspectChange::NoChange;
        }

        log::debug!("Aspect ratio {} -> {}", self.last_emitted, ratio);
        self.last_emitted = ratio;
        AspectChange::Changed(ratio)
    }
}
