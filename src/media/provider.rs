use crate::errors::CaptureError;
use crate::media::types::{CaptureStream, MediaConstraints};
use async_trait::async_trait;

/// Device capture backend.
///
/// Implementations grant a stream whose tracks match `constraints`, or fail
/// with the reason the device layer reported. A request may take arbitrarily
/// long (permission prompts, device warmup); callers must not assume ordering
/// between concurrent requests.
#[async_trait]
pub trait CaptureProvider: Send + Sync {
    async fn request_stream(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<CaptureStream, CaptureError>;
}
