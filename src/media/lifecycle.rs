//! Ownership of the local capture stream
//!
//! The manager is the only place a [`CaptureStream`] becomes current or gets
//! released. Reconciliation is split in two so a driver can run the provider
//! request off the handler:
//!
//! 1. [`CaptureLifecycleManager::begin`] decides what the new config needs and,
//!    if a provider request is required, issues a sequence-numbered
//!    [`CaptureRequest`].
//! 2. [`CaptureLifecycleManager::complete`] installs the result, but only if the
//!    request is still the newest one. Stale results are stopped on arrival.
//!
//! [`CaptureLifecycleManager::reconcile`] chains both for callers that can
//! simply await the provider.

use crate::assert_invariant;
use crate::errors::CaptureError;
use crate::invariant_ppt::SINGLE_LIVE_STREAM;
use crate::media::provider::CaptureProvider;
use crate::media::types::{CaptureConfig, CaptureStream, MediaConstraints, TrackKind, VideoSpec};

/// A provider request the manager is waiting on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureRequest {
    pub seq: u64,
    pub constraints: MediaConstraints,
}

/// What `begin` decided for a new configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum ReconcileStep {
    /// The config was the no-capture sentinel; the current stream (if any) is released.
    Released,
    /// The current stream already matches; any older pending request was invalidated.
    Unchanged,
    /// An identical request is already in flight.
    AlreadyPending,
    /// Tracks of these kinds were stopped on the current stream; no new stream needed.
    Narrowed(Vec<TrackKind>),
    /// The caller must run this request and pass its result to `complete`.
    Acquire(CaptureRequest),
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    Installed {
        stream: CaptureStream,
        replaced: Option<CaptureStream>,
    },
    /// A newer request made this result stale; its tracks were stopped.
    Superseded,
    /// The provider refused; the current stream is untouched.
    Failed(CaptureError),
}

#[derive(Debug, Default)]
pub struct CaptureLifecycleManager {
    current: Option<CaptureStream>,
    pending: Option<CaptureRequest>,
    next_seq: u64,
}

impl CaptureLifecycleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<&CaptureStream> {
        self.current.as_ref()
    }

    pub fn pending(&self) -> Option<&CaptureRequest> {
        self.pending.as_ref()
    }

    /// Start reconciling towards `config`.
    ///
    /// Any request issued before this call is invalidated unless it asks for
    /// exactly the same constraints.
    pub fn begin(&mut self, config: &CaptureConfig) -> ReconcileStep {
        let constraints = match config {
            CaptureConfig::NoCapture => {
                self.invalidate_pending();
                self.release_current();
                return ReconcileStep::Released;
            }
            CaptureConfig::Capture(constraints) => *constraints,
        };

        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.constraints == constraints)
        {
            return ReconcileStep::AlreadyPending;
        }
        self.invalidate_pending();

        if let Some(current) = self.current.as_mut() {
            if *current.constraints() == constraints {
                return ReconcileStep::Unchanged;
            }
            if let Some(dropped) = current.constraints().narrowing_to(&constraints) {
                for kind in &dropped {
                    let stopped = current.stop_kind(*kind);
                    log::debug!(
                        "Stopped {} {} track(s) on stream {} without reacquiring",
                        stopped,
                        kind,
                        current.id()
                    );
                }
                current.narrow_to(constraints);
                return ReconcileStep::Narrowed(dropped);
            }
        }

        self.next_seq += 1;
        let request = CaptureRequest {
            seq: self.next_seq,
            constraints,
        };
        log::debug!("Issuing capture request #{}: {:?}", request.seq, constraints);
        self.pending = Some(request);
        ReconcileStep::Acquire(request)
    }

    /// Hand back the provider's answer for request `seq`.
    pub fn complete(
        &mut self,
        seq: u64,
        result: Result<CaptureStream, CaptureError>,
    ) -> ReconcileOutcome {
        let is_newest = self.pending.as_ref().is_some_and(|pending| pending.seq == seq);
        if !is_newest {
            match result {
                Ok(stream) => {
                    let stopped = stream.stop_all();
                    log::warn!(
                        "Discarding superseded stream {} from request #{} ({} track(s) stopped)",
                        stream.id(),
                        seq,
                        stopped
                    );
                }
                Err(e) => log::debug!("Ignoring failure of superseded request #{}: {}", seq, e),
            }
            return ReconcileOutcome::Superseded;
        }
        self.pending = None;

        match result {
            Ok(stream) => {
                let replaced = self.current.replace(stream.clone());
                if let Some(old) = &replaced {
                    let stopped = old.stop_all();
                    log::debug!(
                        "Released stream {} ({} track(s) stopped) in favour of {}",
                        old.id(),
                        stopped,
                        stream.id()
                    );
                }
                assert_invariant!(
                    replaced.as_ref().map_or(true, |old| !old.is_live()),
                    SINGLE_LIVE_STREAM,
                    "CaptureLifecycleManager::complete"
                );
                log::info!(
                    "Capture stream {} installed (video: {}, audio: {})",
                    stream.id(),
                    stream.constraints().video.is_on(),
                    stream.constraints().audio
                );
                ReconcileOutcome::Installed { stream, replaced }
            }
            Err(e) => {
                log::warn!("Capture request #{} failed: {}", seq, e);
                ReconcileOutcome::Failed(e)
            }
        }
    }

    /// Reconcile and await the provider inline.
    pub async fn reconcile<P>(
        &mut self,
        provider: &P,
        config: &CaptureConfig,
    ) -> Result<Option<CaptureStream>, CaptureError>
    where
        P: CaptureProvider + ?Sized,
    {
        match self.begin(config) {
            ReconcileStep::Released => Ok(None),
            ReconcileStep::Unchanged
            | ReconcileStep::AlreadyPending
            | ReconcileStep::Narrowed(_) => Ok(self.current.clone()),
            ReconcileStep::Acquire(request) => {
                let result = provider.request_stream(&request.constraints).await;
                match self.complete(request.seq, result) {
                    ReconcileOutcome::Installed { stream, .. } => Ok(Some(stream)),
                    ReconcileOutcome::Failed(e) => Err(e),
                    ReconcileOutcome::Superseded => Ok(self.current.clone()),
                }
            }
        }
    }

    /// Stop only the tracks of `kind` on the current stream.
    ///
    /// Returns how many tracks were live. If nothing else remains the stream
    /// is released entirely.
    pub fn release_track_kind(&mut self, kind: TrackKind) -> usize {
        let Some(current) = self.current.as_mut() else {
            return 0;
        };

        let stopped = current.stop_kind(kind);
        let mut constraints = *current.constraints();
        match kind {
            TrackKind::Video => constraints.video = VideoSpec::Off,
            TrackKind::Audio => constraints.audio = false,
        }
        current.narrow_to(constraints);

        if !current.is_live() {
            log::debug!("Stream {} has no live tracks left, releasing", current.id());
            self.current = None;
        }
        stopped
    }

    /// Stop everything and forget any in-flight request. Safe to call repeatedly.
    pub fn teardown(&mut self) {
        self.invalidate_pending();
        self.release_current();
    }

    fn release_current(&mut self) {
        if let Some(stream) = self.current.take() {
            let stopped = stream.stop_all();
            log::info!(
                "Capture stream {} released ({} track(s) stopped)",
                stream.id(),
                stopped
            );
        }
    }

    fn invalidate_pending(&mut self) {
        if let Some(pending) = self.pending.take() {
            log::debug!("Capture request #{} superseded", pending.seq);
        }
    }
}

impl Drop for CaptureLifecycleManager {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::types::{AspectRatioSpec, MediaTrack};

    fn constraints(video: bool, audio: bool) -> MediaConstraints {
        MediaConstraints {
            video: if video {
                VideoSpec::On(AspectRatioSpec {
                    aspect_ratio: 1.777778,
                })
            } else {
                VideoSpec::Off
            },
            audio,
        }
    }

    fn stream_for(constraints: MediaConstraints) -> CaptureStream {
        let tracks = constraints
            .kinds()
            .into_iter()
            .map(|kind| MediaTrack::new(kind, format!("test {}", kind)))
            .collect();
        CaptureStream::new(constraints, tracks)
    }

    fn acquire(manager: &mut CaptureLifecycleManager, c: MediaConstraints) -> CaptureRequest {
        match manager.begin(&CaptureConfig::Capture(c)) {
            ReconcileStep::Acquire(request) => request,
            other => panic!("expected Acquire, got {:?}", other),
        }
    }

    #[test]
    fn test_install_replaces_and_stops_previous() {
        let mut manager = CaptureLifecycleManager::new();
        let first = acquire(&mut manager, constraints(false, true));
        let first_stream = stream_for(first.constraints);
        manager.complete(first.seq, Ok(first_stream.clone()));

        let second = acquire(&mut manager, constraints(true, true));
        // Old stream keeps running while the new request is outstanding.
        assert!(first_stream.is_live());

        let second_stream = stream_for(second.constraints);
        match manager.complete(second.seq, Ok(second_stream.clone())) {
            ReconcileOutcome::Installed { stream, replaced } => {
                assert_eq!(stream, second_stream);
                assert_eq!(replaced, Some(first_stream.clone()));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!first_stream.is_live());
        assert!(second_stream.is_live());
        assert_eq!(manager.current(), Some(&second_stream));
    }

    #[test]
    fn test_stale_result_is_stopped_and_discarded() {
        let mut manager = CaptureLifecycleManager::new();
        let older = acquire(&mut manager, constraints(true, false));
        let newer = acquire(&mut manager, constraints(true, true));
        assert!(newer.seq > older.seq);

        let late = stream_for(older.constraints);
        assert!(matches!(
            manager.complete(older.seq, Ok(late.clone())),
            ReconcileOutcome::Superseded
        ));
        assert!(!late.is_live());
        assert!(manager.current().is_none());

        let fresh = stream_for(newer.constraints);
        assert!(matches!(
            manager.complete(newer.seq, Ok(fresh.clone())),
            ReconcileOutcome::Installed { .. }
        ));
        assert_eq!(manager.current(), Some(&fresh));
    }

    #[test]
    fn test_failure_keeps_current_stream() {
        let mut manager = CaptureLifecycleManager::new();
        let audio = acquire(&mut manager, constraints(false, true));
        let audio_stream = stream_for(audio.constraints);
        manager.complete(audio.seq, Ok(audio_stream.clone()));

        let with_video = acquire(&mut manager, constraints(true, true));
        let outcome = manager.complete(
            with_video.seq,
            Err(CaptureError::NoDevice("no camera".to_string())),
        );
        assert!(matches!(
            outcome,
            ReconcileOutcome::Failed(CaptureError::NoDevice(_))
        ));
        assert_eq!(manager.current(), Some(&audio_stream));
        assert!(audio_stream.is_live());
        assert!(manager.pending().is_none());
    }

    #[test]
    fn test_sentinel_releases_and_invalidates_pending() {
        let mut manager = CaptureLifecycleManager::new();
        let request = acquire(&mut manager, constraints(true, false));
        assert_eq!(manager.begin(&CaptureConfig::NoCapture), ReconcileStep::Released);

        let late = stream_for(request.constraints);
        assert!(matches!(
            manager.complete(request.seq, Ok(late.clone())),
            ReconcileOutcome::Superseded
        ));
        assert!(!late.is_live());
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_identical_config_is_not_reissued() {
        let mut manager = CaptureLifecycleManager::new();
        let c = constraints(true, true);
        let request = acquire(&mut manager, c);
        assert_eq!(
            manager.begin(&CaptureConfig::Capture(c)),
            ReconcileStep::AlreadyPending
        );
        manager.complete(request.seq, Ok(stream_for(c)));
        assert_eq!(
            manager.begin(&CaptureConfig::Capture(c)),
            ReconcileStep::Unchanged
        );
    }

    #[test]
    fn test_dropping_a_modality_narrows_in_place() {
        let mut manager = CaptureLifecycleManager::new();
        let both = constraints(true, true);
        let request = acquire(&mut manager, both);
        let stream = stream_for(both);
        manager.complete(request.seq, Ok(stream.clone()));

        let step = manager.begin(&CaptureConfig::Capture(constraints(false, true)));
        assert_eq!(step, ReconcileStep::Narrowed(vec![TrackKind::Video]));
        assert!(!stream.has_live(TrackKind::Video));
        assert!(stream.has_live(TrackKind::Audio));

        let current = manager.current().unwrap();
        assert_eq!(current.id(), stream.id());
        assert_eq!(*current.constraints(), constraints(false, true));
    }

    #[test]
    fn test_release_track_kind_and_teardown_are_idempotent() {
        let mut manager = CaptureLifecycleManager::new();
        assert_eq!(manager.release_track_kind(TrackKind::Audio), 0);

        let both = constraints(true, true);
        let request = acquire(&mut manager, both);
        let stream = stream_for(both);
        manager.complete(request.seq, Ok(stream.clone()));

        assert_eq!(manager.release_track_kind(TrackKind::Audio), 1);
        assert_eq!(manager.release_track_kind(TrackKind::Audio), 0);
        assert!(manager.current().is_some());

        assert_eq!(manager.release_track_kind(TrackKind::Video), 1);
        assert!(manager.current().is_none());
        assert!(!stream.is_live());

        manager.teardown();
        manager.teardown();
        assert!(manager.current().is_none());
    }

    #[test]
    fn test_drop_stops_current_stream() {
        let c = constraints(true, false);
        let stream = stream_for(c);
        {
            let mut manager = CaptureLifecycleManager::new();
            let request = acquire(&mut manager, c);
            manager.complete(request.seq, Ok(stream.clone()));
        }
        assert!(!stream.is_live());
    }
}
