//! Synthetic capture device
//!
//! Hands out streams of [`MediaTrack`]s with no hardware behind them. Every
//! stream it ever returned is remembered so a test can count how many are
//! still live after a scenario.

use crate::errors::CaptureError;
use crate::media::{CaptureProvider, CaptureStream, MediaConstraints, MediaTrack, TrackKind};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tokio::sync::oneshot;

#[derive(Debug, Default)]
struct ProviderState {
    failures: VecDeque<CaptureError>,
    unplugged: HashSet<TrackKind>,
    holding: bool,
    gates: Vec<oneshot::Sender<()>>,
    requests: Vec<MediaConstraints>,
    issued: Vec<CaptureStream>,
}

#[derive(Debug, Default)]
pub struct SyntheticCaptureProvider {
    state: Mutex<ProviderState>,
}

impl SyntheticCaptureProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail the next request with `error`. Queued failures are used in order.
    pub fn fail_next(&self, error: CaptureError) {
        self.lock().failures.push_back(error);
    }

    /// Any request that needs `kind` fails with `NoDevice` until replugged.
    pub fn unplug(&self, kind: TrackKind) {
        self.lock().unplugged.insert(kind);
    }

    pub fn replug(&self, kind: TrackKind) {
        self.lock().unplugged.remove(&kind);
    }

    /// Park new requests until [`SyntheticCaptureProvider::release_held`].
    pub fn hold(&self) {
        self.lock().holding = true;
    }

    /// Let every parked request finish. Returns how many were parked.
    pub fn release_held(&self) -> usize {
        let gates = {
            let mut state = self.lock();
            state.holding = false;
            std::mem::take(&mut state.gates)
        };
        let released = gates.len();
        for gate in gates {
            let _ = gate.send(());
        }
        released
    }

    pub fn held_count(&self) -> usize {
        self.lock().gates.len()
    }

    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Constraints of every request received, oldest first
    pub fn requests(&self) -> Vec<MediaConstraints> {
        self.lock().requests.clone()
    }

    pub fn issued_streams(&self) -> Vec<CaptureStream> {
        self.lock().issued.clone()
    }

    /// Streams handed out that still have at least one live track
    pub fn live_stream_count(&self) -> usize {
        self.lock()
            .issued
            .iter()
            .filter(|stream| stream.is_live())
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl CaptureProvider for SyntheticCaptureProvider {
    async fn request_stream(
        &self,
        constraints: &MediaConstraints,
    ) -> Result<CaptureStream, CaptureError> {
        let gate = {
            let mut state = self.lock();
            state.requests.push(*constraints);
            if state.holding {
                let (tx, rx) = oneshot::channel();
                state.gates.push(tx);
                Some(rx)
            } else {
                None
            }
        };
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        let mut state = self.lock();
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }
        let kinds = constraints.kinds();
        if let Some(missing) = kinds.iter().find(|kind| state.unplugged.contains(*kind)) {
            return Err(CaptureError::NoDevice(format!("no {} device attached", missing)));
        }

        let tracks = kinds
            .into_iter()
            .map(|kind| MediaTrack::new(kind, format!("Synthetic {}", kind)))
            .collect();
        let stream = CaptureStream::new(*constraints, tracks);
        state.issued.push(stream.clone());
        Ok(stream)
    }
}
