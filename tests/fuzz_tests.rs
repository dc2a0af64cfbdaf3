//! Fuzz-style tests using proptest
//!
//! Random command and event interleavings against the sans-IO state machines.
//! Run with: cargo test --test fuzz_tests

use crabcall::media::{
    round_ratio, AspectChange, AspectRatioTracker, CaptureConfigBuilder, CaptureIntent,
    CaptureLifecycleManager, CaptureRequest, CaptureStream, MediaTrack, ReconcileOutcome,
    ReconcileStep, TrackKind,
};
use crabcall::signaling::{
    LocalIdentity, OutboundMessage, RoomCode, SessionAction, SignalingSession,
};
use proptest::prelude::*;

mod builder_fuzz {
    use super::*;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Identical inputs always give identical, rounded configs
        #[test]
        fn fuzz_builder_is_pure(
            mic in any::<bool>(),
            cam in any::<bool>(),
            ratio in 0.1f64..10.0,
        ) {
            let intent = CaptureIntent::new(mic, cam);
            let first = CaptureConfigBuilder::build(intent, ratio);
            let second = CaptureConfigBuilder::build(intent, ratio);
            prop_assert_eq!(first, second);

            match first.constraints() {
                None => prop_assert!(!mic && !cam),
                Some(constraints) => {
                    prop_assert_eq!(constraints.audio, mic);
                    prop_assert_eq!(constraints.video.is_on(), cam);
                    if let Some(requested) = constraints.video.aspect_ratio() {
                        prop_assert_eq!(requested, round_ratio(ratio));
                        prop_assert!((requested - ratio).abs() <= 1e-6);
                    }
                }
            }
        }

        /// The tracker ignores degenerate sizes and only reports real changes
        #[test]
        fn fuzz_tracker_observations(
            samples in prop::collection::vec((-100.0f64..4000.0, -100.0f64..4000.0), 0..50),
        ) {
            let mut tracker = AspectRatioTracker::new(16.0 / 9.0, 1e-6);
            for (width, height) in samples {
                let before = tracker.current();
                match tracker.observe(width, height) {
                    AspectChange::Changed(ratio) => {
                        prop_assert!(width > 0.0 && height > 0.0);
                        prop_assert!((ratio - before).abs() > 1e-6);
                        prop_assert_eq!(tracker.current(), ratio);
                    }
                    AspectChange::NoChange => prop_assert_eq!(tracker.current(), before),
                }
            }
        }
    }
}

mod lifecycle_fuzz {
    use super::*;

    #[derive(Debug, Clone)]
    enum Op {
        ToggleMic,
        ToggleCam,
        /// Resolve one of the outstanding requests, picked by index
        Resolve(usize),
        Fail(usize),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::ToggleMic),
            Just(Op::ToggleCam),
            (0usize..8).prop_map(Op::Resolve),
            (0usize..8).prop_map(Op::Fail),
        ]
    }

    fn stream_for(request: &CaptureRequest) -> CaptureStream {
        let tracks = request
            .constraints
            .kinds()
            .into_iter()
            .map(|kind| MediaTrack::new(kind, format!("fuzz {}", kind)))
            .collect();
        CaptureStream::new(request.constraints, tracks)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(300))]

        /// Whatever order requests resolve in, at most one stream is live
        #[test]
        fn fuzz_toggle_sequences_keep_one_live_stream(
            ops in prop::collection::vec(op(), 0..60),
        ) {
            let mut intent = CaptureIntent::new(false, true);
            let mut manager = CaptureLifecycleManager::new();
            let mut outstanding: Vec<CaptureRequest> = Vec::new();
            let mut issued: Vec<CaptureStream> = Vec::new();

            let begin = |manager: &mut CaptureLifecycleManager,
                             intent: CaptureIntent,
                             outstanding: &mut Vec<CaptureRequest>| {
                let config = CaptureConfigBuilder::build(intent, 1.5);
                if let ReconcileStep::Acquire(request) = manager.begin(&config) {
                    outstanding.push(request);
                }
            };
            begin(&mut manager, intent, &mut outstanding);

            for op in ops {
                match op {
                    Op::ToggleMic => {
                        if !intent.toggle_mic() {
                            manager.release_track_kind(TrackKind::Audio);
                        }
                        begin(&mut manager, intent, &mut outstanding);
                    }
                    Op::ToggleCam => {
                        if !intent.toggle_cam() {
                            manager.release_track_kind(TrackKind::Video);
                        }
                        begin(&mut manager, intent, &mut outstanding);
                    }
                    Op::Resolve(i) if !outstanding.is_empty() => {
                        let request = outstanding.remove(i % outstanding.len());
                        let stream = stream_for(&request);
                        issued.push(stream.clone());
                        let outcome = manager.complete(request.seq, Ok(stream.clone()));
                        if matches!(outcome, ReconcileOutcome::Superseded) {
                            prop_assert!(!stream.is_live());
                        }
                    }
                    Op::Fail(i) if !outstanding.is_empty() => {
                        let request = outstanding.remove(i % outstanding.len());
                        let before = manager.current().map(CaptureStream::id);
                        let outcome = manager.complete(
                            request.seq,
                            Err(crabcall::CaptureError::NoDevice("fuzz".to_string())),
                        );
                        if matches!(outcome, ReconcileOutcome::Failed(_)) {
                            prop_assert_eq!(manager.current().map(CaptureStream::id), before);
                        }
                    }
                    Op::Resolve(_) | Op::Fail(_) => {}
                }

                let live = issued.iter().filter(|stream| stream.is_live()).count();
                prop_assert!(live <= 1, "{} live streams", live);
                if let Some(current) = manager.current() {
                    prop_assert!(current.is_live());
                }
            }

            manager.teardown();
            prop_assert!(issued.iter().all(|stream| !stream.is_live()));
        }
    }
}

mod session_fuzz {
    use super::*;

    #[derive(Debug, Clone)]
    enum Event {
        RequestJoin,
        WithdrawJoin,
        Leave,
        StreamReady,
        StreamLost,
        TransportConnected,
        TransportDisconnected,
    }

    fn event() -> impl Strategy<Value = Event> {
        prop_oneof![
            Just(Event::RequestJoin),
            Just(Event::WithdrawJoin),
            Just(Event::Leave),
            Just(Event::StreamReady),
            Just(Event::StreamLost),
            Just(Event::TransportConnected),
            Just(Event::TransportDisconnected),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(500))]

        /// Joins only follow a ready stream plus an ack, once per attempt
        #[test]
        fn fuzz_join_ordering(events in prop::collection::vec(event(), 0..80)) {
            let mut session = SignalingSession::new(
                LocalIdentity::new("local").unwrap(),
                RoomCode::new("room").unwrap(),
            );
            let mut stream_ready = false;
            let mut acked = false;
            let mut joins_this_attempt = 0;

            for event in events {
                let acked_now = matches!(event, Event::TransportConnected);
                let actions = match event {
                    Event::RequestJoin => session.request_join(),
                    Event::WithdrawJoin => session.withdraw_join(),
                    Event::Leave => session.leave().unwrap_or_default(),
                    Event::StreamReady => {
                        stream_ready = true;
                        session.on_stream_ready()
                    }
                    Event::StreamLost => {
                        stream_ready = false;
                        session.on_stream_lost();
                        Vec::new()
                    }
                    Event::TransportConnected => session.on_transport_connected(),
                    Event::TransportDisconnected => {
                        session.on_transport_disconnected();
                        Vec::new()
                    }
                };
                if acked_now {
                    acked = true;
                }

                for action in actions {
                    match action {
                        SessionAction::Connect { attempt } => {
                            prop_assert_eq!(attempt, session.attempt());
                            joins_this_attempt = 0;
                            acked = false;
                        }
                        SessionAction::Emit(OutboundMessage::JoinRoom { .. }) => {
                            prop_assert!(stream_ready);
                            prop_assert!(acked);
                            joins_this_attempt += 1;
                            prop_assert!(joins_this_attempt <= 1);
                        }
                        SessionAction::Emit(OutboundMessage::UpdateStream { .. }) => {
                            prop_assert!(stream_ready);
                        }
                        SessionAction::Disconnect => {}
                    }
                }
            }
        }
    }
}
