//! Composition root for call entry
//!
//! The [`Coordinator`] owns every stateful piece of the pipeline:
//!
//! surface size -> [`AspectRatioTracker`] -> [`CaptureConfigBuilder`] ->
//! [`CaptureLifecycleManager`] -> stream ready -> [`SignalingSession`]
//!
//! All handlers take `&mut self`, so one event runs to completion before the
//! next is looked at. Long-latency work (provider requests, reconnect delays)
//! runs on spawned tasks and comes back as events on an internal channel;
//! transport callbacks arrive through a [`TransportSink`] tagged with the
//! connection attempt they belong to.
//!
//! Observers read a [`CoordinatorSnapshot`] from a `watch` channel, which is
//! republished after every handled command or event.

use crate::config::CoordinatorConfig;
use crate::errors::{CaptureError, CoordinatorError, ProtocolError, SignalingError, TransportError};
use crate::media::{
    AspectChange, AspectRatioTracker, CaptureConfig, CaptureConfigBuilder, CaptureIntent,
    CaptureLifecycleManager, CaptureProvider, CaptureRequest, CaptureStream, ReconcileOutcome,
    ReconcileStep, TrackKind,
};
use crate::signaling::{
    InboundMessage, LocalIdentity, OutboundMessage, PeerId, RoomCode, SessionAction, SessionState,
    SignalingSession, SignalingTransport, TransportDelivery, TransportEvent, TransportSink,
};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

/// Commands accepted from the presentation layer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UserCommand {
    ToggleMic,
    ToggleCam,
    ReportSurfaceSize { width: f64, height: f64 },
    RequestJoin,
    WithdrawJoin,
    Leave,
    Shutdown,
}

/// Results of work the coordinator spawned itself.
#[derive(Debug)]
enum InternalEvent {
    CaptureCompleted {
        seq: u64,
        result: Result<CaptureStream, CaptureError>,
    },
    ReconnectDue,
}

#[derive(Debug)]
enum CoordinatorEvent {
    Internal(InternalEvent),
    Transport(TransportDelivery),
}

enum Step {
    Command(Option<UserCommand>),
    Event(Option<CoordinatorEvent>),
}

/// Read-only view published to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorSnapshot {
    pub intent: CaptureIntent,
    pub aspect_ratio: f64,
    pub capture_config: CaptureConfig,
    /// Stream the rendering surface should attach to
    pub capture_stream: Option<CaptureStream>,
    /// A provider request is outstanding
    pub capture_pending: bool,
    pub session_state: SessionState,
    pub peer_roster: Vec<PeerId>,
    pub last_announced_peer: Option<PeerId>,
    pub capture_error: Option<CaptureError>,
    pub transport_error: Option<TransportError>,
    pub protocol_error: Option<ProtocolError>,
}

pub struct CoordinatorBuilder {
    provider: Arc<dyn CaptureProvider>,
    transport: Arc<dyn SignalingTransport>,
    config: CoordinatorConfig,
    identity: Option<LocalIdentity>,
    room_code: Option<RoomCode>,
}

impl CoordinatorBuilder {
    pub fn new(provider: Arc<dyn CaptureProvider>, transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            provider,
            transport,
            config: CoordinatorConfig::default(),
            identity: None,
            room_code: None,
        }
    }

    pub fn config(mut self, config: CoordinatorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn identity(mut self, identity: LocalIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn room_code(mut self, room_code: RoomCode) -> Self {
        self.room_code = Some(room_code);
        self
    }

    /// Validate inputs and start the initial capture reconcile.
    ///
    /// Must be called from within a tokio runtime; provider requests are
    /// spawned onto it.
    pub fn build(self) -> Result<Coordinator, CoordinatorError> {
        self.config.validate()?;
        let identity = self.identity.ok_or(SignalingError::MissingIdentity)?;
        let room_code = self.room_code.ok_or(SignalingError::MissingRoomCode)?;
        let runtime = Handle::try_current().map_err(|_| CoordinatorError::NoRuntime)?;

        let capture = &self.config.capture;
        let intent = CaptureIntent::new(capture.mic_enabled, capture.cam_enabled);
        let tracker = AspectRatioTracker::new(capture.initial_aspect_ratio, capture.ratio_epsilon);
        let capture_config = CaptureConfigBuilder::build(intent, tracker.current());

        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (snapshot_tx, _) = watch::channel(CoordinatorSnapshot {
            intent,
            aspect_ratio: tracker.current(),
            capture_config,
            capture_stream: None,
            capture_pending: false,
            session_state: SessionState::Idle,
            peer_roster: Vec::new(),
            last_announced_peer: None,
            capture_error: None,
            transport_error: None,
            protocol_error: None,
        });

        log::info!(
            "Coordinator for {} in room {} (signaling: {})",
            identity,
            room_code,
            self.config.signaling.server_url
        );

        let mut coordinator = Coordinator {
            provider: self.provider,
            transport: self.transport,
            config: self.config,
            runtime,
            intent,
            tracker,
            capture_config,
            lifecycle: CaptureLifecycleManager::new(),
            session: SignalingSession::new(identity, room_code),
            internal_tx,
            internal_rx,
            transport_tx,
            transport_rx,
            snapshot_tx,
            capture_error: None,
            transport_error: None,
            protocol_error: None,
            reconnect_attempts: 0,
            closed: false,
        };
        coordinator.reconcile();
        coordinator.publish();
        Ok(coordinator)
    }
}

pub struct Coordinator {
    provider: Arc<dyn CaptureProvider>,
    transport: Arc<dyn SignalingTransport>,
    config: CoordinatorConfig,
    runtime: Handle,
    intent: CaptureIntent,
    tracker: AspectRatioTracker,
    capture_config: CaptureConfig,
    lifecycle: CaptureLifecycleManager,
    session: SignalingSession,
    internal_tx: mpsc::UnboundedSender<InternalEvent>,
    internal_rx: mpsc::UnboundedReceiver<InternalEvent>,
    transport_tx: mpsc::UnboundedSender<TransportDelivery>,
    transport_rx: mpsc::UnboundedReceiver<TransportDelivery>,
    snapshot_tx: watch::Sender<CoordinatorSnapshot>,
    capture_error: Option<CaptureError>,
    transport_error: Option<TransportError>,
    protocol_error: Option<ProtocolError>,
    /// Automatic rejoins scheduled since the last successful join
    reconnect_attempts: u32,
    closed: bool,
}

impl Coordinator {
    pub fn builder(
        provider: Arc<dyn CaptureProvider>,
        transport: Arc<dyn SignalingTransport>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder::new(provider, transport)
    }

    // Commands

    /// Flip the microphone intent. Returns the new state.
    pub fn toggle_mic(&mut self) -> Result<bool, CoordinatorError> {
        self.ensure_open()?;
        let enabled = self.intent.toggle_mic();
        log::info!("Microphone {}", if enabled { "on" } else { "off" });
        if !enabled {
            self.release_kind(TrackKind::Audio);
        }
        self.reconcile();
        self.publish();
        Ok(enabled)
    }

    /// Flip the camera intent. Returns the new state.
    pub fn toggle_cam(&mut self) -> Result<bool, CoordinatorError> {
        self.ensure_open()?;
        let enabled = self.intent.toggle_cam();
        log::info!("Camera {}", if enabled { "on" } else { "off" });
        if !enabled {
            self.release_kind(TrackKind::Video);
        }
        self.reconcile();
        self.publish();
        Ok(enabled)
    }

    pub fn report_surface_size(
        &mut self,
        width: f64,
        height: f64,
    ) -> Result<AspectChange, CoordinatorError> {
        self.ensure_open()?;
        let change = self.tracker.observe(width, height);
        if let AspectChange::Changed(ratio) = change {
            log::debug!("Surface {}x{} -> aspect ratio {}", width, height, ratio);
            self.reconcile();
            self.publish();
        }
        Ok(change)
    }

    /// Record join intent. Connects right away if a stream is current.
    pub async fn request_join(&mut self) -> Result<(), CoordinatorError> {
        self.ensure_open()?;
        self.reconnect_attempts = 0;
        let actions = self.session.request_join();
        self.apply(actions).await;
        self.publish();
        Ok(())
    }

    pub async fn withdraw_join(&mut self) -> Result<(), CoordinatorError> {
        self.ensure_open()?;
        let actions = self.session.withdraw_join();
        self.apply(actions).await;
        self.publish();
        Ok(())
    }

    /// Leave the room. Only valid while connecting or joined.
    pub async fn leave(&mut self) -> Result<(), CoordinatorError> {
        self.ensure_open()?;
        let actions = self.session.leave()?;
        self.apply(actions).await;
        self.publish();
        Ok(())
    }

    /// Release the stream, then close the transport. Safe to call repeatedly.
    pub async fn teardown(&mut self) {
        if self.closed {
            return;
        }
        log::info!("Tearing down coordinator for {}", self.session.identity());
        self.lifecycle.teardown();
        self.session.on_stream_lost();
        let actions = self.session.withdraw_join();
        self.apply(actions).await;
        self.closed = true;
        self.stop_queued_captures();
        self.publish();
    }

    pub async fn execute(&mut self, command: UserCommand) -> Result<(), CoordinatorError> {
        match command {
            UserCommand::ToggleMic => self.toggle_mic().map(|_| ()),
            UserCommand::ToggleCam => self.toggle_cam().map(|_| ()),
            UserCommand::ReportSurfaceSize { width, height } => {
                self.report_surface_size(width, height).map(|_| ())
            }
            UserCommand::RequestJoin => self.request_join().await,
            UserCommand::WithdrawJoin => self.withdraw_join().await,
            UserCommand::Leave => self.leave().await,
            UserCommand::Shutdown => {
                self.teardown().await;
                Ok(())
            }
        }
    }

    // Observers

    pub fn intent(&self) -> CaptureIntent {
        self.intent
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.tracker.current()
    }

    pub fn capture_config(&self) -> &CaptureConfig {
        &self.capture_config
    }

    pub fn current_stream(&self) -> Option<&CaptureStream> {
        self.lifecycle.current()
    }

    pub fn session_state(&self) -> SessionState {
        self.session.state()
    }

    pub fn peer_roster(&self) -> &BTreeSet<PeerId> {
        self.session.roster()
    }

    pub fn last_announced_peer(&self) -> Option<&PeerId> {
        self.session.last_announced_peer()
    }

    pub fn capture_error(&self) -> Option<&CaptureError> {
        self.capture_error.as_ref()
    }

    pub fn transport_error(&self) -> Option<&TransportError> {
        self.transport_error.as_ref()
    }

    pub fn protocol_error(&self) -> Option<&ProtocolError> {
        self.protocol_error.as_ref()
    }

    pub fn identity(&self) -> &LocalIdentity {
        self.session.identity()
    }

    pub fn room_code(&self) -> &RoomCode {
        self.session.room_code()
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    // Event loop

    /// Wait for the next provider, timer, or transport event and handle it.
    ///
    /// Returns `false` once the coordinator has been torn down.
    pub async fn process_next_event(&mut self) -> bool {
        match self.next_event().await {
            Some(event) => {
                self.handle_event(event).await;
                true
            }
            None => false,
        }
    }

    /// Handle events until none arrives for `quiet`. Returns how many were handled.
    pub async fn run_until_idle(&mut self, quiet: Duration) -> usize {
        let mut handled = 0;
        while let Ok(Some(event)) = tokio::time::timeout(quiet, self.next_event()).await {
            self.handle_event(event).await;
            handled += 1;
        }
        handled
    }

    /// Move the coordinator onto its own task.
    pub fn spawn(self) -> (CoordinatorHandle, JoinHandle<()>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = CoordinatorHandle {
            commands: command_tx,
            snapshots: self.subscribe(),
        };
        let runtime = self.runtime.clone();
        let task = runtime.spawn(self.run(command_rx));
        (handle, task)
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<UserCommand>) {
        log::debug!("Coordinator task started");
        loop {
            let step = tokio::select! {
                command = commands.recv() => Step::Command(command),
                event = self.next_event() => Step::Event(event),
            };

            match step {
                Step::Command(None | Some(UserCommand::Shutdown)) | Step::Event(None) => break,
                Step::Command(Some(command)) => {
                    if let Err(e) = self.execute(command).await {
                        log::warn!("Command {:?} rejected: {}", command, e);
                    }
                }
                Step::Event(Some(event)) => self.handle_event(event).await,
            }
        }
        self.teardown().await;
        log::debug!("Coordinator task stopped");
    }

    async fn next_event(&mut self) -> Option<CoordinatorEvent> {
        if self.closed {
            return None;
        }
        tokio::select! {
            Some(event) = self.internal_rx.recv() => Some(CoordinatorEvent::Internal(event)),
            Some(delivery) = self.transport_rx.recv() => Some(CoordinatorEvent::Transport(delivery)),
            else => None,
        }
    }

    async fn handle_event(&mut self, event: CoordinatorEvent) {
        match event {
            CoordinatorEvent::Internal(InternalEvent::CaptureCompleted { seq, result }) => {
                self.on_capture_completed(seq, result).await
            }
            CoordinatorEvent::Internal(InternalEvent::ReconnectDue) => self.on_reconnect_due().await,
            CoordinatorEvent::Transport(delivery) => self.on_transport_delivery(delivery).await,
        }
        self.publish();
    }

    // Capture

    fn reconcile(&mut self) {
        let config = CaptureConfigBuilder::build(self.intent, self.tracker.current());
        self.capture_config = config;

        match self.lifecycle.begin(&config) {
            ReconcileStep::Released => self.session.on_stream_lost(),
            ReconcileStep::Unchanged | ReconcileStep::AlreadyPending => {}
            ReconcileStep::Narrowed(kinds) => {
                log::debug!("Narrowed current stream, dropped {:?}", kinds);
            }
            ReconcileStep::Acquire(request) => self.spawn_capture(request),
        }
    }

    fn spawn_capture(&self, request: CaptureRequest) {
        let provider = Arc::clone(&self.provider);
        let events = self.internal_tx.clone();
        self.runtime.spawn(async move {
            let result = provider.request_stream(&request.constraints).await;
            let completed = InternalEvent::CaptureCompleted {
                seq: request.seq,
                result,
            };
            if let Err(mpsc::error::SendError(InternalEvent::CaptureCompleted {
                result: Ok(stream),
                ..
            })) = events.send(completed)
            {
                log::debug!("Coordinator gone, stopping orphaned stream {}", stream.id());
                stream.stop_all();
            }
        });
    }

    /// Close the provider channel and stop streams that were granted but never
    /// handled. Requests still in flight stop their own stream once the send
    /// fails.
    fn stop_queued_captures(&mut self) {
        self.internal_rx.close();
        while let Ok(event) = self.internal_rx.try_recv() {
            if let InternalEvent::CaptureCompleted {
                result: Ok(stream), ..
            } = event
            {
                log::debug!("Stopping unhandled stream {}", stream.id());
                stream.stop_all();
            }
        }
    }

    fn release_kind(&mut self, kind: TrackKind) {
        let stopped = self.lifecycle.release_track_kind(kind);
        if stopped > 0 {
            log::debug!("Stopped {} {} track(s)", stopped, kind);
        }
        if self.lifecycle.current().is_none() {
            self.session.on_stream_lost();
        }
    }

    async fn on_capture_completed(&mut self, seq: u64, result: Result<CaptureStream, CaptureError>) {
        match self.lifecycle.complete(seq, result) {
            ReconcileOutcome::Installed { .. } => {
                self.capture_error = None;
                let actions = self.session.on_stream_ready();
                self.apply(actions).await;
            }
            ReconcileOutcome::Superseded => {}
            ReconcileOutcome::Failed(e) => {
                self.capture_error = Some(e);
            }
        }
    }

    // Signaling

    async fn apply(&mut self, actions: Vec<SessionAction>) {
        for action in actions {
            match action {
                SessionAction::Connect { attempt } => {
                    log::info!(
                        "Connecting to {} (attempt {})",
                        self.config.signaling.server_url,
                        attempt
                    );
                    let sink = TransportSink::new(attempt, self.transport_tx.clone());
                    if let Err(e) = self.transport.connect(sink).await {
                        self.on_transport_lost(e);
                    }
                }
                SessionAction::Emit(message) => {
                    let event = message.event_name(&self.config.signaling.events);
                    let is_join = matches!(message, OutboundMessage::JoinRoom { .. });
                    log::debug!("Emitting '{}'", event);
                    let sent = self.transport.emit(event, message.args()).await;
                    match sent {
                        Ok(()) if is_join => {
                            self.reconnect_attempts = 0;
                            self.transport_error = None;
                        }
                        Ok(()) => {}
                        Err(e) if is_join => {
                            // Undelivered join ends the attempt.
                            log::warn!(
                                "Join for room {} not delivered: {}",
                                self.session.room_code(),
                                e
                            );
                            self.on_transport_lost(e);
                            if let Err(e) = self.transport.disconnect().await {
                                log::warn!("Transport disconnect failed: {}", e);
                            }
                            break;
                        }
                        Err(e) => {
                            log::warn!("Failed to emit '{}': {}", event, e);
                            self.transport_error = Some(e);
                        }
                    }
                }
                SessionAction::Disconnect => {
                    if let Err(e) = self.transport.disconnect().await {
                        log::warn!("Transport disconnect failed: {}", e);
                        self.transport_error = Some(e);
                    }
                }
            }
        }
    }

    async fn on_transport_delivery(&mut self, delivery: TransportDelivery) {
        let live = matches!(
            self.session.state(),
            SessionState::Connecting | SessionState::Joined
        );
        if delivery.attempt != self.session.attempt() || !live {
            log::debug!(
                "Dropping {:?} from stale attempt {} (current {}, {})",
                delivery.event,
                delivery.attempt,
                self.session.attempt(),
                self.session.state()
            );
            return;
        }

        match delivery.event {
            TransportEvent::Connected => {
                let actions = self.session.on_transport_connected();
                self.apply(actions).await;
            }
            TransportEvent::ConnectFailed(reason) => {
                self.on_transport_lost(TransportError::ConnectFailed(reason))
            }
            TransportEvent::Disconnected(reason) => {
                self.on_transport_lost(TransportError::Disconnected(reason))
            }
            TransportEvent::Message { event, payload } => {
                match InboundMessage::parse(&self.config.signaling.events, &event, &payload) {
                    Ok(message) => self.on_inbound(message),
                    Err(ProtocolError::UnknownEvent(name)) => {
                        log::debug!("Ignoring unrelated signaling event '{}'", name);
                    }
                    Err(e) => {
                        log::warn!("Discarding '{}' payload: {}", event, e);
                        self.protocol_error = Some(e);
                    }
                }
            }
        }
    }

    fn on_inbound(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::JoinedRoom(peer) => self.session.on_peer_joined(peer),
            InboundMessage::Roster(peers) => {
                if let Err(e) = self.session.on_roster_received(peers) {
                    log::warn!("Keeping previous roster: {}", e);
                    self.protocol_error = Some(e);
                }
            }
            InboundMessage::PeerLeft(peer) => {
                self.session.on_peer_disconnected(&peer);
            }
        }
    }

    fn on_transport_lost(&mut self, error: TransportError) {
        log::warn!("Signaling transport lost: {}", error);
        self.transport_error = Some(error);
        if self.session.on_transport_disconnected() {
            self.schedule_reconnect();
        }
    }

    fn schedule_reconnect(&mut self) {
        let policy = &self.config.reconnect;
        if !policy.auto_reconnect || !self.session.join_requested() {
            return;
        }
        if self.reconnect_attempts >= policy.max_attempts {
            log::warn!(
                "Giving up on room {} after {} reconnect attempt(s)",
                self.session.room_code(),
                self.reconnect_attempts
            );
            return;
        }

        self.reconnect_attempts += 1;
        let delay = Duration::from_millis(policy.delay_ms);
        log::info!(
            "Rejoining in {:?} (attempt {}/{})",
            delay,
            self.reconnect_attempts,
            policy.max_attempts
        );
        let events = self.internal_tx.clone();
        self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(InternalEvent::ReconnectDue);
        });
    }

    async fn on_reconnect_due(&mut self) {
        if self.closed
            || self.session.state() != SessionState::Disconnected
            || !self.session.join_requested()
        {
            log::debug!("Reconnect no longer needed ({})", self.session.state());
            return;
        }
        let actions = self.session.request_join();
        self.apply(actions).await;
    }

    fn ensure_open(&self) -> Result<(), CoordinatorError> {
        if self.closed {
            Err(CoordinatorError::Closed)
        } else {
            Ok(())
        }
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(CoordinatorSnapshot {
            intent: self.intent,
            aspect_ratio: self.tracker.current(),
            capture_config: self.capture_config,
            capture_stream: self.lifecycle.current().cloned(),
            capture_pending: self.lifecycle.pending().is_some(),
            session_state: self.session.state(),
            peer_roster: self.session.roster().iter().cloned().collect(),
            last_announced_peer: self.session.last_announced_peer().cloned(),
            capture_error: self.capture_error.clone(),
            transport_error: self.transport_error.clone(),
            protocol_error: self.protocol_error.clone(),
        });
    }
}

impl Drop for Coordinator {
    fn drop(&mut self) {
        self.stop_queued_captures();
    }
}

/// Cloneable handle to a coordinator running on its own task.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    commands: mpsc::UnboundedSender<UserCommand>,
    snapshots: watch::Receiver<CoordinatorSnapshot>,
}

impl CoordinatorHandle {
    pub fn send(&self, command: UserCommand) -> Result<(), CoordinatorError> {
        self.commands
            .send(command)
            .map_err(|_| CoordinatorError::Closed)
    }

    pub fn toggle_mic(&self) -> Result<(), CoordinatorError> {
        self.send(UserCommand::ToggleMic)
    }

    pub fn toggle_cam(&self) -> Result<(), CoordinatorError> {
        self.send(UserCommand::ToggleCam)
    }

    pub fn report_surface_size(&self, width: f64, height: f64) -> Result<(), CoordinatorError> {
        self.send(UserCommand::ReportSurfaceSize { width, height })
    }

    pub fn request_join(&self) -> Result<(), CoordinatorError> {
        self.send(UserCommand::RequestJoin)
    }

    pub fn withdraw_join(&self) -> Result<(), CoordinatorError> {
        self.send(UserCommand::WithdrawJoin)
    }

    pub fn leave(&self) -> Result<(), CoordinatorError> {
        self.send(UserCommand::Leave)
    }

    pub fn shutdown(&self) -> Result<(), CoordinatorError> {
        self.send(UserCommand::Shutdown)
    }

    pub fn snapshot(&self) -> CoordinatorSnapshot {
        self.snapshots.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<CoordinatorSnapshot> {
        self.snapshots.clone()
    }

    /// Wait until a published snapshot satisfies `predicate`.
    pub async fn wait_for<F>(&self, predicate: F) -> Result<CoordinatorSnapshot, CoordinatorError>
    where
        F: FnMut(&CoordinatorSnapshot) -> bool,
    {
        let mut snapshots = self.snapshots.clone();
        let snapshot = snapshots
            .wait_for(predicate)
            .await
            .map_err(|_| CoordinatorError::Closed)?
            .clone();
        Ok(snapshot)
    }
}
