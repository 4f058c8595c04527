//! Call controller: the operation surface and event table
//!
//! One controller per device. It drives the session store through user
//! operations (initiate, answer, reject, end, toggles), inbound signaling,
//! and negotiation engine callbacks. Every asynchronous continuation carries
//! the call id it belongs to and is validated against the live session
//! before touching state, so completions from a torn-down call are dropped.

use crate::identity::{PartyId, PartyInfo};
use crate::media::{MediaAcquirer, MediaCapture, MediaError};
use crate::negotiation::{
    CandidateInit, ConnectionState, EngineEvent, EngineSignal, NegotiationConfig,
    NegotiationEngine, NegotiationError, NegotiatorFactory, SessionDescription,
};
use crate::retry::RetryPolicy;
use crate::session::{SessionStore, TeardownResources};
use crate::signaling::{
    InboundSignal, SignalMessage, SignalingAdapter, SignalingTransport, TransportError,
};
use crate::types::{
    CallEvent, CallFailure, CallId, CallPhase, CallRole, FailureKind, MediaKind, PhaseEvent,
    TrackKind,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, trace, warn};

/// Errors surfaced by controller operations.
#[derive(Debug, thiserror::Error)]
pub enum CallError {
    /// Media acquisition failed
    #[error(transparent)]
    Media(#[from] MediaError),
    /// Signaling transport failed after retries
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The negotiating object failed
    #[error(transparent)]
    Negotiation(#[from] NegotiationError),
    /// The operation needs a live call and there is none
    #[error("no active call")]
    NoActiveCall,
    /// The operation is not valid in the current phase
    #[error("operation not valid in phase {0:?}")]
    InvalidPhase(CallPhase),
    /// Track toggles need acquired local tracks
    #[error("no local tracks available")]
    NoLocalTracks,
}

/// Controller configuration.
#[derive(Debug, Clone)]
pub struct CallConfig {
    /// This device's party info, used as caller/receiver info on the wire
    pub local_party: PartyInfo,
    /// Negotiator server configuration
    pub negotiation: NegotiationConfig,
    /// Retry schedule for signaling emits
    pub emit_retry: RetryPolicy,
    /// How long terminal phases caused by the remote side or the network
    /// linger before teardown, so the UI can observe the failure
    pub terminal_linger: Duration,
}

impl CallConfig {
    /// Config with default negotiation, retry, and linger settings
    #[must_use]
    pub fn new(local_party: PartyInfo) -> Self {
        Self {
            local_party,
            negotiation: NegotiationConfig::default(),
            emit_retry: RetryPolicy::default(),
            terminal_linger: Duration::from_secs(2),
        }
    }
}

/// Outcome of a retried signaling emit.
enum EmitOutcome {
    /// The message went out
    Sent,
    /// The session changed under us; the emit was abandoned
    Stale,
    /// Every attempt failed
    Exhausted(TransportError),
}

/// Builder for [`CallController`].
pub struct CallControllerBuilder {
    transport: Arc<dyn SignalingTransport>,
    capture: Arc<dyn MediaCapture>,
    factory: Arc<dyn NegotiatorFactory>,
    config: Option<CallConfig>,
}

impl CallControllerBuilder {
    /// Override the default configuration
    #[must_use]
    pub fn with_config(mut self, config: CallConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Build the controller. `local_party` is required when no config was
    /// supplied.
    pub fn build(self, local_party: PartyInfo) -> Arc<CallController> {
        let config = self.config.unwrap_or_else(|| CallConfig::new(local_party));
        let (engine_tx, engine_rx) = mpsc::unbounded_channel();
        Arc::new(CallController {
            config,
            session: Arc::new(SessionStore::new()),
            transport: Arc::clone(&self.transport),
            acquirer: MediaAcquirer::new(self.capture),
            factory: self.factory,
            adapter: SignalingAdapter::new(self.transport),
            engine_tx,
            engine_rx: parking_lot::Mutex::new(Some(engine_rx)),
        })
    }
}

/// Drives call sessions over the injected collaborators.
pub struct CallController {
    config: CallConfig,
    session: Arc<SessionStore>,
    transport: Arc<dyn SignalingTransport>,
    acquirer: MediaAcquirer,
    factory: Arc<dyn NegotiatorFactory>,
    adapter: SignalingAdapter,
    engine_tx: mpsc::UnboundedSender<EngineEvent>,
    engine_rx: parking_lot::Mutex<Option<mpsc::UnboundedReceiver<EngineEvent>>>,
}

impl CallController {
    /// Start building a controller from its collaborators
    #[must_use]
    pub fn builder(
        transport: Arc<dyn SignalingTransport>,
        capture: Arc<dyn MediaCapture>,
        factory: Arc<dyn NegotiatorFactory>,
    ) -> CallControllerBuilder {
        CallControllerBuilder {
            transport,
            capture,
            factory,
            config: None,
        }
    }

    /// Attach the signaling pump and the engine event pump. Idempotent.
    pub fn start(self: &Arc<Self>) {
        self.adapter.attach(Arc::clone(self));
        if let Some(mut rx) = self.engine_rx.lock().take() {
            let controller = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    controller.handle_engine_event(event).await;
                }
            });
        }
    }

    /// The session store, for phase watches and event subscriptions
    #[must_use]
    pub fn session(&self) -> &Arc<SessionStore> {
        &self.session
    }

    /// This device's party info
    #[must_use]
    pub fn local_party(&self) -> &PartyInfo {
        &self.config.local_party
    }

    // ---- user operations ----

    /// Start an outbound call to `receiver`.
    ///
    /// Any live session is torn down first. The offer emit is retried with
    /// backoff; exhaustion fails the new call with a transport reason.
    #[instrument(skip(self, receiver), fields(receiver_id = %receiver.id))]
    pub async fn initiate(
        self: &Arc<Self>,
        receiver: PartyInfo,
        media_kind: MediaKind,
    ) -> Result<CallId, CallError> {
        if let Some(old_id) = self.session.current_call_id() {
            // Same path as a user hangup, so the old remote party is told.
            info!(old_call = %old_id, "replacing existing session");
            let _ = self.end().await;
        }

        let call_id = CallId::generate(&self.config.local_party.id, &receiver.id);
        self.session
            .begin(
                call_id.clone(),
                CallRole::Caller,
                media_kind,
                self.config.local_party.clone(),
                receiver.clone(),
            )
            .map_err(|_| CallError::InvalidPhase(self.session.phase()))?;
        info!(call_id = %call_id, ?media_kind, "initiating call");

        let offer = SignalMessage::CallOffer {
            caller_id: self.config.local_party.id.clone(),
            receiver_id: receiver.id.clone(),
            call_id: call_id.clone(),
            caller_info: self.config.local_party.clone(),
            media_kind,
        };
        match self.emit_with_retry(&call_id, &receiver.id, offer).await {
            EmitOutcome::Sent | EmitOutcome::Stale => Ok(call_id),
            EmitOutcome::Exhausted(e) => {
                self.fail_call(&call_id, FailureKind::Transport, "transport unavailable")
                    .await;
                Err(e.into())
            }
        }
    }

    /// Answer the ringing call: acquire media, open the engine, apply any
    /// buffered session offer, and signal acceptance.
    #[instrument(skip(self))]
    pub async fn answer(self: &Arc<Self>) -> Result<(), CallError> {
        let snapshot = self.session.snapshot().ok_or(CallError::NoActiveCall)?;
        let call_id = snapshot.call_id.clone();
        self.session
            .apply(&call_id, &PhaseEvent::Answer)
            .ok_or(CallError::InvalidPhase(snapshot.phase))?;

        let media = match self.acquirer.acquire(snapshot.media_kind).await {
            Ok(media) => media,
            Err(e) => {
                self.fail_call(&call_id, FailureKind::Media, &e.to_string())
                    .await;
                return Err(e.into());
            }
        };
        // Acquisition may have raced with a hangup.
        if !self.session.is_current(&call_id) {
            trace!(call_id = %call_id, "session gone after acquisition, dropping tracks");
            media.tracks.stop_all();
            return Err(CallError::NoActiveCall);
        }
        if media.kind != snapshot.media_kind {
            self.session.set_media_kind(&call_id, media.kind);
            self.session.emit(CallEvent::MediaDowngraded {
                call_id: call_id.clone(),
            });
        }

        let engine = match self
            .open_engine_and_store(&call_id, media.kind, media.tracks)
            .await
        {
            Ok(engine) => engine,
            Err(e) => {
                self.fail_call(&call_id, FailureKind::Negotiation, &e.to_string())
                    .await;
                return Err(e.into());
            }
        };

        // An offer that beat our answer is now applied.
        if let Some(offer) = self.session.take_pending_offer(&call_id) {
            self.answer_session_offer(&call_id, &snapshot.remote_party.id, &engine, offer)
                .await?;
        }

        let accepted = SignalMessage::CallAccepted {
            call_id: call_id.clone(),
            receiver_info: self.config.local_party.clone(),
        };
        match self
            .emit_with_retry(&call_id, &snapshot.remote_party.id, accepted)
            .await
        {
            EmitOutcome::Sent => {}
            EmitOutcome::Stale => return Err(CallError::NoActiveCall),
            EmitOutcome::Exhausted(e) => {
                self.fail_call(&call_id, FailureKind::Transport, "transport unavailable")
                    .await;
                return Err(e.into());
            }
        }
        self.session.apply(&call_id, &PhaseEvent::SetupComplete);
        Ok(())
    }

    /// Decline the ringing call.
    #[instrument(skip(self))]
    pub async fn reject(self: &Arc<Self>) -> Result<(), CallError> {
        let snapshot = self.session.snapshot().ok_or(CallError::NoActiveCall)?;
        let call_id = snapshot.call_id.clone();
        self.session
            .apply(&call_id, &PhaseEvent::Reject)
            .ok_or(CallError::InvalidPhase(snapshot.phase))?;
        self.send_best_effort(
            &snapshot.remote_party.id,
            SignalMessage::CallRejected {
                call_id: call_id.clone(),
            },
        )
        .await;
        teardown_session(&self.session, &call_id).await;
        Ok(())
    }

    /// Hang up. Valid from any non-idle phase.
    #[instrument(skip(self))]
    pub async fn end(self: &Arc<Self>) -> Result<(), CallError> {
        let snapshot = self.session.snapshot().ok_or(CallError::NoActiveCall)?;
        let call_id = snapshot.call_id.clone();
        if self.session.apply(&call_id, &PhaseEvent::End).is_some() {
            self.send_best_effort(
                &snapshot.remote_party.id,
                SignalMessage::CallEnded {
                    call_id: call_id.clone(),
                    participant_id: self.config.local_party.id.clone(),
                },
            )
            .await;
        }
        teardown_session(&self.session, &call_id).await;
        Ok(())
    }

    /// Mute or unmute the camera track. No renegotiation.
    pub fn toggle_video(&self) -> Result<bool, CallError> {
        self.session
            .toggle_track(TrackKind::Video)
            .ok_or(CallError::NoLocalTracks)
    }

    /// Mute or unmute the microphone track. No renegotiation.
    pub fn toggle_audio(&self) -> Result<bool, CallError> {
        self.session
            .toggle_track(TrackKind::Audio)
            .ok_or(CallError::NoLocalTracks)
    }

    // ---- inbound signaling ----

    /// Dispatch one inbound wire message.
    pub async fn handle_signal(self: &Arc<Self>, inbound: InboundSignal) {
        let from = inbound.from;
        match inbound.message {
            SignalMessage::CallOffer {
                caller_id,
                call_id,
                caller_info,
                media_kind,
                ..
            } => {
                self.on_call_offer(from, caller_id, call_id, caller_info, media_kind)
                    .await;
            }
            SignalMessage::CallAccepted {
                call_id,
                receiver_info,
            } => self.on_call_accepted(call_id, receiver_info).await,
            SignalMessage::CallRejected { call_id } => self.on_call_rejected(call_id).await,
            SignalMessage::CallEnded { call_id, .. } => self.on_call_ended(call_id).await,
            SignalMessage::SessionOffer {
                description,
                sender_id,
                call_id,
                ..
            } => self.on_session_offer(call_id, sender_id, description).await,
            SignalMessage::SessionAnswer {
                description,
                call_id,
                ..
            } => self.on_session_answer(call_id, description).await,
            SignalMessage::IceCandidate {
                candidate, call_id, ..
            } => self.on_ice_candidate(call_id, candidate).await,
            SignalMessage::CallFailed { call_id, reason } => {
                self.on_call_failed(call_id, reason).await;
            }
        }
    }

    async fn on_call_offer(
        self: &Arc<Self>,
        from: PartyId,
        caller_id: PartyId,
        call_id: CallId,
        caller_info: PartyInfo,
        media_kind: MediaKind,
    ) {
        if let Some(live) = self.session.current_call_id() {
            if live != call_id {
                // Busy: auto-reject the intruding call, leave ours alone.
                info!(call_id = %call_id, live_call = %live, "busy, auto-rejecting offer");
                self.send_best_effort(
                    &caller_id,
                    SignalMessage::CallRejected {
                        call_id: call_id.clone(),
                    },
                )
                .await;
            }
            return;
        }
        if from != caller_id {
            warn!(call_id = %call_id, %from, claimed = %caller_id, "offer sender mismatch, ignoring");
            return;
        }
        if self
            .session
            .begin(
                call_id.clone(),
                CallRole::Callee,
                media_kind,
                self.config.local_party.clone(),
                caller_info.clone(),
            )
            .is_err()
        {
            return;
        }
        info!(call_id = %call_id, caller = %caller_id, ?media_kind, "incoming call");
        self.session.emit(CallEvent::IncomingCall {
            call_id,
            caller: caller_info,
            media_kind,
        });
    }

    async fn on_call_accepted(self: &Arc<Self>, call_id: CallId, receiver_info: PartyInfo) {
        let Some(phase) = self.session.apply(&call_id, &PhaseEvent::RemoteAccepted) else {
            trace!(call_id = %call_id, "stale or invalid call-accepted dropped");
            return;
        };
        debug!(call_id = %call_id, ?phase, "callee accepted");
        self.session.set_remote_party(&call_id, receiver_info.clone());

        let Some(snapshot) = self.session.snapshot() else {
            return;
        };
        let media = match self.acquirer.acquire(snapshot.media_kind).await {
            Ok(media) => media,
            Err(e) => {
                self.fail_call(&call_id, FailureKind::Media, &e.to_string())
                    .await;
                return;
            }
        };
        if !self.session.is_current(&call_id) {
            media.tracks.stop_all();
            return;
        }
        if media.kind != snapshot.media_kind {
            self.session.set_media_kind(&call_id, media.kind);
            self.session.emit(CallEvent::MediaDowngraded {
                call_id: call_id.clone(),
            });
        }

        let engine = match self
            .open_engine_and_store(&call_id, media.kind, media.tracks)
            .await
        {
            Ok(engine) => engine,
            Err(e) => {
                self.fail_call(&call_id, FailureKind::Negotiation, &e.to_string())
                    .await;
                return;
            }
        };

        let offer = match engine.create_offer().await {
            Ok(offer) => offer,
            Err(e) => {
                self.fail_call(&call_id, FailureKind::Negotiation, &e.to_string())
                    .await;
                return;
            }
        };
        let message = SignalMessage::SessionOffer {
            description: offer,
            sender_id: self.config.local_party.id.clone(),
            receiver_id: receiver_info.id.clone(),
            call_id: call_id.clone(),
        };
        if let EmitOutcome::Exhausted(_) = self
            .emit_with_retry(&call_id, &receiver_info.id, message)
            .await
        {
            self.fail_call(&call_id, FailureKind::Transport, "transport unavailable")
                .await;
        }
    }

    async fn on_call_rejected(self: &Arc<Self>, call_id: CallId) {
        if self
            .session
            .apply(&call_id, &PhaseEvent::RemoteRejected)
            .is_none()
        {
            return;
        }
        self.session.emit(CallEvent::CallRejected {
            call_id: call_id.clone(),
        });
        self.schedule_teardown(call_id, self.config.terminal_linger);
    }

    async fn on_call_ended(self: &Arc<Self>, call_id: CallId) {
        if self
            .session
            .apply(&call_id, &PhaseEvent::RemoteEnded)
            .is_none()
        {
            return;
        }
        self.session.emit(CallEvent::CallEnded {
            call_id: call_id.clone(),
        });
        teardown_session(&self.session, &call_id).await;
    }

    async fn on_session_offer(
        self: &Arc<Self>,
        call_id: CallId,
        sender_id: PartyId,
        description: SessionDescription,
    ) {
        if !self.accepts_session_traffic(&call_id) {
            trace!(call_id = %call_id, "session-offer for stale or terminal call dropped");
            return;
        }
        match self.session.engine(&call_id) {
            Some(engine) => {
                if let Err(e) = self
                    .answer_session_offer(&call_id, &sender_id, &engine, description)
                    .await
                {
                    warn!(call_id = %call_id, error = %e, "failed to answer session offer");
                }
            }
            // The offer beat our local answer; keep it for `answer()`.
            None => self.session.buffer_remote_offer(&call_id, description),
        }
    }

    async fn on_session_answer(self: &Arc<Self>, call_id: CallId, description: SessionDescription) {
        if !self.accepts_session_traffic(&call_id) {
            trace!(call_id = %call_id, "session-answer for stale or terminal call dropped");
            return;
        }
        let Some(engine) = self.session.engine(&call_id) else {
            trace!(call_id = %call_id, "session-answer with no engine dropped");
            return;
        };
        if let Err(e) = engine.apply_answer(description).await {
            self.fail_call(&call_id, FailureKind::Negotiation, &e.to_string())
                .await;
        }
    }

    async fn on_ice_candidate(self: &Arc<Self>, call_id: CallId, candidate: CandidateInit) {
        if !self.accepts_session_traffic(&call_id) {
            trace!(call_id = %call_id, "candidate for stale or terminal call dropped");
            return;
        }
        match self.session.engine(&call_id) {
            Some(engine) => engine.add_remote_candidate(candidate).await,
            None => {
                self.session.queue_remote_candidate(&call_id, candidate);
                // The engine may have been installed while we queued.
                if let Some(engine) = self.session.engine(&call_id) {
                    self.flush_queued_candidates(&call_id, &engine).await;
                }
            }
        }
    }

    async fn on_call_failed(self: &Arc<Self>, call_id: CallId, reason: String) {
        self.fail_call(&call_id, FailureKind::Remote, &reason).await;
    }

    // ---- engine events ----

    async fn handle_engine_event(self: &Arc<Self>, event: EngineEvent) {
        let call_id = event.call_id;
        if !self.session.is_current(&call_id) {
            trace!(call_id = %call_id, "engine event for stale call dropped");
            return;
        }
        match event.signal {
            EngineSignal::LocalCandidate(candidate) => {
                let Some(snapshot) = self.session.snapshot() else {
                    return;
                };
                // Forwarded immediately, one message per candidate.
                self.send_best_effort(
                    &snapshot.remote_party.id,
                    SignalMessage::IceCandidate {
                        candidate,
                        sender_id: self.config.local_party.id.clone(),
                        receiver_id: snapshot.remote_party.id.clone(),
                        call_id,
                    },
                )
                .await;
            }
            EngineSignal::RemoteTrack(track) => {
                self.session.push_remote_track(&call_id, track.clone());
                self.session
                    .emit(CallEvent::RemoteTrackAdded { call_id, track });
            }
            EngineSignal::ConnectionState(state) => {
                self.on_connection_state(call_id, state).await;
            }
        }
    }

    async fn on_connection_state(self: &Arc<Self>, call_id: CallId, state: ConnectionState) {
        let phase = self.session.phase();
        match state {
            ConnectionState::Connected => {
                self.session.apply(&call_id, &PhaseEvent::LinkConnected);
            }
            ConnectionState::Failed | ConnectionState::Disconnected
                if matches!(phase, CallPhase::Connecting | CallPhase::Active) =>
            {
                self.fail_call(&call_id, FailureKind::Negotiation, "connection lost")
                    .await;
            }
            _ => {
                trace!(call_id = %call_id, ?state, ?phase, "connection state ignored");
            }
        }
    }

    // ---- internals ----

    /// Whether `call_id` names the live session and it still accepts session
    /// traffic. Terminal phases linger for UI observation but descriptions
    /// and candidates arriving in that window must not reach the engine.
    fn accepts_session_traffic(&self, call_id: &CallId) -> bool {
        self.session.is_current(call_id) && !self.session.phase().is_terminal()
    }

    async fn open_engine_and_store(
        self: &Arc<Self>,
        call_id: &CallId,
        media_kind: MediaKind,
        tracks: crate::media::LocalTracks,
    ) -> Result<Arc<NegotiationEngine>, NegotiationError> {
        let engine = Arc::new(
            NegotiationEngine::open(
                self.factory.as_ref(),
                &self.config.negotiation,
                call_id.clone(),
                media_kind,
                &tracks,
                self.engine_tx.clone(),
            )
            .await?,
        );
        if let Err((tracks, engine)) =
            self.session
                .install_media(call_id, tracks, Arc::clone(&engine))
        {
            // Session was torn down while we were opening; release and bail.
            tracks.stop_all();
            engine.close().await;
            return Err(NegotiationError::Setup("session gone".to_string()));
        }
        self.flush_queued_candidates(call_id, &engine).await;
        Ok(engine)
    }

    /// Transfer session-level queued candidates into the engine, in order.
    async fn flush_queued_candidates(&self, call_id: &CallId, engine: &Arc<NegotiationEngine>) {
        let queued = self.session.take_queued_candidates(call_id);
        for candidate in queued {
            engine.add_remote_candidate(candidate).await;
        }
    }

    async fn answer_session_offer(
        self: &Arc<Self>,
        call_id: &CallId,
        remote: &PartyId,
        engine: &Arc<NegotiationEngine>,
        offer: SessionDescription,
    ) -> Result<(), CallError> {
        let answer = match engine.create_answer(offer).await {
            Ok(answer) => answer,
            Err(e) => {
                self.fail_call(call_id, FailureKind::Negotiation, &e.to_string())
                    .await;
                return Err(e.into());
            }
        };
        let message = SignalMessage::SessionAnswer {
            description: answer,
            sender_id: self.config.local_party.id.clone(),
            receiver_id: remote.clone(),
            call_id: call_id.clone(),
        };
        match self.emit_with_retry(call_id, remote, message).await {
            EmitOutcome::Sent | EmitOutcome::Stale => Ok(()),
            EmitOutcome::Exhausted(e) => {
                self.fail_call(call_id, FailureKind::Transport, "transport unavailable")
                    .await;
                Err(e.into())
            }
        }
    }

    /// Send with bounded backoff. Each attempt re-checks that `call_id` is
    /// still the live session so `end()`/`reject()` cancel in-flight retries.
    async fn emit_with_retry(
        &self,
        call_id: &CallId,
        to: &PartyId,
        message: SignalMessage,
    ) -> EmitOutcome {
        let result = self
            .config
            .emit_retry
            .run(|attempt| {
                let transport = Arc::clone(&self.transport);
                let session = Arc::clone(&self.session);
                let call_id = call_id.clone();
                let to = to.clone();
                let message = message.clone();
                async move {
                    if !session.is_current(&call_id) {
                        trace!(call_id = %call_id, attempt, "emit abandoned, session changed");
                        return Ok(EmitOutcome::Stale);
                    }
                    if !transport.is_connected() {
                        return Err(TransportError::NotConnected);
                    }
                    transport
                        .send(&to, message)
                        .await
                        .map(|()| EmitOutcome::Sent)
                }
            })
            .await;
        match result {
            Ok(outcome) => outcome,
            Err(e) => EmitOutcome::Exhausted(e),
        }
    }

    /// One-shot send for abort paths where failure changes nothing.
    async fn send_best_effort(&self, to: &PartyId, message: SignalMessage) {
        if let Err(e) = self.transport.send(to, message).await {
            debug!(to = %to, error = %e, "best-effort send failed");
        }
    }

    /// Transition to Failed with `last_error` set, emit the failure event,
    /// and tear down after the configured linger so the reason stays
    /// observable.
    async fn fail_call(self: &Arc<Self>, call_id: &CallId, kind: FailureKind, message: &str) {
        let failure = CallFailure::new(kind, message);
        if self.session.fail(call_id, failure.clone()).is_none() {
            return;
        }
        self.session.emit(CallEvent::CallFailed {
            call_id: call_id.clone(),
            failure,
        });
        self.schedule_teardown(call_id.clone(), self.config.terminal_linger);
    }

    /// Tear down after a delay so the UI can observe the terminal state.
    fn schedule_teardown(&self, call_id: CallId, linger: Duration) {
        let session = Arc::clone(&self.session);
        tokio::spawn(async move {
            tokio::time::sleep(linger).await;
            teardown_session(&session, &call_id).await;
        });
    }
}

impl std::fmt::Debug for CallController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallController")
            .field("local_party", &self.config.local_party.id)
            .field("phase", &self.session.phase())
            .finish_non_exhaustive()
    }
}

/// Release the session's resources and return the store to idle.
///
/// Resources are moved out under the store lock, then stopped and closed
/// outside it; a racing teardown finds nothing to take, which is what makes
/// every path through here idempotent.
pub(crate) async fn teardown_session(session: &Arc<SessionStore>, call_id: &CallId) {
    if let Some(TeardownResources { tracks, engine }) = session.take_teardown(call_id) {
        if let Some(tracks) = tracks {
            tracks.stop_all();
        }
        if let Some(engine) = engine {
            engine.close().await;
        }
    }
    session.clear(call_id);
}
