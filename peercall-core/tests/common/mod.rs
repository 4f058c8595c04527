//! Shared test doubles for the controller integration tests.
#![allow(dead_code)]
#![allow(clippy::unwrap_used)]

use async_trait::async_trait;
use parking_lot::Mutex;
use peercall_core::media::{CaptureFailure, CaptureProfile, LocalTrack, LocalTracks, MediaCapture};
use peercall_core::negotiation::{
    CandidateInit, ConnectionState, NegotiationConfig, NegotiationError, NegotiatorCallbacks,
    NegotiatorFactory, OfferConstraints, PeerNegotiator, SessionDescription,
};
use peercall_core::signaling::{InboundSignal, SignalMessage, SignalingTransport, TransportError};
use peercall_core::types::{CallPhase, RemoteTrack, TrackKind};
use peercall_core::PartyId;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "debug".into()),
        )
        .with_test_writer()
        .try_init();
}

// ---- capture ----

pub struct TestTrack {
    id: String,
    kind: TrackKind,
    enabled: AtomicBool,
    stops: Arc<AtomicUsize>,
}

impl TestTrack {
    pub fn boxed(kind: TrackKind, stops: &Arc<AtomicUsize>) -> Box<dyn LocalTrack> {
        Box::new(Self {
            id: format!("{kind:?}").to_lowercase(),
            kind,
            enabled: AtomicBool::new(true),
            stops: Arc::clone(stops),
        })
    }
}

impl LocalTrack for TestTrack {
    fn id(&self) -> &str {
        &self.id
    }
    fn kind(&self) -> TrackKind {
        self.kind
    }
    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }
    fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }
    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }
}

pub enum CaptureResponse {
    Grant,
    Fail(&'static str),
}

/// Capture double scripted with a queue of responses. An empty queue grants.
pub struct MockCapture {
    script: Mutex<VecDeque<CaptureResponse>>,
    pub requests: Mutex<Vec<CaptureProfile>>,
    pub stops: Arc<AtomicUsize>,
    delay: Option<Duration>,
}

impl MockCapture {
    pub fn granting() -> Arc<Self> {
        Self::scripted(vec![])
    }

    pub fn scripted(script: Vec<CaptureResponse>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
            stops: Arc::new(AtomicUsize::new(0)),
            delay: None,
        })
    }

    /// Grant after a delay, for races between acquisition and hangup.
    pub fn granting_after(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            stops: Arc::new(AtomicUsize::new(0)),
            delay: Some(delay),
        })
    }

    fn grant(&self, profile: CaptureProfile) -> LocalTracks {
        let mut tracks = vec![TestTrack::boxed(TrackKind::Audio, &self.stops)];
        if profile.video {
            tracks.push(TestTrack::boxed(TrackKind::Video, &self.stops));
        }
        LocalTracks::new(tracks)
    }
}

#[async_trait]
impl MediaCapture for MockCapture {
    async fn request(&self, profile: CaptureProfile) -> Result<LocalTracks, CaptureFailure> {
        self.requests.lock().push(profile);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.script.lock().pop_front() {
            None | Some(CaptureResponse::Grant) => Ok(self.grant(profile)),
            Some(CaptureResponse::Fail(name)) => Err(CaptureFailure::new(name)),
        }
    }
}

// ---- negotiator ----

/// Negotiator double recording the order of operations and exposing its
/// registered callbacks so tests can fire engine events.
#[derive(Default)]
pub struct MockNegotiator {
    pub applied_candidates: Mutex<Vec<String>>,
    pub remote_descriptions: Mutex<Vec<SessionDescription>>,
    pub local_descriptions: Mutex<Vec<SessionDescription>>,
    pub close_count: AtomicUsize,
    pub attached_tracks: AtomicUsize,
    callbacks: Mutex<Option<NegotiatorCallbacks>>,
}

impl MockNegotiator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn fire_connection_state(&self, state: ConnectionState) {
        if let Some(cb) = self.callbacks.lock().as_ref() {
            (cb.on_connection_state)(state);
        }
    }

    pub fn fire_local_candidate(&self, line: &str) {
        if let Some(cb) = self.callbacks.lock().as_ref() {
            (cb.on_local_candidate)(CandidateInit {
                candidate: line.to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            });
        }
    }

    pub fn fire_remote_track(&self, track: RemoteTrack) {
        if let Some(cb) = self.callbacks.lock().as_ref() {
            (cb.on_remote_track)(track);
        }
    }

    pub fn has_callbacks(&self) -> bool {
        self.callbacks.lock().is_some()
    }
}

#[async_trait]
impl PeerNegotiator for MockNegotiator {
    fn set_callbacks(&self, callbacks: NegotiatorCallbacks) {
        *self.callbacks.lock() = Some(callbacks);
    }
    fn clear_callbacks(&self) {
        *self.callbacks.lock() = None;
    }
    async fn attach_local_tracks(&self, _tracks: &LocalTracks) -> Result<(), NegotiationError> {
        self.attached_tracks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn create_offer(
        &self,
        _constraints: OfferConstraints,
    ) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::offer("mock-offer"))
    }
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError> {
        Ok(SessionDescription::answer("mock-answer"))
    }
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.local_descriptions.lock().push(description);
        Ok(())
    }
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError> {
        self.remote_descriptions.lock().push(description);
        Ok(())
    }
    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError> {
        self.applied_candidates.lock().push(candidate.candidate);
        Ok(())
    }
    async fn close(&self) {
        self.close_count.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct MockFactory {
    negotiator: Arc<MockNegotiator>,
}

impl MockFactory {
    pub fn new(negotiator: Arc<MockNegotiator>) -> Arc<Self> {
        Arc::new(Self { negotiator })
    }
}

#[async_trait]
impl NegotiatorFactory for MockFactory {
    async fn create(
        &self,
        _config: &NegotiationConfig,
    ) -> Result<Arc<dyn PeerNegotiator>, NegotiationError> {
        Ok(self.negotiator.clone())
    }
}

// ---- transport ----

/// Transport double with a sent-message log, an inbound channel, and a
/// scripted number of send failures.
pub struct MockTransport {
    pub sent: Mutex<Vec<(PartyId, SignalMessage)>>,
    pub send_attempts: AtomicUsize,
    fail_sends_remaining: AtomicUsize,
    connected_after_checks: usize,
    connection_checks: AtomicUsize,
    inbound_tx: mpsc::UnboundedSender<InboundSignal>,
    inbound_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<InboundSignal>>,
}

impl MockTransport {
    pub fn new() -> Arc<Self> {
        Self::failing_first(0)
    }

    /// Fail the first `n` sends with `SendFailed`, then succeed.
    pub fn failing_first(n: usize) -> Arc<Self> {
        Self::build(n, 0)
    }

    /// Report not-connected for the first `n` connection checks.
    pub fn disconnected_for(n: usize) -> Arc<Self> {
        Self::build(0, n)
    }

    fn build(fail_sends: usize, disconnected_checks: usize) -> Arc<Self> {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            send_attempts: AtomicUsize::new(0),
            fail_sends_remaining: AtomicUsize::new(fail_sends),
            connected_after_checks: disconnected_checks,
            connection_checks: AtomicUsize::new(0),
            inbound_tx,
            inbound_rx: tokio::sync::Mutex::new(inbound_rx),
        })
    }

    pub fn inject(&self, from: &str, message: SignalMessage) {
        let _ = self.inbound_tx.send(InboundSignal {
            from: PartyId::new(from),
            message,
        });
    }

    pub fn sent_kinds(&self) -> Vec<&'static str> {
        self.sent.lock().iter().map(|(_, m)| m.kind()).collect()
    }
}

#[async_trait]
impl SignalingTransport for MockTransport {
    fn is_connected(&self) -> bool {
        self.connection_checks.fetch_add(1, Ordering::SeqCst) >= self.connected_after_checks
    }

    async fn send(&self, to: &PartyId, message: SignalMessage) -> Result<(), TransportError> {
        self.send_attempts.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_sends_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_sends_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::SendFailed("scripted failure".to_string()));
        }
        self.sent.lock().push((to.clone(), message));
        Ok(())
    }

    async fn next_message(&self) -> Result<InboundSignal, TransportError> {
        self.inbound_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Closed)
    }
}

// ---- helpers ----

/// Wait until the phase watch shows `phase`, with a test timeout.
pub async fn wait_for_phase(rx: &mut watch::Receiver<CallPhase>, phase: CallPhase) {
    tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if *rx.borrow() == phase {
                return;
            }
            rx.changed().await.unwrap();
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {phase:?}, at {:?}", *rx.borrow()));
}
