//! Peer negotiation engine
//!
//! The negotiating object itself (description exchange, connectivity checks,
//! media transport) is opaque to this crate and abstracted behind
//! [`PeerNegotiator`]; the embedding application builds one through a
//! [`NegotiatorFactory`]. The [`NegotiationEngine`] wraps exactly one
//! negotiator per call and owns the ordering hazards around it: candidates
//! that arrive before the remote description are queued and replayed exactly
//! once, in arrival order, and everything after `close` is discarded.

use crate::media::LocalTracks;
use crate::types::{CallId, MediaKind, RemoteTrack};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, trace, warn};

/// Failures of the negotiating object.
#[derive(Debug, Clone, thiserror::Error)]
pub enum NegotiationError {
    /// Applying a local or remote description failed
    #[error("failed to apply session description: {0}")]
    ApplyDescriptionFailed(String),
    /// Creating an offer or answer failed
    #[error("failed to create session description: {0}")]
    CreateDescriptionFailed(String),
    /// The media link was lost after being established
    #[error("peer connection lost")]
    ConnectionLost,
    /// Constructing or configuring the negotiator failed
    #[error("negotiator setup failed: {0}")]
    Setup(String),
}

/// Whether a description is an offer or an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptionKind {
    /// Initial description from the offering side
    Offer,
    /// Responding description from the answering side
    Answer,
}

/// A session description as exchanged over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDescription {
    /// Offer or answer
    #[serde(rename = "type")]
    pub kind: DescriptionKind,
    /// Opaque description payload
    pub sdp: String,
}

impl SessionDescription {
    /// Build an offer description
    pub fn offer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Offer,
            sdp: sdp.into(),
        }
    }

    /// Build an answer description
    pub fn answer(sdp: impl Into<String>) -> Self {
        Self {
            kind: DescriptionKind::Answer,
            sdp: sdp.into(),
        }
    }
}

/// A connectivity candidate as exchanged over signaling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateInit {
    /// Candidate line
    pub candidate: String,
    /// Media stream identification tag
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdp_mid: Option<String>,
    /// Media description index
    #[serde(
        rename = "sdpMLineIndex",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub sdp_mline_index: Option<u16>,
}

/// One reflection/relay server entry for the negotiator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IceServerConfig {
    /// Server URLs
    pub urls: Vec<String>,
    /// Optional credential username
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Optional credential secret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,
}

/// Configuration handed to the negotiator factory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NegotiationConfig {
    /// Reflection/relay servers the negotiator may use
    pub ice_servers: Vec<IceServerConfig>,
}

impl Default for NegotiationConfig {
    fn default() -> Self {
        Self {
            ice_servers: vec![IceServerConfig {
                urls: vec!["stun:stun.l.google.com:19302".to_string()],
                username: None,
                credential: None,
            }],
        }
    }
}

/// Connection state reported by the negotiating object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Freshly created
    New,
    /// Connectivity checks in progress
    Connecting,
    /// Media link established
    Connected,
    /// Link temporarily lost
    Disconnected,
    /// Link failed permanently
    Failed,
    /// Negotiator closed
    Closed,
}

/// What media an offer should request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OfferConstraints {
    /// Request an audio section
    pub audio: bool,
    /// Request a video section
    pub video: bool,
}

impl OfferConstraints {
    /// Audio always; video iff the call carries video
    #[must_use]
    pub fn for_kind(kind: MediaKind) -> Self {
        Self {
            audio: true,
            video: kind.has_video(),
        }
    }
}

/// Callbacks a negotiator fires while a session is live.
pub struct NegotiatorCallbacks {
    /// A local connectivity candidate was gathered
    pub on_local_candidate: Box<dyn Fn(CandidateInit) + Send + Sync>,
    /// The remote party contributed a media track
    pub on_remote_track: Box<dyn Fn(RemoteTrack) + Send + Sync>,
    /// The connection state changed
    pub on_connection_state: Box<dyn Fn(ConnectionState) + Send + Sync>,
}

impl std::fmt::Debug for NegotiatorCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiatorCallbacks").finish_non_exhaustive()
    }
}

/// The opaque negotiating object for one call.
#[async_trait]
pub trait PeerNegotiator: Send + Sync {
    /// Register lifecycle callbacks. Replaces any previous set.
    fn set_callbacks(&self, callbacks: NegotiatorCallbacks);
    /// Unregister callbacks so no further events fire.
    fn clear_callbacks(&self);
    /// Attach local capture tracks for transmission.
    async fn attach_local_tracks(&self, tracks: &LocalTracks) -> Result<(), NegotiationError>;
    /// Create an offer description.
    async fn create_offer(
        &self,
        constraints: OfferConstraints,
    ) -> Result<SessionDescription, NegotiationError>;
    /// Create an answer to the currently applied remote offer.
    async fn create_answer(&self) -> Result<SessionDescription, NegotiationError>;
    /// Apply a locally created description.
    async fn set_local_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;
    /// Apply a description received from the remote party.
    async fn set_remote_description(
        &self,
        description: SessionDescription,
    ) -> Result<(), NegotiationError>;
    /// Apply a remote connectivity candidate.
    async fn add_ice_candidate(&self, candidate: CandidateInit) -> Result<(), NegotiationError>;
    /// Close the negotiator and release its transport resources.
    async fn close(&self);
}

/// Builds a [`PeerNegotiator`] for each call.
#[async_trait]
pub trait NegotiatorFactory: Send + Sync {
    /// Construct a fresh negotiator with the given server configuration
    async fn create(
        &self,
        config: &NegotiationConfig,
    ) -> Result<Arc<dyn PeerNegotiator>, NegotiationError>;
}

/// Signal surfaced by the engine to the call controller.
#[derive(Debug, Clone)]
pub enum EngineSignal {
    /// Forward this local candidate to the remote party immediately
    LocalCandidate(CandidateInit),
    /// The remote party contributed a track
    RemoteTrack(RemoteTrack),
    /// The negotiator's connection state changed
    ConnectionState(ConnectionState),
}

/// An engine signal tagged with the call it belongs to, so stale events from
/// a torn-down session are dropped by the receiver.
#[derive(Debug, Clone)]
pub struct EngineEvent {
    /// Session the signal belongs to
    pub call_id: CallId,
    /// The signal
    pub signal: EngineSignal,
}

struct EngineState {
    remote_description_applied: bool,
    pending_remote_candidates: VecDeque<CandidateInit>,
    closed: bool,
}

/// One negotiation engine per call session.
pub struct NegotiationEngine {
    negotiator: Arc<dyn PeerNegotiator>,
    call_id: CallId,
    media_kind: MediaKind,
    state: Mutex<EngineState>,
}

impl NegotiationEngine {
    /// Build the negotiator, attach local tracks, and wire its callbacks to
    /// `events`, tagging every signal with `call_id`.
    pub async fn open(
        factory: &dyn NegotiatorFactory,
        config: &NegotiationConfig,
        call_id: CallId,
        media_kind: MediaKind,
        tracks: &LocalTracks,
        events: mpsc::UnboundedSender<EngineEvent>,
    ) -> Result<Self, NegotiationError> {
        let negotiator = factory.create(config).await?;
        negotiator.attach_local_tracks(tracks).await?;

        let candidate_tx = events.clone();
        let candidate_call = call_id.clone();
        let track_tx = events.clone();
        let track_call = call_id.clone();
        let state_tx = events;
        let state_call = call_id.clone();
        negotiator.set_callbacks(NegotiatorCallbacks {
            on_local_candidate: Box::new(move |candidate| {
                // Candidates are forwarded immediately, never batched.
                let _ = candidate_tx.send(EngineEvent {
                    call_id: candidate_call.clone(),
                    signal: EngineSignal::LocalCandidate(candidate),
                });
            }),
            on_remote_track: Box::new(move |track| {
                let _ = track_tx.send(EngineEvent {
                    call_id: track_call.clone(),
                    signal: EngineSignal::RemoteTrack(track),
                });
            }),
            on_connection_state: Box::new(move |state| {
                let _ = state_tx.send(EngineEvent {
                    call_id: state_call.clone(),
                    signal: EngineSignal::ConnectionState(state),
                });
            }),
        });

        debug!(call_id = %call_id, ?media_kind, "negotiation engine opened");
        Ok(Self {
            negotiator,
            call_id,
            media_kind,
            state: Mutex::new(EngineState {
                remote_description_applied: false,
                pending_remote_candidates: VecDeque::new(),
                closed: false,
            }),
        })
    }

    /// The session this engine belongs to
    #[must_use]
    pub fn call_id(&self) -> &CallId {
        &self.call_id
    }

    /// Create the offer, apply it locally, and return it for transmission.
    pub async fn create_offer(&self) -> Result<SessionDescription, NegotiationError> {
        let offer = self
            .negotiator
            .create_offer(OfferConstraints::for_kind(self.media_kind))
            .await?;
        self.negotiator.set_local_description(offer.clone()).await?;
        Ok(offer)
    }

    /// Apply the remote offer, replay queued candidates, then create and
    /// apply the answer. Returns the answer for transmission.
    pub async fn create_answer(
        &self,
        remote_offer: SessionDescription,
    ) -> Result<SessionDescription, NegotiationError> {
        self.negotiator.set_remote_description(remote_offer).await?;
        self.drain_pending_candidates().await;
        let answer = self.negotiator.create_answer().await?;
        self.negotiator
            .set_local_description(answer.clone())
            .await?;
        Ok(answer)
    }

    /// Apply the remote answer and replay queued candidates. A no-op on a
    /// closed engine (answer raced with teardown).
    pub async fn apply_answer(
        &self,
        remote_answer: SessionDescription,
    ) -> Result<(), NegotiationError> {
        if self.state.lock().await.closed {
            trace!(call_id = %self.call_id, "answer after close, discarding");
            return Ok(());
        }
        self.negotiator
            .set_remote_description(remote_answer)
            .await?;
        self.drain_pending_candidates().await;
        Ok(())
    }

    /// Apply a remote candidate, or queue it until a remote description
    /// exists. Candidates for a closed engine are discarded; apply failures
    /// on individual candidates are logged and swallowed.
    pub async fn add_remote_candidate(&self, candidate: CandidateInit) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                trace!(call_id = %self.call_id, "candidate after close, discarding");
                return;
            }
            if !state.remote_description_applied {
                state.pending_remote_candidates.push_back(candidate);
                trace!(
                    call_id = %self.call_id,
                    queued = state.pending_remote_candidates.len(),
                    "queued candidate before remote description"
                );
                return;
            }
        }
        if let Err(e) = self.negotiator.add_ice_candidate(candidate).await {
            warn!(call_id = %self.call_id, error = %e, "failed to apply remote candidate");
        }
    }

    /// Mark the remote description applied and replay the queue FIFO,
    /// best-effort. The queue is taken under the lock so replay happens
    /// exactly once even if two description paths race.
    async fn drain_pending_candidates(&self) {
        let pending = {
            let mut state = self.state.lock().await;
            state.remote_description_applied = true;
            std::mem::take(&mut state.pending_remote_candidates)
        };
        if pending.is_empty() {
            return;
        }
        debug!(call_id = %self.call_id, count = pending.len(), "replaying queued candidates");
        for candidate in pending {
            if let Err(e) = self.negotiator.add_ice_candidate(candidate).await {
                warn!(call_id = %self.call_id, error = %e, "queued candidate failed to apply");
            }
        }
    }

    /// Close the engine: unregister callbacks first so no events fire during
    /// or after the close, then close the negotiator. Idempotent.
    pub async fn close(&self) {
        {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.pending_remote_candidates.clear();
        }
        self.negotiator.clear_callbacks();
        self.negotiator.close().await;
        debug!(call_id = %self.call_id, "negotiation engine closed");
    }
}

impl std::fmt::Debug for NegotiationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NegotiationEngine")
            .field("call_id", &self.call_id)
            .field("media_kind", &self.media_kind)
            .finish_non_exhaustive()
    }
}
