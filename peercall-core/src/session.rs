//! Session store: the single live call session and its observers
//!
//! Exactly one call session exists at a time. The store serializes all
//! mutation behind a `parking_lot` lock (never held across an await),
//! publishes phase changes on a `watch` channel and richer notifications on
//! a `broadcast` channel, and hands session resources out by move so
//! teardown runs exactly once no matter how many paths trigger it.

use crate::identity::PartyInfo;
use crate::media::LocalTracks;
use crate::negotiation::{CandidateInit, NegotiationEngine, SessionDescription};
use crate::types::{
    CallEvent, CallFailure, CallId, CallPhase, CallRole, MediaKind, PhaseEvent, RemoteTrack,
    TrackKind,
};
use parking_lot::RwLock;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, trace, warn};

/// The aggregate state of one call attempt.
#[derive(Debug)]
pub struct CallSession {
    /// Call identifier (locally generated or remote-assigned)
    pub call_id: CallId,
    /// Which side this device is
    pub role: CallRole,
    /// Requested media; may downgrade Video to Audio, never upgrades
    pub media_kind: MediaKind,
    /// Current phase
    pub phase: CallPhase,
    /// This device's party info
    pub local_party: PartyInfo,
    /// The other party; display info filled in as signaling provides it
    pub remote_party: PartyInfo,
    /// Live capture handles, present once acquisition completes
    pub local_tracks: Option<LocalTracks>,
    /// Tracks contributed by the remote party
    pub remote_tracks: Vec<RemoteTrack>,
    /// Candidates that arrived before the engine existed
    pub pending_remote_candidates: VecDeque<CandidateInit>,
    /// A session offer that arrived before the engine existed
    pub pending_remote_offer: Option<SessionDescription>,
    /// The negotiation engine, present once setup completes
    pub engine: Option<Arc<NegotiationEngine>>,
    /// Last user-facing failure; cleared on successful transitions
    pub last_error: Option<CallFailure>,
}

impl CallSession {
    fn new(
        call_id: CallId,
        role: CallRole,
        media_kind: MediaKind,
        local_party: PartyInfo,
        remote_party: PartyInfo,
        phase: CallPhase,
    ) -> Self {
        Self {
            call_id,
            role,
            media_kind,
            phase,
            local_party,
            remote_party,
            local_tracks: None,
            remote_tracks: Vec::new(),
            pending_remote_candidates: VecDeque::new(),
            pending_remote_offer: None,
            engine: None,
            last_error: None,
        }
    }
}

/// Resources moved out of a session for release.
///
/// Taking these out under the store lock is what makes teardown idempotent:
/// a second teardown finds nothing to take.
pub struct TeardownResources {
    /// Capture handles to stop
    pub tracks: Option<LocalTracks>,
    /// Engine to close
    pub engine: Option<Arc<NegotiationEngine>>,
}

/// Point-in-time summary of the live session for observers.
#[derive(Debug, Clone)]
pub struct SessionSnapshot {
    /// Call identifier
    pub call_id: CallId,
    /// Role
    pub role: CallRole,
    /// Effective media kind
    pub media_kind: MediaKind,
    /// Phase
    pub phase: CallPhase,
    /// Remote party info
    pub remote_party: PartyInfo,
    /// Last failure, if any
    pub last_error: Option<CallFailure>,
}

/// Owner of the single live session.
pub struct SessionStore {
    inner: RwLock<Option<CallSession>>,
    phase_tx: watch::Sender<CallPhase>,
    event_tx: broadcast::Sender<CallEvent>,
}

impl SessionStore {
    /// Create an empty store in `Idle`
    #[must_use]
    pub fn new() -> Self {
        let (phase_tx, _) = watch::channel(CallPhase::Idle);
        let (event_tx, _) = broadcast::channel(64);
        Self {
            inner: RwLock::new(None),
            phase_tx,
            event_tx,
        }
    }

    /// Watch phase changes without polling
    #[must_use]
    pub fn watch_phase(&self) -> watch::Receiver<CallPhase> {
        self.phase_tx.subscribe()
    }

    /// Subscribe to call notifications
    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<CallEvent> {
        self.event_tx.subscribe()
    }

    /// Broadcast an event to subscribers (no subscribers is fine)
    pub fn emit(&self, event: CallEvent) {
        let _ = self.event_tx.send(event);
    }

    /// Current phase; `Idle` with no live session
    #[must_use]
    pub fn phase(&self) -> CallPhase {
        self.inner
            .read()
            .as_ref()
            .map_or(CallPhase::Idle, |s| s.phase)
    }

    /// Call id of the live session, if any
    #[must_use]
    pub fn current_call_id(&self) -> Option<CallId> {
        self.inner.read().as_ref().map(|s| s.call_id.clone())
    }

    /// Whether `call_id` names the live session
    #[must_use]
    pub fn is_current(&self, call_id: &CallId) -> bool {
        self.inner
            .read()
            .as_ref()
            .is_some_and(|s| &s.call_id == call_id)
    }

    /// Snapshot of the live session for UI consumers
    #[must_use]
    pub fn snapshot(&self) -> Option<SessionSnapshot> {
        self.inner.read().as_ref().map(|s| SessionSnapshot {
            call_id: s.call_id.clone(),
            role: s.role,
            media_kind: s.media_kind,
            phase: s.phase,
            remote_party: s.remote_party.clone(),
            last_error: s.last_error.clone(),
        })
    }

    /// Install a fresh session. Fails when one is already live; the caller
    /// must tear the old one down first.
    pub fn begin(
        &self,
        call_id: CallId,
        role: CallRole,
        media_kind: MediaKind,
        local_party: PartyInfo,
        remote_party: PartyInfo,
    ) -> Result<(), CallId> {
        let initial = match role {
            CallRole::Caller => CallPhase::Dialing,
            CallRole::Callee => CallPhase::Ringing,
        };
        {
            let mut guard = self.inner.write();
            if let Some(existing) = guard.as_ref() {
                return Err(existing.call_id.clone());
            }
            *guard = Some(CallSession::new(
                call_id.clone(),
                role,
                media_kind,
                local_party,
                remote_party,
                initial,
            ));
        }
        debug!(call_id = %call_id, ?role, ?initial, "session started");
        let _ = self.phase_tx.send(initial);
        self.emit(CallEvent::PhaseChanged {
            call_id,
            phase: initial,
        });
        Ok(())
    }

    /// Apply a phase event to the live session.
    ///
    /// Returns the new phase when the event was valid for `call_id` and the
    /// current phase; `None` when the session is gone, the id is stale, or
    /// the transition table rejects the event. Successful non-terminal
    /// transitions clear `last_error`.
    pub fn apply(&self, call_id: &CallId, event: &PhaseEvent) -> Option<CallPhase> {
        let next = {
            let mut guard = self.inner.write();
            let session = guard.as_mut()?;
            if &session.call_id != call_id {
                trace!(call_id = %call_id, current = %session.call_id, "stale phase event dropped");
                return None;
            }
            let next = session.phase.transition(event)?;
            session.phase = next;
            if next.is_terminal() {
                // Terminal phases ignore further session traffic; the queues
                // must not outlive the transition.
                session.pending_remote_candidates.clear();
                session.pending_remote_offer = None;
            } else {
                session.last_error = None;
            }
            next
        };
        debug!(call_id = %call_id, ?event, ?next, "phase transition");
        let _ = self.phase_tx.send(next);
        self.emit(CallEvent::PhaseChanged {
            call_id: call_id.clone(),
            phase: next,
        });
        Some(next)
    }

    /// Apply the `Failure` event and record `failure` atomically.
    pub fn fail(&self, call_id: &CallId, failure: CallFailure) -> Option<CallPhase> {
        let next = {
            let mut guard = self.inner.write();
            let session = guard.as_mut()?;
            if &session.call_id != call_id {
                return None;
            }
            let next = session.phase.transition(&PhaseEvent::Failure)?;
            session.phase = next;
            session.pending_remote_candidates.clear();
            session.pending_remote_offer = None;
            session.last_error = Some(failure.clone());
            next
        };
        warn!(call_id = %call_id, kind = ?failure.kind, reason = %failure.message, "call failed");
        let _ = self.phase_tx.send(next);
        self.emit(CallEvent::PhaseChanged {
            call_id: call_id.clone(),
            phase: next,
        });
        Some(next)
    }

    /// Record a media downgrade on the live session
    pub fn set_media_kind(&self, call_id: &CallId, kind: MediaKind) {
        let mut guard = self.inner.write();
        if let Some(session) = guard.as_mut() {
            if &session.call_id == call_id {
                session.media_kind = kind;
            }
        }
    }

    /// Update remote party display info (filled in from `call-accepted`)
    pub fn set_remote_party(&self, call_id: &CallId, info: PartyInfo) {
        let mut guard = self.inner.write();
        if let Some(session) = guard.as_mut() {
            if &session.call_id == call_id {
                session.remote_party = info;
            }
        }
    }

    /// Install acquired tracks and the opened engine on the live session.
    ///
    /// When the session is gone or replaced the resources are handed back so
    /// the caller can release them (the acquisition raced with teardown).
    pub fn install_media(
        &self,
        call_id: &CallId,
        tracks: LocalTracks,
        engine: Arc<NegotiationEngine>,
    ) -> Result<(), (LocalTracks, Arc<NegotiationEngine>)> {
        let mut guard = self.inner.write();
        match guard.as_mut() {
            Some(session) if &session.call_id == call_id && !session.phase.is_terminal() => {
                session.local_tracks = Some(tracks);
                session.engine = Some(engine);
                Ok(())
            }
            _ => Err((tracks, engine)),
        }
    }

    /// Engine of the live session, when `call_id` is current
    #[must_use]
    pub fn engine(&self, call_id: &CallId) -> Option<Arc<NegotiationEngine>> {
        let guard = self.inner.read();
        let session = guard.as_ref()?;
        if &session.call_id == call_id {
            session.engine.clone()
        } else {
            None
        }
    }

    /// Record a remote track on the live session
    pub fn push_remote_track(&self, call_id: &CallId, track: RemoteTrack) {
        let mut guard = self.inner.write();
        if let Some(session) = guard.as_mut() {
            if &session.call_id == call_id {
                session.remote_tracks.push(track);
            }
        }
    }

    /// Buffer an early session offer (at most one is kept)
    pub fn buffer_remote_offer(&self, call_id: &CallId, description: SessionDescription) {
        let mut guard = self.inner.write();
        if let Some(session) = guard.as_mut() {
            if &session.call_id == call_id {
                if session.pending_remote_offer.is_some() {
                    warn!(call_id = %call_id, "replacing buffered session offer");
                }
                session.pending_remote_offer = Some(description);
            }
        }
    }

    /// Take the buffered session offer, if any
    pub fn take_pending_offer(&self, call_id: &CallId) -> Option<SessionDescription> {
        let mut guard = self.inner.write();
        let session = guard.as_mut()?;
        if &session.call_id == call_id {
            session.pending_remote_offer.take()
        } else {
            None
        }
    }

    /// Queue a candidate that arrived before the engine existed
    pub fn queue_remote_candidate(&self, call_id: &CallId, candidate: CandidateInit) {
        let mut guard = self.inner.write();
        if let Some(session) = guard.as_mut() {
            if &session.call_id == call_id && !session.phase.is_terminal() {
                session.pending_remote_candidates.push_back(candidate);
            }
        }
    }

    /// Take all session-level queued candidates, in arrival order
    pub fn take_queued_candidates(&self, call_id: &CallId) -> VecDeque<CandidateInit> {
        let mut guard = self.inner.write();
        match guard.as_mut() {
            Some(session) if &session.call_id == call_id => {
                std::mem::take(&mut session.pending_remote_candidates)
            }
            _ => VecDeque::new(),
        }
    }

    /// Toggle the enabled flag of local tracks of `kind`.
    ///
    /// `None` when there is no live session, no tracks yet, or no track of
    /// that kind.
    pub fn toggle_track(&self, kind: TrackKind) -> Option<bool> {
        let guard = self.inner.read();
        guard.as_ref()?.local_tracks.as_ref()?.toggle(kind)
    }

    /// Move the releasable resources out of the session named by `call_id`.
    ///
    /// Returns `None` when the session is gone or replaced, or when another
    /// teardown already took them.
    pub fn take_teardown(&self, call_id: &CallId) -> Option<TeardownResources> {
        let mut guard = self.inner.write();
        let session = guard.as_mut()?;
        if &session.call_id != call_id {
            return None;
        }
        let tracks = session.local_tracks.take();
        let engine = session.engine.take();
        session.pending_remote_candidates.clear();
        session.pending_remote_offer = None;
        if tracks.is_none() && engine.is_none() {
            return None;
        }
        Some(TeardownResources { tracks, engine })
    }

    /// Drop the session named by `call_id` and return to `Idle`.
    ///
    /// Emits `TornDown`; returns `false` when the session was already gone.
    pub fn clear(&self, call_id: &CallId) -> bool {
        let cleared = {
            let mut guard = self.inner.write();
            match guard.as_ref() {
                Some(session) if &session.call_id == call_id => {
                    *guard = None;
                    true
                }
                _ => false,
            }
        };
        if cleared {
            debug!(call_id = %call_id, "session cleared");
            let _ = self.phase_tx.send(CallPhase::Idle);
            self.emit(CallEvent::TornDown {
                call_id: call_id.clone(),
            });
        }
        cleared
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SessionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionStore")
            .field("phase", &self.phase())
            .finish_non_exhaustive()
    }
}
