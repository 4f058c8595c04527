//! Call session value types and the phase transition machine

use crate::identity::{PartyId, PartyInfo};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for one call attempt.
///
/// Locally generated ids follow `{caller}-{receiver}-{timestamp_ms}`; the
/// receiver id keeps two calls started in the same millisecond for different
/// parties distinct. When this device is the callee the id is whatever the
/// remote initiator assigned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CallId(pub String);

impl CallId {
    /// Generate an id for a locally initiated call
    pub fn generate(caller: &PartyId, receiver: &PartyId) -> Self {
        Self(format!(
            "{}-{}-{}",
            caller,
            receiver,
            Utc::now().timestamp_millis()
        ))
    }

    /// Wrap a remote-assigned id
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of the call this device is. Fixed for the session lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallRole {
    /// This device initiated the call
    Caller,
    /// This device received the call
    Callee,
}

/// Requested media for a call.
///
/// May downgrade from `Video` to `Audio` when video capture fails with a
/// non-permission cause; it never upgrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    /// Audio-only call
    Audio,
    /// Audio and video call
    Video,
}

impl MediaKind {
    /// Whether video capture and negotiation are wanted
    #[must_use]
    pub fn has_video(self) -> bool {
        matches!(self, Self::Video)
    }
}

/// Kind of an individual media track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    /// Microphone track
    Audio,
    /// Camera track
    Video,
}

/// Call session phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallPhase {
    /// No call in progress
    Idle,
    /// Outbound offer sent, waiting for the callee
    Dialing,
    /// Inbound offer received, waiting for the user
    Ringing,
    /// Callee accepted locally; media acquisition in progress
    Accepting,
    /// Both sides committed; descriptions and candidates in flight
    Connecting,
    /// Media session established
    Active,
    /// Terminal: the callee declined
    Rejected,
    /// Terminal: the attempt failed (see `last_error`)
    Failed,
    /// Terminal: either side hung up
    Ended,
}

impl CallPhase {
    /// Terminal phases trigger teardown and ignore further inbound events
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Rejected | Self::Failed | Self::Ended)
    }

    /// Pure transition function of the session state machine.
    ///
    /// Returns the next phase, or `None` when the event is not valid from the
    /// current phase and must be ignored. Side-effecting callers react to the
    /// returned phase; this function never touches resources.
    #[must_use]
    pub fn transition(self, event: &PhaseEvent) -> Option<CallPhase> {
        use CallPhase::*;
        use PhaseEvent as E;
        match (self, event) {
            (Idle, E::Initiate) => Some(Dialing),
            (Idle, E::IncomingOffer) => Some(Ringing),
            (Ringing, E::Answer) => Some(Accepting),
            (Accepting, E::SetupComplete) => Some(Connecting),
            (Dialing, E::RemoteAccepted) => Some(Connecting),
            (Connecting, E::LinkConnected) => Some(Active),
            (Ringing, E::Reject) => Some(Rejected),
            (Dialing | Connecting, E::RemoteRejected) => Some(Rejected),
            (Dialing | Ringing | Accepting | Connecting | Active, E::End) => Some(Ended),
            (Dialing | Ringing | Accepting | Connecting | Active, E::RemoteEnded) => Some(Ended),
            (Dialing | Ringing | Accepting | Connecting | Active, E::Failure) => Some(Failed),
            _ => None,
        }
    }
}

/// Events the phase machine reacts to.
///
/// Each corresponds to a user action, an inbound wire message, or a
/// negotiation callback; the mapping from wire messages lives in the
/// signaling adapter and call controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// User initiated an outbound call
    Initiate,
    /// Inbound `call-offer` arrived while idle
    IncomingOffer,
    /// User answered a ringing call
    Answer,
    /// Callee finished media acquisition and engine setup
    SetupComplete,
    /// Inbound `call-accepted` for our outbound offer
    RemoteAccepted,
    /// Negotiation reported the link is connected
    LinkConnected,
    /// User rejected a ringing call
    Reject,
    /// Inbound `call-rejected`
    RemoteRejected,
    /// User hung up (universal abort from any non-idle phase)
    End,
    /// Inbound `call-ended`
    RemoteEnded,
    /// Media, transport or negotiation failure
    Failure,
}

/// Classification of a user-visible call failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Capture device or permission problem
    Media,
    /// Signaling transport unavailable after retries
    Transport,
    /// Description exchange or connectivity failure
    Negotiation,
    /// The remote endpoint reported a failure (e.g. offline)
    Remote,
}

/// Last user-facing error of a session, kept for UI display until teardown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallFailure {
    /// What went wrong, coarsely
    pub kind: FailureKind,
    /// Human-readable reason
    pub message: String,
}

impl CallFailure {
    /// Create a failure record
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Descriptor of a media track contributed by the remote party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTrack {
    /// Track identifier assigned by the negotiating object
    pub id: String,
    /// Audio or video
    pub kind: TrackKind,
}

/// Notifications for UI consumers, broadcast by the session store.
///
/// Observation is push-based: subscribers react to these instead of polling
/// session fields.
#[derive(Debug, Clone)]
pub enum CallEvent {
    /// An inbound call is ringing
    IncomingCall {
        /// Call identifier
        call_id: CallId,
        /// Who is calling
        caller: PartyInfo,
        /// Requested media
        media_kind: MediaKind,
    },
    /// The session phase changed
    PhaseChanged {
        /// Call identifier
        call_id: CallId,
        /// New phase
        phase: CallPhase,
    },
    /// Video capture failed and the call continues audio-only
    MediaDowngraded {
        /// Call identifier
        call_id: CallId,
    },
    /// The remote party contributed a media track
    RemoteTrackAdded {
        /// Call identifier
        call_id: CallId,
        /// The new track
        track: RemoteTrack,
    },
    /// The remote party declined the call
    CallRejected {
        /// Call identifier
        call_id: CallId,
    },
    /// The call ended (either side hung up)
    CallEnded {
        /// Call identifier
        call_id: CallId,
    },
    /// The call failed with a user-presentable reason
    CallFailed {
        /// Call identifier
        call_id: CallId,
        /// Classification and message
        failure: CallFailure,
    },
    /// Resources were released and the session reset to idle
    TornDown {
        /// Call identifier of the torn-down session
        call_id: CallId,
    },
}
