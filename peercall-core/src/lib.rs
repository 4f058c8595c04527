//! Peer-to-peer call signaling and session state machine.
//!
//! This crate negotiates a live audio/video session between two parties over
//! an unreliable asynchronous message channel. It owns the call lifecycle
//! (dialing, ringing, connecting, active, and the terminal states), the
//! reconciliation of out-of-order signaling events, and the exactly-once
//! release of captured media and the negotiated transport on every exit
//! path.
//!
//! The platform pieces are injected: a [`signaling::SignalingTransport`]
//! carries messages between parties, a [`media::MediaCapture`] grants device
//! access, and a [`negotiation::NegotiatorFactory`] builds the opaque
//! negotiating object per call.
//!
//! ```rust,no_run
//! use peercall_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run(
//! #     transport: Arc<dyn SignalingTransport>,
//! #     capture: Arc<dyn MediaCapture>,
//! #     factory: Arc<dyn NegotiatorFactory>,
//! # ) -> Result<(), CallError> {
//! let controller = CallController::builder(transport, capture, factory)
//!     .build(PartyInfo::new("alice", "Alice"));
//! controller.start();
//!
//! let mut events = controller.session().subscribe_events();
//! let call_id = controller
//!     .initiate(PartyInfo::new("bob", "Bob"), MediaKind::Video)
//!     .await?;
//!
//! while let Ok(event) = events.recv().await {
//!     if let CallEvent::PhaseChanged { phase: CallPhase::Active, .. } = event {
//!         break;
//!     }
//! }
//! controller.end().await?;
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![deny(clippy::panic)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![allow(clippy::module_name_repetitions)]

pub mod call;
pub mod identity;
pub mod media;
pub mod negotiation;
pub mod retry;
pub mod session;
pub mod signaling;
pub mod types;

pub use call::{CallConfig, CallController, CallControllerBuilder, CallError};
pub use identity::{PartyId, PartyInfo};
pub use media::{
    AcquiredMedia, CaptureFailure, CaptureProfile, CaptureQuality, LocalTrack, LocalTracks,
    MediaAcquirer, MediaCapture, MediaError,
};
pub use negotiation::{
    CandidateInit, ConnectionState, DescriptionKind, EngineEvent, EngineSignal, IceServerConfig,
    NegotiationConfig, NegotiationEngine, NegotiationError, NegotiatorCallbacks, NegotiatorFactory,
    OfferConstraints, PeerNegotiator, SessionDescription,
};
pub use retry::RetryPolicy;
pub use session::{SessionSnapshot, SessionStore};
pub use signaling::{
    InboundSignal, SignalMessage, SignalingAdapter, SignalingTransport, TransportError,
};
pub use types::{
    CallEvent, CallFailure, CallId, CallPhase, CallRole, FailureKind, MediaKind, PhaseEvent,
    RemoteTrack, TrackKind,
};

/// Commonly used types, one `use` away.
pub mod prelude {
    pub use crate::call::{CallConfig, CallController, CallError};
    pub use crate::media::{MediaCapture, MediaError};
    pub use crate::negotiation::{NegotiationConfig, NegotiatorFactory, PeerNegotiator};
    pub use crate::signaling::{SignalMessage, SignalingTransport};
    pub use crate::types::{CallEvent, CallId, CallPhase, MediaKind};
    pub use crate::{PartyId, PartyInfo};
}
