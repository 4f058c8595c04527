//! Signaling wire messages and the inbound dispatch pump
//!
//! The transport itself (websocket, QUIC stream, test channel) is supplied
//! by the embedding application behind [`SignalingTransport`]. This module
//! fixes the message vocabulary and runs the receive pump that feeds the
//! call controller.

use crate::call::CallController;
use crate::identity::{PartyId, PartyInfo};
use crate::negotiation::{CandidateInit, SessionDescription};
use crate::types::{CallId, MediaKind};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Signaling transport failures.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The transport has no live connection
    #[error("signaling transport not connected")]
    NotConnected,
    /// A send was attempted and failed
    #[error("signaling send failed: {0}")]
    SendFailed(String),
    /// The transport shut down and will produce no more messages
    #[error("signaling transport closed")]
    Closed,
}

/// The complete call signaling vocabulary.
///
/// Internally tagged on `type` with kebab-case names; payload fields use
/// camelCase to match the wire convention of existing deployments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SignalMessage {
    /// Invite the receiver to a call
    #[serde(rename_all = "camelCase")]
    CallOffer {
        /// Initiating party
        caller_id: PartyId,
        /// Invited party
        receiver_id: PartyId,
        /// Call identifier assigned by the initiator
        call_id: CallId,
        /// Display info of the initiator
        caller_info: PartyInfo,
        /// Requested media
        media_kind: MediaKind,
    },
    /// The callee accepted; description exchange may begin
    #[serde(rename_all = "camelCase")]
    CallAccepted {
        /// Call identifier
        call_id: CallId,
        /// Display info of the accepting party
        receiver_info: PartyInfo,
    },
    /// The callee declined (or is busy)
    #[serde(rename_all = "camelCase")]
    CallRejected {
        /// Call identifier
        call_id: CallId,
    },
    /// A participant hung up
    #[serde(rename_all = "camelCase")]
    CallEnded {
        /// Call identifier
        call_id: CallId,
        /// Who hung up
        participant_id: PartyId,
    },
    /// Session description offer from the caller
    #[serde(rename_all = "camelCase")]
    SessionOffer {
        /// The offer description
        description: SessionDescription,
        /// Sending party
        sender_id: PartyId,
        /// Receiving party
        receiver_id: PartyId,
        /// Call identifier
        call_id: CallId,
    },
    /// Session description answer from the callee
    #[serde(rename_all = "camelCase")]
    SessionAnswer {
        /// The answer description
        description: SessionDescription,
        /// Sending party
        sender_id: PartyId,
        /// Receiving party
        receiver_id: PartyId,
        /// Call identifier
        call_id: CallId,
    },
    /// A connectivity candidate, forwarded as soon as it is gathered
    #[serde(rename_all = "camelCase")]
    IceCandidate {
        /// The candidate
        candidate: CandidateInit,
        /// Sending party
        sender_id: PartyId,
        /// Receiving party
        receiver_id: PartyId,
        /// Call identifier
        call_id: CallId,
    },
    /// The remote endpoint could not complete the call
    #[serde(rename_all = "camelCase")]
    CallFailed {
        /// Call identifier
        call_id: CallId,
        /// User-presentable reason
        reason: String,
    },
}

impl SignalMessage {
    /// The call this message belongs to
    #[must_use]
    pub fn call_id(&self) -> &CallId {
        match self {
            Self::CallOffer { call_id, .. }
            | Self::CallAccepted { call_id, .. }
            | Self::CallRejected { call_id }
            | Self::CallEnded { call_id, .. }
            | Self::SessionOffer { call_id, .. }
            | Self::SessionAnswer { call_id, .. }
            | Self::IceCandidate { call_id, .. }
            | Self::CallFailed { call_id, .. } => call_id,
        }
    }

    /// Wire tag, for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CallOffer { .. } => "call-offer",
            Self::CallAccepted { .. } => "call-accepted",
            Self::CallRejected { .. } => "call-rejected",
            Self::CallEnded { .. } => "call-ended",
            Self::SessionOffer { .. } => "session-offer",
            Self::SessionAnswer { .. } => "session-answer",
            Self::IceCandidate { .. } => "ice-candidate",
            Self::CallFailed { .. } => "call-failed",
        }
    }
}

/// An inbound message together with the party that sent it.
#[derive(Debug, Clone)]
pub struct InboundSignal {
    /// Sending party as authenticated by the transport
    pub from: PartyId,
    /// The message
    pub message: SignalMessage,
}

/// Bidirectional named-message channel between parties.
///
/// The transport is externally owned and possibly shared; this crate only
/// attaches its receive pump and never closes it.
#[async_trait]
pub trait SignalingTransport: Send + Sync {
    /// Whether a send is currently expected to succeed
    fn is_connected(&self) -> bool;
    /// Send a message to the given party
    async fn send(&self, to: &PartyId, message: SignalMessage) -> Result<(), TransportError>;
    /// Wait for the next inbound message. `Err(Closed)` ends the pump.
    async fn next_message(&self) -> Result<InboundSignal, TransportError>;
}

/// Attaches the inbound pump to the transport exactly once.
pub struct SignalingAdapter {
    transport: Arc<dyn SignalingTransport>,
    attached: AtomicBool,
}

impl SignalingAdapter {
    /// Wrap a transport
    pub fn new(transport: Arc<dyn SignalingTransport>) -> Self {
        Self {
            transport,
            attached: AtomicBool::new(false),
        }
    }

    /// The wrapped transport
    #[must_use]
    pub fn transport(&self) -> &Arc<dyn SignalingTransport> {
        &self.transport
    }

    /// Spawn the receive pump dispatching into `controller`.
    ///
    /// Idempotent: a second attach (e.g. after a transport reconnect the
    /// embedding application reports) is a no-op and returns `false`.
    pub fn attach(&self, controller: Arc<CallController>) -> bool {
        if self.attached.swap(true, Ordering::AcqRel) {
            debug!("signaling pump already attached, ignoring");
            return false;
        }
        let transport = Arc::clone(&self.transport);
        tokio::spawn(async move {
            info!("signaling pump started");
            loop {
                match transport.next_message().await {
                    Ok(inbound) => {
                        debug!(
                            kind = inbound.message.kind(),
                            call_id = %inbound.message.call_id(),
                            from = %inbound.from,
                            "inbound signal"
                        );
                        controller.handle_signal(inbound).await;
                    }
                    Err(TransportError::Closed) => {
                        info!("signaling transport closed, pump exiting");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "signaling receive error");
                        tokio::time::sleep(Duration::from_millis(100)).await;
                    }
                }
            }
        });
        true
    }
}

impl std::fmt::Debug for SignalingAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignalingAdapter")
            .field("attached", &self.attached.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_call_offer_wire_shape() {
        let msg = SignalMessage::CallOffer {
            caller_id: PartyId::new("alice"),
            receiver_id: PartyId::new("bob"),
            call_id: CallId::new("alice-bob-1700000000000"),
            caller_info: PartyInfo::new("alice", "Alice"),
            media_kind: MediaKind::Video,
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "call-offer");
        assert_eq!(json["callerId"], "alice");
        assert_eq!(json["receiverId"], "bob");
        assert_eq!(json["callId"], "alice-bob-1700000000000");
        assert_eq!(json["callerInfo"]["displayName"], "Alice");
        assert_eq!(json["mediaKind"], "video");
    }

    #[test]
    fn test_ice_candidate_wire_shape() {
        let msg = SignalMessage::IceCandidate {
            candidate: CandidateInit {
                candidate: "candidate:1 1 udp 2122260223 192.0.2.1 54400 typ host".to_string(),
                sdp_mid: Some("0".to_string()),
                sdp_mline_index: Some(0),
            },
            sender_id: PartyId::new("alice"),
            receiver_id: PartyId::new("bob"),
            call_id: CallId::new("c1"),
        };
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "ice-candidate");
        assert_eq!(json["candidate"]["sdpMid"], "0");
        assert_eq!(json["candidate"]["sdpMLineIndex"], 0);
    }

    #[test]
    fn test_session_offer_round_trip() {
        let msg = SignalMessage::SessionOffer {
            description: SessionDescription::offer("v=0..."),
            sender_id: PartyId::new("alice"),
            receiver_id: PartyId::new("bob"),
            call_id: CallId::new("c1"),
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"type\":\"session-offer\""));
        assert!(json.contains("\"type\":\"offer\""));
        let back: SignalMessage = serde_json::from_str(&json).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_all_variants_carry_call_id() {
        let id = CallId::new("c1");
        let msgs = vec![
            SignalMessage::CallRejected {
                call_id: id.clone(),
            },
            SignalMessage::CallEnded {
                call_id: id.clone(),
                participant_id: PartyId::new("bob"),
            },
            SignalMessage::CallFailed {
                call_id: id.clone(),
                reason: "offline".to_string(),
            },
        ];
        for msg in &msgs {
            assert_eq!(msg.call_id(), &id);
        }
    }

    #[test]
    fn test_unknown_type_fails_to_parse() {
        let raw = r#"{"type":"call-resumed","callId":"c1"}"#;
        assert!(serde_json::from_str::<SignalMessage>(raw).is_err());
    }
}
