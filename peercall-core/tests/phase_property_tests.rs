//! Properties of the phase transition table.
#![allow(clippy::unwrap_used)]

use peercall_core::types::{CallPhase, PhaseEvent};
use proptest::prelude::*;

fn any_phase() -> impl Strategy<Value = CallPhase> {
    prop::sample::select(vec![
        CallPhase::Idle,
        CallPhase::Dialing,
        CallPhase::Ringing,
        CallPhase::Accepting,
        CallPhase::Connecting,
        CallPhase::Active,
        CallPhase::Rejected,
        CallPhase::Failed,
        CallPhase::Ended,
    ])
}

fn any_event() -> impl Strategy<Value = PhaseEvent> {
    prop::sample::select(vec![
        PhaseEvent::Initiate,
        PhaseEvent::IncomingOffer,
        PhaseEvent::Answer,
        PhaseEvent::SetupComplete,
        PhaseEvent::RemoteAccepted,
        PhaseEvent::LinkConnected,
        PhaseEvent::Reject,
        PhaseEvent::RemoteRejected,
        PhaseEvent::End,
        PhaseEvent::RemoteEnded,
        PhaseEvent::Failure,
    ])
}

proptest! {
    /// Terminal phases accept no event at all.
    #[test]
    fn terminal_phases_are_absorbing(
        phase in prop::sample::select(vec![CallPhase::Rejected, CallPhase::Failed, CallPhase::Ended]),
        event in any_event(),
    ) {
        prop_assert!(phase.transition(&event).is_none());
    }

    /// No event leads back to Idle; only teardown does, outside the table.
    #[test]
    fn no_transition_targets_idle(phase in any_phase(), event in any_event()) {
        if let Some(next) = phase.transition(&event) {
            prop_assert_ne!(next, CallPhase::Idle);
        }
    }

    /// A transition always changes the phase (the table has no self-loops).
    #[test]
    fn transitions_always_move(phase in any_phase(), event in any_event()) {
        if let Some(next) = phase.transition(&event) {
            prop_assert_ne!(next, phase);
        }
    }

    /// Hanging up from any non-idle, non-terminal phase lands in Ended.
    #[test]
    fn end_always_reaches_ended(phase in any_phase()) {
        match phase.transition(&PhaseEvent::End) {
            Some(next) => prop_assert_eq!(next, CallPhase::Ended),
            None => prop_assert!(phase == CallPhase::Idle || phase.is_terminal()),
        }
    }

    /// A failure from any non-idle, non-terminal phase lands in Failed.
    #[test]
    fn failure_always_reaches_failed(phase in any_phase()) {
        match phase.transition(&PhaseEvent::Failure) {
            Some(next) => prop_assert_eq!(next, CallPhase::Failed),
            None => prop_assert!(phase == CallPhase::Idle || phase.is_terminal()),
        }
    }
}
