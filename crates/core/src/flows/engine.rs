use thiserror::Error;
use tracing::debug;

use crate::flows::states::{ConversationEvent, ConversationState, FlowAction, TransitionOutcome};

pub trait FlowDefinition {
    fn initial_state(&self) -> ConversationState;
    fn transition(
        &self,
        current: &ConversationState,
        event: &ConversationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError>;
}

/// The appointment-booking conversation.
#[derive(Clone, Debug, Default)]
pub struct BookingFlow;

impl FlowDefinition for BookingFlow {
    fn initial_state(&self) -> ConversationState {
        ConversationState::New
    }

    fn transition(
        &self,
        current: &ConversationState,
        event: &ConversationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_booking(current, event)
    }
}

#[derive(Clone, Debug)]
pub struct FlowEngine<F> {
    flow: F,
}

impl<F> FlowEngine<F>
where
    F: FlowDefinition,
{
    pub fn new(flow: F) -> Self {
        Self { flow }
    }

    pub fn initial_state(&self) -> ConversationState {
        self.flow.initial_state()
    }

    pub fn apply(
        &self,
        current: &ConversationState,
        event: &ConversationEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        let result = self.flow.transition(current, event);
        match &result {
            Ok(outcome) => debug!(
                event_name = "flow.transition_applied",
                from = outcome.from.as_str(),
                to = outcome.to.as_str(),
                trigger = ?outcome.event,
                "conversation transition applied"
            ),
            Err(error) => debug!(
                event_name = "flow.transition_rejected",
                error = %error,
                "conversation transition rejected"
            ),
        }
        result
    }
}

impl Default for FlowEngine<BookingFlow> {
    fn default() -> Self {
        Self::new(BookingFlow)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ConversationState, event: ConversationEvent },
}

fn transition_booking(
    current: &ConversationState,
    event: &ConversationEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ConversationEvent::{
        BookingCompleted, DateTimeConfirmed, MoreInfoNeeded, SessionFault, SlotUnavailable,
        WelcomeSent,
    };
    use ConversationState::{
        CheckingAvailability, CollectingPreferences, Completed, Failed, New,
    };
    use FlowAction::{
        AskForPreferences, CheckAvailability, OfferAlternatives, SendConfirmation,
        SendGeneralError,
    };

    let (to, actions) = match (current, event) {
        (Failed, _) => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
        (_, SessionFault) => (Failed, vec![SendGeneralError]),
        (New, WelcomeSent) => (CollectingPreferences, vec![AskForPreferences]),
        (CollectingPreferences, DateTimeConfirmed)
        | (CheckingAvailability, DateTimeConfirmed)
        | (Completed, DateTimeConfirmed) => (CheckingAvailability, vec![CheckAvailability]),
        (CheckingAvailability, BookingCompleted) => (Completed, vec![SendConfirmation]),
        (CheckingAvailability, SlotUnavailable) => (CollectingPreferences, vec![OfferAlternatives]),
        (CollectingPreferences, MoreInfoNeeded)
        | (CheckingAvailability, MoreInfoNeeded)
        | (Completed, MoreInfoNeeded) => (CollectingPreferences, vec![AskForPreferences]),
        _ => {
            return Err(FlowTransitionError::InvalidTransition {
                state: current.clone(),
                event: event.clone(),
            });
        }
    };

    Ok(TransitionOutcome { from: current.clone(), to, event: event.clone(), actions })
}
