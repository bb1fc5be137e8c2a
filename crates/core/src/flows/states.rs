use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConversationState {
    New,
    CollectingPreferences,
    CheckingAvailability,
    Completed,
    Failed,
}

impl ConversationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::CollectingPreferences => "collecting_preferences",
            Self::CheckingAvailability => "checking_availability",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Maps the loosely spelled state names a language model returns. Unknown
    /// names yield `None` so callers can fall back to their own default.
    pub fn from_model_label(label: &str) -> Option<Self> {
        let normalized: String = label
            .trim()
            .chars()
            .filter(|ch| !matches!(ch, '_' | '-' | ' '))
            .flat_map(char::to_lowercase)
            .collect();
        match normalized.as_str() {
            "new" => Some(Self::New),
            "collectingpreferences" | "collecting" => Some(Self::CollectingPreferences),
            "checkingavailability" | "checking" => Some(Self::CheckingAvailability),
            "completed" | "complete" | "booked" => Some(Self::Completed),
            "failed" | "error" => Some(Self::Failed),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationEvent {
    WelcomeSent,
    DateTimeConfirmed,
    BookingCompleted,
    SlotUnavailable,
    MoreInfoNeeded,
    SessionFault,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowAction {
    SendWelcome,
    CheckAvailability,
    SendConfirmation,
    OfferAlternatives,
    AskForPreferences,
    SendGeneralError,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ConversationState,
    pub to: ConversationState,
    pub event: ConversationEvent,
    pub actions: Vec<FlowAction>,
}
