use serde::{Deserialize, Serialize};

use crate::flows::states::ConversationState;

/// Raw fragments the model pulled out of the user's message.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedElements {
    pub raw_date_text: Option<String>,
    pub raw_time_text: Option<String>,
    pub timezone_hint: Option<String>,
}

/// Structured interpretation of one inbound message. Always schema-complete,
/// whether it came from the model or from the fallback path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub extracted_date_time: Option<String>,
    pub response_message: String,
    pub next_state: ConversationState,
    pub needs_more_info: bool,
    pub confidence: f32,
    pub extracted_elements: ExtractedElements,
    pub fallback_used: bool,
}

impl Intent {
    pub fn fallback(response_message: impl Into<String>) -> Self {
        Self {
            extracted_date_time: None,
            response_message: response_message.into(),
            next_state: ConversationState::CollectingPreferences,
            needs_more_info: true,
            confidence: 0.0,
            extracted_elements: ExtractedElements::default(),
            fallback_used: true,
        }
    }

    /// A datetime is only acted on when the model also says it has enough to go on.
    pub fn requested_slot(&self) -> Option<&str> {
        if self.needs_more_info {
            return None;
        }
        self.extracted_date_time.as_deref().map(str::trim).filter(|value| !value.is_empty())
    }

    /// Replaces the reply with a validation complaint and demotes the intent
    /// back to "ask again".
    pub fn reject_slot(&mut self, response_message: impl Into<String>) {
        self.response_message = response_message.into();
        self.extracted_date_time = None;
        self.needs_more_info = true;
        self.next_state = ConversationState::CollectingPreferences;
    }
}
