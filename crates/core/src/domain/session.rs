use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::flows::states::ConversationState;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub String);

impl SessionId {
    /// Derives a stable id from a canonical phone number so one phone maps to
    /// one conversation.
    pub fn for_phone(canonical_phone: &str) -> Self {
        let digest = Sha256::digest(canonical_phone.as_bytes());
        let prefix: String = digest.iter().take(8).map(|byte| format!("{byte:02x}")).collect();
        Self(format!("sess_{prefix}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Names of the stages a pipeline run can execute, in the order they appear in
/// a full booking run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    PhoneNormalization,
    WelcomeNotify,
    IntentExtraction,
    DateTimeValidation,
    AvailabilityCheck,
    BookingCreation,
    ConfirmationNotify,
    ReplyNotify,
    SessionFinalize,
}

impl StageName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PhoneNormalization => "phone_normalization",
            Self::WelcomeNotify => "welcome_notify",
            Self::IntentExtraction => "intent_extraction",
            Self::DateTimeValidation => "datetime_validation",
            Self::AvailabilityCheck => "availability_check",
            Self::BookingCreation => "booking_creation",
            Self::ConfirmationNotify => "confirmation_notify",
            Self::ReplyNotify => "reply_notify",
            Self::SessionFinalize => "session_finalize",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub user_text: String,
    pub assistant_text: String,
    pub timestamp: DateTime<Utc>,
}

/// One conversation tied to a phone identity.
///
/// `messages` and `steps` are append-only and `last_activity_at` never moves
/// backwards; the fields are private so those rules hold for every caller.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Session {
    id: SessionId,
    phone_number: String,
    state: ConversationState,
    created_at: DateTime<Utc>,
    last_activity_at: DateTime<Utc>,
    messages: Vec<ConversationTurn>,
    steps: Vec<StageName>,
    error_count: u32,
    last_error: Option<String>,
}

impl Session {
    pub fn new(id: SessionId, phone_number: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            id,
            phone_number: phone_number.into(),
            state: ConversationState::New,
            created_at: now,
            last_activity_at: now,
            messages: Vec::new(),
            steps: Vec::new(),
            error_count: 0,
            last_error: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn phone_number(&self) -> &str {
        &self.phone_number
    }

    pub fn state(&self) -> &ConversationState {
        &self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.last_activity_at
    }

    pub fn messages(&self) -> &[ConversationTurn] {
        &self.messages
    }

    pub fn steps(&self) -> &[StageName] {
        &self.steps
    }

    pub fn error_count(&self) -> u32 {
        self.error_count
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// The last `count` turns, oldest first.
    pub fn recent_turns(&self, count: usize) -> &[ConversationTurn] {
        let start = self.messages.len().saturating_sub(count);
        &self.messages[start..]
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        if now > self.last_activity_at {
            self.last_activity_at = now;
        }
    }

    pub fn record_step(&mut self, stage: StageName) {
        self.steps.push(stage);
    }

    pub fn append_turn(&mut self, turn: ConversationTurn) {
        self.messages.push(turn);
    }

    pub fn record_failure(&mut self, reason: impl Into<String>) {
        self.error_count = self.error_count.saturating_add(1);
        self.last_error = Some(reason.into());
    }

    /// Only the flow engine decides whether a transition is legal; this just
    /// stores the outcome.
    pub fn set_state(&mut self, state: ConversationState) {
        self.state = state;
    }

    pub fn is_idle_since(&self, cutoff: DateTime<Utc>) -> bool {
        self.last_activity_at < cutoff
    }
}
