use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, warn};

use slotline_core::domain::intent::{ExtractedElements, Intent};
use slotline_core::domain::session::ConversationTurn;
use slotline_core::errors::CapabilityError;
use slotline_core::flows::ConversationState;
use slotline_core::ports::LanguageModel;

use crate::fallback::{self, FallbackReason};
use crate::llm::{build_turns, PromptContext};
use crate::replies;

const REQUIRED_FIELDS: [&str; 4] =
    ["extracted_datetime", "response_message", "next_state", "needs_more_info"];

/// Layers tried, in order, to turn a raw completion into an [`Intent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecoveryStrategy {
    Strict,
    FenceStrip,
    WhitespaceNormalize,
    BoundaryExtract,
    Fallback,
}

impl RecoveryStrategy {
    /// Every layer that can fail. `Fallback` always succeeds and is not listed.
    pub const CHAIN: [RecoveryStrategy; 4] = [
        RecoveryStrategy::Strict,
        RecoveryStrategy::FenceStrip,
        RecoveryStrategy::WhitespaceNormalize,
        RecoveryStrategy::BoundaryExtract,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::FenceStrip => "fence_strip",
            Self::WhitespaceNormalize => "whitespace_normalize",
            Self::BoundaryExtract => "boundary_extract",
            Self::Fallback => "fallback",
        }
    }

    pub fn attempt(&self, raw: &str) -> Result<Intent, ParseFailure> {
        match self {
            Self::Strict => parse_intent(raw.trim()),
            Self::FenceStrip => {
                let stripped = strip_fences(raw).ok_or(ParseFailure::NoFence)?;
                parse_intent(stripped)
            }
            Self::WhitespaceNormalize => {
                let source = strip_fences(raw).unwrap_or(raw);
                parse_intent(&collapse_whitespace(source))
            }
            Self::BoundaryExtract => {
                let object = object_bounds(raw).ok_or(ParseFailure::NoObjectBoundaries)?;
                parse_intent(&collapse_whitespace(object))
            }
            Self::Fallback => Ok(fallback_intent(raw)),
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ParseFailure {
    #[error("completion was empty")]
    Empty,
    #[error("completion carried no code fence")]
    NoFence,
    #[error("completion contained no `{{...}}` object")]
    NoObjectBoundaries,
    #[error("malformed JSON: {0}")]
    Malformed(String),
    #[error("JSON value was not an object")]
    NotAnObject,
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("field `{0}` had an unusable value")]
    InvalidField(&'static str),
}

/// An intent plus the layer that produced it.
#[derive(Clone, Debug, PartialEq)]
pub struct Recovered {
    pub intent: Intent,
    pub strategy: RecoveryStrategy,
}

/// Runs the recovery chain over a raw completion. Never fails: if every
/// parsing layer rejects the text, the deterministic fallback is used.
pub fn recover_intent(raw: &str) -> Recovered {
    for strategy in RecoveryStrategy::CHAIN {
        match strategy.attempt(raw) {
            Ok(intent) => return Recovered { intent, strategy },
            Err(failure) => {
                debug!(
                    event_name = "intent.recovery_layer_failed",
                    strategy = strategy.as_str(),
                    failure = %failure,
                    "recovery layer rejected completion"
                );
            }
        }
    }

    Recovered { intent: fallback_intent(raw), strategy: RecoveryStrategy::Fallback }
}

fn parse_intent(text: &str) -> Result<Intent, ParseFailure> {
    if text.is_empty() {
        return Err(ParseFailure::Empty);
    }
    let value: Value =
        serde_json::from_str(text).map_err(|error| ParseFailure::Malformed(error.to_string()))?;
    let Value::Object(object) = value else {
        return Err(ParseFailure::NotAnObject);
    };
    intent_from_object(&object)
}

fn intent_from_object(object: &Map<String, Value>) -> Result<Intent, ParseFailure> {
    for field in REQUIRED_FIELDS {
        let present = object.contains_key(field)
            || (field == "extracted_datetime" && object.contains_key("extracted_date_time"));
        if !present {
            return Err(ParseFailure::MissingField(field));
        }
    }

    let extracted_date_time = match object
        .get("extracted_datetime")
        .or_else(|| object.get("extracted_date_time"))
    {
        Some(Value::String(text)) => Some(text.trim().to_string()).filter(|text| !text.is_empty()),
        _ => None,
    };

    let response_message = match object.get("response_message") {
        Some(Value::String(text)) if !text.trim().is_empty() => text.trim().to_string(),
        _ => return Err(ParseFailure::InvalidField("response_message")),
    };

    let needs_more_info = match object.get("needs_more_info") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(text)) => match text.trim().to_ascii_lowercase().as_str() {
            "true" | "yes" => true,
            "false" | "no" => false,
            _ => return Err(ParseFailure::InvalidField("needs_more_info")),
        },
        _ => return Err(ParseFailure::InvalidField("needs_more_info")),
    };

    let next_state = object
        .get("next_state")
        .and_then(Value::as_str)
        .and_then(ConversationState::from_model_label)
        .unwrap_or(if needs_more_info || extracted_date_time.is_none() {
            ConversationState::CollectingPreferences
        } else {
            ConversationState::CheckingAvailability
        });

    let confidence = object
        .get("confidence")
        .and_then(Value::as_f64)
        .map(|value| value.clamp(0.0, 1.0) as f32)
        .unwrap_or(0.0);

    let extracted_elements = object
        .get("extracted_elements")
        .and_then(Value::as_object)
        .map(|elements| ExtractedElements {
            raw_date_text: text_field(elements, &["date_mentioned", "raw_date_text"]),
            raw_time_text: text_field(elements, &["time_mentioned", "raw_time_text"]),
            timezone_hint: text_field(elements, &["timezone", "timezone_hint"]),
        })
        .unwrap_or_default();

    Ok(Intent {
        extracted_date_time,
        response_message,
        next_state,
        needs_more_info,
        confidence,
        extracted_elements,
        fallback_used: false,
    })
}

fn text_field(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| object.get(*key).and_then(Value::as_str))
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(str::to_string)
}

/// Strips a leading ```` ``` ```` (with optional language tag) and a trailing
/// fence. Returns `None` when the text carries no fence at all.
fn strip_fences(raw: &str) -> Option<&str> {
    let trimmed = raw.trim();
    let mut stripped = trimmed;
    if let Some(rest) = stripped.strip_prefix("```") {
        let tag_len = rest.chars().take_while(|ch| ch.is_ascii_alphabetic()).count();
        stripped = &rest[tag_len..];
    }
    if let Some(rest) = stripped.strip_suffix("```") {
        stripped = rest;
    }
    (stripped.len() != trimmed.len()).then(|| stripped.trim())
}

/// Collapses every whitespace run (newlines included) to one space. Raw
/// newlines inside string values are invalid JSON; this repairs them.
fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn object_bounds(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}

fn fallback_intent(raw: &str) -> Intent {
    let message = scavenge_response_message(raw)
        .unwrap_or_else(|| replies::CLARIFY_FALLBACK.to_string());
    Intent::fallback(message)
}

/// Pulls the value of a `"response_message": "..."` pair out of text that
/// failed to parse. Stops at the first unescaped quote.
fn scavenge_response_message(raw: &str) -> Option<String> {
    const KEY: &str = "\"response_message\"";
    let after_key = &raw[raw.find(KEY)? + KEY.len()..];
    let after_colon = after_key.trim_start().strip_prefix(':')?.trim_start();
    let body = after_colon.strip_prefix('"')?;

    let mut message = String::new();
    let mut chars = body.chars();
    loop {
        match chars.next()? {
            '"' => break,
            '\\' => match chars.next()? {
                'n' | 'r' | 't' => message.push(' '),
                escaped => message.push(escaped),
            },
            ch => message.push(ch),
        }
    }

    let collapsed = collapse_whitespace(&message);
    (!collapsed.is_empty()).then_some(collapsed)
}

/// Outcome of one extraction. `backend_error` is set when the model call
/// itself failed and the intent carries the processing-error reply.
#[derive(Clone, Debug, PartialEq)]
pub struct Extraction {
    pub intent: Intent,
    pub strategy: RecoveryStrategy,
    pub backend_error: Option<CapabilityError>,
}

/// Converts a user message into an [`Intent`] by asking the language model
/// and repairing whatever it returns.
#[derive(Clone)]
pub struct IntentExtractor {
    model: Arc<dyn LanguageModel>,
    timeout: Duration,
}

impl IntentExtractor {
    pub fn new(model: Arc<dyn LanguageModel>, timeout: Duration) -> Self {
        Self { model, timeout }
    }

    pub async fn extract(
        &self,
        user_text: &str,
        state: &ConversationState,
        recent_turns: &[ConversationTurn],
        context: &PromptContext,
    ) -> Extraction {
        let turns = build_turns(context, state, recent_turns, user_text);
        let completion = match tokio::time::timeout(self.timeout, self.model.complete(&turns)).await
        {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(self.timeout.as_secs())),
        };

        match completion {
            Ok(raw) => {
                let Recovered { mut intent, strategy } = recover_intent(&raw);
                if strategy == RecoveryStrategy::Fallback {
                    warn!(
                        event_name = "intent.fallback_used",
                        completion_chars = raw.chars().count(),
                        "no recovery layer could parse the model completion"
                    );
                    if scavenge_response_message(&raw).is_none() {
                        let reason = fallback::classify(user_text);
                        debug!(
                            event_name = "intent.fallback_classified",
                            reason = reason.as_str(),
                            "answering from the user's own wording"
                        );
                        intent.response_message = fallback::reply(reason);
                    }
                }
                Extraction { intent, strategy, backend_error: None }
            }
            Err(error) => {
                warn!(
                    event_name = "intent.backend_failed",
                    error = %error,
                    "language model call failed"
                );
                Extraction {
                    intent: Intent::fallback(fallback::reply(FallbackReason::ProcessingError)),
                    strategy: RecoveryStrategy::Fallback,
                    backend_error: Some(error),
                }
            }
        }
    }
}
