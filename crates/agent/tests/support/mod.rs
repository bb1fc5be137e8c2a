#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, FixedOffset, TimeZone, Utc};

use slotline_agent::simulation::{OutboxNotifier, ScriptedModel, SimulatedCalendar};
use slotline_agent::{InboundMessage, PipelineEngine, PipelinePorts, PipelineSettings};
use slotline_core::ports::{CanonicalPhone, PhoneNormalizer, PhoneRejection};
use slotline_core::scheduling::{BusinessRules, FixedClock};
use slotline_core::trace::InMemoryTraceSink;
use slotline_store::InMemorySessionStore;

pub const PHONE: &str = "+15551234567";

/// Monday 2025-01-20, noon in New York.
pub fn monday_noon() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 1, 20, 17, 0, 0).single().expect("valid instant")
}

pub fn new_york(text: &str) -> DateTime<FixedOffset> {
    DateTime::parse_from_rfc3339(text).expect("valid rfc3339")
}

pub fn model_reply(datetime: Option<&str>, message: &str, needs_more_info: bool) -> String {
    let (next_state, confidence) = if needs_more_info {
        ("collecting_preferences", 0.3)
    } else {
        ("checking_availability", 0.9)
    };
    serde_json::json!({
        "extracted_datetime": datetime,
        "response_message": message,
        "next_state": next_state,
        "needs_more_info": needs_more_info,
        "confidence": confidence,
        "extracted_elements": {"date_mentioned": null, "time_mentioned": null, "timezone": null}
    })
    .to_string()
}

pub fn inbound(id: &str, phone: &str, text: &str) -> InboundMessage {
    InboundMessage {
        session_hint: None,
        raw_phone: phone.to_string(),
        raw_text: text.to_string(),
        transport_message_id: id.to_string(),
    }
}

/// Accepts `+` followed by 11 to 15 digits, ignoring separators.
pub struct PlusDigits;

impl PhoneNormalizer for PlusDigits {
    fn normalize(&self, raw: &str) -> Result<CanonicalPhone, PhoneRejection> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if raw.trim().starts_with('+') && (11..=15).contains(&digits.len()) {
            Ok(CanonicalPhone(format!("+{digits}")))
        } else {
            Err(PhoneRejection::new("not an E.164 number"))
        }
    }
}

pub struct Harness {
    pub engine: Arc<PipelineEngine>,
    pub store: Arc<InMemorySessionStore>,
    pub model: Arc<ScriptedModel>,
    pub calendar: Arc<SimulatedCalendar>,
    pub notifier: Arc<OutboxNotifier>,
    pub trace: InMemoryTraceSink,
    pub clock: FixedClock,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(PipelineSettings::default())
    }

    pub fn with_settings(settings: PipelineSettings) -> Self {
        let clock = FixedClock::new(monday_noon());
        let store = Arc::new(InMemorySessionStore::new(Arc::new(clock.clone())));
        let model = Arc::new(ScriptedModel::default());
        let calendar = Arc::new(SimulatedCalendar::default());
        let notifier = Arc::new(OutboxNotifier::default());
        let trace = InMemoryTraceSink::default();

        let engine = PipelineEngine::new(
            PipelinePorts {
                phones: Arc::new(PlusDigits),
                model: model.clone(),
                calendar: calendar.clone(),
                notifier: notifier.clone(),
                sessions: store.clone(),
                trace: Arc::new(trace.clone()),
                clock: Arc::new(clock.clone()),
            },
            BusinessRules::default(),
            settings,
        );

        Self { engine: Arc::new(engine), store, model, calendar, notifier, trace, clock }
    }
}
