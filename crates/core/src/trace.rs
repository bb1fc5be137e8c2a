use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

pub use crate::domain::session::StageName;
use crate::domain::session::SessionId;

const REDACTED: &str = "***REDACTED***";
const SECRET_KEY_MARKERS: &[&str] = &["token", "auth", "secret", "password", "api_key", "apikey"];

/// One stage's execution record. Snapshot values are redacted as they are
/// recorded, so no sink ever receives a raw phone number or credential.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpan {
    pub span_id: String,
    pub stage: StageName,
    pub session_id: Option<SessionId>,
    pub correlation_id: String,
    pub inputs: BTreeMap<String, String>,
    pub outputs: BTreeMap<String, String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
}

impl StageSpan {
    pub fn begin(
        stage: StageName,
        session_id: Option<SessionId>,
        correlation_id: impl Into<String>,
        started_at: DateTime<Utc>,
    ) -> Self {
        Self {
            span_id: Uuid::new_v4().to_string(),
            stage,
            session_id,
            correlation_id: correlation_id.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            started_at,
            duration_ms: 0,
            success: false,
            error: None,
        }
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl AsRef<str>) -> Self {
        let key = key.into();
        let value = redact_value(&key, value.as_ref());
        self.inputs.insert(key, value);
        self
    }

    pub fn record_output(&mut self, key: impl Into<String>, value: impl AsRef<str>) {
        let key = key.into();
        let value = redact_value(&key, value.as_ref());
        self.outputs.insert(key, value);
    }

    pub fn succeed(mut self, finished_at: DateTime<Utc>) -> Self {
        self.duration_ms = elapsed_ms(self.started_at, finished_at);
        self.success = true;
        self.error = None;
        self
    }

    pub fn fail(mut self, finished_at: DateTime<Utc>, error: impl Into<String>) -> Self {
        self.duration_ms = elapsed_ms(self.started_at, finished_at);
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

fn elapsed_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    u64::try_from((end - start).num_milliseconds()).unwrap_or(0)
}

/// Applies the sensitive-field policy for one snapshot entry: phone-like keys
/// keep the last four digits, credential-like keys are blanked entirely.
pub fn redact_value(key: &str, value: &str) -> String {
    let key = key.to_ascii_lowercase();
    if key.contains("phone") || key == "to" || key == "from" || key == "recipient" {
        return mask_phone(value);
    }
    if SECRET_KEY_MARKERS.iter().any(|marker| key.contains(marker)) {
        return REDACTED.to_owned();
    }
    value.to_owned()
}

pub fn mask_phone(value: &str) -> String {
    let digits: Vec<char> = value.chars().filter(char::is_ascii_digit).collect();
    if digits.len() < 4 {
        return "***".to_owned();
    }
    let last_four: String = digits[digits.len() - 4..].iter().collect();
    format!("***-***-{last_four}")
}

pub trait TraceSink: Send + Sync {
    fn stage_started(&self, _stage: StageName, _session_id: Option<&SessionId>) {}

    fn emit(&self, span: StageSpan);
}

/// Writes every span to the `tracing` pipeline.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingTraceSink;

impl TraceSink for TracingTraceSink {
    fn stage_started(&self, stage: StageName, session_id: Option<&SessionId>) {
        tracing::debug!(
            event_name = "pipeline.stage_started",
            stage = stage.as_str(),
            session_id = session_id.map(SessionId::as_str).unwrap_or("-"),
            "stage started"
        );
    }

    fn emit(&self, span: StageSpan) {
        let inputs = serde_json::to_string(&span.inputs).unwrap_or_default();
        let outputs = serde_json::to_string(&span.outputs).unwrap_or_default();
        let session_id = span.session_id.as_ref().map(SessionId::as_str).unwrap_or("-");
        if span.success {
            info!(
                event_name = "pipeline.stage_completed",
                stage = span.stage.as_str(),
                session_id,
                correlation_id = %span.correlation_id,
                duration_ms = span.duration_ms,
                inputs = %inputs,
                outputs = %outputs,
                "stage completed"
            );
        } else {
            warn!(
                event_name = "pipeline.stage_failed",
                stage = span.stage.as_str(),
                session_id,
                correlation_id = %span.correlation_id,
                duration_ms = span.duration_ms,
                error = span.error.as_deref().unwrap_or("unknown"),
                inputs = %inputs,
                "stage failed"
            );
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryTraceSink {
    started: Arc<Mutex<Vec<(StageName, Option<SessionId>)>>>,
    spans: Arc<Mutex<Vec<StageSpan>>>,
}

impl InMemoryTraceSink {
    pub fn spans(&self) -> Vec<StageSpan> {
        match self.spans.lock() {
            Ok(spans) => spans.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn started(&self) -> Vec<(StageName, Option<SessionId>)> {
        match self.started.lock() {
            Ok(started) => started.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn spans_for(&self, stage: StageName) -> Vec<StageSpan> {
        self.spans().into_iter().filter(|span| span.stage == stage).collect()
    }
}

impl TraceSink for InMemoryTraceSink {
    fn stage_started(&self, stage: StageName, session_id: Option<&SessionId>) {
        let entry = (stage, session_id.cloned());
        match self.started.lock() {
            Ok(mut started) => started.push(entry),
            Err(poisoned) => poisoned.into_inner().push(entry),
        }
    }

    fn emit(&self, span: StageSpan) {
        match self.spans.lock() {
            Ok(mut spans) => spans.push(span),
            Err(poisoned) => poisoned.into_inner().push(span),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone, Utc};

    use crate::domain::session::SessionId;
    use crate::trace::{mask_phone, redact_value, InMemoryTraceSink, StageName, StageSpan, TraceSink};

    #[test]
    fn phone_fields_keep_only_last_four_digits() {
        assert_eq!(redact_value("phone_number", "+1 (555) 123-4567"), "***-***-4567");
        assert_eq!(redact_value("raw_phone", "12"), "***");
        assert_eq!(mask_phone("+15551234567"), "***-***-4567");
    }

    #[test]
    fn credential_fields_are_fully_redacted() {
        assert_eq!(redact_value("api_token", "abc"), "***REDACTED***");
        assert_eq!(redact_value("Authorization", "Bearer abc"), "***REDACTED***");
        assert_eq!(redact_value("client_secret", "abc"), "***REDACTED***");
        assert_eq!(redact_value("user_text", "tomorrow at 2pm"), "tomorrow at 2pm");
    }

    #[test]
    fn span_redacts_at_record_time_and_measures_duration() {
        let start = Utc.with_ymd_and_hms(2025, 1, 20, 12, 0, 0).single().expect("valid instant");
        let sink = InMemoryTraceSink::default();
        let session = SessionId("sess_1".to_owned());

        sink.stage_started(StageName::BookingCreation, Some(&session));
        let mut span = StageSpan::begin(StageName::BookingCreation, Some(session), "SM123", start)
            .with_input("phone", "+15551234567")
            .with_input("slot", "2025-01-23T14:00:00-05:00");
        span.record_output("auth_token", "live-secret");
        sink.emit(span.succeed(start + Duration::milliseconds(250)));

        let spans = sink.spans_for(StageName::BookingCreation);
        assert_eq!(spans.len(), 1);
        assert_eq!(spans[0].inputs["phone"], "***-***-4567");
        assert_eq!(spans[0].inputs["slot"], "2025-01-23T14:00:00-05:00");
        assert_eq!(spans[0].outputs["auth_token"], "***REDACTED***");
        assert_eq!(spans[0].duration_ms, 250);
        assert!(spans[0].success);
        assert_eq!(sink.started().len(), 1);
    }

    #[test]
    fn failed_span_carries_error() {
        let start = Utc.with_ymd_and_hms(2025, 1, 20, 12, 0, 0).single().expect("valid instant");
        let span = StageSpan::begin(StageName::AvailabilityCheck, None, "SM9", start)
            .fail(start - Duration::seconds(1), "timed out after 10s");

        assert!(!span.success);
        assert_eq!(span.error.as_deref(), Some("timed out after 10s"));
        assert_eq!(span.duration_ms, 0);
    }
}
