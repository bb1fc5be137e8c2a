use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use slotline_agent::simulation::{
    clarifying_completion, OutboxNotifier, ScriptedModel, SimulatedCalendar,
};
use slotline_agent::{InboundMessage, PipelineEngine, PipelinePorts, PipelineSettings};
use slotline_core::config::{AppConfig, LoadOptions};
use slotline_core::flows::ConversationState;
use slotline_core::scheduling::{Clock, FixedClock, SystemClock};
use slotline_core::trace::TracingTraceSink;
use slotline_gateway::E164Normalizer;
use slotline_store::InMemorySessionStore;
use tracing_subscriber::EnvFilter;

use crate::commands::CommandResult;

/// Monday noon in New York: a greeting, a booking, a clash with the booked
/// slot, then a weekend request.
const DEMO_SCRIPT: &str = r#"
phone = "+15552345678"
now = "2025-01-20T17:00:00Z"

[[turns]]
user = "Hi! I'd like to book an appointment"
model = '''{"extracted_datetime": null, "response_message": "Happy to help! What day and time work for you?", "next_state": "collecting_preferences", "needs_more_info": true, "confidence": 0.2}'''

[[turns]]
user = "How about Thursday at 2pm?"
model = '''```json
{"extracted_datetime": "2025-01-23T14:00:00-05:00", "response_message": "Let me check Thursday at 2:00 PM for you.", "next_state": "checking_availability", "needs_more_info": false, "confidence": 0.92}
```'''

[[turns]]
user = "Can I get Thursday 2pm again for my colleague?"
model = '''{"extracted_datetime": "2025-01-23T14:00:00-05:00", "response_message": "Checking Thursday at 2:00 PM.", "next_state": "checking_availability", "needs_more_info": false, "confidence": 0.9}'''

[[turns]]
user = "Saturday at 10 then"
model = '''{"extracted_datetime": "2025-01-25T10:00:00-05:00", "response_message": "Checking Saturday at 10:00 AM.", "next_state": "checking_availability", "needs_more_info": false, "confidence": 0.85}'''
"#;

#[derive(Debug, Deserialize)]
pub struct Script {
    pub phone: String,
    /// RFC 3339 instant the conversation is pinned to; wall-clock time when
    /// absent.
    pub now: Option<String>,
    pub event_name: Option<String>,
    pub turns: Vec<ScriptTurn>,
}

#[derive(Debug, Deserialize)]
pub struct ScriptTurn {
    pub user: String,
    /// Raw completion the model returns for this message. Omitted turns get
    /// a reply asking for a date and time.
    pub model: Option<String>,
}

/// Machine-readable account of a simulated conversation.
#[derive(Debug, Serialize)]
pub struct SimulationSummary {
    pub phone: String,
    pub turns: Vec<TurnSummary>,
    pub bookings: usize,
    pub messages_sent: usize,
}

#[derive(Debug, Serialize)]
pub struct TurnSummary {
    pub outcome: &'static str,
    pub state: Option<&'static str>,
    pub model_consulted: bool,
}

pub fn parse_script(raw: &str) -> anyhow::Result<Script> {
    let script: Script = toml::from_str(raw).context("script is not valid TOML")?;
    if script.turns.is_empty() {
        bail!("script has no [[turns]]");
    }
    Ok(script)
}

fn load_script(path: Option<&Path>) -> anyhow::Result<Script> {
    match path {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("could not read script `{}`", path.display()))?;
            parse_script(&raw)
        }
        None => parse_script(DEMO_SCRIPT),
    }
}

pub fn run(config_path: Option<&Path>, script_path: Option<&Path>, trace: bool) -> CommandResult {
    let options = LoadOptions {
        config_path: config_path.map(Path::to_path_buf),
        skip_credential_checks: true,
        ..LoadOptions::default()
    };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("simulate", "config_validation", error.to_string(), 2)
        }
    };

    let script = match load_script(script_path) {
        Ok(script) => script,
        Err(error) => return CommandResult::failure("simulate", "script", format!("{error:#}"), 3),
    };

    if trace {
        init_tracing(&config);
    }

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "simulate",
                "runtime",
                format!("failed to initialize async runtime: {error}"),
                4,
            )
        }
    };

    match runtime.block_on(simulate(&config, &script)) {
        Ok((transcript, summary)) => {
            CommandResult::success_with_details("simulate", transcript, &summary)
        }
        Err(error) => CommandResult::failure("simulate", "simulation", format!("{error:#}"), 5),
    }
}

fn init_tracing(config: &AppConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.logging.level.as_str()));
    // A subscriber may already be installed when called from tests.
    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(filter)
        .compact()
        .try_init();
}

async fn simulate(
    config: &AppConfig,
    script: &Script,
) -> anyhow::Result<(String, SimulationSummary)> {
    let rules = config.scheduling.business_rules()?;
    let clock: Arc<dyn Clock> = match script.now.as_deref() {
        Some(now) => {
            let now = DateTime::parse_from_rfc3339(now)
                .with_context(|| format!("`now` is not an RFC 3339 instant: {now}"))?;
            Arc::new(FixedClock::new(now.with_timezone(&Utc)))
        }
        None => Arc::new(SystemClock),
    };

    let model = Arc::new(ScriptedModel::default());
    let calendar =
        Arc::new(SimulatedCalendar::new(script.event_name.as_deref().unwrap_or("Consultation")));
    let notifier = Arc::new(OutboxNotifier::default());
    let engine = PipelineEngine::new(
        PipelinePorts {
            phones: Arc::new(E164Normalizer::default()),
            model: model.clone(),
            calendar: calendar.clone(),
            notifier: notifier.clone(),
            sessions: Arc::new(InMemorySessionStore::new(Arc::clone(&clock))),
            trace: Arc::new(TracingTraceSink),
            clock,
        },
        rules,
        PipelineSettings::from_config(config),
    );

    let mut lines = vec![format!("simulated conversation with {}", script.phone)];
    let mut summary = SimulationSummary {
        phone: script.phone.clone(),
        turns: Vec::with_capacity(script.turns.len()),
        bookings: 0,
        messages_sent: 0,
    };
    for (index, turn) in script.turns.iter().enumerate() {
        model.push(turn.model.clone().unwrap_or_else(clarifying_completion));
        let report = engine
            .run(InboundMessage {
                session_hint: None,
                raw_phone: script.phone.clone(),
                raw_text: turn.user.clone(),
                transport_message_id: format!("SIM{:03}", index + 1),
            })
            .await;
        let unused = model.discard_pending();

        lines.push(format!("> {}", turn.user));
        for sms in notifier.drain() {
            summary.messages_sent += 1;
            lines.push(format!("< {}", sms.text.replace('\n', "\n  ")));
        }
        let state = report.final_state.as_ref().map(ConversationState::as_str);
        lines.push(format!(
            "  [{}] state={}{}",
            report.outcome.label(),
            state.unwrap_or("-"),
            if unused > 0 { " (model not consulted)" } else { "" }
        ));
        summary.turns.push(TurnSummary {
            outcome: report.outcome.label(),
            state,
            model_consulted: unused == 0,
        });
    }
    summary.bookings = calendar.booked().len();
    lines.push(format!("bookings: {}", summary.bookings));

    Ok((lines.join("\n"), summary))
}
