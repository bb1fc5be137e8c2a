use std::sync::Arc;

use chrono::{Datelike, Duration, NaiveTime, TimeZone, Utc, Weekday};
use serde_json::json;
use slotline_agent::simulation::{OutboxNotifier, ScriptedModel, SimulatedCalendar};
use slotline_core::config::AppConfig;
use slotline_core::scheduling::BusinessRules;
use slotline_gateway::{E164Normalizer, Gateways};

use crate::bootstrap::{assemble, Application};

pub fn simulated_gateways() -> (Gateways, Arc<ScriptedModel>, Arc<OutboxNotifier>) {
    let model = Arc::new(ScriptedModel::default());
    let notifier = Arc::new(OutboxNotifier::default());
    let gateways = Gateways {
        phones: Arc::new(E164Normalizer::default()),
        model: model.clone(),
        calendar: Arc::new(SimulatedCalendar::default()),
        notifier: notifier.clone(),
    };
    (gateways, model, notifier)
}

pub fn simulated_app() -> (Application, Arc<ScriptedModel>, Arc<OutboxNotifier>) {
    let (gateways, model, notifier) = simulated_gateways();
    let app = assemble(AppConfig::default(), gateways).expect("default config assembles");
    (app, model, notifier)
}

/// A completion requesting 10am on a weekday at least two days out, which
/// the default business rules accept whenever the test runs.
pub fn booking_completion() -> String {
    let rules = BusinessRules::default();
    let mut date = Utc::now().with_timezone(&rules.timezone).date_naive() + Duration::days(2);
    while matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
        date += Duration::days(1);
    }
    let ten = NaiveTime::from_hms_opt(10, 0, 0).expect("valid time");
    let start = rules
        .timezone
        .from_local_datetime(&date.and_time(ten))
        .single()
        .expect("10am is never ambiguous");

    json!({
        "extracted_datetime": start.to_rfc3339(),
        "response_message": "Let me check that time for you.",
        "next_state": "checking_availability",
        "needs_more_info": false,
        "confidence": 0.9
    })
    .to_string()
}
