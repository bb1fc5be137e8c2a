mod support;

use std::sync::Arc;
use std::time::Duration;

use slotline_agent::fallback::{self, FallbackReason};
use slotline_agent::simulation::OutboundSms;
use slotline_agent::{replies, PipelineSettings, RunOutcome};
use slotline_core::domain::booking::{Availability, Slot};
use slotline_core::domain::session::{SessionId, StageName};
use slotline_core::errors::{CapabilityError, ExternalService, PipelineError};
use slotline_core::flows::ConversationState;
use slotline_core::ports::PromptRole;
use slotline_core::scheduling::ValidationReason;
use slotline_store::SessionStore;

use support::{inbound, model_reply, new_york, Harness, PHONE};

const BOOKED_SEQUENCE: [StageName; 8] = [
    StageName::PhoneNormalization,
    StageName::WelcomeNotify,
    StageName::IntentExtraction,
    StageName::DateTimeValidation,
    StageName::AvailabilityCheck,
    StageName::BookingCreation,
    StageName::ConfirmationNotify,
    StageName::SessionFinalize,
];

fn tomorrow_at_two() -> String {
    model_reply(Some("2025-01-21 14:00"), "Great! Let me check tomorrow at 2 PM.", false)
}

#[tokio::test]
async fn weekday_request_books_and_confirms() {
    let harness = Harness::new();
    harness.model.push(tomorrow_at_two());

    let report = harness.engine.run(inbound("SM1", PHONE, "book tomorrow at 2pm")).await;

    assert!(matches!(report.outcome, RunOutcome::Booked(ref booking) if booking.booking_id == "sim-0001"));
    assert_eq!(report.final_state, Some(ConversationState::Completed));
    assert!(report.reply_delivered);

    let session_id = report.session_id.expect("session created");
    assert_eq!(session_id, SessionId::for_phone(PHONE));
    let session = harness.store.find(&session_id).await.expect("find").expect("stored");
    assert_eq!(session.steps(), &BOOKED_SEQUENCE);
    assert_eq!(session.error_count(), 0);
    assert_eq!(session.messages().len(), 1);
    assert_eq!(session.messages()[0].user_text, "book tomorrow at 2pm");
    assert_eq!(Some(session.messages()[0].assistant_text.clone()), report.reply);

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(
        sent[0],
        OutboundSms { recipient: PHONE.to_string(), text: replies::WELCOME.to_string() }
    );
    assert!(sent[1].text.contains("Your appointment is confirmed"));
    assert_eq!(harness.calendar.booking_calls(), 1);
    assert_eq!(harness.trace.spans_for(StageName::SessionFinalize).len(), 1);
}

#[tokio::test]
async fn failed_confirmation_does_not_undo_booking() {
    let harness = Harness::new();
    harness.model.push(tomorrow_at_two());
    harness.notifier.fail_when_text_contains("confirmed");

    let report = harness.engine.run(inbound("SM1", PHONE, "book tomorrow at 2pm")).await;

    assert!(matches!(report.outcome, RunOutcome::Booked(_)));
    assert_eq!(report.final_state, Some(ConversationState::Completed));
    assert!(!report.reply_delivered);

    let session_id = report.session_id.expect("session created");
    let session = harness.store.find(&session_id).await.expect("find").expect("stored");
    assert!(session.steps().contains(&StageName::BookingCreation));
    assert!(session.steps().contains(&StageName::ConfirmationNotify));
    assert_eq!(session.error_count(), 1);

    let confirmation = harness.trace.spans_for(StageName::ConfirmationNotify);
    assert_eq!(confirmation.len(), 1);
    assert!(!confirmation[0].success);
}

#[tokio::test]
async fn welcome_failure_is_counted_but_conversation_continues() {
    let harness = Harness::new();
    harness.model.push(model_reply(None, "What day works for you?", true));
    harness.notifier.fail_when_text_contains("Welcome");

    let report = harness.engine.run(inbound("SM1", PHONE, "hi there")).await;

    assert_eq!(report.outcome, RunOutcome::NeedsMoreInfo);
    assert_eq!(report.final_state, Some(ConversationState::CollectingPreferences));
    assert_eq!(report.reply.as_deref(), Some("What day works for you?"));
    assert!(report.reply_delivered);

    let session_id = report.session_id.expect("session created");
    let session = harness.store.find(&session_id).await.expect("find").expect("stored");
    assert_eq!(session.error_count(), 1);
    assert!(session.steps().contains(&StageName::IntentExtraction));

    let welcome = harness.trace.spans_for(StageName::WelcomeNotify);
    assert_eq!(welcome.len(), 1);
    assert!(!welcome[0].success);
    assert_eq!(harness.trace.spans_for(StageName::IntentExtraction).len(), 1);
    assert_eq!(harness.model.calls().len(), 1);
    assert!(harness.notifier.sent().iter().all(|sms| sms.text != replies::WELCOME));
}

#[tokio::test]
async fn unreadable_completion_is_answered_from_the_users_wording() {
    let harness = Harness::new();
    harness.model.push("Sorry, I am not sure what you mean.");

    let report = harness.engine.run(inbound("SM1", PHONE, "cancel my thing")).await;

    assert_eq!(report.outcome, RunOutcome::NeedsMoreInfo);
    assert_eq!(report.reply, Some(fallback::reply(FallbackReason::Cancellation)));
    assert_eq!(report.final_state, Some(ConversationState::CollectingPreferences));
    assert_eq!(harness.calendar.availability_calls(), 0);

    let extraction = harness.trace.spans_for(StageName::IntentExtraction);
    assert_eq!(extraction[0].outputs.get("strategy").map(String::as_str), Some("fallback"));
}

#[tokio::test]
async fn unnormalizable_phone_creates_no_session_and_replies_once() {
    let harness = Harness::new();

    let report = harness.engine.run(inbound("SM1", "call me maybe", "tomorrow at 2pm")).await;

    assert_eq!(report.outcome, RunOutcome::PhoneRejected);
    assert_eq!(report.session_id, None);
    assert_eq!(report.final_state, None);
    assert!(harness.store.list().await.expect("list").is_empty());
    assert!(harness.model.calls().is_empty());

    let sent = harness.notifier.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].recipient, "call me maybe");
    let expected = PipelineError::Validation {
        kind: slotline_core::errors::ValidationError::Phone,
        detail: String::new(),
    };
    assert_eq!(sent[0].text, expected.user_message());

    let normalization = harness.trace.spans_for(StageName::PhoneNormalization);
    assert_eq!(normalization.len(), 1);
    assert!(!normalization[0].success);
}

#[tokio::test]
async fn unavailable_slot_offers_alternatives_without_booking() {
    let harness = Harness::new();
    harness.model.push(tomorrow_at_two());
    harness.calendar.override_availability(Ok(Availability::unavailable(vec![
        Slot::new(new_york("2025-01-21T15:00:00-05:00"), 30),
        Slot::new(new_york("2025-01-21T16:30:00-05:00"), 30),
    ])));

    let report = harness.engine.run(inbound("SM1", PHONE, "book tomorrow at 2pm")).await;

    assert_eq!(report.outcome, RunOutcome::SlotUnavailable { alternatives: 2 });
    assert_eq!(report.final_state, Some(ConversationState::CollectingPreferences));
    assert_eq!(harness.calendar.booking_calls(), 0);

    let reply = report.reply.expect("reply sent");
    assert!(reply.contains("How about these alternatives"));
    assert!(reply.contains("03:00 PM"));
    assert!(reply.contains("04:30 PM"));
    assert_eq!(harness.notifier.sent().last().map(|sms| sms.text.clone()), Some(reply));
}

#[tokio::test]
async fn weekend_request_is_rejected_with_suggested_fix() {
    let harness = Harness::new();
    harness.model.push(model_reply(Some("2025-01-25 14:00"), "Checking Saturday!", false));

    let report = harness.engine.run(inbound("SM1", PHONE, "saturday at 2")).await;

    assert_eq!(report.outcome, RunOutcome::DateTimeRejected(ValidationReason::OutsideWeekdays));
    assert_eq!(report.final_state, Some(ConversationState::CollectingPreferences));
    assert_eq!(
        report.reply.as_deref(),
        Some("Appointments are only available Monday through Friday. Please choose a weekday")
    );
    assert_eq!(harness.calendar.availability_calls(), 0);

    let session_id = report.session_id.expect("session created");
    let session = harness.store.find(&session_id).await.expect("find").expect("stored");
    assert_eq!(session.error_count(), 0);
    assert_eq!(session.messages()[0].assistant_text, report.reply.clone().unwrap_or_default());
}

#[tokio::test]
async fn past_weekend_request_reports_past_first() {
    let harness = Harness::new();
    harness.model.push(model_reply(Some("2025-01-18 14:00"), "Checking!", false));

    let report = harness.engine.run(inbound("SM1", PHONE, "last saturday at 2")).await;

    assert_eq!(report.outcome, RunOutcome::DateTimeRejected(ValidationReason::PastDateTime));
}

#[tokio::test]
async fn vague_request_relays_model_question() {
    let harness = Harness::new();
    harness.model.push(model_reply(None, "Which day next week works best?", true));

    let report = harness.engine.run(inbound("SM1", PHONE, "sometime next week")).await;

    assert_eq!(report.outcome, RunOutcome::NeedsMoreInfo);
    assert_eq!(report.reply.as_deref(), Some("Which day next week works best?"));
    assert_eq!(report.final_state, Some(ConversationState::CollectingPreferences));
    assert_eq!(harness.calendar.availability_calls(), 0);
}

#[tokio::test]
async fn fenced_completion_with_newlines_still_books() {
    let harness = Harness::new();
    harness.model.push(
        "```json\n{\n  \"extracted_datetime\": \"2025-01-21 14:00\",\n  \"response_message\": \"Checking\ntomorrow.\",\n  \"next_state\": \"checking_availability\",\n  \"needs_more_info\": false\n}\n```",
    );

    let report = harness.engine.run(inbound("SM1", PHONE, "tomorrow 2pm")).await;

    assert!(matches!(report.outcome, RunOutcome::Booked(_)));
    let extraction = harness.trace.spans_for(StageName::IntentExtraction);
    assert_eq!(
        extraction[0].outputs.get("strategy").map(String::as_str),
        Some("whitespace_normalize")
    );
}

#[tokio::test]
async fn model_outage_is_counted_and_answered_with_apology() {
    let harness = Harness::new();
    harness.model.push_failure(CapabilityError::Transport("connection reset".to_string()));

    let report = harness.engine.run(inbound("SM1", PHONE, "tomorrow at 2pm")).await;

    assert_eq!(report.outcome, RunOutcome::NeedsMoreInfo);
    assert_eq!(report.reply, Some(fallback::reply(FallbackReason::ProcessingError)));
    assert_eq!(report.final_state, Some(ConversationState::CollectingPreferences));

    let session_id = report.session_id.expect("session created");
    let session = harness.store.find(&session_id).await.expect("find").expect("stored");
    assert_eq!(session.error_count(), 1);
    assert!(!harness.trace.spans_for(StageName::IntentExtraction)[0].success);
}

#[tokio::test(start_paused = true)]
async fn slow_calendar_times_out_like_any_other_failure() {
    let harness = Harness::with_settings(PipelineSettings {
        stage_timeout: Duration::from_secs(2),
        ..PipelineSettings::default()
    });
    harness.model.push(tomorrow_at_two());
    harness.calendar.set_delay(Duration::from_secs(30));

    let report = harness.engine.run(inbound("SM1", PHONE, "tomorrow at 2pm")).await;

    let expected = PipelineError::external(ExternalService::Availability, &CapabilityError::Timeout(2));
    assert_eq!(report.outcome, RunOutcome::StageFailed(expected.clone()));
    assert_eq!(report.reply.as_deref(), Some(expected.user_message()));
    assert_eq!(report.final_state, Some(ConversationState::CheckingAvailability));
    assert_eq!(harness.calendar.booking_calls(), 0);
}

#[tokio::test]
async fn booking_failure_sends_booking_error_and_keeps_state() {
    let harness = Harness::new();
    harness.model.push(tomorrow_at_two());
    harness.calendar.fail_bookings_with(CapabilityError::Rejected {
        status: 409,
        message: "slot already taken".to_string(),
    });

    let report = harness.engine.run(inbound("SM1", PHONE, "tomorrow at 2pm")).await;

    assert!(matches!(
        report.outcome,
        RunOutcome::StageFailed(PipelineError::ExternalService { service: ExternalService::Booking, .. })
    ));
    assert_eq!(report.final_state, Some(ConversationState::CheckingAvailability));
    let session_id = report.session_id.expect("session created");
    let session = harness.store.find(&session_id).await.expect("find").expect("stored");
    assert_eq!(session.error_count(), 1);
    assert!(session.last_error().is_some_and(|error| error.contains("slot already taken")));
    assert!(!session.steps().contains(&StageName::ConfirmationNotify));
}

#[tokio::test]
async fn follow_up_message_skips_welcome_and_carries_history() {
    let harness = Harness::new();
    harness.model.push(model_reply(None, "What day works for you?", true));
    harness.model.push(tomorrow_at_two());

    harness.engine.run(inbound("SM1", PHONE, "hi there")).await;
    let report = harness.engine.run(inbound("SM2", PHONE, "tomorrow at 2pm")).await;

    assert!(matches!(report.outcome, RunOutcome::Booked(_)));
    let welcomes =
        harness.notifier.sent().iter().filter(|sms| sms.text == replies::WELCOME).count();
    assert_eq!(welcomes, 1);

    let calls = harness.model.calls();
    assert_eq!(calls.len(), 2);
    let second = &calls[1];
    assert_eq!(second[1].role, PromptRole::User);
    assert_eq!(second[1].content, "hi there");
    assert_eq!(second[2].role, PromptRole::Assistant);
    assert_eq!(second[2].content, "What day works for you?");
    assert_eq!(second.last().map(|turn| turn.content.as_str()), Some("tomorrow at 2pm"));
}

#[tokio::test]
async fn failed_session_only_receives_general_error() {
    let harness = Harness::new();
    let id = SessionId::for_phone(PHONE);
    let mut lease = harness.store.acquire(&id, PHONE).await.expect("acquire");
    lease.set_state(ConversationState::Failed);
    lease.commit();

    let report = harness.engine.run(inbound("SM1", PHONE, "tomorrow at 2pm")).await;

    assert_eq!(report.outcome, RunOutcome::SessionFailed);
    assert_eq!(report.reply.as_deref(), Some(replies::GENERAL_ERROR));
    assert!(harness.model.calls().is_empty());
    let session = harness.store.find(&id).await.expect("find").expect("stored");
    assert_eq!(session.steps(), &[StageName::PhoneNormalization, StageName::ReplyNotify]);
}

#[tokio::test]
async fn session_hint_overrides_phone_derived_id() {
    let harness = Harness::new();
    let mut message = inbound("SM1", PHONE, "hello");
    message.session_hint = Some("sess_from_transport".to_string());

    let report = harness.engine.run(message).await;

    assert_eq!(report.session_id, Some(SessionId("sess_from_transport".to_string())));
    assert!(harness.store.find(&SessionId::for_phone(PHONE)).await.expect("find").is_none());
}

#[tokio::test]
async fn spans_are_redacted_and_paired_with_starts() {
    let harness = Harness::new();
    harness.model.push(tomorrow_at_two());

    harness.engine.run(inbound("SM1", PHONE, "book tomorrow at 2pm")).await;

    let spans = harness.trace.spans();
    assert_eq!(spans.len(), harness.trace.started().len());
    assert!(spans.iter().all(|span| span.correlation_id == "SM1"));

    let welcome = &harness.trace.spans_for(StageName::WelcomeNotify)[0];
    assert_eq!(welcome.inputs.get("recipient").map(String::as_str), Some("***-***-4567"));

    let serialized = serde_json::to_string(&spans).expect("spans serialize");
    assert!(!serialized.contains("5551234567"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_for_one_session_never_interleave() {
    let harness = Harness::new();
    harness.model.push(tomorrow_at_two());
    harness.model.push(model_reply(Some("2025-01-21 15:00"), "Checking 3 PM.", false));
    harness.calendar.set_delay(Duration::from_millis(25));

    let first = {
        let engine = Arc::clone(&harness.engine);
        tokio::spawn(async move { engine.run(inbound("SM1", PHONE, "tomorrow at 2pm")).await })
    };
    let second = {
        let engine = Arc::clone(&harness.engine);
        tokio::spawn(async move { engine.run(inbound("SM2", PHONE, "tomorrow at 3pm")).await })
    };
    let first = first.await.expect("first run");
    let second = second.await.expect("second run");
    assert_eq!(first.session_id, second.session_id);

    let session_id = first.session_id.expect("session created");
    let session = harness.store.find(&session_id).await.expect("find").expect("stored");

    // Whichever run takes the lock first sees a new session and sends the welcome.
    let rebooking: Vec<StageName> =
        BOOKED_SEQUENCE.iter().copied().filter(|stage| *stage != StageName::WelcomeNotify).collect();
    let expected: Vec<StageName> = BOOKED_SEQUENCE.iter().copied().chain(rebooking).collect();
    assert_eq!(session.steps(), expected.as_slice());
    assert_eq!(session.messages().len(), 2);
    assert_eq!(harness.calendar.booked().len(), 2);
}
