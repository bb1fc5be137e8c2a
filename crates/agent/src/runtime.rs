use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};

use slotline_core::config::AppConfig;
use slotline_core::domain::booking::BookingConfirmation;
use slotline_core::domain::intent::Intent;
use slotline_core::domain::session::{ConversationTurn, Session, SessionId, StageName};
use slotline_core::errors::{CapabilityError, ExternalService, PipelineError, ValidationError};
use slotline_core::flows::{BookingFlow, ConversationEvent, ConversationState, FlowEngine};
use slotline_core::ports::{Calendar, CanonicalPhone, LanguageModel, Notifier, PhoneNormalizer};
use slotline_core::scheduling::{
    BusinessRules, Clock, DateTimeValidator, ValidatedSlot, ValidationReason,
};
use slotline_core::trace::{mask_phone, StageSpan, TraceSink};
use slotline_store::SessionStore;

use crate::conversation::IntentExtractor;
use crate::llm::PromptContext;
use crate::replies;

/// One decoded inbound message, as handed over by the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundMessage {
    pub session_hint: Option<String>,
    pub raw_phone: String,
    pub raw_text: String,
    pub transport_message_id: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum RunOutcome {
    PhoneRejected,
    NeedsMoreInfo,
    DateTimeRejected(ValidationReason),
    SlotUnavailable { alternatives: usize },
    Booked(BookingConfirmation),
    StageFailed(PipelineError),
    SessionFailed,
}

impl RunOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::PhoneRejected => "phone_rejected",
            Self::NeedsMoreInfo => "needs_more_info",
            Self::DateTimeRejected(_) => "datetime_rejected",
            Self::SlotUnavailable { .. } => "slot_unavailable",
            Self::Booked(_) => "booked",
            Self::StageFailed(_) => "stage_failed",
            Self::SessionFailed => "session_failed",
        }
    }
}

/// What a finished run did. `session_id` and `final_state` are absent only
/// when the phone number was rejected before a session existed.
#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub session_id: Option<SessionId>,
    pub outcome: RunOutcome,
    pub final_state: Option<ConversationState>,
    pub reply: Option<String>,
    pub reply_delivered: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PipelineSettings {
    pub history_turns: usize,
    pub stage_timeout: Duration,
    pub appointment_minutes: u32,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self { history_turns: 3, stage_timeout: Duration::from_secs(10), appointment_minutes: 30 }
    }
}

impl PipelineSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            history_turns: config.pipeline.history_turns,
            stage_timeout: Duration::from_secs(config.pipeline.stage_timeout_secs),
            appointment_minutes: config.scheduling.appointment_minutes,
        }
    }
}

/// The collaborators a pipeline run is wired to.
#[derive(Clone)]
pub struct PipelinePorts {
    pub phones: Arc<dyn PhoneNormalizer>,
    pub model: Arc<dyn LanguageModel>,
    pub calendar: Arc<dyn Calendar>,
    pub notifier: Arc<dyn Notifier>,
    pub sessions: Arc<dyn SessionStore>,
    pub trace: Arc<dyn TraceSink>,
    pub clock: Arc<dyn Clock>,
}

/// How a run ends before its reply goes out.
struct Turn {
    outcome: RunOutcome,
    reply: String,
    via: StageName,
}

impl Turn {
    fn reply(outcome: RunOutcome, reply: impl Into<String>) -> Self {
        Self { outcome, reply: reply.into(), via: StageName::ReplyNotify }
    }
}

/// Per-run state threaded through the stages. All session mutation goes
/// through the working copy held by the caller's lease.
struct RunContext<'a> {
    session: &'a mut Session,
    phone: CanonicalPhone,
    correlation_id: String,
}

/// Sequences the stages of one inbound message and applies the failure
/// policy of each. `run` never returns an error: every failure is turned
/// into a canned reply, a failed span, and an `error_count` increment.
#[derive(Clone)]
pub struct PipelineEngine {
    phones: Arc<dyn PhoneNormalizer>,
    calendar: Arc<dyn Calendar>,
    notifier: Arc<dyn Notifier>,
    sessions: Arc<dyn SessionStore>,
    trace: Arc<dyn TraceSink>,
    clock: Arc<dyn Clock>,
    extractor: IntentExtractor,
    validator: DateTimeValidator,
    flow: FlowEngine<BookingFlow>,
    settings: PipelineSettings,
}

impl PipelineEngine {
    pub fn new(ports: PipelinePorts, rules: BusinessRules, settings: PipelineSettings) -> Self {
        Self {
            extractor: IntentExtractor::new(ports.model, settings.stage_timeout),
            phones: ports.phones,
            calendar: ports.calendar,
            notifier: ports.notifier,
            sessions: ports.sessions,
            trace: ports.trace,
            clock: ports.clock,
            validator: DateTimeValidator::new(rules),
            flow: FlowEngine::default(),
            settings,
        }
    }

    pub fn sessions(&self) -> &Arc<dyn SessionStore> {
        &self.sessions
    }

    pub async fn run(&self, message: InboundMessage) -> RunReport {
        let correlation_id = message.transport_message_id.clone();

        let phone = match self.normalize_phone(&message) {
            Ok(phone) => phone,
            Err(error) => return self.reject_phone(&message, error).await,
        };

        let session_id = message
            .session_hint
            .as_deref()
            .map(str::trim)
            .filter(|hint| !hint.is_empty())
            .map(|hint| SessionId(hint.to_string()))
            .unwrap_or_else(|| SessionId::for_phone(phone.as_str()));

        let mut lease = match self.sessions.acquire(&session_id, phone.as_str()).await {
            Ok(lease) => lease,
            Err(store_error) => {
                let error = PipelineError::Internal(store_error.to_string());
                error!(
                    event_name = "pipeline.session_unavailable",
                    session_id = %session_id,
                    correlation_id = %correlation_id,
                    error = %error,
                    "could not acquire session"
                );
                return RunReport {
                    session_id: Some(session_id),
                    outcome: RunOutcome::StageFailed(error),
                    final_state: None,
                    reply: None,
                    reply_delivered: false,
                };
            }
        };

        let now = self.clock.now();
        lease.touch(now);
        lease.record_step(StageName::PhoneNormalization);

        let mut context = RunContext { session: &mut *lease, phone, correlation_id };
        let turn = match self.converse(&mut context, &message.raw_text).await {
            Ok(turn) => turn,
            Err(error) => {
                context.session.record_failure(error.to_string());
                if matches!(error, PipelineError::FlowTransition(_)) {
                    self.fault(&mut context, &error);
                }
                Turn::reply(RunOutcome::StageFailed(error.clone()), error.user_message())
            }
        };

        if !matches!(turn.outcome, RunOutcome::SessionFailed) {
            context.session.append_turn(ConversationTurn {
                user_text: message.raw_text.trim().to_string(),
                assistant_text: turn.reply.clone(),
                timestamp: self.clock.now(),
            });
        }
        let reply_delivered = self.deliver(&mut context, turn.via, &turn.reply).await;

        if let RunOutcome::Booked(booking) = &turn.outcome {
            self.finalize(&mut context, booking);
        }

        let now = self.clock.now();
        context.session.touch(now);
        let final_state = context.session.state().clone();
        let session = lease.commit();

        info!(
            event_name = "pipeline.run_completed",
            session_id = %session.id(),
            correlation_id = %message.transport_message_id,
            outcome = turn.outcome.label(),
            state = final_state.as_str(),
            error_count = session.error_count(),
            "pipeline run completed"
        );

        RunReport {
            session_id: Some(session.id().clone()),
            outcome: turn.outcome,
            final_state: Some(final_state),
            reply: Some(turn.reply),
            reply_delivered,
        }
    }

    async fn converse(
        &self,
        context: &mut RunContext<'_>,
        user_text: &str,
    ) -> Result<Turn, PipelineError> {
        if *context.session.state() == ConversationState::Failed {
            return Ok(Turn::reply(RunOutcome::SessionFailed, replies::GENERAL_ERROR));
        }

        if *context.session.state() == ConversationState::New {
            self.welcome(context).await;
            self.advance(context, ConversationEvent::WelcomeSent)?;
        }

        let mut intent = self.extract(context, user_text).await;

        let Some(candidate) = intent.requested_slot().map(str::to_string) else {
            self.advance(context, ConversationEvent::MoreInfoNeeded)?;
            return Ok(Turn::reply(RunOutcome::NeedsMoreInfo, intent.response_message));
        };

        let slot = match self.validate(context, &candidate) {
            Ok(slot) => slot,
            Err((reason, text)) => {
                intent.reject_slot(text);
                self.advance(context, ConversationEvent::MoreInfoNeeded)?;
                return Ok(Turn::reply(
                    RunOutcome::DateTimeRejected(reason),
                    intent.response_message,
                ));
            }
        };

        self.advance(context, ConversationEvent::DateTimeConfirmed)?;
        self.book(context, &slot).await
    }

    fn normalize_phone(&self, message: &InboundMessage) -> Result<CanonicalPhone, PipelineError> {
        let stage = StageName::PhoneNormalization;
        self.trace.stage_started(stage, None);
        let span = StageSpan::begin(stage, None, &message.transport_message_id, self.clock.now())
            .with_input("raw_phone", &message.raw_phone);

        match self.phones.normalize(&message.raw_phone) {
            Ok(phone) => {
                let mut span = span;
                span.record_output("canonical_phone", phone.as_str());
                self.trace.emit(span.succeed(self.clock.now()));
                Ok(phone)
            }
            Err(rejection) => {
                let error = PipelineError::Validation {
                    kind: ValidationError::Phone,
                    detail: rejection.reason,
                };
                self.trace.emit(span.fail(self.clock.now(), error.to_string()));
                Err(error)
            }
        }
    }

    /// No session is created for an unusable number; the one reply goes to
    /// the raw inbound address.
    async fn reject_phone(&self, message: &InboundMessage, error: PipelineError) -> RunReport {
        warn!(
            event_name = "pipeline.phone_rejected",
            correlation_id = %message.transport_message_id,
            phone = %mask_phone(&message.raw_phone),
            error = %error,
            "inbound phone number rejected"
        );

        let reply = error.user_message();
        let stage = StageName::ReplyNotify;
        self.trace.stage_started(stage, None);
        let mut span =
            StageSpan::begin(stage, None, &message.transport_message_id, self.clock.now())
                .with_input("recipient", &message.raw_phone);

        let delivered = match self.bounded(self.notifier.send(&message.raw_phone, reply)).await {
            Ok(delivery) => {
                span.record_output("provider_id", delivery.provider_id.unwrap_or_default());
                self.trace.emit(span.succeed(self.clock.now()));
                true
            }
            Err(send_error) => {
                let failure = PipelineError::external(ExternalService::Notify, &send_error);
                self.trace.emit(span.fail(self.clock.now(), failure.to_string()));
                false
            }
        };

        RunReport {
            session_id: None,
            outcome: RunOutcome::PhoneRejected,
            final_state: None,
            reply: Some(reply.to_string()),
            reply_delivered: delivered,
        }
    }

    /// Best effort: a failed welcome is counted but the conversation still
    /// moves on to collecting preferences.
    async fn welcome(&self, context: &mut RunContext<'_>) {
        let span = self.begin(context, StageName::WelcomeNotify);
        let span = span.with_input("recipient", context.phone.as_str());
        match self.bounded(self.notifier.send(context.phone.as_str(), replies::WELCOME)).await {
            Ok(delivery) => {
                let mut span = span;
                span.record_output("provider_id", delivery.provider_id.unwrap_or_default());
                self.trace.emit(span.succeed(self.clock.now()));
            }
            Err(send_error) => {
                let error = PipelineError::external(ExternalService::Notify, &send_error);
                self.fail_stage(context, span, &error);
                context.session.record_failure(error.to_string());
            }
        }
    }

    async fn extract(&self, context: &mut RunContext<'_>, user_text: &str) -> Intent {
        let span = self.begin(context, StageName::IntentExtraction);
        let mut span = span
            .with_input("user_text", user_text)
            .with_input("state", context.session.state().as_str());

        let prompt_context = self.prompt_context();
        let history = context.session.recent_turns(self.settings.history_turns).to_vec();
        let extraction = self
            .extractor
            .extract(user_text, context.session.state(), &history, &prompt_context)
            .await;

        span.record_output("strategy", extraction.strategy.as_str());
        span.record_output("fallback_used", extraction.intent.fallback_used.to_string());
        span.record_output("confidence", format!("{:.2}", extraction.intent.confidence));
        if let Some(datetime) = &extraction.intent.extracted_date_time {
            span.record_output("extracted_datetime", datetime);
        }

        match &extraction.backend_error {
            None => self.trace.emit(span.succeed(self.clock.now())),
            Some(backend_error) => {
                let error = PipelineError::external(ExternalService::LanguageModel, backend_error);
                self.fail_stage(context, span, &error);
                context.session.record_failure(error.to_string());
            }
        }

        extraction.intent
    }

    /// A rejected time is an expected conversational outcome, not a stage
    /// failure: the span succeeds and carries the reason.
    fn validate(
        &self,
        context: &mut RunContext<'_>,
        candidate: &str,
    ) -> Result<ValidatedSlot, (ValidationReason, String)> {
        let span = self.begin(context, StageName::DateTimeValidation);
        let mut span = span.with_input("candidate", candidate);

        let result = self.validator.validate_at(candidate, self.clock.now());
        match &result {
            Ok(slot) => {
                span.record_output("valid", "true");
                span.record_output("normalized", slot.normalized_text());
            }
            Err(failure) => {
                span.record_output("valid", "false");
                span.record_output("reason", format!("{:?}", failure.reason));
            }
        }
        self.trace.emit(span.succeed(self.clock.now()));

        result.map_err(|failure| (failure.reason, failure.user_text()))
    }

    async fn book(
        &self,
        context: &mut RunContext<'_>,
        slot: &ValidatedSlot,
    ) -> Result<Turn, PipelineError> {
        let span = self.begin(context, StageName::AvailabilityCheck);
        let mut span = span.with_input("datetime", slot.normalized_text());
        let availability = match self
            .bounded(self.calendar.check_availability(slot, self.settings.appointment_minutes))
            .await
        {
            Ok(availability) => availability,
            Err(calendar_error) => {
                let error = PipelineError::external(ExternalService::Availability, &calendar_error);
                self.fail_stage(context, span, &error);
                return Err(error);
            }
        };
        span.record_output("available", availability.available.to_string());
        span.record_output("alternatives", availability.alternatives.len().to_string());
        self.trace.emit(span.succeed(self.clock.now()));

        if !availability.available {
            self.advance(context, ConversationEvent::SlotUnavailable)?;
            return Ok(Turn::reply(
                RunOutcome::SlotUnavailable { alternatives: availability.alternatives.len() },
                replies::alternatives(&availability.alternatives),
            ));
        }

        let span = self.begin(context, StageName::BookingCreation);
        let mut span = span
            .with_input("datetime", slot.normalized_text())
            .with_input("phone", context.phone.as_str());
        let booking =
            match self.bounded(self.calendar.create_booking(slot, &context.phone)).await {
                Ok(booking) => booking,
                Err(calendar_error) => {
                    let error = PipelineError::external(ExternalService::Booking, &calendar_error);
                    self.fail_stage(context, span, &error);
                    return Err(error);
                }
            };
        span.record_output("booking_id", &booking.booking_id);
        span.record_output("event_name", &booking.event_name);
        self.trace.emit(span.succeed(self.clock.now()));

        // The booking stands even if the confirmation never reaches the user.
        self.advance(context, ConversationEvent::BookingCompleted)?;
        Ok(Turn {
            reply: replies::confirmation(&booking),
            outcome: RunOutcome::Booked(booking),
            via: StageName::ConfirmationNotify,
        })
    }

    async fn deliver(&self, context: &mut RunContext<'_>, stage: StageName, text: &str) -> bool {
        let span = self.begin(context, stage);
        let mut span = span
            .with_input("recipient", context.phone.as_str())
            .with_input("chars", text.chars().count().to_string());
        match self.bounded(self.notifier.send(context.phone.as_str(), text)).await {
            Ok(delivery) => {
                span.record_output("provider_id", delivery.provider_id.unwrap_or_default());
                self.trace.emit(span.succeed(self.clock.now()));
                true
            }
            Err(send_error) => {
                let error = PipelineError::external(ExternalService::Notify, &send_error);
                self.fail_stage(context, span, &error);
                context.session.record_failure(error.to_string());
                false
            }
        }
    }

    fn finalize(&self, context: &mut RunContext<'_>, booking: &BookingConfirmation) {
        let span = self.begin(context, StageName::SessionFinalize);
        let now = self.clock.now();
        let session = &*context.session;
        let conversation_secs = (now - session.created_at()).num_seconds().max(0);
        let steps =
            session.steps().iter().map(StageName::as_str).collect::<Vec<_>>().join(",");

        let mut span = span.with_input("booking_id", &booking.booking_id);
        span.record_output("outcome", "booked");
        span.record_output("conversation_secs", conversation_secs.to_string());
        span.record_output("error_count", session.error_count().to_string());
        span.record_output("messages", session.messages().len().to_string());

        info!(
            event_name = "booking.completed",
            session_id = %session.id(),
            phone = %mask_phone(session.phone_number()),
            booking_id = %booking.booking_id,
            steps = %steps,
            conversation_secs,
            error_count = session.error_count(),
            "appointment booked"
        );
        self.trace.emit(span.succeed(now));
    }

    fn advance(
        &self,
        context: &mut RunContext<'_>,
        event: ConversationEvent,
    ) -> Result<(), PipelineError> {
        let outcome = self.flow.apply(context.session.state(), &event)?;
        context.session.set_state(outcome.to);
        Ok(())
    }

    /// A transition the flow table rejects means the session record is no
    /// longer trustworthy; park it in `Failed`.
    fn fault(&self, context: &mut RunContext<'_>, error: &PipelineError) {
        error!(
            event_name = "pipeline.session_faulted",
            session_id = %context.session.id(),
            correlation_id = %context.correlation_id,
            error = %error,
            "session moved to failed"
        );
        if let Ok(outcome) = self.flow.apply(context.session.state(), &ConversationEvent::SessionFault)
        {
            context.session.set_state(outcome.to);
        }
    }

    fn begin(&self, context: &mut RunContext<'_>, stage: StageName) -> StageSpan {
        self.trace.stage_started(stage, Some(context.session.id()));
        context.session.record_step(stage);
        StageSpan::begin(
            stage,
            Some(context.session.id().clone()),
            context.correlation_id.clone(),
            self.clock.now(),
        )
    }

    fn fail_stage(&self, context: &RunContext<'_>, span: StageSpan, error: &PipelineError) {
        warn!(
            event_name = "pipeline.stage_error",
            session_id = %context.session.id(),
            correlation_id = %context.correlation_id,
            stage = span.stage.as_str(),
            kind = error.kind(),
            error = %error,
            "pipeline stage failed"
        );
        self.trace.emit(span.fail(self.clock.now(), error.to_string()));
    }

    async fn bounded<T>(
        &self,
        call: impl Future<Output = Result<T, CapabilityError>>,
    ) -> Result<T, CapabilityError> {
        let budget = self.settings.stage_timeout;
        match tokio::time::timeout(budget, call).await {
            Ok(result) => result,
            Err(_) => Err(CapabilityError::Timeout(budget.as_secs())),
        }
    }

    fn prompt_context(&self) -> PromptContext {
        let timezone = self.validator.rules().timezone;
        let local = self.clock.now().with_timezone(&timezone);
        let tomorrow = local.date_naive().succ_opt().unwrap_or_else(|| local.date_naive());
        PromptContext {
            current_datetime: local.format("%Y-%m-%d %H:%M (%A)").to_string(),
            tomorrow_date: tomorrow.format("%Y-%m-%d").to_string(),
            timezone: timezone.name().to_string(),
        }
    }
}
