//! Replies for messages the model could not turn into an intent.
//!
//! When nothing usable came back from the model, the user's own text is
//! scanned for keywords so the reply at least answers what they seemed to
//! want. The choice of reply is deterministic: the same text always gets
//! the same answer.

const CANCEL_KEYWORDS: [&str; 4] = ["cancel", "delete", "remove", "stop"];
const RESCHEDULE_KEYWORDS: [&str; 4] = ["reschedule", "change", "move", "different time"];
const HELP_KEYWORDS: [&str; 4] = ["help", "how", "what", "?"];
const BOOKING_KEYWORDS: [&str; 7] =
    ["book", "schedule", "appointment", "meet", "available", "time", "date"];
const TIME_INDICATORS: [&str; 17] = [
    "tomorrow",
    "today",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "morning",
    "afternoon",
    "evening",
    "am",
    "pm",
    "next",
    "this",
    "week",
];

const EXAMPLES: [&str; 3] = ["Tomorrow at 2pm", "Next Monday at 10:30am", "Friday afternoon around 3pm"];

const GENERAL: &str = "I'm having a bit of trouble understanding your request. Could you please tell me when you'd like to schedule your appointment?";

const DATE_TIME_UNCLEAR: &str = "I want to make sure I get your appointment time right. Could you be more specific about the date and time you prefer?";

const PROCESSING_ERROR: &str = "I'm experiencing some technical difficulties right now. Could you please try sending your appointment request again?";

const ENCOURAGEMENT: &str =
    "No worries! Let's try this step by step. When would you like to schedule your appointment?";

const AMBIGUOUS_REQUEST: &str = "I want to make sure I understand correctly. Are you looking to:
• Book a new appointment
• Reschedule an existing appointment
• Cancel an appointment

Please let me know!";

const CANCELLATION: &str = "I can't cancel appointments over text yet. Please use the link in your confirmation message to cancel, or tell me a new time if you'd like to book another appointment.";

const RESCHEDULING: &str = "Happy to find you a new time! Please use the link in your confirmation message to release the old slot, then tell me the date and time you'd prefer instead.";

const HELP: &str = "📋 I can help you with appointments!

Here's what I can do:
• Book new appointments
• Check availability
• Send confirmations

To book an appointment, just tell me when you'd like to meet:

Examples:
• \"Tomorrow at 2pm\"
• \"Next Monday morning\"
• \"Friday at 3:30pm\"
• \"This Thursday at 10am\"

What would you like to schedule?";

/// Why a run ended up answering without a usable intent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FallbackReason {
    General,
    DateTimeUnclear,
    ProcessingError,
    AmbiguousRequest,
    Cancellation,
    Rescheduling,
    HelpRequest,
}

impl FallbackReason {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::General => "general",
            Self::DateTimeUnclear => "date_time_unclear",
            Self::ProcessingError => "processing_error",
            Self::AmbiguousRequest => "ambiguous_request",
            Self::Cancellation => "cancellation",
            Self::Rescheduling => "rescheduling",
            Self::HelpRequest => "help_request",
        }
    }
}

/// Guesses what the user wanted from their raw text. Checked in order:
/// cancellation, rescheduling, help, then anything that looks like a
/// booking or a time.
pub fn classify(user_text: &str) -> FallbackReason {
    let text = user_text.trim().to_lowercase();
    let mentions = |keywords: &[&str]| keywords.iter().any(|keyword| text.contains(keyword));

    if mentions(&CANCEL_KEYWORDS) {
        FallbackReason::Cancellation
    } else if mentions(&RESCHEDULE_KEYWORDS) {
        FallbackReason::Rescheduling
    } else if mentions(&HELP_KEYWORDS) {
        FallbackReason::HelpRequest
    } else if mentions(&BOOKING_KEYWORDS) || mentions(&TIME_INDICATORS) {
        FallbackReason::DateTimeUnclear
    } else {
        FallbackReason::AmbiguousRequest
    }
}

pub fn reply(reason: FallbackReason) -> String {
    match reason {
        FallbackReason::General => with_examples(GENERAL),
        FallbackReason::DateTimeUnclear => with_examples(DATE_TIME_UNCLEAR),
        FallbackReason::ProcessingError => format!("{PROCESSING_ERROR}\n\n{ENCOURAGEMENT}"),
        FallbackReason::AmbiguousRequest => AMBIGUOUS_REQUEST.to_string(),
        FallbackReason::Cancellation => CANCELLATION.to_string(),
        FallbackReason::Rescheduling => RESCHEDULING.to_string(),
        FallbackReason::HelpRequest => HELP.to_string(),
    }
}

fn with_examples(base: &str) -> String {
    let listed = EXAMPLES.iter().map(|example| format!("• {example}")).collect::<Vec<_>>();
    format!("{base}\n\nHere are some examples:\n{}", listed.join("\n"))
}
