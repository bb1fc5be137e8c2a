//! Canned SMS texts sent by the pipeline.

use slotline_core::domain::booking::{BookingConfirmation, Slot};

const SLOT_FORMAT: &str = "%A, %B %d at %I:%M %p";
const DATE_FORMAT: &str = "%A, %B %d, %Y";
const TIME_FORMAT: &str = "%I:%M %p";
const MAX_ALTERNATIVES: usize = 3;

pub const WELCOME: &str = "👋 Welcome to our appointment booking service!

I'm here to help you schedule an appointment.

Please tell me when you'd like to meet. You can say things like:
• \"Tomorrow at 2pm\"
• \"Next Monday morning\"
• \"Friday afternoon\"

What works best for you?";

/// Reply when the model answered but nothing usable could be recovered.
pub const CLARIFY_FALLBACK: &str =
    "I'd be happy to help you schedule an appointment! Could you please tell me what date and time you'd prefer?";

pub const GENERAL_ERROR: &str =
    "❌ Something went wrong. Please try again or contact support if the problem persists.";

const NO_ALTERNATIVES: &str = "❌ I couldn't find any available times for your request.

Could you please suggest a different date or time? I'll check what's available and get back to you right away.";

pub fn confirmation(booking: &BookingConfirmation) -> String {
    let link = booking
        .booking_url
        .as_deref()
        .map(|url| format!("\n\n🔗 Add to calendar: {url}"))
        .unwrap_or_default();
    format!(
        "✅ Your appointment is confirmed!\n\n📅 {}\n🗓️ {}\n🕐 {}{link}\n\nNeed to reschedule? Just reply with a new time.",
        booking.event_name,
        booking.start.format(DATE_FORMAT),
        booking.start.format(TIME_FORMAT),
    )
}

/// Offers at most three alternatives, or asks for a different time when the
/// calendar suggested none.
pub fn alternatives(slots: &[Slot]) -> String {
    if slots.is_empty() {
        return NO_ALTERNATIVES.to_string();
    }
    let listed = slots
        .iter()
        .take(MAX_ALTERNATIVES)
        .map(|slot| format!("• {}", slot.start.format(SLOT_FORMAT)))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "❌ Sorry, that time isn't available.\n\nHow about these alternatives:\n\n{listed}\n\nPlease choose one or suggest another time that works for you."
    )
}
