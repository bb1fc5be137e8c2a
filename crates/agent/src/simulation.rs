//! In-process collaborators for offline runs. `slotline simulate` drives the
//! real engine through these, and router and pipeline tests use them to stay
//! off the network. Each one can be told to fail so error paths run offline
//! too.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset};
use serde_json::json;

use slotline_core::domain::booking::{Availability, BookingConfirmation, Delivery, Slot};
use slotline_core::errors::CapabilityError;
use slotline_core::ports::{Calendar, CanonicalPhone, LanguageModel, Notifier, PromptTurn};
use slotline_core::scheduling::ValidatedSlot;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Replays completions in order. Once the script is exhausted every call
/// gets a reply asking for a date and time.
#[derive(Default)]
pub struct ScriptedModel {
    script: Mutex<VecDeque<Result<String, CapabilityError>>>,
    calls: Mutex<Vec<Vec<PromptTurn>>>,
}

impl ScriptedModel {
    pub fn new(script: impl IntoIterator<Item = String>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().map(Ok).collect()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, completion: impl Into<String>) {
        lock(&self.script).push_back(Ok(completion.into()));
    }

    /// Queues a backend failure in place of the next completion.
    pub fn push_failure(&self, error: CapabilityError) {
        lock(&self.script).push_back(Err(error));
    }

    /// Every prompt the model was asked to complete, oldest first.
    pub fn calls(&self) -> Vec<Vec<PromptTurn>> {
        lock(&self.calls).clone()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.script).len()
    }

    /// Drops completions no run asked for; returns how many there were.
    pub fn discard_pending(&self) -> usize {
        let mut script = lock(&self.script);
        let pending = script.len();
        script.clear();
        pending
    }
}

pub fn clarifying_completion() -> String {
    json!({
        "extracted_datetime": null,
        "response_message": "What day and time would work best for you?",
        "next_state": "collecting_preferences",
        "needs_more_info": true,
        "confidence": 0.0,
        "extracted_elements": {"date_mentioned": null, "time_mentioned": null, "timezone": null}
    })
    .to_string()
}

#[async_trait]
impl LanguageModel for ScriptedModel {
    async fn complete(&self, turns: &[PromptTurn]) -> Result<String, CapabilityError> {
        lock(&self.calls).push(turns.to_vec());
        lock(&self.script).pop_front().unwrap_or_else(|| Ok(clarifying_completion()))
    }
}

/// A calendar with every slot open until it is booked. Taken slots are
/// answered with the next free hours.
pub struct SimulatedCalendar {
    event_name: String,
    booked: Mutex<Vec<DateTime<FixedOffset>>>,
    next_id: AtomicU64,
    availability_override: Mutex<Option<Result<Availability, CapabilityError>>>,
    booking_failure: Mutex<Option<CapabilityError>>,
    delay: Mutex<Option<StdDuration>>,
    availability_calls: AtomicUsize,
    booking_calls: AtomicUsize,
}

impl Default for SimulatedCalendar {
    fn default() -> Self {
        Self::new("Consultation")
    }
}

impl SimulatedCalendar {
    pub fn new(event_name: impl Into<String>) -> Self {
        Self {
            event_name: event_name.into(),
            booked: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            availability_override: Mutex::new(None),
            booking_failure: Mutex::new(None),
            delay: Mutex::new(None),
            availability_calls: AtomicUsize::new(0),
            booking_calls: AtomicUsize::new(0),
        }
    }

    pub fn booked(&self) -> Vec<DateTime<FixedOffset>> {
        lock(&self.booked).clone()
    }

    /// Answers every availability check with `availability` instead of
    /// consulting the booked slots.
    pub fn override_availability(&self, availability: Result<Availability, CapabilityError>) {
        *lock(&self.availability_override) = Some(availability);
    }

    pub fn fail_bookings_with(&self, error: CapabilityError) {
        *lock(&self.booking_failure) = Some(error);
    }

    /// Holds each availability check for `delay` before answering.
    pub fn set_delay(&self, delay: StdDuration) {
        *lock(&self.delay) = Some(delay);
    }

    pub fn availability_calls(&self) -> usize {
        self.availability_calls.load(Ordering::SeqCst)
    }

    pub fn booking_calls(&self) -> usize {
        self.booking_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Calendar for SimulatedCalendar {
    async fn check_availability(
        &self,
        slot: &ValidatedSlot,
        duration_minutes: u32,
    ) -> Result<Availability, CapabilityError> {
        self.availability_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *lock(&self.delay);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(answer) = lock(&self.availability_override).clone() {
            return answer;
        }

        let booked = lock(&self.booked);
        let requested = slot.normalized;
        if !booked.contains(&requested) {
            return Ok(Availability::confirmed(Slot::new(requested, duration_minutes)));
        }

        let alternatives = (1..=8)
            .map(|hours| requested + Duration::hours(hours))
            .filter(|start| !booked.contains(start))
            .take(3)
            .map(|start| Slot::new(start, duration_minutes))
            .collect();
        Ok(Availability::unavailable(alternatives))
    }

    async fn create_booking(
        &self,
        slot: &ValidatedSlot,
        _phone: &CanonicalPhone,
    ) -> Result<BookingConfirmation, CapabilityError> {
        self.booking_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = lock(&self.booking_failure).clone() {
            return Err(error);
        }

        let mut booked = lock(&self.booked);
        if booked.contains(&slot.normalized) {
            return Err(CapabilityError::Rejected {
                status: 409,
                message: "slot already booked".to_string(),
            });
        }
        booked.push(slot.normalized);

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Ok(BookingConfirmation {
            booking_id: format!("sim-{id:04}"),
            booking_url: None,
            event_name: self.event_name.clone(),
            start: slot.normalized,
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundSms {
    pub recipient: String,
    pub text: String,
}

/// Keeps every message instead of sending it.
#[derive(Default)]
pub struct OutboxNotifier {
    sent: Mutex<Vec<OutboundSms>>,
    fail_marker: Mutex<Option<String>>,
}

impl OutboxNotifier {
    /// Rejects any message whose text contains `marker`, the way a carrier
    /// refuses an unreachable handset.
    pub fn fail_when_text_contains(&self, marker: &str) {
        *lock(&self.fail_marker) = Some(marker.to_string());
    }

    pub fn sent(&self) -> Vec<OutboundSms> {
        lock(&self.sent).clone()
    }

    /// Messages sent since the last call.
    pub fn drain(&self) -> Vec<OutboundSms> {
        std::mem::take(&mut *lock(&self.sent))
    }
}

#[async_trait]
impl Notifier for OutboxNotifier {
    async fn send(&self, recipient: &str, text: &str) -> Result<Delivery, CapabilityError> {
        let marker = lock(&self.fail_marker).clone();
        if marker.is_some_and(|marker| text.contains(&marker)) {
            return Err(CapabilityError::Rejected {
                status: 400,
                message: "unreachable handset".to_string(),
            });
        }
        let mut sent = lock(&self.sent);
        sent.push(OutboundSms { recipient: recipient.to_string(), text: text.to_string() });
        Ok(Delivery { provider_id: Some(format!("sim-msg-{}", sent.len())) })
    }
}
