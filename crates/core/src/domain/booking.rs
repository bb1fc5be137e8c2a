use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// A candidate or confirmed appointment window.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: DateTime<FixedOffset>,
    pub duration_minutes: u32,
}

impl Slot {
    pub fn new(start: DateTime<FixedOffset>, duration_minutes: u32) -> Self {
        Self { start, duration_minutes }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    pub available: bool,
    pub confirmed_slot: Option<Slot>,
    pub alternatives: Vec<Slot>,
}

impl Availability {
    pub fn confirmed(slot: Slot) -> Self {
        Self { available: true, confirmed_slot: Some(slot), alternatives: Vec::new() }
    }

    pub fn unavailable(alternatives: Vec<Slot>) -> Self {
        Self { available: false, confirmed_slot: None, alternatives }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingConfirmation {
    pub booking_id: String,
    pub booking_url: Option<String>,
    pub event_name: String,
    pub start: DateTime<FixedOffset>,
}

/// Receipt for an outbound message accepted by the delivery provider.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    pub provider_id: Option<String>,
}
