use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset, SecondsFormat, Utc};
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::{debug, info};

use slotline_core::config::CalendlyConfig;
use slotline_core::domain::booking::{Availability, BookingConfirmation, Slot};
use slotline_core::errors::CapabilityError;
use slotline_core::ports::{Calendar, CanonicalPhone};
use slotline_core::scheduling::ValidatedSlot;

use crate::{read_json, transport_error};

const WINDOW_BEFORE_HOURS: i64 = 2;
const WINDOW_AFTER_HOURS: i64 = 4;
const EXACT_MATCH_SECS: i64 = 60;
const CANDIDATE_POOL: usize = 5;
const MAX_DISTANCE_SECS: i64 = 2 * 24 * 60 * 60;
const MAX_ALTERNATIVES: usize = 3;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EventType {
    pub uri: String,
    pub name: String,
}

/// Calendly v2 adapter. The event type is resolved once, from
/// `event_type_uri` when pinned, otherwise by index into the user's list.
pub struct CalendlyCalendar {
    http: Client,
    base_url: String,
    api_token: SecretString,
    user_uri: Option<String>,
    event_type_uri: Option<String>,
    event_type_index: usize,
    event_type: OnceCell<EventType>,
}

impl CalendlyCalendar {
    pub fn from_config(http: Client, config: &CalendlyConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_token: config.api_token.clone(),
            user_uri: config.user_uri.clone(),
            event_type_uri: config.event_type_uri.clone(),
            event_type_index: config.event_type_index,
            event_type: OnceCell::new(),
        }
    }

    async fn get(&self, url: &str, query: &[(&str, &str)]) -> Result<Value, CapabilityError> {
        let response = self
            .http
            .get(url)
            .bearer_auth(self.api_token.expose_secret())
            .query(query)
            .send()
            .await
            .map_err(transport_error)?;
        read_json(response).await
    }

    async fn event_type(&self) -> Result<&EventType, CapabilityError> {
        self.event_type.get_or_try_init(|| self.resolve_event_type()).await
    }

    async fn resolve_event_type(&self) -> Result<EventType, CapabilityError> {
        let event_type = match &self.event_type_uri {
            Some(uri) => {
                let body = self.get(uri, &[]).await?;
                let name = body
                    .pointer("/resource/name")
                    .and_then(Value::as_str)
                    .unwrap_or("Appointment")
                    .to_string();
                EventType { uri: uri.clone(), name }
            }
            None => {
                let user = self.user_uri.as_deref().ok_or_else(|| {
                    CapabilityError::Transport(
                        "calendly.user_uri is required when no event type is pinned".to_string(),
                    )
                })?;
                let url = format!("{}/event_types", self.base_url);
                let body = self.get(&url, &[("user", user), ("active", "true")]).await?;
                pick_event_type(&body, self.event_type_index)?
            }
        };
        info!(
            event_name = "calendly.event_type_resolved",
            uri = %event_type.uri,
            name = %event_type.name,
            "resolved calendly event type"
        );
        Ok(event_type)
    }
}

pub fn pick_event_type(body: &Value, index: usize) -> Result<EventType, CapabilityError> {
    let collection = body.get("collection").and_then(Value::as_array).map(Vec::as_slice);
    let entry = collection.unwrap_or_default().get(index).ok_or_else(|| {
        CapabilityError::Decode(format!(
            "no event type at index {index} ({} available)",
            collection.map_or(0, <[Value]>::len)
        ))
    })?;
    let uri = entry
        .get("uri")
        .and_then(Value::as_str)
        .ok_or_else(|| CapabilityError::Decode("event type has no uri".to_string()))?;
    let name = entry.get("name").and_then(Value::as_str).unwrap_or("Appointment");
    Ok(EventType { uri: uri.to_string(), name: name.to_string() })
}

/// Open start times from an `event_type_available_times` response.
pub fn parse_open_times(body: &Value) -> Vec<DateTime<FixedOffset>> {
    body.get("collection")
        .and_then(Value::as_array)
        .map(|entries| {
            entries
                .iter()
                .filter(|entry| {
                    entry.get("status").and_then(Value::as_str).map_or(true, |s| s == "available")
                })
                .filter_map(|entry| entry.get("start_time").and_then(Value::as_str))
                .filter_map(|start| DateTime::parse_from_rfc3339(start).ok())
                .collect()
        })
        .unwrap_or_default()
}

/// A slot starting within a minute of the request counts as the request.
/// Otherwise the closest open times become alternatives, shown in the
/// requester's offset.
pub fn match_open_times(
    requested: DateTime<FixedOffset>,
    open: &[DateTime<FixedOffset>],
    duration_minutes: u32,
) -> Availability {
    let distance = |start: &DateTime<FixedOffset>| (*start - requested).num_seconds().abs();

    if open.iter().any(|start| distance(start) < EXACT_MATCH_SECS) {
        return Availability::confirmed(Slot::new(requested, duration_minutes));
    }

    let mut ranked = open.to_vec();
    ranked.sort_by_key(distance);
    let offset = *requested.offset();
    let alternatives = ranked
        .into_iter()
        .take(CANDIDATE_POOL)
        .filter(|start| distance(start) <= MAX_DISTANCE_SECS)
        .take(MAX_ALTERNATIVES)
        .map(|start| Slot::new(start.with_timezone(&offset), duration_minutes))
        .collect();
    Availability::unavailable(alternatives)
}

/// Calendly needs an invitee; SMS users only have a phone number.
pub fn invitee_for(phone: &CanonicalPhone) -> (String, String) {
    let digits: String = phone.as_str().chars().filter(char::is_ascii_digit).collect();
    (format!("SMS User {}", phone.last_four()), format!("sms-{digits}@sms-booking.temp"))
}

pub fn booking_body(event_type: &EventType, slot: &ValidatedSlot, phone: &CanonicalPhone) -> Value {
    let (name, email) = invitee_for(phone);
    json!({
        "event_type": event_type.uri,
        "start_time": slot.normalized_text(),
        "invitee": {"email": email, "name": name},
        "responses": {"phone_number": phone.as_str()},
    })
}

pub fn parse_booking(
    body: &Value,
    event_type: &EventType,
    requested: DateTime<FixedOffset>,
) -> Result<BookingConfirmation, CapabilityError> {
    let resource = body.get("resource").unwrap_or(body);
    let uri = resource
        .get("uri")
        .and_then(Value::as_str)
        .filter(|uri| !uri.is_empty())
        .ok_or_else(|| CapabilityError::Decode("scheduled event has no uri".to_string()))?;
    let booking_id = uri.rsplit('/').next().unwrap_or(uri).to_string();
    let event_name =
        resource.get("name").and_then(Value::as_str).unwrap_or(&event_type.name).to_string();
    let start = resource
        .get("start_time")
        .and_then(Value::as_str)
        .and_then(|start| DateTime::parse_from_rfc3339(start).ok())
        .map(|start| start.with_timezone(requested.offset()))
        .unwrap_or(requested);

    Ok(BookingConfirmation { booking_id, booking_url: Some(uri.to_string()), event_name, start })
}

fn utc_text(at: DateTime<FixedOffset>) -> String {
    at.with_timezone(&Utc).to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl Calendar for CalendlyCalendar {
    async fn check_availability(
        &self,
        slot: &ValidatedSlot,
        duration_minutes: u32,
    ) -> Result<Availability, CapabilityError> {
        let event_type = self.event_type().await?;
        let requested = slot.normalized;
        let start = utc_text(requested - Duration::hours(WINDOW_BEFORE_HOURS));
        let end = utc_text(requested + Duration::hours(WINDOW_AFTER_HOURS));

        let url = format!("{}/event_type_available_times", self.base_url);
        let body = self
            .get(
                &url,
                &[
                    ("event_type", event_type.uri.as_str()),
                    ("start_time", start.as_str()),
                    ("end_time", end.as_str()),
                ],
            )
            .await?;
        let open = parse_open_times(&body);
        let availability = match_open_times(requested, &open, duration_minutes);

        debug!(
            event_name = "calendly.availability_checked",
            open_slots = open.len(),
            available = availability.available,
            alternatives = availability.alternatives.len(),
            "checked calendly availability"
        );
        Ok(availability)
    }

    async fn create_booking(
        &self,
        slot: &ValidatedSlot,
        phone: &CanonicalPhone,
    ) -> Result<BookingConfirmation, CapabilityError> {
        let event_type = self.event_type().await?;
        let url = format!("{}/scheduled_events", self.base_url);
        let response = self
            .http
            .post(&url)
            .bearer_auth(self.api_token.expose_secret())
            .json(&booking_body(event_type, slot, phone))
            .send()
            .await
            .map_err(transport_error)?;
        let body = read_json(response).await?;
        let booking = parse_booking(&body, event_type, slot.normalized)?;

        info!(
            event_name = "calendly.booking_created",
            booking_id = %booking.booking_id,
            "calendly event scheduled"
        );
        Ok(booking)
    }
}
