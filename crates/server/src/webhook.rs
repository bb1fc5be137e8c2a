//! Inbound SMS webhook.
//!
//! - `POST /webhook/sms` accepts the provider's form post (`MessageSid`,
//!   `From`, `Body`, optional `SessionId`) and answers as soon as the run is
//!   queued. The reply SMS is sent by the pipeline, not in this response.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, routing::post, Form, Router};
use serde::Deserialize;
use slotline_agent::{DispatchError, InboundMessage, RunDispatcher};
use tracing::{info, warn};

#[derive(Clone)]
pub struct WebhookState {
    dispatcher: Arc<RunDispatcher>,
}

#[derive(Debug, Default, Deserialize)]
pub struct SmsWebhook {
    #[serde(rename = "MessageSid", default)]
    pub message_sid: String,
    #[serde(rename = "From", default)]
    pub from: String,
    #[serde(rename = "Body", default)]
    pub body: String,
    #[serde(rename = "SessionId", default)]
    pub session_id: Option<String>,
}

impl SmsWebhook {
    fn into_inbound(self) -> InboundMessage {
        InboundMessage {
            session_hint: self.session_id.filter(|hint| !hint.trim().is_empty()),
            raw_phone: self.from,
            raw_text: self.body,
            transport_message_id: self.message_sid,
        }
    }
}

pub fn router(dispatcher: Arc<RunDispatcher>) -> Router {
    Router::new().route("/webhook/sms", post(receive_sms)).with_state(WebhookState { dispatcher })
}

pub async fn receive_sms(
    State(state): State<WebhookState>,
    Form(payload): Form<SmsWebhook>,
) -> (StatusCode, &'static str) {
    if payload.from.trim().is_empty() {
        warn!(
            event_name = "webhook.sms_rejected",
            correlation_id = %payload.message_sid,
            "inbound message has no sender"
        );
        return (StatusCode::BAD_REQUEST, "missing From");
    }

    let message_sid = payload.message_sid.clone();
    match state.dispatcher.submit(payload.into_inbound()) {
        Ok(_handle) => {
            info!(
                event_name = "webhook.sms_received",
                correlation_id = %message_sid,
                "inbound message queued"
            );
            (StatusCode::OK, "OK")
        }
        Err(DispatchError::QueueFull) => (StatusCode::SERVICE_UNAVAILABLE, "busy"),
        Err(error) => {
            warn!(
                event_name = "webhook.sms_refused",
                correlation_id = %message_sid,
                error = %error,
                "inbound message refused"
            );
            (StatusCode::SERVICE_UNAVAILABLE, "unavailable")
        }
    }
}
