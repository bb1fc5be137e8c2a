use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::debug;

use slotline_core::config::TwilioConfig;
use slotline_core::domain::booking::Delivery;
use slotline_core::errors::CapabilityError;
use slotline_core::ports::Notifier;

use crate::{read_json, transport_error};

/// Twilio concatenates segments up to this many characters.
pub const MAX_BODY_CHARS: usize = 1600;

pub struct TwilioNotifier {
    http: Client,
    base_url: String,
    account_sid: String,
    auth_token: SecretString,
    from_number: String,
}

impl TwilioNotifier {
    pub fn from_config(http: Client, config: &TwilioConfig) -> Self {
        Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.from_number.clone(),
        }
    }

    pub fn messages_url(&self) -> String {
        format!("{}/2010-04-01/Accounts/{}/Messages.json", self.base_url, self.account_sid)
    }

    pub fn message_form(&self, recipient: &str, text: &str) -> [(&'static str, String); 3] {
        [
            ("To", recipient.to_string()),
            ("From", self.from_number.clone()),
            ("Body", text.chars().take(MAX_BODY_CHARS).collect()),
        ]
    }
}

pub fn parse_delivery(body: &Value) -> Delivery {
    Delivery { provider_id: body.get("sid").and_then(Value::as_str).map(str::to_string) }
}

#[async_trait]
impl Notifier for TwilioNotifier {
    async fn send(&self, recipient: &str, text: &str) -> Result<Delivery, CapabilityError> {
        let response = self
            .http
            .post(self.messages_url())
            .basic_auth(&self.account_sid, Some(self.auth_token.expose_secret()))
            .form(&self.message_form(recipient, text))
            .send()
            .await
            .map_err(transport_error)?;
        let delivery = parse_delivery(&read_json(response).await?);

        debug!(
            event_name = "sms.sent",
            provider_id = delivery.provider_id.as_deref().unwrap_or("-"),
            chars = text.chars().count(),
            "twilio accepted message"
        );
        Ok(delivery)
    }
}
