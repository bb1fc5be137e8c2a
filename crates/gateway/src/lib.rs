//! HTTP adapters for the collaborators a pipeline run talks to: an
//! OpenAI-compatible chat endpoint, Calendly, Twilio, plus E.164 phone
//! normalization.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{Client, Response};
use serde_json::Value;
use thiserror::Error;

use slotline_core::config::AppConfig;
use slotline_core::errors::CapabilityError;
use slotline_core::ports::{Calendar, LanguageModel, Notifier, PhoneNormalizer};

pub mod calendly;
pub mod groq;
pub mod phone;
pub mod twilio;

pub use calendly::CalendlyCalendar;
pub use groq::ChatCompletionsClient;
pub use phone::E164Normalizer;
pub use twilio::TwilioNotifier;

const ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Live adapters built from configuration.
#[derive(Clone)]
pub struct Gateways {
    pub phones: Arc<dyn PhoneNormalizer>,
    pub model: Arc<dyn LanguageModel>,
    pub calendar: Arc<dyn Calendar>,
    pub notifier: Arc<dyn Notifier>,
}

impl Gateways {
    pub fn from_config(config: &AppConfig) -> Result<Self, GatewayError> {
        let http = http_client(Duration::from_secs(config.llm.timeout_secs))?;
        Ok(Self {
            phones: Arc::new(E164Normalizer::default()),
            model: Arc::new(ChatCompletionsClient::from_config(http.clone(), &config.llm)),
            calendar: Arc::new(CalendlyCalendar::from_config(http.clone(), &config.calendly)),
            notifier: Arc::new(TwilioNotifier::from_config(http, &config.twilio)),
        })
    }
}

pub fn http_client(timeout: Duration) -> Result<Client, GatewayError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(concat!("slotline/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|error| GatewayError::Client(error.to_string()))
}

/// Client-side timeouts surface as transport failures; the pipeline's own
/// stage budget is what reports `CapabilityError::Timeout`.
pub(crate) fn transport_error(error: reqwest::Error) -> CapabilityError {
    if error.is_timeout() {
        CapabilityError::Transport(format!("request timed out: {error}"))
    } else {
        CapabilityError::Transport(error.to_string())
    }
}

/// Reads a JSON body, turning non-2xx statuses into `Rejected`.
pub(crate) async fn read_json(response: Response) -> Result<Value, CapabilityError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CapabilityError::Rejected {
            status: status.as_u16(),
            message: body.chars().take(ERROR_BODY_CHARS).collect(),
        });
    }
    response.json::<Value>().await.map_err(|error| CapabilityError::Decode(error.to_string()))
}
