use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::flows::FlowTransitionError;

/// Failure reported by an external collaborator behind one of the ports.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CapabilityError {
    #[error("timed out after {0}s")]
    Timeout(u64),
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("rejected by provider (status {status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("could not decode provider response: {0}")]
    Decode(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationError {
    Phone,
    DateTime,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalService {
    Availability,
    Booking,
    Notify,
    LanguageModel,
}

impl fmt::Display for ExternalService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Availability => "availability",
            Self::Booking => "booking",
            Self::Notify => "notify",
            Self::LanguageModel => "language_model",
        })
    }
}

/// Everything that can go wrong inside one pipeline run. None of these ever
/// escape the orchestrator; each maps to a canned reply.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("validation failed for {kind:?}: {detail}")]
    Validation { kind: ValidationError, detail: String },
    #[error("{service} service failed: {reason}")]
    ExternalService { service: ExternalService, reason: String },
    #[error(transparent)]
    FlowTransition(#[from] FlowTransitionError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl PipelineError {
    pub fn external(service: ExternalService, error: &CapabilityError) -> Self {
        Self::ExternalService { service, reason: error.to_string() }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Validation { kind: ValidationError::Phone, .. } => {
                "Sorry, we couldn't recognize your phone number. Please text us from a valid mobile number."
            }
            Self::Validation { kind: ValidationError::DateTime, .. } => {
                "Sorry, I couldn't use that date and time. Please send a weekday between 9 AM and 6 PM."
            }
            Self::ExternalService { service: ExternalService::Availability, .. } => {
                "Sorry, I'm having trouble checking the calendar right now. Please try again in a few minutes."
            }
            Self::ExternalService { service: ExternalService::Booking, .. } => {
                "Sorry, I couldn't complete your booking. Please try again or choose a different time."
            }
            Self::ExternalService { service: ExternalService::Notify, .. } => {
                "Sorry, we had trouble sending a message. Please try again shortly."
            }
            Self::ExternalService { service: ExternalService::LanguageModel, .. } => {
                "I'm experiencing some technical difficulties. Please try rephrasing your request."
            }
            Self::FlowTransition(_) | Self::Internal(_) => {
                "Sorry, something went wrong on our end. Please try again later."
            }
        }
    }

    /// Short machine-readable label used in trace spans and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { kind: ValidationError::Phone, .. } => "validation.phone",
            Self::Validation { kind: ValidationError::DateTime, .. } => "validation.datetime",
            Self::ExternalService { service: ExternalService::Availability, .. } => {
                "external.availability"
            }
            Self::ExternalService { service: ExternalService::Booking, .. } => "external.booking",
            Self::ExternalService { service: ExternalService::Notify, .. } => "external.notify",
            Self::ExternalService { service: ExternalService::LanguageModel, .. } => {
                "external.language_model"
            }
            Self::FlowTransition(_) => "internal.flow",
            Self::Internal(_) => "internal",
        }
    }
}
