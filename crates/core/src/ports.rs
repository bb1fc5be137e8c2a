//! Capability seams for the external collaborators a pipeline run talks to.
//!
//! Concrete HTTP adapters live in `slotline-gateway`; tests substitute doubles.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::booking::{Availability, BookingConfirmation, Delivery};
use crate::errors::CapabilityError;
use crate::scheduling::ValidatedSlot;

/// A phone number in canonical E.164 form.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CanonicalPhone(pub String);

impl CanonicalPhone {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn last_four(&self) -> &str {
        let digits = self.0.as_str();
        &digits[digits.len().saturating_sub(4)..]
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{reason}")]
pub struct PhoneRejection {
    pub reason: String,
}

impl PhoneRejection {
    pub fn new(reason: impl Into<String>) -> Self {
        Self { reason: reason.into() }
    }
}

pub trait PhoneNormalizer: Send + Sync {
    fn normalize(&self, raw: &str) -> Result<CanonicalPhone, PhoneRejection>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptRole {
    System,
    User,
    Assistant,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTurn {
    pub role: PromptRole,
    pub content: String,
}

impl PromptTurn {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: PromptRole::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: PromptRole::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: PromptRole::Assistant, content: content.into() }
    }
}

/// Generative model backend. The returned text carries no schema guarantee.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn complete(&self, turns: &[PromptTurn]) -> Result<String, CapabilityError>;
}

#[async_trait]
pub trait Calendar: Send + Sync {
    async fn check_availability(
        &self,
        slot: &ValidatedSlot,
        duration_minutes: u32,
    ) -> Result<Availability, CapabilityError>;

    async fn create_booking(
        &self,
        slot: &ValidatedSlot,
        phone: &CanonicalPhone,
    ) -> Result<BookingConfirmation, CapabilityError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// `recipient` is usually canonical, but phone-rejection replies go to the
    /// raw inbound address.
    async fn send(&self, recipient: &str, text: &str) -> Result<Delivery, CapabilityError>;
}

#[cfg(test)]
mod tests {
    use super::CanonicalPhone;

    #[test]
    fn last_four_handles_short_values() {
        assert_eq!(CanonicalPhone("+15551234567".to_owned()).last_four(), "4567");
        assert_eq!(CanonicalPhone("12".to_owned()).last_four(), "12");
    }
}
