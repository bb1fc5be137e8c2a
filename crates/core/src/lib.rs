pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;
pub mod ports;
pub mod scheduling;
pub mod trace;

pub use domain::booking::{Availability, BookingConfirmation, Delivery, Slot};
pub use domain::intent::{ExtractedElements, Intent};
pub use domain::session::{ConversationTurn, Session, SessionId, StageName};
pub use errors::{CapabilityError, ExternalService, PipelineError, ValidationError};
pub use flows::{ConversationEvent, ConversationState, FlowEngine};
pub use ports::{
    Calendar, CanonicalPhone, LanguageModel, Notifier, PhoneNormalizer, PhoneRejection,
    PromptRole, PromptTurn,
};
pub use scheduling::{
    BusinessRules, Clock, DateTimeValidator, SystemClock, ValidatedSlot, ValidationFailure,
    ValidationReason,
};
pub use trace::{InMemoryTraceSink, StageSpan, TraceSink, TracingTraceSink};
