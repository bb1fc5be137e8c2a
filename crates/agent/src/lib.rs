//! Conversation runtime: turns inbound SMS text into bookings.
//!
//! The crate holds the orchestration core of slotline:
//! - `conversation`: asks the language model for a structured intent and
//!   repairs whatever comes back through an ordered recovery chain
//! - `fallback`: keyword-driven replies for messages the model could not
//!   turn into an intent
//! - `runtime`: the `PipelineEngine`, which sequences stages per message,
//!   applies the booking flow's transition table and the per-stage failure
//!   policy, and emits one trace span per stage
//! - `dispatch`: a bounded worker pool that runs pipelines off the
//!   transport's request path and hands back a completion handle
//! - `replies`: the canned texts users receive
//! - `simulation`: in-process collaborators for offline runs
//!
//! # Failure policy
//!
//! A run never returns an error. Phone rejection is the only outcome that
//! leaves no session behind; every other failure is counted on the session,
//! traced, and answered with a canned reply, so the user can simply text
//! again.
//!
//! The language model is strictly a translator. Whether a time is bookable
//! is decided by the validator and the calendar, never by the model.

pub mod conversation;
pub mod dispatch;
pub mod fallback;
pub mod llm;
pub mod replies;
pub mod runtime;
pub mod simulation;

pub use conversation::{recover_intent, Extraction, IntentExtractor, RecoveryStrategy};
pub use dispatch::{DispatchError, DispatchStats, RunDispatcher, RunHandle};
pub use runtime::{
    InboundMessage, PipelineEngine, PipelinePorts, PipelineSettings, RunOutcome, RunReport,
};
