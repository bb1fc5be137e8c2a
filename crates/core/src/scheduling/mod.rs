pub mod clock;
pub mod validator;

pub use clock::{Clock, FixedClock, SystemClock};
pub use validator::{
    BusinessRules, DateTimeValidator, ValidatedSlot, ValidationFailure, ValidationReason,
    ValidationResult,
};
