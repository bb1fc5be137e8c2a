use chrono::{
    DateTime, Datelike, Duration, FixedOffset, LocalResult, NaiveDateTime, TimeZone, Timelike, Utc,
    Weekday,
};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

const NAIVE_FORMATS: &[&str] =
    &["%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"];

const DISPLAY_FORMAT: &str = "%A, %B %d, %Y at %I:%M %p";

/// Business-rule constraints applied to every requested appointment time.
#[derive(Clone, Debug, PartialEq)]
pub struct BusinessRules {
    pub timezone: Tz,
    pub open_hour: u32,
    pub close_hour: u32,
    pub max_days_ahead: i64,
}

impl Default for BusinessRules {
    fn default() -> Self {
        Self {
            timezone: chrono_tz::America::New_York,
            open_hour: 9,
            close_hour: 18,
            max_days_ahead: 180,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationReason {
    ParseError,
    PastDateTime,
    TooFarFuture,
    OutsideBusinessHours,
    OutsideWeekdays,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatedSlot {
    pub normalized: DateTime<FixedOffset>,
    pub display: String,
}

impl ValidatedSlot {
    pub fn normalized_text(&self) -> String {
        self.normalized.to_rfc3339()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub reason: ValidationReason,
    pub message: String,
    pub suggested_fix: String,
}

impl ValidationFailure {
    /// The text relayed to the user in place of the model's reply.
    pub fn user_text(&self) -> String {
        format!("{}. {}", self.message, self.suggested_fix)
    }
}

pub type ValidationResult = Result<ValidatedSlot, ValidationFailure>;

#[derive(Clone, Debug, Default)]
pub struct DateTimeValidator {
    rules: BusinessRules,
}

impl DateTimeValidator {
    pub fn new(rules: BusinessRules) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &BusinessRules {
        &self.rules
    }

    pub fn validate(&self, candidate: &str) -> ValidationResult {
        self.validate_at(candidate, Utc::now())
    }

    /// Checks run in a fixed order and stop at the first violation, so a time
    /// that is both past and on a weekend reports `PastDateTime`.
    pub fn validate_at(&self, candidate: &str, now: DateTime<Utc>) -> ValidationResult {
        let local = self.parse(candidate).ok_or_else(|| ValidationFailure {
            reason: ValidationReason::ParseError,
            message: format!("Could not understand the date and time \"{}\"", candidate.trim()),
            suggested_fix: "Please provide date and time in a clear format, like 2025-01-23 14:00"
                .to_string(),
        })?;

        let instant = local.with_timezone(&Utc);
        if instant < now {
            return Err(ValidationFailure {
                reason: ValidationReason::PastDateTime,
                message: "Cannot book appointments in the past".to_string(),
                suggested_fix: "Please choose a future date and time".to_string(),
            });
        }

        // A horizon past the end of the calendar never rejects anything.
        let horizon = Duration::try_days(self.rules.max_days_ahead)
            .and_then(|ahead| now.checked_add_signed(ahead));
        if horizon.is_some_and(|horizon| instant > horizon) {
            return Err(ValidationFailure {
                reason: ValidationReason::TooFarFuture,
                message: format!(
                    "Cannot book appointments more than {} days in advance",
                    self.rules.max_days_ahead
                ),
                suggested_fix: format!(
                    "Please choose a date within the next {} days",
                    self.rules.max_days_ahead
                ),
            });
        }

        let hour = local.hour();
        if hour < self.rules.open_hour || hour >= self.rules.close_hour {
            let window =
                format!("{} and {}", hour_label(self.rules.open_hour), hour_label(self.rules.close_hour));
            return Err(ValidationFailure {
                reason: ValidationReason::OutsideBusinessHours,
                message: format!("Appointments are only available between {window}"),
                suggested_fix: format!("Please choose a time between {window}"),
            });
        }

        if matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return Err(ValidationFailure {
                reason: ValidationReason::OutsideWeekdays,
                message: "Appointments are only available Monday through Friday".to_string(),
                suggested_fix: "Please choose a weekday".to_string(),
            });
        }

        Ok(ValidatedSlot {
            normalized: local.fixed_offset(),
            display: local.format(DISPLAY_FORMAT).to_string(),
        })
    }

    fn parse(&self, candidate: &str) -> Option<DateTime<Tz>> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() {
            return None;
        }

        if let Ok(with_offset) = DateTime::parse_from_rfc3339(trimmed) {
            return Some(with_offset.with_timezone(&self.rules.timezone));
        }

        let naive = NAIVE_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(trimmed, format).ok())?;

        match self.rules.timezone.from_local_datetime(&naive) {
            LocalResult::Single(local) => Some(local),
            LocalResult::Ambiguous(earliest, _) => Some(earliest),
            // Wall-clock times skipped by a DST jump do not exist.
            LocalResult::None => None,
        }
    }
}

fn hour_label(hour: u32) -> String {
    match hour {
        0 | 24 => "12 AM".to_string(),
        12 => "12 PM".to_string(),
        h if h < 12 => format!("{h} AM"),
        h => format!("{} PM", h - 12),
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, TimeZone, Utc};

    use super::{BusinessRules, DateTimeValidator, ValidationReason};

    /// Monday 2025-01-20, noon in New York.
    fn monday_noon() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 20, 17, 0, 0).single().expect("valid instant")
    }

    fn reason_for(candidate: &str) -> ValidationReason {
        DateTimeValidator::default()
            .validate_at(candidate, monday_noon())
            .expect_err("candidate should be rejected")
            .reason
    }

    #[test]
    fn thursday_afternoon_is_accepted() {
        let slot = DateTimeValidator::default()
            .validate_at("2025-01-23 14:00", monday_noon())
            .expect("thursday 2pm is bookable");

        assert_eq!(slot.normalized_text(), "2025-01-23T14:00:00-05:00");
        assert_eq!(slot.display, "Thursday, January 23, 2025 at 02:00 PM");
    }

    #[test]
    fn early_morning_is_outside_business_hours() {
        assert_eq!(reason_for("2025-01-23 07:00"), ValidationReason::OutsideBusinessHours);
    }

    #[test]
    fn closing_hour_is_exclusive() {
        assert_eq!(reason_for("2025-01-23 18:00"), ValidationReason::OutsideBusinessHours);
        assert!(DateTimeValidator::default().validate_at("2025-01-23 17:59", monday_noon()).is_ok());
    }

    #[test]
    fn saturday_afternoon_is_outside_weekdays() {
        assert_eq!(reason_for("2025-01-25 14:00"), ValidationReason::OutsideWeekdays);
    }

    #[test]
    fn two_hundred_days_ahead_is_too_far() {
        assert_eq!(reason_for("2025-08-08 14:00"), ValidationReason::TooFarFuture);
    }

    #[test]
    fn unbounded_horizon_accepts_distant_dates() {
        let rules = BusinessRules { max_days_ahead: i64::MAX, ..BusinessRules::default() };
        let slot = DateTimeValidator::new(rules)
            .validate_at("2030-01-23 14:00", monday_noon())
            .expect("no horizon to exceed");
        assert_eq!(slot.normalized_text(), "2030-01-23T14:00:00-05:00");
    }

    #[test]
    fn earlier_time_is_in_the_past() {
        assert_eq!(reason_for("2025-01-20 10:00"), ValidationReason::PastDateTime);
    }

    #[test]
    fn past_weekend_reports_past_first() {
        assert_eq!(reason_for("2025-01-18 14:00"), ValidationReason::PastDateTime);
    }

    #[test]
    fn unparseable_text_is_a_parse_error() {
        assert_eq!(reason_for("next tuesday-ish"), ValidationReason::ParseError);
        assert_eq!(reason_for(""), ValidationReason::ParseError);
        assert_eq!(reason_for("2025-02-30 10:00"), ValidationReason::ParseError);
    }

    #[test]
    fn skipped_daylight_saving_time_is_a_parse_error() {
        let rules = BusinessRules { open_hour: 0, ..BusinessRules::default() };
        let error = DateTimeValidator::new(rules)
            .validate_at("2025-03-09 02:30", monday_noon())
            .expect_err("nonexistent local time");
        assert_eq!(error.reason, ValidationReason::ParseError);
    }

    #[test]
    fn offset_timestamps_are_checked_in_business_timezone() {
        // 19:00 UTC is 14:00 in New York.
        let slot = DateTimeValidator::default()
            .validate_at("2025-01-23T19:00:00Z", monday_noon())
            .expect("converted into business hours");
        assert_eq!(slot.normalized_text(), "2025-01-23T14:00:00-05:00");

        assert_eq!(reason_for("2025-01-23T12:00:00Z"), ValidationReason::OutsideBusinessHours);
    }

    #[test]
    fn failure_text_combines_message_and_fix() {
        let failure = DateTimeValidator::default()
            .validate_at("2025-01-25 14:00", monday_noon())
            .expect_err("weekend");
        assert_eq!(
            failure.user_text(),
            "Appointments are only available Monday through Friday. Please choose a weekday"
        );
    }
}
