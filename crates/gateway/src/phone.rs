use slotline_core::ports::{CanonicalPhone, PhoneNormalizer, PhoneRejection};

const SEPARATORS: &[char] = &[' ', '-', '.', '(', ')', '/'];

/// Normalizes inbound addresses to E.164. Numbers without a country code are
/// read as national numbers of `default_country_code`.
#[derive(Clone, Debug)]
pub struct E164Normalizer {
    default_country_code: String,
}

impl Default for E164Normalizer {
    fn default() -> Self {
        Self { default_country_code: "1".to_string() }
    }
}

impl E164Normalizer {
    pub fn new(default_country_code: impl Into<String>) -> Self {
        Self { default_country_code: default_country_code.into() }
    }
}

impl PhoneNormalizer for E164Normalizer {
    fn normalize(&self, raw: &str) -> Result<CanonicalPhone, PhoneRejection> {
        let compact: String = raw.trim().chars().filter(|ch| !SEPARATORS.contains(ch)).collect();
        if compact.is_empty() {
            return Err(PhoneRejection::new("phone number is empty"));
        }

        let (international, digits) = if let Some(rest) = compact.strip_prefix('+') {
            (true, rest)
        } else if let Some(rest) = compact.strip_prefix("00") {
            (true, rest)
        } else {
            (false, compact.as_str())
        };

        if !digits.chars().all(|ch| ch.is_ascii_digit()) {
            return Err(PhoneRejection::new("phone number contains non-digit characters"));
        }

        let full = if international {
            digits.to_string()
        } else if self.default_country_code == "1" && digits.len() == 11 && digits.starts_with('1')
        {
            digits.to_string()
        } else {
            format!("{}{digits}", self.default_country_code)
        };

        if !(8..=15).contains(&full.len()) {
            return Err(PhoneRejection::new(format!(
                "phone number must have 8 to 15 digits, found {}",
                full.len()
            )));
        }
        if full.starts_with('0') {
            return Err(PhoneRejection::new("country code cannot start with 0"));
        }
        if let Some(national) = full.strip_prefix('1') {
            check_north_american(national)?;
        }

        Ok(CanonicalPhone(format!("+{full}")))
    }
}

/// NANP numbers are ten digits with area code and exchange starting 2-9.
fn check_north_american(national: &str) -> Result<(), PhoneRejection> {
    if national.len() != 10 {
        return Err(PhoneRejection::new("North American numbers have 10 digits after +1"));
    }
    let bytes = national.as_bytes();
    if bytes[0] < b'2' || bytes[3] < b'2' {
        return Err(PhoneRejection::new("invalid North American area code or exchange"));
    }
    Ok(())
}
