//! Recipient identifier normalization.

use thiserror::Error;

/// Suffix for direct-message addresses.
pub const USER_SUFFIX: &str = "@s.whatsapp.net";
/// Suffix for group addresses.
pub const GROUP_SUFFIX: &str = "@g.us";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum NormalizeError {
    #[error("empty recipient")]
    Empty,

    #[error("recipient {0:?} contains no digits")]
    NoDigits(String),
}

/// Normalize a raw recipient into a full network address.
///
/// Anything already carrying a suffix (user or group) passes through
/// untouched. Bare numbers are stripped to digits; when they do not start
/// with the session's country code it is prepended, so callers can hand in
/// national-format numbers.
pub fn normalize_recipient(
    raw: &str,
    country_code: Option<&str>,
) -> Result<String, NormalizeError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(NormalizeError::Empty);
    }
    if raw.contains('@') {
        return Ok(raw.to_string());
    }

    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return Err(NormalizeError::NoDigits(raw.to_string()));
    }

    let number = match country_code {
        Some(cc) => {
            let cc: String = cc.chars().filter(|c| c.is_ascii_digit()).collect();
            if cc.is_empty() || digits.starts_with(&cc) {
                digits
            } else {
                format!("{cc}{digits}")
            }
        },
        None => digits,
    };
    Ok(format!("{number}{USER_SUFFIX}"))
}
