use serde::{Deserialize, Serialize};

/// A single inbound logical message, immutable once accepted. Distinct from
/// `wabridge_core::types::ChatMessage` (an LLM conversation turn) — this is
/// the ingest-stage shape the pipeline moves through dedup, rate limiting,
/// and batching before it ever reaches the agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub message_id: String,
    pub user_id: String,
    pub content: String,
    /// Milliseconds since the Unix epoch, per the pipeline's `Clock`.
    pub received_at: i64,
}

impl Message {
    pub fn new(message_id: impl Into<String>, user_id: impl Into<String>, content: impl Into<String>, received_at: i64) -> Self {
        Self {
            message_id: message_id.into(),
            user_id: user_id.into(),
            content: content.into(),
            received_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecipientKind {
    PhoneE164,
    UserId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub identifier: String,
    pub kind: RecipientKind,
}

impl Recipient {
    pub fn phone(raw: &str) -> Result<Self, E164Error> {
        Ok(Self { identifier: validate_e164(raw)?, kind: RecipientKind::PhoneE164 })
    }

    pub fn user_id(id: impl Into<String>) -> Self {
        Self { identifier: id.into(), kind: RecipientKind::UserId }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum E164Error {
    #[error("phone number must contain only digits and an optional leading '+'")]
    InvalidCharacters,
    #[error("phone number must start with a digit 1-9 (after any leading '+')")]
    LeadingZero,
    #[error("phone number must have between 2 and 15 digits, got {0}")]
    BadLength(usize),
}

/// Normalises and validates an E.164 phone identifier: optional leading
/// `+`, leading digit 1-9, 2-15 digits total. Idempotent on valid input.
pub fn validate_e164(raw: &str) -> Result<String, E164Error> {
    let digits = raw.strip_prefix('+').unwrap_or(raw);

    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(E164Error::InvalidCharacters);
    }
    if digits.starts_with('0') {
        return Err(E164Error::LeadingZero);
    }
    if !(2..=15).contains(&digits.len()) {
        return Err(E164Error::BadLength(digits.len()));
    }

    Ok(format!("+{digits}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_plain_and_plus_prefixed() {
        assert_eq!(validate_e164("447911123456").unwrap(), "+447911123456");
        assert_eq!(validate_e164("+447911123456").unwrap(), "+447911123456");
    }

    #[test]
    fn is_idempotent() {
        let once = validate_e164("15551234567").unwrap();
        let twice = validate_e164(&once).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn rejects_leading_zero() {
        assert_eq!(validate_e164("0447911123456"), Err(E164Error::LeadingZero));
    }

    #[test]
    fn rejects_non_digits() {
        assert_eq!(validate_e164("44-791-112"), Err(E164Error::InvalidCharacters));
    }

    #[test]
    fn rejects_bad_length() {
        assert_eq!(validate_e164("1"), Err(E164Error::BadLength(1)));
        assert!(matches!(validate_e164(&"1".repeat(16)), Err(E164Error::BadLength(16))));
    }
}
