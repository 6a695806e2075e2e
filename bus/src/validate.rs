//! Input-constraint checks from §6, applied before a wire message is
//! turned into a `ledger-core` request. These mirror the assertions the
//! original inbound actors made at the edge of the queue, before ever
//! touching an account row.

use ledger_primitives::{CONFIG_DATA_MAX_BYTES, TRANSFER_NOTE_MAX_BYTES};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("coordinator_type must be 1-30 lowercase ascii chars matching [a-z][a-z0-9_]*")]
    CoordinatorType,
    #[error("transfer_note_format must match ^[0-9A-Za-z.-]{{0,8}}$")]
    TransferNoteFormat,
    #[error("transfer_note exceeds {TRANSFER_NOTE_MAX_BYTES} bytes")]
    TransferNoteTooLong,
    #[error("config_data exceeds {CONFIG_DATA_MAX_BYTES} bytes")]
    ConfigDataTooLong,
    #[error("min_locked_amount must not exceed max_locked_amount")]
    LockedAmountRange,
    #[error("interest_rate must be finite")]
    NonFiniteInterestRate,
}

/// `[a-z][a-z0-9_]*`, at most 30 ASCII characters.
pub fn validate_coordinator_type(value: &str) -> Result<(), ValidationError> {
    let mut chars = value.chars();
    let valid = value.len() <= 30
        && matches!(chars.next(), Some(c) if c.is_ascii_lowercase())
        && chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::CoordinatorType)
    }
}

/// `^[0-9A-Za-z.-]{0,8}$`.
pub fn validate_transfer_note_format(value: &str) -> Result<(), ValidationError> {
    let valid = value.len() <= 8 && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '.' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ValidationError::TransferNoteFormat)
    }
}

pub fn validate_transfer_note(value: &str) -> Result<(), ValidationError> {
    if value.len() <= TRANSFER_NOTE_MAX_BYTES {
        Ok(())
    } else {
        Err(ValidationError::TransferNoteTooLong)
    }
}

pub fn validate_config_data(value: &str) -> Result<(), ValidationError> {
    if value.len() <= CONFIG_DATA_MAX_BYTES {
        Ok(())
    } else {
        Err(ValidationError::ConfigDataTooLong)
    }
}

pub fn validate_locked_amount_range(min: i64, max: i64) -> Result<(), ValidationError> {
    if 0 <= min && min <= max {
        Ok(())
    } else {
        Err(ValidationError::LockedAmountRange)
    }
}

pub fn validate_interest_rate(rate: f64) -> Result<(), ValidationError> {
    if rate.is_finite() {
        Ok(())
    } else {
        Err(ValidationError::NonFiniteInterestRate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coordinator_type_rejects_uppercase_and_leading_digit() {
        assert!(validate_coordinator_type("direct").is_ok());
        assert!(validate_coordinator_type("direct_01").is_ok());
        assert_eq!(validate_coordinator_type("Direct"), Err(ValidationError::CoordinatorType));
        assert_eq!(validate_coordinator_type("1direct"), Err(ValidationError::CoordinatorType));
        assert_eq!(validate_coordinator_type(""), Err(ValidationError::CoordinatorType));
        assert_eq!(validate_coordinator_type(&"a".repeat(31)), Err(ValidationError::CoordinatorType));
    }

    #[test]
    fn transfer_note_format_matches_spec_regex() {
        assert!(validate_transfer_note_format("").is_ok());
        assert!(validate_transfer_note_format("json.v1").is_ok());
        assert_eq!(validate_transfer_note_format("a b"), Err(ValidationError::TransferNoteFormat));
        assert_eq!(validate_transfer_note_format(&"a".repeat(9)), Err(ValidationError::TransferNoteFormat));
    }

    #[test]
    fn locked_amount_range_rejects_inverted_bounds() {
        assert!(validate_locked_amount_range(0, 100).is_ok());
        assert_eq!(validate_locked_amount_range(100, 0), Err(ValidationError::LockedAmountRange));
        assert_eq!(validate_locked_amount_range(-1, 100), Err(ValidationError::LockedAmountRange));
    }
}
