//! Wire-shaped DTOs for the six inbound calls of §6, deserialized off the
//! bus by `node` and turned into `ledger-core` requests after validation.
//! Field names and shapes mirror the original inbound actors: a bare
//! `ts: String` (ISO-8601 on the wire, parsed by the caller into a
//! `DateTime<Utc>` before it reaches here) rather than already-typed values,
//! since that is the boundary the bus actually hands over.

use chrono::{DateTime, Utc};
use ledger_core::{ChangeInterestRateRequest, ConfigureAccountRequest, FinalizeTransferRequest, PrepareTransferRequest};
use ledger_primitives::{Amount, CreditorId, DebtorId, InterestRate, SeqNum};
use ledger_storage::ConfigFlags;
use serde::{Deserialize, Serialize};

use crate::validate::{
    validate_coordinator_type, validate_interest_rate, validate_locked_amount_range, validate_transfer_note,
    validate_transfer_note_format,
};
use crate::ValidationError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigureAccountMessage {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub ts: DateTime<Utc>,
    pub seqnum: i32,
    #[serde(default)]
    pub negligible_amount: f64,
    #[serde(default)]
    pub config_flags: i32,
    #[serde(default)]
    pub config_data: String,
}

impl ConfigureAccountMessage {
    pub fn into_request(self, signalbus_max_delay_days: i64) -> Result<ConfigureAccountRequest, ValidationError> {
        validate_config_data(&self.config_data)?;
        Ok(ConfigureAccountRequest {
            debtor_id: self.debtor_id,
            creditor_id: self.creditor_id,
            ts: self.ts,
            seqnum: SeqNum::new(self.seqnum),
            negligible_amount: self.negligible_amount,
            config_flags: ConfigFlags::from_bits_truncate(self.config_flags),
            config_data: self.config_data,
            signalbus_max_delay_days,
        })
    }
}

fn validate_config_data(value: &str) -> Result<(), ValidationError> {
    crate::validate::validate_config_data(value)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrepareTransferMessage {
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub min_locked_amount: i64,
    pub max_locked_amount: i64,
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    /// Decimal string of an unsigned 64-bit integer; `ledger-core` decodes
    /// it via `u64 -> i64` reinterpretation.
    pub recipient: String,
    pub ts: DateTime<Utc>,
    pub max_commit_delay: i32,
    #[serde(default = "default_min_interest_rate")]
    pub min_interest_rate: InterestRate,
}

fn default_min_interest_rate() -> InterestRate {
    -100.0
}

impl PrepareTransferMessage {
    pub fn into_request(self) -> Result<PrepareTransferRequest, ValidationError> {
        validate_coordinator_type(&self.coordinator_type)?;
        validate_locked_amount_range(self.min_locked_amount, self.max_locked_amount)?;
        validate_interest_rate(self.min_interest_rate)?;
        Ok(PrepareTransferRequest {
            coordinator_type: self.coordinator_type,
            coordinator_id: self.coordinator_id,
            coordinator_request_id: self.coordinator_request_id,
            min_locked_amount: self.min_locked_amount,
            max_locked_amount: self.max_locked_amount,
            debtor_id: self.debtor_id,
            sender_creditor_id: self.creditor_id,
            recipient: self.recipient,
            ts: self.ts,
            max_commit_delay_seconds: self.max_commit_delay as i64,
            min_interest_rate: self.min_interest_rate,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeTransferMessage {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub transfer_id: i64,
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub committed_amount: Amount,
    #[serde(default)]
    pub transfer_note_format: String,
    #[serde(default)]
    pub transfer_note: String,
    pub ts: DateTime<Utc>,
}

impl FinalizeTransferMessage {
    pub fn into_request(self) -> Result<FinalizeTransferRequest, ValidationError> {
        validate_coordinator_type(&self.coordinator_type)?;
        validate_transfer_note_format(&self.transfer_note_format)?;
        validate_transfer_note(&self.transfer_note)?;
        if self.committed_amount < 0 {
            return Err(ValidationError::LockedAmountRange);
        }
        Ok(FinalizeTransferRequest {
            debtor_id: self.debtor_id,
            sender_creditor_id: self.creditor_id,
            transfer_id: self.transfer_id,
            coordinator_type: self.coordinator_type,
            coordinator_id: self.coordinator_id,
            coordinator_request_id: self.coordinator_request_id,
            committed_amount: self.committed_amount,
            transfer_note_format: self.transfer_note_format,
            transfer_note: self.transfer_note,
            ts: self.ts,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeInterestRateMessage {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub interest_rate: InterestRate,
    pub ts: DateTime<Utc>,
}

impl ChangeInterestRateMessage {
    pub fn into_request(self, signalbus_max_delay_days: i64) -> Result<ChangeInterestRateRequest, ValidationError> {
        validate_interest_rate(self.interest_rate)?;
        Ok(ChangeInterestRateRequest {
            debtor_id: self.debtor_id,
            creditor_id: self.creditor_id,
            ts: self.ts,
            interest_rate: self.interest_rate,
            signalbus_max_delay_days,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CapitalizeInterestMessage {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TryToDeleteAccountMessage {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
}

/// Any one of the six inbound calls, as decoded off the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InboundMessage {
    ConfigureAccount(ConfigureAccountMessage),
    PrepareTransfer(PrepareTransferMessage),
    FinalizeTransfer(FinalizeTransferMessage),
    ChangeInterestRate(ChangeInterestRateMessage),
    CapitalizeInterest(CapitalizeInterestMessage),
    TryToDeleteAccount(TryToDeleteAccountMessage),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prepare_transfer_rejects_inverted_locked_amount_range() {
        let msg = PrepareTransferMessage {
            coordinator_type: "direct".into(),
            coordinator_id: 1,
            coordinator_request_id: 1,
            min_locked_amount: 100,
            max_locked_amount: 10,
            debtor_id: 1,
            creditor_id: 10,
            recipient: "11".into(),
            ts: Utc::now(),
            max_commit_delay: 3600,
            min_interest_rate: -100.0,
        };
        assert_eq!(msg.into_request(), Err(ValidationError::LockedAmountRange));
    }

    #[test]
    fn finalize_transfer_rejects_bad_note_format() {
        let msg = FinalizeTransferMessage {
            debtor_id: 1,
            creditor_id: 10,
            transfer_id: 1,
            coordinator_type: "direct".into(),
            coordinator_id: 1,
            coordinator_request_id: 1,
            committed_amount: 10,
            transfer_note_format: "way too long".into(),
            transfer_note: String::new(),
            ts: Utc::now(),
        };
        assert_eq!(msg.into_request(), Err(ValidationError::TransferNoteFormat));
    }
}
