//! The outbox: typed, serializable signal rows written inside the same
//! transaction as the account-state change they describe, and a
//! `SignalWriter` sink that the engine appends to. A separate shipper
//! (out of scope here) is responsible for draining a durable outbox table
//! onto the bus with at-least-once delivery.

use chrono::{DateTime, Utc};
use ledger_primitives::{Amount, CreditorId, DebtorId, InterestRate, SeqNum, TransferId, TransferNumber};
use serde::{Deserialize, Serialize};

/// Why a `prepare_transfer` or `finalize_transfer` did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusCode {
    Ok,
    InsufficientAvailableAmount,
    RecipientIsUnreachable,
    RecipientSameAsSender,
    TooManyTransfers,
    TooLowInterestRate,
    TransferDeadlineExpired,
}

impl StatusCode {
    pub fn is_ok(self) -> bool {
        matches!(self, StatusCode::Ok)
    }
}

/// Why a `configure_account` event was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigRejectionCode {
    InvalidConfiguration,
}

/// The caller-supplied correlation handle for a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorTriple {
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
}

/// Re-emission of an account's latest observable state. The only place
/// `change_seqnum` advances; heartbeats and reminders resend it verbatim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountUpdateSignal {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub change_ts: DateTime<Utc>,
    pub change_seqnum: SeqNum,
    pub principal: Amount,
    pub interest: f64,
    pub interest_rate: InterestRate,
    pub last_transfer_number: TransferNumber,
    pub last_config_ts: DateTime<Utc>,
    pub last_config_seqnum: SeqNum,
    pub creation_date: DateTime<Utc>,
    pub negligible_amount: f64,
    pub config_flags: i32,
    pub status_flags: i32,
}

/// One committed transfer leg observed against `(debtor_id, creditor_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountTransferSignal {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub transfer_number: TransferNumber,
    pub coordinator: CoordinatorTriple,
    pub acquired_amount: Amount,
    pub principal: Amount,
    pub other_creditor_id: CreditorId,
    pub transfer_note: String,
    pub committed_at_ts: DateTime<Utc>,
}

/// A transfer has been reserved against the sender.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedTransferSignal {
    pub debtor_id: DebtorId,
    pub sender_creditor_id: CreditorId,
    pub transfer_id: TransferId,
    pub coordinator: CoordinatorTriple,
    pub sender_locked_amount: Amount,
    pub recipient_creditor_id: CreditorId,
    pub prepared_at_ts: DateTime<Utc>,
    pub deadline: DateTime<Utc>,
}

/// A `prepare_transfer` request was refused before any `PreparedTransfer` row
/// was created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedTransferSignal {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub coordinator: CoordinatorTriple,
    pub status_code: StatusCode,
    pub details: String,
}

/// Terminal outcome of a prepared transfer, whether or not it committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizedTransferSignal {
    pub debtor_id: DebtorId,
    pub sender_creditor_id: CreditorId,
    pub transfer_id: TransferId,
    pub coordinator: CoordinatorTriple,
    pub committed_amount: Amount,
    pub status_code: StatusCode,
    pub total_locked_amount: Amount,
    pub finalized_at_ts: DateTime<Utc>,
}

/// A `configure_account` event failed validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RejectedConfigSignal {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub ts: DateTime<Utc>,
    pub seqnum: SeqNum,
    pub rejection_code: ConfigRejectionCode,
}

/// A long-deleted account row was physically removed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountPurgeSignal {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub creation_date: DateTime<Utc>,
}

/// Emitted whenever a maintenance-adjacent operation runs (interest-rate
/// change, capitalize, try-to-delete) regardless of whether it changed
/// anything observable, so operators can audit attempts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountMaintenanceSignal {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub ts: DateTime<Utc>,
}

/// Any one of the eight outbox rows the engine can produce.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Signal {
    AccountUpdate(AccountUpdateSignal),
    AccountTransfer(AccountTransferSignal),
    PreparedTransfer(PreparedTransferSignal),
    RejectedTransfer(RejectedTransferSignal),
    FinalizedTransfer(FinalizedTransferSignal),
    RejectedConfig(RejectedConfigSignal),
    AccountPurge(AccountPurgeSignal),
    AccountMaintenance(AccountMaintenanceSignal),
}

/// Sink the engine appends signal rows to inside the same transaction as
/// the state mutation they describe. Implementors never reject an append;
/// the only failure mode is the surrounding transaction rolling back.
pub trait SignalWriter {
    fn emit(&mut self, signal: Signal);
}

/// In-memory outbox collector, used by the engine's unit/property tests and
/// by any caller that wants to inspect emitted signals before handing them
/// to a real durable outbox table.
#[derive(Debug, Default, Clone)]
pub struct Outbox {
    signals: Vec<Signal>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&mut self) -> Vec<Signal> {
        std::mem::take(&mut self.signals)
    }

    pub fn as_slice(&self) -> &[Signal] {
        &self.signals
    }

    pub fn len(&self) -> usize {
        self.signals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }
}

impl SignalWriter for Outbox {
    fn emit(&mut self, signal: Signal) {
        self.signals.push(signal);
    }
}
