//! The storage abstraction: typed records for the five ledger tables plus
//! a `Ledger` trait that exposes row-locking access to them. Mutations are
//! expected to happen inside one transaction per logical unit of work, with
//! row-level locks (`SELECT ... FOR UPDATE SKIP LOCKED`) as the only
//! synchronization primitive — no in-process locks are required, the
//! database is the source of truth.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;

use std::collections::HashSet;

use async_trait::async_trait;
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use ledger_primitives::{Amount, AutoId, CreditorId, DebtorId, InterestRate, SeqNum, TransferId, TransferNumber};
use serde::{Deserialize, Serialize};
use thiserror::Error;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct ConfigFlags: i32 {
        const SCHEDULED_FOR_DELETION = 1 << 0;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
    pub struct StatusFlags: i32 {
        const DELETED                    = 1 << 0;
        const ESTABLISHED_INTEREST_RATE  = 1 << 1;
        const OVERFLOWN                  = 1 << 2;
        const UNREACHABLE                = 1 << 3;
    }
}

/// The `(debtor_id, creditor_id)` row. Every signed-off mutation goes
/// through `_apply_account_change` (in `ledger-core`); this struct itself
/// is plain data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub principal: Amount,
    pub interest: f64,
    pub interest_rate: InterestRate,
    pub last_interest_rate_change_ts: DateTime<Utc>,
    pub previous_interest_rate: InterestRate,
    pub total_locked_amount: Amount,
    pub pending_transfers_count: i32,
    pub last_transfer_id: TransferId,
    pub last_change_seqnum: SeqNum,
    pub last_change_ts: DateTime<Utc>,
    pub last_transfer_number: TransferNumber,
    pub last_transfer_committed_at_ts: DateTime<Utc>,
    pub last_config_ts: DateTime<Utc>,
    pub last_config_seqnum: SeqNum,
    pub creation_date: DateTime<Utc>,
    pub negligible_amount: f64,
    pub config_flags: ConfigFlags,
    pub status_flags: StatusFlags,
    /// When the account last re-sent its own `AccountUpdate` as a heartbeat,
    /// or a prepared transfer last re-sent its reminder. `None` until the
    /// first reminder.
    pub last_reminder_ts: Option<DateTime<Utc>>,
}

impl Account {
    /// A freshly created, never-configured account at `now`.
    pub fn new(debtor_id: DebtorId, creditor_id: CreditorId, now: DateTime<Utc>) -> Self {
        Account {
            debtor_id,
            creditor_id,
            principal: 0,
            interest: 0.0,
            interest_rate: 0.0,
            last_interest_rate_change_ts: now,
            previous_interest_rate: 0.0,
            total_locked_amount: 0,
            pending_transfers_count: 0,
            last_transfer_id: 0,
            last_change_seqnum: SeqNum::new(0),
            last_change_ts: now,
            last_transfer_number: 0,
            last_transfer_committed_at_ts: now,
            last_config_ts: DateTime::<Utc>::from_timestamp(0, 0).unwrap(),
            last_config_seqnum: SeqNum::new(0),
            creation_date: now,
            negligible_amount: 0.0,
            config_flags: ConfigFlags::empty(),
            status_flags: StatusFlags::empty(),
            last_reminder_ts: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoordinatorKey {
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
}

/// A live reservation against the sender account. Created by prepare,
/// destroyed by finalize or (eventually) by operator-driven expiry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreparedTransfer {
    pub debtor_id: DebtorId,
    pub sender_creditor_id: CreditorId,
    pub transfer_id: TransferId,
    pub coordinator: CoordinatorKey,
    pub recipient_creditor_id: CreditorId,
    pub locked_amount: Amount,
    pub min_account_balance: Amount,
    pub min_interest_rate: InterestRate,
    pub demurrage_rate: InterestRate,
    pub deadline: DateTime<Utc>,
    pub prepared_at_ts: DateTime<Utc>,
    pub last_reminder_ts: Option<DateTime<Utc>>,
}

/// Prepare-phase intent, queued by the inbound actor and drained by the
/// per-sender batch worker. Deleted once processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferRequest {
    pub debtor_id: DebtorId,
    pub sender_creditor_id: CreditorId,
    pub auto_id: AutoId,
    pub coordinator: CoordinatorKey,
    pub min_locked_amount: Amount,
    pub max_locked_amount: Amount,
    pub recipient_creditor_id: CreditorId,
    pub ts: DateTime<Utc>,
    pub max_commit_delay_seconds: i64,
    pub min_interest_rate: InterestRate,
    /// Not part of the inbound wire contract: defaulted by the engine to
    /// `MIN_INT64` for a root sender (unrestricted issuance) and `0`
    /// otherwise, then coerced to `max(0, _)` for non-root senders per
    /// the prepare pipeline.
    pub min_account_balance: Amount,
}

/// Finalize-phase intent. The primary key is `(debtor_id,
/// sender_creditor_id, transfer_id)`; a duplicate insert is an idempotent
/// no-op (the transaction is simply rolled back by the caller).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizationRequest {
    pub debtor_id: DebtorId,
    pub sender_creditor_id: CreditorId,
    pub transfer_id: TransferId,
    pub coordinator: CoordinatorKey,
    pub committed_amount: Amount,
    pub transfer_note_format: String,
    pub transfer_note: String,
    pub ts: DateTime<Utc>,
}

/// A queued additive mutation to `(debtor_id, creditor_id)`, drained and
/// coalesced by the pending-change applier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAccountChange {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub auto_id: AutoId,
    pub principal_delta: Amount,
    pub interest_delta: f64,
    pub unlocked_amount: Option<Amount>,
    pub coordinator: CoordinatorKey,
    pub other_creditor_id: CreditorId,
    pub transfer_note: String,
    pub inserted_at_ts: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("backend unavailable: {0}")]
    Backend(String),
    #[error("duplicate key, insert ignored for idempotency")]
    DuplicateKey,
    #[error("row locked by another worker")]
    WouldBlock,
}

/// Row-locking access to the five ledger tables. One logical unit of work
/// (one inbound call, one batch-worker pass, one maintenance pass) is
/// expected to run inside a single transaction scoped by the caller; this
/// trait only exposes the row operations, not the transaction boundary
/// itself (that belongs to the concrete backend, e.g. a `sqlx::Transaction`
/// threaded through by the `node` worker loop).
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Lock the account row with `SELECT ... FOR UPDATE SKIP LOCKED`
    /// semantics. Returns `Ok(None)` both when the row doesn't exist and
    /// when it is already locked by another worker; callers distinguish by
    /// calling `get_account` if they need to know which.
    async fn lock_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<Option<Account>, StorageError>;

    async fn get_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<Option<Account>, StorageError>;

    async fn upsert_account(&self, account: Account) -> Result<(), StorageError>;

    async fn delete_account(&self, debtor_id: DebtorId, creditor_id: CreditorId) -> Result<(), StorageError>;

    async fn scan_accounts(&self) -> Result<Vec<Account>, StorageError>;

    /// Accounts among `candidates` that are reachable for incoming
    /// transfers (neither `DELETED` nor `UNREACHABLE`).
    async fn reachable_recipients(
        &self,
        debtor_id: DebtorId,
        candidates: &[CreditorId],
    ) -> Result<HashSet<CreditorId>, StorageError>;

    async fn insert_transfer_request(&self, request: TransferRequest) -> Result<AutoId, StorageError>;
    async fn distinct_transfer_request_senders(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError>;
    async fn drain_transfer_requests(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
    ) -> Result<Vec<TransferRequest>, StorageError>;
    async fn delete_transfer_requests(&self, rows: &[(DebtorId, CreditorId, AutoId)]) -> Result<(), StorageError>;

    async fn insert_finalization_request(&self, request: FinalizationRequest) -> Result<(), StorageError>;
    async fn distinct_finalization_request_senders(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError>;
    async fn drain_finalization_requests(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
    ) -> Result<Vec<FinalizationRequest>, StorageError>;
    async fn delete_finalization_request(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<(), StorageError>;

    async fn insert_prepared_transfer(&self, transfer: PreparedTransfer) -> Result<(), StorageError>;
    async fn get_prepared_transfer(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<Option<PreparedTransfer>, StorageError>;
    async fn upsert_prepared_transfer(&self, transfer: PreparedTransfer) -> Result<(), StorageError>;
    async fn delete_prepared_transfer(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        transfer_id: TransferId,
    ) -> Result<(), StorageError>;
    async fn scan_prepared_transfers(&self) -> Result<Vec<PreparedTransfer>, StorageError>;

    async fn insert_pending_account_change(&self, change: PendingAccountChange) -> Result<(), StorageError>;
    async fn distinct_pending_change_accounts(&self) -> Result<Vec<(DebtorId, CreditorId)>, StorageError>;
    async fn drain_pending_account_changes(
        &self,
        debtor_id: DebtorId,
        creditor_id: CreditorId,
    ) -> Result<Vec<PendingAccountChange>, StorageError>;
}
