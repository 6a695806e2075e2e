//! The account engine and two-phase transfer protocol: everything in §4 of
//! the accounting core, expressed as functions over a `&dyn
//! ledger_storage::Ledger` plus an explicit `now: DateTime<Utc>` and a
//! `&mut dyn ledger_signals::SignalWriter` outbox. No function here reads an
//! ambient clock; `now` is always a parameter, per the redesign flag in §9.

pub mod account;
pub mod account_config;
pub mod delete;
pub mod error;
pub mod finalize;
pub mod interest;
pub mod maintenance;
pub mod payment;
pub mod pending_change;
pub mod transfer;

pub use account::AccountOps;
pub use account_config::{configure_account, ConfigureAccountRequest};
pub use delete::try_to_delete_account;
pub use error::{LedgerError, LedgerResult};
pub use finalize::{finalize_transfer, process_finalization_requests, FinalizeTransferRequest};
pub use interest::{capitalize_interest, change_interest_rate, ChangeInterestRateRequest};
pub use maintenance::{scan_accounts, scan_prepared_transfers, MaintenanceConfig};
pub use payment::{apply_debtor_payment, make_debtor_payment};
pub use pending_change::process_pending_account_changes;
pub use transfer::{prepare_transfer, process_transfer_requests, PrepareTransferRequest};

use chrono::{DateTime, Duration, Utc};
use ledger_primitives::{Amount, CreditorId, DebtorId};
use ledger_signals::SignalWriter;
use ledger_storage::Ledger;

/// A facade gathering every inbound/worker entry point behind one type, so
/// `bus`/`node` can depend on a single handle instead of importing each
/// module's free functions directly. Holds no state of its own; `ledger`
/// and `outbox` are borrowed per call.
pub struct Engine<'a> {
    pub ledger: &'a dyn Ledger,
}

impl<'a> Engine<'a> {
    pub fn new(ledger: &'a dyn Ledger) -> Self {
        Engine { ledger }
    }

    pub async fn configure_account(
        &self,
        req: ConfigureAccountRequest,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        account_config::configure_account(self.ledger, req, now, outbox).await
    }

    pub async fn prepare_transfer(&self, req: PrepareTransferRequest, outbox: &mut dyn SignalWriter) -> LedgerResult<()> {
        transfer::prepare_transfer(self.ledger, req, outbox).await
    }

    pub async fn process_transfer_requests(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        now: DateTime<Utc>,
        commit_period: Duration,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        transfer::process_transfer_requests(self.ledger, debtor_id, sender_creditor_id, now, commit_period, outbox).await
    }

    pub async fn finalize_transfer(&self, req: FinalizeTransferRequest) -> LedgerResult<()> {
        finalize::finalize_transfer(self.ledger, req).await
    }

    pub async fn process_finalization_requests(
        &self,
        debtor_id: DebtorId,
        sender_creditor_id: CreditorId,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        finalize::process_finalization_requests(self.ledger, debtor_id, sender_creditor_id, now, outbox).await
    }

    pub async fn process_pending_account_changes(
        &self,
        debtor_id: DebtorId,
        creditor_id: CreditorId,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        pending_change::process_pending_account_changes(self.ledger, debtor_id, creditor_id, now, outbox).await
    }

    pub async fn change_interest_rate(
        &self,
        req: ChangeInterestRateRequest,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        interest::change_interest_rate(self.ledger, req, now, outbox).await
    }

    pub async fn capitalize_interest(
        &self,
        debtor_id: DebtorId,
        creditor_id: CreditorId,
        threshold: Amount,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        interest::capitalize_interest(self.ledger, debtor_id, creditor_id, threshold, now, outbox).await
    }

    pub async fn try_to_delete_account(
        &self,
        debtor_id: DebtorId,
        creditor_id: CreditorId,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        delete::try_to_delete_account(self.ledger, debtor_id, creditor_id, now, outbox).await
    }

    /// Standalone administrative entry point, callable outside the
    /// transfer protocol (interest capitalization and deletion call
    /// `payment::apply_debtor_payment` directly since they already hold the
    /// account lock).
    pub async fn make_debtor_payment(
        &self,
        debtor_id: DebtorId,
        creditor_id: CreditorId,
        coordinator_type: &str,
        amount: Amount,
        transfer_note: &str,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        payment::make_debtor_payment(self.ledger, debtor_id, creditor_id, coordinator_type, amount, transfer_note, now, outbox).await
    }

    pub async fn scan_accounts(
        &self,
        config: &MaintenanceConfig,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        maintenance::scan_accounts(self.ledger, config, now, outbox).await
    }

    pub async fn scan_prepared_transfers(
        &self,
        config: &MaintenanceConfig,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) -> LedgerResult<()> {
        maintenance::scan_prepared_transfers(self.ledger, config, now, outbox).await
    }
}
