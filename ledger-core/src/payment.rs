//! `make_debtor_payment`: moves `amount` between an account and the root
//! account outside the two-phase transfer protocol. Used internally by
//! interest capitalization (§4.8) and account deletion (§4.9) against an
//! account the caller already holds locked, and exposed standalone as the
//! administrative entry point the original procedures module offers.

use chrono::{DateTime, Utc};
use ledger_primitives::{Amount, CreditorId, DebtorId, ROOT_CREDITOR_ID};
use ledger_signals::{AccountTransferSignal, CoordinatorTriple, Signal, SignalWriter};
use ledger_storage::{Account, CoordinatorKey, Ledger, PendingAccountChange};

use crate::account::AccountOps;
use crate::error::{LedgerError, LedgerResult};

/// Applies a debtor payment of `amount` to an already-locked `account`:
/// queues a `PendingAccountChange` that debits the root account by
/// `-amount`, emits an `AccountTransferSignal` on `account` for `+amount`,
/// and folds `amount` into `account.principal` while draining the matching
/// amount back out of `account.interest` via
/// `apply_account_change(amount, -amount, now)`. Does not touch the
/// account's lock or write it back; the caller does that once it is done
/// with whatever else it is doing in the same unit of work. A no-op for
/// the root account itself (it cannot pay itself).
pub async fn apply_debtor_payment(
    ledger: &dyn Ledger,
    account: &mut Account,
    coordinator_type: &str,
    amount: Amount,
    transfer_note: &str,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    if amount == 0 || account.creditor_id == ROOT_CREDITOR_ID {
        return Ok(());
    }

    let coordinator = CoordinatorKey {
        coordinator_type: coordinator_type.to_string(),
        coordinator_id: account.debtor_id,
        coordinator_request_id: account.last_change_seqnum.0 as i64,
    };

    ledger
        .insert_pending_account_change(PendingAccountChange {
            debtor_id: account.debtor_id,
            creditor_id: ROOT_CREDITOR_ID,
            auto_id: 0,
            principal_delta: -amount,
            interest_delta: 0.0,
            unlocked_amount: None,
            coordinator: coordinator.clone(),
            other_creditor_id: account.creditor_id,
            transfer_note: transfer_note.to_string(),
            inserted_at_ts: now,
        })
        .await?;

    account.last_transfer_number += 1;
    account.last_transfer_committed_at_ts = now;
    outbox.emit(Signal::AccountTransfer(AccountTransferSignal {
        debtor_id: account.debtor_id,
        creditor_id: account.creditor_id,
        transfer_number: account.last_transfer_number,
        coordinator: CoordinatorTriple {
            coordinator_type: coordinator.coordinator_type.clone(),
            coordinator_id: coordinator.coordinator_id,
            coordinator_request_id: coordinator.coordinator_request_id,
        },
        acquired_amount: amount,
        principal: account.principal.saturating_add(amount),
        other_creditor_id: ROOT_CREDITOR_ID,
        transfer_note: transfer_note.to_string(),
        committed_at_ts: now,
    }));

    account.apply_account_change(amount, -(amount as f64), now, outbox);
    log::debug!(
        target: "ledger::payment",
        "debtor payment {}/{}: amount={} coordinator_type={}",
        account.debtor_id, account.creditor_id, amount, coordinator_type
    );
    Ok(())
}

/// Standalone administrative entry point: locks `(debtor_id, creditor_id)`,
/// applies the payment, and writes the account back.
pub async fn make_debtor_payment(
    ledger: &dyn Ledger,
    debtor_id: DebtorId,
    creditor_id: CreditorId,
    coordinator_type: &str,
    amount: Amount,
    transfer_note: &str,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    if ledger.get_account(debtor_id, creditor_id).await?.is_none() {
        return Err(LedgerError::AccountNotFound { debtor_id, creditor_id });
    }
    let Some(mut account) = ledger.lock_account(debtor_id, creditor_id).await? else {
        return Err(LedgerError::AccountLocked { debtor_id, creditor_id });
    };
    apply_debtor_payment(ledger, &mut account, coordinator_type, amount, transfer_note, now, outbox).await?;
    ledger.upsert_account(account).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_signals::Outbox;
    use ledger_storage::memory::MemoryLedger;

    #[tokio::test]
    async fn payment_moves_principal_and_queues_root_debit() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        ledger.upsert_account(Account::new(1, ROOT_CREDITOR_ID, now)).await.unwrap();
        ledger.upsert_account(Account::new(1, 30, now)).await.unwrap();

        let mut outbox = Outbox::new();
        make_debtor_payment(&ledger, 1, 30, "interest", 250, "capitalize", now, &mut outbox).await.unwrap();

        let account = ledger.get_account(1, 30).await.unwrap().unwrap();
        assert_eq!(account.principal, 250);

        let queued = ledger.drain_pending_account_changes(1, ROOT_CREDITOR_ID).await.unwrap();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].principal_delta, -250);
    }

    #[tokio::test]
    async fn missing_account_is_reported() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut outbox = Outbox::new();
        let result = make_debtor_payment(&ledger, 1, 999, "interest", 1, "x", now, &mut outbox).await;
        assert!(matches!(result, Err(LedgerError::AccountNotFound { .. })));
    }

    #[tokio::test]
    async fn root_account_cannot_pay_itself() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut root = Account::new(1, ROOT_CREDITOR_ID, now);
        root.principal = 1000;
        let principal_before = root.principal;

        let mut outbox = Outbox::new();
        apply_debtor_payment(&ledger, &mut root, "interest", 250, "capitalize", now, &mut outbox).await.unwrap();

        assert_eq!(root.principal, principal_before, "root payment must be a no-op");
        assert_eq!(outbox.len(), 0, "no transfer signal for a root-to-root payment");
        let queued = ledger.drain_pending_account_changes(1, ROOT_CREDITOR_ID).await.unwrap();
        assert!(queued.is_empty(), "no pending change should be queued against root");
    }
}
