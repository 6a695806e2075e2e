//! Try-to-delete-account, §4.9.

use chrono::{DateTime, Utc};
use ledger_primitives::{CreditorId, DebtorId, ROOT_CREDITOR_ID};
use ledger_signals::{AccountMaintenanceSignal, Signal, SignalWriter};
use ledger_storage::{ConfigFlags, Ledger, StatusFlags};

use crate::account::AccountOps;
use crate::error::LedgerResult;
use crate::payment::apply_debtor_payment;

/// Marks `(debtor_id, creditor_id)` `DELETED` if it is eligible: no pending
/// transfers, and either it is the root account with zero principal, or a
/// non-root account with a near-zero balance and `SCHEDULED_FOR_DELETION`
/// set. Always emits an `AccountMaintenanceSignal`, whether or not deletion
/// went through.
pub async fn try_to_delete_account(
    ledger: &dyn Ledger,
    debtor_id: DebtorId,
    creditor_id: CreditorId,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let Some(mut account) = ledger.lock_account(debtor_id, creditor_id).await? else {
        log::debug!(target: "ledger::delete", "account {debtor_id}/{creditor_id} missing or locked elsewhere, skipping try_to_delete_account");
        return Ok(());
    };

    let allowed = account.pending_transfers_count == 0
        && if creditor_id == ROOT_CREDITOR_ID {
            account.principal == 0
        } else {
            account.current_balance(now) <= account.negligible_amount.max(2.0)
                && account.config_flags.contains(ConfigFlags::SCHEDULED_FOR_DELETION)
        };

    if allowed {
        if account.principal != 0 {
            let residual = account.principal;
            apply_debtor_payment(ledger, &mut account, "delete", -residual, "account deletion", now, outbox).await?;
        }
        account.principal = 0;
        account.interest = 0.0;
        account.total_locked_amount = 0;
        account.status_flags.insert(StatusFlags::DELETED);
        account.apply_account_change(0, 0.0, now, outbox);
        log::debug!(target: "ledger::delete", "account {debtor_id}/{creditor_id} deleted");
    }

    outbox.emit(Signal::AccountMaintenance(AccountMaintenanceSignal { debtor_id, creditor_id, ts: now }));
    ledger.upsert_account(account).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_signals::Outbox;
    use ledger_storage::memory::MemoryLedger;
    use ledger_storage::Account;

    #[tokio::test]
    async fn root_account_deletes_only_at_zero_principal() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut root = Account::new(1, ROOT_CREDITOR_ID, now);
        root.principal = 100;
        ledger.upsert_account(root).await.unwrap();

        let mut outbox = Outbox::new();
        try_to_delete_account(&ledger, 1, ROOT_CREDITOR_ID, now, &mut outbox).await.unwrap();
        let account = ledger.get_account(1, ROOT_CREDITOR_ID).await.unwrap().unwrap();
        assert!(!account.status_flags.contains(StatusFlags::DELETED));

        let mut zeroed = ledger.get_account(1, ROOT_CREDITOR_ID).await.unwrap().unwrap();
        zeroed.principal = 0;
        ledger.upsert_account(zeroed).await.unwrap();

        try_to_delete_account(&ledger, 1, ROOT_CREDITOR_ID, now, &mut outbox).await.unwrap();
        let account = ledger.get_account(1, ROOT_CREDITOR_ID).await.unwrap().unwrap();
        assert!(account.status_flags.contains(StatusFlags::DELETED));
    }

    #[tokio::test]
    async fn non_root_account_requires_scheduled_flag_and_small_balance() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        ledger.upsert_account(Account::new(1, ROOT_CREDITOR_ID, now)).await.unwrap();
        let mut account = Account::new(1, 50, now);
        account.principal = 1;
        ledger.upsert_account(account).await.unwrap();

        let mut outbox = Outbox::new();
        try_to_delete_account(&ledger, 1, 50, now, &mut outbox).await.unwrap();
        let account = ledger.get_account(1, 50).await.unwrap().unwrap();
        assert!(!account.status_flags.contains(StatusFlags::DELETED), "missing SCHEDULED_FOR_DELETION must block deletion");

        let mut scheduled = ledger.get_account(1, 50).await.unwrap().unwrap();
        scheduled.config_flags.insert(ConfigFlags::SCHEDULED_FOR_DELETION);
        ledger.upsert_account(scheduled).await.unwrap();

        try_to_delete_account(&ledger, 1, 50, now, &mut outbox).await.unwrap();
        let account = ledger.get_account(1, 50).await.unwrap().unwrap();
        assert!(account.status_flags.contains(StatusFlags::DELETED));
        assert_eq!(account.principal, 0);
    }
}
