//! The pending-change applier, §4.6: coalesces all queued
//! `PendingAccountChange` rows for one `(debtor_id, creditor_id)` into a
//! single row-level lock acquisition and a single `AccountUpdate`.

use chrono::{DateTime, Utc};
use ledger_primitives::{Amount, CreditorId, DebtorId, ROOT_CREDITOR_ID};
use ledger_signals::{AccountTransferSignal, CoordinatorTriple, Signal, SignalWriter};
use ledger_storage::{Account, Ledger, StatusFlags};

use crate::account::AccountOps;
use crate::error::LedgerResult;

/// Drains and applies all queued changes for `(debtor_id, creditor_id)`.
/// If the account exists but is locked by another worker, the changes are
/// left queued for a later pass (nothing is drained in that case).
pub async fn process_pending_account_changes(
    ledger: &dyn Ledger,
    debtor_id: DebtorId,
    creditor_id: CreditorId,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let existing = ledger.get_account(debtor_id, creditor_id).await?;
    let mut account = match existing {
        Some(_) => match ledger.lock_account(debtor_id, creditor_id).await? {
            Some(account) => account,
            None => {
                log::debug!(target: "ledger::pending_change", "account {debtor_id}/{creditor_id} locked elsewhere, deferring");
                return Ok(());
            }
        },
        None => Account::new(debtor_id, creditor_id, now),
    };

    let changes = ledger.drain_pending_account_changes(debtor_id, creditor_id).await?;
    if changes.is_empty() {
        if existing.is_some() {
            ledger.upsert_account(account).await?;
        }
        return Ok(());
    }

    let was_deleted = account.status_flags.contains(StatusFlags::DELETED);
    if was_deleted {
        account.status_flags.remove(StatusFlags::DELETED);
        account.status_flags.remove(StatusFlags::ESTABLISHED_INTEREST_RATE);
    }

    let mut principal_delta_total: i128 = 0;
    let mut interest_delta_total: f64 = 0.0;
    let mut running_principal = account.principal as i128;

    for change in &changes {
        let due_interest = account.calc_due_interest(change.principal_delta, change.inserted_at_ts, now);
        interest_delta_total += due_interest;
        principal_delta_total += change.principal_delta as i128;
        running_principal += change.principal_delta as i128;

        let acquired_amount = change.principal_delta;
        let suppress = creditor_id == ROOT_CREDITOR_ID
            || (acquired_amount > 0 && (acquired_amount as f64) <= account.negligible_amount);

        if !suppress {
            account.last_transfer_number += 1;
            account.last_transfer_committed_at_ts = now;
            outbox.emit(Signal::AccountTransfer(AccountTransferSignal {
                debtor_id,
                creditor_id,
                transfer_number: account.last_transfer_number,
                coordinator: CoordinatorTriple {
                    coordinator_type: change.coordinator.coordinator_type.clone(),
                    coordinator_id: change.coordinator.coordinator_id,
                    coordinator_request_id: change.coordinator.coordinator_request_id,
                },
                acquired_amount,
                principal: running_principal as Amount,
                other_creditor_id: change.other_creditor_id,
                transfer_note: change.transfer_note.clone(),
                committed_at_ts: now,
            }));
        }
    }

    account.apply_account_change(principal_delta_total as Amount, interest_delta_total, now, outbox);
    ledger.upsert_account(account).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_signals::Outbox;
    use ledger_storage::memory::MemoryLedger;
    use ledger_storage::{CoordinatorKey, PendingAccountChange};

    #[tokio::test]
    async fn resurrects_deleted_account() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut deleted = Account::new(1, 20, now);
        deleted.status_flags.insert(StatusFlags::DELETED);
        deleted.status_flags.insert(StatusFlags::ESTABLISHED_INTEREST_RATE);
        ledger.upsert_account(deleted).await.unwrap();

        ledger
            .insert_pending_account_change(PendingAccountChange {
                debtor_id: 1,
                creditor_id: 20,
                auto_id: 0,
                principal_delta: 500,
                interest_delta: 0.0,
                unlocked_amount: None,
                coordinator: CoordinatorKey { coordinator_type: "direct".into(), coordinator_id: 1, coordinator_request_id: 1 },
                other_creditor_id: 10,
                transfer_note: String::new(),
                inserted_at_ts: now,
            })
            .await
            .unwrap();

        let mut outbox = Outbox::new();
        process_pending_account_changes(&ledger, 1, 20, now, &mut outbox).await.unwrap();

        let account = ledger.get_account(1, 20).await.unwrap().unwrap();
        assert!(!account.status_flags.contains(StatusFlags::DELETED));
        assert!(!account.status_flags.contains(StatusFlags::ESTABLISHED_INTEREST_RATE));
        assert_eq!(account.principal, 500);
        assert!(outbox.as_slice().iter().any(|s| matches!(s, Signal::AccountUpdate(_))));
    }

    #[tokio::test]
    async fn negligible_amounts_are_suppressed() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut account = Account::new(1, 21, now);
        account.negligible_amount = 10.0;
        ledger.upsert_account(account).await.unwrap();

        ledger
            .insert_pending_account_change(PendingAccountChange {
                debtor_id: 1,
                creditor_id: 21,
                auto_id: 0,
                principal_delta: 5,
                interest_delta: 0.0,
                unlocked_amount: None,
                coordinator: CoordinatorKey { coordinator_type: "direct".into(), coordinator_id: 1, coordinator_request_id: 1 },
                other_creditor_id: 10,
                transfer_note: String::new(),
                inserted_at_ts: now,
            })
            .await
            .unwrap();

        let mut outbox = Outbox::new();
        process_pending_account_changes(&ledger, 1, 21, now, &mut outbox).await.unwrap();
        assert!(!outbox.as_slice().iter().any(|s| matches!(s, Signal::AccountTransfer(_))));
        assert!(outbox.as_slice().iter().any(|s| matches!(s, Signal::AccountUpdate(_))));
    }
}
