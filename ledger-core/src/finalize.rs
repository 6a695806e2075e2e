//! The finalize phase of the two-phase transfer protocol, §4.5.

use std::cmp::min;

use chrono::{DateTime, Utc};
use ledger_primitives::{saturate_nonneg, Amount, CreditorId, DebtorId, InterestRate, TransferId};
use ledger_signals::{
    AccountTransferSignal, CoordinatorTriple, FinalizedTransferSignal, Signal, SignalWriter, StatusCode,
};
use ledger_storage::{CoordinatorKey, FinalizationRequest, Ledger, PendingAccountChange, PreparedTransfer};

use crate::account::AccountOps;
use crate::error::LedgerResult;

pub struct FinalizeTransferRequest {
    pub debtor_id: DebtorId,
    pub sender_creditor_id: CreditorId,
    pub transfer_id: TransferId,
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub committed_amount: Amount,
    pub transfer_note_format: String,
    pub transfer_note: String,
    pub ts: DateTime<Utc>,
}

/// Enqueues a finalization intent. Duplicate primary keys (a retransmitted
/// finalize for an already-processed transfer) are absorbed silently: the
/// two-phase protocol is idempotent on this side.
pub async fn finalize_transfer(ledger: &dyn Ledger, req: FinalizeTransferRequest) -> LedgerResult<()> {
    let result = ledger
        .insert_finalization_request(FinalizationRequest {
            debtor_id: req.debtor_id,
            sender_creditor_id: req.sender_creditor_id,
            transfer_id: req.transfer_id,
            coordinator: CoordinatorKey {
                coordinator_type: req.coordinator_type,
                coordinator_id: req.coordinator_id,
                coordinator_request_id: req.coordinator_request_id,
            },
            committed_amount: req.committed_amount,
            transfer_note_format: req.transfer_note_format,
            transfer_note: req.transfer_note,
            ts: req.ts,
        })
        .await;

    match result {
        Ok(()) => Ok(()),
        Err(ledger_storage::StorageError::DuplicateKey) => {
            log::debug!(target: "ledger::finalize", "duplicate finalize_transfer for {}/{}/{}, ignored", req.debtor_id, req.sender_creditor_id, req.transfer_id);
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

fn calc_status_code(
    pt: &PreparedTransfer,
    committed_amount: Amount,
    expendable: Amount,
    sender_interest_rate: InterestRate,
    now: DateTime<Utc>,
) -> StatusCode {
    let amount_ok = committed_amount >= 0 && committed_amount <= min(pt.locked_amount, std::cmp::max(expendable, 0));
    let rate_ok = sender_interest_rate >= pt.min_interest_rate;
    let deadline_ok = now <= pt.deadline;
    if amount_ok && rate_ok && deadline_ok {
        StatusCode::Ok
    } else if !deadline_ok {
        StatusCode::TransferDeadlineExpired
    } else if !rate_ok {
        StatusCode::TooLowInterestRate
    } else {
        StatusCode::InsufficientAvailableAmount
    }
}

/// Drains all pending `FinalizationRequest` rows for `(debtor_id,
/// sender_creditor_id)`, joins each against its `PreparedTransfer`, and
/// applies the sender-side principal delta once at the end.
pub async fn process_finalization_requests(
    ledger: &dyn Ledger,
    debtor_id: DebtorId,
    sender_creditor_id: CreditorId,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let requests = ledger.drain_finalization_requests(debtor_id, sender_creditor_id).await?;
    if requests.is_empty() {
        return Ok(());
    }

    let Some(mut sender) = ledger.lock_account(debtor_id, sender_creditor_id).await? else {
        log::debug!(target: "ledger::finalize", "sender {debtor_id}/{sender_creditor_id} locked elsewhere, deferring {} request(s)", requests.len());
        return Ok(());
    };

    let starting_balance = sender.current_balance(now).floor() as Amount;
    let mut principal_delta_so_far: i128 = 0;

    for fr in &requests {
        let pt = ledger.get_prepared_transfer(debtor_id, sender_creditor_id, fr.transfer_id).await?;
        let pt = match pt {
            Some(pt) if pt.coordinator == fr.coordinator => pt,
            _ => {
                ledger.delete_finalization_request(debtor_id, sender_creditor_id, fr.transfer_id).await?;
                continue;
            }
        };

        let expendable = (starting_balance as i128 + principal_delta_so_far
            - sender.total_locked_amount as i128
            - pt.min_account_balance as i128)
            .clamp(i64::MIN as i128, i64::MAX as i128) as Amount;

        let status_code = calc_status_code(&pt, fr.committed_amount, expendable, sender.interest_rate, now);
        let committed_amount = if status_code.is_ok() { fr.committed_amount } else { 0 };

        sender.total_locked_amount = saturate_nonneg(sender.total_locked_amount, -(pt.locked_amount as i128));
        sender.pending_transfers_count = (sender.pending_transfers_count - 1).max(0);

        if committed_amount > 0 {
            principal_delta_so_far -= committed_amount as i128;
            sender.last_transfer_number += 1;
            sender.last_transfer_committed_at_ts = now;

            outbox.emit(Signal::AccountTransfer(AccountTransferSignal {
                debtor_id,
                creditor_id: sender_creditor_id,
                transfer_number: sender.last_transfer_number,
                coordinator: CoordinatorTriple {
                    coordinator_type: fr.coordinator.coordinator_type.clone(),
                    coordinator_id: fr.coordinator.coordinator_id,
                    coordinator_request_id: fr.coordinator.coordinator_request_id,
                },
                acquired_amount: -committed_amount,
                principal: (sender.principal as i128 + principal_delta_so_far) as Amount,
                other_creditor_id: pt.recipient_creditor_id,
                transfer_note: fr.transfer_note.clone(),
                committed_at_ts: now,
            }));

            ledger
                .insert_pending_account_change(PendingAccountChange {
                    debtor_id,
                    creditor_id: pt.recipient_creditor_id,
                    auto_id: 0,
                    principal_delta: committed_amount,
                    interest_delta: 0.0,
                    unlocked_amount: None,
                    coordinator: fr.coordinator.clone(),
                    other_creditor_id: sender_creditor_id,
                    transfer_note: fr.transfer_note.clone(),
                    inserted_at_ts: now,
                })
                .await?;
        }

        outbox.emit(Signal::FinalizedTransfer(FinalizedTransferSignal {
            debtor_id,
            sender_creditor_id,
            transfer_id: fr.transfer_id,
            coordinator: CoordinatorTriple {
                coordinator_type: fr.coordinator.coordinator_type.clone(),
                coordinator_id: fr.coordinator.coordinator_id,
                coordinator_request_id: fr.coordinator.coordinator_request_id,
            },
            committed_amount,
            status_code,
            total_locked_amount: sender.total_locked_amount,
            finalized_at_ts: now,
        }));

        ledger.delete_prepared_transfer(debtor_id, sender_creditor_id, fr.transfer_id).await?;
        ledger.delete_finalization_request(debtor_id, sender_creditor_id, fr.transfer_id).await?;
    }

    if principal_delta_so_far != 0 {
        sender.apply_account_change(principal_delta_so_far as Amount, 0.0, now, outbox);
    }
    ledger.upsert_account(sender).await?;
    Ok(())
}
