//! The prepare phase of the two-phase transfer protocol, §4.4: the inbound
//! `prepare_transfer` call enqueues a `TransferRequest`, and the per-sender
//! batch worker drains the queue, checks each request against the locked
//! sender account, and emits either a `PreparedTransfer` or a
//! `RejectedTransfer` signal.

use std::cmp::min;
use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use ledger_primitives::{saturate_nonneg, CreditorId, DebtorId, InterestRate, TransferId, MAX_INT32, MIN_INT64, ROOT_CREDITOR_ID};
use ledger_signals::{CoordinatorTriple, PreparedTransferSignal, RejectedTransferSignal, Signal, SignalWriter, StatusCode};
use ledger_storage::{CoordinatorKey, Ledger, PreparedTransfer, TransferRequest};

use crate::account::AccountOps;
use crate::error::LedgerResult;

pub struct PrepareTransferRequest {
    pub coordinator_type: String,
    pub coordinator_id: i64,
    pub coordinator_request_id: i64,
    pub min_locked_amount: i64,
    pub max_locked_amount: i64,
    pub debtor_id: DebtorId,
    pub sender_creditor_id: CreditorId,
    /// Decimal string of an unsigned 64-bit integer, reinterpreted as a
    /// signed creditor id.
    pub recipient: String,
    pub ts: DateTime<Utc>,
    pub max_commit_delay_seconds: i64,
    pub min_interest_rate: InterestRate,
}

fn decode_recipient(recipient: &str) -> Option<CreditorId> {
    recipient.parse::<u64>().ok().map(|v| v as i64)
}

/// Validates and enqueues a prepare-transfer intent. No account row is
/// touched here; a later worker pass drains the queue.
pub async fn prepare_transfer(
    ledger: &dyn Ledger,
    req: PrepareTransferRequest,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let coordinator = CoordinatorTriple {
        coordinator_type: req.coordinator_type.clone(),
        coordinator_id: req.coordinator_id,
        coordinator_request_id: req.coordinator_request_id,
    };

    let Some(recipient_creditor_id) = decode_recipient(&req.recipient) else {
        outbox.emit(Signal::RejectedTransfer(RejectedTransferSignal {
            debtor_id: req.debtor_id,
            creditor_id: req.sender_creditor_id,
            coordinator,
            status_code: StatusCode::RecipientIsUnreachable,
            details: format!("cannot decode recipient {:?}", req.recipient),
        }));
        return Ok(());
    };

    let min_account_balance = if req.sender_creditor_id == ROOT_CREDITOR_ID { MIN_INT64 } else { 0 };

    ledger
        .insert_transfer_request(TransferRequest {
            debtor_id: req.debtor_id,
            sender_creditor_id: req.sender_creditor_id,
            auto_id: 0,
            coordinator: CoordinatorKey {
                coordinator_type: req.coordinator_type,
                coordinator_id: req.coordinator_id,
                coordinator_request_id: req.coordinator_request_id,
            },
            min_locked_amount: req.min_locked_amount,
            max_locked_amount: req.max_locked_amount,
            recipient_creditor_id,
            ts: req.ts,
            max_commit_delay_seconds: req.max_commit_delay_seconds,
            min_interest_rate: req.min_interest_rate,
            min_account_balance,
        })
        .await?;
    Ok(())
}

fn reject(
    outbox: &mut dyn SignalWriter,
    debtor_id: DebtorId,
    sender_creditor_id: CreditorId,
    request: &TransferRequest,
    status_code: StatusCode,
    details: impl Into<String>,
) {
    outbox.emit(Signal::RejectedTransfer(RejectedTransferSignal {
        debtor_id,
        creditor_id: sender_creditor_id,
        coordinator: CoordinatorTriple {
            coordinator_type: request.coordinator.coordinator_type.clone(),
            coordinator_id: request.coordinator.coordinator_id,
            coordinator_request_id: request.coordinator.coordinator_request_id,
        },
        status_code,
        details: details.into(),
    }));
}

/// Drains all pending `TransferRequest` rows for `(debtor_id,
/// sender_creditor_id)` in one pass, applying the rejection checks of
/// §4.4 in order. If the sender row is currently locked by another
/// worker, the queued requests are left untouched for a later pass.
pub async fn process_transfer_requests(
    ledger: &dyn Ledger,
    debtor_id: DebtorId,
    sender_creditor_id: CreditorId,
    now: DateTime<Utc>,
    commit_period: Duration,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let requests = ledger.drain_transfer_requests(debtor_id, sender_creditor_id).await?;
    if requests.is_empty() {
        return Ok(());
    }

    if ledger.get_account(debtor_id, sender_creditor_id).await?.is_none() {
        for request in &requests {
            reject(outbox, debtor_id, sender_creditor_id, request, StatusCode::InsufficientAvailableAmount, "sender account does not exist");
        }
        delete_all(ledger, debtor_id, sender_creditor_id, &requests).await?;
        return Ok(());
    }

    let Some(mut sender) = ledger.lock_account(debtor_id, sender_creditor_id).await? else {
        log::debug!(target: "ledger::prepare", "sender {debtor_id}/{sender_creditor_id} locked elsewhere, deferring {} request(s)", requests.len());
        return Ok(());
    };

    let candidates: Vec<CreditorId> = requests
        .iter()
        .map(|r| r.recipient_creditor_id)
        .filter(|id| *id != ROOT_CREDITOR_ID)
        .collect::<HashSet<_>>()
        .into_iter()
        .collect();
    let reachable = ledger.reachable_recipients(debtor_id, &candidates).await?;

    for request in &requests {
        if sender.pending_transfers_count >= MAX_INT32 {
            reject(outbox, debtor_id, sender_creditor_id, request, StatusCode::TooManyTransfers, "pending_transfers_count at capacity");
            continue;
        }
        if request.sender_creditor_id == request.recipient_creditor_id {
            reject(outbox, debtor_id, sender_creditor_id, request, StatusCode::RecipientSameAsSender, "sender equals recipient");
            continue;
        }
        if request.recipient_creditor_id != ROOT_CREDITOR_ID && !reachable.contains(&request.recipient_creditor_id) {
            reject(outbox, debtor_id, sender_creditor_id, request, StatusCode::RecipientIsUnreachable, "recipient not reachable");
            continue;
        }
        if sender.interest_rate < request.min_interest_rate {
            reject(outbox, debtor_id, sender_creditor_id, request, StatusCode::TooLowInterestRate, "sender interest rate too low");
            continue;
        }

        let available = sender.available_amount(now);
        let min_account_balance = if sender_creditor_id == ROOT_CREDITOR_ID {
            request.min_account_balance
        } else {
            request.min_account_balance.max(0)
        };
        let expendable = min(std::cmp::max(available.saturating_sub(min_account_balance), 0), request.max_locked_amount);

        if expendable < request.min_locked_amount {
            reject(outbox, debtor_id, sender_creditor_id, request, StatusCode::InsufficientAvailableAmount, format!("expendable={expendable} < min_locked_amount={}", request.min_locked_amount));
            continue;
        }

        sender.total_locked_amount = saturate_nonneg(sender.total_locked_amount, expendable as i128);
        sender.pending_transfers_count += 1;
        sender.last_transfer_id += 1;
        let transfer_id: TransferId = sender.last_transfer_id;

        let deadline_from_request = request.ts + Duration::seconds(request.max_commit_delay_seconds);
        let deadline = min(now + commit_period, deadline_from_request);

        ledger
            .insert_prepared_transfer(PreparedTransfer {
                debtor_id,
                sender_creditor_id,
                transfer_id,
                coordinator: request.coordinator.clone(),
                recipient_creditor_id: request.recipient_creditor_id,
                locked_amount: expendable,
                min_account_balance,
                min_interest_rate: request.min_interest_rate,
                demurrage_rate: 0.0,
                deadline,
                prepared_at_ts: now,
                last_reminder_ts: None,
            })
            .await?;

        outbox.emit(Signal::PreparedTransfer(PreparedTransferSignal {
            debtor_id,
            sender_creditor_id,
            transfer_id,
            coordinator: CoordinatorTriple {
                coordinator_type: request.coordinator.coordinator_type.clone(),
                coordinator_id: request.coordinator.coordinator_id,
                coordinator_request_id: request.coordinator.coordinator_request_id,
            },
            sender_locked_amount: expendable,
            recipient_creditor_id: request.recipient_creditor_id,
            prepared_at_ts: now,
            deadline,
        }));
    }

    ledger.upsert_account(sender).await?;
    delete_all(ledger, debtor_id, sender_creditor_id, &requests).await?;
    Ok(())
}

async fn delete_all(
    ledger: &dyn Ledger,
    debtor_id: DebtorId,
    sender_creditor_id: CreditorId,
    requests: &[TransferRequest],
) -> LedgerResult<()> {
    let rows: Vec<_> = requests.iter().map(|r| (debtor_id, sender_creditor_id, r.auto_id)).collect();
    ledger.delete_transfer_requests(&rows).await?;
    Ok(())
}
