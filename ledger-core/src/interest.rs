//! Interest-rate changes (§4.7) and interest capitalization (§4.8).

use chrono::{DateTime, Duration, Utc};
use ledger_primitives::{clamp_amount, clamp_interest_rate, Amount, CreditorId, DebtorId, InterestRate};
use ledger_signals::{AccountMaintenanceSignal, Signal, SignalWriter};
use ledger_storage::{Ledger, StatusFlags};

use crate::account::AccountOps;
use crate::error::LedgerResult;
use crate::payment::apply_debtor_payment;

pub struct ChangeInterestRateRequest {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub ts: DateTime<Utc>,
    pub interest_rate: InterestRate,
    pub signalbus_max_delay_days: i64,
}

/// Rejects requests older than `SIGNALBUS_MAX_DELAY_DAYS`, clamps the
/// requested rate to `[FLOOR, CEIL]`, and applies it only if the rate has
/// gone unestablished or unchanged long enough to be worth disturbing.
/// Always emits an `AccountMaintenanceSignal`, whether or not the rate
/// moved; drops the event silently if the account does not exist or is
/// locked elsewhere, leaving it to be retried.
pub async fn change_interest_rate(
    ledger: &dyn Ledger,
    req: ChangeInterestRateRequest,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    if now - req.ts > Duration::days(req.signalbus_max_delay_days) {
        log::debug!(
            target: "ledger::interest",
            "dropping stale change_interest_rate for {}/{}",
            req.debtor_id, req.creditor_id
        );
        return Ok(());
    }

    let Some(mut account) = ledger.lock_account(req.debtor_id, req.creditor_id).await? else {
        log::debug!(
            target: "ledger::interest",
            "account {}/{} missing or locked elsewhere, dropping change_interest_rate",
            req.debtor_id, req.creditor_id
        );
        return Ok(());
    };

    let clamped_rate = clamp_interest_rate(req.interest_rate);
    let stale_threshold = Duration::days(req.signalbus_max_delay_days) + Duration::days(1);
    let rate_is_established = account.status_flags.contains(StatusFlags::ESTABLISHED_INTEREST_RATE);
    let changed_long_enough_ago = now - account.last_interest_rate_change_ts > stale_threshold;
    let rate_differs = (clamped_rate - account.interest_rate).abs() > f64::EPSILON;

    if !rate_is_established || (changed_long_enough_ago && rate_differs) {
        account.previous_interest_rate = account.interest_rate;
        account.interest_rate = clamped_rate;
        account.last_interest_rate_change_ts = now;
        account.status_flags.insert(StatusFlags::ESTABLISHED_INTEREST_RATE);
        account.apply_account_change(0, 0.0, now, outbox);
    }

    outbox.emit(Signal::AccountMaintenance(AccountMaintenanceSignal {
        debtor_id: req.debtor_id,
        creditor_id: req.creditor_id,
        ts: now,
    }));
    ledger.upsert_account(account).await?;
    Ok(())
}

/// Folds accrued, uncapitalized interest into `principal` once it grows
/// past `threshold`. Always emits an `AccountMaintenanceSignal`, regardless
/// of whether the threshold was actually crossed.
pub async fn capitalize_interest(
    ledger: &dyn Ledger,
    debtor_id: DebtorId,
    creditor_id: CreditorId,
    threshold: Amount,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let Some(mut account) = ledger.lock_account(debtor_id, creditor_id).await? else {
        log::debug!(target: "ledger::interest", "account {debtor_id}/{creditor_id} locked elsewhere, skipping capitalize_interest");
        return Ok(());
    };

    let accumulated = clamp_amount((account.current_balance(now) - account.principal as f64).floor());
    let min_threshold = threshold.unsigned_abs().max(1);

    if accumulated.unsigned_abs() >= min_threshold {
        apply_debtor_payment(ledger, &mut account, "interest", accumulated, "interest capitalization", now, outbox).await?;
    }

    outbox.emit(Signal::AccountMaintenance(AccountMaintenanceSignal { debtor_id, creditor_id, ts: now }));
    ledger.upsert_account(account).await?;
    Ok(())
}
