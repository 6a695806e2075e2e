//! The account engine: the interest-accrual function and the single
//! `apply_account_change` entry point all other mutation paths funnel
//! through.

use chrono::{DateTime, Utc};
use ledger_primitives::{clamp_amount, saturate_principal, Amount, InterestRate, SECONDS_IN_YEAR};
use ledger_signals::{AccountUpdateSignal, Signal, SignalWriter};
use ledger_storage::{Account, StatusFlags};

/// Behaviour layered onto the plain-data `Account` row. Defined here
/// (rather than on `ledger_storage::Account` itself) so the storage crate
/// stays free of accrual policy while callers still get method-call syntax.
pub trait AccountOps {
    /// The account's instantaneous balance at `now`: principal and
    /// uncapitalized interest compounded continuously since
    /// `last_change_ts`, but only while the running balance stays
    /// positive — balances at or below zero never accrue further debt
    /// from the exponential term.
    fn current_balance(&self, now: DateTime<Utc>) -> f64;

    /// `floor(current_balance(now)) - total_locked_amount`, clamped to the
    /// representable amount range.
    fn available_amount(&self, now: DateTime<Utc>) -> Amount;

    /// Interest that a `principal_delta` queued at `inserted_at_ts` would
    /// have accrued by `now`, had it been applied to the account
    /// immediately instead of sitting in the pending-change queue.
    fn calc_due_interest(&self, principal_delta: Amount, inserted_at_ts: DateTime<Utc>, now: DateTime<Utc>) -> f64;

    /// `false` once the account has been marked `DELETED`.
    fn is_visible(&self) -> bool;

    /// `true` when this account accepts incoming transfers: visible and
    /// not explicitly marked `UNREACHABLE`.
    fn is_reachable(&self) -> bool;

    /// The sole entry point for mutating `principal`/`interest`. Refolds
    /// accrued interest into `interest` at `now`, adds `interest_delta`,
    /// adds `principal_delta` to `principal` with saturation at
    /// `±MAX_INT64` (setting `OVERFLOWN` on saturation), then emits an
    /// `AccountUpdate`. This is the only place `last_change_seqnum`
    /// advances.
    fn apply_account_change(
        &mut self,
        principal_delta: Amount,
        interest_delta: f64,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    );

    fn to_account_update_signal(&self) -> AccountUpdateSignal;
}

fn continuous_growth_factor(interest_rate: InterestRate, delta_seconds: f64) -> f64 {
    let k = (1.0 + interest_rate / 100.0).ln() / SECONDS_IN_YEAR;
    (k * delta_seconds).exp()
}

impl AccountOps for Account {
    fn current_balance(&self, now: DateTime<Utc>) -> f64 {
        let balance = self.principal as f64 + self.interest;
        if balance > 0.0 {
            let delta_seconds = (now - self.last_change_ts).num_seconds().max(0) as f64;
            balance * continuous_growth_factor(self.interest_rate, delta_seconds)
        } else {
            balance
        }
    }

    fn available_amount(&self, now: DateTime<Utc>) -> Amount {
        let floored = self.current_balance(now).floor();
        clamp_amount(floored) - self.total_locked_amount
    }

    fn calc_due_interest(&self, principal_delta: Amount, inserted_at_ts: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
        if principal_delta <= 0 {
            return 0.0;
        }
        let delta_seconds = (now - inserted_at_ts).num_seconds().max(0) as f64;
        let factor = continuous_growth_factor(self.interest_rate, delta_seconds);
        principal_delta as f64 * (factor - 1.0)
    }

    fn is_visible(&self) -> bool {
        !self.status_flags.contains(StatusFlags::DELETED)
    }

    fn is_reachable(&self) -> bool {
        self.is_visible() && !self.status_flags.contains(StatusFlags::UNREACHABLE)
    }

    fn apply_account_change(
        &mut self,
        principal_delta: Amount,
        interest_delta: f64,
        now: DateTime<Utc>,
        outbox: &mut dyn SignalWriter,
    ) {
        let refolded_balance = self.current_balance(now);
        self.interest = refolded_balance - self.principal as f64 + interest_delta;

        let (new_principal, overflowed) = saturate_principal(self.principal, principal_delta as i128);
        self.principal = new_principal;
        if overflowed {
            self.status_flags.insert(StatusFlags::OVERFLOWN);
        }

        if now > self.last_change_ts {
            self.last_change_ts = now;
        }
        self.last_change_seqnum = self.last_change_seqnum.wrapping_add(1);

        log::debug!(
            target: "ledger::account",
            "apply_account_change debtor={} creditor={} principal_delta={} interest_delta={:.4} -> principal={} seqnum={}",
            self.debtor_id, self.creditor_id, principal_delta, interest_delta, self.principal, self.last_change_seqnum
        );

        outbox.emit(Signal::AccountUpdate(self.to_account_update_signal()));
    }

    fn to_account_update_signal(&self) -> AccountUpdateSignal {
        AccountUpdateSignal {
            debtor_id: self.debtor_id,
            creditor_id: self.creditor_id,
            change_ts: self.last_change_ts,
            change_seqnum: self.last_change_seqnum,
            principal: self.principal,
            interest: self.interest,
            interest_rate: self.interest_rate,
            last_transfer_number: self.last_transfer_number,
            last_config_ts: self.last_config_ts,
            last_config_seqnum: self.last_config_seqnum,
            creation_date: self.creation_date,
            negligible_amount: self.negligible_amount,
            config_flags: self.config_flags.bits(),
            status_flags: self.status_flags.bits(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_signals::Outbox;

    fn fresh_account(now: DateTime<Utc>) -> Account {
        Account::new(1, 10, now)
    }

    #[test]
    fn balance_does_not_grow_when_nonpositive() {
        let now = Utc::now();
        let mut a = fresh_account(now);
        a.principal = -100;
        a.interest_rate = 50.0;
        let later = now + chrono::Duration::days(365);
        assert_eq!(a.current_balance(later), -100.0);
    }

    #[test]
    fn balance_compounds_continuously_when_positive() {
        let now = Utc::now();
        let mut a = fresh_account(now);
        a.principal = 10_000;
        a.interest_rate = 100.0;
        let later = now + chrono::Duration::seconds((SECONDS_IN_YEAR) as i64);
        let balance = a.current_balance(later);
        // k = ln(2)/SECONDS_IN_YEAR, so after one year growth factor is e^{ln(2)} == 2
        assert!((balance - 20_000.0).abs() < 1.0);
    }

    #[test]
    fn apply_account_change_saturates_and_emits_update() {
        let now = Utc::now();
        let mut a = fresh_account(now);
        a.principal = ledger_primitives::MAX_INT64 - 5;
        let mut outbox = Outbox::new();
        a.apply_account_change(10, 0.0, now, &mut outbox);
        assert_eq!(a.principal, ledger_primitives::MAX_INT64);
        assert!(a.status_flags.contains(StatusFlags::OVERFLOWN));
        assert_eq!(outbox.len(), 1);
    }
}
