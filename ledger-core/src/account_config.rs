//! `configure_account`: §4.3. Validates the `(ts, seqnum)` pair against the
//! account's last applied configuration using two-field ordering, then
//! updates visibility flags and the negligible-amount threshold.

use chrono::{DateTime, Duration, Utc};
use ledger_primitives::{leads_by_more_than_one_second, CreditorId, DebtorId, SeqNum};
use ledger_signals::{ConfigRejectionCode, RejectedConfigSignal, Signal, SignalWriter};
use ledger_storage::{Account, ConfigFlags, Ledger, StatusFlags};

use crate::account::AccountOps;
use crate::error::LedgerResult;

pub struct ConfigureAccountRequest {
    pub debtor_id: DebtorId,
    pub creditor_id: CreditorId,
    pub ts: DateTime<Utc>,
    pub seqnum: SeqNum,
    pub negligible_amount: f64,
    pub config_flags: ConfigFlags,
    pub config_data: String,
    pub signalbus_max_delay_days: i64,
}

/// `true` if `(candidate_ts, candidate_seqnum)` is newer than
/// `(reference_ts, reference_seqnum)` under the two-field ordering: the
/// later timestamp wins outright if it leads by more than one second,
/// otherwise ties are broken by signed-wrap sequence comparison.
fn is_newer(
    candidate_ts: DateTime<Utc>,
    candidate_seqnum: SeqNum,
    reference_ts: DateTime<Utc>,
    reference_seqnum: SeqNum,
) -> bool {
    if leads_by_more_than_one_second(candidate_ts, reference_ts) {
        return true;
    }
    if leads_by_more_than_one_second(reference_ts, candidate_ts) {
        return false;
    }
    candidate_seqnum.is_later_than(reference_seqnum)
}

pub async fn configure_account(
    ledger: &dyn Ledger,
    req: ConfigureAccountRequest,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let existing = ledger.lock_account(req.debtor_id, req.creditor_id).await?;

    let mut account = match existing {
        Some(account) => account,
        None => {
            let within_window = now - req.ts <= Duration::days(req.signalbus_max_delay_days);
            if !within_window {
                log::debug!(
                    target: "ledger::configure",
                    "dropping stale configure_account for unknown account {}/{}",
                    req.debtor_id, req.creditor_id
                );
                return Ok(());
            }
            Account::new(req.debtor_id, req.creditor_id, now)
        }
    };

    if !is_newer(req.ts, req.seqnum, account.last_config_ts, account.last_config_seqnum) {
        log::debug!(
            target: "ledger::configure",
            "dropping stale configure_account for {}/{}: ({}, {}) is not newer than ({}, {})",
            req.debtor_id, req.creditor_id, req.ts, req.seqnum, account.last_config_ts, account.last_config_seqnum
        );
        ledger.upsert_account(account).await?;
        return Ok(());
    }

    if req.negligible_amount < 0.0 || !req.config_data.is_empty() {
        outbox.emit(Signal::RejectedConfig(RejectedConfigSignal {
            debtor_id: req.debtor_id,
            creditor_id: req.creditor_id,
            ts: req.ts,
            seqnum: req.seqnum,
            rejection_code: ConfigRejectionCode::InvalidConfiguration,
        }));
        ledger.upsert_account(account).await?;
        return Ok(());
    }

    if account.status_flags.contains(StatusFlags::DELETED) {
        account.status_flags.remove(StatusFlags::DELETED);
        account.status_flags.remove(StatusFlags::ESTABLISHED_INTEREST_RATE);
    }

    if req.config_flags.contains(ConfigFlags::SCHEDULED_FOR_DELETION) {
        account.status_flags.insert(StatusFlags::UNREACHABLE);
    } else {
        account.status_flags.remove(StatusFlags::UNREACHABLE);
    }

    account.config_flags = req.config_flags;
    account.negligible_amount = req.negligible_amount;
    account.last_config_ts = req.ts;
    account.last_config_seqnum = req.seqnum;

    account.apply_account_change(0, 0.0, now, outbox);
    ledger.upsert_account(account).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_signals::Outbox;
    use ledger_storage::memory::MemoryLedger;

    fn req(now: DateTime<Utc>, seqnum: i32) -> ConfigureAccountRequest {
        ConfigureAccountRequest {
            debtor_id: 1,
            creditor_id: 10,
            ts: now,
            seqnum: SeqNum::new(seqnum),
            negligible_amount: 0.0,
            config_flags: ConfigFlags::empty(),
            config_data: String::new(),
            signalbus_max_delay_days: 14,
        }
    }

    #[tokio::test]
    async fn stale_event_is_dropped() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut outbox = Outbox::new();

        let first = req(now, 5);
        configure_account(&ledger, first, now, &mut outbox).await.unwrap();
        assert_eq!(outbox.len(), 1);

        let mut stale = req(now - Duration::seconds(2), 9999);
        stale.config_flags = ConfigFlags::SCHEDULED_FOR_DELETION;
        configure_account(&ledger, stale, now, &mut outbox).await.unwrap();
        assert_eq!(outbox.len(), 1, "second, older event must not apply");

        let account = ledger.get_account(1, 10).await.unwrap().unwrap();
        assert!(!account.config_flags.contains(ConfigFlags::SCHEDULED_FOR_DELETION));
    }

    #[tokio::test]
    async fn invalid_configuration_is_rejected() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut outbox = Outbox::new();
        let mut bad = req(now, 1);
        bad.negligible_amount = -1.0;
        configure_account(&ledger, bad, now, &mut outbox).await.unwrap();
        assert_eq!(outbox.len(), 1);
        match &outbox.as_slice()[0] {
            Signal::RejectedConfig(s) => assert_eq!(s.rejection_code, ConfigRejectionCode::InvalidConfiguration),
            other => panic!("expected RejectedConfig, got {other:?}"),
        }
    }
}
