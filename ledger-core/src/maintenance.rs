//! The maintenance scanner, §4.10: periodic sweeps over the account table
//! and the prepared-transfer table that re-emit heartbeats, purge
//! long-deleted rows, and nudge stuck prepared transfers. Cadence formulas
//! follow the original scanner job unchanged: `account_heartbeat_interval =
//! max(signalbus_max_delay, account_heartbeat_days)` and `critical_delay =
//! 2*signalbus_max_delay + pending_transfers_max_delay`.

use chrono::{DateTime, Duration, Utc};
use ledger_signals::{AccountPurgeSignal, CoordinatorTriple, PreparedTransferSignal, Signal, SignalWriter};
use ledger_storage::{Ledger, StatusFlags};

use crate::account::AccountOps;
use crate::error::LedgerResult;

/// The cadence parameters a maintenance pass is configured with. Computed
/// from `node`'s settings and passed down rather than read from any
/// ambient clock or config singleton.
pub struct MaintenanceConfig {
    pub signalbus_max_delay_days: i64,
    pub account_heartbeat_days: i64,
    pub pending_transfers_max_delay_days: i64,
}

impl MaintenanceConfig {
    fn signalbus_max_delay(&self) -> Duration {
        Duration::days(self.signalbus_max_delay_days)
    }

    fn account_heartbeat_interval(&self) -> Duration {
        self.signalbus_max_delay().max(Duration::days(self.account_heartbeat_days))
    }

    fn critical_delay(&self) -> Duration {
        self.signalbus_max_delay() * 2 + Duration::days(self.pending_transfers_max_delay_days)
    }
}

/// Guards against purging a `DELETED` row so soon after creation that a
/// reused `(debtor_id, creditor_id)` pair could be mistaken for the account
/// that was just deleted.
const CREATION_DATE_GUARD: Duration = Duration::days(2);

/// One pass over every account row: purges rows that have been `DELETED`
/// long enough that nothing could still be referencing them, and re-sends
/// a verbatim `AccountUpdate` heartbeat for rows that have gone quiet.
pub async fn scan_accounts(
    ledger: &dyn Ledger,
    config: &MaintenanceConfig,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let heartbeat_interval = config.account_heartbeat_interval();
    let critical_delay = config.critical_delay();

    for mut account in ledger.scan_accounts().await? {
        if account.status_flags.contains(StatusFlags::DELETED) {
            let old_enough_to_purge = now - account.creation_date > CREATION_DATE_GUARD && account.last_change_ts < now - critical_delay;
            if old_enough_to_purge {
                ledger.delete_account(account.debtor_id, account.creditor_id).await?;
                outbox.emit(Signal::AccountPurge(AccountPurgeSignal {
                    debtor_id: account.debtor_id,
                    creditor_id: account.creditor_id,
                    creation_date: account.creation_date,
                }));
                log::debug!(target: "ledger::maintenance", "purged {}/{}", account.debtor_id, account.creditor_id);
            }
            continue;
        }

        let last_seen = account.last_reminder_ts.unwrap_or(account.last_change_ts).max(account.last_change_ts);
        if last_seen < now - heartbeat_interval {
            outbox.emit(Signal::AccountUpdate(account.to_account_update_signal()));
            account.last_reminder_ts = Some(now);
            ledger.upsert_account(account).await?;
        }
    }
    Ok(())
}

/// One pass over every `PreparedTransfer` row: re-sends `PreparedTransfer`
/// for reservations that have sat unfinalized past `critical_delay` with no
/// recent reminder, nudging whichever coordinator owns the second phase.
pub async fn scan_prepared_transfers(
    ledger: &dyn Ledger,
    config: &MaintenanceConfig,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    let critical_delay = config.critical_delay();

    for mut pt in ledger.scan_prepared_transfers().await? {
        if pt.prepared_at_ts >= now - critical_delay {
            continue;
        }
        let recently_reminded = pt.last_reminder_ts.map(|ts| ts >= now - critical_delay).unwrap_or(false);
        if recently_reminded {
            continue;
        }

        outbox.emit(Signal::PreparedTransfer(PreparedTransferSignal {
            debtor_id: pt.debtor_id,
            sender_creditor_id: pt.sender_creditor_id,
            transfer_id: pt.transfer_id,
            coordinator: CoordinatorTriple {
                coordinator_type: pt.coordinator.coordinator_type.clone(),
                coordinator_id: pt.coordinator.coordinator_id,
                coordinator_request_id: pt.coordinator.coordinator_request_id,
            },
            sender_locked_amount: pt.locked_amount,
            recipient_creditor_id: pt.recipient_creditor_id,
            prepared_at_ts: pt.prepared_at_ts,
            deadline: pt.deadline,
        }));
        pt.last_reminder_ts = Some(now);
        ledger.upsert_prepared_transfer(pt).await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ledger_primitives::ROOT_CREDITOR_ID;
    use ledger_signals::Outbox;
    use ledger_storage::memory::MemoryLedger;
    use ledger_storage::{Account, CoordinatorKey, PreparedTransfer};

    fn config() -> MaintenanceConfig {
        MaintenanceConfig { signalbus_max_delay_days: 1, account_heartbeat_days: 30, pending_transfers_max_delay_days: 1 }
    }

    #[tokio::test]
    async fn stale_deleted_account_is_purged() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let creation = now - Duration::days(30);
        let mut account = Account::new(1, 60, creation);
        account.status_flags.insert(StatusFlags::DELETED);
        account.last_change_ts = creation;
        ledger.upsert_account(account).await.unwrap();

        let mut outbox = Outbox::new();
        scan_accounts(&ledger, &config(), now, &mut outbox).await.unwrap();

        assert!(ledger.get_account(1, 60).await.unwrap().is_none());
        assert!(outbox.as_slice().iter().any(|s| matches!(s, Signal::AccountPurge(_))));
    }

    #[tokio::test]
    async fn fresh_deleted_account_survives_guard_window() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut account = Account::new(1, 61, now);
        account.status_flags.insert(StatusFlags::DELETED);
        ledger.upsert_account(account).await.unwrap();

        let mut outbox = Outbox::new();
        scan_accounts(&ledger, &config(), now, &mut outbox).await.unwrap();

        assert!(ledger.get_account(1, 61).await.unwrap().is_some());
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn quiet_account_gets_a_heartbeat() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let stale = now - Duration::days(60);
        let account = Account::new(1, ROOT_CREDITOR_ID, stale);
        ledger.upsert_account(account).await.unwrap();

        let mut outbox = Outbox::new();
        scan_accounts(&ledger, &config(), now, &mut outbox).await.unwrap();

        assert!(outbox.as_slice().iter().any(|s| matches!(s, Signal::AccountUpdate(_))));
        let account = ledger.get_account(1, ROOT_CREDITOR_ID).await.unwrap().unwrap();
        assert_eq!(account.last_reminder_ts, Some(now));
    }

    #[tokio::test]
    async fn stuck_prepared_transfer_is_nudged_once() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let prepared_at = now - Duration::days(10);
        ledger
            .insert_prepared_transfer(PreparedTransfer {
                debtor_id: 1,
                sender_creditor_id: 70,
                transfer_id: 1,
                coordinator: CoordinatorKey { coordinator_type: "direct".into(), coordinator_id: 1, coordinator_request_id: 1 },
                recipient_creditor_id: 71,
                locked_amount: 10,
                min_account_balance: 0,
                min_interest_rate: -100.0,
                demurrage_rate: 0.0,
                deadline: prepared_at + Duration::days(30),
                prepared_at_ts: prepared_at,
                last_reminder_ts: None,
            })
            .await
            .unwrap();

        let mut outbox = Outbox::new();
        scan_prepared_transfers(&ledger, &config(), now, &mut outbox).await.unwrap();
        assert_eq!(outbox.len(), 1);

        let mut outbox2 = Outbox::new();
        scan_prepared_transfers(&ledger, &config(), now, &mut outbox2).await.unwrap();
        assert!(outbox2.is_empty(), "must not re-send within the same critical_delay window");
    }
}
