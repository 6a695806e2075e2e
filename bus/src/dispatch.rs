//! Turns a decoded `InboundMessage` into the matching `ledger-core` call —
//! the "thin validator" role of §2 component 8. Wire-level validation
//! failures (malformed coordinator_type, oversized note/config, a
//! non-finite rate) are a broken caller contract: per §7 they are logged
//! and the message is dropped rather than surfaced as a domain signal,
//! since the message never reached a well-formed enough state to attach a
//! rejection to.

use chrono::{DateTime, Utc};
use ledger_core::{Engine, LedgerResult};
use ledger_primitives::Amount;
use ledger_signals::SignalWriter;

use crate::inbound::InboundMessage;

/// The handful of cross-cutting values a dispatch pass needs that don't
/// travel on the wire: the staleness window shared by configure-account and
/// interest-rate-change, and the capitalization threshold the (out-of-scope)
/// policy layer would otherwise supply per call. `node` derives both from
/// `Settings`.
pub struct DispatchConfig {
    pub signalbus_max_delay_days: i64,
    pub capitalization_threshold: Amount,
}

/// Validates and applies one inbound message against `engine`. Returns
/// `Ok(())` both when the call went through and when it was dropped for a
/// reason §7 already accounts for (staleness, idempotent duplicate,
/// malformed wire shape); only a storage-layer failure propagates as `Err`.
pub async fn dispatch(
    engine: &Engine<'_>,
    message: InboundMessage,
    config: &DispatchConfig,
    now: DateTime<Utc>,
    outbox: &mut dyn SignalWriter,
) -> LedgerResult<()> {
    match message {
        InboundMessage::ConfigureAccount(msg) => match msg.into_request(config.signalbus_max_delay_days) {
            Ok(req) => engine.configure_account(req, now, outbox).await,
            Err(e) => {
                log::warn!(target: "ledger::bus", "dropping malformed configure_account: {e}");
                Ok(())
            }
        },
        InboundMessage::PrepareTransfer(msg) => match msg.into_request() {
            Ok(req) => engine.prepare_transfer(req, outbox).await,
            Err(e) => {
                log::warn!(target: "ledger::bus", "dropping malformed prepare_transfer: {e}");
                Ok(())
            }
        },
        InboundMessage::FinalizeTransfer(msg) => match msg.into_request() {
            Ok(req) => engine.finalize_transfer(req).await,
            Err(e) => {
                log::warn!(target: "ledger::bus", "dropping malformed finalize_transfer: {e}");
                Ok(())
            }
        },
        InboundMessage::ChangeInterestRate(msg) => match msg.into_request(config.signalbus_max_delay_days) {
            Ok(req) => engine.change_interest_rate(req, now, outbox).await,
            Err(e) => {
                log::warn!(target: "ledger::bus", "dropping malformed change_interest_rate: {e}");
                Ok(())
            }
        },
        InboundMessage::CapitalizeInterest(msg) => {
            engine.capitalize_interest(msg.debtor_id, msg.creditor_id, config.capitalization_threshold, now, outbox).await
        }
        InboundMessage::TryToDeleteAccount(msg) => {
            engine.try_to_delete_account(msg.debtor_id, msg.creditor_id, now, outbox).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inbound::PrepareTransferMessage;
    use ledger_primitives::ROOT_CREDITOR_ID;
    use ledger_signals::{Outbox, Signal};
    use ledger_storage::memory::MemoryLedger;
    use ledger_storage::Account;

    fn config() -> DispatchConfig {
        DispatchConfig { signalbus_max_delay_days: 7, capitalization_threshold: 0 }
    }

    #[tokio::test]
    async fn malformed_message_is_dropped_without_a_signal() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        ledger.upsert_account(Account::new(1, ROOT_CREDITOR_ID, now)).await.unwrap();
        let engine = Engine::new(&ledger);
        let mut outbox = Outbox::new();

        let msg = InboundMessage::PrepareTransfer(PrepareTransferMessage {
            coordinator_type: "BadType".into(),
            coordinator_id: 1,
            coordinator_request_id: 1,
            min_locked_amount: 0,
            max_locked_amount: 10,
            debtor_id: 1,
            creditor_id: ROOT_CREDITOR_ID,
            recipient: "20".into(),
            ts: now,
            max_commit_delay: 3600,
            min_interest_rate: -100.0,
        });

        dispatch(&engine, msg, &config(), now, &mut outbox).await.unwrap();
        assert!(outbox.is_empty());
    }

    #[tokio::test]
    async fn well_formed_prepare_transfer_enqueues_through_the_engine() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut root = Account::new(1, ROOT_CREDITOR_ID, now);
        root.principal = 1_000;
        ledger.upsert_account(root).await.unwrap();
        ledger.upsert_account(Account::new(1, 20, now)).await.unwrap();
        let engine = Engine::new(&ledger);
        let mut outbox = Outbox::new();

        let msg = InboundMessage::PrepareTransfer(PrepareTransferMessage {
            coordinator_type: "direct".into(),
            coordinator_id: 1,
            coordinator_request_id: 1,
            min_locked_amount: 0,
            max_locked_amount: 10,
            debtor_id: 1,
            creditor_id: ROOT_CREDITOR_ID,
            recipient: "20".into(),
            ts: now,
            max_commit_delay: 3600,
            min_interest_rate: -100.0,
        });

        dispatch(&engine, msg, &config(), now, &mut outbox).await.unwrap();
        assert!(outbox.is_empty(), "prepare_transfer only enqueues a TransferRequest row, no signal yet");

        engine.process_transfer_requests(1, ROOT_CREDITOR_ID, now, chrono::Duration::seconds(3600), &mut outbox).await.unwrap();
        assert!(outbox.as_slice().iter().any(|s| matches!(s, Signal::PreparedTransfer(_))));
    }
}
