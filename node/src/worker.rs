//! The worker loop: drains inbound bus messages into queue rows, then
//! discovers accounts with queued work and drains it through `ledger-core`,
//! then runs a maintenance scan.

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use ledger_bus::{DispatchConfig, InboundBus, OutboundBus};
use ledger_core::{Engine, MaintenanceConfig};
use ledger_signals::{Outbox, Signal};
use ledger_storage::Ledger;

use crate::settings::Settings;

pub struct Worker<'a> {
    ledger: &'a dyn Ledger,
    inbound: Option<&'a dyn InboundBus>,
    outbound: Option<&'a dyn OutboundBus>,
    settings: Settings,
    maintenance_config: MaintenanceConfig,
    dispatch_config: DispatchConfig,
}

impl<'a> Worker<'a> {
    pub fn new(ledger: &'a dyn Ledger, settings: Settings) -> Self {
        Worker::with_bus(ledger, None, None, settings)
    }

    /// A worker wired to a real inbound/outbound bus, so that `node` can
    /// actually close the loop §2 describes: bus-in -> inbound actor ->
    /// queue row -> batch worker -> account mutation + outbox rows -> bus-out.
    /// Both are optional since no concrete bus implementation ships with this
    /// crate (out of scope per §1); a worker with neither just drains
    /// whatever queue rows already exist and logs the outbox instead of
    /// publishing it.
    pub fn with_bus(
        ledger: &'a dyn Ledger,
        inbound: Option<&'a dyn InboundBus>,
        outbound: Option<&'a dyn OutboundBus>,
        settings: Settings,
    ) -> Self {
        let maintenance_config = settings.maintenance_config();
        let dispatch_config = settings.dispatch_config();
        Worker { ledger, inbound, outbound, settings, maintenance_config, dispatch_config }
    }

    /// Runs forever, polling every `worker_poll_interval_ms`. Each tick
    /// drains every sender with queued transfer or finalization requests,
    /// every account with queued pending changes, and then a maintenance
    /// scan pass.
    pub async fn run(&self) -> anyhow::Result<()> {
        let poll_interval = StdDuration::from_millis(self.settings.worker_poll_interval_ms);
        loop {
            self.tick().await?;
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn tick(&self) -> anyhow::Result<()> {
        let now = Utc::now();
        let commit_period = Duration::seconds(self.settings.commit_period_seconds);
        let engine = Engine::new(self.ledger);
        let mut outbox = Outbox::new();

        if let Some(inbound) = self.inbound {
            self.drain_inbound(inbound, &engine, now, &mut outbox).await?;
        }

        for (debtor_id, creditor_id) in self.ledger.distinct_transfer_request_senders().await? {
            engine.process_transfer_requests(debtor_id, creditor_id, now, commit_period, &mut outbox).await?;
        }
        for (debtor_id, creditor_id) in self.ledger.distinct_finalization_request_senders().await? {
            engine.process_finalization_requests(debtor_id, creditor_id, now, &mut outbox).await?;
        }
        for (debtor_id, creditor_id) in self.ledger.distinct_pending_change_accounts().await? {
            engine.process_pending_account_changes(debtor_id, creditor_id, now, &mut outbox).await?;
        }

        engine.scan_accounts(&self.maintenance_config, now, &mut outbox).await?;
        engine.scan_prepared_transfers(&self.maintenance_config, now, &mut outbox).await?;

        let signals = outbox.drain();
        if !signals.is_empty() {
            log::debug!(target: "ledger::worker", "tick produced {} signals", signals.len());
            self.publish(&signals).await;
        }
        Ok(())
    }

    /// Drains every message currently queued on `inbound`, dispatches each
    /// through the engine, and acks it so it is not redelivered. A message
    /// left un-acked after a crash is simply redelivered and reprocessed;
    /// every handler this calls into is itself idempotent or side-effect
    /// free on a stale/duplicate input (§7).
    async fn drain_inbound(
        &self,
        inbound: &dyn InboundBus,
        engine: &Engine<'_>,
        now: chrono::DateTime<Utc>,
        outbox: &mut Outbox,
    ) -> anyhow::Result<()> {
        while let Some(message) = inbound.receive().await? {
            ledger_bus::dispatch(engine, message.clone(), &self.dispatch_config, now, outbox).await?;
            inbound.ack(&message).await?;
        }
        Ok(())
    }

    /// Ships the outbox to `self.outbound` if a concrete bus was wired in;
    /// otherwise logs what would have been published so the binary stays
    /// runnable standalone (§1: the transport itself is out of scope).
    async fn publish(&self, signals: &[Signal]) {
        if let Some(outbound) = self.outbound {
            if let Err(e) = outbound.publish(signals).await {
                log::warn!(target: "ledger::worker", "failed to publish {} signal(s): {e}", signals.len());
            }
            return;
        }
        for signal in signals {
            if matches!(signal, Signal::RejectedTransfer(_) | Signal::RejectedConfig(_)) {
                log::warn!(target: "ledger::worker", "{signal:?}");
            } else {
                log::debug!(target: "ledger::worker", "{signal:?}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use ledger_core::{prepare_transfer, PrepareTransferRequest};
    use ledger_primitives::ROOT_CREDITOR_ID;
    use ledger_storage::memory::MemoryLedger;
    use ledger_storage::Account;

    use super::*;

    fn settings() -> Settings {
        Settings { database_url: "postgres://test".into(), ..Settings::default() }
    }

    #[tokio::test]
    async fn tick_drains_a_prepared_transfer_into_a_signal() {
        let ledger = MemoryLedger::new();
        let now = Utc::now();
        let mut root = Account::new(1, ROOT_CREDITOR_ID, now);
        root.principal = 1_000;
        ledger.upsert_account(root).await.unwrap();
        ledger.upsert_account(Account::new(1, 20, now)).await.unwrap();

        let mut outbox = Outbox::new();
        prepare_transfer(
            &ledger,
            PrepareTransferRequest {
                coordinator_type: "direct".into(),
                coordinator_id: 1,
                coordinator_request_id: 1,
                min_locked_amount: 0,
                max_locked_amount: 500,
                debtor_id: 1,
                sender_creditor_id: ROOT_CREDITOR_ID,
                recipient: (20i64 as u64).to_string(),
                ts: now,
                max_commit_delay_seconds: 3600,
                min_interest_rate: -100.0,
            },
            &mut outbox,
        )
        .await
        .unwrap();

        let worker = Worker::new(&ledger, settings());
        worker.tick().await.unwrap();

        let sender = ledger.get_account(1, ROOT_CREDITOR_ID).await.unwrap().unwrap();
        assert!(sender.total_locked_amount > 0, "prepared transfer should have locked an amount");
    }
}
