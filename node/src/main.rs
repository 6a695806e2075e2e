//! Ledger accounting service binary.

mod cli;
mod settings;
mod worker;

use chrono::Utc;
use clap::Parser;
use cli::{Cli, Subcommand};
use ledger_core::{Engine, MaintenanceConfig};
use ledger_signals::Outbox;
use ledger_storage::postgres::PgLedger;
use settings::Settings;
use sqlx::postgres::PgPoolOptions;
use worker::Worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref(), &cli.settings)?;

    log::info!(target: "ledger::node", "connecting to {}", redact(&settings.database_url));
    let pool = PgPoolOptions::new().max_connections(10).connect(&settings.database_url).await?;
    let ledger = PgLedger::new(pool);

    match cli.subcommand.unwrap_or(Subcommand::Run) {
        Subcommand::Run => {
            log::info!(target: "ledger::node", "starting worker loop, poll interval {}ms", settings.worker_poll_interval_ms);
            let worker = Worker::new(&ledger, settings);
            worker.run().await
        }
        Subcommand::Scan => {
            log::info!(target: "ledger::node", "running one maintenance scan pass");
            let config: MaintenanceConfig = settings.maintenance_config();
            let engine = Engine::new(&ledger);
            let now = Utc::now();
            let mut outbox = Outbox::new();
            engine.scan_accounts(&config, now, &mut outbox).await?;
            engine.scan_prepared_transfers(&config, now, &mut outbox).await?;
            log::info!(target: "ledger::node", "scan produced {} signals", outbox.len());
            Ok(())
        }
    }
}

/// Strips credentials from a Postgres connection string before logging it.
fn redact(database_url: &str) -> String {
    match database_url.split_once('@') {
        Some((_, host_and_rest)) => format!("postgres://***@{host_and_rest}"),
        None => database_url.to_string(),
    }
}
