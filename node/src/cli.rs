//! Command line surface for the ledger service.

use std::path::PathBuf;

#[derive(Debug, clap::Parser)]
#[command(author, version, about = "Accounting core worker for a debtor/creditor ledger")]
pub struct Cli {
    /// Path to a TOML configuration file layered under CLI flags and
    /// environment variables.
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub subcommand: Option<Subcommand>,

    #[clap(flatten)]
    pub settings: SettingsArgs,
}

#[derive(Debug, clap::Subcommand)]
pub enum Subcommand {
    /// Run the worker loop (the default when no subcommand is given).
    Run,
    /// Run one maintenance scan pass and exit.
    Scan,
}

/// Overrides for `crate::settings::Settings`, each resolvable from an
/// environment variable of the same name so the binary is configurable
/// without a file in containerized deployments.
#[derive(Debug, clap::Args)]
pub struct SettingsArgs {
    #[arg(long, env = "LEDGER_DATABASE_URL")]
    pub database_url: Option<String>,

    #[arg(long, env = "LEDGER_BUS_URL")]
    pub bus_url: Option<String>,

    #[arg(long, env = "LEDGER_WORKER_POLL_INTERVAL_MS")]
    pub worker_poll_interval_ms: Option<u64>,

    #[arg(long, env = "LEDGER_SIGNALBUS_MAX_DELAY_DAYS")]
    pub signalbus_max_delay_days: Option<i64>,

    #[arg(long, env = "LEDGER_ACCOUNT_HEARTBEAT_DAYS")]
    pub account_heartbeat_days: Option<i64>,

    #[arg(long, env = "LEDGER_PENDING_TRANSFERS_MAX_DELAY_DAYS")]
    pub pending_transfers_max_delay_days: Option<i64>,

    #[arg(long, env = "LEDGER_COMMIT_PERIOD_SECONDS")]
    pub commit_period_seconds: Option<i64>,

    #[arg(long, env = "LEDGER_CAPITALIZATION_THRESHOLD")]
    pub capitalization_threshold: Option<i64>,
}
