//! Runtime configuration: a TOML file layered under CLI flags and
//! environment variables, per SPEC_FULL §B. The engine itself has no
//! opinions about policy; this struct is the whole of what the binary
//! needs to become runnable.

use std::path::Path;

use serde::Deserialize;

use crate::cli::SettingsArgs;

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub database_url: String,
    #[serde(default)]
    pub bus_url: String,
    #[serde(default = "default_worker_poll_interval_ms")]
    pub worker_poll_interval_ms: u64,
    #[serde(default = "default_signalbus_max_delay_days")]
    pub signalbus_max_delay_days: i64,
    #[serde(default = "default_account_heartbeat_days")]
    pub account_heartbeat_days: i64,
    #[serde(default = "default_pending_transfers_max_delay_days")]
    pub pending_transfers_max_delay_days: i64,
    #[serde(default = "default_commit_period_seconds")]
    pub commit_period_seconds: i64,
    #[serde(default = "default_capitalization_threshold")]
    pub capitalization_threshold: ledger_primitives::Amount,
}

fn default_worker_poll_interval_ms() -> u64 {
    200
}

fn default_signalbus_max_delay_days() -> i64 {
    7
}

fn default_account_heartbeat_days() -> i64 {
    30
}

fn default_pending_transfers_max_delay_days() -> i64 {
    2
}

fn default_commit_period_seconds() -> i64 {
    1_800
}

/// Minimum accrued interest worth folding into principal on its own; below
/// this a `capitalize_interest` call is a no-op. Not part of the wire
/// message (§6) so the deployment supplies it here instead.
fn default_capitalization_threshold() -> ledger_primitives::Amount {
    100
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            database_url: String::new(),
            bus_url: String::new(),
            worker_poll_interval_ms: default_worker_poll_interval_ms(),
            signalbus_max_delay_days: default_signalbus_max_delay_days(),
            account_heartbeat_days: default_account_heartbeat_days(),
            pending_transfers_max_delay_days: default_pending_transfers_max_delay_days(),
            commit_period_seconds: default_commit_period_seconds(),
            capitalization_threshold: default_capitalization_threshold(),
        }
    }
}

impl Settings {
    /// Load the base configuration from `path` if given, then apply any
    /// CLI/environment overrides on top. Missing file path is not an error:
    /// the whole struct can be supplied via flags and env vars alone.
    pub fn load(path: Option<&Path>, overrides: &SettingsArgs) -> anyhow::Result<Settings> {
        let mut settings = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .map_err(|e| anyhow::anyhow!("reading config file {}: {e}", path.display()))?;
                toml::from_str(&text).map_err(|e| anyhow::anyhow!("parsing config file {}: {e}", path.display()))?
            }
            None => Settings::default(),
        };

        if let Some(v) = &overrides.database_url {
            settings.database_url = v.clone();
        }
        if let Some(v) = &overrides.bus_url {
            settings.bus_url = v.clone();
        }
        if let Some(v) = overrides.worker_poll_interval_ms {
            settings.worker_poll_interval_ms = v;
        }
        if let Some(v) = overrides.signalbus_max_delay_days {
            settings.signalbus_max_delay_days = v;
        }
        if let Some(v) = overrides.account_heartbeat_days {
            settings.account_heartbeat_days = v;
        }
        if let Some(v) = overrides.pending_transfers_max_delay_days {
            settings.pending_transfers_max_delay_days = v;
        }
        if let Some(v) = overrides.commit_period_seconds {
            settings.commit_period_seconds = v;
        }
        if let Some(v) = overrides.capitalization_threshold {
            settings.capitalization_threshold = v;
        }

        if settings.database_url.is_empty() {
            anyhow::bail!("database_url is required (config file, --database-url, or LEDGER_DATABASE_URL)");
        }

        Ok(settings)
    }

    pub fn maintenance_config(&self) -> ledger_core::MaintenanceConfig {
        ledger_core::MaintenanceConfig {
            signalbus_max_delay_days: self.signalbus_max_delay_days,
            account_heartbeat_days: self.account_heartbeat_days,
            pending_transfers_max_delay_days: self.pending_transfers_max_delay_days,
        }
    }

    pub fn dispatch_config(&self) -> ledger_bus::DispatchConfig {
        ledger_bus::DispatchConfig {
            signalbus_max_delay_days: self.signalbus_max_delay_days,
            capitalization_threshold: self.capitalization_threshold,
        }
    }
}
