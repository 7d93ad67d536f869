//! Common types and utilities shared across CLI commands.

use std::path::{Path, PathBuf};

use clap::ValueEnum;
use subsync::{ConfigFile, DownloadPolicy, RefreshOutcome, SubscriptionManager, SyncConfig};

use crate::error::CliError;

/// Name of the configuration file inside the config directory.
pub const CONFIG_FILE_NAME: &str = "config.ini";

/// Download policy selection for CLI arguments.
#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum PolicyArg {
    /// Download on any connected network
    Always,
    /// Download only on Wi-Fi, WiMAX or Ethernet
    WifiOnly,
    /// Never download
    Never,
}

impl From<PolicyArg> for DownloadPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::Always => DownloadPolicy::Always,
            PolicyArg::WifiOnly => DownloadPolicy::WifiOnly,
            PolicyArg::Never => DownloadPolicy::Never,
        }
    }
}

/// Default configuration file location: `<config dir>/subsync/config.ini`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("subsync")
        .join(CONFIG_FILE_NAME)
}

/// Load the configuration from `path`, or from the default location.
pub fn load_config(path: Option<&Path>) -> Result<SyncConfig, CliError> {
    let path = path
        .map(Path::to_path_buf)
        .unwrap_or_else(default_config_path);
    if !path.exists() {
        return Err(CliError::ConfigNotFound(path));
    }
    Ok(ConfigFile::load(&path)?)
}

/// Load the configuration and build a manager from it.
pub fn open_manager(path: Option<&Path>) -> Result<SubscriptionManager, CliError> {
    let config = load_config(path)?;
    Ok(SubscriptionManager::new(config)?)
}

/// Print one `name: outcome` line per subscription.
///
/// Returns an error if any outcome was a failure.
pub fn report_outcomes(outcomes: &[(String, RefreshOutcome)]) -> Result<(), CliError> {
    let width = outcomes.iter().map(|(name, _)| name.len()).max().unwrap_or(0);
    for (name, outcome) in outcomes {
        println!("  {:width$}  {}", name, outcome, width = width);
    }

    let failed = outcomes
        .iter()
        .filter(|(_, outcome)| matches!(outcome, RefreshOutcome::Failed(_)))
        .count();
    if failed > 0 {
        return Err(CliError::Incomplete {
            failed,
            total: outcomes.len(),
        });
    }
    Ok(())
}
