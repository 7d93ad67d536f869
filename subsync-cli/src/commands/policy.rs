//! Policy command - show or change the download policy.

use std::path::Path;

use super::common::{open_manager, PolicyArg};
use crate::error::CliError;

/// Print the current policy, or persist a new one.
pub fn run(config: Option<&Path>, policy: Option<PolicyArg>) -> Result<(), CliError> {
    let manager = open_manager(config)?;

    match policy {
        Some(policy) => {
            manager.set_download_policy(policy.into())?;
            println!("Download policy set to {}", manager.settings().download_policy);
        }
        None => println!("{}", manager.settings().download_policy),
    }
    Ok(())
}
