//! Status command - show the persisted state of every subscription.

use std::path::Path;

use subsync::SubscriptionStatus;

use super::common::open_manager;
use crate::error::CliError;

/// Run the status command.
pub fn run(config: Option<&Path>) -> Result<(), CliError> {
    let manager = open_manager(config)?;

    println!("Subscriptions");
    println!("=============");
    println!();
    println!("  url:       {}", manager.subscription_url().unwrap_or("(not set)"));
    println!("  content:   {}", manager.content_dir().display());
    println!("  downloads: {}", manager.download_dir().display());
    println!("  policy:    {}", manager.settings().download_policy);
    println!();

    let statuses = manager.status();
    if statuses.is_empty() {
        println!("No subscriptions configured.");
        return Ok(());
    }
    for status in &statuses {
        println!("{}", describe(status));
    }
    Ok(())
}

/// One-line summary of a subscription.
fn describe(status: &SubscriptionStatus) -> String {
    let mut line = format!(
        "[{}] version {}",
        status.name,
        status.version.as_deref().unwrap_or("(none)")
    );
    if !status.initialized {
        line.push_str(", not initialized");
    }
    if let Some(stage) = status.unpack_status {
        line.push_str(&format!(", unpack interrupted at {}", stage));
    }
    if status.download_in_progress {
        line.push_str(", partial download");
    }
    if status.locked {
        line.push_str(", locked");
    }
    line
}
