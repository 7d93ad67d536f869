//! Reset command - discard a subscription's local content.

use std::path::Path;

use super::common::open_manager;
use crate::error::CliError;

/// Remove the content and progress of `name` and restore its bundled
/// content, if it has any.
pub async fn run(config: Option<&Path>, name: &str) -> Result<(), CliError> {
    let manager = open_manager(config)?;
    manager.reset_subscription_content(name).await?;

    let version = manager
        .subscription(name)
        .and_then(|sub| sub.version())
        .unwrap_or_else(|| "(none)".to_string());
    println!("Reset {}; content version is now {}", name, version);
    Ok(())
}
