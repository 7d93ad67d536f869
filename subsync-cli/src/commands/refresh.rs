//! Refresh command - check for and apply updates.

use std::path::Path;

use super::common::{open_manager, report_outcomes};
use crate::error::CliError;

/// Run the refresh command for one subscription, or all of them in order.
pub async fn run(config: Option<&Path>, name: Option<&str>) -> Result<(), CliError> {
    let manager = open_manager(config)?;

    let outcomes = match name {
        Some(name) => {
            let outcome = manager.refresh_subscription(name).await?;
            vec![(name.to_string(), outcome)]
        }
        None => manager.refresh_all().await,
    };

    println!("Refresh results:");
    report_outcomes(&outcomes)
}
