//! Init command - materialize every subscription's content.

use std::path::Path;

use subsync::RefreshOutcome;

use super::common::{open_manager, report_outcomes};
use crate::error::CliError;

/// Run the init command.
///
/// Resumes interrupted unpacks, unpacks bundled content and downloads
/// anything still missing.
pub async fn run(config: Option<&Path>) -> Result<(), CliError> {
    let manager = open_manager(config)?;
    println!("Content directory: {}", manager.content_dir().display());
    println!();

    let results = manager.initialize_all().await;

    let mut outcomes = Vec::with_capacity(results.len());
    let mut errors = 0;
    for (name, result) in results {
        match result {
            Ok(Some(outcome)) => outcomes.push((name, outcome)),
            Ok(None) => outcomes.push((name, RefreshOutcome::UpToDate)),
            Err(e) => {
                eprintln!("  {}: {}", name, e);
                errors += 1;
            }
        }
    }

    let total = outcomes.len() + errors;
    match report_outcomes(&outcomes) {
        Err(CliError::Incomplete { failed, .. }) => Err(CliError::Incomplete {
            failed: failed + errors,
            total,
        }),
        Ok(()) if errors > 0 => Err(CliError::Incomplete {
            failed: errors,
            total,
        }),
        other => other,
    }
}
