//! CLI error type.

use std::path::PathBuf;

use thiserror::Error;

use subsync::SyncError;

/// Errors reported to the user by the `subsync` binary.
#[derive(Debug, Error)]
pub enum CliError {
    /// No configuration file was given and none exists at the default path.
    #[error("configuration file not found: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// Configuration could not be loaded or is invalid.
    #[error("configuration error: {0}")]
    Config(String),

    /// A named subscription is not configured.
    #[error("unknown subscription '{0}'")]
    UnknownSubscription(String),

    /// Some subscriptions did not reach a successful outcome.
    #[error("{failed} of {total} subscriptions failed")]
    Incomplete { failed: usize, total: usize },

    /// The async runtime could not be started.
    #[error("failed to start runtime: {0}")]
    Runtime(#[from] std::io::Error),

    #[error(transparent)]
    Sync(SyncError),
}

impl From<SyncError> for CliError {
    fn from(e: SyncError) -> Self {
        match e {
            SyncError::InvalidConfig(reason) => CliError::Config(reason),
            SyncError::UnknownSubscription(name) => CliError::UnknownSubscription(name),
            other => CliError::Sync(other),
        }
    }
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::ConfigNotFound(_) | CliError::Config(_) => 2,
            CliError::UnknownSubscription(_) => 2,
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_errors_map_to_cli_errors() {
        let err: CliError = SyncError::InvalidConfig("missing url".to_string()).into();
        assert!(matches!(err, CliError::Config(_)));
        assert_eq!(err.exit_code(), 2);

        let err: CliError = SyncError::UnknownSubscription("weather".to_string()).into();
        assert_eq!(err.to_string(), "unknown subscription 'weather'");

        let err: CliError = SyncError::NoSubscriptionUrl.into();
        assert!(matches!(err, CliError::Sync(_)));
        assert_eq!(err.exit_code(), 1);
    }
}
