//! Error types for the subscription sync engine.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur while checking, downloading or unpacking content.
///
/// Variants fall into four groups: transient network failures, integrity
/// failures detected while unpacking, filesystem failures, and everything
/// else (configuration, state store, locking).
#[derive(Debug, Error)]
pub enum SyncError {
    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },

    /// Failed to delete a file.
    #[error("unable to delete {}: {source}", path.display())]
    DeleteFailed { path: PathBuf, source: io::Error },

    /// Failed to move a file into place.
    #[error("failed to move {} to {}: {source}", from.display(), to.display())]
    RenameFailed {
        from: PathBuf,
        to: PathBuf,
        source: io::Error,
    },

    /// Archive extraction failed.
    #[error("failed to extract {}: {reason}", path.display())]
    ExtractionFailed { path: PathBuf, reason: String },

    /// No update-check URL is configured.
    #[error("no subscription URL configured")]
    NoSubscriptionUrl,

    /// A URL could not be used for a request.
    #[error("invalid URL {url}: {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The update-check request failed.
    #[error("update check against {url} failed: {reason}")]
    UpdateCheckFailed { url: String, reason: String },

    /// Failed to download content.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Network timeout.
    #[error("request to {url} timed out after {timeout_secs}s")]
    Timeout { url: String, timeout_secs: u64 },

    /// A file's hash did not match the expected value.
    #[error("hash mismatch for {}: expected {expected}, got {actual}", path.display())]
    HashMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// The package manifest names a different subscription.
    #[error("name in manifest doesn't match subscription {expected}: {found}")]
    ManifestNameMismatch { expected: String, found: String },

    /// The package manifest has no version.
    #[error("content version not found in manifest {}", path.display())]
    MissingVersion { path: PathBuf },

    /// A manifest could not be parsed.
    #[error("failed to parse manifest {}: {reason}", path.display())]
    ManifestParseFailed { path: PathBuf, reason: String },

    /// A patch could not be parsed or applied.
    #[error("failed to apply patch to {}: {reason}", path.display())]
    PatchFailed { path: PathBuf, reason: String },

    /// An interrupted patch left a state that cannot be recovered.
    #[error("broken patch on {}: {reason}", path.display())]
    BrokenPatch { path: PathBuf, reason: String },

    /// A patch target matches neither its pre- nor its post-patch hash.
    #[error("inconsistent patch state for {}: hash {actual}", path.display())]
    InconsistentPatchState { path: PathBuf, actual: String },

    /// The persisted state store failed.
    #[error("state store error for {namespace}: {reason}")]
    StateStore { namespace: String, reason: String },

    /// A post-unpack listener failed.
    #[error("post-unpack listener {index} failed: {reason}")]
    Listener { index: usize, reason: String },

    /// The subscription's content is locked.
    #[error("subscription {0} is locked")]
    Locked(String),

    /// Unknown subscription name.
    #[error("unknown subscription: {0}")]
    UnknownSubscription(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A background worker panicked or was cancelled.
    #[error("background worker failed: {0}")]
    Worker(String),
}

impl SyncError {
    /// True for failures that invalidate local content and require the
    /// destructive recovery procedure.
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            Self::HashMismatch { .. }
                | Self::ManifestNameMismatch { .. }
                | Self::MissingVersion { .. }
                | Self::ManifestParseFailed { .. }
                | Self::PatchFailed { .. }
                | Self::BrokenPatch { .. }
                | Self::InconsistentPatchState { .. }
        )
    }

    /// True for network failures that leave local state untouched and are
    /// retried on a later refresh.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NoSubscriptionUrl
                | Self::InvalidUrl { .. }
                | Self::UpdateCheckFailed { .. }
                | Self::DownloadFailed { .. }
                | Self::Timeout { .. }
        )
    }
}
