//! Resumable unpacking of content archives.
//!
//! An unpack runs through four persisted stages:
//!
//! ```text
//! unzip ──► patch ──► clean ──► post-unpack ──► (finalize)
//! ```
//!
//! - **unzip** extracts the archive over the content directory
//! - **patch** applies the version manifest's patches in list order
//! - **clean** deletes the version manifest's removed files and records
//!   the new version
//! - **post-unpack** notifies the registered [`PostUnpackListener`]s
//!
//! The current stage and its progress index are committed through
//! [`Locals::update`] before the next side effect, so a process killed at
//! any point resumes exactly where it stopped. The unpacker never repairs
//! anything beyond the single-file cases handled by [`patch::recover`]:
//! every other failure is returned to the caller, which owns the
//! destructive recovery procedure.
//!
//! File stages run on the blocking pool; listeners run on the async
//! runtime, one at a time.

pub mod manifest;
pub mod patch;

use std::error::Error;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::archive::ArchiveExtractor;
use crate::error::{SyncError, SyncResult};
use crate::sequence::try_sequential;
use crate::state::{SubscriptionState, UnpackStatus};
use crate::store::Locals;
use crate::transport::BoxFuture;

use self::manifest::{version_manifest_path, Manifest, VersionManifest};
use self::patch::{content_path, PatchAction};

/// Result type returned by post-unpack listeners.
pub type ListenerResult = Result<(), Box<dyn Error + Send + Sync>>;

/// Details of a completed unpack, passed to listeners.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnpackEvent {
    pub subscription: String,
    pub version: String,
    pub content_dir: PathBuf,
}

/// Hook invoked after a version's files are in place.
///
/// Listeners run in registration order. A listener that fails aborts the
/// unpack; listeners that already completed are not invoked again when the
/// unpack resumes.
pub trait PostUnpackListener: Send + Sync {
    fn on_unpacked<'a>(&'a self, event: &'a UnpackEvent) -> BoxFuture<'a, ListenerResult>;
}

impl<F> PostUnpackListener for F
where
    F: Fn(&UnpackEvent) -> ListenerResult + Send + Sync,
{
    fn on_unpacked<'a>(&'a self, event: &'a UnpackEvent) -> BoxFuture<'a, ListenerResult> {
        let result = self(event);
        Box::pin(async move { result })
    }
}

/// Outcome of a completed unpack.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnpackReport {
    /// Version recorded by the unpack.
    pub version: String,
    /// Files unzipped or patched, relative to the content directory.
    pub files: Vec<PathBuf>,
}

/// Drives the unpack stages for one subscription.
#[derive(Clone)]
pub struct Unpacker {
    name: String,
    content_dir: PathBuf,
    state: Arc<Locals<SubscriptionState>>,
    extractor: Arc<dyn ArchiveExtractor>,
    listeners: Arc<Vec<Arc<dyn PostUnpackListener>>>,
}

impl Unpacker {
    pub fn new(
        name: impl Into<String>,
        content_dir: impl Into<PathBuf>,
        state: Arc<Locals<SubscriptionState>>,
        extractor: Arc<dyn ArchiveExtractor>,
        listeners: Arc<Vec<Arc<dyn PostUnpackListener>>>,
    ) -> Self {
        Self {
            name: name.into(),
            content_dir: content_dir.into(),
            state,
            extractor,
            listeners,
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Unpack `source` into the content directory.
    ///
    /// If an interrupted unpack of the same archive is recorded, it is
    /// continued from its persisted stage instead of starting over.
    pub async fn unpack(&self, source: &Path) -> SyncResult<UnpackReport> {
        let current = self.state.get();
        if let (Some(status), Some(existing)) = (current.unpack_status, &current.source_zip) {
            if existing == source {
                info!(
                    subscription = %self.name,
                    stage = %status,
                    "Continuing interrupted unpack"
                );
                return self.drive(status, true).await;
            }
        }

        self.state.update(|s| {
            s.clear_unpack();
            s.source_zip = Some(source.to_path_buf());
            s.unpack_status = Some(UnpackStatus::Unzip);
        })?;
        self.drive(UnpackStatus::Unzip, false).await
    }

    /// Resume an interrupted unpack.
    ///
    /// Returns `Ok(None)` if no unpack is in progress.
    pub async fn resume(&self) -> SyncResult<Option<UnpackReport>> {
        let Some(status) = self.state.read(|s| s.unpack_status) else {
            return Ok(None);
        };
        info!(subscription = %self.name, stage = %status, "Resuming unpack");
        self.drive(status, true).await.map(Some)
    }

    async fn drive(&self, stage: UnpackStatus, resumed: bool) -> SyncResult<UnpackReport> {
        let report = if stage == UnpackStatus::PostUnpack {
            let version = Manifest::load_version(&self.content_dir, &self.name)?;
            UnpackReport {
                version,
                files: Vec::new(),
            }
        } else {
            let this = self.clone();
            tokio::task::spawn_blocking(move || this.run_file_stages(stage, resumed))
                .await
                .map_err(|e| SyncError::Worker(e.to_string()))??
        };

        self.notify_listeners(&report.version).await?;
        self.finalize(&report.version)?;

        info!(
            subscription = %self.name,
            version = %report.version,
            files = report.files.len(),
            "Unpack complete"
        );
        Ok(report)
    }

    /// Run the unzip, patch and clean stages from `stage` onwards.
    fn run_file_stages(&self, mut stage: UnpackStatus, resumed: bool) -> SyncResult<UnpackReport> {
        let mut files = Vec::new();
        // Only the first stage can have been interrupted.
        let mut entered_by_resume = resumed;

        if stage == UnpackStatus::Unzip {
            let source = self
                .state
                .read(|s| s.source_zip.clone())
                .ok_or_else(|| SyncError::ExtractionFailed {
                    path: self.content_dir.clone(),
                    reason: "no source archive recorded".to_string(),
                })?;
            info!(subscription = %self.name, archive = %source.display(), "Unzipping content");
            files = self.extractor.extract(&source, &self.content_dir)?;
            stage = self.advance(UnpackStatus::Patch)?;
            entered_by_resume = false;
        }

        let version = Manifest::load_version(&self.content_dir, &self.name)?;
        let manifest = VersionManifest::load(&self.content_dir, &version)?;

        if stage == UnpackStatus::Patch {
            info!(
                subscription = %self.name,
                version = %version,
                patches = manifest.patches.len(),
                "Patching content"
            );
            self.patch_all(&manifest, &mut files)?;
            stage = self.advance(UnpackStatus::Clean)?;
            entered_by_resume = false;
        }

        if stage == UnpackStatus::Clean {
            info!(
                subscription = %self.name,
                deletes = manifest.deletes.len(),
                "Removing deleted files"
            );
            self.delete_all(&manifest, &version, entered_by_resume)?;
            self.state.update(|s| {
                s.version = Some(version.clone());
                s.unpack_status = Some(UnpackStatus::PostUnpack);
                s.delete_index = None;
                s.post_unpack_index = None;
            })?;
        }

        Ok(UnpackReport { version, files })
    }

    fn advance(&self, next: UnpackStatus) -> SyncResult<UnpackStatus> {
        self.state.update(|s| {
            s.unpack_status = Some(next);
            if next == UnpackStatus::Clean {
                s.patch_index = None;
                s.delete_index = None;
            }
        })?;
        debug!(subscription = %self.name, stage = %next, "Unpack stage");
        Ok(next)
    }

    fn patch_all(&self, manifest: &VersionManifest, files: &mut Vec<PathBuf>) -> SyncResult<()> {
        let count = manifest.patches.len();

        // A persisted index points at the entry that was in flight.
        let (start, in_flight) = match self.state.read(|s| s.patch_index) {
            Some(index) => (index, index < count),
            None => {
                self.state.update(|s| s.patch_index = Some(0))?;
                (0, false)
            }
        };

        for (index, entry) in manifest.patches.iter().enumerate().skip(start) {
            let action = if in_flight && index == start {
                patch::recover(&self.content_dir, entry)?
            } else {
                patch::apply_fresh(&self.content_dir, entry)?
            };
            if action != PatchAction::Skipped {
                files.push(PathBuf::from(&entry.file));
            }
            self.state.update(|s| s.patch_index = Some(index + 1))?;
        }

        Ok(())
    }

    fn delete_all(
        &self,
        manifest: &VersionManifest,
        version: &str,
        resumed: bool,
    ) -> SyncResult<()> {
        let start = self.state.read(|s| s.delete_index).unwrap_or(0);

        for (index, relative) in manifest.deletes.iter().enumerate().skip(start) {
            let path = content_path(&self.content_dir, relative).ok_or_else(|| {
                SyncError::ManifestParseFailed {
                    path: version_manifest_path(&self.content_dir, version),
                    reason: format!("delete path escapes the content directory: {}", relative),
                }
            })?;

            let removed = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => debug!(path = %path.display(), "Deleted"),
                // The entry in flight when the process died may already be gone.
                Err(e) if resumed && index == start && e.kind() == io::ErrorKind::NotFound => {
                    debug!(path = %path.display(), "Already deleted");
                }
                Err(e) => return Err(SyncError::DeleteFailed { path, source: e }),
            }

            self.state.update(|s| s.delete_index = Some(index + 1))?;
        }

        Ok(())
    }

    async fn notify_listeners(&self, version: &str) -> SyncResult<()> {
        let start = self.state.read(|s| s.post_unpack_index).unwrap_or(0);
        let event = UnpackEvent {
            subscription: self.name.clone(),
            version: version.to_string(),
            content_dir: self.content_dir.clone(),
        };

        let pending = self.listeners.iter().enumerate().skip(start);
        try_sequential(pending, |(index, listener)| {
            let event = &event;
            async move {
                listener
                    .on_unpacked(event)
                    .await
                    .map_err(|e| SyncError::Listener {
                        index,
                        reason: e.to_string(),
                    })?;
                self.state.update(|s| s.post_unpack_index = Some(index + 1))
            }
        })
        .await?;

        Ok(())
    }

    fn finalize(&self, version: &str) -> SyncResult<()> {
        self.state.update(|s| {
            // A download is consumed by the unpack of its file.
            if s.download_file.is_some() && s.download_file == s.source_zip {
                s.clear_download();
            }
            s.post_unpack_index = None;
            s.unpack_status = None;
            s.source_zip = None;
        })?;

        let path = version_manifest_path(&self.content_dir, version);
        if let Err(e) = fs::remove_file(&path) {
            warn!(
                subscription = %self.name,
                path = %path.display(),
                error = %e,
                "Failed to delete version manifest"
            );
        }
        Ok(())
    }
}
