//! Content archive extraction.
//!
//! Content packages arrive as zip files. Extraction overwrites whatever is
//! already in the destination, which is what makes re-running an
//! interrupted unzip stage safe.

use std::fs::{self, File};
use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{SyncError, SyncResult};

/// Trait for archive extraction operations.
pub trait ArchiveExtractor: Send + Sync {
    /// Extract `archive` into `dest_dir`, overwriting existing files.
    ///
    /// Returns the extracted files as paths relative to `dest_dir`, in
    /// archive order.
    fn extract(&self, archive: &Path, dest_dir: &Path) -> SyncResult<Vec<PathBuf>>;
}

/// Zip extractor backed by the `zip` crate.
#[derive(Debug, Default, Clone, Copy)]
pub struct ZipExtractor;

impl ZipExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl ArchiveExtractor for ZipExtractor {
    fn extract(&self, archive: &Path, dest_dir: &Path) -> SyncResult<Vec<PathBuf>> {
        let failed = |reason: String| SyncError::ExtractionFailed {
            path: archive.to_path_buf(),
            reason,
        };

        let file = File::open(archive).map_err(|e| SyncError::ReadFailed {
            path: archive.to_path_buf(),
            source: e,
        })?;
        let mut zip =
            zip::ZipArchive::new(BufReader::new(file)).map_err(|e| failed(e.to_string()))?;

        fs::create_dir_all(dest_dir).map_err(|e| SyncError::CreateDirFailed {
            path: dest_dir.to_path_buf(),
            source: e,
        })?;

        let mut extracted = Vec::with_capacity(zip.len());
        for i in 0..zip.len() {
            let mut entry = zip.by_index(i).map_err(|e| failed(e.to_string()))?;

            // Reject entries that would escape the destination.
            let relative = entry
                .enclosed_name()
                .ok_or_else(|| failed(format!("unsafe entry path: {}", entry.name())))?;
            let target = dest_dir.join(&relative);

            if entry.is_dir() {
                fs::create_dir_all(&target).map_err(|e| SyncError::CreateDirFailed {
                    path: target.clone(),
                    source: e,
                })?;
                continue;
            }

            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent).map_err(|e| SyncError::CreateDirFailed {
                    path: parent.to_path_buf(),
                    source: e,
                })?;
            }

            write_synced(&mut entry, &target).map_err(|e| SyncError::WriteFailed {
                path: target.clone(),
                source: e,
            })?;

            debug!(path = %relative.display(), "Extracted");
            extracted.push(relative);
        }

        Ok(extracted)
    }
}

/// Copy `reader` into a new file at `target` and flush it to disk.
///
/// The caller commits the next unpack stage right after extraction, so
/// every extracted file must be durable by then.
fn write_synced(reader: &mut impl io::Read, target: &Path) -> io::Result<()> {
    let mut out = File::create(target)?;
    io::copy(reader, &mut out)?;
    out.sync_all()
}
