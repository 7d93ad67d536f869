//! Hash-verified single-file patching.
//!
//! A patch moves one file from a known content state (`beforeHash`) to
//! another (`afterHash`). Both ends are verified, and the post-image reaches
//! the target only through a synced temp file and a rename:
//!
//! 1. read the target and require its hash to equal `beforeHash`
//! 2. apply the unified diff
//! 3. require the result to hash to `afterHash`
//! 4. write the result to `.semo/patch.temp` and sync it
//! 5. delete the target, then rename the temp file over it
//!
//! A crash can therefore leave the target in one of three observable
//! states, each handled by [`recover`].

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tracing::debug;

use super::manifest::{patch_temp_path, PatchEntry};
use crate::error::{SyncError, SyncResult};
use crate::hash::{hash_bytes, hash_file, same_hash, verify_bytes};

/// What happened to one patch entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchAction {
    /// The patch was applied to the pre-image.
    Applied,
    /// A computed post-image was moved into place.
    Renamed,
    /// The target already held the post-image.
    Skipped,
}

/// Resolve a manifest path against the content directory.
///
/// Returns `None` for absolute paths and paths that climb out of the
/// content directory.
pub fn content_path(content_dir: &Path, relative: &str) -> Option<PathBuf> {
    let relative = Path::new(relative);
    let escapes = relative.components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || relative.as_os_str().is_empty() {
        None
    } else {
        Some(content_dir.join(relative))
    }
}

fn target_path(content_dir: &Path, entry: &PatchEntry) -> SyncResult<PathBuf> {
    content_path(content_dir, &entry.file).ok_or_else(|| SyncError::PatchFailed {
        path: PathBuf::from(&entry.file),
        reason: "path escapes the content directory".to_string(),
    })
}

/// Apply `entry` to a target that must still hold its pre-image.
pub fn apply_fresh(content_dir: &Path, entry: &PatchEntry) -> SyncResult<PatchAction> {
    let target = target_path(content_dir, entry)?;
    let pre_image = fs::read(&target).map_err(|e| SyncError::ReadFailed {
        path: target.clone(),
        source: e,
    })?;
    apply(content_dir, entry, &target, pre_image)?;
    Ok(PatchAction::Applied)
}

/// Finish an entry whose patch may have been interrupted.
///
/// - target missing, temp file holds the post-image: rename the temp file
/// - target missing otherwise: unrecoverable
/// - target holds the pre-image: apply the patch
/// - target holds the post-image: nothing to do
/// - anything else: unrecoverable
pub fn recover(content_dir: &Path, entry: &PatchEntry) -> SyncResult<PatchAction> {
    let target = target_path(content_dir, entry)?;
    let temp = patch_temp_path(content_dir);

    let pre_image = match fs::read(&target) {
        Ok(data) => data,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            if !temp.exists() {
                return Err(SyncError::BrokenPatch {
                    path: target,
                    reason: "target and patch temp file are both missing".to_string(),
                });
            }
            let temp_hash = hash_file(&temp)?;
            if !same_hash(&temp_hash, &entry.after_hash) {
                return Err(SyncError::BrokenPatch {
                    path: target,
                    reason: format!("patch temp file has unexpected hash {}", temp_hash),
                });
            }
            move_into_place(&temp, &target)?;
            debug!(path = %target.display(), "Completed interrupted patch rename");
            return Ok(PatchAction::Renamed);
        }
        Err(e) => {
            return Err(SyncError::ReadFailed {
                path: target,
                source: e,
            })
        }
    };

    let actual = hash_bytes(&pre_image);
    if same_hash(&actual, &entry.before_hash) {
        apply(content_dir, entry, &target, pre_image)?;
        Ok(PatchAction::Applied)
    } else if same_hash(&actual, &entry.after_hash) {
        debug!(path = %target.display(), "Patch already applied");
        Ok(PatchAction::Skipped)
    } else {
        Err(SyncError::InconsistentPatchState {
            path: target,
            actual,
        })
    }
}

fn apply(
    content_dir: &Path,
    entry: &PatchEntry,
    target: &Path,
    pre_image: Vec<u8>,
) -> SyncResult<()> {
    verify_bytes(target, &pre_image, &entry.before_hash)?;

    let failed = |reason: String| SyncError::PatchFailed {
        path: target.to_path_buf(),
        reason,
    };

    let original =
        String::from_utf8(pre_image).map_err(|_| failed("target is not UTF-8 text".to_string()))?;
    let patch = diffy::Patch::from_str(&entry.patch).map_err(|e| failed(e.to_string()))?;
    let patched = diffy::apply(&original, &patch).map_err(|e| failed(e.to_string()))?;

    verify_bytes(target, patched.as_bytes(), &entry.after_hash)?;

    let temp = patch_temp_path(content_dir);
    write_synced(&temp, patched.as_bytes())?;

    fs::remove_file(target).map_err(|e| SyncError::DeleteFailed {
        path: target.to_path_buf(),
        source: e,
    })?;
    move_into_place(&temp, target)?;

    debug!(path = %target.display(), "Applied patch");
    Ok(())
}

fn write_synced(path: &Path, data: &[u8]) -> SyncResult<()> {
    let write = || -> io::Result<()> {
        let mut file = File::create(path)?;
        file.write_all(data)?;
        file.sync_all()
    };
    write().map_err(|e| SyncError::WriteFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

fn move_into_place(from: &Path, to: &Path) -> SyncResult<()> {
    fs::rename(from, to).map_err(|e| SyncError::RenameFailed {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })
}
