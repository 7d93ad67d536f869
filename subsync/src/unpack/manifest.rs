//! Package and version manifests.
//!
//! Every content archive carries a reserved `.semo/` directory:
//!
//! ```text
//! .semo/manifest.json              {"name": "...", "version": "..."}
//! .semo/<version>-manifest.json    {"patches": [...], "deletes": [...]}
//! ```
//!
//! Patch entries name their hashes `beforeHash` and `afterHash`: lowercase
//! hex SHA-256 of the whole file. The `patches` text is a unified diff.
//! Manifests using any other key names, digests or patch formats are
//! rejected when they are parsed.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Reserved metadata directory inside a content directory.
pub const META_DIR: &str = ".semo";

/// Package manifest file name.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Temporary file a patched post-image is written to before the rename.
pub const PATCH_TEMP_FILE: &str = "patch.temp";

/// Package manifest: identity and version of the unpacked content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

/// One hash-bracketed patch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchEntry {
    /// Target path, relative to the content directory.
    pub file: String,
    /// SHA-256 of the target before the patch.
    #[serde(rename = "beforeHash")]
    pub before_hash: String,
    /// SHA-256 of the target after the patch.
    #[serde(rename = "afterHash")]
    pub after_hash: String,
    /// Unified diff text.
    #[serde(rename = "patches")]
    pub patch: String,
}

/// Patch and delete instructions for one version.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionManifest {
    pub patches: Vec<PatchEntry>,
    pub deletes: Vec<String>,
}

/// Path of `.semo/` inside `content_dir`.
pub fn meta_dir(content_dir: &Path) -> PathBuf {
    content_dir.join(META_DIR)
}

pub fn manifest_path(content_dir: &Path) -> PathBuf {
    meta_dir(content_dir).join(MANIFEST_FILE)
}

pub fn version_manifest_path(content_dir: &Path, version: &str) -> PathBuf {
    meta_dir(content_dir).join(format!("{}-manifest.json", version))
}

pub fn patch_temp_path(content_dir: &Path) -> PathBuf {
    meta_dir(content_dir).join(PATCH_TEMP_FILE)
}

impl Manifest {
    /// Load the package manifest and check it belongs to `subscription`.
    ///
    /// Returns the manifest's version.
    pub fn load_version(content_dir: &Path, subscription: &str) -> SyncResult<String> {
        let path = manifest_path(content_dir);
        let manifest: Manifest = read_json(&path)?;

        if manifest.name != subscription {
            return Err(SyncError::ManifestNameMismatch {
                expected: subscription.to_string(),
                found: manifest.name,
            });
        }

        manifest
            .version
            .filter(|v| !v.is_empty())
            .ok_or(SyncError::MissingVersion { path })
    }
}

impl VersionManifest {
    pub fn load(content_dir: &Path, version: &str) -> SyncResult<Self> {
        read_json(&version_manifest_path(content_dir, version))
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> SyncResult<T> {
    let text = fs::read_to_string(path).map_err(|e| SyncError::ManifestParseFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    serde_json::from_str(&text).map_err(|e| SyncError::ManifestParseFailed {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_meta(dir: &Path, name: &str, contents: &str) {
        fs::create_dir_all(meta_dir(dir)).unwrap();
        fs::write(meta_dir(dir).join(name), contents).unwrap();
    }

    #[test]
    fn test_load_version() {
        let temp = TempDir::new().unwrap();
        write_meta(temp.path(), MANIFEST_FILE, r#"{"name":"news","version":"42"}"#);
        assert_eq!(Manifest::load_version(temp.path(), "news").unwrap(), "42");
    }

    #[test]
    fn test_name_mismatch() {
        let temp = TempDir::new().unwrap();
        write_meta(temp.path(), MANIFEST_FILE, r#"{"name":"sport","version":"42"}"#);
        let result = Manifest::load_version(temp.path(), "news");
        assert!(matches!(result, Err(SyncError::ManifestNameMismatch { .. })));
    }

    #[test]
    fn test_missing_version() {
        let temp = TempDir::new().unwrap();
        write_meta(temp.path(), MANIFEST_FILE, r#"{"name":"news"}"#);
        let result = Manifest::load_version(temp.path(), "news");
        assert!(matches!(result, Err(SyncError::MissingVersion { .. })));
    }

    #[test]
    fn test_missing_manifest_is_integrity_failure() {
        let temp = TempDir::new().unwrap();
        let err = Manifest::load_version(temp.path(), "news").unwrap_err();
        assert!(err.is_integrity());
    }

    #[test]
    fn test_version_manifest_keys() {
        let temp = TempDir::new().unwrap();
        write_meta(
            temp.path(),
            "7-manifest.json",
            r#"{
                "patches": [
                    {"file": "a.txt", "beforeHash": "b1", "afterHash": "a1", "patches": "p1"}
                ]
            }"#,
        );

        let manifest = VersionManifest::load(temp.path(), "7").unwrap();
        assert_eq!(manifest.patches.len(), 1);
        assert_eq!(manifest.patches[0].before_hash, "b1");
        assert_eq!(manifest.patches[0].after_hash, "a1");
        assert_eq!(manifest.patches[0].patch, "p1");
        assert!(manifest.deletes.is_empty());
    }

    #[test]
    fn test_version_manifest_rejects_unknown_hash_keys() {
        let temp = TempDir::new().unwrap();
        write_meta(
            temp.path(),
            "7-manifest.json",
            r#"{"patches": [{"file": "b.txt", "before": "b2", "after": "a2", "patches": "p2"}]}"#,
        );

        let result = VersionManifest::load(temp.path(), "7");
        assert!(matches!(result, Err(SyncError::ManifestParseFailed { .. })));
    }

    #[test]
    fn test_paths() {
        let dir = Path::new("/content/news");
        assert_eq!(
            version_manifest_path(dir, "3"),
            PathBuf::from("/content/news/.semo/3-manifest.json")
        );
        assert_eq!(
            patch_temp_path(dir),
            PathBuf::from("/content/news/.semo/patch.temp")
        );
    }
}
