//! Persisted state for subscriptions and shared settings.
//!
//! Everything needed to resume an interrupted download or unpack lives in
//! [`SubscriptionState`]. The whole struct is written at once through a
//! [`StateStore`](crate::store::StateStore), so a crash can never observe a
//! half-updated set of progress markers.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Stage of an in-progress unpack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnpackStatus {
    /// Extracting the archive into the content directory.
    Unzip,
    /// Applying per-file patches.
    Patch,
    /// Deleting removed files and recording the new version.
    Clean,
    /// Notifying post-unpack listeners.
    PostUnpack,
}

impl UnpackStatus {
    /// Get the persisted name of the stage.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Unzip => "unzip",
            Self::Patch => "patch",
            Self::Clean => "clean",
            Self::PostUnpack => "post-unpack",
        }
    }
}

impl fmt::Display for UnpackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Status reported by the update-check endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UpdateStatus {
    Error,
    NoUpdate,
    NoContentAvailable,
    UpdateSince,
    CurrentContent,
    #[serde(other)]
    Unknown,
}

impl UpdateStatus {
    /// True if the response carries content to download.
    pub fn has_content(&self) -> bool {
        matches!(self, Self::UpdateSince | Self::CurrentContent)
    }
}

/// Persisted progress and bookkeeping for one subscription.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriptionState {
    /// Last fully applied content version.
    pub version: Option<String>,
    /// Current unpack stage, if an unpack is in progress.
    pub unpack_status: Option<UnpackStatus>,
    /// Index of the next patch to apply or verify.
    pub patch_index: Option<usize>,
    /// Index of the next file to delete in the clean stage.
    pub delete_index: Option<usize>,
    /// Index of the next post-unpack listener to invoke.
    pub post_unpack_index: Option<usize>,
    /// Archive being unpacked.
    pub source_zip: Option<PathBuf>,
    /// Download file for an in-flight download.
    pub download_file: Option<PathBuf>,
    /// URL of an in-flight download.
    pub content_url: Option<String>,
    /// Update-check status that started the in-flight download.
    pub status: Option<UpdateStatus>,
    /// Set once content has been materialized for the first time.
    pub initialized: bool,
}

impl SubscriptionState {
    /// True if an unpack was started and has not finished.
    pub fn unpack_in_progress(&self) -> bool {
        self.unpack_status.is_some()
    }

    /// True if a download was started and its bookkeeping is still present.
    pub fn download_in_progress(&self) -> bool {
        self.content_url.is_some() && self.download_file.is_some()
    }

    /// Clear download bookkeeping.
    pub fn clear_download(&mut self) {
        self.content_url = None;
        self.download_file = None;
        self.status = None;
    }

    /// Clear all unpack progress markers.
    pub fn clear_unpack(&mut self) {
        self.unpack_status = None;
        self.patch_index = None;
        self.delete_index = None;
        self.post_unpack_index = None;
        self.source_zip = None;
    }
}

/// Policy governing when content may be downloaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadPolicy {
    /// Download on any connected network.
    #[default]
    Always,
    /// Download only on Wi-Fi, WiMAX or Ethernet.
    WifiOnly,
    /// Never download.
    Never,
}

impl DownloadPolicy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Always => "always",
            Self::WifiOnly => "wifi-only",
            Self::Never => "never",
        }
    }
}

impl fmt::Display for DownloadPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DownloadPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "always" | "" => Ok(Self::Always),
            "wifi-only" | "wifi" => Ok(Self::WifiOnly),
            "never" => Ok(Self::Never),
            other => Err(format!("unknown download policy: {}", other)),
        }
    }
}

/// Settings shared by all subscriptions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub download_policy: DownloadPolicy,
}
