//! Configuration for the subscription manager.
//!
//! [`SyncConfig`] is built in code with the `with_*` builder methods, or
//! loaded from an INI file through [`ConfigFile`]:
//!
//! ```ini
//! [sync]
//! url = https://content.example.com/updates?subs={subs}&since={since}
//! content_dir = /var/cache/subsync/content
//! download_dir = /var/cache/subsync/download
//! state_dir = /var/cache/subsync/state
//! download_policy = wifi-only
//! network = wifi
//! timeout_secs = 120
//! max_recovery_attempts = 1
//!
//! [subscription:news]
//! initial_archive = /usr/share/app/news-base.zip
//!
//! [subscription:sport]
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;

use crate::error::{SyncError, SyncResult};
use crate::network::NetworkType;
use crate::state::DownloadPolicy;

/// Default HTTP timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Default number of destructive recoveries per refresh cycle.
pub const DEFAULT_MAX_RECOVERY_ATTEMPTS: u32 = 1;

/// Section holding manager-wide settings.
const SYNC_SECTION: &str = "sync";

/// Prefix of per-subscription sections.
const SUBSCRIPTION_PREFIX: &str = "subscription:";

/// Root directory for content, downloads and state when none is configured.
pub fn default_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("subsync")
}

/// Configuration of one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionConfig {
    /// Unique subscription name.
    pub name: String,
    /// Bundled archive holding the subscription's base content.
    pub initial_archive: Option<PathBuf>,
}

impl SubscriptionConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            initial_archive: None,
        }
    }

    pub fn with_initial_archive(mut self, path: impl Into<PathBuf>) -> Self {
        self.initial_archive = Some(path.into());
        self
    }
}

/// Configuration for the subscription manager.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Update-check URL template with `{subs}` and `{since}` placeholders.
    pub subscription_url: Option<String>,

    /// Root of the per-subscription content directories.
    pub content_dir: PathBuf,

    /// Directory for in-flight downloads.
    pub download_dir: PathBuf,

    /// Directory for persisted state.
    pub state_dir: PathBuf,

    /// Subscriptions, in refresh order.
    pub subscriptions: Vec<SubscriptionConfig>,

    /// Download policy used until one has been persisted.
    pub download_policy: DownloadPolicy,

    /// Network type reported by the static connectivity source.
    pub network: NetworkType,

    /// HTTP request timeout.
    pub timeout: Duration,

    /// Destructive recoveries allowed per refresh cycle.
    pub max_recovery_attempts: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let root = default_root();
        Self {
            subscription_url: None,
            content_dir: root.join("content"),
            download_dir: root.join("download"),
            state_dir: root.join("state"),
            subscriptions: Vec::new(),
            download_policy: DownloadPolicy::default(),
            network: NetworkType::default(),
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            max_recovery_attempts: DEFAULT_MAX_RECOVERY_ATTEMPTS,
        }
    }
}

impl SyncConfig {
    /// Create a configuration for the given update-check URL template.
    pub fn new(subscription_url: impl Into<String>) -> Self {
        Self {
            subscription_url: Some(subscription_url.into()),
            ..Default::default()
        }
    }

    /// Place content, downloads and state under one root directory.
    pub fn with_root(mut self, root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        self.content_dir = root.join("content");
        self.download_dir = root.join("download");
        self.state_dir = root.join("state");
        self
    }

    pub fn with_content_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.content_dir = path.into();
        self
    }

    pub fn with_download_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.download_dir = path.into();
        self
    }

    pub fn with_state_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.state_dir = path.into();
        self
    }

    /// Add a subscription. Subscriptions refresh in the order added.
    pub fn with_subscription(mut self, subscription: SubscriptionConfig) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn with_download_policy(mut self, policy: DownloadPolicy) -> Self {
        self.download_policy = policy;
        self
    }

    pub fn with_network(mut self, network: NetworkType) -> Self {
        self.network = network;
        self
    }

    /// Set the HTTP timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts;
        self
    }

    /// Check the configuration for mistakes that would only surface later.
    pub fn validate(&self) -> SyncResult<()> {
        let mut seen = std::collections::HashSet::new();
        for subscription in &self.subscriptions {
            let name = subscription.name.as_str();
            // The name becomes a directory under content_dir that recovery
            // removes wholesale, so it must not resolve to `.`, `..` or a
            // hidden entry.
            let valid = !name.is_empty()
                && !name.starts_with('.')
                && name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
            if !valid {
                return Err(SyncError::InvalidConfig(format!(
                    "invalid subscription name: {:?}",
                    name
                )));
            }
            if !seen.insert(name) {
                return Err(SyncError::InvalidConfig(format!(
                    "duplicate subscription: {}",
                    name
                )));
            }
        }
        Ok(())
    }
}

/// Loader for INI configuration files.
pub struct ConfigFile;

impl ConfigFile {
    /// Load a configuration file.
    pub fn load(path: &Path) -> SyncResult<SyncConfig> {
        let ini = Ini::load_from_file(path).map_err(|e| {
            SyncError::InvalidConfig(format!("failed to read {}: {}", path.display(), e))
        })?;
        Self::from_ini(&ini)
    }

    /// Parse configuration from INI text.
    pub fn parse(text: &str) -> SyncResult<SyncConfig> {
        let ini = Ini::load_from_str(text)
            .map_err(|e| SyncError::InvalidConfig(format!("failed to parse config: {}", e)))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> SyncResult<SyncConfig> {
        let sync = ini.section(Some(SYNC_SECTION)).ok_or_else(|| {
            SyncError::InvalidConfig(format!("missing [{}] section", SYNC_SECTION))
        })?;

        let url = sync
            .get("url")
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| SyncError::InvalidConfig("no subscription URL configured".to_string()))?;

        let mut config = SyncConfig::new(url);

        if let Some(root) = sync.get("root") {
            config = config.with_root(root);
        }
        if let Some(dir) = sync.get("content_dir") {
            config.content_dir = PathBuf::from(dir);
        }
        if let Some(dir) = sync.get("download_dir") {
            config.download_dir = PathBuf::from(dir);
        }
        if let Some(dir) = sync.get("state_dir") {
            config.state_dir = PathBuf::from(dir);
        }
        if let Some(policy) = sync.get("download_policy") {
            config.download_policy = policy.parse().map_err(SyncError::InvalidConfig)?;
        }
        if let Some(network) = sync.get("network") {
            config.network = network.parse().map_err(SyncError::InvalidConfig)?;
        }
        if let Some(secs) = sync.get("timeout_secs") {
            let secs: u64 = secs.trim().parse().map_err(|_| {
                SyncError::InvalidConfig(format!("invalid timeout_secs: {}", secs))
            })?;
            config.timeout = Duration::from_secs(secs);
        }
        if let Some(attempts) = sync.get("max_recovery_attempts") {
            config.max_recovery_attempts = attempts.trim().parse().map_err(|_| {
                SyncError::InvalidConfig(format!("invalid max_recovery_attempts: {}", attempts))
            })?;
        }

        for (section, props) in ini.iter() {
            let Some(name) = section.and_then(|s| s.strip_prefix(SUBSCRIPTION_PREFIX)) else {
                continue;
            };
            let mut subscription = SubscriptionConfig::new(name.trim());
            if let Some(archive) = props.get("initial_archive") {
                subscription = subscription.with_initial_archive(archive);
            }
            config.subscriptions.push(subscription);
        }

        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = SyncConfig::default();
        assert!(config.subscription_url.is_none());
        assert!(config.subscriptions.is_empty());
        assert_eq!(config.timeout, Duration::from_secs(DEFAULT_TIMEOUT_SECS));
        assert_eq!(config.max_recovery_attempts, 1);
        assert!(config.content_dir.ends_with("subsync/content"));
    }

    #[test]
    fn test_builder_pattern() {
        let config = SyncConfig::new("https://example.com/{subs}?since={since}")
            .with_root("/data/app")
            .with_subscription(SubscriptionConfig::new("news").with_initial_archive("/base.zip"))
            .with_subscription(SubscriptionConfig::new("sport"))
            .with_download_policy(DownloadPolicy::WifiOnly)
            .with_timeout(Duration::from_secs(60));

        assert_eq!(config.content_dir, PathBuf::from("/data/app/content"));
        assert_eq!(config.state_dir, PathBuf::from("/data/app/state"));
        assert_eq!(config.subscriptions.len(), 2);
        assert_eq!(
            config.subscriptions[0].initial_archive,
            Some(PathBuf::from("/base.zip"))
        );
        assert_eq!(config.download_policy, DownloadPolicy::WifiOnly);
        assert_eq!(config.timeout, Duration::from_secs(60));
    }

    #[test]
    fn test_parse_ini() {
        let config = ConfigFile::parse(
            r#"
[sync]
url = https://content.example.com/check?subs={subs}&since={since}
root = /srv/subsync
state_dir = /var/lib/subsync
download_policy = wifi-only
network = other
timeout_secs = 45

[subscription:news]
initial_archive = /opt/app/news.zip

[subscription:sport]
"#,
        )
        .unwrap();

        assert_eq!(
            config.subscription_url.as_deref(),
            Some("https://content.example.com/check?subs={subs}&since={since}")
        );
        assert_eq!(config.content_dir, PathBuf::from("/srv/subsync/content"));
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/subsync"));
        assert_eq!(config.download_policy, DownloadPolicy::WifiOnly);
        assert_eq!(config.network, NetworkType::Other);
        assert_eq!(config.timeout, Duration::from_secs(45));
        let names: Vec<&str> = config
            .subscriptions
            .iter()
            .map(|s| s.name.as_str())
            .collect();
        assert_eq!(names, vec!["news", "sport"]);
        assert_eq!(
            config.subscriptions[0].initial_archive,
            Some(PathBuf::from("/opt/app/news.zip"))
        );
    }

    #[test]
    fn test_missing_url() {
        let result = ConfigFile::parse("[sync]\ncontent_dir = /tmp/content\n");
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_invalid_policy() {
        let result = ConfigFile::parse("[sync]\nurl = http://x/{subs}\ndownload_policy = hourly\n");
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_duplicate_subscription() {
        let config = SyncConfig::new("http://x/{subs}")
            .with_subscription(SubscriptionConfig::new("news"))
            .with_subscription(SubscriptionConfig::new("news"));
        assert!(matches!(config.validate(), Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_dot_names_rejected() {
        for name in [".", "..", ".semo", ""] {
            let config =
                SyncConfig::new("http://x/{subs}").with_subscription(SubscriptionConfig::new(name));
            assert!(
                matches!(config.validate(), Err(SyncError::InvalidConfig(_))),
                "{:?} accepted",
                name
            );
        }

        let config = SyncConfig::new("http://x/{subs}")
            .with_subscription(SubscriptionConfig::new("news.v2"))
            .with_subscription(SubscriptionConfig::new("local_sport-1"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_rejects_parent_dir_subscription() {
        let result = ConfigFile::parse("[sync]\nurl = http://x/{subs}\n\n[subscription:..]\n");
        assert!(matches!(result, Err(SyncError::InvalidConfig(_))));
    }

    #[test]
    fn test_load_from_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("subsync.ini");
        std::fs::write(&path, "[sync]\nurl = http://localhost/{subs}\n\n[subscription:a]\n").unwrap();

        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.subscriptions, vec![SubscriptionConfig::new("a")]);
    }
}
