//! Subscription manager.
//!
//! Owns the shared content and download roots, the settings namespace, the
//! post-unpack listeners, the lock set and the subscriptions themselves, in
//! configuration order.
//!
//! # Example
//!
//! ```ignore
//! use subsync::{SubscriptionConfig, SubscriptionManager, SyncConfig};
//!
//! let config = SyncConfig::new("https://example.com/check?subs={subs}&since={since}")
//!     .with_subscription(SubscriptionConfig::new("news"));
//! let manager = SubscriptionManager::builder(config).build()?;
//!
//! manager.initialize_all().await;
//! for (name, outcome) in manager.refresh_all().await {
//!     println!("{}: {}", name, outcome);
//! }
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::archive::{ArchiveExtractor, ZipExtractor};
use crate::config::SyncConfig;
use crate::error::{SyncError, SyncResult};
use crate::network::{Connectivity, StaticConnectivity};
use crate::sequence::sequential;
use crate::state::{DownloadPolicy, Settings};
use crate::store::{FileStateStore, Locals, StateStore, SETTINGS_NAMESPACE};
use crate::subscription::{RefreshOutcome, Subscription, SubscriptionStatus};
use crate::transport::{ContentClient, HttpClient};
use crate::unpack::PostUnpackListener;

/// State shared between the manager and its subscriptions.
pub(crate) struct ManagerContext {
    pub(crate) subscription_url: Option<String>,
    pub(crate) content_dir: PathBuf,
    pub(crate) download_dir: PathBuf,
    pub(crate) client: Arc<dyn ContentClient>,
    pub(crate) connectivity: Arc<dyn Connectivity>,
    pub(crate) extractor: Arc<dyn ArchiveExtractor>,
    pub(crate) listeners: Arc<Vec<Arc<dyn PostUnpackListener>>>,
    pub(crate) settings: Locals<Settings>,
    pub(crate) max_recovery_attempts: u32,
    locks: Mutex<HashSet<String>>,
}

impl ManagerContext {
    pub(crate) fn download_policy(&self) -> DownloadPolicy {
        self.settings.read(|s| s.download_policy)
    }

    /// Lock a subscription. Returns false if it was already locked.
    pub(crate) fn lock(&self, name: &str) -> bool {
        self.locks.lock().insert(name.to_string())
    }

    pub(crate) fn unlock(&self, name: &str) {
        self.locks.lock().remove(name);
    }

    pub(crate) fn is_locked(&self, name: &str) -> bool {
        self.locks.lock().contains(name)
    }
}

/// Builder for [`SubscriptionManager`].
///
/// Every collaborator has a production default; tests swap in their own.
pub struct ManagerBuilder {
    config: SyncConfig,
    store: Option<Arc<dyn StateStore>>,
    client: Option<Arc<dyn ContentClient>>,
    connectivity: Option<Arc<dyn Connectivity>>,
    extractor: Option<Arc<dyn ArchiveExtractor>>,
    listeners: Vec<Arc<dyn PostUnpackListener>>,
}

impl ManagerBuilder {
    pub fn with_store(mut self, store: Arc<dyn StateStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_client(mut self, client: Arc<dyn ContentClient>) -> Self {
        self.client = Some(client);
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    pub fn with_extractor(mut self, extractor: Arc<dyn ArchiveExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    /// Register a post-unpack listener. Listeners run in registration order.
    pub fn with_listener(mut self, listener: Arc<dyn PostUnpackListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Create the directories, open the stores and build the subscriptions.
    ///
    /// # Errors
    ///
    /// Fails if a root directory cannot be created, the configuration is
    /// invalid, or persisted state cannot be read.
    pub fn build(self) -> SyncResult<SubscriptionManager> {
        let config = self.config;
        config.validate()?;

        for dir in [&config.content_dir, &config.download_dir] {
            fs::create_dir_all(dir).map_err(|e| SyncError::CreateDirFailed {
                path: dir.clone(),
                source: e,
            })?;
        }

        let store: Arc<dyn StateStore> = match self.store {
            Some(store) => store,
            None => Arc::new(FileStateStore::open(&config.state_dir)?),
        };
        let client: Arc<dyn ContentClient> = match self.client {
            Some(client) => client,
            None => Arc::new(HttpClient::with_timeout(config.timeout)?),
        };
        let connectivity: Arc<dyn Connectivity> = match self.connectivity {
            Some(connectivity) => connectivity,
            None => Arc::new(StaticConnectivity::new(config.network)),
        };
        let extractor: Arc<dyn ArchiveExtractor> = match self.extractor {
            Some(extractor) => extractor,
            None => Arc::new(ZipExtractor::new()),
        };

        // The configured policy only seeds settings that were never saved.
        let settings: Locals<Settings> = Locals::open(Arc::clone(&store), SETTINGS_NAMESPACE)?;
        if store.read(SETTINGS_NAMESPACE)?.is_none() {
            settings.update(|s| s.download_policy = config.download_policy)?;
        }

        let context = Arc::new(ManagerContext {
            subscription_url: config.subscription_url.clone(),
            content_dir: config.content_dir.clone(),
            download_dir: config.download_dir.clone(),
            client,
            connectivity,
            extractor,
            listeners: Arc::new(self.listeners),
            settings,
            max_recovery_attempts: config.max_recovery_attempts,
            locks: Mutex::new(HashSet::new()),
        });

        let subscriptions = config
            .subscriptions
            .iter()
            .map(|sub| {
                Subscription::new(sub, Arc::clone(&store), Arc::clone(&context)).map(Arc::new)
            })
            .collect::<SyncResult<Vec<_>>>()?;

        info!(
            subscriptions = subscriptions.len(),
            content_dir = %config.content_dir.display(),
            "Subscription manager ready"
        );

        Ok(SubscriptionManager {
            context,
            subscriptions,
        })
    }
}

/// Owns and coordinates all subscriptions.
pub struct SubscriptionManager {
    context: Arc<ManagerContext>,
    subscriptions: Vec<Arc<Subscription>>,
}

impl SubscriptionManager {
    /// Build a manager with production collaborators.
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        Self::builder(config).build()
    }

    pub fn builder(config: SyncConfig) -> ManagerBuilder {
        ManagerBuilder {
            config,
            store: None,
            client: None,
            connectivity: None,
            extractor: None,
            listeners: Vec::new(),
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.context.content_dir
    }

    pub fn download_dir(&self) -> &Path {
        &self.context.download_dir
    }

    pub fn subscription_url(&self) -> Option<&str> {
        self.context.subscription_url.as_deref()
    }

    /// Look up a subscription by name.
    pub fn subscription(&self, name: &str) -> Option<&Arc<Subscription>> {
        self.subscriptions.iter().find(|s| s.name() == name)
    }

    /// Subscription names in configuration order.
    pub fn subscription_names(&self) -> Vec<&str> {
        self.subscriptions.iter().map(|s| s.name()).collect()
    }

    fn require(&self, name: &str) -> SyncResult<&Arc<Subscription>> {
        self.subscription(name)
            .ok_or_else(|| SyncError::UnknownSubscription(name.to_string()))
    }

    /// Initialize every subscription, one after another.
    pub async fn initialize_all(&self) -> Vec<(String, SyncResult<Option<RefreshOutcome>>)> {
        sequential(self.subscriptions.iter(), |sub| async move {
            let result = sub.initialize().await;
            if let Err(e) = &result {
                warn!(subscription = %sub.name(), error = %e, "Initialization failed");
            }
            (sub.name().to_string(), result)
        })
        .await
    }

    /// Refresh one subscription and wait for the outcome.
    pub async fn refresh_subscription(&self, name: &str) -> SyncResult<RefreshOutcome> {
        let sub = self.require(name)?;
        Ok(sub.refresh().await)
    }

    /// Refresh every subscription in order.
    ///
    /// Each refresh completes, including any recovery, before the next one
    /// starts.
    pub async fn refresh_all(&self) -> Vec<(String, RefreshOutcome)> {
        sequential(self.subscriptions.iter(), |sub| async move {
            let outcome = sub.refresh().await;
            (sub.name().to_string(), outcome)
        })
        .await
    }

    /// Lock a subscription's content. Returns false if already locked.
    ///
    /// While locked, refreshes complete immediately as skipped and unpacks
    /// are refused.
    pub fn lock_subscription(&self, name: &str) -> SyncResult<bool> {
        self.require(name)?;
        Ok(self.context.lock(name))
    }

    pub fn unlock_subscription(&self, name: &str) -> SyncResult<()> {
        self.require(name)?;
        self.context.unlock(name);
        Ok(())
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.context.is_locked(name)
    }

    /// Discard a subscription's content and re-materialize its bundled
    /// initial content, under the subscription lock.
    pub async fn reset_subscription_content(&self, name: &str) -> SyncResult<()> {
        let sub = self.require(name)?;
        sub.recover().await
    }

    /// Current shared settings.
    pub fn settings(&self) -> Settings {
        self.context.settings.get()
    }

    /// Change and persist the download policy.
    pub fn set_download_policy(&self, policy: DownloadPolicy) -> SyncResult<()> {
        self.context
            .settings
            .update(|s| s.download_policy = policy)?;
        info!(policy = %policy, "Download policy changed");
        Ok(())
    }

    /// Status of every subscription, in configuration order.
    pub fn status(&self) -> Vec<SubscriptionStatus> {
        self.subscriptions.iter().map(|s| s.status()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SubscriptionConfig;
    use crate::store::MemoryStateStore;
    use tempfile::TempDir;

    fn config(temp: &TempDir) -> SyncConfig {
        SyncConfig::new("http://localhost:1/check?subs={subs}&since={since}")
            .with_root(temp.path())
            .with_subscription(SubscriptionConfig::new("news"))
            .with_subscription(SubscriptionConfig::new("sport"))
    }

    #[test]
    fn test_new_creates_directories() {
        let temp = TempDir::new().unwrap();
        let manager = SubscriptionManager::new(config(&temp)).unwrap();

        assert!(manager.content_dir().is_dir());
        assert!(manager.download_dir().is_dir());
        assert_eq!(manager.subscription_names(), vec!["news", "sport"]);
        assert_eq!(
            manager.subscription("news").unwrap().content_dir(),
            temp.path().join("content/news")
        );
        assert!(manager.subscription("weather").is_none());
    }

    #[test]
    fn test_new_fails_when_directory_cannot_be_created() {
        let temp = TempDir::new().unwrap();
        let blocker = temp.path().join("file");
        fs::write(&blocker, "not a directory").unwrap();

        let config = config(&temp).with_content_dir(blocker.join("content"));
        let result = SubscriptionManager::new(config);
        assert!(matches!(result, Err(SyncError::CreateDirFailed { .. })));
    }

    #[test]
    fn test_lock_unlock() {
        let temp = TempDir::new().unwrap();
        let manager = SubscriptionManager::new(config(&temp)).unwrap();

        assert!(manager.lock_subscription("news").unwrap());
        assert!(!manager.lock_subscription("news").unwrap());
        assert!(manager.is_locked("news"));
        assert!(!manager.is_locked("sport"));

        manager.unlock_subscription("news").unwrap();
        assert!(!manager.is_locked("news"));

        assert!(matches!(
            manager.lock_subscription("weather"),
            Err(SyncError::UnknownSubscription(_))
        ));
    }

    #[test]
    fn test_configured_policy_seeds_settings_once() {
        let temp = TempDir::new().unwrap();
        let store: Arc<dyn StateStore> = Arc::new(MemoryStateStore::new());

        let manager = SubscriptionManager::builder(
            config(&temp).with_download_policy(DownloadPolicy::WifiOnly),
        )
        .with_store(Arc::clone(&store))
        .build()
        .unwrap();
        assert_eq!(manager.settings().download_policy, DownloadPolicy::WifiOnly);

        manager.set_download_policy(DownloadPolicy::Never).unwrap();
        drop(manager);

        // A persisted choice wins over configuration.
        let manager = SubscriptionManager::builder(config(&temp))
            .with_store(store)
            .build()
            .unwrap();
        assert_eq!(manager.settings().download_policy, DownloadPolicy::Never);
    }

    #[test]
    fn test_status_snapshot() {
        let temp = TempDir::new().unwrap();
        let manager = SubscriptionManager::new(config(&temp)).unwrap();
        manager.lock_subscription("sport").unwrap();

        let status = manager.status();
        assert_eq!(status.len(), 2);
        assert_eq!(status[0].name, "news");
        assert_eq!(status[0].version, None);
        assert!(!status[0].initialized);
        assert!(!status[0].refreshing);
        assert!(status[1].locked);
    }
}
