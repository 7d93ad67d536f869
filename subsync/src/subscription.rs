//! One content feed: initialization, refresh, download and recovery.
//!
//! # Lifecycle
//!
//! ```text
//! uninitialized ──► unpacking-initial ──┐
//!        │                              ├──► initialized ◄──► refreshing
//!        └────────► downloading-initial ┘
//! ```
//!
//! # Refresh coalescing
//!
//! At most one refresh runs per subscription. [`Subscription::refresh`]
//! either starts a driver task or, if one is already running, joins it as
//! another waiter. When the driver finishes, every waiter receives the same
//! [`RefreshOutcome`] exactly once.
//!
//! # Recovery
//!
//! Unpack failures are never repaired in place. The subscription is locked,
//! its content directory removed, its progress and version cleared, its
//! bundled initial content (if any) unpacked again, and the lock released.
//! The refresh is then re-run, at most `max_recovery_attempts` times per
//! refresh cycle.

use std::fmt;
use std::future::Future;
use std::io;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::config::SubscriptionConfig;
use crate::error::{SyncError, SyncResult};
use crate::manager::ManagerContext;
use crate::network::{check_policy, NetworkDecision};
use crate::state::{SubscriptionState, UnpackStatus, UpdateStatus};
use crate::store::{subscription_namespace, Locals, StateStore};
use crate::transport::{render_check_url, validate_url, UpdateCheckResponse};
use crate::unpack::{UnpackReport, Unpacker};

/// Why a refresh finished without contacting the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The download policy forbids the current network.
    PolicyDisallowed,
    /// No network is available.
    NoConnectivity,
    /// The subscription's content is locked.
    Locked,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PolicyDisallowed => write!(f, "download policy disallows this network"),
            Self::NoConnectivity => write!(f, "no connectivity"),
            Self::Locked => write!(f, "subscription locked"),
        }
    }
}

/// Result of one refresh cycle, delivered to every waiter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// A new version was downloaded and unpacked.
    Updated { version: String },
    /// The server had nothing new.
    UpToDate,
    /// The refresh did not run.
    Skipped(SkipReason),
    /// The refresh failed; any partial download is kept for the next attempt.
    Failed(String),
    /// Local content was discarded after an unpack failure and resynced.
    Recovered,
}

impl RefreshOutcome {
    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Self::Updated { .. } | Self::UpToDate | Self::Recovered
        )
    }
}

impl fmt::Display for RefreshOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Updated { version } => write!(f, "updated to version {}", version),
            Self::UpToDate => write!(f, "up to date"),
            Self::Skipped(reason) => write!(f, "skipped: {}", reason),
            Self::Failed(reason) => write!(f, "failed: {}", reason),
            Self::Recovered => write!(f, "content reset and resynced"),
        }
    }
}

/// Per-subscription refresh guard.
enum RefreshState {
    Idle,
    Refreshing {
        waiters: Vec<oneshot::Sender<RefreshOutcome>>,
    },
}

/// Completion handle for a refresh request.
///
/// Resolves once the refresh this request joined has finished.
#[must_use = "a refresh runs regardless, but its outcome is only observable through the handle"]
pub struct RefreshHandle {
    rx: oneshot::Receiver<RefreshOutcome>,
}

impl Future for RefreshHandle {
    type Output = RefreshOutcome;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|result| {
            result.unwrap_or_else(|_| RefreshOutcome::Failed("refresh task dropped".to_string()))
        })
    }
}

/// Snapshot of a subscription for status reporting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionStatus {
    pub name: String,
    pub version: Option<String>,
    pub initialized: bool,
    pub unpack_status: Option<UnpackStatus>,
    pub download_in_progress: bool,
    pub refreshing: bool,
    pub locked: bool,
}

/// A single content subscription.
pub struct Subscription {
    name: String,
    content_dir: PathBuf,
    initial_archive: Option<PathBuf>,
    state: Arc<Locals<SubscriptionState>>,
    unpacker: Unpacker,
    /// Serializes unpack work so only one unit is outstanding.
    unpack_lock: tokio::sync::Mutex<()>,
    refresh_state: Mutex<RefreshState>,
    context: Arc<ManagerContext>,
}

impl Subscription {
    pub(crate) fn new(
        config: &SubscriptionConfig,
        store: Arc<dyn StateStore>,
        context: Arc<ManagerContext>,
    ) -> SyncResult<Self> {
        let content_dir = context.content_dir.join(&config.name);
        let state = Arc::new(Locals::open(store, subscription_namespace(&config.name))?);
        let unpacker = Unpacker::new(
            config.name.clone(),
            content_dir.clone(),
            Arc::clone(&state),
            Arc::clone(&context.extractor),
            Arc::clone(&context.listeners),
        );

        Ok(Self {
            name: config.name.clone(),
            content_dir,
            initial_archive: config.initial_archive.clone(),
            state,
            unpacker,
            unpack_lock: tokio::sync::Mutex::new(()),
            refresh_state: Mutex::new(RefreshState::Idle),
            context,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Last fully applied content version.
    pub fn version(&self) -> Option<String> {
        self.state.read(|s| s.version.clone())
    }

    /// Snapshot of the persisted state.
    pub fn state(&self) -> SubscriptionState {
        self.state.get()
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.refresh_state.lock(), RefreshState::Refreshing { .. })
    }

    pub fn status(&self) -> SubscriptionStatus {
        let state = self.state.get();
        SubscriptionStatus {
            name: self.name.clone(),
            version: state.version.clone(),
            initialized: state.initialized,
            unpack_status: state.unpack_status,
            download_in_progress: state.download_in_progress(),
            refreshing: self.is_refreshing(),
            locked: self.context.is_locked(&self.name),
        }
    }

    /// Bring the subscription to its initialized state.
    ///
    /// - initialized with an interrupted unpack: resume it
    /// - initialized otherwise: nothing to do
    /// - not initialized with bundled content: unpack it, then refresh
    /// - not initialized without bundled content: refresh
    ///
    /// A subscription only counts as initialized once it holds a content
    /// version, so an initialization that could not fetch anything is
    /// retried on the next start.
    ///
    /// Returns the outcome of the refresh, if one ran.
    pub async fn initialize(self: &Arc<Self>) -> SyncResult<Option<RefreshOutcome>> {
        // Content may also have arrived through a refresh outside
        // initialization.
        if self.mark_initialized_if_materialized()? {
            let Some(source) = self.state.read(|s| s.source_zip.clone()) else {
                debug!(subscription = %self.name, "Already initialized");
                return Ok(None);
            };
            info!(subscription = %self.name, "Resuming interrupted unpack");
            return match self.unpack(&source, true).await {
                Ok(_) => {
                    self.remove_consumed_download(&source);
                    Ok(None)
                }
                Err(SyncError::Locked(name)) => Err(SyncError::Locked(name)),
                Err(e) => {
                    error!(subscription = %self.name, error = %e, "Resumed unpack failed");
                    self.recover().await?;
                    Ok(Some(self.refresh().await))
                }
            };
        }

        if let Some(archive) = self.initial_archive.clone() {
            info!(
                subscription = %self.name,
                archive = %archive.display(),
                "Unpacking initial content"
            );
            if let Err(e) = self.unpack(&archive, false).await {
                error!(subscription = %self.name, error = %e, "Initial unpack failed");
                self.recover().await?;
            }
            self.mark_initialized_if_materialized()?;
            let outcome = self.refresh().await;
            self.mark_initialized_if_materialized()?;
            return Ok(Some(outcome));
        }

        info!(subscription = %self.name, "Downloading initial content");
        let outcome = self.refresh().await;
        if !self.mark_initialized_if_materialized()? {
            info!(
                subscription = %self.name,
                outcome = %outcome,
                "No initial content yet, will retry on next start"
            );
        }
        Ok(Some(outcome))
    }

    /// Persist `initialized` once a content version is recorded.
    ///
    /// Returns whether the subscription is initialized.
    fn mark_initialized_if_materialized(&self) -> SyncResult<bool> {
        let (initialized, materialized) = self.state.read(|s| (s.initialized, s.version.is_some()));
        if materialized && !initialized {
            self.state.update(|s| s.initialized = true)?;
        }
        Ok(initialized || materialized)
    }

    /// Request a refresh.
    ///
    /// Joins the refresh already in flight, if any; otherwise spawns one.
    /// Must be called from within a tokio runtime.
    pub fn refresh(self: &Arc<Self>) -> RefreshHandle {
        let (tx, rx) = oneshot::channel();

        let start = {
            let mut refresh_state = self.refresh_state.lock();
            match &mut *refresh_state {
                RefreshState::Refreshing { waiters } => {
                    waiters.push(tx);
                    false
                }
                RefreshState::Idle => {
                    *refresh_state = RefreshState::Refreshing { waiters: vec![tx] };
                    true
                }
            }
        };

        if start {
            let this = Arc::clone(self);
            tokio::spawn(async move {
                let outcome = AssertUnwindSafe(this.run_refresh())
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| RefreshOutcome::Failed("refresh panicked".to_string()));
                this.complete_refresh(outcome);
            });
        } else {
            debug!(subscription = %self.name, "Joined refresh in progress");
        }

        RefreshHandle { rx }
    }

    fn complete_refresh(&self, outcome: RefreshOutcome) {
        let previous = std::mem::replace(&mut *self.refresh_state.lock(), RefreshState::Idle);
        let waiters = match previous {
            RefreshState::Refreshing { waiters } => waiters,
            RefreshState::Idle => Vec::new(),
        };

        info!(
            subscription = %self.name,
            outcome = %outcome,
            waiters = waiters.len(),
            "Refresh complete"
        );
        for waiter in waiters {
            // A dropped handle just means nobody is listening.
            let _ = waiter.send(outcome.clone());
        }
    }

    async fn run_refresh(&self) -> RefreshOutcome {
        let mut recoveries = 0u32;
        loop {
            let err = match self.refresh_once().await {
                Ok(outcome) if recoveries == 0 => return outcome,
                Ok(RefreshOutcome::Failed(reason)) => return RefreshOutcome::Failed(reason),
                Ok(_) => return RefreshOutcome::Recovered,
                Err(e) => e,
            };

            error!(subscription = %self.name, error = %err, "Unpack failed, discarding content");
            if let Err(e) = self.recover().await {
                return RefreshOutcome::Failed(format!("recovery failed: {}", e));
            }

            recoveries += 1;
            if recoveries > self.context.max_recovery_attempts {
                return RefreshOutcome::Failed(format!(
                    "content reset after repeated unpack failure: {}",
                    err
                ));
            }
            warn!(subscription = %self.name, attempt = recoveries, "Resyncing after recovery");
        }
    }

    /// One refresh attempt.
    ///
    /// Network and download failures come back as [`RefreshOutcome::Failed`];
    /// only unpack failures, which require recovery, are returned as errors.
    async fn refresh_once(&self) -> SyncResult<RefreshOutcome> {
        if self.context.is_locked(&self.name) {
            return Ok(RefreshOutcome::Skipped(SkipReason::Locked));
        }

        let policy = self.context.download_policy();
        let network = self.context.connectivity.network_type();
        match check_policy(policy, network) {
            NetworkDecision::Proceed => {}
            NetworkDecision::PolicyDisallowed => {
                info!(
                    subscription = %self.name,
                    policy = %policy,
                    network = %network,
                    "Download not allowed by policy"
                );
                return Ok(RefreshOutcome::Skipped(SkipReason::PolicyDisallowed));
            }
            NetworkDecision::NoConnectivity => {
                debug!(subscription = %self.name, "Network not reachable");
                return Ok(RefreshOutcome::Skipped(SkipReason::NoConnectivity));
            }
        }

        let archive = match self.start_download().await {
            Ok(Some(archive)) => archive,
            Ok(None) => return Ok(RefreshOutcome::UpToDate),
            Err(e) => {
                warn!(subscription = %self.name, error = %e, "Refresh failed");
                return Ok(RefreshOutcome::Failed(e.to_string()));
            }
        };

        match self.unpack(&archive, false).await {
            Ok(report) => {
                self.remove_consumed_download(&archive);
                let version = report.map(|r| r.version).unwrap_or_default();
                Ok(RefreshOutcome::Updated { version })
            }
            Err(SyncError::Locked(_)) => Ok(RefreshOutcome::Skipped(SkipReason::Locked)),
            Err(e) => Err(e),
        }
    }

    /// Resume an interrupted download, or check for an update.
    ///
    /// Returns the downloaded archive, or `None` if there is nothing new.
    async fn start_download(&self) -> SyncResult<Option<PathBuf>> {
        let state = self.state.get();
        if let (Some(url), Some(file)) = (state.content_url, state.download_file) {
            match tokio::fs::metadata(&file).await {
                Ok(meta) => {
                    info!(
                        subscription = %self.name,
                        url = %url,
                        offset = meta.len(),
                        "Resuming download"
                    );
                    self.context.client.get_file(&url, meta.len(), &file).await?;
                    return Ok(Some(file));
                }
                Err(_) => {
                    debug!(subscription = %self.name, "Partial download missing, starting over");
                    self.state.update(|s| s.clear_download())?;
                }
            }
        }

        self.check_for_update().await
    }

    async fn check_for_update(&self) -> SyncResult<Option<PathBuf>> {
        let template = self
            .context
            .subscription_url
            .as_deref()
            .ok_or(SyncError::NoSubscriptionUrl)?;
        let since = self.version().unwrap_or_default();
        let url = render_check_url(template, &self.name, &since)?;

        let json = self.context.client.get_json(&url).await?;
        let response = UpdateCheckResponse::from_json(&json);
        info!(
            subscription = %self.name,
            since = %since,
            status = ?response.status,
            "Update check"
        );

        if !response.status.has_content() {
            return Ok(None);
        }
        let content_url = response.url.ok_or_else(|| SyncError::UpdateCheckFailed {
            url: url.clone(),
            reason: "response has no content url".to_string(),
        })?;
        validate_url(&content_url)?;

        self.download_content(&content_url, response.status).await.map(Some)
    }

    async fn download_content(
        &self,
        url: &str,
        status: UpdateStatus,
    ) -> SyncResult<PathBuf> {
        let file = self
            .context
            .download_dir
            .join(format!("content-{}.zip", self.name));

        // A new URL never resumes someone else's bytes.
        match tokio::fs::remove_file(&file).await {
            Ok(()) => debug!(path = %file.display(), "Removed stale download"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SyncError::DeleteFailed { path: file, source: e }),
        }

        self.state.update(|s| {
            s.status = Some(status);
            s.content_url = Some(url.to_string());
            s.download_file = Some(file.clone());
        })?;

        info!(subscription = %self.name, url, "Downloading content");
        self.context.client.get_file(url, 0, &file).await?;
        Ok(file)
    }

    /// Delete a download file whose content has been unpacked.
    fn remove_consumed_download(&self, archive: &Path) {
        if !archive.starts_with(&self.context.download_dir) {
            return;
        }
        if let Err(e) = std::fs::remove_file(archive) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(
                    subscription = %self.name,
                    path = %archive.display(),
                    error = %e,
                    "Failed to delete download file"
                );
            }
        }
    }

    /// Unpack an archive, or resume an interrupted unpack.
    ///
    /// With `resume` set, `source` is ignored in favour of the recorded
    /// archive and `Ok(None)` means there was nothing to resume. Fails with
    /// [`SyncError::Locked`] while the subscription is locked.
    pub async fn unpack(&self, source: &Path, resume: bool) -> SyncResult<Option<UnpackReport>> {
        if self.context.is_locked(&self.name) {
            return Err(SyncError::Locked(self.name.clone()));
        }
        let _guard = self.unpack_lock.lock().await;
        if resume {
            self.unpacker.resume().await
        } else {
            self.unpacker.unpack(source).await.map(Some)
        }
    }

    /// Destructive recovery: lock, reset content, unlock.
    pub(crate) async fn recover(&self) -> SyncResult<()> {
        warn!(subscription = %self.name, "Discarding local content");
        self.context.lock(&self.name);
        let result = self.reset_content().await;
        self.context.unlock(&self.name);
        result
    }

    /// Remove all local content and progress, then unpack the bundled
    /// initial content again if there is any.
    pub async fn reset_content(&self) -> SyncResult<()> {
        let _guard = self.unpack_lock.lock().await;

        match tokio::fs::remove_dir_all(&self.content_dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(SyncError::DeleteFailed {
                    path: self.content_dir.clone(),
                    source: e,
                })
            }
        }

        if let Some(file) = self.state.read(|s| s.download_file.clone()) {
            self.remove_consumed_download(&file);
        }

        self.state.update(|s| {
            s.clear_unpack();
            s.clear_download();
            s.version = None;
        })?;

        if let Some(archive) = &self.initial_archive {
            info!(subscription = %self.name, "Re-seeding initial content");
            self.unpacker.unpack(archive).await?;
        }
        Ok(())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("name", &self.name)
            .field("content_dir", &self.content_dir)
            .field("initial_archive", &self.initial_archive)
            .finish_non_exhaustive()
    }
}
