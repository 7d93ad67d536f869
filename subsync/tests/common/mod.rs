//! Shared fixtures for the integration tests.
//!
//! Provides a scripted [`ContentClient`], package builders and a state store
//! that simulates a crash after a fixed number of commits.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use serde_json::{json, Value};
use subsync::hash::hash_bytes;
use subsync::{
    BoxFuture, ContentClient, MemoryStateStore, NetworkType, StateStore, StaticConnectivity,
    SubscriptionConfig, SubscriptionManager, SyncConfig, SyncError, SyncResult,
};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;

pub const CHECK_URL: &str = "http://updates.test/check?subs={subs}&since={since}";

static TRACING: Once = Once::new();

/// Route library logs to the test harness. `RUST_LOG=subsync=debug` shows them.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

// ============================================================================
// Mock content client
// ============================================================================

/// Served file, optionally cut short on its first request.
struct ServedFile {
    data: Vec<u8>,
    fail_after: Option<usize>,
}

/// Scripted in-memory content origin.
///
/// Update checks pop the next queued response for the subscription named in
/// the `subs` query parameter, falling back to `no-update`.
#[derive(Default)]
pub struct MockClient {
    checks: Mutex<HashMap<String, VecDeque<Value>>>,
    files: Mutex<HashMap<String, ServedFile>>,
    events: Mutex<Vec<String>>,
    check_urls: Mutex<Vec<String>>,
    file_offsets: Mutex<Vec<u64>>,
    json_calls: AtomicUsize,
    file_calls: AtomicUsize,
    delay: Duration,
}

impl MockClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Every request waits `delay` before answering.
    pub fn with_delay(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay,
            ..Self::default()
        })
    }

    pub fn push_check(&self, subscription: &str, response: Value) {
        self.checks
            .lock()
            .unwrap()
            .entry(subscription.to_string())
            .or_default()
            .push_back(response);
    }

    /// Queue an `update-since` response pointing at `url`.
    pub fn push_update(&self, subscription: &str, url: &str) {
        self.push_check(subscription, json!({ "status": "update-since", "url": url }));
    }

    pub fn serve_file(&self, url: &str, data: Vec<u8>) {
        self.files.lock().unwrap().insert(
            url.to_string(),
            ServedFile {
                data,
                fail_after: None,
            },
        );
    }

    /// Serve `data`, but drop the first connection after `bytes` bytes.
    pub fn serve_file_interrupted(&self, url: &str, data: Vec<u8>, bytes: usize) {
        self.files.lock().unwrap().insert(
            url.to_string(),
            ServedFile {
                data,
                fail_after: Some(bytes),
            },
        );
    }

    pub fn json_calls(&self) -> usize {
        self.json_calls.load(Ordering::SeqCst)
    }

    pub fn file_calls(&self) -> usize {
        self.file_calls.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    pub fn check_urls(&self) -> Vec<String> {
        self.check_urls.lock().unwrap().clone()
    }

    pub fn file_offsets(&self) -> Vec<u64> {
        self.file_offsets.lock().unwrap().clone()
    }

    fn record(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }
}

fn query_param<'a>(url: &'a str, key: &str) -> &'a str {
    let query = url.split_once('?').map(|(_, q)| q).unwrap_or("");
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
        .unwrap_or("")
}

impl ContentClient for MockClient {
    fn get_json<'a>(&'a self, url: &'a str) -> BoxFuture<'a, SyncResult<Value>> {
        Box::pin(async move {
            let subscription = query_param(url, "subs").to_string();
            self.record(format!("check:{}:start", subscription));
            self.json_calls.fetch_add(1, Ordering::SeqCst);
            self.check_urls.lock().unwrap().push(url.to_string());
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let response = self
                .checks
                .lock()
                .unwrap()
                .get_mut(&subscription)
                .and_then(|queue| queue.pop_front())
                .unwrap_or_else(|| json!({ "status": "no-update" }));
            self.record(format!("check:{}:end", subscription));
            Ok(response)
        })
    }

    fn get_file<'a>(
        &'a self,
        url: &'a str,
        offset: u64,
        dest: &'a Path,
    ) -> BoxFuture<'a, SyncResult<u64>> {
        Box::pin(async move {
            self.record(format!("file:{}:start", url));
            self.file_calls.fetch_add(1, Ordering::SeqCst);
            self.file_offsets.lock().unwrap().push(offset);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }

            let (data, cut) = {
                let mut files = self.files.lock().unwrap();
                let served = files.get_mut(url).ok_or_else(|| SyncError::DownloadFailed {
                    url: url.to_string(),
                    reason: "HTTP 404".to_string(),
                })?;
                (served.data.clone(), served.fail_after.take())
            };

            let start = (offset as usize).min(data.len());
            let end = cut.map(|n| n.min(data.len())).unwrap_or(data.len());
            let mut out = if offset > 0 {
                OpenOptions::new().append(true).open(dest)
            } else {
                File::create(dest)
            }
            .map_err(|e| SyncError::WriteFailed {
                path: dest.to_path_buf(),
                source: e,
            })?;
            out.write_all(&data[start..end.max(start)])
                .map_err(|e| SyncError::WriteFailed {
                    path: dest.to_path_buf(),
                    source: e,
                })?;

            self.record(format!("file:{}:end", url));
            if cut.is_some() {
                return Err(SyncError::DownloadFailed {
                    url: url.to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            Ok(data.len() as u64)
        })
    }
}

// ============================================================================
// Crash-injecting store
// ============================================================================

/// Store that refuses every commit once its budget is spent.
///
/// A refused commit leaves the previous document in place, which is exactly
/// what a process killed before the commit would leave behind.
pub struct CrashingStore {
    inner: Arc<dyn StateStore>,
    budget: Mutex<Option<usize>>,
    refused: AtomicBool,
}

impl CrashingStore {
    pub fn new(inner: Arc<dyn StateStore>) -> Self {
        Self {
            inner,
            budget: Mutex::new(None),
            refused: AtomicBool::new(false),
        }
    }

    /// Allow `writes` more commits, then fail.
    pub fn arm(&self, writes: usize) {
        *self.budget.lock().unwrap() = Some(writes);
    }

    /// Stop failing commits.
    pub fn disarm(&self) {
        *self.budget.lock().unwrap() = None;
    }

    /// True once a commit has been refused.
    pub fn crashed(&self) -> bool {
        self.refused.load(Ordering::SeqCst)
    }
}

impl StateStore for CrashingStore {
    fn read(&self, namespace: &str) -> SyncResult<Option<Vec<u8>>> {
        self.inner.read(namespace)
    }

    fn write(&self, namespace: &str, data: &[u8]) -> SyncResult<()> {
        let mut budget = self.budget.lock().unwrap();
        match budget.as_mut() {
            Some(0) => {
                self.refused.store(true, Ordering::SeqCst);
                return Err(SyncError::StateStore {
                    namespace: namespace.to_string(),
                    reason: "simulated crash".to_string(),
                })
            }
            Some(n) => *n -= 1,
            None => {}
        }
        self.inner.write(namespace, data)
    }

    fn remove(&self, namespace: &str) -> SyncResult<()> {
        self.inner.remove(namespace)
    }
}

// ============================================================================
// Packages
// ============================================================================

pub fn build_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let mut writer = zip::ZipWriter::new(File::create(path).unwrap());
    for (name, data) in entries {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

/// Bytes of a content package: manifest, version manifest and files.
pub fn package_bytes(
    name: &str,
    version: &str,
    files: &[(&str, &str)],
    version_manifest: Value,
) -> Vec<u8> {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("package.zip");
    write_package(&path, name, version, files, version_manifest);
    fs::read(path).unwrap()
}

pub fn write_package(
    path: &Path,
    name: &str,
    version: &str,
    files: &[(&str, &str)],
    version_manifest: Value,
) {
    let manifest = json!({ "name": name, "version": version }).to_string();
    let version_manifest_name = format!(".semo/{}-manifest.json", version);
    let mut entries: Vec<(&str, Vec<u8>)> = Vec::new();
    entries.push((".semo/manifest.json", manifest.into_bytes()));
    entries.push((
        version_manifest_name.as_str(),
        version_manifest.to_string().into_bytes(),
    ));
    for (file, data) in files {
        entries.push((*file, data.as_bytes().to_vec()));
    }
    build_zip(path, &entries);
}

/// A patch entry turning `before` into `after`.
pub fn patch_entry(file: &str, before: &str, after: &str) -> Value {
    json!({
        "file": file,
        "beforeHash": hash_bytes(before.as_bytes()),
        "afterHash": hash_bytes(after.as_bytes()),
        "patches": diffy::create_patch(before, after).to_string(),
    })
}

/// Every regular file under `dir`, keyed by relative path.
pub fn snapshot(dir: &Path) -> HashMap<PathBuf, Vec<u8>> {
    fn walk(root: &Path, dir: &Path, out: &mut HashMap<PathBuf, Vec<u8>>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries {
            let path = entry.unwrap().path();
            if path.is_dir() {
                walk(root, &path, out);
            } else {
                let relative = path.strip_prefix(root).unwrap().to_path_buf();
                out.insert(relative, fs::read(&path).unwrap());
            }
        }
    }
    let mut out = HashMap::new();
    walk(dir, dir, &mut out);
    out
}

// ============================================================================
// Manager fixture
// ============================================================================

/// Temp root plus the swappable collaborators of a manager.
pub struct Fixture {
    pub temp: TempDir,
    pub client: Arc<MockClient>,
    pub connectivity: Arc<StaticConnectivity>,
    pub store: Arc<MemoryStateStore>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_client(MockClient::new())
    }

    pub fn with_client(client: Arc<MockClient>) -> Self {
        init_tracing();
        Self {
            temp: TempDir::new().unwrap(),
            client,
            connectivity: Arc::new(StaticConnectivity::new(NetworkType::WifiLike)),
            store: Arc::new(MemoryStateStore::new()),
        }
    }

    pub fn root(&self) -> &Path {
        self.temp.path()
    }

    /// Path for a bundled package outside the managed directories.
    pub fn bundle_path(&self, file: &str) -> PathBuf {
        self.temp.path().join("bundles").join(file)
    }

    pub fn config(&self, subscriptions: Vec<SubscriptionConfig>) -> SyncConfig {
        subscriptions.into_iter().fold(
            SyncConfig::new(CHECK_URL).with_root(self.temp.path()),
            |config, sub| config.with_subscription(sub),
        )
    }

    pub fn manager(&self, config: SyncConfig) -> SubscriptionManager {
        let store: Arc<dyn StateStore> = self.store.clone();
        SubscriptionManager::builder(config)
            .with_store(store)
            .with_client(self.client.clone())
            .with_connectivity(self.connectivity.clone())
            .build()
            .unwrap()
    }
}
