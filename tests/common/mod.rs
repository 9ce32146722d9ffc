//! Shared harness for the cross-crate sync tests

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::{Notify, Semaphore};

use tandem::local::FsLocalStore;
use tandem::remote::MemoryRemote;
use tandem::sync::errors::{Result, SyncError};
use tandem::sync::persistence::CACHE_FILE_NAME;
use tandem::sync::{
    CacheFile, Existence, LocalStore, PathRules, Snapshot, SyncCache, SyncConfig,
    SyncOrchestrator, SyncReport,
};

/// A local tree, a state directory and an in-memory remote
pub struct Harness {
    _dir: TempDir,
    pub root: PathBuf,
    pub state_dir: PathBuf,
    pub rules: PathRules,
    pub remote: Arc<MemoryRemote>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_remote(MemoryRemote::new())
    }

    pub fn with_remote(remote: MemoryRemote) -> Self {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("vault");
        let state_dir = dir.path().join("state");
        std::fs::create_dir_all(&root).unwrap();

        Self {
            _dir: dir,
            root,
            state_dir,
            rules: PathRules::default(),
            remote: Arc::new(remote),
        }
    }

    pub fn fs_store(&self) -> FsLocalStore {
        FsLocalStore::new(&self.root, self.rules.clone())
    }

    pub fn faulty_store(&self) -> Arc<FaultyLocal> {
        Arc::new(FaultyLocal::new(self.fs_store()))
    }

    pub async fn orchestrator(&self) -> SyncOrchestrator {
        self.orchestrator_with(Arc::new(self.fs_store())).await
    }

    pub async fn orchestrator_with(&self, local: Arc<dyn LocalStore>) -> SyncOrchestrator {
        let config = SyncConfig::new(&self.state_dir).with_rules(self.rules.clone());
        SyncOrchestrator::new(config, local, self.remote.clone())
            .await
            .unwrap()
    }

    /// One sync through a fresh orchestrator over the plain filesystem store
    pub async fn sync(&self) -> Result<SyncReport> {
        self.orchestrator().await.sync().await
    }

    pub fn write(&self, path: &str, content: &str) {
        let file = self.root.join(path);
        if let Some(parent) = file.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(file, content).unwrap();
    }

    pub fn remove(&self, path: &str) {
        std::fs::remove_file(self.root.join(path)).unwrap();
    }

    pub fn read(&self, path: &str) -> Option<String> {
        std::fs::read_to_string(self.root.join(path)).ok()
    }

    pub fn quarantined(&self, path: &str) -> Option<String> {
        self.read(&self.rules.quarantine_path(path))
    }

    pub fn remote_text(&self, path: &str) -> Option<String> {
        self.remote
            .file(path)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
    }

    pub fn cache_path(&self) -> PathBuf {
        self.state_dir.join(CACHE_FILE_NAME)
    }

    pub fn cache_bytes(&self) -> Option<Vec<u8>> {
        std::fs::read(self.cache_path()).ok()
    }

    pub async fn cache(&self) -> SyncCache {
        CacheFile::in_dir(&self.state_dir).load().await.unwrap()
    }

    pub async fn write_cache(&self, cache: &SyncCache) {
        CacheFile::in_dir(&self.state_dir)
            .persist(cache)
            .await
            .unwrap();
    }
}

pub fn remote_with(files: &[(&str, &str)]) -> MemoryRemote {
    MemoryRemote::with_files(files.iter().map(|(p, c)| (*p, c.as_bytes())))
}

/// Local tree and remote hold the same files and the cache records them
pub async fn in_sync(files: &[(&str, &str)]) -> Harness {
    let harness = Harness::with_remote(remote_with(files));
    for (path, content) in files {
        harness.write(path, content);
    }
    let report = harness.sync().await.unwrap();
    assert!(report.unresolved.is_empty());
    assert!(report.cache_updated);
    harness
}

pub fn snapshot_paths(snapshot: &Snapshot) -> Vec<String> {
    snapshot.paths().cloned().collect()
}

pub fn exists(path: &Path) -> bool {
    std::fs::symlink_metadata(path).is_ok()
}

type ReadHook = Box<dyn FnOnce() + Send>;

/// Filesystem store with switchable faults and hooks
pub struct FaultyLocal {
    inner: FsLocalStore,
    fail_stat: AtomicBool,
    fail_writes: AtomicBool,
    scan_gate: Mutex<Option<(Arc<Notify>, Arc<Semaphore>)>>,
    on_read: Mutex<Option<ReadHook>>,
}

impl FaultyLocal {
    pub fn new(inner: FsLocalStore) -> Self {
        Self {
            inner,
            fail_stat: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            scan_gate: Mutex::new(None),
            on_read: Mutex::new(None),
        }
    }

    /// Every existence check fails as a whole
    pub fn fail_stat(&self, fail: bool) {
        self.fail_stat.store(fail, Ordering::SeqCst);
    }

    /// Every content write fails
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// The next scan signals `started`, then waits for a permit on `release`
    pub fn hold_next_scan(&self) -> (Arc<Notify>, Arc<Semaphore>) {
        let started = Arc::new(Notify::new());
        let release = Arc::new(Semaphore::new(0));
        *self.scan_gate.lock().unwrap() = Some((started.clone(), release.clone()));
        (started, release)
    }

    /// Run `hook` before the next content read
    pub fn before_next_read(&self, hook: impl FnOnce() + Send + 'static) {
        *self.on_read.lock().unwrap() = Some(Box::new(hook));
    }
}

#[async_trait]
impl LocalStore for FaultyLocal {
    async fn read_snapshot(&self) -> Result<Snapshot> {
        let gate = self.scan_gate.lock().unwrap().take();
        if let Some((started, release)) = gate {
            started.notify_one();
            let _permit = release.acquire().await.unwrap();
        }
        self.inner.read_snapshot().await
    }

    async fn read_content(&self, path: &str) -> Result<Bytes> {
        let hook = self.on_read.lock().unwrap().take();
        if let Some(hook) = hook {
            hook();
        }
        self.inner.read_content(path).await
    }

    async fn write_content(&self, path: &str, content: Bytes) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(SyncError::filesystem(
                "write file",
                path,
                std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            ));
        }
        self.inner.write_content(path, content).await
    }

    async fn delete(&self, path: &str) -> Result<()> {
        self.inner.delete(path).await
    }

    async fn stat_batch(&self, paths: &[String]) -> Result<HashMap<String, Existence>> {
        if self.fail_stat.load(Ordering::SeqCst) {
            return Err(SyncError::filesystem(
                "stat files",
                format!("{} paths", paths.len()),
                std::io::Error::new(std::io::ErrorKind::PermissionDenied, "stat denied"),
            ));
        }
        self.inner.stat_batch(paths).await
    }
}
