//! Filesystem-backed local store

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::{fs, task};
use tracing::{debug, info, trace, warn};
use walkdir::WalkDir;

use tandem_sync::atomic::write_atomic;
use tandem_sync::errors::{Result, SyncError};
use tandem_sync::model::{ContentHash, Existence, Snapshot};
use tandem_sync::rules::PathRules;
use tandem_sync::store::LocalStore;

use crate::paths::{key_to_path, normalize, path_key};

/// Local store over a directory tree
pub struct FsLocalStore {
    root: PathBuf,
    rules: PathRules,
    /// Key -> on-disk path as seen by the last scan, for names stored un-normalized
    on_disk: Arc<RwLock<HashMap<String, PathBuf>>>,
}

impl FsLocalStore {
    pub fn new(root: impl Into<PathBuf>, rules: PathRules) -> Self {
        Self {
            root: root.into(),
            rules,
            on_disk: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn rules(&self) -> &PathRules {
        &self.rules
    }

    async fn resolve(&self, key: &str) -> Result<PathBuf> {
        if let Some(path) = self.on_disk.read().await.get(key) {
            return Ok(path.clone());
        }
        key_to_path(&self.root, key).map_err(|e| SyncError::filesystem("resolve", key, e))
    }

    /// Remove empty directories between `path` and the root
    async fn prune_empty_parents(&self, path: &Path) {
        let mut current = path.parent();
        while let Some(dir) = current {
            if dir == self.root || !dir.starts_with(&self.root) {
                break;
            }
            if fs::remove_dir(dir).await.is_err() {
                break;
            }
            trace!("Pruned empty directory {}", dir.display());
            current = dir.parent();
        }
    }
}

#[async_trait]
impl LocalStore for FsLocalStore {
    async fn read_snapshot(&self) -> Result<Snapshot> {
        let root = self.root.clone();
        let rules = self.rules.clone();

        let (snapshot, on_disk) = task::spawn_blocking(move || scan(&root, &rules)).await??;

        info!(
            "Scanned {}: {} tracked files",
            self.root.display(),
            snapshot.len()
        );
        *self.on_disk.write().await = on_disk;
        Ok(snapshot)
    }

    async fn read_content(&self, path: &str) -> Result<Bytes> {
        let file = self.resolve(path).await?;
        let data = fs::read(&file)
            .await
            .map_err(|e| SyncError::filesystem("read", path, e))?;
        Ok(Bytes::from(data))
    }

    async fn write_content(&self, path: &str, content: Bytes) -> Result<()> {
        let file = self.resolve(path).await?;
        write_atomic(&file, &content).await?;
        debug!("Wrote {} bytes to {}", content.len(), path);
        self.on_disk
            .write()
            .await
            .entry(path.to_string())
            .or_insert(file);
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let file = self.resolve(path).await?;
        match fs::remove_file(&file).await {
            Ok(()) => debug!("Deleted {}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Delete of {} skipped: already absent", path)
            }
            Err(e) => return Err(SyncError::filesystem("delete", path, e)),
        }
        self.on_disk.write().await.remove(path);
        self.prune_empty_parents(&file).await;
        Ok(())
    }

    async fn stat_batch(&self, paths: &[String]) -> Result<HashMap<String, Existence>> {
        let known = self.on_disk.read().await.clone();
        let root = self.root.clone();
        let paths = paths.to_vec();

        task::spawn_blocking(move || {
            let mut results = HashMap::with_capacity(paths.len());
            for key in paths {
                let path = match known.get(&key) {
                    Some(path) => path.clone(),
                    None => key_to_path(&root, &key)
                        .map_err(|e| SyncError::filesystem("stat", key.as_str(), e))?,
                };
                let existence = stat_one(&path)
                    .map_err(|e| SyncError::filesystem("stat", key.as_str(), e))?;
                results.insert(key, existence);
            }
            Ok::<_, SyncError>(results)
        })
        .await?
    }
}

/// Walk the tree, hashing every regular file not covered by the rules
fn scan(root: &Path, rules: &PathRules) -> Result<(Snapshot, HashMap<String, PathBuf>)> {
    let mut snapshot = Snapshot::new();
    let mut on_disk: HashMap<String, PathBuf> = HashMap::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| match path_key(root, entry.path()) {
            Some(key) => !rules.is_protected(&key),
            None => true,
        });

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_else(|| root.display().to_string());
                if e.io_error().map(|io| io.kind()) == Some(io::ErrorKind::NotFound) {
                    debug!("Entry vanished during scan: {}", path);
                    continue;
                }
                let io_error = e
                    .into_io_error()
                    .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, "filesystem loop"));
                return Err(SyncError::filesystem("scan", path, io_error));
            }
        };

        if !entry.file_type().is_file() {
            continue;
        }

        let Some(key) = path_key(root, entry.path()) else {
            warn!("Skipping file with non UTF-8 name: {}", entry.path().display());
            continue;
        };

        if let Some(existing) = on_disk.get(&key) {
            warn!(
                "{} and {} normalize to the same key {}; keeping the first",
                existing.display(),
                entry.path().display(),
                key
            );
            continue;
        }

        let content = match std::fs::read(entry.path()) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("File vanished during scan: {}", key);
                continue;
            }
            Err(e) => return Err(SyncError::filesystem("read", key, e)),
        };

        snapshot.insert(key.clone(), ContentHash::compute(&key, &content));
        on_disk.insert(key, entry.into_path());
    }

    Ok((snapshot, on_disk))
}

/// Existence of one path. A missing entry is also looked up by its
/// normalized name among its siblings.
fn stat_one(path: &Path) -> io::Result<Existence> {
    match std::fs::symlink_metadata(path) {
        Ok(_) => return Ok(Existence::Exists),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }

    let (Some(parent), Some(name)) = (path.parent(), path.file_name().and_then(|n| n.to_str()))
    else {
        return Ok(Existence::Absent);
    };
    let wanted = normalize(name);

    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Existence::Absent),
        Err(e) => return Err(e),
    };
    for entry in entries {
        let entry = entry?;
        if let Some(sibling) = entry.file_name().to_str() {
            if normalize(sibling) == wanted {
                return Ok(Existence::Exists);
            }
        }
    }
    Ok(Existence::Absent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FsLocalStore {
        FsLocalStore::new(
            dir.path(),
            PathRules::new(".tandem-quarantine", vec![".git".into(), "*.tmp".into()]),
        )
    }

    #[tokio::test]
    async fn test_scan_hashes_tracked_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("notes")).unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::create_dir_all(dir.path().join(".tandem-quarantine")).unwrap();
        std::fs::write(dir.path().join("notes/a.md"), b"alpha").unwrap();
        std::fs::write(dir.path().join("top.md"), b"top").unwrap();
        std::fs::write(dir.path().join("scratch.tmp"), b"x").unwrap();
        std::fs::write(dir.path().join(".git/HEAD"), b"ref").unwrap();
        std::fs::write(dir.path().join(".tandem-quarantine/q.md"), b"q").unwrap();

        let snapshot = store(&dir).read_snapshot().await.unwrap();
        let paths: Vec<_> = snapshot.paths().cloned().collect();
        assert_eq!(paths, vec!["notes/a.md", "top.md"]);
        assert_eq!(
            snapshot.get("notes/a.md"),
            Some(&ContentHash::compute("notes/a.md", b"alpha"))
        );
    }

    #[tokio::test]
    async fn test_scan_normalizes_names() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("cafe\u{301}.md"), b"decomposed").unwrap();

        let store = store(&dir);
        let snapshot = store.read_snapshot().await.unwrap();
        assert!(snapshot.contains("caf\u{e9}.md"));

        let content = store.read_content("caf\u{e9}.md").await.unwrap();
        assert_eq!(&content[..], b"decomposed");
    }

    #[tokio::test]
    async fn test_write_and_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store
            .write_content("deep/nested/n.md", Bytes::from_static(b"hi"))
            .await
            .unwrap();
        assert_eq!(
            std::fs::read(dir.path().join("deep/nested/n.md")).unwrap(),
            b"hi"
        );

        store.delete("deep/nested/n.md").await.unwrap();
        assert!(!dir.path().join("deep").exists());
        assert!(dir.path().exists());

        // Already gone
        store.delete("deep/nested/n.md").await.unwrap();
    }

    #[tokio::test]
    async fn test_stat_batch() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("here.md"), b"1").unwrap();
        std::fs::write(dir.path().join("cafe\u{301}.md"), b"2").unwrap();
        let store = store(&dir);

        let results = store
            .stat_batch(&[
                "here.md".to_string(),
                "missing.md".to_string(),
                "nodir/missing.md".to_string(),
                "caf\u{e9}.md".to_string(),
            ])
            .await
            .unwrap();

        assert_eq!(results["here.md"], Existence::Exists);
        assert_eq!(results["missing.md"], Existence::Absent);
        assert_eq!(results["nodir/missing.md"], Existence::Absent);
        assert_eq!(results["caf\u{e9}.md"], Existence::Exists);
    }

    #[tokio::test]
    async fn test_rejects_escaping_keys() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.read_content("../outside").await.is_err());
        assert!(store
            .write_content("a/../../b", Bytes::from_static(b"x"))
            .await
            .is_err());
    }
}
