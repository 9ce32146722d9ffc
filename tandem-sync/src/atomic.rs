//! Atomic file replacement for crash safety
//!
//! Content goes to a sibling temp file which is synced and then renamed over
//! the target, so readers observe either the old or the new file, never a mix.

use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::errors::{Result, SyncError};
use crate::rules::TEMP_MARKER;

fn fs_err(operation: &str, path: &Path, e: std::io::Error) -> SyncError {
    SyncError::filesystem(operation, path.display().to_string(), e)
}

/// Atomic file writer with crash safety guarantees
pub struct AtomicWriter {
    final_path: PathBuf,
    temp_path: PathBuf,
    file: Option<fs::File>,
    bytes_written: u64,
}

impl AtomicWriter {
    /// Create a writer that will replace `path` on commit
    pub async fn new(path: impl AsRef<Path>) -> Result<Self> {
        let final_path = path.as_ref().to_path_buf();
        let temp_path = temp_path_for(&final_path);

        if let Some(parent) = temp_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| fs_err("create directory", parent, e))?;
        }

        let file = fs::File::create(&temp_path)
            .await
            .map_err(|e| fs_err("create temp file", &temp_path, e))?;

        Ok(Self {
            final_path,
            temp_path,
            file: Some(file),
            bytes_written: 0,
        })
    }

    pub async fn write(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| SyncError::unknown("atomic writer already finalized"))?;
        file.write_all(data)
            .await
            .map_err(|e| fs_err("write", &self.temp_path, e))?;
        self.bytes_written += data.len() as u64;
        Ok(())
    }

    /// Sync the temp file, rename it into place and sync the directory entry
    pub async fn commit(mut self) -> Result<u64> {
        let mut file = self
            .file
            .take()
            .ok_or_else(|| SyncError::unknown("atomic writer already finalized"))?;

        let synced = async {
            file.flush().await?;
            file.sync_all().await
        }
        .await;
        drop(file);
        if let Err(e) = synced {
            self.cleanup().await;
            return Err(fs_err("sync", &self.temp_path, e));
        }

        if let Err(e) = fs::rename(&self.temp_path, &self.final_path).await {
            self.cleanup().await;
            return Err(fs_err("rename", &self.final_path, e));
        }

        sync_parent(&self.final_path).await;

        debug!(
            "Committed atomic write: {} bytes to {}",
            self.bytes_written,
            self.final_path.display()
        );
        Ok(self.bytes_written)
    }

    /// Discard the temp file
    pub async fn abort(mut self) {
        self.file.take();
        self.cleanup().await;
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    async fn cleanup(&self) {
        if let Err(e) = fs::remove_file(&self.temp_path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    "Failed to cleanup temp file {}: {}",
                    self.temp_path.display(),
                    e
                );
            }
        }
    }
}

/// Replace `path` with `data` in one step
pub async fn write_atomic(path: impl AsRef<Path>, data: &[u8]) -> Result<u64> {
    let mut writer = AtomicWriter::new(path).await?;
    if let Err(e) = writer.write(data).await {
        writer.abort().await;
        return Err(e);
    }
    writer.commit().await
}

/// Hidden sibling name carrying the temp marker, e.g. `.note.md.tandem-tmp.<uuid>`
fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp_name = format!(
        ".{}{}{}",
        name,
        TEMP_MARKER,
        uuid::Uuid::new_v4().simple()
    );
    path.with_file_name(temp_name)
}

#[cfg(unix)]
async fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        match fs::File::open(parent).await {
            Ok(dir) => {
                if let Err(e) = dir.sync_all().await {
                    debug!("Directory sync failed for {}: {}", parent.display(), e);
                }
            }
            Err(e) => debug!("Could not open {} for sync: {}", parent.display(), e),
        }
    }
}

#[cfg(not(unix))]
async fn sync_parent(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::PathRules;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_atomic_writer() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");

        let mut writer = AtomicWriter::new(&test_file).await.unwrap();
        writer.write(b"Hello, ").await.unwrap();
        writer.write(b"World!").await.unwrap();

        // Not visible until commit
        assert!(!test_file.exists());

        let written = writer.commit().await.unwrap();
        assert_eq!(written, 13);
        let content = fs::read_to_string(&test_file).await.unwrap();
        assert_eq!(content, "Hello, World!");
    }

    #[tokio::test]
    async fn test_atomic_writer_abort() {
        let temp_dir = TempDir::new().unwrap();
        let test_file = temp_dir.path().join("test.txt");
        fs::write(&test_file, b"original").await.unwrap();

        let mut writer = AtomicWriter::new(&test_file).await.unwrap();
        writer.write(b"This should be discarded").await.unwrap();
        writer.abort().await;

        let content = fs::read_to_string(&test_file).await.unwrap();
        assert_eq!(content, "original");
        let mut entries = fs::read_dir(temp_dir.path()).await.unwrap();
        let mut count = 0;
        while entries.next_entry().await.unwrap().is_some() {
            count += 1;
        }
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_write_atomic_creates_parents() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("a/b/c.json");
        write_atomic(&nested, b"{}").await.unwrap();
        assert_eq!(fs::read(&nested).await.unwrap(), b"{}");
    }

    #[test]
    fn test_temp_names_are_excluded_from_sync() {
        let temp = temp_path_for(Path::new("/root/notes/a.md"));
        let name = temp.file_name().unwrap().to_str().unwrap().to_string();
        assert!(name.starts_with(".a.md"));
        assert!(PathRules::new("q", vec![]).is_excluded(&format!("notes/{}", name)));
    }
}
