//! Durable sync cache
//!
//! The cache is one JSON document holding the local snapshot, the remote
//! revision and the remote snapshot from the last successful sync. It is
//! replaced atomically so a crash leaves either the old or the new cache.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use crate::atomic::write_atomic;
use crate::errors::{Result, SyncError};
use crate::model::SyncCache;

/// File name of the cache inside the state directory
pub const CACHE_FILE_NAME: &str = "cache.json";

/// Loads and persists the [`SyncCache`]
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Cache stored under the standard name in `state_dir`
    pub fn in_dir(state_dir: impl AsRef<Path>) -> Self {
        Self::new(state_dir.as_ref().join(CACHE_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last persisted cache; an empty cache when none was ever written
    pub async fn load(&self) -> Result<SyncCache> {
        let data = match fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No sync cache at {}, starting fresh", self.path.display());
                return Ok(SyncCache::default());
            }
            Err(e) => {
                return Err(SyncError::filesystem(
                    "read cache",
                    self.path.display().to_string(),
                    e,
                ))
            }
        };

        let cache: SyncCache = serde_json::from_slice(&data)
            .map_err(|e| SyncError::from(e).during("load cache"))?;

        if cache.schema_version != SyncCache::SCHEMA_VERSION {
            return Err(SyncError::unknown(format!(
                "cache {} has schema version {}, expected {}",
                self.path.display(),
                cache.schema_version,
                SyncCache::SCHEMA_VERSION
            )));
        }

        debug!(
            "Loaded sync cache: {} local entries, {} remote entries, revision {:?}",
            cache.local_snapshot.len(),
            cache.remote_snapshot.len(),
            cache.remote_revision
        );
        Ok(cache)
    }

    /// Atomically replace the stored cache
    pub async fn persist(&self, cache: &SyncCache) -> Result<()> {
        let json = serde_json::to_vec_pretty(cache)?;
        write_atomic(&self.path, &json).await?;
        debug!("Saved sync cache to: {:?}", self.path);
        Ok(())
    }
}
