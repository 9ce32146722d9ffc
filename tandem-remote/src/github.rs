//! Remote store backed by the GitHub Git Data API
//!
//! A push is one commit: blobs, a tree on top of the base tree, a commit with
//! the observed head as its only parent, and a non-forced ref update. The ref
//! update fails if the branch moved, so concurrent writers never lose commits.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt, TryStreamExt};
use reqwest::{Client, Method};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use tandem_sync::errors::{Result, SyncError};
use tandem_sync::model::{ContentHash, RevisionId, Snapshot};
use tandem_sync::store::{FileWrite, RemoteCommit, RemoteStore};

use crate::retry::RetryPolicy;
use crate::wire::{
    classify_status, BlobResponse, CallKind, CommitResponse, CreateBlob, CreateCommit, CreateTree,
    GitObject, RefResponse, TreeItem, TreeResponse, UpdateRef, MODE_SYMLINK,
};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const BLOB_UPLOAD_CONCURRENCY: usize = 4;

/// Connection settings for a GitHub repository branch
#[derive(Debug, Clone)]
pub struct GitHubConfig {
    pub api_base: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub token: Option<String>,
    pub commit_message: String,
    pub retry: RetryPolicy,
}

impl GitHubConfig {
    pub fn new(
        owner: impl Into<String>,
        repo: impl Into<String>,
        branch: impl Into<String>,
    ) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            owner: owner.into(),
            repo: repo.into(),
            branch: branch.into(),
            token: None,
            commit_message: "tandem sync".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Remote tree of one branch in one repository
pub struct GitHubRemote {
    client: Client,
    config: GitHubConfig,
    /// Snapshots by revision; the entry hash is the git blob sha
    trees: RwLock<HashMap<RevisionId, Arc<Snapshot>>>,
}

impl GitHubRemote {
    pub fn new(config: GitHubConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("tandem/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::unknown("failed to create HTTP client").with_source(e))?;

        Ok(Self {
            client,
            config,
            trees: RwLock::new(HashMap::new()),
        })
    }

    fn url(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path
        )
    }

    /// One HTTP exchange, no retries
    async fn call<B, T>(
        &self,
        method: Method,
        url: &str,
        body: Option<&B>,
        kind: CallKind,
    ) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let mut request = self
            .client
            .request(method.clone(), url)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28");
        if let Some(token) = &self.config.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await.map_err(|e| {
            SyncError::network(format!("{} {} failed: {}", method, url, e)).with_source(e)
        })?;

        let status = response.status();
        if !status.is_success() {
            let remaining = response
                .headers()
                .get("x-ratelimit-remaining")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(
                status.as_u16(),
                remaining.as_deref(),
                kind,
                &body,
            ));
        }

        response.json::<T>().await.map_err(|e| {
            SyncError::unknown(format!("malformed response from {}", url)).with_source(e)
        })
    }

    async fn get<T: DeserializeOwned>(&self, operation: &str, url: String) -> Result<T> {
        self.config
            .retry
            .retry(operation, || {
                self.call::<(), T>(Method::GET, &url, None, CallKind::Read)
            })
            .await
    }

    /// Content-addressed creation; repeating it yields the same object
    async fn create<B: Serialize, T: DeserializeOwned>(
        &self,
        operation: &str,
        url: String,
        body: &B,
    ) -> Result<T> {
        self.config
            .retry
            .retry(operation, || {
                self.call(Method::POST, &url, Some(body), CallKind::Write)
            })
            .await
    }

    async fn commit_tree_sha(&self, revision: &RevisionId) -> Result<String> {
        let commit: CommitResponse = self
            .get("get commit", self.url(&format!("git/commits/{}", revision)))
            .await?;
        Ok(commit.tree.sha)
    }

    async fn fetch_snapshot(&self, revision: &RevisionId) -> Result<Arc<Snapshot>> {
        if let Some(snapshot) = self.trees.read().await.get(revision) {
            return Ok(snapshot.clone());
        }

        let tree_sha = self.commit_tree_sha(revision).await?;
        let tree: TreeResponse = self
            .get(
                "get tree",
                self.url(&format!("git/trees/{}?recursive=1", tree_sha)),
            )
            .await?;

        if tree.truncated {
            return Err(SyncError::unknown(format!(
                "tree {} at {} is truncated; repository too large for a recursive listing",
                tree.sha, revision
            ))
            .during("read remote snapshot"));
        }

        let snapshot: Snapshot = tree
            .tree
            .into_iter()
            .filter(|entry| {
                if entry.kind != "blob" {
                    return false;
                }
                if entry.mode == MODE_SYMLINK {
                    debug!("Skipping remote symlink {}", entry.path);
                    return false;
                }
                true
            })
            .map(|entry| (entry.path, ContentHash::new(entry.sha)))
            .collect();

        debug!("Fetched remote tree {}: {} files", revision, snapshot.len());
        let snapshot = Arc::new(snapshot);
        self.trees
            .write()
            .await
            .insert(revision.clone(), snapshot.clone());
        Ok(snapshot)
    }

    async fn upload_blob(&self, write: FileWrite) -> Result<(String, String)> {
        let created: GitObject = self
            .create(
                "create blob",
                self.url("git/blobs"),
                &CreateBlob::new(&write.content),
            )
            .await?;
        Ok((write.path, created.sha))
    }
}

#[async_trait]
impl RemoteStore for GitHubRemote {
    async fn current_revision(&self) -> Result<RevisionId> {
        let reference: RefResponse = self
            .get(
                "get branch ref",
                self.url(&format!("git/ref/heads/{}", self.config.branch)),
            )
            .await?;
        Ok(RevisionId::new(reference.object.sha))
    }

    async fn read_snapshot_at(&self, revision: &RevisionId) -> Result<Snapshot> {
        Ok(self.fetch_snapshot(revision).await?.as_ref().clone())
    }

    async fn read_content(&self, revision: &RevisionId, path: &str) -> Result<Bytes> {
        let snapshot = self.fetch_snapshot(revision).await?;
        let sha = snapshot.get(path).ok_or_else(|| {
            SyncError::remote_not_found(format!("{} not present at {}", path, revision))
        })?;
        let blob: BlobResponse = self
            .get("get blob", self.url(&format!("git/blobs/{}", sha)))
            .await?;
        Ok(Bytes::from(blob.decode()?))
    }

    async fn apply_changes(
        &self,
        base: &RevisionId,
        writes: Vec<FileWrite>,
        deletes: Vec<String>,
    ) -> Result<RemoteCommit> {
        let base_snapshot = self.fetch_snapshot(base).await?;
        let base_tree = self.commit_tree_sha(base).await?;

        let uploaded: Vec<(String, String)> =
            stream::iter(writes.into_iter().map(|w| self.upload_blob(w)))
                .buffered(BLOB_UPLOAD_CONCURRENCY)
                .try_collect()
                .await?;

        let mut snapshot = base_snapshot.as_ref().clone();
        let mut items = Vec::with_capacity(uploaded.len() + deletes.len());
        for (path, sha) in &uploaded {
            snapshot.insert(path.clone(), ContentHash::new(sha.clone()));
            items.push(TreeItem::blob(path.clone(), sha.clone()));
        }
        for path in deletes {
            // Deleting a path missing from the base tree is rejected by the API
            if snapshot.remove(&path).is_some() {
                items.push(TreeItem::delete(path));
            }
        }

        let tree: GitObject = self
            .create(
                "create tree",
                self.url("git/trees"),
                &CreateTree {
                    base_tree,
                    tree: items,
                },
            )
            .await?;

        let commit: GitObject = self
            .call(
                Method::POST,
                &self.url("git/commits"),
                Some(&CreateCommit {
                    message: self.config.commit_message.clone(),
                    tree: tree.sha,
                    parents: vec![base.to_string()],
                }),
                CallKind::Write,
            )
            .await
            .map_err(|e| e.during("create commit"))?;

        let _: RefResponse = self
            .call(
                Method::PATCH,
                &self.url(&format!("git/refs/heads/{}", self.config.branch)),
                Some(&UpdateRef {
                    sha: commit.sha.clone(),
                    force: false,
                }),
                CallKind::RefUpdate,
            )
            .await
            .map_err(|e| e.during("update branch ref"))?;

        let revision = RevisionId::new(commit.sha);
        info!(
            "Pushed {} to {}/{}@{}",
            revision, self.config.owner, self.config.repo, self.config.branch
        );
        self.trees
            .write()
            .await
            .insert(revision.clone(), Arc::new(snapshot.clone()));

        Ok(RemoteCommit { revision, snapshot })
    }
}
