//! GitHub Git Data API payloads and response classification

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};

use tandem_sync::errors::SyncError;

/// Mode of a regular, non-executable file
pub const MODE_FILE: &str = "100644";
/// Mode of a symbolic link; not synchronized
pub const MODE_SYMLINK: &str = "120000";

#[derive(Debug, Deserialize)]
pub struct GitObject {
    pub sha: String,
}

/// `GET git/ref/heads/{branch}`
#[derive(Debug, Deserialize)]
pub struct RefResponse {
    pub object: GitObject,
}

/// `GET git/commits/{sha}`
#[derive(Debug, Deserialize)]
pub struct CommitResponse {
    pub sha: String,
    pub tree: GitObject,
}

#[derive(Debug, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub sha: String,
}

/// `GET git/trees/{sha}?recursive=1`
#[derive(Debug, Deserialize)]
pub struct TreeResponse {
    pub sha: String,
    #[serde(default)]
    pub truncated: bool,
    pub tree: Vec<TreeEntry>,
}

/// `GET git/blobs/{sha}`
#[derive(Debug, Deserialize)]
pub struct BlobResponse {
    pub content: String,
    pub encoding: String,
}

impl BlobResponse {
    pub fn decode(&self) -> Result<Vec<u8>, SyncError> {
        match self.encoding.as_str() {
            "base64" => {
                // GitHub wraps base64 content at 60 columns
                let compact: String = self
                    .content
                    .chars()
                    .filter(|c| !c.is_ascii_whitespace())
                    .collect();
                STANDARD.decode(compact).map_err(|e| {
                    SyncError::unknown(format!("invalid base64 blob content: {}", e)).with_source(e)
                })
            }
            "utf-8" => Ok(self.content.clone().into_bytes()),
            other => Err(SyncError::unknown(format!(
                "unsupported blob encoding: {}",
                other
            ))),
        }
    }
}

/// `POST git/blobs`
#[derive(Debug, Serialize)]
pub struct CreateBlob {
    pub content: String,
    pub encoding: &'static str,
}

impl CreateBlob {
    pub fn new(content: &[u8]) -> Self {
        Self {
            content: STANDARD.encode(content),
            encoding: "base64",
        }
    }
}

/// One entry of `POST git/trees`. A `None` sha deletes the path.
#[derive(Debug, Serialize)]
pub struct TreeItem {
    pub path: String,
    pub mode: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sha: Option<String>,
}

impl TreeItem {
    pub fn blob(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: MODE_FILE,
            kind: "blob",
            sha: Some(sha.into()),
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: MODE_FILE,
            kind: "blob",
            sha: None,
        }
    }
}

/// `POST git/trees`
#[derive(Debug, Serialize)]
pub struct CreateTree {
    pub base_tree: String,
    pub tree: Vec<TreeItem>,
}

/// `POST git/commits`
#[derive(Debug, Serialize)]
pub struct CreateCommit {
    pub message: String,
    pub tree: String,
    pub parents: Vec<String>,
}

/// `PATCH git/refs/heads/{branch}`
#[derive(Debug, Serialize)]
pub struct UpdateRef {
    pub sha: String,
    pub force: bool,
}

/// Which call produced a failing status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Read,
    Write,
    RefUpdate,
}

/// Map a non-success HTTP status to a sync error
pub fn classify_status(
    status: u16,
    ratelimit_remaining: Option<&str>,
    call: CallKind,
    body: &str,
) -> SyncError {
    let detail = format!("HTTP {}: {}", status, summarize(body));
    match status {
        403 if ratelimit_remaining.map(str::trim) == Some("0") => {
            SyncError::network(format!("rate limited, {}", detail))
        }
        401 | 403 => SyncError::remote_access(detail),
        404 => SyncError::remote_not_found(detail),
        409 | 422 if call == CallKind::RefUpdate => {
            SyncError::network(format!("branch ref moved during push, {}", detail))
        }
        408 | 429 => SyncError::network(detail),
        500..=599 => SyncError::network(detail),
        _ => SyncError::unknown(detail),
    }
}

/// Error message from a GitHub error body, or the raw body trimmed
fn summarize(body: &str) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        message: String,
    }
    match serde_json::from_str::<ErrorBody>(body) {
        Ok(parsed) => parsed.message,
        Err(_) => body.chars().take(200).collect(),
    }
}
