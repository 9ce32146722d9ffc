//! Error types for sync operations

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Boxed underlying cause attached to an error
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Coarse category of a sync failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Transport-level failure reaching the remote
    Network,
    /// Authentication or authorization rejected by the remote
    RemoteAccess,
    /// Referenced branch or repository does not exist
    RemoteNotFound,
    /// Local read/write/delete failure
    Filesystem,
    /// Re-entrancy guard tripped
    AlreadySyncing,
    /// Uncategorized
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::RemoteAccess => "remote_access",
            ErrorKind::RemoteNotFound => "remote_not_found",
            ErrorKind::Filesystem => "filesystem",
            ErrorKind::AlreadySyncing => "already_syncing",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn during(operation: &Option<String>) -> String {
    match operation {
        Some(op) => format!(" during {}", op),
        None => String::new(),
    }
}

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Network error{}: {detail}", during(.operation))]
    Network {
        detail: String,
        operation: Option<String>,
        retryable: bool,
        #[source]
        source: Option<BoxError>,
    },

    #[error("Remote access denied{}: {detail}", during(.operation))]
    RemoteAccess {
        detail: String,
        operation: Option<String>,
    },

    #[error("Remote not found{}: {detail}", during(.operation))]
    RemoteNotFound {
        detail: String,
        operation: Option<String>,
    },

    #[error("Filesystem error during {operation} on {path}: {source}")]
    Filesystem {
        path: String,
        operation: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sync already in progress")]
    AlreadySyncing,

    #[error("Sync failed{}: {detail}", during(.operation))]
    Unknown {
        detail: String,
        operation: Option<String>,
        #[source]
        source: Option<BoxError>,
    },
}

impl SyncError {
    /// Transient network failure, safe to retry
    pub fn network(detail: impl Into<String>) -> Self {
        SyncError::Network {
            detail: detail.into(),
            operation: None,
            retryable: true,
            source: None,
        }
    }

    /// Network failure that must not be retried blindly
    pub fn network_fatal(detail: impl Into<String>) -> Self {
        SyncError::Network {
            detail: detail.into(),
            operation: None,
            retryable: false,
            source: None,
        }
    }

    pub fn remote_access(detail: impl Into<String>) -> Self {
        SyncError::RemoteAccess {
            detail: detail.into(),
            operation: None,
        }
    }

    pub fn remote_not_found(detail: impl Into<String>) -> Self {
        SyncError::RemoteNotFound {
            detail: detail.into(),
            operation: None,
        }
    }

    pub fn filesystem(
        operation: impl Into<String>,
        path: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        SyncError::Filesystem {
            path: path.into(),
            operation: operation.into(),
            source,
        }
    }

    pub fn unknown(detail: impl Into<String>) -> Self {
        SyncError::Unknown {
            detail: detail.into(),
            operation: None,
            source: None,
        }
    }

    /// Attach an underlying cause to a network or unknown error
    pub fn with_source(mut self, cause: impl Into<BoxError>) -> Self {
        match &mut self {
            SyncError::Network { source, .. } | SyncError::Unknown { source, .. } => {
                *source = Some(cause.into());
            }
            _ => {}
        }
        self
    }

    /// Record the originating operation unless one is already set
    pub fn during(mut self, op: &str) -> Self {
        match &mut self {
            SyncError::Network { operation, .. }
            | SyncError::RemoteAccess { operation, .. }
            | SyncError::RemoteNotFound { operation, .. }
            | SyncError::Unknown { operation, .. } => {
                if operation.is_none() {
                    *operation = Some(op.to_string());
                }
            }
            SyncError::Filesystem { .. } | SyncError::AlreadySyncing => {}
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::Network { .. } => ErrorKind::Network,
            SyncError::RemoteAccess { .. } => ErrorKind::RemoteAccess,
            SyncError::RemoteNotFound { .. } => ErrorKind::RemoteNotFound,
            SyncError::Filesystem { .. } => ErrorKind::Filesystem,
            SyncError::AlreadySyncing => ErrorKind::AlreadySyncing,
            SyncError::Unknown { .. } => ErrorKind::Unknown,
        }
    }

    /// Name of the operation that failed, if known
    pub fn operation(&self) -> Option<&str> {
        match self {
            SyncError::Network { operation, .. }
            | SyncError::RemoteAccess { operation, .. }
            | SyncError::RemoteNotFound { operation, .. }
            | SyncError::Unknown { operation, .. } => operation.as_deref(),
            SyncError::Filesystem { operation, .. } => Some(operation),
            SyncError::AlreadySyncing => None,
        }
    }

    /// Whether a whole new sync attempt (or a request retry) may succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::AlreadySyncing => true,
            _ => false,
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        SyncError::unknown(format!("serialization failed: {}", e)).with_source(e)
    }
}

impl From<rusqlite::Error> for SyncError {
    fn from(e: rusqlite::Error) -> Self {
        SyncError::unknown(format!("journal database error: {}", e)).with_source(e)
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(e: tokio::task::JoinError) -> Self {
        SyncError::unknown(format!("background task failed: {}", e)).with_source(e)
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
