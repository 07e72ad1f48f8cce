//! Error types for workspace operations

use crate::hash::HashError;
use crate::lock::LockInfo;
use std::path::PathBuf;

/// Workspace error type
#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    /// Filesystem operation failed
    #[error("i/o error at {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Directory walk failed
    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    /// Manifest or lock encoding failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid content hash
    #[error("hash error: {0}")]
    Hash(#[from] HashError),

    /// Invalid include/exclude pattern
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        /// Offending pattern
        pattern: String,
        /// Parser error
        #[source]
        source: globset::Error,
    },

    /// Path is not a directory
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// No backup with that name
    #[error("backup not found: {0}")]
    BackupNotFound(String),

    /// Backup manifest references missing or damaged content
    #[error("backup {name} is corrupt: {reason}")]
    CorruptBackup {
        /// Backup name
        name: String,
        /// What is wrong
        reason: String,
    },

    /// Another process holds the workspace lock
    #[error("workspace {} is locked by pid {} since {}", .holder.workspace.display(), .holder.pid, .holder.locked_at)]
    Locked {
        /// Current lock holder
        holder: LockInfo,
    },
}

impl WorkspaceError {
    /// Wrap an I/O error with its path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error is lock contention
    #[inline]
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(self, Self::Locked { .. })
    }
}
