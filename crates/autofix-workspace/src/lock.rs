//! Workspace lock file
//!
//! `.autofix.lock` at the workspace root marks a mutating cycle in progress.
//! It is created with `create_new`, so two acquirers can never both succeed,
//! and removed when the [`WorkspaceLock`] guard drops. Old locks are reported
//! as stale but never broken automatically.

use crate::error::WorkspaceError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Lock file name at the workspace root
pub const LOCK_FILE: &str = ".autofix.lock";

/// Contents of the lock file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    /// Locked workspace
    pub workspace: PathBuf,
    /// Acquisition time
    pub locked_at: DateTime<Utc>,
    /// Holder process id
    pub pid: u32,
}

impl LockInfo {
    /// Whether the lock is older than `stale_after`
    #[must_use]
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        (Utc::now() - self.locked_at)
            .to_std()
            .is_ok_and(|age| age > stale_after)
    }
}

/// Held workspace lock; released on drop
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
    info: LockInfo,
    released: bool,
}

impl WorkspaceLock {
    /// Acquire the lock for `workspace`
    ///
    /// # Errors
    /// Returns `WorkspaceError::Locked` immediately when another holder exists,
    /// or an I/O error if the lock file cannot be written
    pub fn acquire(workspace: &Path) -> Result<Self, WorkspaceError> {
        let path = lock_path(workspace);
        let info = LockInfo {
            workspace: workspace.to_path_buf(),
            locked_at: Utc::now(),
            pid: std::process::id(),
        };

        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = Self::inspect(workspace)?.unwrap_or_else(|| LockInfo {
                    workspace: workspace.to_path_buf(),
                    locked_at: Utc::now(),
                    pid: 0,
                });
                return Err(WorkspaceError::Locked { holder });
            }
            Err(e) => return Err(WorkspaceError::io(&path, e)),
        };

        let json = serde_json::to_vec_pretty(&info)?;
        if let Err(e) = file.write_all(&json) {
            let _ = fs::remove_file(&path);
            return Err(WorkspaceError::io(&path, e));
        }

        tracing::debug!(workspace = %workspace.display(), "workspace locked");
        Ok(Self {
            path,
            info,
            released: false,
        })
    }

    /// Read the current lock, if any
    ///
    /// A lock file that cannot be parsed (e.g. mid-write) is reported with
    /// pid 0 and its modification time.
    ///
    /// # Errors
    /// Returns error if the file exists but cannot be read
    pub fn inspect(workspace: &Path) -> Result<Option<LockInfo>, WorkspaceError> {
        let path = lock_path(workspace);
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(WorkspaceError::io(&path, e)),
        };
        if let Ok(info) = serde_json::from_slice(&bytes) {
            return Ok(Some(info));
        }
        let locked_at = fs::metadata(&path)
            .and_then(|m| m.modified())
            .map_or_else(|_| Utc::now(), DateTime::<Utc>::from);
        Ok(Some(LockInfo {
            workspace: workspace.to_path_buf(),
            locked_at,
            pid: 0,
        }))
    }

    /// Lock details
    #[inline]
    #[must_use]
    pub fn info(&self) -> &LockInfo {
        &self.info
    }

    /// Lock file path
    #[inline]
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Release explicitly, surfacing removal errors
    ///
    /// # Errors
    /// Returns error if the lock file cannot be removed
    pub fn release(mut self) -> Result<(), WorkspaceError> {
        self.released = true;
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(WorkspaceError::io(&self.path, e)),
        }
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        match fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "workspace unlocked"),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.path.display(), error = %e, "failed to remove lock file"),
        }
    }
}

/// Lock file location for a workspace
#[must_use]
pub fn lock_path(workspace: &Path) -> PathBuf {
    workspace.join(LOCK_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_acquire_fails_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let held = WorkspaceLock::acquire(dir.path()).unwrap();

        let err = WorkspaceLock::acquire(dir.path()).unwrap_err();
        assert!(err.is_lock_contention());
        match err {
            WorkspaceError::Locked { holder } => assert_eq!(holder.pid, std::process::id()),
            other => panic!("unexpected error {other:?}"),
        }
        drop(held);
        assert!(WorkspaceLock::acquire(dir.path()).is_ok());
    }

    #[test]
    fn drop_removes_lock_file() {
        let dir = tempfile::tempdir().unwrap();
        {
            let lock = WorkspaceLock::acquire(dir.path()).unwrap();
            assert!(lock.path().exists());
            assert_eq!(
                WorkspaceLock::inspect(dir.path()).unwrap().as_ref(),
                Some(lock.info())
            );
        }
        assert!(!lock_path(dir.path()).exists());
        assert!(WorkspaceLock::inspect(dir.path()).unwrap().is_none());
    }

    #[test]
    fn staleness_is_age_based() {
        let info = LockInfo {
            workspace: PathBuf::from("/ws"),
            locked_at: Utc::now() - chrono::Duration::hours(3),
            pid: 42,
        };
        assert!(info.is_stale(Duration::from_secs(3600)));
        assert!(!info.is_stale(Duration::from_secs(4 * 3600)));
    }

    #[test]
    fn garbage_lock_file_still_blocks() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(lock_path(dir.path()), "not json").unwrap();
        let err = WorkspaceLock::acquire(dir.path()).unwrap_err();
        assert!(err.is_lock_contention());
    }
}
