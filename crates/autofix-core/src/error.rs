//! Error types for the orchestrator
//!
//! One taxonomy for everything the remediation pipeline can surface:
//! - Configuration and file-operation failures
//! - Collaborator (model, scanner) failures
//! - Learning and workspace errors from the lower crates
//! - Remediation errors: lock contention, illegal transitions, unknown tasks

use crate::types::{SessionId, TaskId, TaskStatus};
use autofix_learning::LearningError;
use autofix_workspace::WorkspaceError;
use chrono::{DateTime, Utc};
use std::path::PathBuf;

/// Main orchestrator error type
#[derive(Debug, thiserror::Error)]
pub enum AutofixError {
    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),

    /// Reading or writing a workspace file failed
    #[error("file operation failed at {path}: {source}")]
    FileOperation {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A model collaborator (analyzer, fix generator, knowledge source) failed
    #[error("model error: {0}")]
    Model(String),

    /// The scanner or SAST analyzer failed
    #[error("scan error: {0}")]
    Scan(String),

    /// Sandbox evaluation could not be performed
    #[error("test error: {0}")]
    Test(String),

    /// Learning service failure
    #[error("learning error: {0}")]
    Learning(#[from] LearningError),

    /// Backup, discovery or lock failure
    #[error("workspace error: {0}")]
    Workspace(WorkspaceError),

    /// Remediation bookkeeping failure
    #[error(transparent)]
    Remediation(#[from] RemediationError),

    /// Operation cancelled by shutdown
    #[error("operation cancelled")]
    Cancelled,
}

impl AutofixError {
    /// Wrap an I/O error with its path
    pub fn file(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::FileOperation {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation later may succeed
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Model(_) | Self::Scan(_) | Self::Test(_) | Self::Cancelled => true,
            Self::Remediation(e) => matches!(e, RemediationError::WorkspaceLocked { .. }),
            Self::Learning(e) => e.is_training_failure(),
            _ => false,
        }
    }

    /// Whether the error is workspace lock contention
    #[inline]
    #[must_use]
    pub fn is_lock_contention(&self) -> bool {
        matches!(
            self,
            Self::Remediation(RemediationError::WorkspaceLocked { .. })
        )
    }
}

impl From<WorkspaceError> for AutofixError {
    fn from(e: WorkspaceError) -> Self {
        match e {
            WorkspaceError::Locked { holder } => Self::Remediation(RemediationError::WorkspaceLocked {
                workspace: holder.workspace,
                pid: holder.pid,
                locked_at: holder.locked_at,
            }),
            WorkspaceError::Io { path, source } => Self::FileOperation { path, source },
            other => Self::Workspace(other),
        }
    }
}

/// Remediation bookkeeping errors
#[derive(Debug, thiserror::Error)]
pub enum RemediationError {
    /// Another cycle holds the workspace lock
    #[error("workspace {} is locked by pid {pid} since {locked_at}", .workspace.display())]
    WorkspaceLocked {
        /// Locked workspace
        workspace: PathBuf,
        /// Holder process id
        pid: u32,
        /// Lock time
        locked_at: DateTime<Utc>,
    },

    /// A required collaborator or input is absent
    #[error("missing prerequisite: {0}")]
    MissingPrerequisite(String),

    /// Task state change not allowed by the lifecycle
    #[error("illegal transition for task {task}: {from} -> {to}")]
    IllegalTransition {
        /// Task
        task: TaskId,
        /// Current status
        from: TaskStatus,
        /// Requested status
        to: TaskStatus,
    },

    /// No task with that id
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    /// Task left the queue already
    #[error("task {task} cannot be cancelled in status {status}")]
    NotCancellable {
        /// Task
        task: TaskId,
        /// Current status
        status: TaskStatus,
    },

    /// No session with that id
    #[error("session not found: {0}")]
    SessionNotFound(SessionId),
}

/// Result alias for orchestrator operations
pub type Result<T> = std::result::Result<T, AutofixError>;
