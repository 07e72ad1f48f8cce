//! Remediation sessions
//!
//! A session runs one mode against one workspace in the background:
//! - `analyze`: scan only
//! - `remediate`: one full cycle
//! - `continuous`: cycles every `continuous_interval` until stopped

use crate::cycle::ProgressCallback;
use crate::error::{AutofixError, RemediationError, Result};
use crate::orchestrator::RefactoringOrchestrator;
use crate::report::CycleReport;
use crate::types::{Issue, SessionId};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// What a session does
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionMode {
    /// Scan only
    Analyze,
    /// One full cycle
    Remediate,
    /// Repeated cycles
    Continuous,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Analyze => "analyze",
            Self::Remediate => "remediate",
            Self::Continuous => "continuous",
        })
    }
}

impl std::str::FromStr for SessionMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(Self::Analyze),
            "remediate" => Ok(Self::Remediate),
            "continuous" => Ok(Self::Continuous),
            other => Err(format!("unknown session mode: {other}")),
        }
    }
}

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Work in progress
    Running,
    /// Finished normally
    Completed,
    /// Finished with an error
    Failed,
    /// Stopped on request
    Stopped,
}

/// Snapshot of a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStatus {
    /// Session ID
    pub id: SessionId,
    /// Workspace
    pub workspace: PathBuf,
    /// Mode
    pub mode: SessionMode,
    /// Lifecycle state
    pub state: SessionState,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: Option<DateTime<Utc>>,
    /// Cycles finished, successful or not
    pub cycles_completed: u32,
    /// Issues found by the last scan (analyze mode)
    pub issues: Vec<Issue>,
    /// Report of the last cycle
    pub last_report: Option<CycleReport>,
    /// Last error
    pub last_error: Option<String>,
    /// Last progress message and percentage
    pub progress: Option<(String, u8)>,
}

impl SessionStatus {
    fn new(id: SessionId, workspace: PathBuf, mode: SessionMode) -> Self {
        Self {
            id,
            workspace,
            mode,
            state: SessionState::Running,
            started_at: Utc::now(),
            finished_at: None,
            cycles_completed: 0,
            issues: Vec::new(),
            last_report: None,
            last_error: None,
            progress: None,
        }
    }

    fn close(&mut self, state: SessionState) {
        if self.state == SessionState::Running {
            self.state = state;
            self.finished_at = Some(Utc::now());
        }
    }
}

struct SessionEntry {
    status: Arc<Mutex<SessionStatus>>,
    token: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

/// Background sessions over one orchestrator
#[derive(Clone)]
pub struct SessionManager {
    orchestrator: RefactoringOrchestrator,
    sessions: Arc<DashMap<SessionId, SessionEntry>>,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("sessions", &self.sessions.len())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a manager
    #[must_use]
    pub fn new(orchestrator: RefactoringOrchestrator) -> Self {
        Self {
            orchestrator,
            sessions: Arc::new(DashMap::new()),
        }
    }

    /// Start a session; must be called within a tokio runtime
    ///
    /// # Errors
    /// Returns `AutofixError::Config` if `dir` is not a directory
    pub fn start_session(&self, dir: impl Into<PathBuf>, mode: SessionMode) -> Result<SessionId> {
        let dir = dir.into();
        check_workspace(&dir)?;
        let id = SessionId::new();
        tracing::info!(session_id = %id, %mode, workspace = %dir.display(), "session started");
        let status = Arc::new(Mutex::new(SessionStatus::new(id, dir.clone(), mode)));
        let token = self.orchestrator.shutdown_token().child_token();

        let worker = SessionWorker {
            orchestrator: self.orchestrator.clone(),
            status: Arc::clone(&status),
            token: token.clone(),
            dir,
        };
        let handle = tokio::spawn(worker.run(mode));

        self.sessions.insert(
            id,
            SessionEntry {
                status,
                token,
                handle: Mutex::new(Some(handle)),
            },
        );
        Ok(id)
    }

    /// Stop a session and wait for its current stage to wind down
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id
    pub async fn stop_session(&self, id: SessionId) -> Result<SessionStatus> {
        let (token, handle, status) = {
            let entry = self
                .sessions
                .get(&id)
                .ok_or(RemediationError::SessionNotFound(id))?;
            let parts = (
                entry.token.clone(),
                entry.handle.lock().take(),
                Arc::clone(&entry.status),
            );
            parts
        };
        token.cancel();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::warn!(session_id = %id, error = %e, "session task ended abnormally");
            }
        }
        status.lock().close(SessionState::Stopped);
        tracing::info!(session_id = %id, "session stopped");
        let snapshot = status.lock().clone();
        Ok(snapshot)
    }

    /// Current status of a session
    ///
    /// # Errors
    /// Returns `SessionNotFound` for an unknown id
    pub fn session_status(&self, id: SessionId) -> Result<SessionStatus> {
        let entry = self
            .sessions
            .get(&id)
            .ok_or(RemediationError::SessionNotFound(id))?;
        let snapshot = entry.status.lock().clone();
        Ok(snapshot)
    }

    /// Every session, oldest first
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionStatus> {
        let mut all: Vec<_> = self
            .sessions
            .iter()
            .map(|entry| entry.status.lock().clone())
            .collect();
        all.sort_by_key(|s| s.id);
        all
    }
}

struct SessionWorker {
    orchestrator: RefactoringOrchestrator,
    status: Arc<Mutex<SessionStatus>>,
    token: CancellationToken,
    dir: PathBuf,
}

impl SessionWorker {
    async fn run(self, mode: SessionMode) {
        let state = match mode {
            SessionMode::Analyze => self.analyze().await,
            SessionMode::Remediate => self.cycle().await,
            SessionMode::Continuous => self.continuous().await,
        };
        let state = if self.token.is_cancelled() {
            SessionState::Stopped
        } else {
            state
        };
        self.status.lock().close(state);
    }

    async fn analyze(&self) -> SessionState {
        let scan = tokio::select! {
            () = self.token.cancelled() => return SessionState::Stopped,
            scan = self.orchestrator.scan_workspace(&self.dir) => scan,
        };
        let mut status = self.status.lock();
        match scan {
            Ok(issues) => {
                tracing::info!(workspace = %self.dir.display(), issues = issues.len(), "analysis finished");
                status.issues = issues;
                SessionState::Completed
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
                SessionState::Failed
            }
        }
    }

    async fn cycle(&self) -> SessionState {
        let status = Arc::clone(&self.status);
        let on_progress: Box<ProgressCallback> = Box::new(move |message: &str, percent: u8| {
            status.lock().progress = Some((message.to_string(), percent));
        });
        let outcome = self
            .orchestrator
            .run_cycle_cancellable(&self.dir, Some(on_progress.as_ref()), &self.token)
            .await;

        let mut status = self.status.lock();
        status.cycles_completed += 1;
        status.last_report = self.orchestrator.last_cycle_report();
        match outcome {
            Ok(_) => {
                status.last_error = None;
                SessionState::Completed
            }
            Err(e) => {
                status.last_error = Some(e.to_string());
                SessionState::Failed
            }
        }
    }

    async fn continuous(&self) -> SessionState {
        let interval = self.orchestrator.config().orchestrator.continuous_interval();
        loop {
            if self.cycle().await == SessionState::Failed {
                let error = self.status.lock().last_error.clone().unwrap_or_default();
                tracing::warn!(workspace = %self.dir.display(), %error, "continuous cycle failed, retrying next interval");
            }
            tokio::select! {
                () = self.token.cancelled() => return SessionState::Stopped,
                () = tokio::time::sleep(interval) => {}
            }
        }
    }
}

fn check_workspace(dir: &Path) -> Result<()> {
    if dir.is_dir() {
        Ok(())
    } else {
        Err(AutofixError::Config(format!(
            "workspace {} is not a directory",
            dir.display()
        )))
    }
}
