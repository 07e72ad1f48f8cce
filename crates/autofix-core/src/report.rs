//! Plain-text cycle report

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// What happened to one file during a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    /// Fix applied and its test passed
    Passed,
    /// Fix applied, test failed, original restored
    Reverted,
    /// Fix generator returned the code unchanged
    Unchanged,
    /// Not fixable (unsupported language or outside the workspace)
    Skipped,
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(match self {
            Self::Passed => "passed",
            Self::Reverted => "reverted",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
        })
    }
}

/// Per-file line of the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    /// File
    pub file: PathBuf,
    /// Issues reported for it
    pub issues: usize,
    /// Result
    pub status: FileStatus,
    /// Improvement score of the tested fix
    pub improvement_score: Option<f64>,
    /// Sandbox failure, if any
    pub detail: Option<String>,
}

/// Summary of one scan-fix-test-learn cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Workspace processed
    pub workspace: PathBuf,
    /// Start time
    pub started_at: DateTime<Utc>,
    /// End time
    pub finished_at: Option<DateTime<Utc>>,
    /// Pre-cycle backup
    pub backup: Option<String>,
    /// Issues from scanner and SAST
    pub issues_found: usize,
    /// Per-file outcomes
    pub files: Vec<FileOutcome>,
    /// Feedback samples accepted by the learning service
    pub feedback_accepted: usize,
    /// Feedback samples rejected
    pub feedback_rejected: usize,
    /// Model update result, when one was attempted
    pub model_update: Option<String>,
    /// Whether the workspace was restored from the backup
    pub rolled_back: bool,
    /// Cycle failure
    pub error: Option<String>,
}

impl CycleReport {
    /// Empty report for a cycle starting now
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
            started_at: Utc::now(),
            finished_at: None,
            backup: None,
            issues_found: 0,
            files: Vec::new(),
            feedback_accepted: 0,
            feedback_rejected: 0,
            model_update: None,
            rolled_back: false,
            error: None,
        }
    }

    /// Close the report
    pub fn finish(&mut self, error: Option<String>) {
        self.finished_at = Some(Utc::now());
        self.error = error;
    }

    /// Whether the cycle ended without error
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.finished_at.is_some() && self.error.is_none()
    }

    /// Files with the given status
    #[must_use]
    pub fn count(&self, status: FileStatus) -> usize {
        self.files.iter().filter(|f| f.status == status).count()
    }
}

impl fmt::Display for CycleReport {
    #[allow(clippy::cast_precision_loss)]
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Autofix cycle report")?;
        writeln!(f, "workspace:  {}", self.workspace.display())?;
        writeln!(f, "started:    {}", self.started_at.to_rfc3339())?;
        if let Some(end) = self.finished_at {
            let secs = (end - self.started_at).num_milliseconds() as f64 / 1000.0;
            writeln!(f, "finished:   {} ({secs:.1}s)", end.to_rfc3339())?;
        }
        writeln!(f, "backup:     {}", self.backup.as_deref().unwrap_or("none"))?;
        match &self.error {
            None => writeln!(f, "outcome:    success")?,
            Some(e) => writeln!(f, "outcome:    failed: {e}")?,
        }
        if self.rolled_back {
            writeln!(f, "workspace restored from backup")?;
        }
        writeln!(f)?;
        writeln!(f, "issues found:   {}", self.issues_found)?;
        writeln!(
            f,
            "fixes:          {} passed, {} reverted, {} unchanged, {} skipped",
            self.count(FileStatus::Passed),
            self.count(FileStatus::Reverted),
            self.count(FileStatus::Unchanged),
            self.count(FileStatus::Skipped),
        )?;
        writeln!(
            f,
            "feedback:       {} accepted, {} rejected",
            self.feedback_accepted, self.feedback_rejected
        )?;
        if let Some(update) = &self.model_update {
            writeln!(f, "model update:   {update}")?;
        }
        if !self.files.is_empty() {
            writeln!(f)?;
            for file in &self.files {
                write!(f, "  [{:<9}] {} ({} issue(s))", file.status, file.file.display(), file.issues)?;
                if let Some(score) = file.improvement_score {
                    write!(f, " score {score:.2}")?;
                }
                if let Some(detail) = &file.detail {
                    write!(f, ": {detail}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}
