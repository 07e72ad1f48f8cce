//! Core types for the orchestrator
//!
//! Defines:
//! - Task, session and scan identifiers
//! - Remediation tasks and their lifecycle status
//! - Issues, security findings and knowledge units exchanged with collaborators

use crate::plan::StepResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use ulid::Ulid;

/// Unique task identifier (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Ulid);

impl TaskId {
    /// Generate new task ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique session identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Ulid);

impl SessionId {
    /// Generate new session ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Scanner-assigned scan handle
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScanId(pub String);

impl std::fmt::Display for ScanId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a task improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    /// General code quality
    Quality,
    /// Runtime performance
    Performance,
    /// Security weaknesses
    Security,
    /// Readability and structure
    Maintainability,
    /// Comments and docs
    Documentation,
    /// Missing tests
    TestCoverage,
    /// Module boundaries and layering
    Architecture,
    /// Dependency hygiene
    Dependency,
}

impl Category {
    /// Every category
    pub const ALL: [Category; 8] = [
        Category::Quality,
        Category::Performance,
        Category::Security,
        Category::Maintainability,
        Category::Documentation,
        Category::TestCoverage,
        Category::Architecture,
        Category::Dependency,
    ];

    /// Snake-case name
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Quality => "quality",
            Self::Performance => "performance",
            Self::Security => "security",
            Self::Maintainability => "maintainability",
            Self::Documentation => "documentation",
            Self::TestCoverage => "test_coverage",
            Self::Architecture => "architecture",
            Self::Dependency => "dependency",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

/// Dispatch priority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Dispatched first
    Critical,
    /// Above normal
    High,
    /// Normal
    #[default]
    Medium,
    /// Dispatched last
    Low,
}

impl Priority {
    /// Higher rank dispatches first
    #[inline]
    #[must_use]
    pub fn rank(self) -> u8 {
        match self {
            Self::Critical => 3,
            Self::High => 2,
            Self::Medium => 1,
            Self::Low => 0,
        }
    }
}

impl PartialOrd for Priority {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Priority {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank())
    }
}

impl std::fmt::Display for Priority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        })
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "critical" => Ok(Self::Critical),
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Queued
    Pending,
    /// Owned by a worker
    InProgress,
    /// Finished with an aggregated score
    Completed,
    /// Finished with an error
    Failed,
    /// Removed from the queue before dispatch
    Cancelled,
}

impl TaskStatus {
    /// Whether the status is final
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// A change written by a plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppliedChange {
    /// File that changed
    pub file: PathBuf,
    /// Plan step kind that produced it
    pub step: String,
    /// Sandbox improvement score of the change
    pub improvement_score: f64,
    /// Whether the change was written to disk
    pub written: bool,
}

/// A unit of remediation work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefactoringTask {
    /// Task ID
    pub id: TaskId,
    /// What to improve
    pub category: Category,
    /// Dispatch priority
    pub priority: Priority,
    /// Free-form description
    pub description: String,
    /// Files in scope
    pub target_files: Vec<PathBuf>,
    /// Lifecycle status
    pub status: TaskStatus,
    /// Submission time
    pub created_at: DateTime<Utc>,
    /// Dispatch time
    pub started_at: Option<DateTime<Utc>>,
    /// Completion time
    pub completed_at: Option<DateTime<Utc>>,
    /// Changes produced by the plan
    pub applied_changes: Vec<AppliedChange>,
    /// Per-step outcomes
    pub steps: Vec<StepResult>,
    /// Aggregated score
    pub improvement_score: Option<f64>,
    /// Failure reason
    pub error: Option<String>,
}

impl RefactoringTask {
    /// Create a pending task
    #[must_use]
    pub fn new(
        category: Category,
        priority: Priority,
        description: impl Into<String>,
        target_files: Vec<PathBuf>,
    ) -> Self {
        Self {
            id: TaskId::new(),
            category,
            priority,
            description: description.into(),
            target_files,
            status: TaskStatus::Pending,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            applied_changes: Vec::new(),
            steps: Vec::new(),
            improvement_score: None,
            error: None,
        }
    }

    /// Wall-clock time from dispatch to completion
    #[must_use]
    pub fn duration(&self) -> Option<chrono::Duration> {
        Some(self.completed_at? - self.started_at?)
    }
}

/// Finding severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    /// Informational
    Info,
    /// Low impact
    Low,
    /// Medium impact
    #[default]
    Medium,
    /// High impact
    High,
    /// Must fix
    Critical,
}

/// A problem reported by a scanner or analyzer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// File containing the problem
    pub file: PathBuf,
    /// 1-based line, when known
    pub line: Option<u32>,
    /// What is wrong
    pub description: String,
    /// Category of the fix it needs
    pub category: Category,
    /// Impact
    pub severity: Severity,
}

impl Issue {
    /// Create an issue
    pub fn new(
        file: impl Into<PathBuf>,
        category: Category,
        severity: Severity,
        description: impl Into<String>,
    ) -> Self {
        Self {
            file: file.into(),
            line: None,
            description: description.into(),
            category,
            severity,
        }
    }

    /// Attach a line number
    #[inline]
    #[must_use]
    pub fn at_line(mut self, line: u32) -> Self {
        self.line = Some(line);
        self
    }
}

/// Static analysis of one file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Analysis {
    /// Problems found
    pub issues: Vec<Issue>,
    /// Overall quality score in [0, 1]
    pub score: f64,
}

/// Retrieved guidance relevant to a task
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KnowledgeUnit {
    /// Source-assigned id
    pub id: String,
    /// Origin kind, e.g. `learned`, `documentation`, `best_practice`
    pub source_type: String,
    /// Guidance text
    pub content: String,
}

impl KnowledgeUnit {
    /// Whether the unit was learned from past remediation outcomes
    #[must_use]
    pub fn is_learned(&self) -> bool {
        matches!(self.source_type.as_str(), "learned" | "feedback" | "fine_tune")
    }
}

/// Finding of a SAST tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityIssue {
    /// File containing the weakness
    pub file: PathBuf,
    /// 1-based line, when known
    pub line: Option<u32>,
    /// Tool rule identifier
    pub rule_id: String,
    /// What is wrong
    pub description: String,
    /// Impact
    pub severity: Severity,
    /// CWE identifier, when mapped
    pub cwe: Option<String>,
}

impl From<SecurityIssue> for Issue {
    fn from(s: SecurityIssue) -> Self {
        let description = match &s.cwe {
            Some(cwe) => format!("[{}] {} ({cwe})", s.rule_id, s.description),
            None => format!("[{}] {}", s.rule_id, s.description),
        };
        Self {
            file: s.file,
            line: s.line,
            description,
            category: Category::Security,
            severity: s.severity,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn critical_outranks_low() {
        assert!(Priority::Critical > Priority::High);
        assert!(Priority::Medium > Priority::Low);
        let mut all = vec![Priority::Low, Priority::Critical, Priority::Medium];
        all.sort_by(|a, b| b.cmp(a));
        assert_eq!(all, vec![Priority::Critical, Priority::Medium, Priority::Low]);
    }

    #[test]
    fn category_round_trips_through_str() {
        for c in Category::ALL {
            assert_eq!(c.as_str().parse::<Category>().unwrap(), c);
        }
    }

    #[test]
    fn security_issue_becomes_security_category() {
        let issue: Issue = SecurityIssue {
            file: "app.py".into(),
            line: Some(3),
            rule_id: "B105".into(),
            description: "hardcoded password".into(),
            severity: Severity::High,
            cwe: Some("CWE-259".into()),
        }
        .into();
        assert_eq!(issue.category, Category::Security);
        assert_eq!(issue.description, "[B105] hardcoded password (CWE-259)");
    }

    #[test]
    fn new_task_is_pending() {
        let task = RefactoringTask::new(Category::Security, Priority::High, "fix", vec![]);
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.duration().is_none());
    }
}
