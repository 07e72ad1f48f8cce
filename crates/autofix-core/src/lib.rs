//! Autofix Core
//!
//! Autonomous remediation on top of the sandbox, workspace and learning crates:
//! - **Tasks**: priority queue, bounded worker pool, explicit lifecycle
//! - **Plans**: per-file fix steps, each tested in the sandbox before it is kept
//! - **Cycles**: lock, backup, scan, fix, test, learn, with rollback on failure
//! - **Sessions**: analyze, remediate or continuous runs in the background
//!
//! # Example
//!
//! ```rust,ignore
//! use autofix_core::{AutofixConfig, Category, Collaborators, Priority, RefactoringOrchestrator};
//! use autofix_learning::UnavailableTrainer;
//! use std::sync::Arc;
//!
//! let orchestrator = RefactoringOrchestrator::from_config(
//!     AutofixConfig::from_file("autofix.toml".as_ref())?,
//!     Collaborators::new(scanner, fixer, analyzer),
//!     Arc::new(UnavailableTrainer),
//! )?;
//!
//! orchestrator.create_task(Category::Security, None, Priority::High, None)?;
//! orchestrator.start();
//! orchestrator.wait_idle().await;
//! println!("{:?}", orchestrator.refactoring_stats());
//! ```

pub mod collaborators;
pub mod config;
pub mod cycle;
pub mod error;
pub mod feedback;
pub mod orchestrator;
pub mod plan;
pub mod report;
pub mod scheduler;
pub mod session;
pub mod state_machine;
pub mod types;

pub use collaborators::{CodeAnalyzer, Collaborators, FixGenerator, KnowledgeSource, SastAnalyzer, Scanner};
pub use config::{AutofixConfig, BackupConfig, OrchestratorConfig};
pub use cycle::ProgressCallback;
pub use error::{AutofixError, RemediationError, Result};
pub use feedback::{feedback_from_test, rating_for_score};
pub use orchestrator::RefactoringOrchestrator;
pub use plan::{build_plan, PlanStep, StepContext, StepResult, WorkingSet};
pub use report::{CycleReport, FileOutcome, FileStatus};
pub use scheduler::{RefactoringStats, SchedulerState, TaskOutcome};
pub use session::{SessionManager, SessionMode, SessionState, SessionStatus};
pub use state_machine::{allowed_transitions, validate_transition};
pub use types::{
    Analysis, AppliedChange, Category, Issue, KnowledgeUnit, Priority, RefactoringTask, ScanId,
    SecurityIssue, SessionId, Severity, TaskId, TaskStatus,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
