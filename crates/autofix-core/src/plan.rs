//! Remediation plans
//!
//! A plan is an ordered list of [`PlanStep`]s built from analyzer issues and
//! retrieved knowledge. Issue steps are grouped per file and fix kind, in the
//! order security, performance, maintainability, documentation; knowledge
//! steps follow. Every step runs the same cycle:
//!
//! 1. ask the fix generator for new code
//! 2. evaluate it in the sandbox
//! 3. hand the outcome to the learning service
//! 4. keep the code (and write it, when enabled) only if the test passed
//!
//! A failed test is retried up to `max_fix_attempts` times with the failure
//! added as an extra issue. Step failures stay on the [`StepResult`].

use crate::collaborators::FixGenerator;
use crate::error::{AutofixError, Result};
use crate::feedback::feedback_from_test;
use crate::types::{AppliedChange, Category, Issue, KnowledgeUnit, Severity};
use autofix_learning::ContinuousLearningService;
use autofix_sandbox::{Language, SandboxTestRunner, TestError, TestRequest, TestResult, TestType};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Stderr kept when a failure is fed back to the fix generator
const FAILURE_EXCERPT: usize = 2_000;

/// One unit of planned work on one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanStep {
    /// Fix security issues
    SecurityFix {
        /// Target file
        file: PathBuf,
        /// Issues to address
        issues: Vec<Issue>,
    },
    /// Fix performance issues
    PerformanceFix {
        /// Target file
        file: PathBuf,
        /// Issues to address
        issues: Vec<Issue>,
    },
    /// Fix quality, structure and dependency issues
    MaintainabilityFix {
        /// Target file
        file: PathBuf,
        /// Issues to address
        issues: Vec<Issue>,
    },
    /// Fix documentation issues
    DocumentationFix {
        /// Target file
        file: PathBuf,
        /// Issues to address
        issues: Vec<Issue>,
    },
    /// Apply guidance learned from earlier remediations
    LearnedFix {
        /// Target file
        file: PathBuf,
        /// Guidance
        units: Vec<KnowledgeUnit>,
    },
    /// Apply general best-practice guidance
    BestPractice {
        /// Target file
        file: PathBuf,
        /// Guidance
        units: Vec<KnowledgeUnit>,
    },
}

impl PlanStep {
    /// Step for a group of issues of one category
    #[must_use]
    pub fn for_issues(file: PathBuf, category: Category, issues: Vec<Issue>) -> Self {
        match category {
            Category::Security => Self::SecurityFix { file, issues },
            Category::Performance => Self::PerformanceFix { file, issues },
            Category::Documentation => Self::DocumentationFix { file, issues },
            Category::Quality
            | Category::Maintainability
            | Category::TestCoverage
            | Category::Architecture
            | Category::Dependency => Self::MaintainabilityFix { file, issues },
        }
    }

    /// Snake-case step kind
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SecurityFix { .. } => "security_fix",
            Self::PerformanceFix { .. } => "performance_fix",
            Self::MaintainabilityFix { .. } => "maintainability_fix",
            Self::DocumentationFix { .. } => "documentation_fix",
            Self::LearnedFix { .. } => "learned_fix",
            Self::BestPractice { .. } => "best_practice",
        }
    }

    /// Target file
    #[must_use]
    pub fn file(&self) -> &Path {
        match self {
            Self::SecurityFix { file, .. }
            | Self::PerformanceFix { file, .. }
            | Self::MaintainabilityFix { file, .. }
            | Self::DocumentationFix { file, .. }
            | Self::LearnedFix { file, .. }
            | Self::BestPractice { file, .. } => file,
        }
    }

    /// Issues handed to the fix generator
    ///
    /// Knowledge steps phrase each unit as a low-severity issue.
    #[must_use]
    pub fn issues(&self) -> Vec<Issue> {
        match self {
            Self::SecurityFix { issues, .. }
            | Self::PerformanceFix { issues, .. }
            | Self::MaintainabilityFix { issues, .. }
            | Self::DocumentationFix { issues, .. } => issues.clone(),
            Self::LearnedFix { file, units } | Self::BestPractice { file, units } => units
                .iter()
                .map(|unit| {
                    Issue::new(
                        file.clone(),
                        Category::Quality,
                        Severity::Low,
                        format!("apply guidance ({}): {}", unit.source_type, unit.content),
                    )
                })
                .collect(),
        }
    }

    fn order(&self) -> u8 {
        match self {
            Self::SecurityFix { .. } => 0,
            Self::PerformanceFix { .. } => 1,
            Self::MaintainabilityFix { .. } => 2,
            Self::DocumentationFix { .. } => 3,
            Self::LearnedFix { .. } => 4,
            Self::BestPractice { .. } => 5,
        }
    }

    /// Run the step against the working set
    pub async fn apply(&self, ctx: &StepContext<'_>, working: &mut WorkingSet) -> StepResult {
        let mut result = StepResult::new(self);
        let file = self.file();

        let Some(language) = Language::from_path(file) else {
            result.error = Some(format!("unsupported language: {}", file.display()));
            return result;
        };
        let original = match working.load(file).await {
            Ok(code) => code,
            Err(e) => {
                result.error = Some(e.to_string());
                return result;
            }
        };

        let mut issues = self.issues();
        let attempts = ctx.max_fix_attempts.max(1);
        while result.attempts < attempts {
            if ctx.cancel.is_cancelled() {
                result.error = Some("cancelled".into());
                break;
            }
            result.attempts += 1;

            let fixed = match ctx.fixer.fix_code(&original, &issues, language).await {
                Ok(code) => code,
                Err(e) => {
                    result.error = Some(e.to_string());
                    break;
                }
            };
            if fixed == original {
                result.error = Some("fix generator returned the code unchanged".into());
                break;
            }

            let request = TestRequest::new(file, original.clone(), fixed.clone())
                .with_language(language)
                .with_test_types(ctx.test_types.to_vec());
            let test = ctx.runner.run_test_cancellable(request, ctx.cancel).await;
            let receipt = ctx
                .learning
                .collect_feedback(feedback_from_test(&test).with_metadata("step", self.kind()));
            if receipt.accepted {
                result.feedback_accepted += 1;
            }

            result.improvement_score = test.improvement_score;
            result.test_error.clone_from(&test.test_error);
            if test.success {
                match working.commit(file, fixed, ctx.apply_changes).await {
                    Ok(()) => {
                        result.success = true;
                        result.written = ctx.apply_changes;
                        result.error = None;
                    }
                    Err(e) => result.error = Some(e.to_string()),
                }
                break;
            }

            result.error = Some(test.summary());
            if matches!(test.test_error, Some(TestError::Cancelled)) {
                break;
            }
            issues.push(failure_issue(file, &test));
        }

        tracing::debug!(
            step = self.kind(),
            file = %file.display(),
            success = result.success,
            attempts = result.attempts,
            score = result.improvement_score,
            "plan step finished"
        );
        result
    }
}

fn failure_issue(file: &Path, test: &TestResult) -> Issue {
    let excerpt: String = test
        .stderr
        .chars()
        .rev()
        .take(FAILURE_EXCERPT)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    let mut description = format!("previous fix {}", test.summary());
    if let Some(fragment) = &test.failed_fragment {
        description.push_str(&format!(" in `{fragment}`"));
    }
    if !excerpt.trim().is_empty() {
        description.push_str(":\n");
        description.push_str(excerpt.trim());
    }
    Issue::new(file, Category::Quality, Severity::High, description)
}

/// Build an ordered plan
///
/// Issues are grouped per (fix kind, file). Learned knowledge units become a
/// [`PlanStep::LearnedFix`] and the rest a [`PlanStep::BestPractice`] for each
/// of `files`.
#[must_use]
pub fn build_plan(issues: &[Issue], knowledge: &[KnowledgeUnit], files: &[PathBuf]) -> Vec<PlanStep> {
    let mut groups: BTreeMap<(u8, PathBuf), PlanStep> = BTreeMap::new();
    for issue in issues {
        let probe = PlanStep::for_issues(issue.file.clone(), issue.category, Vec::new());
        let step = groups
            .entry((probe.order(), issue.file.clone()))
            .or_insert(probe);
        if let PlanStep::SecurityFix { issues, .. }
        | PlanStep::PerformanceFix { issues, .. }
        | PlanStep::MaintainabilityFix { issues, .. }
        | PlanStep::DocumentationFix { issues, .. } = step
        {
            issues.push(issue.clone());
        }
    }
    let mut plan: Vec<PlanStep> = groups.into_values().collect();

    let (learned, general): (Vec<_>, Vec<_>) =
        knowledge.iter().cloned().partition(KnowledgeUnit::is_learned);
    for file in files {
        if !learned.is_empty() {
            plan.push(PlanStep::LearnedFix {
                file: file.clone(),
                units: learned.clone(),
            });
        }
        if !general.is_empty() {
            plan.push(PlanStep::BestPractice {
                file: file.clone(),
                units: general.clone(),
            });
        }
    }
    plan.sort_by_key(PlanStep::order);
    plan
}

/// Outcome of one plan step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    /// Step kind
    pub kind: String,
    /// Target file
    pub file: PathBuf,
    /// Whether a fix passed its sandbox test
    pub success: bool,
    /// Score of the last evaluated fix
    pub improvement_score: f64,
    /// Fix generations performed
    pub attempts: u32,
    /// Whether the file was written
    pub written: bool,
    /// Sandbox failure of the last attempt
    pub test_error: Option<TestError>,
    /// Why the step failed
    pub error: Option<String>,
    /// Feedback samples the learning service accepted
    pub feedback_accepted: usize,
}

impl StepResult {
    fn new(step: &PlanStep) -> Self {
        Self {
            kind: step.kind().to_string(),
            file: step.file().to_path_buf(),
            success: false,
            improvement_score: 0.0,
            attempts: 0,
            written: false,
            test_error: None,
            error: None,
            feedback_accepted: 0,
        }
    }

    /// Change record for a successful step
    #[must_use]
    pub fn applied_change(&self) -> Option<AppliedChange> {
        self.success.then(|| AppliedChange {
            file: self.file.clone(),
            step: self.kind.clone(),
            improvement_score: self.improvement_score,
            written: self.written,
        })
    }
}

/// Shared inputs of every step in a plan
pub struct StepContext<'a> {
    /// Fix generator
    pub fixer: &'a dyn FixGenerator,
    /// Sandbox
    pub runner: &'a SandboxTestRunner,
    /// Feedback sink
    pub learning: &'a ContinuousLearningService,
    /// Checks per fix
    pub test_types: &'a [TestType],
    /// Fix generations per step
    pub max_fix_attempts: u32,
    /// Write passing fixes to disk
    pub apply_changes: bool,
    /// Shutdown signal
    pub cancel: &'a CancellationToken,
}

/// Current contents of the files a plan touches
///
/// Later steps on the same file build on the fixes kept by earlier ones.
#[derive(Debug, Default)]
pub struct WorkingSet {
    files: HashMap<PathBuf, String>,
}

impl WorkingSet {
    /// Create an empty working set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current contents of `path`, read from disk on first use
    ///
    /// # Errors
    /// Returns `AutofixError::FileOperation` if the file cannot be read
    pub async fn load(&mut self, path: &Path) -> Result<String> {
        if let Some(code) = self.files.get(path) {
            return Ok(code.clone());
        }
        let code = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| AutofixError::file(path, e))?;
        self.files.insert(path.to_path_buf(), code.clone());
        Ok(code)
    }

    /// Keep new contents for `path`, writing them when `write` is set
    ///
    /// # Errors
    /// Returns `AutofixError::FileOperation` if the write fails
    pub async fn commit(&mut self, path: &Path, code: String, write: bool) -> Result<()> {
        if write {
            tokio::fs::write(path, &code)
                .await
                .map_err(|e| AutofixError::file(path, e))?;
        }
        self.files.insert(path.to_path_buf(), code);
        Ok(())
    }
}
