//! Sandbox requests, results and scoring

use crate::error::TestError;
use crate::language::{Language, TestType};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Execution time below which a passing run earns the speed bonus
pub const FAST_RUN: Duration = Duration::from_secs(5);

/// One fix to evaluate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRequest {
    /// Workspace path of the file; only its name is used inside the sandbox
    pub file_path: PathBuf,
    /// Code before the fix
    pub original_code: String,
    /// Code after the fix
    pub modified_code: String,
    /// Language; detected from `file_path` when absent
    pub language: Option<Language>,
    /// Checks to run
    pub test_types: Vec<TestType>,
    /// Overrides the configured timeout
    pub timeout: Option<Duration>,
}

impl TestRequest {
    /// Request a syntax check of `modified_code`
    pub fn new(
        file_path: impl Into<PathBuf>,
        original_code: impl Into<String>,
        modified_code: impl Into<String>,
    ) -> Self {
        Self {
            file_path: file_path.into(),
            original_code: original_code.into(),
            modified_code: modified_code.into(),
            language: None,
            test_types: vec![TestType::Syntax],
            timeout: None,
        }
    }

    /// Set language explicitly
    #[inline]
    #[must_use]
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }

    /// Set checks to run
    #[inline]
    #[must_use]
    pub fn with_test_types(mut self, test_types: Vec<TestType>) -> Self {
        self.test_types = test_types;
        self
    }

    /// Set timeout for this run
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Explicit or detected language
    #[must_use]
    pub fn resolved_language(&self) -> Option<Language> {
        self.language.or_else(|| Language::from_path(&self.file_path))
    }
}

/// Where a run executed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Runtime backend name
    pub runtime: String,
    /// Container or scope id
    pub id: String,
    /// Image, when one was used
    pub image: Option<String>,
    /// Health probes performed
    pub health_checks: u32,
}

/// Outcome of one sandbox run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    /// Run id
    pub id: uuid::Uuid,
    /// File under test
    pub file_path: PathBuf,
    /// Code before the fix
    pub original_code: String,
    /// Code after the fix
    pub modified_code: String,
    /// Resolved language
    pub language: Option<Language>,
    /// Rendered command line
    pub command: Option<String>,
    /// Concatenated stdout of every fragment run
    pub stdout: String,
    /// Concatenated stderr of every fragment run
    pub stderr: String,
    /// Whether every fragment passed
    pub success: bool,
    /// Wall-clock duration
    pub execution_time: Duration,
    /// Checks that ran to completion
    pub test_types: Vec<TestType>,
    /// Environment details, once provisioned
    pub environment: Option<EnvironmentInfo>,
    /// Typed failure cause
    pub test_error: Option<TestError>,
    /// Score in [0, 1]
    pub improvement_score: f64,
    /// Script of the fragment that failed
    pub failed_fragment: Option<String>,
}

impl TestResult {
    /// Empty, unsuccessful result for a request
    #[must_use]
    pub fn for_request(request: &TestRequest) -> Self {
        Self {
            id: uuid::Uuid::new_v4(),
            file_path: request.file_path.clone(),
            original_code: request.original_code.clone(),
            modified_code: request.modified_code.clone(),
            language: request.resolved_language(),
            command: None,
            stdout: String::new(),
            stderr: String::new(),
            success: false,
            execution_time: Duration::ZERO,
            test_types: Vec::new(),
            environment: None,
            test_error: None,
            improvement_score: 0.0,
            failed_fragment: None,
        }
    }

    /// Record the final outcome and compute the score
    pub fn finish(&mut self, error: Option<TestError>, elapsed: Duration) {
        self.success = error.is_none();
        self.execution_time = elapsed;
        self.improvement_score = improvement_score(
            self.success,
            elapsed,
            self.test_types.len(),
            error.as_ref(),
        );
        self.test_error = error;
    }

    /// Short human-readable summary
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.test_error {
            None => format!(
                "passed {} check(s) in {}ms",
                self.test_types.len(),
                self.execution_time.as_millis()
            ),
            Some(e) => format!("failed: {e}"),
        }
    }
}

/// Score a run
///
/// Passing runs start at 0.8, gain 0.1 when faster than [`FAST_RUN`] and up
/// to 0.2 for the number of checks run (out of 4), capped at 1. Failing runs
/// score 0.2, plus 0.1 when the failure is a syntax error.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn improvement_score(
    success: bool,
    elapsed: Duration,
    test_types_run: usize,
    error: Option<&TestError>,
) -> f64 {
    if success {
        let mut score = 0.8;
        if elapsed < FAST_RUN {
            score += 0.1;
        }
        score += 0.2 * (test_types_run.min(TestType::ALL.len()) as f64 / TestType::ALL.len() as f64);
        score.min(1.0)
    } else {
        let mut score: f64 = 0.2;
        if error.is_some_and(TestError::is_syntax_error) {
            score += 0.1;
        }
        score.max(0.0)
    }
}
