//! External collaborators
//!
//! The orchestrator drives these without knowing how they work. Adapters for
//! concrete scanners, model clients and knowledge stores live outside this crate.

use crate::error::Result;
use crate::types::{Analysis, Category, Issue, KnowledgeUnit, ScanId, SecurityIssue};
use autofix_sandbox::Language;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Static issue scanner
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait Scanner: Send + Sync {
    /// Start scanning `dir`
    async fn start_scan(&self, dir: &Path) -> Result<ScanId>;

    /// Issues found by a finished scan
    async fn get_issues(&self, scan: &ScanId) -> Result<Vec<Issue>>;
}

/// Generative model producing fixed code
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait FixGenerator: Send + Sync {
    /// Rewrite `code` so that `issues` no longer apply
    async fn fix_code(&self, code: &str, issues: &[Issue], language: Language) -> Result<String>;
}

/// Model-backed analysis of a single file
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait CodeAnalyzer: Send + Sync {
    /// Analyze `code` for one category of problems
    async fn analyze_code(
        &self,
        code: &str,
        language: Language,
        analysis_type: Category,
    ) -> Result<Analysis>;
}

/// Retrieval of guidance relevant to a task
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait KnowledgeSource: Send + Sync {
    /// Up to `limit` units matching `context`
    async fn knowledge_for_context(&self, context: &str, limit: usize)
        -> Result<Vec<KnowledgeUnit>>;
}

/// Project-wide security analyzer
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SastAnalyzer: Send + Sync {
    /// Security findings for the project at `path`
    async fn analyze_project(&self, path: &Path) -> Result<Vec<SecurityIssue>>;
}

/// Collaborators handed to the orchestrator
#[derive(Clone)]
pub struct Collaborators {
    /// Issue scanner
    pub scanner: Arc<dyn Scanner>,
    /// Fix generator
    pub fixer: Arc<dyn FixGenerator>,
    /// Per-file analyzer
    pub analyzer: Arc<dyn CodeAnalyzer>,
    /// Optional knowledge retrieval
    pub knowledge: Option<Arc<dyn KnowledgeSource>>,
    /// Optional SAST tool
    pub sast: Option<Arc<dyn SastAnalyzer>>,
}

impl Collaborators {
    /// Bundle the required collaborators
    pub fn new(
        scanner: Arc<dyn Scanner>,
        fixer: Arc<dyn FixGenerator>,
        analyzer: Arc<dyn CodeAnalyzer>,
    ) -> Self {
        Self {
            scanner,
            fixer,
            analyzer,
            knowledge: None,
            sast: None,
        }
    }

    /// With knowledge source
    #[must_use]
    pub fn with_knowledge(mut self, knowledge: Arc<dyn KnowledgeSource>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    /// With SAST analyzer
    #[must_use]
    pub fn with_sast(mut self, sast: Arc<dyn SastAnalyzer>) -> Self {
        self.sast = Some(sast);
        self
    }
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("knowledge", &self.knowledge.is_some())
            .field("sast", &self.sast.is_some())
            .finish_non_exhaustive()
    }
}
