//! Autofix Test Utilities
//!
//! Shared fakes and fixtures for integration tests:
//! - **Collaborators**: scripted scanner, fixers, analyzers and knowledge
//! - **Sandbox**: a runtime that fails code containing a marker
//! - **Learning**: a trainer that records what it was given
//! - **Fixtures**: temp workspaces, fast configs, ready orchestrators

#![allow(missing_docs)]

use autofix_core::{
    Analysis, AutofixConfig, AutofixError, Category, CodeAnalyzer, Collaborators, FixGenerator,
    Issue, KnowledgeSource, KnowledgeUnit, OrchestratorConfig, RefactoringOrchestrator, Result,
    SastAnalyzer, ScanId, Scanner, SecurityIssue, Severity,
};
use autofix_learning::{
    ContinuousLearningService, FeedbackData, LearningConfig, LearningError, ModelTrainer,
    TrainingOutcome,
};
use autofix_sandbox::{
    EnvironmentHandle, EnvironmentSpec, ExecOutput, Language, SandboxConfig, SandboxError,
    SandboxRuntime, SandboxTestRunner, TestType,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Marker that makes [`ScriptedRuntime`] fail a fix
pub const BROKEN: &str = "# broken";

// ---- collaborators ----

/// Scanner returning a fixed list of issues
#[derive(Debug, Default)]
pub struct StaticScanner {
    issues: Vec<Issue>,
    scans: AtomicUsize,
}

impl StaticScanner {
    pub fn new(issues: Vec<Issue>) -> Self {
        Self {
            issues,
            scans: AtomicUsize::new(0),
        }
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Scanner for StaticScanner {
    async fn start_scan(&self, _dir: &Path) -> Result<ScanId> {
        let n = self.scans.fetch_add(1, Ordering::SeqCst);
        Ok(ScanId(format!("scan-{n}")))
    }

    async fn get_issues(&self, _scan: &ScanId) -> Result<Vec<Issue>> {
        Ok(self.issues.clone())
    }
}

/// Fix generator backed by a closure
pub struct FnFixer<F>(pub F);

#[async_trait::async_trait]
impl<F> FixGenerator for FnFixer<F>
where
    F: Fn(&str, &[Issue], Language) -> String + Send + Sync,
{
    async fn fix_code(&self, code: &str, issues: &[Issue], language: Language) -> Result<String> {
        Ok((self.0)(code, issues, language))
    }
}

/// Fixer that appends `suffix` to the code
pub fn appending_fixer(suffix: &'static str) -> Arc<dyn FixGenerator> {
    Arc::new(FnFixer(move |code: &str, _: &[Issue], _: Language| {
        format!("{code}{suffix}")
    }))
}

/// Fixer that returns the code unchanged
pub fn identity_fixer() -> Arc<dyn FixGenerator> {
    Arc::new(FnFixer(|code: &str, _: &[Issue], _: Language| code.to_string()))
}

/// Fixer whose model is unreachable
#[derive(Debug, Clone)]
pub struct FailingFixer(pub String);

#[async_trait::async_trait]
impl FixGenerator for FailingFixer {
    async fn fix_code(&self, _code: &str, _issues: &[Issue], _language: Language) -> Result<String> {
        Err(AutofixError::Model(self.0.clone()))
    }
}

/// Analyzer reporting one issue per call and recording the code it saw
#[derive(Debug, Default)]
pub struct RecordingAnalyzer {
    seen: Mutex<Vec<String>>,
}

impl RecordingAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Code of every analyzed file, in call order
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait::async_trait]
impl CodeAnalyzer for RecordingAnalyzer {
    async fn analyze_code(
        &self,
        code: &str,
        _language: Language,
        analysis_type: Category,
    ) -> Result<Analysis> {
        self.seen.lock().push(code.to_string());
        Ok(Analysis {
            issues: vec![Issue::new(
                PathBuf::new(),
                analysis_type,
                Severity::Medium,
                format!("{analysis_type} finding"),
            )],
            score: 0.5,
        })
    }
}

/// Knowledge source returning fixed units
#[derive(Debug, Clone, Default)]
pub struct StaticKnowledge(pub Vec<KnowledgeUnit>);

#[async_trait::async_trait]
impl KnowledgeSource for StaticKnowledge {
    async fn knowledge_for_context(&self, _context: &str, limit: usize) -> Result<Vec<KnowledgeUnit>> {
        Ok(self.0.iter().take(limit).cloned().collect())
    }
}

/// SAST analyzer returning fixed findings
#[derive(Debug, Clone, Default)]
pub struct StaticSast(pub Vec<SecurityIssue>);

#[async_trait::async_trait]
impl SastAnalyzer for StaticSast {
    async fn analyze_project(&self, _path: &Path) -> Result<Vec<SecurityIssue>> {
        Ok(self.0.clone())
    }
}

// ---- sandbox ----

/// Runtime that passes any code without [`BROKEN`] in it
#[derive(Debug, Default)]
pub struct ScriptedRuntime {
    delay: Duration,
    pub provisioned: AtomicUsize,
    pub torn_down: AtomicUsize,
}

impl ScriptedRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every fragment take `delay`
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            delay,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl SandboxRuntime for ScriptedRuntime {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn allocate(&self, spec: &EnvironmentSpec) -> EnvironmentHandle {
        EnvironmentHandle {
            id: format!("scripted-{}", self.provisioned.load(Ordering::SeqCst)),
            workdir: spec.workdir.clone(),
            image: None,
        }
    }

    async fn provision(&self, _spec: &EnvironmentSpec, _env: &EnvironmentHandle) -> std::result::Result<(), SandboxError> {
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self, _env: &EnvironmentHandle) -> std::result::Result<bool, SandboxError> {
        Ok(true)
    }

    async fn exec(&self, env: &EnvironmentHandle, _script: &str) -> std::result::Result<ExecOutput, SandboxError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let broken = std::fs::read_dir(&env.workdir)
            .map_err(|e| SandboxError::io(&env.workdir, e))?
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| std::fs::read_to_string(entry.path()).ok())
            .any(|code| code.contains(BROKEN));
        Ok(if broken {
            ExecOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "SyntaxError: invalid syntax".to_string(),
            }
        } else {
            ExecOutput {
                exit_code: Some(0),
                ..ExecOutput::default()
            }
        })
    }

    async fn teardown(&self, _env: &EnvironmentHandle) -> std::result::Result<(), SandboxError> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

// ---- learning ----

/// Trainer that succeeds and remembers batch sizes
#[derive(Debug, Default)]
pub struct RecordingTrainer {
    batches: Mutex<Vec<usize>>,
}

impl RecordingTrainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn batches(&self) -> Vec<usize> {
        self.batches.lock().clone()
    }
}

#[async_trait::async_trait]
impl ModelTrainer for RecordingTrainer {
    fn current_version(&self) -> String {
        "base".to_string()
    }

    async fn train(&self, samples: &[FeedbackData]) -> std::result::Result<TrainingOutcome, LearningError> {
        let mut batches = self.batches.lock();
        batches.push(samples.len());
        Ok(TrainingOutcome {
            new_version: format!("ft-{}", batches.len()),
            pre_accuracy: 0.7,
            post_accuracy: 0.8,
            samples_accepted: samples.len(),
            samples_rejected: 0,
        })
    }
}

// ---- fixtures ----

/// Temp workspace holding `files` (relative path, content)
pub fn workspace_with(files: &[(&str, &str)]) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    for (rel, content) in files {
        let path = dir.path().join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
    dir
}

/// Read a workspace file
pub fn read(dir: &Path, rel: &str) -> String {
    std::fs::read_to_string(dir.join(rel)).unwrap()
}

/// Fast configuration rooted at `workspace`, learning data under `data_dir`
pub fn test_config(workspace: &Path, data_dir: &Path) -> AutofixConfig {
    AutofixConfig {
        orchestrator: OrchestratorConfig::new()
            .with_project_root(workspace)
            .with_dispatch_interval(Duration::from_millis(5))
            .with_test_types(vec![TestType::Syntax]),
        sandbox: SandboxConfig::new()
            .with_timeout(Duration::from_secs(10))
            .with_health_checks(1, Duration::from_millis(1)),
        learning: LearningConfig::new()
            .with_data_dir(data_dir)
            .with_buffer_bounds(1, 1_000)
            .with_batch_size(8)
            .with_update_cooldown(Duration::ZERO),
        ..AutofixConfig::default()
    }
}

/// Orchestrator over `runtime` and `trainer`
pub fn orchestrator(
    config: AutofixConfig,
    collaborators: Collaborators,
    runtime: Arc<dyn SandboxRuntime>,
    trainer: Arc<dyn ModelTrainer>,
) -> RefactoringOrchestrator {
    let runner = SandboxTestRunner::with_runtime(config.sandbox.clone(), runtime);
    let learning =
        Arc::new(ContinuousLearningService::open(config.learning.clone(), trainer).unwrap());
    RefactoringOrchestrator::new(config, collaborators, runner, learning).unwrap()
}

/// Collaborators with a scripted scanner, the given fixer and a recording analyzer
pub fn collaborators(issues: Vec<Issue>, fixer: Arc<dyn FixGenerator>) -> Collaborators {
    Collaborators::new(
        Arc::new(StaticScanner::new(issues)),
        fixer,
        Arc::new(RecordingAnalyzer::new()),
    )
}
