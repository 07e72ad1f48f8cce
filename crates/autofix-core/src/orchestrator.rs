//! Refactoring orchestrator
//!
//! Owns the task queue and worker pool:
//! - **Dispatcher**: one background task popping the highest-priority pending
//!   task whenever a worker permit is free; it never does task work itself
//! - **Workers**: one tokio task per dispatched task, holding a permit
//! - **Execution**: analyze, fetch knowledge, plan, run steps, aggregate
//! - **Safety**: workspace lock and backup before changes, rollback of
//!   target files on failure. Tasks applying changes share one hold on the
//!   workspace lock, so a cycle cannot start under them and they cannot
//!   start under a cycle.
//!
//! The cycle and session entry points live in [`crate::cycle`] and
//! [`crate::session`].

use crate::collaborators::Collaborators;
use crate::config::AutofixConfig;
use crate::error::{AutofixError, Result};
use crate::plan::{build_plan, StepContext, WorkingSet};
use crate::report::CycleReport;
use crate::scheduler::{RefactoringStats, SchedulerState, TaskOutcome};
use crate::types::{Category, KnowledgeUnit, Priority, RefactoringTask, TaskId, TaskStatus};
use autofix_learning::{
    ContinuousLearningService, FinetuneStatus, LearningStatistics, ModelTrainer,
};
use autofix_sandbox::{Language, SandboxTestRunner};
use autofix_workspace::{
    discover_files, BackupInfo, BackupReport, BackupStore, RollbackReport, WorkspaceLock,
};
use futures::FutureExt;
use parking_lot::Mutex;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

struct Dispatcher {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

/// Workspace lock held on behalf of the tasks applying changes
#[derive(Default)]
struct TaskLease {
    lock: Option<WorkspaceLock>,
    holders: usize,
}

/// One task's share of [`TaskLease`]; the last one out releases the lock
struct LeaseGuard {
    inner: Arc<Inner>,
}

impl Drop for LeaseGuard {
    fn drop(&mut self) {
        let mut lease = self.inner.task_lease.lock();
        lease.holders = lease.holders.saturating_sub(1);
        if lease.holders > 0 {
            return;
        }
        if let Some(lock) = lease.lock.take() {
            if let Err(e) = lock.release() {
                tracing::warn!(error = %e, "failed to release task workspace lock");
            }
        }
    }
}

pub(crate) struct Inner {
    pub(crate) config: AutofixConfig,
    pub(crate) collaborators: Collaborators,
    pub(crate) runner: SandboxTestRunner,
    pub(crate) learning: Arc<ContinuousLearningService>,
    state: Mutex<SchedulerState>,
    permits: Arc<Semaphore>,
    dispatcher: Mutex<Option<Dispatcher>>,
    shutdown: Mutex<CancellationToken>,
    idle: Notify,
    task_lease: Mutex<TaskLease>,
    pub(crate) last_report: Mutex<Option<CycleReport>>,
}

/// Task queue, worker pool and remediation entry points
///
/// Cheap to clone; clones share one scheduler.
#[derive(Clone)]
pub struct RefactoringOrchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl std::fmt::Debug for RefactoringOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("RefactoringOrchestrator")
            .field("pending", &state.pending_count())
            .field("running", &state.running_count())
            .field("dispatching", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl RefactoringOrchestrator {
    /// Create an orchestrator from its parts
    ///
    /// # Errors
    /// Returns `AutofixError::Config` if the configuration is invalid
    pub fn new(
        config: AutofixConfig,
        collaborators: Collaborators,
        runner: SandboxTestRunner,
        learning: Arc<ContinuousLearningService>,
    ) -> Result<Self> {
        config.validate()?;
        let workers = config.orchestrator.max_concurrent_tasks;
        Ok(Self {
            inner: Arc::new(Inner {
                permits: Arc::new(Semaphore::new(workers)),
                config,
                collaborators,
                runner,
                learning,
                state: Mutex::new(SchedulerState::new()),
                dispatcher: Mutex::new(None),
                shutdown: Mutex::new(CancellationToken::new()),
                idle: Notify::new(),
                task_lease: Mutex::new(TaskLease::default()),
                last_report: Mutex::new(None),
            }),
        })
    }

    /// Create an orchestrator with the configured sandbox and learning store
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the learning store
    /// cannot be opened
    pub fn from_config(
        config: AutofixConfig,
        collaborators: Collaborators,
        trainer: Arc<dyn ModelTrainer>,
    ) -> Result<Self> {
        config.validate()?;
        let runner = SandboxTestRunner::new(config.sandbox.clone());
        let learning = Arc::new(ContinuousLearningService::open(
            config.learning.clone(),
            trainer,
        )?);
        Self::new(config, collaborators, runner, learning)
    }

    /// Configuration in force
    #[inline]
    #[must_use]
    pub fn config(&self) -> &AutofixConfig {
        &self.inner.config
    }

    /// Learning service fed by every sandbox run
    #[inline]
    #[must_use]
    pub fn learning(&self) -> &Arc<ContinuousLearningService> {
        &self.inner.learning
    }

    /// Sandbox runner
    #[inline]
    #[must_use]
    pub fn runner(&self) -> &SandboxTestRunner {
        &self.inner.runner
    }

    /// Token cancelled by [`stop_now`](Self::stop_now)
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.inner.shutdown.lock().clone()
    }

    // ---- tasks ----

    /// Submit a task
    ///
    /// Without `target_files` the project root is walked with the discovery
    /// rules.
    ///
    /// # Errors
    /// Returns error if discovery fails
    pub fn create_task(
        &self,
        category: Category,
        target_files: Option<Vec<PathBuf>>,
        priority: Priority,
        description: Option<String>,
    ) -> Result<TaskId> {
        let root = &self.inner.config.orchestrator.project_root;
        let targets = match target_files {
            Some(files) => files,
            None => discover_files(root, &self.inner.config.discovery)?,
        };
        let description = description
            .unwrap_or_else(|| format!("{category} remediation of {} file(s)", targets.len()));
        let task = RefactoringTask::new(category, priority, description, targets);

        let id = self.inner.state.lock().enqueue(task);
        tracing::info!(task_id = %id, %category, %priority, "task created");
        metrics::counter!("autofix_tasks_created_total", "category" => category.as_str())
            .increment(1);
        Ok(id)
    }

    /// Cancel a pending task
    ///
    /// # Errors
    /// Returns `NotCancellable` once a worker owns the task
    pub fn cancel_task(&self, id: TaskId) -> Result<()> {
        self.inner.state.lock().cancel(id)?;
        self.inner.idle.notify_waiters();
        tracing::info!(task_id = %id, "task cancelled");
        metrics::counter!("autofix_tasks_total", "status" => "cancelled").increment(1);
        Ok(())
    }

    /// Task by id
    #[must_use]
    pub fn task(&self, id: TaskId) -> Option<RefactoringTask> {
        self.inner.state.lock().task(id).cloned()
    }

    /// Every task, oldest first
    #[must_use]
    pub fn tasks(&self) -> Vec<RefactoringTask> {
        self.inner.state.lock().tasks()
    }

    /// Run one pending task on the calling task, outside dispatch order
    ///
    /// # Errors
    /// Returns error if the task is unknown or not pending
    pub async fn execute_task(&self, id: TaskId) -> Result<RefactoringTask> {
        let task = self.inner.state.lock().claim(id)?;
        self.run_claimed(task).await;
        self.task(id)
            .ok_or_else(|| crate::error::RemediationError::TaskNotFound(id).into())
    }

    // ---- dispatcher ----

    /// Start the background dispatcher
    ///
    /// Does nothing when it already runs. Must be called within a tokio runtime.
    pub fn start(&self) {
        let mut slot = self.inner.dispatcher.lock();
        if slot.as_ref().is_some_and(|d| !d.handle.is_finished()) {
            return;
        }
        let token = CancellationToken::new();
        let handle = tokio::spawn(self.clone().dispatch_loop(token.clone()));
        *slot = Some(Dispatcher { token, handle });
        tracing::info!(
            workers = self.inner.config.orchestrator.max_concurrent_tasks,
            "dispatcher started"
        );
    }

    /// Whether the dispatcher runs
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner
            .dispatcher
            .lock()
            .as_ref()
            .is_some_and(|d| !d.handle.is_finished())
    }

    /// Stop dispatching; in-flight tasks run to completion
    pub async fn stop(&self) {
        let dispatcher = self.inner.dispatcher.lock().take();
        if let Some(Dispatcher { token, handle }) = dispatcher {
            token.cancel();
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "dispatcher ended abnormally");
            }
            tracing::info!("dispatcher stopped");
        }
    }

    /// Stop dispatching and abort in-flight sandbox runs
    ///
    /// Returns once no task is running. Pending tasks stay queued.
    pub async fn stop_now(&self) {
        self.stop().await;
        let token = std::mem::replace(&mut *self.inner.shutdown.lock(), CancellationToken::new());
        token.cancel();
        self.wait_until(|state| state.running_count() == 0).await;
    }

    /// Wait until nothing is pending or running
    pub async fn wait_idle(&self) {
        self.wait_until(SchedulerState::is_idle).await;
    }

    async fn wait_until(&self, done: impl Fn(&SchedulerState) -> bool) {
        loop {
            let notified = self.inner.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if done(&self.inner.state.lock()) {
                return;
            }
            notified.await;
        }
    }

    async fn dispatch_loop(self, token: CancellationToken) {
        let cap = self.inner.config.orchestrator.max_concurrent_tasks;
        let interval = self.inner.config.orchestrator.dispatch_interval();
        loop {
            if token.is_cancelled() {
                break;
            }
            let next = match Arc::clone(&self.inner.permits).try_acquire_owned() {
                Ok(permit) => self
                    .inner
                    .state
                    .lock()
                    .next_ready(cap)
                    .map(|task| (permit, task)),
                Err(_) => None,
            };
            match next {
                Some((permit, task)) => {
                    tracing::debug!(task_id = %task.id, priority = %task.priority, "task dispatched");
                    let worker = self.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        worker.run_claimed(task).await;
                    });
                }
                None => {
                    tokio::select! {
                        () = token.cancelled() => break,
                        () = tokio::time::sleep(interval) => {}
                    }
                }
            }
        }
    }

    // ---- execution ----

    async fn run_claimed(&self, task: RefactoringTask) {
        let id = task.id;
        tracing::info!(task_id = %id, category = %task.category, files = task.target_files.len(), "task started");

        let outcome = match AssertUnwindSafe(self.run_task(&task)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => TaskOutcome::failed("task panicked"),
        };
        let error = outcome.error.clone();
        let score = outcome.improvement_score;

        let finished = self.inner.state.lock().finish(id, outcome);
        self.inner.idle.notify_waiters();

        match finished {
            Ok(TaskStatus::Completed) => {
                tracing::info!(task_id = %id, score, "task completed");
                metrics::counter!("autofix_tasks_total", "status" => "completed").increment(1);
            }
            Ok(_) => {
                tracing::warn!(task_id = %id, error = error.as_deref().unwrap_or("-"), "task failed");
                metrics::counter!("autofix_tasks_total", "status" => "failed").increment(1);
            }
            Err(e) => tracing::error!(task_id = %id, error = %e, "could not record task outcome"),
        }
    }

    async fn run_task(&self, task: &RefactoringTask) -> TaskOutcome {
        let config = &self.inner.config.orchestrator;
        let root = config.project_root.as_path();
        let cancel = self.shutdown_token();
        let targets: Vec<PathBuf> = task
            .target_files
            .iter()
            .map(|p| resolve_target(root, p))
            .collect();

        let (lease, backup) = if config.apply_changes {
            let lease = match self.lease_workspace(root) {
                Ok(lease) => lease,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "workspace busy, task not applied");
                    return TaskOutcome::failed(e.to_string());
                }
            };
            match self.create_backup(root) {
                Ok(report) => (Some(lease), Some(report.info.name)),
                Err(e) => return TaskOutcome::failed(format!("backup failed: {e}")),
            }
        } else {
            (None, None)
        };

        let mut outcome = match self.plan_and_apply(task, &targets, &cancel).await {
            Ok(outcome) => outcome,
            Err(e) => TaskOutcome {
                error: Some(e.to_string()),
                ..TaskOutcome::default()
            },
        };

        if let (Some(error), Some(name)) = (&outcome.error, &backup) {
            let relative: Vec<PathBuf> = targets
                .iter()
                .filter_map(|p| p.strip_prefix(root).ok().map(Path::to_path_buf))
                .collect();
            match self.backup_store(root).and_then(|store| {
                store
                    .rollback(name, root, Some(&relative))
                    .map_err(AutofixError::from)
            }) {
                Ok(report) => {
                    tracing::warn!(task_id = %task.id, backup = %name, restored = report.restored, %error, "task changes rolled back");
                    for change in &mut outcome.applied_changes {
                        change.written = false;
                    }
                }
                Err(e) => tracing::error!(task_id = %task.id, backup = %name, error = %e, "rollback failed"),
            }
        }
        drop(lease);
        outcome
    }

    /// Join the workspace hold shared by applying tasks, taking the lock
    /// file when no other task holds it
    fn lease_workspace(&self, root: &Path) -> Result<LeaseGuard> {
        let mut lease = self.inner.task_lease.lock();
        if lease.holders == 0 {
            lease.lock = Some(WorkspaceLock::acquire(root)?);
        }
        lease.holders += 1;
        Ok(LeaseGuard {
            inner: Arc::clone(&self.inner),
        })
    }

    async fn plan_and_apply(
        &self,
        task: &RefactoringTask,
        targets: &[PathBuf],
        cancel: &CancellationToken,
    ) -> Result<TaskOutcome> {
        let config = &self.inner.config.orchestrator;
        let mut working = WorkingSet::new();
        let mut issues = Vec::new();
        let mut analyzed = Vec::new();

        for path in targets {
            if cancel.is_cancelled() {
                return Err(AutofixError::Cancelled);
            }
            let Some(language) = Language::from_path(path) else {
                tracing::debug!(file = %path.display(), "skipping file in unsupported language");
                continue;
            };
            let code = working.load(path).await?;
            let analysis = self
                .inner
                .collaborators
                .analyzer
                .analyze_code(&code, language, task.category)
                .await?;
            tracing::debug!(file = %path.display(), issues = analysis.issues.len(), score = analysis.score, "file analyzed");
            issues.extend(analysis.issues.into_iter().map(|mut issue| {
                issue.file.clone_from(path);
                issue
            }));
            analyzed.push(path.clone());
        }

        let knowledge = self.fetch_knowledge(task).await;
        let plan = build_plan(&issues, &knowledge, &analyzed);
        tracing::info!(task_id = %task.id, issues = issues.len(), knowledge = knowledge.len(), steps = plan.len(), "plan built");

        let ctx = StepContext {
            fixer: self.inner.collaborators.fixer.as_ref(),
            runner: &self.inner.runner,
            learning: &self.inner.learning,
            test_types: &config.test_types,
            max_fix_attempts: config.max_fix_attempts,
            apply_changes: config.apply_changes,
            cancel,
        };

        let mut outcome = TaskOutcome::default();
        for step in &plan {
            if cancel.is_cancelled() {
                outcome.error = Some(AutofixError::Cancelled.to_string());
                break;
            }
            outcome.steps.push(step.apply(&ctx, &mut working).await);
        }

        outcome.applied_changes = outcome
            .steps
            .iter()
            .filter_map(crate::plan::StepResult::applied_change)
            .collect();
        outcome.improvement_score = aggregate_score(&outcome.steps);
        if outcome.error.is_none()
            && !outcome.steps.is_empty()
            && outcome.steps.iter().all(|s| !s.success)
        {
            outcome.error = Some(format!("all {} plan steps failed", outcome.steps.len()));
        }
        Ok(outcome)
    }

    async fn fetch_knowledge(&self, task: &RefactoringTask) -> Vec<KnowledgeUnit> {
        let Some(source) = &self.inner.collaborators.knowledge else {
            return Vec::new();
        };
        let context = format!("{}: {}", task.category, task.description);
        match source
            .knowledge_for_context(&context, self.inner.config.orchestrator.knowledge_limit)
            .await
        {
            Ok(units) => units,
            Err(e) => {
                tracing::warn!(task_id = %task.id, error = %e, "knowledge lookup failed, planning without it");
                Vec::new()
            }
        }
    }

    // ---- statistics ----

    /// Task counters
    #[must_use]
    pub fn refactoring_stats(&self) -> RefactoringStats {
        self.inner.state.lock().stats()
    }

    /// Learning counters and buffer state
    #[must_use]
    pub fn learning_statistics(&self) -> LearningStatistics {
        self.inner.learning.learning_statistics()
    }

    /// Fine-tuning readiness for `min_examples` samples
    #[must_use]
    pub fn finetune_status(&self, min_examples: usize) -> FinetuneStatus {
        self.inner.learning.finetune_status(min_examples)
    }

    /// Report of the most recent cycle
    #[must_use]
    pub fn last_cycle_report(&self) -> Option<CycleReport> {
        self.inner.last_report.lock().clone()
    }

    // ---- backups ----

    pub(crate) fn backup_store(&self, workspace: &Path) -> Result<BackupStore> {
        let backup = &self.inner.config.backup;
        Ok(BackupStore::open(
            backup.store_dir(workspace),
            backup.max_backups,
        )?)
    }

    /// Snapshot `dir` into its backup store
    ///
    /// # Errors
    /// Returns error if `dir` is unreadable or the store cannot be written
    pub fn create_backup(&self, dir: &Path) -> Result<BackupReport> {
        Ok(self.backup_store(dir)?.create_backup(dir)?)
    }

    /// Replace the contents of `dir` with backup `name`
    ///
    /// # Errors
    /// Returns error if the backup is missing or corrupt, or `dir` cannot be written
    pub fn rollback_changes(&self, name: &str, dir: &Path) -> Result<RollbackReport> {
        Ok(self.backup_store(dir)?.rollback(name, dir, None)?)
    }

    /// Backups of `dir`, newest first
    ///
    /// # Errors
    /// Returns error if the store cannot be listed
    pub fn list_backups(&self, dir: &Path) -> Result<Vec<BackupInfo>> {
        Ok(self.backup_store(dir)?.list_backups()?)
    }
}

/// Mean step score, 0 for an empty plan
#[allow(clippy::cast_precision_loss)]
fn aggregate_score(steps: &[crate::plan::StepResult]) -> f64 {
    if steps.is_empty() {
        return 0.0;
    }
    steps.iter().map(|s| s.improvement_score).sum::<f64>() / steps.len() as f64
}

fn resolve_target(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() || path.starts_with(root) {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
