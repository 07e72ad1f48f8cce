//! Scan, fix, test, learn
//!
//! [`RefactoringOrchestrator::run_full_cycle`] drives one remediation pass
//! over a workspace:
//!
//! | progress | stage |
//! |---|---|
//! | 5 | lock the workspace |
//! | 10 | back it up |
//! | 20 | scan (plus SAST) |
//! | 30 | generate and apply fixes |
//! | 60 | sandbox-test applied fixes, revert failures |
//! | 70 | feed outcomes to the learning service |
//! | 90 | optional model update |
//! | 95 | cleanup |
//! | 100 | done, success or failure |
//!
//! Any error restores the workspace from the pre-cycle backup. The lock is
//! released, a report is stored and progress reaches 100 on every path.

use crate::error::{AutofixError, Result};
use crate::feedback::feedback_from_test;
use crate::orchestrator::RefactoringOrchestrator;
use crate::report::{CycleReport, FileOutcome, FileStatus};
use crate::types::Issue;
use autofix_learning::UpdateOutcome;
use autofix_sandbox::{Language, TestRequest, TestResult};
use autofix_workspace::{WorkspaceError, WorkspaceLock};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast::error::TryRecvError;
use tokio_util::sync::CancellationToken;

/// Progress callback: message and percentage
pub type ProgressCallback = dyn Fn(&str, u8) + Send + Sync;

/// Forwards checkpoints and guarantees a single 100
struct Progress<'a> {
    callback: Option<&'a ProgressCallback>,
    finished: bool,
}

impl<'a> Progress<'a> {
    fn new(callback: Option<&'a ProgressCallback>) -> Self {
        Self {
            callback,
            finished: false,
        }
    }

    fn report(&self, message: &str, percent: u8) {
        tracing::debug!(percent, "{message}");
        if let (false, Some(cb)) = (self.finished, self.callback) {
            cb(message, percent.min(99));
        }
    }

    fn finish(&mut self, message: &str) {
        if self.finished {
            return;
        }
        self.finished = true;
        if let Some(cb) = self.callback {
            cb(message, 100);
        }
    }
}

struct AppliedFix {
    file: PathBuf,
    language: Language,
    original: String,
    fixed: String,
    issues: usize,
}

impl RefactoringOrchestrator {
    /// Run one cycle over `dir`, cancelled by [`stop_now`](Self::stop_now)
    ///
    /// # Errors
    /// Returns the first unhandled error after the workspace was restored
    /// and unlocked; lock contention fails immediately with
    /// `RemediationError::WorkspaceLocked`
    pub async fn run_full_cycle(
        &self,
        dir: &Path,
        progress: Option<&ProgressCallback>,
    ) -> Result<CycleReport> {
        let cancel = self.shutdown_token();
        self.run_cycle_cancellable(dir, progress, &cancel).await
    }

    /// Run one cycle over `dir`, stopping at the next stage boundary when
    /// `cancel` fires
    ///
    /// # Errors
    /// See [`run_full_cycle`](Self::run_full_cycle)
    pub async fn run_cycle_cancellable(
        &self,
        dir: &Path,
        progress: Option<&ProgressCallback>,
        cancel: &CancellationToken,
    ) -> Result<CycleReport> {
        let mut progress = Progress::new(progress);
        let mut report = CycleReport::new(dir);
        tracing::info!(workspace = %dir.display(), "cycle started");

        progress.report("locking workspace", 5);
        let outcome = match self.lock_workspace(dir) {
            Ok(lock) => {
                let outcome = self.cycle_body(dir, &mut report, &progress, cancel).await;
                if let Err(e) = &outcome {
                    self.restore(dir, &mut report, e);
                }
                if let Err(e) = lock.release() {
                    tracing::warn!(workspace = %dir.display(), error = %e, "failed to release workspace lock");
                }
                outcome
            }
            Err(e) => Err(e),
        };

        match &outcome {
            Ok(()) => {
                report.finish(None);
                progress.finish("cycle completed");
                tracing::info!(
                    workspace = %dir.display(),
                    passed = report.count(FileStatus::Passed),
                    reverted = report.count(FileStatus::Reverted),
                    "cycle completed"
                );
                metrics::counter!("autofix_cycles_total", "outcome" => "success").increment(1);
            }
            Err(e) => {
                report.finish(Some(e.to_string()));
                progress.finish(&format!("cycle failed: {e}"));
                tracing::error!(workspace = %dir.display(), error = %e, rolled_back = report.rolled_back, "cycle failed");
                metrics::counter!("autofix_cycles_total", "outcome" => "failure").increment(1);
            }
        }
        tracing::debug!(report = %report, "cycle report");
        *self.inner.last_report.lock() = Some(report.clone());

        outcome.map(|()| report)
    }

    /// Issues reported for `dir` by the scanner and, when enabled, the SAST analyzer
    ///
    /// # Errors
    /// Returns `AutofixError::Scan` if a scan fails
    pub async fn scan_workspace(&self, dir: &Path) -> Result<Vec<Issue>> {
        let collaborators = &self.inner.collaborators;
        let scan = collaborators
            .scanner
            .start_scan(dir)
            .await
            .map_err(|e| AutofixError::Scan(e.to_string()))?;
        let mut issues = collaborators
            .scanner
            .get_issues(&scan)
            .await
            .map_err(|e| AutofixError::Scan(e.to_string()))?;
        tracing::debug!(scan = %scan, issues = issues.len(), "scan finished");

        if let (true, Some(sast)) = (self.inner.config.orchestrator.run_sast, &collaborators.sast) {
            let findings = sast
                .analyze_project(dir)
                .await
                .map_err(|e| AutofixError::Scan(format!("sast: {e}")))?;
            tracing::debug!(findings = findings.len(), "sast finished");
            issues.extend(findings.into_iter().map(Issue::from));
        }

        for issue in &mut issues {
            if issue.file.is_relative() {
                issue.file = dir.join(&issue.file);
            }
        }
        Ok(issues)
    }

    fn lock_workspace(&self, dir: &Path) -> Result<WorkspaceLock> {
        WorkspaceLock::acquire(dir).map_err(|e| {
            if let WorkspaceError::Locked { holder } = &e {
                if holder.is_stale(self.inner.config.backup.lock_stale_after()) {
                    tracing::warn!(
                        workspace = %dir.display(),
                        pid = holder.pid,
                        locked_at = %holder.locked_at,
                        "workspace lock looks stale; remove it manually if no cycle is running"
                    );
                }
            }
            AutofixError::from(e)
        })
    }

    fn restore(&self, dir: &Path, report: &mut CycleReport, cause: &AutofixError) {
        let Some(backup) = report.backup.clone() else {
            return;
        };
        match self.rollback_changes(&backup, dir) {
            Ok(restored) => {
                report.rolled_back = true;
                tracing::warn!(
                    backup = %backup,
                    restored = restored.restored,
                    removed = restored.removed,
                    error = %cause,
                    "workspace restored after cycle failure"
                );
            }
            Err(e) => tracing::error!(backup = %backup, error = %e, "rollback after cycle failure failed"),
        }
    }

    async fn cycle_body(
        &self,
        dir: &Path,
        report: &mut CycleReport,
        progress: &Progress<'_>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let config = &self.inner.config.orchestrator;
        let mut signals = self.inner.learning.subscribe_updates();

        progress.report("creating backup", 10);
        let backup = self.create_backup(dir)?;
        report.backup = Some(backup.info.name);
        checkpoint(cancel)?;

        progress.report("scanning for issues", 20);
        let issues = self.scan_workspace(dir).await?;
        report.issues_found = issues.len();
        let mut by_file: BTreeMap<PathBuf, Vec<Issue>> = BTreeMap::new();
        for issue in issues {
            by_file.entry(issue.file.clone()).or_default().push(issue);
        }
        checkpoint(cancel)?;

        progress.report("generating fixes", 30);
        let mut applied = Vec::new();
        for (file, issues) in by_file {
            checkpoint(cancel)?;
            let language = match (file.starts_with(dir), Language::from_path(&file)) {
                (true, Some(language)) => language,
                _ => {
                    report.files.push(skipped(file, issues.len()));
                    continue;
                }
            };
            let original = tokio::fs::read_to_string(&file)
                .await
                .map_err(|e| AutofixError::file(&file, e))?;
            let fixed = self
                .inner
                .collaborators
                .fixer
                .fix_code(&original, &issues, language)
                .await?;
            if fixed == original {
                report.files.push(FileOutcome {
                    file,
                    issues: issues.len(),
                    status: FileStatus::Unchanged,
                    improvement_score: None,
                    detail: None,
                });
                continue;
            }
            tokio::fs::write(&file, &fixed)
                .await
                .map_err(|e| AutofixError::file(&file, e))?;
            applied.push(AppliedFix {
                file,
                language,
                original,
                fixed,
                issues: issues.len(),
            });
        }

        progress.report("testing applied fixes", 60);
        let mut results: Vec<TestResult> = Vec::with_capacity(applied.len());
        for fix in &applied {
            let request = TestRequest::new(&fix.file, fix.original.clone(), fix.fixed.clone())
                .with_language(fix.language)
                .with_test_types(config.test_types.clone());
            let result = self.inner.runner.run_test_cancellable(request, cancel).await;
            let status = if result.success {
                FileStatus::Passed
            } else {
                tokio::fs::write(&fix.file, &fix.original)
                    .await
                    .map_err(|e| AutofixError::file(&fix.file, e))?;
                tracing::info!(file = %fix.file.display(), reason = %result.summary(), "fix reverted");
                FileStatus::Reverted
            };
            report.files.push(FileOutcome {
                file: fix.file.clone(),
                issues: fix.issues,
                status,
                improvement_score: Some(result.improvement_score),
                detail: result.test_error.as_ref().map(ToString::to_string),
            });
            results.push(result);
        }
        checkpoint(cancel)?;

        progress.report("recording feedback", 70);
        let mut update_ready = false;
        for result in &results {
            let receipt = self.inner.learning.collect_feedback(feedback_from_test(result));
            if receipt.accepted {
                report.feedback_accepted += 1;
            } else {
                report.feedback_rejected += 1;
            }
            update_ready |= receipt.update_ready;
        }
        update_ready |= matches!(signals.try_recv(), Ok(_) | Err(TryRecvError::Lagged(_)));

        progress.report("checking for model update", 90);
        if config.auto_update && update_ready {
            report.model_update = Some(self.run_model_update().await);
        }

        progress.report("cleaning up", 95);
        Ok(())
    }

    async fn run_model_update(&self) -> String {
        let batch = self.inner.config.learning.batch_size;
        match self.inner.learning.trigger_update(batch, false).await {
            Ok(UpdateOutcome::Completed(update)) => format!(
                "completed {} -> {}",
                update.previous_version,
                update.new_version.as_deref().unwrap_or("?")
            ),
            Ok(UpdateOutcome::Failed(update)) => {
                format!("failed: {}", update.error.as_deref().unwrap_or("unknown error"))
            }
            Ok(UpdateOutcome::Skipped(reason)) => format!("skipped: {reason}"),
            Err(e) => {
                tracing::warn!(error = %e, "model update could not start");
                format!("not started: {e}")
            }
        }
    }
}

fn checkpoint(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(AutofixError::Cancelled)
    } else {
        Ok(())
    }
}

fn skipped(file: PathBuf, issues: usize) -> FileOutcome {
    FileOutcome {
        file,
        issues,
        status: FileStatus::Skipped,
        improvement_score: None,
        detail: None,
    }
}
