use autofix_core::{
    AutofixConfig, AutofixError, Category, Collaborators, FileStatus, FixGenerator, Issue,
    RefactoringOrchestrator, RemediationError, SecurityIssue, Severity,
};
use autofix_learning::ModelTrainer;
use autofix_sandbox::Language;
use autofix_test_utils::{
    appending_fixer, collaborators, identity_fixer, orchestrator, read, test_config,
    workspace_with, RecordingTrainer, ScriptedRuntime, StaticSast, BROKEN,
};
use autofix_workspace::{lock_path, WorkspaceLock};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use std::path::Path;
use std::sync::Arc;
use tempfile::TempDir;

/// Fixer whose model gives up on files mentioning `fail`
struct FlakyFixer;

#[async_trait::async_trait]
impl FixGenerator for FlakyFixer {
    async fn fix_code(&self, code: &str, _issues: &[Issue], _language: Language) -> autofix_core::Result<String> {
        if code.contains("fail") {
            Err(AutofixError::Model("model offline".into()))
        } else {
            Ok(format!("{code}# fixed\n"))
        }
    }
}

fn issue(file: &str) -> Issue {
    Issue::new(file, Category::Quality, Severity::Medium, "style").at_line(1)
}

fn build(
    workspace: &TempDir,
    data: &TempDir,
    collaborators: Collaborators,
    trainer: Arc<dyn ModelTrainer>,
    configure: impl FnOnce(&mut AutofixConfig),
) -> RefactoringOrchestrator {
    let mut config = test_config(workspace.path(), data.path());
    configure(&mut config);
    orchestrator(config, collaborators, Arc::new(ScriptedRuntime::new()), trainer)
}

type Recorded = Arc<Mutex<Vec<(String, u8)>>>;

async fn run(o: &RefactoringOrchestrator, dir: &Path) -> (autofix_core::Result<autofix_core::CycleReport>, Vec<(String, u8)>) {
    let seen: Recorded = Arc::default();
    let sink = Arc::clone(&seen);
    let callback = move |message: &str, percent: u8| sink.lock().push((message.to_string(), percent));
    let result = o.run_full_cycle(dir, Some(&callback)).await;
    let seen = seen.lock().clone();
    (result, seen)
}

fn assert_single_final_100(progress: &[(String, u8)]) {
    assert_eq!(progress.iter().filter(|(_, p)| *p == 100).count(), 1);
    assert_eq!(progress.last().map(|(_, p)| *p), Some(100));
    assert!(progress.windows(2).all(|w| w[0].1 <= w[1].1), "progress must not go backwards");
}

#[tokio::test]
async fn passing_fix_is_kept_and_learned_from() {
    let ws = workspace_with(&[("app.py", "x = 1\n")]);
    let data = tempfile::tempdir().unwrap();
    let trainer = Arc::new(RecordingTrainer::new());
    let o = build(
        &ws,
        &data,
        collaborators(vec![issue("app.py")], appending_fixer("# fixed\n")),
        trainer.clone(),
        |c| {
            c.orchestrator.auto_update = true;
            c.learning.batch_size = 1;
        },
    );

    let (result, progress) = run(&o, ws.path()).await;
    let report = result.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.issues_found, 1);
    assert_eq!(report.count(FileStatus::Passed), 1);
    assert_eq!(report.feedback_accepted, 1);
    assert_eq!(report.model_update.as_deref(), Some("completed base -> ft-1"));
    assert_eq!(trainer.batches(), vec![1]);
    assert_eq!(read(ws.path(), "app.py"), "x = 1\n# fixed\n");
    assert!(!lock_path(ws.path()).exists());
    assert!(report.backup.is_some());
    assert_single_final_100(&progress);
    assert_eq!(o.last_cycle_report(), Some(report));
}

#[tokio::test]
async fn failing_fix_is_reverted_and_rejected() {
    let ws = workspace_with(&[("app.py", "x = 1\n"), ("ok.py", "y = 2\n")]);
    let data = tempfile::tempdir().unwrap();
    let fixer: Arc<dyn FixGenerator> = Arc::new(autofix_test_utils::FnFixer(
        |code: &str, _: &[Issue], _: Language| {
            if code.starts_with('x') {
                format!("{code}{BROKEN}\n")
            } else {
                format!("{code}# fixed\n")
            }
        },
    ));
    let o = build(
        &ws,
        &data,
        collaborators(vec![issue("app.py"), issue("ok.py")], fixer),
        Arc::new(RecordingTrainer::new()),
        |_| {},
    );

    let (result, _) = run(&o, ws.path()).await;
    let report = result.unwrap();

    assert!(report.succeeded());
    assert_eq!(report.count(FileStatus::Reverted), 1);
    assert_eq!(report.count(FileStatus::Passed), 1);
    assert_eq!(report.feedback_rejected, 1);
    assert_eq!(read(ws.path(), "app.py"), "x = 1\n");
    assert_eq!(read(ws.path(), "ok.py"), "y = 2\n# fixed\n");
    assert!(!report.rolled_back);
}

#[tokio::test]
async fn model_failure_restores_the_workspace() {
    let ws = workspace_with(&[("a.py", "a = 1\n"), ("b.py", "fail = 1\n")]);
    let data = tempfile::tempdir().unwrap();
    let o = build(
        &ws,
        &data,
        collaborators(vec![issue("a.py"), issue("b.py")], Arc::new(FlakyFixer)),
        Arc::new(RecordingTrainer::new()),
        |_| {},
    );

    let (result, progress) = run(&o, ws.path()).await;

    assert!(matches!(result, Err(AutofixError::Model(_))));
    // a.py was fixed before b.py failed; the backup undoes it
    assert_eq!(read(ws.path(), "a.py"), "a = 1\n");
    assert_eq!(read(ws.path(), "b.py"), "fail = 1\n");
    assert!(!lock_path(ws.path()).exists());
    assert_single_final_100(&progress);

    let report = o.last_cycle_report().unwrap();
    assert!(report.rolled_back);
    assert!(report.error.unwrap().contains("model offline"));
}

#[tokio::test]
async fn locked_workspace_is_refused_without_changes() {
    let ws = workspace_with(&[("app.py", "x = 1\n")]);
    let data = tempfile::tempdir().unwrap();
    let o = build(
        &ws,
        &data,
        collaborators(vec![issue("app.py")], appending_fixer("# fixed\n")),
        Arc::new(RecordingTrainer::new()),
        |_| {},
    );

    let held = WorkspaceLock::acquire(ws.path()).unwrap();
    let (result, progress) = run(&o, ws.path()).await;

    let err = result.unwrap_err();
    assert!(err.is_lock_contention());
    assert!(matches!(
        err,
        AutofixError::Remediation(RemediationError::WorkspaceLocked { .. })
    ));
    assert_eq!(read(ws.path(), "app.py"), "x = 1\n");
    assert!(o.list_backups(ws.path()).unwrap().is_empty());
    assert_single_final_100(&progress);

    held.release().unwrap();
    let (second, _) = run(&o, ws.path()).await;
    assert!(second.unwrap().succeeded());
}

#[tokio::test]
async fn sast_findings_join_the_scan_and_unchanged_files_are_reported() {
    let ws = workspace_with(&[("app.py", "x = 1\n"), ("notes.txt", "todo\n")]);
    let data = tempfile::tempdir().unwrap();
    let finding = SecurityIssue {
        file: "app.py".into(),
        line: Some(1),
        rule_id: "B307".into(),
        description: "use of eval".into(),
        severity: Severity::High,
        cwe: Some("CWE-95".into()),
    };
    let collaborators = collaborators(vec![issue("notes.txt")], identity_fixer())
        .with_sast(Arc::new(StaticSast(vec![finding])));
    let o = build(&ws, &data, collaborators, Arc::new(RecordingTrainer::new()), |_| {});

    let issues = o.scan_workspace(ws.path()).await.unwrap();
    assert_eq!(issues.len(), 2);
    assert!(issues.iter().all(|i| i.file.starts_with(ws.path())));
    assert!(issues.iter().any(|i| i.category == Category::Security));

    let (result, _) = run(&o, ws.path()).await;
    let report = result.unwrap();
    assert_eq!(report.count(FileStatus::Unchanged), 1);
    assert_eq!(report.count(FileStatus::Skipped), 1);
    assert_eq!(report.feedback_accepted + report.feedback_rejected, 0);
}
