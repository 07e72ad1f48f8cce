use autofix_sandbox::{
    EnvironmentHandle, EnvironmentSpec, ExecOutput, SandboxConfig, SandboxError, SandboxRuntime,
    SandboxTestRunner, TestError, TestRequest, TestType,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Runtime whose fragments sleep, recording provision/teardown calls
#[derive(Default)]
struct SleepyRuntime {
    exec_delay: Duration,
    provision_delay: Duration,
    provisioned: AtomicUsize,
    torn_down: AtomicUsize,
    seen_workdir: parking_lot::Mutex<Option<PathBuf>>,
}

impl SleepyRuntime {
    fn new(exec_delay: Duration) -> Self {
        Self {
            exec_delay,
            ..Self::default()
        }
    }

    /// Environment counts as created as soon as provisioning starts
    fn slow_to_provision(provision_delay: Duration) -> Self {
        Self {
            provision_delay,
            ..Self::default()
        }
    }
}

#[async_trait::async_trait]
impl SandboxRuntime for SleepyRuntime {
    fn name(&self) -> &'static str {
        "sleepy"
    }

    fn allocate(&self, spec: &EnvironmentSpec) -> EnvironmentHandle {
        EnvironmentHandle {
            id: "sleepy-1".into(),
            workdir: spec.workdir.clone(),
            image: None,
        }
    }

    async fn provision(&self, spec: &EnvironmentSpec, _env: &EnvironmentHandle) -> Result<(), SandboxError> {
        self.provisioned.fetch_add(1, Ordering::SeqCst);
        *self.seen_workdir.lock() = Some(spec.workdir.clone());
        tokio::time::sleep(self.provision_delay).await;
        Ok(())
    }

    async fn health_check(&self, _env: &EnvironmentHandle) -> Result<bool, SandboxError> {
        Ok(true)
    }

    async fn exec(&self, env: &EnvironmentHandle, _script: &str) -> Result<ExecOutput, SandboxError> {
        assert!(env.workdir.join("main.py").exists(), "code must be materialized");
        tokio::time::sleep(self.exec_delay).await;
        Ok(ExecOutput {
            exit_code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        })
    }

    async fn teardown(&self, _env: &EnvironmentHandle) -> Result<(), SandboxError> {
        self.torn_down.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn request() -> TestRequest {
    TestRequest::new("src/main.py", "print 'hi'", "print('hi')\n")
        .with_test_types(vec![TestType::Syntax])
}

#[tokio::test]
async fn timeout_fails_the_run_and_tears_down() {
    let runtime = Arc::new(SleepyRuntime::new(Duration::from_secs(30)));
    let runner = SandboxTestRunner::with_runtime(SandboxConfig::default(), runtime.clone());

    let result = runner
        .run_test(request().with_timeout(Duration::from_millis(50)))
        .await;

    assert!(!result.success);
    assert_eq!(result.test_error, Some(TestError::Timeout { limit_ms: 50 }));
    assert_eq!(runtime.torn_down.load(Ordering::SeqCst), 1);
    assert!(result.environment.is_some());

    let scratch = runtime.seen_workdir.lock().clone().unwrap();
    assert!(!scratch.exists(), "scratch directory must be removed");
}

#[tokio::test]
async fn timeout_during_provisioning_still_tears_down() {
    let runtime = Arc::new(SleepyRuntime::slow_to_provision(Duration::from_secs(2)));
    let runner = SandboxTestRunner::with_runtime(SandboxConfig::default(), runtime.clone());

    let result = runner
        .run_test(request().with_timeout(Duration::from_millis(50)))
        .await;

    assert_eq!(result.test_error, Some(TestError::Timeout { limit_ms: 50 }));
    assert_eq!(runtime.provisioned.load(Ordering::SeqCst), 1);
    assert_eq!(runtime.torn_down.load(Ordering::SeqCst), 1, "environment leaked");
    assert!(result.environment.is_none());
}

#[tokio::test]
async fn cancellation_during_provisioning_still_tears_down() {
    let runtime = Arc::new(SleepyRuntime::slow_to_provision(Duration::from_secs(30)));
    let runner = SandboxTestRunner::with_runtime(SandboxConfig::default(), runtime.clone());
    let token = CancellationToken::new();
    token.cancel();

    let result = runner.run_test_cancellable(request(), &token).await;

    assert_eq!(result.test_error, Some(TestError::Cancelled));
    assert_eq!(runtime.torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_tears_down_promptly() {
    let runtime = Arc::new(SleepyRuntime::new(Duration::from_secs(30)));
    let runner = SandboxTestRunner::with_runtime(SandboxConfig::default(), runtime.clone());
    let token = CancellationToken::new();

    let canceller = {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            token.cancel();
        })
    };

    let started = std::time::Instant::now();
    let result = runner.run_test_cancellable(request(), &token).await;
    canceller.await.unwrap();

    assert_eq!(result.test_error, Some(TestError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(runtime.torn_down.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn workspace_file_is_never_written() {
    let workspace = tempfile::tempdir().unwrap();
    let target = workspace.path().join("main.py");
    std::fs::write(&target, "print 'hi'").unwrap();

    let runtime = Arc::new(SleepyRuntime::new(Duration::ZERO));
    let runner = SandboxTestRunner::with_runtime(SandboxConfig::default(), runtime.clone());
    let result = runner
        .run_test(TestRequest::new(&target, "print 'hi'", "print('hi')\n"))
        .await;

    assert!(result.success, "{}", result.summary());
    assert_eq!(std::fs::read_to_string(&target).unwrap(), "print 'hi'");
    let scratch = runtime.seen_workdir.lock().clone().unwrap();
    assert!(!scratch.starts_with(workspace.path()));
}
