//! Sandboxed Test Runner
//!
//! One run:
//! 1. Materialize the modified code into a fresh temp directory
//! 2. Compose the check fragments for the language
//! 3. Allocate the environment identity, provision it and wait for it to
//!    become healthy
//! 4. Run fragments in order, stopping at the first failure
//! 5. Tear the environment and the temp directory down
//!
//! Provisioning, health checks and fragments are bounded by the overall
//! timeout and the cancellation token. The identity exists before any of them
//! is awaited, so step 5 always has something to target and always runs. Failures of any step are reported on the
//! returned [`TestResult`]; the runner itself never fails.

use crate::command::TestCommand;
use crate::config::SandboxConfig;
use crate::error::TestError;
use crate::result::{EnvironmentInfo, TestRequest, TestResult};
use crate::runtime::{runtime_from_config, EnvironmentHandle, EnvironmentSpec, SandboxRuntime};
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

/// Evaluates fixes in disposable environments
#[derive(Clone)]
pub struct SandboxTestRunner {
    config: SandboxConfig,
    runtime: Arc<dyn SandboxRuntime>,
}

impl std::fmt::Debug for SandboxTestRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SandboxTestRunner")
            .field("runtime", &self.runtime.name())
            .field("timeout_secs", &self.config.timeout_secs)
            .finish()
    }
}

/// Provisioning progress; read by the teardown path
#[derive(Default)]
struct Provisioned {
    ready: bool,
    health_checks: u32,
}

/// Output gathered by the fragments that ran
#[derive(Default)]
struct Transcript {
    stdout: String,
    stderr: String,
    passed: Vec<crate::language::TestType>,
    failed_fragment: Option<String>,
}

impl SandboxTestRunner {
    /// Create runner with the runtime selected by `config`
    #[must_use]
    pub fn new(config: SandboxConfig) -> Self {
        let runtime = runtime_from_config(&config);
        Self { config, runtime }
    }

    /// Create runner with an explicit runtime
    #[must_use]
    pub fn with_runtime(config: SandboxConfig, runtime: Arc<dyn SandboxRuntime>) -> Self {
        Self { config, runtime }
    }

    /// Configuration in force
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }

    /// Runtime backend name
    #[must_use]
    pub fn runtime_name(&self) -> &'static str {
        self.runtime.name()
    }

    /// Evaluate one fix
    pub async fn run_test(&self, request: TestRequest) -> TestResult {
        self.run_test_cancellable(request, &CancellationToken::new())
            .await
    }

    /// Evaluate one fix, aborting promptly when `cancel` fires
    pub async fn run_test_cancellable(
        &self,
        request: TestRequest,
        cancel: &CancellationToken,
    ) -> TestResult {
        let started = Instant::now();
        let mut result = TestResult::for_request(&request);

        let Some(language) = result.language else {
            let error = TestError::NoTestCommand {
                language: format!("unknown ({})", request.file_path.display()),
            };
            return self.complete(result, Some(error), started);
        };

        let file_name = request
            .file_path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or_else(|| format!("snippet.{}", language.extension()), str::to_string);

        let command = match TestCommand::build(language, &request.test_types, &file_name) {
            Ok(command) => command,
            Err(error) => return self.complete(result, Some(error), started),
        };
        result.command = Some(command.render());

        let scratch = match materialize(&file_name, &request.modified_code) {
            Ok(dir) => dir,
            Err(error) => return self.complete(result, Some(error), started),
        };

        let spec = EnvironmentSpec {
            workdir: scratch.path().to_path_buf(),
            language,
            image: self.config.image_for(language),
            memory_limit: self.config.memory_limit.clone(),
            cpu_limit: self.config.cpu_limit,
        };
        let limit = request.timeout.unwrap_or_else(|| self.config.timeout());
        let env = self.runtime.allocate(&spec);
        let provisioned = Mutex::new(Provisioned::default());
        let transcript = Mutex::new(Transcript::default());

        tracing::debug!(
            file = %request.file_path.display(),
            runtime = self.runtime.name(),
            env_id = %env.id,
            command = %command.render(),
            "sandbox run started"
        );

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => Err(TestError::Cancelled),
            res = tokio::time::timeout(limit, self.execute(&spec, &env, &command, &provisioned, &transcript)) => {
                res.unwrap_or(Err(TestError::Timeout { limit_ms: millis(limit) }))
            }
        };

        let Provisioned {
            ready,
            health_checks,
        } = std::mem::take(&mut *provisioned.lock());
        if let Err(e) = self.runtime.teardown(&env).await {
            tracing::warn!(env_id = %env.id, error = %e, "sandbox teardown failed");
        }
        if ready {
            result.environment = Some(EnvironmentInfo {
                runtime: self.runtime.name().to_string(),
                id: env.id,
                image: env.image,
                health_checks,
            });
        }
        if let Err(e) = scratch.close() {
            tracing::warn!(error = %e, "failed to remove sandbox scratch directory");
        }

        let transcript = std::mem::take(&mut *transcript.lock());
        result.stdout = transcript.stdout;
        result.stderr = transcript.stderr;
        result.test_types = transcript.passed;
        result.failed_fragment = transcript.failed_fragment;

        self.complete(result, outcome.err(), started)
    }

    async fn execute(
        &self,
        spec: &EnvironmentSpec,
        env: &EnvironmentHandle,
        command: &TestCommand,
        provisioned: &Mutex<Provisioned>,
        transcript: &Mutex<Transcript>,
    ) -> Result<(), TestError> {
        self.runtime
            .provision(spec, env)
            .await
            .map_err(TestError::from_provision)?;
        provisioned.lock().ready = true;

        self.wait_healthy(env, provisioned).await?;

        for fragment in &command.fragments {
            let output = self
                .runtime
                .exec(env, &fragment.script)
                .await
                .map_err(|e| TestError::Crashed {
                    message: e.to_string(),
                })?;

            let mut t = transcript.lock();
            t.stdout.push_str(&output.stdout);
            t.stderr.push_str(&output.stderr);
            match output.exit_code {
                Some(0) => t.passed.push(fragment.test_type),
                Some(exit_code) => {
                    t.failed_fragment = Some(fragment.script.clone());
                    return Err(TestError::CommandFailed {
                        test_type: fragment.test_type,
                        exit_code,
                    });
                }
                None => {
                    t.failed_fragment = Some(fragment.script.clone());
                    return Err(TestError::Crashed {
                        message: format!("{} check killed by signal", fragment.test_type),
                    });
                }
            }
        }
        Ok(())
    }

    async fn wait_healthy(
        &self,
        env: &EnvironmentHandle,
        provisioned: &Mutex<Provisioned>,
    ) -> Result<(), TestError> {
        let retries = self.config.health_check_retries.max(1);
        for attempt in 1..=retries {
            provisioned.lock().health_checks = attempt;
            match self.runtime.health_check(env).await {
                Ok(true) => return Ok(()),
                Ok(false) => {}
                Err(e) => {
                    tracing::debug!(env_id = %env.id, attempt, error = %e, "health probe errored");
                }
            }
            if attempt < retries {
                tokio::time::sleep(self.config.health_check_interval()).await;
            }
        }
        Err(TestError::HealthCheckFailed { attempts: retries })
    }

    fn complete(
        &self,
        mut result: TestResult,
        error: Option<TestError>,
        started: Instant,
    ) -> TestResult {
        result.finish(error, started.elapsed());

        let outcome = match &result.test_error {
            None => "passed",
            Some(TestError::Timeout { .. }) => "timeout",
            Some(TestError::Cancelled) => "cancelled",
            Some(e) if e.is_infrastructure() => "infrastructure",
            Some(_) => "failed",
        };
        metrics::counter!("autofix_sandbox_runs_total", "outcome" => outcome).increment(1);

        if result.success {
            tracing::info!(
                file = %result.file_path.display(),
                elapsed_ms = millis(result.execution_time),
                score = result.improvement_score,
                "sandbox run passed"
            );
        } else {
            tracing::info!(
                file = %result.file_path.display(),
                outcome,
                reason = %result.summary(),
                "sandbox run failed"
            );
        }
        result
    }
}

fn materialize(file_name: &str, code: &str) -> Result<tempfile::TempDir, TestError> {
    let to_error = |e: std::io::Error| TestError::Materialize {
        message: e.to_string(),
    };
    let dir = tempfile::Builder::new()
        .prefix("autofix-sandbox-")
        .tempdir()
        .map_err(to_error)?;
    std::fs::write(dir.path().join(Path::new(file_name)), code).map_err(to_error)?;
    Ok(dir)
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SandboxError;
    use crate::language::{Language, TestType};
    use crate::runtime::{ExecOutput, MockSandboxRuntime};

    fn handle() -> EnvironmentHandle {
        EnvironmentHandle {
            id: "env-1".into(),
            workdir: "/workspace".into(),
            image: Some("python:3.12-slim".into()),
        }
    }

    fn config() -> SandboxConfig {
        SandboxConfig::new().with_health_checks(3, Duration::from_millis(1))
    }

    fn request() -> TestRequest {
        TestRequest::new("app.py", "x=1", "x = 1\n")
            .with_test_types(vec![TestType::Syntax, TestType::Lint])
    }

    fn mock_runtime() -> MockSandboxRuntime {
        let mut runtime = MockSandboxRuntime::new();
        runtime.expect_name().return_const("mock");
        runtime.expect_allocate().returning(|_| handle());
        runtime
    }

    #[tokio::test]
    async fn missing_image_is_reported_and_identity_released() {
        let mut runtime = mock_runtime();
        runtime
            .expect_provision()
            .returning(|spec, _| Err(SandboxError::ImageNotFound(spec.image.clone())));
        runtime
            .expect_teardown()
            .times(1)
            .withf(|env| env.id == "env-1")
            .returning(|_| Ok(()));

        let runner = SandboxTestRunner::with_runtime(config(), Arc::new(runtime));
        let result = runner.run_test(request()).await;

        assert!(!result.success);
        assert_eq!(
            result.test_error,
            Some(TestError::ImageNotFound {
                image: "python:3.12-slim".into()
            })
        );
        assert!(result.environment.is_none());
        assert!((result.improvement_score - 0.2).abs() < 1e-9);
    }

    #[tokio::test]
    async fn unhealthy_environment_is_torn_down() {
        let mut runtime = mock_runtime();
        runtime.expect_provision().returning(|_, _| Ok(()));
        runtime.expect_health_check().times(3).returning(|_| Ok(false));
        runtime.expect_exec().never();
        runtime.expect_teardown().times(1).returning(|_| Ok(()));

        let runner = SandboxTestRunner::with_runtime(config(), Arc::new(runtime));
        let result = runner.run_test(request()).await;

        assert_eq!(
            result.test_error,
            Some(TestError::HealthCheckFailed { attempts: 3 })
        );
        assert_eq!(result.environment.unwrap().health_checks, 3);
    }

    #[tokio::test]
    async fn first_failing_fragment_stops_the_run() {
        let mut runtime = mock_runtime();
        runtime.expect_provision().returning(|_, _| Ok(()));
        runtime.expect_health_check().returning(|_| Ok(true));
        runtime.expect_exec().times(1).returning(|_, _| {
            Ok(ExecOutput {
                exit_code: Some(1),
                stdout: String::new(),
                stderr: "SyntaxError: invalid syntax".into(),
            })
        });
        runtime.expect_teardown().times(1).returning(|_| Ok(()));

        let runner = SandboxTestRunner::with_runtime(config(), Arc::new(runtime));
        let result = runner.run_test(request()).await;

        assert!(!result.success);
        assert!(result.test_error.as_ref().unwrap().is_syntax_error());
        assert_eq!(
            result.failed_fragment.as_deref(),
            Some("python3 -m py_compile app.py")
        );
        assert!(result.stderr.contains("SyntaxError"));
        assert!((result.improvement_score - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn passing_run_records_checks_and_score() {
        let mut runtime = mock_runtime();
        runtime.expect_provision().returning(|_, _| Ok(()));
        runtime.expect_health_check().returning(|_| Ok(true));
        runtime.expect_exec().times(2).returning(|_, _| {
            Ok(ExecOutput {
                exit_code: Some(0),
                stdout: "ok\n".into(),
                stderr: String::new(),
            })
        });
        runtime.expect_teardown().times(1).returning(|_| Ok(()));

        let runner = SandboxTestRunner::with_runtime(config(), Arc::new(runtime));
        let result = runner.run_test(request()).await;

        assert!(result.success, "{}", result.summary());
        assert_eq!(result.test_types, vec![TestType::Syntax, TestType::Lint]);
        assert_eq!(result.stdout, "ok\nok\n");
        assert!((result.improvement_score - 1.0).abs() < 1e-9);
        assert_eq!(result.language, Some(Language::Python));
    }

    #[tokio::test]
    async fn unknown_language_fails_before_provisioning() {
        let mut runtime = MockSandboxRuntime::new();
        runtime.expect_name().return_const("mock");
        runtime.expect_allocate().never();
        runtime.expect_provision().never();

        let runner = SandboxTestRunner::with_runtime(config(), Arc::new(runtime));
        let result = runner
            .run_test(TestRequest::new("notes.txt", "a", "b"))
            .await;
        assert!(matches!(
            result.test_error,
            Some(TestError::NoTestCommand { .. })
        ));
    }
}
