//! Local process runtime
//!
//! Runs fragments with `sh -c` inside the scratch directory. The host
//! environment is cleared except for an allow-list, `HOME` and `TMPDIR`
//! point into the scratch directory, and children are killed when the
//! exec future is dropped.

use super::{EnvironmentHandle, EnvironmentSpec, ExecOutput, SandboxRuntime};
use crate::error::SandboxError;
use std::process::Stdio;
use tokio::process::Command;

/// Process-scoped sandbox
#[derive(Debug, Clone)]
pub struct ProcessRuntime {
    pass_env: Vec<String>,
    shell: String,
}

impl ProcessRuntime {
    /// Create runtime passing only `pass_env` through from the host
    #[must_use]
    pub fn new(pass_env: Vec<String>) -> Self {
        Self {
            pass_env,
            shell: "sh".to_string(),
        }
    }

    /// Use a different POSIX shell
    #[inline]
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }
}

impl Default for ProcessRuntime {
    fn default() -> Self {
        Self::new(vec!["PATH".to_string()])
    }
}

#[async_trait::async_trait]
impl SandboxRuntime for ProcessRuntime {
    fn name(&self) -> &'static str {
        "process"
    }

    fn allocate(&self, spec: &EnvironmentSpec) -> EnvironmentHandle {
        EnvironmentHandle {
            id: format!("proc-{}", uuid::Uuid::new_v4()),
            workdir: spec.workdir.clone(),
            image: None,
        }
    }

    async fn provision(&self, spec: &EnvironmentSpec, _env: &EnvironmentHandle) -> Result<(), SandboxError> {
        let meta = tokio::fs::metadata(&spec.workdir)
            .await
            .map_err(|e| SandboxError::io(&spec.workdir, e))?;
        if !meta.is_dir() {
            return Err(SandboxError::Provision(format!(
                "{} is not a directory",
                spec.workdir.display()
            )));
        }
        Ok(())
    }

    async fn health_check(&self, env: &EnvironmentHandle) -> Result<bool, SandboxError> {
        Ok(tokio::fs::metadata(&env.workdir)
            .await
            .is_ok_and(|m| m.is_dir()))
    }

    async fn exec(&self, env: &EnvironmentHandle, script: &str) -> Result<ExecOutput, SandboxError> {
        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(script)
            .current_dir(&env.workdir)
            .env_clear()
            .env("HOME", &env.workdir)
            .env("TMPDIR", &env.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for key in &self.pass_env {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }

        let output = cmd.output().await.map_err(|e| SandboxError::Spawn {
            program: self.shell.clone(),
            source: e,
        })?;

        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    async fn teardown(&self, env: &EnvironmentHandle) -> Result<(), SandboxError> {
        tracing::debug!(env_id = %env.id, "process scope released");
        Ok(())
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::language::Language;

    fn spec(dir: &std::path::Path) -> EnvironmentSpec {
        EnvironmentSpec {
            workdir: dir.to_path_buf(),
            language: Language::Python,
            image: String::new(),
            memory_limit: "512m".into(),
            cpu_limit: 1.0,
        }
    }

    #[tokio::test]
    async fn runs_in_scratch_dir_with_cleared_env() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "hello").unwrap();
        std::env::set_var("AUTOFIX_SECRET_PROBE", "leak");

        let runtime = ProcessRuntime::default();
        let spec = spec(dir.path());
        let env = runtime.allocate(&spec);
        runtime.provision(&spec, &env).await.unwrap();
        assert!(runtime.health_check(&env).await.unwrap());

        let out = runtime
            .exec(&env, "cat marker.txt; echo \"[${AUTOFIX_SECRET_PROBE}]\"")
            .await
            .unwrap();
        assert!(out.success());
        assert_eq!(out.stdout, "hello[]\n");
        runtime.teardown(&env).await.unwrap();
    }

    #[tokio::test]
    async fn reports_exit_codes() {
        let dir = tempfile::tempdir().unwrap();
        let runtime = ProcessRuntime::default();
        let spec = spec(dir.path());
        let env = runtime.allocate(&spec);
        runtime.provision(&spec, &env).await.unwrap();

        let out = runtime.exec(&env, "echo oops >&2; exit 3").await.unwrap();
        assert_eq!(out.exit_code, Some(3));
        assert_eq!(out.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn missing_workdir_fails_provisioning() {
        let runtime = ProcessRuntime::default();
        let spec = spec(std::path::Path::new("/nonexistent/autofix"));
        let env = runtime.allocate(&spec);
        let err = runtime.provision(&spec, &env).await.unwrap_err();
        assert!(matches!(err, SandboxError::Io { .. }));
    }
}
