//! Docker runtime
//!
//! One detached container per run: no network, bounded memory and CPU, the
//! scratch directory bind-mounted at `/workspace`. Fragments run through
//! `docker exec`; teardown force-removes the container.

use super::{EnvironmentHandle, EnvironmentSpec, ExecOutput, SandboxRuntime};
use crate::error::SandboxError;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;

const CONTAINER_WORKDIR: &str = "/workspace";

/// Container-backed sandbox driven through the docker CLI
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    binary: String,
}

impl DockerRuntime {
    /// Create runtime using the given docker-compatible CLI
    #[must_use]
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    async fn docker(&self, args: &[&str]) -> Result<ExecOutput, SandboxError> {
        let output = Command::new(&self.binary)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| SandboxError::Spawn {
                program: self.binary.clone(),
                source: e,
            })?;
        Ok(ExecOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }

    /// Arguments for `docker run`
    fn run_args(spec: &EnvironmentSpec, name: &str) -> Vec<String> {
        vec![
            "run".into(),
            "--detach".into(),
            "--rm".into(),
            "--name".into(),
            name.into(),
            "--network".into(),
            "none".into(),
            "--memory".into(),
            spec.memory_limit.clone(),
            "--cpus".into(),
            format!("{}", spec.cpu_limit),
            "--pids-limit".into(),
            "256".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--volume".into(),
            format!("{}:{CONTAINER_WORKDIR}", spec.workdir.display()),
            "--workdir".into(),
            CONTAINER_WORKDIR.into(),
            spec.image.clone(),
            "sleep".into(),
            "infinity".into(),
        ]
    }
}

impl Default for DockerRuntime {
    fn default() -> Self {
        Self::new("docker")
    }
}

#[async_trait::async_trait]
impl SandboxRuntime for DockerRuntime {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn allocate(&self, spec: &EnvironmentSpec) -> EnvironmentHandle {
        EnvironmentHandle {
            id: format!("autofix-{}", uuid::Uuid::new_v4().simple()),
            workdir: PathBuf::from(CONTAINER_WORKDIR),
            image: Some(spec.image.clone()),
        }
    }

    async fn provision(&self, spec: &EnvironmentSpec, env: &EnvironmentHandle) -> Result<(), SandboxError> {
        let inspect = self
            .docker(&["image", "inspect", "--format", "{{.Id}}", &spec.image])
            .await?;
        if !inspect.success() {
            return Err(SandboxError::ImageNotFound(spec.image.clone()));
        }

        let args = Self::run_args(spec, &env.id);
        let refs: Vec<&str> = args.iter().map(String::as_str).collect();
        let started = self.docker(&refs).await?;
        if !started.success() {
            return Err(SandboxError::Provision(started.stderr.trim().to_string()));
        }

        tracing::debug!(
            container = %env.id,
            docker_id = %started.stdout.trim(),
            image = %spec.image,
            "container started"
        );
        Ok(())
    }

    async fn health_check(&self, env: &EnvironmentHandle) -> Result<bool, SandboxError> {
        let out = self
            .docker(&["inspect", "--format", "{{.State.Running}}", &env.id])
            .await?;
        Ok(out.success() && out.stdout.trim() == "true")
    }

    async fn exec(&self, env: &EnvironmentHandle, script: &str) -> Result<ExecOutput, SandboxError> {
        self.docker(&["exec", &env.id, "sh", "-c", script]).await
    }

    async fn teardown(&self, env: &EnvironmentHandle) -> Result<(), SandboxError> {
        let out = self.docker(&["rm", "--force", &env.id]).await?;
        if out.success() || out.stderr.contains("No such container") {
            Ok(())
        } else {
            Err(SandboxError::Teardown(out.stderr.trim().to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::Language;

    #[test]
    fn containers_have_no_network_and_bounded_resources() {
        let spec = EnvironmentSpec {
            workdir: PathBuf::from("/tmp/autofix-abc"),
            language: Language::Python,
            image: "python:3.12-slim".into(),
            memory_limit: "256m".into(),
            cpu_limit: 0.5,
        };
        let args = DockerRuntime::run_args(&spec, "autofix-test");
        let joined = args.join(" ");

        assert!(joined.contains("--network none"));
        assert!(joined.contains("--memory 256m"));
        assert!(joined.contains("--cpus 0.5"));
        assert!(joined.contains("--volume /tmp/autofix-abc:/workspace"));
        assert!(joined.ends_with("python:3.12-slim sleep infinity"));
    }

    #[tokio::test]
    async fn missing_cli_is_a_spawn_error() {
        let runtime = DockerRuntime::new("autofix-no-such-docker-binary");
        let spec = EnvironmentSpec {
            workdir: PathBuf::from("/tmp"),
            language: Language::Go,
            image: "golang:1.22".into(),
            memory_limit: "512m".into(),
            cpu_limit: 1.0,
        };
        let env = runtime.allocate(&spec);
        let err = runtime.provision(&spec, &env).await.unwrap_err();
        assert!(matches!(err, SandboxError::Spawn { .. }));
    }

    #[test]
    fn identity_is_chosen_before_the_container_exists() {
        let runtime = DockerRuntime::default();
        let spec = EnvironmentSpec {
            workdir: PathBuf::from("/tmp/autofix-abc"),
            language: Language::Python,
            image: "python:3.12-slim".into(),
            memory_limit: "256m".into(),
            cpu_limit: 0.5,
        };
        let a = runtime.allocate(&spec);
        let b = runtime.allocate(&spec);

        assert!(a.id.starts_with("autofix-"));
        assert_ne!(a.id, b.id);
        assert_eq!(a.workdir, PathBuf::from(CONTAINER_WORKDIR));
        let args = DockerRuntime::run_args(&spec, &a.id).join(" ");
        assert!(args.contains(&format!("--name {}", a.id)));
    }
}
