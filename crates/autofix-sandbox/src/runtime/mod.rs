//! Sandbox runtimes
//!
//! A runtime turns a scratch directory into an isolated environment, runs
//! shell fragments inside it and removes it again. The runner never talks to
//! processes or containers directly.

mod docker;
mod process;

pub use docker::DockerRuntime;
pub use process::ProcessRuntime;

use crate::config::{RuntimeKind, SandboxConfig};
use crate::error::SandboxError;
use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

/// What to provision
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentSpec {
    /// Scratch directory holding the code under test
    pub workdir: PathBuf,
    /// Language of the code
    pub language: Language,
    /// Container image, when the runtime uses one
    pub image: String,
    /// Memory limit
    pub memory_limit: String,
    /// CPU quota
    pub cpu_limit: f64,
}

/// A provisioned environment
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentHandle {
    /// Runtime-specific identifier (container id, scope id)
    pub id: String,
    /// Working directory inside the environment
    pub workdir: PathBuf,
    /// Image, when one was used
    pub image: Option<String>,
}

/// Captured output of one fragment
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    /// Exit code; `None` when killed by a signal
    pub exit_code: Option<i32>,
    /// Captured stdout
    pub stdout: String,
    /// Captured stderr
    pub stderr: String,
}

impl ExecOutput {
    /// Whether the fragment exited with status 0
    #[inline]
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Isolated execution backend
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait SandboxRuntime: Send + Sync {
    /// Backend name for logs and results
    fn name(&self) -> &'static str;

    /// Choose the identity of a new environment without creating anything
    ///
    /// Teardown must accept a handle whose environment was never created or
    /// only partly created.
    fn allocate(&self, spec: &EnvironmentSpec) -> EnvironmentHandle;

    /// Create the environment under the allocated identity
    async fn provision(&self, spec: &EnvironmentSpec, env: &EnvironmentHandle) -> Result<(), SandboxError>;

    /// Probe whether the environment accepts commands
    async fn health_check(&self, env: &EnvironmentHandle) -> Result<bool, SandboxError>;

    /// Run one shell fragment to completion
    ///
    /// Dropping the returned future must stop the fragment.
    async fn exec(&self, env: &EnvironmentHandle, script: &str) -> Result<ExecOutput, SandboxError>;

    /// Remove the environment
    async fn teardown(&self, env: &EnvironmentHandle) -> Result<(), SandboxError>;
}

/// Build the runtime selected by the config
#[must_use]
pub fn runtime_from_config(config: &SandboxConfig) -> Arc<dyn SandboxRuntime> {
    match config.runtime {
        RuntimeKind::Process => Arc::new(ProcessRuntime::new(config.pass_env.clone())),
        RuntimeKind::Docker => Arc::new(DockerRuntime::new(config.docker_binary.clone())),
    }
}
