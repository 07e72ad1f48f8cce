//! Error types for the sandbox
//!
//! Two layers:
//! - [`SandboxError`]: what a runtime reports while provisioning, probing,
//!   executing or tearing down an environment
//! - [`TestError`]: the typed cause recorded on a failed `TestResult`; the
//!   runner converts every failure into one of these instead of returning `Err`

use crate::language::TestType;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Runtime-level failure
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    /// Filesystem operation failed
    #[error("i/o error at {path}: {source}")]
    Io {
        /// Path involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// A helper program could not be started
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        /// Program name
        program: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Container image is not available locally
    #[error("image not found: {0}")]
    ImageNotFound(String),

    /// Environment could not be created
    #[error("provisioning failed: {0}")]
    Provision(String),

    /// Command could not be run inside the environment
    #[error("execution failed: {0}")]
    Exec(String),

    /// Environment could not be removed
    #[error("teardown failed: {0}")]
    Teardown(String),
}

impl SandboxError {
    /// Wrap an I/O error with its path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Typed cause of a failed sandbox run
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TestError {
    /// Overall timeout expired
    #[error("timed out after {limit_ms}ms")]
    Timeout {
        /// Limit that expired
        limit_ms: u64,
    },

    /// Run was cancelled from outside
    #[error("cancelled")]
    Cancelled,

    /// Container image missing
    #[error("image not found: {image}")]
    ImageNotFound {
        /// Requested image
        image: String,
    },

    /// Environment never reported healthy
    #[error("health check failed after {attempts} attempts")]
    HealthCheckFailed {
        /// Probes performed
        attempts: u32,
    },

    /// Environment could not be provisioned
    #[error("provisioning failed: {message}")]
    ProvisionFailed {
        /// Runtime message
        message: String,
    },

    /// Code could not be written to the scratch directory
    #[error("failed to materialize code: {message}")]
    Materialize {
        /// I/O message
        message: String,
    },

    /// No fragment exists for any requested test type
    #[error("no test command available for {language}")]
    NoTestCommand {
        /// Language name
        language: String,
    },

    /// A fragment exited unsuccessfully
    #[error("{test_type} check failed with exit code {exit_code}")]
    CommandFailed {
        /// Fragment that failed
        test_type: TestType,
        /// Process exit code
        exit_code: i32,
    },

    /// Environment or process died abnormally
    #[error("sandbox crashed: {message}")]
    Crashed {
        /// Runtime message
        message: String,
    },
}

impl TestError {
    /// Whether the failure is a syntax error in the modified code
    #[inline]
    #[must_use]
    pub fn is_syntax_error(&self) -> bool {
        matches!(
            self,
            Self::CommandFailed {
                test_type: TestType::Syntax,
                ..
            }
        )
    }

    /// Whether the failure comes from the environment rather than the code
    #[must_use]
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            Self::ImageNotFound { .. }
                | Self::HealthCheckFailed { .. }
                | Self::ProvisionFailed { .. }
                | Self::Materialize { .. }
                | Self::Crashed { .. }
        )
    }

    /// Map a provisioning error from a runtime
    #[must_use]
    pub fn from_provision(error: SandboxError) -> Self {
        match error {
            SandboxError::ImageNotFound(image) => Self::ImageNotFound { image },
            other => Self::ProvisionFailed {
                message: other.to_string(),
            },
        }
    }
}
