//! Autofix Sandbox
//!
//! Evaluates a generated fix without touching the workspace:
//! - **Runtimes**: local process scope or network-less docker container
//! - **Commands**: per-language syntax, lint, type-check and unit fragments
//! - **Runner**: timeout, health checks, cancellation, unconditional teardown
//! - **Scoring**: improvement score derived from the outcome
//!
//! # Example
//!
//! ```rust,no_run
//! use autofix_sandbox::{SandboxConfig, SandboxTestRunner, TestRequest, TestType};
//!
//! # async fn demo() {
//! let runner = SandboxTestRunner::new(SandboxConfig::default());
//! let result = runner
//!     .run_test(
//!         TestRequest::new("app.py", "x=eval(s)", "x = int(s)\n")
//!             .with_test_types(vec![TestType::Syntax, TestType::Lint]),
//!     )
//!     .await;
//! println!("{}", result.summary());
//! # }
//! ```

pub mod command;
pub mod config;
pub mod error;
pub mod language;
pub mod result;
pub mod runner;
pub mod runtime;

pub use command::{CommandFragment, TestCommand};
pub use config::{RuntimeKind, SandboxConfig};
pub use error::{SandboxError, TestError};
pub use language::{Language, TestType};
pub use result::{improvement_score, EnvironmentInfo, TestRequest, TestResult};
pub use runner::SandboxTestRunner;
pub use runtime::{
    runtime_from_config, DockerRuntime, EnvironmentHandle, EnvironmentSpec, ExecOutput,
    ProcessRuntime, SandboxRuntime,
};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
