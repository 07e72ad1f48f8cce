//! Configuration
//!
//! One TOML document with a table per component:
//!
//! ```toml
//! [orchestrator]
//! max_concurrent_tasks = 4
//! apply_changes = true
//!
//! [sandbox]
//! runtime = "docker"
//! timeout_secs = 120
//!
//! [learning]
//! quality_threshold = 0.75
//!
//! [backup]
//! max_backups = 5
//! ```
//!
//! Every table and key is optional.

use crate::error::{AutofixError, Result};
use autofix_learning::LearningConfig;
use autofix_sandbox::{SandboxConfig, TestType};
use autofix_workspace::DiscoveryConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Orchestrator behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Tree walked when a task names no target files
    pub project_root: PathBuf,
    /// Worker pool size
    pub max_concurrent_tasks: usize,
    /// Dispatcher sleep when idle or saturated
    pub dispatch_interval_ms: u64,
    /// Write passing fixes to the workspace
    pub apply_changes: bool,
    /// Fix generation attempts per step, including the first
    pub max_fix_attempts: u32,
    /// Run a model update inside the cycle when the learning service signals one
    pub auto_update: bool,
    /// Pause between cycles of a continuous session
    pub continuous_interval_secs: u64,
    /// Checks run for every fix
    pub test_types: Vec<TestType>,
    /// Knowledge units requested per task
    pub knowledge_limit: usize,
    /// Consult the SAST analyzer during scans
    pub run_sast: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            project_root: PathBuf::from("."),
            max_concurrent_tasks: 2,
            dispatch_interval_ms: 100,
            apply_changes: false,
            max_fix_attempts: 1,
            auto_update: false,
            continuous_interval_secs: 3600,
            test_types: vec![TestType::Syntax],
            knowledge_limit: 5,
            run_sast: true,
        }
    }
}

impl OrchestratorConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With project root
    #[inline]
    #[must_use]
    pub fn with_project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = root.into();
        self
    }

    /// With worker pool size
    #[inline]
    #[must_use]
    pub fn with_max_concurrent_tasks(mut self, n: usize) -> Self {
        self.max_concurrent_tasks = n;
        self
    }

    /// With dispatcher sleep
    #[inline]
    #[must_use]
    pub fn with_dispatch_interval(mut self, interval: Duration) -> Self {
        self.dispatch_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// With change application
    #[inline]
    #[must_use]
    pub fn with_apply_changes(mut self, apply: bool) -> Self {
        self.apply_changes = apply;
        self
    }

    /// With fix attempts per step
    #[inline]
    #[must_use]
    pub fn with_max_fix_attempts(mut self, attempts: u32) -> Self {
        self.max_fix_attempts = attempts;
        self
    }

    /// With in-cycle model updates
    #[inline]
    #[must_use]
    pub fn with_auto_update(mut self, enabled: bool) -> Self {
        self.auto_update = enabled;
        self
    }

    /// With pause between continuous cycles
    #[inline]
    #[must_use]
    pub fn with_continuous_interval(mut self, interval: Duration) -> Self {
        self.continuous_interval_secs = interval.as_secs();
        self
    }

    /// With checks per fix
    #[inline]
    #[must_use]
    pub fn with_test_types(mut self, test_types: Vec<TestType>) -> Self {
        self.test_types = test_types;
        self
    }

    /// Dispatcher sleep as a duration
    #[inline]
    #[must_use]
    pub fn dispatch_interval(&self) -> Duration {
        Duration::from_millis(self.dispatch_interval_ms)
    }

    /// Continuous pause as a duration
    #[inline]
    #[must_use]
    pub fn continuous_interval(&self) -> Duration {
        Duration::from_secs(self.continuous_interval_secs)
    }
}

/// Backup store and lock behavior
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackupConfig {
    /// Store location; relative paths resolve against the workspace
    pub backup_dir: PathBuf,
    /// Snapshots kept per store, 0 for unlimited
    pub max_backups: usize,
    /// Age after which a lock is reported as stale
    pub lock_stale_after_secs: u64,
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            backup_dir: PathBuf::from(".autofix/backups"),
            max_backups: 10,
            lock_stale_after_secs: 6 * 3600,
        }
    }
}

impl BackupConfig {
    /// Store directory for `workspace`
    #[must_use]
    pub fn store_dir(&self, workspace: &Path) -> PathBuf {
        if self.backup_dir.is_absolute() {
            self.backup_dir.clone()
        } else {
            workspace.join(&self.backup_dir)
        }
    }

    /// Stale-lock age as a duration
    #[inline]
    #[must_use]
    pub fn lock_stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_after_secs)
    }
}

/// Complete configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AutofixConfig {
    /// Task queue and cycle
    pub orchestrator: OrchestratorConfig,
    /// Fix evaluation
    pub sandbox: SandboxConfig,
    /// Feedback and model updates
    pub learning: LearningConfig,
    /// Snapshots and locking
    pub backup: BackupConfig,
    /// Target discovery
    pub discovery: DiscoveryConfig,
}

impl AutofixConfig {
    /// Parse a TOML document
    ///
    /// # Errors
    /// Returns `AutofixError::Config` on syntax errors or invalid values
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| AutofixError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file
    ///
    /// # Errors
    /// Returns error if the file is unreadable or invalid
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| AutofixError::file(path, e))?;
        Self::from_toml_str(&text)
            .map_err(|e| AutofixError::Config(format!("{}: {e}", path.display())))
    }

    /// Render as TOML
    ///
    /// # Errors
    /// Returns `AutofixError::Config` if a value has no TOML form
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| AutofixError::Config(e.to_string()))
    }

    /// Check cross-field consistency
    ///
    /// # Errors
    /// Returns `AutofixError::Config` naming the first violated rule
    pub fn validate(&self) -> Result<()> {
        let o = &self.orchestrator;
        if o.max_concurrent_tasks == 0 {
            return Err(AutofixError::Config(
                "orchestrator.max_concurrent_tasks must be at least 1".into(),
            ));
        }
        if o.dispatch_interval_ms == 0 {
            return Err(AutofixError::Config(
                "orchestrator.dispatch_interval_ms must be at least 1".into(),
            ));
        }
        if o.max_fix_attempts == 0 {
            return Err(AutofixError::Config(
                "orchestrator.max_fix_attempts must be at least 1".into(),
            ));
        }
        if o.test_types.is_empty() {
            return Err(AutofixError::Config(
                "orchestrator.test_types must name at least one check".into(),
            ));
        }
        self.sandbox
            .validate()
            .map_err(|e| AutofixError::Config(format!("sandbox: {e}")))?;
        self.learning
            .validate()
            .map_err(|e| AutofixError::Config(format!("learning: {e}")))?;
        if self.discovery.include_patterns.is_empty() {
            return Err(AutofixError::Config(
                "discovery.include_patterns must not be empty".into(),
            ));
        }
        Ok(())
    }
}
