//! Sandbox configuration

use crate::language::Language;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

/// Which runtime provisions environments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    /// Local process with a cleared environment
    #[default]
    Process,
    /// Docker container without network
    Docker,
}

/// Sandbox runner settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxConfig {
    /// Runtime backend
    pub runtime: RuntimeKind,
    /// Overall per-run timeout in seconds
    pub timeout_secs: u64,
    /// Health probes before giving up
    pub health_check_retries: u32,
    /// Pause between health probes in milliseconds
    pub health_check_interval_ms: u64,
    /// Container memory limit (docker syntax, e.g. `512m`)
    pub memory_limit: String,
    /// Container CPU quota
    pub cpu_limit: f64,
    /// Image overrides keyed by language name
    pub images: BTreeMap<String, String>,
    /// Host variables passed into process sandboxes
    pub pass_env: Vec<String>,
    /// Docker CLI binary
    pub docker_binary: String,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Process,
            timeout_secs: 300,
            health_check_retries: 5,
            health_check_interval_ms: 1_000,
            memory_limit: "512m".to_string(),
            cpu_limit: 1.0,
            images: BTreeMap::new(),
            pass_env: vec!["PATH".to_string()],
            docker_binary: "docker".to_string(),
        }
    }
}

impl SandboxConfig {
    /// Create default config
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set runtime backend
    #[inline]
    #[must_use]
    pub fn with_runtime(mut self, runtime: RuntimeKind) -> Self {
        self.runtime = runtime;
        self
    }

    /// Set overall timeout
    #[inline]
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_secs = timeout.as_secs().max(1);
        self
    }

    /// Set health probe policy
    #[inline]
    #[must_use]
    pub fn with_health_checks(mut self, retries: u32, interval: Duration) -> Self {
        self.health_check_retries = retries;
        self.health_check_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Override the image for one language
    #[must_use]
    pub fn with_image(mut self, language: Language, image: impl Into<String>) -> Self {
        self.images.insert(language.as_str().to_string(), image.into());
        self
    }

    /// Overall timeout
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Pause between health probes
    #[must_use]
    pub fn health_check_interval(&self) -> Duration {
        Duration::from_millis(self.health_check_interval_ms)
    }

    /// Image for a language, falling back to the built-in default
    #[must_use]
    pub fn image_for(&self, language: Language) -> String {
        self.images
            .get(language.as_str())
            .cloned()
            .unwrap_or_else(|| language.default_image().to_string())
    }

    /// Check invariants
    ///
    /// # Errors
    /// Returns a description of the first violated constraint
    pub fn validate(&self) -> Result<(), String> {
        if self.timeout_secs == 0 {
            return Err("sandbox.timeout_secs must be positive".into());
        }
        if self.health_check_retries == 0 {
            return Err("sandbox.health_check_retries must be at least 1".into());
        }
        if !(self.cpu_limit > 0.0) {
            return Err("sandbox.cpu_limit must be positive".into());
        }
        if self.memory_limit.trim().is_empty() {
            return Err("sandbox.memory_limit must not be empty".into());
        }
        if let Some(key) = self
            .images
            .keys()
            .find(|k| k.parse::<Language>().is_err())
        {
            return Err(format!("sandbox.images has unknown language `{key}`"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = SandboxConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.health_check_retries, 5);
        assert_eq!(config.image_for(Language::Python), "python:3.12-slim");
    }

    #[test]
    fn image_override_wins() {
        let config = SandboxConfig::new().with_image(Language::Go, "golang:1.23-alpine");
        assert_eq!(config.image_for(Language::Go), "golang:1.23-alpine");
    }

    #[test]
    fn rejects_unknown_image_key() {
        let mut config = SandboxConfig::new();
        config.images.insert("fortran".into(), "gcc".into());
        assert!(config.validate().unwrap_err().contains("fortran"));
    }
}
