//! Learning service configuration

use crate::error::LearningError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for validation, buffering and update gating
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LearningConfig {
    /// Directory holding `feedback.jsonl`, `updates.jsonl` and `stats.json`
    pub data_dir: PathBuf,
    /// Minimum validator score for a sample to enter the buffer
    pub quality_threshold: f64,
    /// Minimum input/output length in bytes
    pub min_length: usize,
    /// Maximum input/output length in bytes
    pub max_length: usize,
    /// Replay buffer capacity
    pub buffer_max_size: usize,
    /// Samples required before the buffer counts as ready
    pub buffer_min_size: usize,
    /// Default batch drawn per update
    pub batch_size: usize,
    /// Minimum time between two non-forced updates
    pub update_cooldown_secs: u64,
}

impl LearningConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With data directory
    #[inline]
    #[must_use]
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// With quality threshold
    #[inline]
    #[must_use]
    pub fn with_quality_threshold(mut self, threshold: f64) -> Self {
        self.quality_threshold = threshold;
        self
    }

    /// With buffer bounds
    #[inline]
    #[must_use]
    pub fn with_buffer_bounds(mut self, min_size: usize, max_size: usize) -> Self {
        self.buffer_min_size = min_size;
        self.buffer_max_size = max_size;
        self
    }

    /// With default batch size
    #[inline]
    #[must_use]
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// With update cooldown
    #[inline]
    #[must_use]
    pub fn with_update_cooldown(mut self, cooldown: Duration) -> Self {
        self.update_cooldown_secs = cooldown.as_secs();
        self
    }

    /// Cooldown as a duration
    #[inline]
    #[must_use]
    pub fn update_cooldown(&self) -> Duration {
        Duration::from_secs(self.update_cooldown_secs)
    }

    /// Check internal consistency
    ///
    /// # Errors
    /// Returns `LearningError::InvalidConfig` describing the first violated rule
    pub fn validate(&self) -> Result<(), LearningError> {
        if !(0.0..=1.0).contains(&self.quality_threshold) {
            return Err(LearningError::InvalidConfig(format!(
                "quality_threshold {} outside [0, 1]",
                self.quality_threshold
            )));
        }
        if self.buffer_max_size == 0 {
            return Err(LearningError::InvalidConfig(
                "buffer_max_size must be at least 1".into(),
            ));
        }
        if self.buffer_min_size > self.buffer_max_size {
            return Err(LearningError::InvalidConfig(format!(
                "buffer_min_size {} exceeds buffer_max_size {}",
                self.buffer_min_size, self.buffer_max_size
            )));
        }
        if self.min_length > self.max_length {
            return Err(LearningError::InvalidConfig(format!(
                "min_length {} exceeds max_length {}",
                self.min_length, self.max_length
            )));
        }
        if self.batch_size == 0 {
            return Err(LearningError::InvalidConfig(
                "batch_size must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".autofix/learning"),
            quality_threshold: 0.7,
            min_length: 3,
            max_length: 200_000,
            buffer_max_size: 10_000,
            buffer_min_size: 100,
            batch_size: 32,
            update_cooldown_secs: 3600,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = LearningConfig::default();
        assert!(config.validate().is_ok());
        assert!((config.quality_threshold - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let config = LearningConfig::new().with_quality_threshold(1.5);
        assert!(matches!(
            config.validate(),
            Err(LearningError::InvalidConfig(_))
        ));
    }

    #[test]
    fn rejects_inverted_buffer_bounds() {
        let config = LearningConfig::new().with_buffer_bounds(50, 10);
        assert!(config.validate().is_err());
    }

    #[test]
    fn partial_document_keeps_defaults() {
        let config: LearningConfig =
            serde_json::from_str(r#"{"quality_threshold": 0.8}"#).unwrap();
        assert!((config.quality_threshold - 0.8).abs() < f64::EPSILON);
        assert_eq!(config.batch_size, 32);
    }
}
