//! Error types for the learning service
//!
//! Ingestion never surfaces these to callers; they are returned by the
//! durable store, configuration validation and the model trainer.

use std::path::PathBuf;

/// Learning subsystem error
#[derive(Debug, thiserror::Error)]
pub enum LearningError {
    /// Filesystem failure in the durable store
    #[error("io error at {path}: {source}")]
    Io {
        /// File or directory involved
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Record (de)serialization failed
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration rejected by validation
    #[error("invalid learning configuration: {0}")]
    InvalidConfig(String),

    /// External trainer reported a failure
    #[error("training failed: {0}")]
    Training(String),

    /// No trainer is wired into this service instance
    #[error("no model trainer available")]
    TrainerUnavailable,
}

impl LearningError {
    /// Create an IO error for a path
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the error comes from the trainer rather than from persistence
    #[inline]
    #[must_use]
    pub fn is_training_failure(&self) -> bool {
        matches!(self, Self::Training(_) | Self::TrainerUnavailable)
    }
}
