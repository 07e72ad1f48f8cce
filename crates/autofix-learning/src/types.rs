//! Core types for the learning service
//!
//! Defines:
//! - Feedback samples and their derived quality
//! - Model update records and their lifecycle
//! - Timestamp-derived identifiers (ULID) used as persistence keys

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use ulid::Ulid;

/// Unique feedback identifier (ULID, sortable by creation time)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FeedbackId(pub Ulid);

impl FeedbackId {
    /// Generate new feedback ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for FeedbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique model update identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UpdateId(pub Ulid);

impl UpdateId {
    /// Generate new update ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for UpdateId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UpdateId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Kind of feedback carried by a sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackKind {
    /// Output was corrected by a reviewer
    Correction,
    /// Output was accepted as-is
    Acceptance,
    /// Output was rejected
    Rejection,
    /// Output was rated without further action
    Rating,
}

impl std::fmt::Display for FeedbackKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Correction => "correction",
            Self::Acceptance => "acceptance",
            Self::Rejection => "rejection",
            Self::Rating => "rating",
        };
        f.write_str(name)
    }
}

/// Quality level derived from the validator score
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLevel {
    /// Score at or above 0.85
    High,
    /// Score at or above the acceptance threshold
    Medium,
    /// Score below the acceptance threshold
    Low,
    /// A structural rule failed
    Invalid,
}

impl QualityLevel {
    /// Score at which a sample counts as high quality
    pub const HIGH_WATERMARK: f64 = 0.85;

    /// Classify a score against the acceptance threshold
    #[must_use]
    pub fn from_score(score: f64, threshold: f64) -> Self {
        if score >= Self::HIGH_WATERMARK && score >= threshold {
            Self::High
        } else if score >= threshold {
            Self::Medium
        } else {
            Self::Low
        }
    }
}

/// A single feedback sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackData {
    /// Sample identifier
    pub id: FeedbackId,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Feedback kind
    pub kind: FeedbackKind,
    /// Original input (e.g. code before the fix)
    pub input: String,
    /// Produced output (e.g. code after the fix)
    pub output: String,
    /// Reviewer-corrected output, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub corrected_output: Option<String>,
    /// User rating; valid range is 1..=5
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    /// Quality level assigned by the validator
    pub quality_level: QualityLevel,
    /// Quality score assigned by the validator
    #[serde(default)]
    pub quality_score: f64,
    /// Whether the sample passed validation
    #[serde(default)]
    pub accepted: bool,
    /// Validation reasons (failures or threshold misses)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reasons: Vec<String>,
    /// Free-form context (file, language, task id, ...)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl FeedbackData {
    /// Create an unvalidated sample
    #[must_use]
    pub fn new(kind: FeedbackKind, input: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            id: FeedbackId::new(),
            timestamp: Utc::now(),
            kind,
            input: input.into(),
            output: output.into(),
            corrected_output: None,
            rating: None,
            quality_level: QualityLevel::Invalid,
            quality_score: 0.0,
            accepted: false,
            reasons: Vec::new(),
            metadata: BTreeMap::new(),
        }
    }

    /// With corrected output
    #[inline]
    #[must_use]
    pub fn with_correction(mut self, corrected: impl Into<String>) -> Self {
        self.corrected_output = Some(corrected.into());
        self
    }

    /// With user rating
    #[inline]
    #[must_use]
    pub fn with_rating(mut self, rating: i32) -> Self {
        self.rating = Some(rating);
        self
    }

    /// With metadata entry
    #[inline]
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// With explicit timestamp
    #[inline]
    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Record a validation outcome on the sample
    pub fn apply_validation(&mut self, outcome: &crate::validator::ValidationOutcome) {
        self.accepted = outcome.accepted;
        self.quality_score = outcome.quality_score;
        self.quality_level = outcome.quality_level;
        self.reasons = outcome.reasons.clone();
    }
}

/// Model update lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateStatus {
    /// Training in progress
    Running,
    /// Training finished
    Completed,
    /// Training failed or was interrupted
    Failed,
}

/// A model update attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelUpdate {
    /// Update identifier
    pub id: UpdateId,
    /// Start time
    pub timestamp: DateTime<Utc>,
    /// Model version before the update
    pub previous_version: String,
    /// Model version produced by the update
    #[serde(default)]
    pub new_version: Option<String>,
    /// Samples handed to the trainer
    pub samples_processed: usize,
    /// Samples the trainer used
    #[serde(default)]
    pub samples_accepted: usize,
    /// Samples the trainer discarded
    #[serde(default)]
    pub samples_rejected: usize,
    /// Validator threshold in force when the batch was drawn
    pub quality_threshold: f64,
    /// Accuracy before training
    #[serde(default)]
    pub pre_accuracy: Option<f64>,
    /// Accuracy after training
    #[serde(default)]
    pub post_accuracy: Option<f64>,
    /// `post_accuracy - pre_accuracy`
    #[serde(default)]
    pub performance_delta: Option<f64>,
    /// Lifecycle status
    pub status: UpdateStatus,
    /// Failure description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Time the update reached a terminal status
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

impl ModelUpdate {
    /// Create a running update record
    #[must_use]
    pub fn running(
        previous_version: impl Into<String>,
        samples_processed: usize,
        quality_threshold: f64,
    ) -> Self {
        Self {
            id: UpdateId::new(),
            timestamp: Utc::now(),
            previous_version: previous_version.into(),
            new_version: None,
            samples_processed,
            samples_accepted: 0,
            samples_rejected: 0,
            quality_threshold,
            pre_accuracy: None,
            post_accuracy: None,
            performance_delta: None,
            status: UpdateStatus::Running,
            error: None,
            completed_at: None,
        }
    }

    /// Mark completed with the trainer's outcome
    pub fn complete(&mut self, outcome: &crate::trainer::TrainingOutcome) {
        self.new_version = Some(outcome.new_version.clone());
        self.samples_accepted = outcome.samples_accepted;
        self.samples_rejected = outcome.samples_rejected;
        self.pre_accuracy = Some(outcome.pre_accuracy);
        self.post_accuracy = Some(outcome.post_accuracy);
        self.performance_delta = Some(outcome.post_accuracy - outcome.pre_accuracy);
        self.status = UpdateStatus::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Mark failed
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = UpdateStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
    }

    /// Whether the update reached a terminal status
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        !matches!(self.status, UpdateStatus::Running)
    }
}
