//! Read-only statistics over learning data

use crate::store::LearningCounters;
use crate::types::{FeedbackData, FeedbackKind, ModelUpdate, QualityLevel};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Aggregation over feedback records in a date window
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeedbackStats {
    /// Inclusive window start
    pub window_start: Option<DateTime<Utc>>,
    /// Inclusive window end
    pub window_end: Option<DateTime<Utc>>,
    /// Records in the window
    pub total: usize,
    /// Accepted records
    pub accepted: usize,
    /// Rejected records
    pub rejected: usize,
    /// `accepted / total`, 0 when empty
    pub acceptance_rate: f64,
    /// Count per feedback kind
    pub by_kind: BTreeMap<FeedbackKind, usize>,
    /// Count per quality level
    pub by_quality: BTreeMap<QualityLevel, usize>,
    /// Mean validator score
    pub average_quality_score: f64,
}

impl FeedbackStats {
    /// Aggregate the records whose timestamp falls within `[start, end]`
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn aggregate<'a>(
        samples: impl IntoIterator<Item = &'a FeedbackData>,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Self {
        let mut stats = Self {
            window_start: start,
            window_end: end,
            ..Self::default()
        };
        let mut score_sum = 0.0;

        for sample in samples {
            if start.is_some_and(|s| sample.timestamp < s) || end.is_some_and(|e| sample.timestamp > e)
            {
                continue;
            }
            stats.total += 1;
            if sample.accepted {
                stats.accepted += 1;
            } else {
                stats.rejected += 1;
            }
            *stats.by_kind.entry(sample.kind).or_default() += 1;
            *stats.by_quality.entry(sample.quality_level).or_default() += 1;
            score_sum += sample.quality_score;
        }

        if stats.total > 0 {
            stats.acceptance_rate = stats.accepted as f64 / stats.total as f64;
            stats.average_quality_score = score_sum / stats.total as f64;
        }
        stats
    }
}

/// Service-level snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningStatistics {
    /// Lifetime counters
    pub counters: LearningCounters,
    /// Lifetime acceptance rate
    pub acceptance_rate: f64,
    /// Samples in the replay buffer
    pub buffer_size: usize,
    /// Replay buffer capacity
    pub buffer_capacity: usize,
    /// Whether the buffer reached its readiness threshold
    pub buffer_ready: bool,
    /// Samples evicted from the buffer since start-up
    pub buffer_evicted: u64,
    /// Current model version
    pub model_version: String,
    /// Whether an update is running
    pub update_running: bool,
    /// Most recent update attempt
    pub last_update: Option<ModelUpdate>,
    /// Validator threshold
    pub quality_threshold: f64,
}

/// Readiness report for fine-tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinetuneStatus {
    /// Whether an update could start now
    pub ready: bool,
    /// Accepted samples available in the buffer
    pub available_samples: usize,
    /// Samples required by the caller
    pub required_samples: usize,
    /// Whether an update is running
    pub update_running: bool,
    /// Seconds left before cooldown expires
    pub cooldown_remaining_secs: Option<u64>,
    /// Current model version
    pub model_version: String,
    /// Most recent update attempt
    pub last_update: Option<ModelUpdate>,
}
