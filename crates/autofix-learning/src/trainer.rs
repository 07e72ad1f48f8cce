//! Model training collaborator
//!
//! The service decides *when* an update runs; the trainer performs it.

use crate::error::LearningError;
use crate::types::FeedbackData;
use serde::{Deserialize, Serialize};

/// Metrics reported by a finished training run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// Version identifier of the produced model
    pub new_version: String,
    /// Accuracy measured before training
    pub pre_accuracy: f64,
    /// Accuracy measured after training
    pub post_accuracy: f64,
    /// Samples the trainer used
    pub samples_accepted: usize,
    /// Samples the trainer discarded
    pub samples_rejected: usize,
}

/// External fine-tuning backend
#[async_trait::async_trait]
pub trait ModelTrainer: Send + Sync {
    /// Version of the model currently in service
    fn current_version(&self) -> String;

    /// Train on a batch of accepted samples
    async fn train(&self, samples: &[FeedbackData]) -> Result<TrainingOutcome, LearningError>;
}

/// Trainer stand-in for processes that only inspect or maintain learning data
#[derive(Debug, Clone, Default)]
pub struct UnavailableTrainer;

#[async_trait::async_trait]
impl ModelTrainer for UnavailableTrainer {
    fn current_version(&self) -> String {
        "unknown".to_string()
    }

    async fn train(&self, _samples: &[FeedbackData]) -> Result<TrainingOutcome, LearningError> {
        Err(LearningError::TrainerUnavailable)
    }
}
