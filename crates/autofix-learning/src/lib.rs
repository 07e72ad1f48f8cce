//! Autofix Continuous Learning
//!
//! Turns remediation outcomes into a stream of model improvements:
//! - **Validation**: every sample is scored before it can influence training
//! - **Replay Buffer**: bounded, randomly evicting store of accepted samples
//! - **Persistence**: append-only JSON Lines history of feedback and updates
//! - **Single-flight updates**: at most one model update runs at a time
//!
//! # Example
//!
//! ```rust,no_run
//! use autofix_learning::{
//!     ContinuousLearningService, FeedbackData, FeedbackKind, LearningConfig, UnavailableTrainer,
//! };
//! use std::sync::Arc;
//!
//! # fn main() -> Result<(), autofix_learning::LearningError> {
//! let service =
//!     ContinuousLearningService::open(LearningConfig::new(), Arc::new(UnavailableTrainer))?;
//!
//! let receipt = service.collect_feedback(
//!     FeedbackData::new(FeedbackKind::Acceptance, "x = eval(s)", "x = int(s)").with_rating(5),
//! );
//! println!("accepted: {}", receipt.accepted);
//! # Ok(())
//! # }
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod service;
pub mod stats;
pub mod store;
pub mod trainer;
pub mod types;
pub mod validator;

pub use buffer::ReplayBuffer;
pub use config::LearningConfig;
pub use error::LearningError;
pub use service::{
    ContinuousLearningService, FeedbackReceipt, SkipReason, UpdateOutcome, UpdateSignal,
};
pub use stats::{FeedbackStats, FinetuneStatus, LearningStatistics};
pub use store::{CleanupReport, LearningCounters, LearningStore};
pub use trainer::{ModelTrainer, TrainingOutcome, UnavailableTrainer};
pub use types::{
    FeedbackData, FeedbackId, FeedbackKind, ModelUpdate, QualityLevel, UpdateId, UpdateStatus,
};
pub use validator::{DataValidator, ValidationOutcome};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
