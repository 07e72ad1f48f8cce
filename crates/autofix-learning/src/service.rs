//! Continuous Learning Service
//!
//! Owns the validator and replay buffer, persists every submitted sample and
//! every update attempt, and runs the update state machine:
//!
//! ```text
//! idle --trigger(ok)--> running --trainer ok/err/panic--> idle
//!   |                                                      ^
//!   +--trigger(in progress | too few samples | cooldown)---+  (no state change)
//! ```
//!
//! The single-flight flag is cleared by a guard, so every exit path of
//! [`ContinuousLearningService::trigger_update`] releases it.

use crate::buffer::ReplayBuffer;
use crate::config::LearningConfig;
use crate::error::LearningError;
use crate::stats::{FeedbackStats, FinetuneStatus, LearningStatistics};
use crate::store::{CleanupReport, LearningCounters, LearningStore};
use crate::trainer::ModelTrainer;
use crate::types::{FeedbackData, FeedbackId, ModelUpdate, QualityLevel, UpdateId, UpdateStatus};
use crate::validator::DataValidator;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// What happened to a submitted sample
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedbackReceipt {
    /// Sample identifier
    pub id: FeedbackId,
    /// Whether the sample entered the buffer
    pub accepted: bool,
    /// Validator score
    pub quality_score: f64,
    /// Validator level
    pub quality_level: QualityLevel,
    /// Rejection reasons
    pub reasons: Vec<String>,
    /// Whether the sample reached durable storage
    pub persisted: bool,
    /// Whether an update could be triggered now
    pub update_ready: bool,
}

/// Broadcast when the buffer first becomes ready for an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateSignal {
    /// Buffer size when the signal fired
    pub buffer_size: usize,
    /// Signal time
    pub raised_at: DateTime<Utc>,
}

/// Why `trigger_update` did not start an update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// Another update holds the single-flight flag
    UpdateInProgress,
    /// The buffer holds fewer samples than the batch needs
    InsufficientSamples {
        /// Samples in the buffer
        available: usize,
        /// Samples requested
        required: usize,
    },
    /// The last update finished too recently
    CoolingDown {
        /// Time left
        remaining: Duration,
    },
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UpdateInProgress => f.write_str("update-in-progress"),
            Self::InsufficientSamples {
                available,
                required,
            } => write!(f, "insufficient-samples ({available} < {required})"),
            Self::CoolingDown { remaining } => {
                write!(f, "cooling-down ({}s left)", remaining.as_secs())
            }
        }
    }
}

/// Result of `trigger_update`
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    /// Trainer finished
    Completed(ModelUpdate),
    /// Trainer failed; the record carries the error
    Failed(ModelUpdate),
    /// No update was started
    Skipped(SkipReason),
}

impl UpdateOutcome {
    /// Id of the recorded update, if one was started
    #[must_use]
    pub fn update_id(&self) -> Option<UpdateId> {
        self.record().map(|r| r.id)
    }

    /// Recorded update, if one was started
    #[must_use]
    pub fn record(&self) -> Option<&ModelUpdate> {
        match self {
            Self::Completed(record) | Self::Failed(record) => Some(record),
            Self::Skipped(_) => None,
        }
    }

    /// Whether the guard refused the request
    #[inline]
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped(_))
    }
}

#[derive(Debug)]
struct LearningState {
    update_running: bool,
    counters: LearningCounters,
    model_version: String,
    last_completed_at: Option<DateTime<Utc>>,
    last_update: Option<ModelUpdate>,
    signal_pending: bool,
}

/// Clears the single-flight flag when dropped
struct SingleFlight<'a> {
    state: &'a Mutex<LearningState>,
}

impl Drop for SingleFlight<'_> {
    fn drop(&mut self) {
        self.state.lock().update_running = false;
    }
}

/// Quality-gated ingestion plus update trigger
pub struct ContinuousLearningService {
    config: LearningConfig,
    validator: DataValidator,
    buffer: Mutex<ReplayBuffer>,
    store: LearningStore,
    trainer: Arc<dyn ModelTrainer>,
    state: Mutex<LearningState>,
    signals: broadcast::Sender<UpdateSignal>,
}

impl std::fmt::Debug for ContinuousLearningService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContinuousLearningService")
            .field("data_dir", &self.config.data_dir)
            .field("buffer_size", &self.buffer.lock().size())
            .field("update_running", &self.state.lock().update_running)
            .finish_non_exhaustive()
    }
}

impl ContinuousLearningService {
    /// Open the service, loading persisted feedback and update history
    ///
    /// Accepted samples are replayed into the buffer in file order. An update
    /// left `running` by a previous process is recorded as failed.
    ///
    /// # Errors
    /// Returns error if the configuration is invalid or the store is unreadable
    pub fn open(
        config: LearningConfig,
        trainer: Arc<dyn ModelTrainer>,
    ) -> Result<Self, LearningError> {
        config.validate()?;
        let store = LearningStore::open(&config.data_dir)?;

        let mut buffer = ReplayBuffer::new(config.buffer_max_size, config.buffer_min_size);
        let mut derived = LearningCounters::default();
        for sample in store.load_feedback()? {
            derived.total_collected += 1;
            if sample.accepted {
                derived.accepted += 1;
                buffer.add(sample);
            } else {
                derived.rejected += 1;
            }
        }

        let mut model_version = trainer.current_version();
        let mut last_completed_at = None;
        let mut last_update = None;
        let mut interrupted = 0;
        for mut update in store.load_updates()? {
            match update.status {
                UpdateStatus::Completed => {
                    derived.updates_completed += 1;
                    last_completed_at = update.completed_at.or(Some(update.timestamp));
                    if let Some(version) = &update.new_version {
                        model_version = version.clone();
                    }
                }
                UpdateStatus::Failed => derived.updates_failed += 1,
                UpdateStatus::Running => {
                    update.fail("interrupted before completion");
                    if let Err(e) = store.append_update(&update) {
                        tracing::warn!(update_id = %update.id, error = %e, "could not close interrupted update");
                    }
                    interrupted += 1;
                }
            }
            last_update = Some(update);
        }

        let mut counters = store.load_counters().unwrap_or(derived);
        if interrupted > 0 {
            counters.updates_failed += interrupted;
            store.save_counters(&counters)?;
        }

        tracing::info!(
            data_dir = %config.data_dir.display(),
            buffer_size = buffer.size(),
            model_version = %model_version,
            "learning service opened"
        );

        let (signals, _) = broadcast::channel(16);
        Ok(Self {
            validator: DataValidator::new(&config),
            config,
            buffer: Mutex::new(buffer),
            store,
            trainer,
            state: Mutex::new(LearningState {
                update_running: false,
                counters,
                model_version,
                last_completed_at,
                last_update,
                signal_pending: false,
            }),
            signals,
        })
    }

    /// Configuration in force
    #[inline]
    #[must_use]
    pub fn config(&self) -> &LearningConfig {
        &self.config
    }

    /// Validate, persist and (when accepted) buffer a sample
    ///
    /// Never fails: persistence problems are logged, counted and reported on
    /// the receipt.
    pub fn collect_feedback(&self, mut sample: FeedbackData) -> FeedbackReceipt {
        let outcome = self.validator.validate(&sample);
        sample.apply_validation(&outcome);

        let persisted = match self.store.append_feedback(&sample) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(feedback_id = %sample.id, error = %e, "failed to persist feedback");
                false
            }
        };

        let buffer_size = {
            let mut buffer = self.buffer.lock();
            if sample.accepted {
                buffer.add(sample.clone());
            }
            buffer.size()
        };

        let (update_ready, signal, counters) = {
            let mut state = self.state.lock();
            state.counters.total_collected += 1;
            if sample.accepted {
                state.counters.accepted += 1;
            } else {
                state.counters.rejected += 1;
            }
            if !persisted {
                state.counters.persistence_failures += 1;
            }

            let ready = buffer_size >= self.config.buffer_min_size
                && !state.update_running
                && self.cooldown_remaining(&state).is_none();
            let signal = if ready && !state.signal_pending {
                state.signal_pending = true;
                Some(UpdateSignal {
                    buffer_size,
                    raised_at: Utc::now(),
                })
            } else {
                None
            };
            (ready, signal, state.counters.clone())
        };

        self.save_counters(&counters);

        if let Some(signal) = signal {
            tracing::info!(buffer_size, "replay buffer ready, signalling model update");
            // No subscribers is fine; the receipt also carries readiness
            let _ = self.signals.send(signal);
        }

        metrics::counter!(
            "autofix_feedback_collected_total",
            "accepted" => if sample.accepted { "true" } else { "false" }
        )
        .increment(1);

        tracing::debug!(
            feedback_id = %sample.id,
            accepted = sample.accepted,
            score = sample.quality_score,
            "feedback collected"
        );

        FeedbackReceipt {
            id: sample.id,
            accepted: sample.accepted,
            quality_score: sample.quality_score,
            quality_level: sample.quality_level,
            reasons: sample.reasons,
            persisted,
            update_ready,
        }
    }

    /// Try to run a model update over `batch_size` buffered samples
    ///
    /// Without `force`, refuses when the buffer holds fewer than `batch_size`
    /// samples or the cooldown has not elapsed. A refusal never touches the
    /// single-flight flag.
    ///
    /// # Errors
    /// Returns error only if the `running` record cannot be persisted; trainer
    /// failures are reported as [`UpdateOutcome::Failed`].
    pub async fn trigger_update(
        &self,
        batch_size: usize,
        force: bool,
    ) -> Result<UpdateOutcome, LearningError> {
        let _flight = {
            let mut state = self.state.lock();
            if state.update_running {
                tracing::info!("model update skipped: another update is running");
                return Ok(UpdateOutcome::Skipped(SkipReason::UpdateInProgress));
            }
            if !force {
                let available = self.buffer.lock().size();
                if available < batch_size {
                    return Ok(UpdateOutcome::Skipped(SkipReason::InsufficientSamples {
                        available,
                        required: batch_size,
                    }));
                }
                if let Some(remaining) = self.cooldown_remaining(&state) {
                    return Ok(UpdateOutcome::Skipped(SkipReason::CoolingDown { remaining }));
                }
            }
            state.update_running = true;
            SingleFlight { state: &self.state }
        };

        let batch = self.buffer.lock().sample(batch_size);
        let previous_version = self.state.lock().model_version.clone();
        let mut record =
            ModelUpdate::running(previous_version, batch.len(), self.validator.quality_threshold());
        self.store.append_update(&record)?;

        tracing::info!(
            update_id = %record.id,
            samples = batch.len(),
            force,
            "model update started"
        );

        match AssertUnwindSafe(self.trainer.train(&batch)).catch_unwind().await {
            Ok(Ok(training)) => record.complete(&training),
            Ok(Err(e)) => record.fail(e.to_string()),
            Err(_) => record.fail("trainer panicked"),
        }

        if let Err(e) = self.store.append_update(&record) {
            tracing::warn!(update_id = %record.id, error = %e, "failed to persist update result");
            self.state.lock().counters.persistence_failures += 1;
        }

        let counters = {
            let mut state = self.state.lock();
            match record.status {
                UpdateStatus::Completed => {
                    state.counters.updates_completed += 1;
                    state.last_completed_at = record.completed_at;
                    if let Some(version) = &record.new_version {
                        state.model_version = version.clone();
                    }
                }
                UpdateStatus::Failed | UpdateStatus::Running => state.counters.updates_failed += 1,
            }
            state.signal_pending = false;
            state.last_update = Some(record.clone());
            state.counters.clone()
        };
        self.save_counters(&counters);

        if record.status == UpdateStatus::Completed {
            tracing::info!(
                update_id = %record.id,
                new_version = record.new_version.as_deref().unwrap_or("-"),
                delta = record.performance_delta.unwrap_or_default(),
                "model update completed"
            );
            metrics::counter!("autofix_model_updates_total", "status" => "completed").increment(1);
            Ok(UpdateOutcome::Completed(record))
        } else {
            tracing::warn!(
                update_id = %record.id,
                error = record.error.as_deref().unwrap_or("-"),
                "model update failed"
            );
            metrics::counter!("autofix_model_updates_total", "status" => "failed").increment(1);
            Ok(UpdateOutcome::Failed(record))
        }
    }

    /// Aggregate persisted feedback within an optional date window
    ///
    /// # Errors
    /// Returns error if the feedback file cannot be read
    pub fn get_stats(
        &self,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<FeedbackStats, LearningError> {
        let samples = self.store.load_feedback()?;
        Ok(FeedbackStats::aggregate(&samples, start, end))
    }

    /// Service-level statistics snapshot
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn learning_statistics(&self) -> LearningStatistics {
        let (buffer_size, buffer_capacity, buffer_ready, buffer_evicted) = {
            let buffer = self.buffer.lock();
            (
                buffer.size(),
                buffer.max_size(),
                buffer.is_ready(),
                buffer.evicted_count(),
            )
        };
        let state = self.state.lock();
        let acceptance_rate = if state.counters.total_collected == 0 {
            0.0
        } else {
            state.counters.accepted as f64 / state.counters.total_collected as f64
        };

        LearningStatistics {
            counters: state.counters.clone(),
            acceptance_rate,
            buffer_size,
            buffer_capacity,
            buffer_ready,
            buffer_evicted,
            model_version: state.model_version.clone(),
            update_running: state.update_running,
            last_update: state.last_update.clone(),
            quality_threshold: self.validator.quality_threshold(),
        }
    }

    /// Whether enough accepted samples exist to fine-tune now
    #[must_use]
    pub fn finetune_status(&self, min_examples: usize) -> FinetuneStatus {
        let available_samples = self.buffer.lock().size();
        let state = self.state.lock();
        let cooldown = self.cooldown_remaining(&state);
        FinetuneStatus {
            ready: available_samples >= min_examples && !state.update_running && cooldown.is_none(),
            available_samples,
            required_samples: min_examples,
            update_running: state.update_running,
            cooldown_remaining_secs: cooldown.map(|d| d.as_secs()),
            model_version: state.model_version.clone(),
            last_update: state.last_update.clone(),
        }
    }

    /// Update history, newest first
    ///
    /// # Errors
    /// Returns error if the update file cannot be read
    pub fn update_history(&self, limit: usize) -> Result<Vec<ModelUpdate>, LearningError> {
        let mut updates = self.store.load_updates()?;
        updates.reverse();
        updates.truncate(limit);
        Ok(updates)
    }

    /// Delete persisted rows older than `days_to_keep` days
    ///
    /// Buffer contents are unaffected.
    ///
    /// # Errors
    /// Returns error if the store cannot be rewritten
    pub fn cleanup_old_data(&self, days_to_keep: u32) -> Result<CleanupReport, LearningError> {
        let cutoff = Utc::now() - chrono::Duration::days(i64::from(days_to_keep));
        let report = self.store.retain_since(cutoff)?;
        tracing::info!(
            days_to_keep,
            feedback_removed = report.feedback_removed,
            updates_removed = report.updates_removed,
            "learning data retention applied"
        );
        Ok(report)
    }

    /// Subscribe to buffer-ready signals
    #[must_use]
    pub fn subscribe_updates(&self) -> broadcast::Receiver<UpdateSignal> {
        self.signals.subscribe()
    }

    /// Samples currently buffered
    #[must_use]
    pub fn buffer_size(&self) -> usize {
        self.buffer.lock().size()
    }

    /// Whether an update holds the single-flight flag
    #[must_use]
    pub fn is_update_running(&self) -> bool {
        self.state.lock().update_running
    }

    /// Model version currently in service
    #[must_use]
    pub fn model_version(&self) -> String {
        self.state.lock().model_version.clone()
    }

    fn cooldown_remaining(&self, state: &LearningState) -> Option<Duration> {
        let last = state.last_completed_at?;
        let elapsed = (Utc::now() - last).to_std().unwrap_or_default();
        self.config.update_cooldown().checked_sub(elapsed).filter(|d| !d.is_zero())
    }

    fn save_counters(&self, counters: &LearningCounters) {
        if let Err(e) = self.store.save_counters(counters) {
            tracing::warn!(error = %e, "failed to persist learning counters");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trainer::TrainingOutcome;
    use crate::types::FeedbackKind;

    struct FixedTrainer;

    #[async_trait::async_trait]
    impl ModelTrainer for FixedTrainer {
        fn current_version(&self) -> String {
            "v0".into()
        }

        async fn train(&self, samples: &[FeedbackData]) -> Result<TrainingOutcome, LearningError> {
            Ok(TrainingOutcome {
                new_version: "v1".into(),
                pre_accuracy: 0.5,
                post_accuracy: 0.6,
                samples_accepted: samples.len(),
                samples_rejected: 0,
            })
        }
    }

    struct PanickingTrainer;

    #[async_trait::async_trait]
    impl ModelTrainer for PanickingTrainer {
        fn current_version(&self) -> String {
            "v0".into()
        }

        async fn train(&self, _samples: &[FeedbackData]) -> Result<TrainingOutcome, LearningError> {
            panic!("trainer exploded")
        }
    }

    fn service(dir: &std::path::Path, trainer: Arc<dyn ModelTrainer>) -> ContinuousLearningService {
        let config = LearningConfig::new()
            .with_data_dir(dir)
            .with_buffer_bounds(2, 100)
            .with_update_cooldown(Duration::ZERO);
        ContinuousLearningService::open(config, trainer).unwrap()
    }

    fn good_sample(n: usize) -> FeedbackData {
        FeedbackData::new(
            FeedbackKind::Acceptance,
            format!("fn f{n}() {{}}"),
            format!("fn f{n}() -> u8 {{ 0 }}"),
        )
        .with_rating(4)
    }

    #[test]
    fn rejected_samples_are_still_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(FixedTrainer));

        let receipt = svc.collect_feedback(FeedbackData::new(FeedbackKind::Rating, "same", "same"));
        assert!(!receipt.accepted);
        assert!(receipt.persisted);
        assert_eq!(svc.buffer_size(), 0);

        let stats = svc.get_stats(None, None).unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.rejected, 1);
    }

    #[test]
    fn readiness_is_signalled_once() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(FixedTrainer));
        let mut rx = svc.subscribe_updates();

        assert!(!svc.collect_feedback(good_sample(0)).update_ready);
        assert!(svc.collect_feedback(good_sample(1)).update_ready);
        assert!(svc.collect_feedback(good_sample(2)).update_ready);

        let signal = rx.try_recv().expect("signal expected");
        assert_eq!(signal.buffer_size, 2);
        assert!(rx.try_recv().is_err(), "only one signal per readiness edge");
    }

    #[tokio::test]
    async fn insufficient_samples_leave_flag_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(FixedTrainer));
        svc.collect_feedback(good_sample(0));

        let outcome = svc.trigger_update(5, false).await.unwrap();
        assert_eq!(
            outcome,
            UpdateOutcome::Skipped(SkipReason::InsufficientSamples {
                available: 1,
                required: 5
            })
        );
        assert!(outcome.update_id().is_none());
        assert!(!svc.is_update_running());
    }

    #[tokio::test]
    async fn trainer_panic_clears_flag_and_records_failure() {
        let dir = tempfile::tempdir().unwrap();
        let svc = service(dir.path(), Arc::new(PanickingTrainer));
        svc.collect_feedback(good_sample(0));

        let outcome = svc.trigger_update(1, false).await.unwrap();
        let record = match outcome {
            UpdateOutcome::Failed(record) => record,
            other => panic!("expected failure, got {other:?}"),
        };
        assert_eq!(record.error.as_deref(), Some("trainer panicked"));
        assert!(!svc.is_update_running());
        assert_eq!(svc.learning_statistics().counters.updates_failed, 1);
    }

    #[tokio::test]
    async fn cooldown_blocks_unforced_updates() {
        let dir = tempfile::tempdir().unwrap();
        let config = LearningConfig::new()
            .with_data_dir(dir.path())
            .with_buffer_bounds(1, 10)
            .with_update_cooldown(Duration::from_secs(600));
        let svc = ContinuousLearningService::open(config, Arc::new(FixedTrainer)).unwrap();
        svc.collect_feedback(good_sample(0));

        assert!(!svc.trigger_update(1, false).await.unwrap().is_skipped());
        let second = svc.trigger_update(1, false).await.unwrap();
        assert!(matches!(
            second,
            UpdateOutcome::Skipped(SkipReason::CoolingDown { .. })
        ));
        assert!(svc.finetune_status(1).cooldown_remaining_secs.is_some());

        // Forcing bypasses sample and cooldown gates
        assert!(!svc.trigger_update(1, true).await.unwrap().is_skipped());
    }

    #[tokio::test]
    async fn interrupted_update_is_closed_on_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LearningStore::open(dir.path()).unwrap();
            store
                .append_update(&ModelUpdate::running("v0", 3, 0.7))
                .unwrap();
        }

        let svc = service(dir.path(), Arc::new(FixedTrainer));
        let history = svc.update_history(10).unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, UpdateStatus::Failed);
        assert!(!svc.is_update_running());
    }

    #[tokio::test]
    async fn interrupted_update_stays_counted_after_another_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LearningStore::open(dir.path()).unwrap();
            store.save_counters(&LearningCounters::default()).unwrap();
            store
                .append_update(&ModelUpdate::running("v0", 3, 0.7))
                .unwrap();
        }

        let first = service(dir.path(), Arc::new(FixedTrainer));
        assert_eq!(first.learning_statistics().counters.updates_failed, 1);
        drop(first);

        let second = service(dir.path(), Arc::new(FixedTrainer));
        assert_eq!(second.learning_statistics().counters.updates_failed, 1);
        assert_eq!(second.update_history(10).unwrap()[0].status, UpdateStatus::Failed);
    }
}
