use autofix_learning::{
    ContinuousLearningService, FeedbackData, FeedbackKind, LearningConfig, LearningError,
    ModelTrainer, SkipReason, TrainingOutcome, UpdateOutcome, UpdateStatus,
};
use chrono::{Duration as ChronoDuration, Utc};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Trainer that sleeps before reporting a fixed improvement
struct SlowTrainer {
    delay: Duration,
    calls: AtomicUsize,
    fail: bool,
}

impl SlowTrainer {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            calls: AtomicUsize::new(0),
            fail: false,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new(Duration::ZERO)
        }
    }
}

#[async_trait::async_trait]
impl ModelTrainer for SlowTrainer {
    fn current_version(&self) -> String {
        "base-1".to_string()
    }

    async fn train(&self, samples: &[FeedbackData]) -> Result<TrainingOutcome, LearningError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        tokio::time::sleep(self.delay).await;
        if self.fail {
            return Err(LearningError::Training("gradient exploded".into()));
        }
        Ok(TrainingOutcome {
            new_version: format!("base-1+ft{call}"),
            pre_accuracy: 0.70,
            post_accuracy: 0.75,
            samples_accepted: samples.len(),
            samples_rejected: 0,
        })
    }
}

fn config(dir: &std::path::Path) -> LearningConfig {
    LearningConfig::new()
        .with_data_dir(dir)
        .with_quality_threshold(0.7)
        .with_buffer_bounds(3, 1_000)
        .with_update_cooldown(Duration::ZERO)
}

fn rated(n: usize) -> FeedbackData {
    FeedbackData::new(
        FeedbackKind::Acceptance,
        format!("password = \"hunter{n}\""),
        format!("password = std::env::var(\"PASSWORD_{n}\")?"),
    )
    .with_rating(4)
}

#[tokio::test]
async fn three_good_samples_produce_one_completed_update() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = Arc::new(SlowTrainer::new(Duration::ZERO));
    let service = ContinuousLearningService::open(config(dir.path()), trainer.clone()).unwrap();

    for n in 0..3 {
        let receipt = service.collect_feedback(rated(n));
        assert!(receipt.accepted, "sample {n} rejected: {:?}", receipt.reasons);
        assert!(receipt.persisted);
    }
    assert_eq!(service.buffer_size(), 3);

    let outcome = service.trigger_update(3, false).await.unwrap();
    let record = match outcome {
        UpdateOutcome::Completed(record) => record,
        other => panic!("expected completed update, got {other:?}"),
    };
    assert_eq!(record.samples_processed, 3);
    assert_eq!(record.new_version.as_deref(), Some("base-1+ft1"));
    assert!((record.performance_delta.unwrap() - 0.05).abs() < 1e-9);

    let history = service.update_history(10).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].status, UpdateStatus::Completed);
    assert_eq!(service.model_version(), "base-1+ft1");
    assert!(!service.is_update_running());
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn concurrent_triggers_run_a_single_update() {
    let dir = tempfile::tempdir().unwrap();
    let trainer = Arc::new(SlowTrainer::new(Duration::from_millis(100)));
    let service = ContinuousLearningService::open(config(dir.path()), trainer.clone()).unwrap();
    for n in 0..3 {
        service.collect_feedback(rated(n));
    }

    let (first, second) = tokio::join!(
        service.trigger_update(3, false),
        service.trigger_update(3, false)
    );
    let outcomes = [first.unwrap(), second.unwrap()];

    let skipped = outcomes
        .iter()
        .filter(|o| matches!(o, UpdateOutcome::Skipped(SkipReason::UpdateInProgress)))
        .count();
    let completed = outcomes
        .iter()
        .filter(|o| matches!(o, UpdateOutcome::Completed(_)))
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(completed, 1);
    assert_eq!(trainer.calls.load(Ordering::SeqCst), 1);
    assert!(!service.is_update_running());
}

#[tokio::test]
async fn failed_training_is_recorded_and_releases_the_flag() {
    let dir = tempfile::tempdir().unwrap();
    let service =
        ContinuousLearningService::open(config(dir.path()), Arc::new(SlowTrainer::failing()))
            .unwrap();
    for n in 0..3 {
        service.collect_feedback(rated(n));
    }

    let outcome = service.trigger_update(3, false).await.unwrap();
    assert!(matches!(outcome, UpdateOutcome::Failed(_)));
    let record = outcome.record().unwrap();
    assert!(record.error.as_deref().unwrap().contains("gradient exploded"));
    assert!(!service.is_update_running());
    assert_eq!(service.model_version(), "base-1");

    // A failed update imposes no cooldown
    assert!(service.finetune_status(3).ready);
}

#[tokio::test]
async fn reopening_restores_buffer_and_history() {
    let dir = tempfile::tempdir().unwrap();
    {
        let service = ContinuousLearningService::open(
            config(dir.path()),
            Arc::new(SlowTrainer::new(Duration::ZERO)),
        )
        .unwrap();
        for n in 0..3 {
            service.collect_feedback(rated(n));
        }
        service.collect_feedback(FeedbackData::new(FeedbackKind::Rejection, "", "x"));
        service.trigger_update(3, false).await.unwrap();
    }

    let service = ContinuousLearningService::open(
        config(dir.path()),
        Arc::new(SlowTrainer::new(Duration::ZERO)),
    )
    .unwrap();
    assert_eq!(service.buffer_size(), 3);
    assert_eq!(service.model_version(), "base-1+ft1");

    let stats = service.learning_statistics();
    assert_eq!(stats.counters.total_collected, 4);
    assert_eq!(stats.counters.accepted, 3);
    assert_eq!(stats.counters.rejected, 1);
    assert_eq!(stats.counters.updates_completed, 1);
    assert!((stats.acceptance_rate - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn stats_respect_the_date_window() {
    let dir = tempfile::tempdir().unwrap();
    let service = ContinuousLearningService::open(
        config(dir.path()),
        Arc::new(SlowTrainer::new(Duration::ZERO)),
    )
    .unwrap();

    service.collect_feedback(rated(0).with_timestamp(Utc::now() - ChronoDuration::days(10)));
    service.collect_feedback(rated(1));

    let recent = service
        .get_stats(Some(Utc::now() - ChronoDuration::days(1)), None)
        .unwrap();
    assert_eq!(recent.total, 1);
    let all = service.get_stats(None, None).unwrap();
    assert_eq!(all.total, 2);
}

#[tokio::test]
async fn cleanup_drops_old_rows_but_keeps_the_buffer() {
    let dir = tempfile::tempdir().unwrap();
    let service = ContinuousLearningService::open(
        config(dir.path()),
        Arc::new(SlowTrainer::new(Duration::ZERO)),
    )
    .unwrap();

    service.collect_feedback(rated(0).with_timestamp(Utc::now() - ChronoDuration::days(45)));
    service.collect_feedback(rated(1));

    let report = service.cleanup_old_data(30).unwrap();
    assert_eq!(report.feedback_removed, 1);
    assert_eq!(service.get_stats(None, None).unwrap().total, 1);
    assert_eq!(service.buffer_size(), 2);
}

#[tokio::test]
async fn update_batch_is_capped_by_requested_size() {
    let dir = tempfile::tempdir().unwrap();
    let config = config(dir.path()).with_buffer_bounds(2, 1_000);
    let service =
        ContinuousLearningService::open(config, Arc::new(SlowTrainer::new(Duration::ZERO)))
            .unwrap();

    let accepted = (0..3)
        .filter(|n| service.collect_feedback(rated(*n)).accepted)
        .count();
    assert_eq!(accepted, 3);

    let outcome = service.trigger_update(2, false).await.unwrap();
    assert!(outcome.update_id().is_some());
    assert_eq!(outcome.record().unwrap().samples_processed, 2);
}
