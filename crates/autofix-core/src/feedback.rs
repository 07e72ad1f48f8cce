//! Sandbox outcomes as learning feedback

use autofix_learning::{FeedbackData, FeedbackKind};
use autofix_sandbox::TestResult;

/// Map an improvement score in [0, 1] onto the 1..=5 rating scale
#[must_use]
pub fn rating_for_score(score: f64) -> i32 {
    // score is clamped to [0, 1], so the product fits easily
    #[allow(clippy::cast_possible_truncation)]
    let steps = (score.clamp(0.0, 1.0) * 4.0).round() as i32;
    1 + steps
}

/// Feedback sample describing one evaluated fix
///
/// Passing fixes become `acceptance`, failing ones `rejection`; the rating
/// follows the improvement score.
#[must_use]
pub fn feedback_from_test(result: &TestResult) -> FeedbackData {
    let kind = if result.success {
        FeedbackKind::Acceptance
    } else {
        FeedbackKind::Rejection
    };
    let mut sample = FeedbackData::new(kind, &result.original_code, &result.modified_code)
        .with_rating(rating_for_score(result.improvement_score))
        .with_metadata("file", result.file_path.display().to_string())
        .with_metadata("test_result_id", result.id.to_string())
        .with_metadata("execution_ms", result.execution_time.as_millis().to_string());
    if let Some(language) = result.language {
        sample = sample.with_metadata("language", language.as_str());
    }
    if let Some(error) = &result.test_error {
        sample = sample.with_metadata("test_error", error.to_string());
    }
    if let Some(fragment) = &result.failed_fragment {
        sample = sample.with_metadata("failed_fragment", fragment.clone());
    }
    sample
}
