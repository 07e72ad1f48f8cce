//! Feedback sample validation
//!
//! Scores a single sample before it may enter the replay buffer. Structural
//! rules (empty or out-of-bounds content, no-op samples, bad ratings) reject
//! outright; otherwise the score is a weighted blend of length adequacy,
//! correction signal and rating.

use crate::config::LearningConfig;
use crate::types::{FeedbackData, FeedbackKind, QualityLevel};

const LENGTH_WEIGHT: f64 = 0.4;
const CORRECTION_WEIGHT: f64 = 0.3;
const RATING_WEIGHT: f64 = 0.3;

/// Output/input length ratio considered adequate
const ADEQUATE_RATIO: std::ops::RangeInclusive<f64> = 0.1..=10.0;

/// Valid user rating range
pub const RATING_RANGE: std::ops::RangeInclusive<i32> = 1..=5;

/// Result of validating one sample
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationOutcome {
    /// Whether the sample may enter the buffer
    pub accepted: bool,
    /// Score in [0, 1]
    pub quality_score: f64,
    /// Derived quality level
    pub quality_level: QualityLevel,
    /// Why the sample was rejected (empty when accepted)
    pub reasons: Vec<String>,
}

impl ValidationOutcome {
    fn invalid(reasons: Vec<String>) -> Self {
        Self {
            accepted: false,
            quality_score: 0.0,
            quality_level: QualityLevel::Invalid,
            reasons,
        }
    }

    /// Whether a structural rule (not the threshold) rejected the sample
    #[inline]
    #[must_use]
    pub fn is_structural_failure(&self) -> bool {
        self.quality_level == QualityLevel::Invalid
    }
}

/// Stateless sample validator
#[derive(Debug, Clone)]
pub struct DataValidator {
    quality_threshold: f64,
    min_length: usize,
    max_length: usize,
}

impl DataValidator {
    /// Create validator from learning configuration
    #[must_use]
    pub fn new(config: &LearningConfig) -> Self {
        Self {
            quality_threshold: config.quality_threshold,
            min_length: config.min_length,
            max_length: config.max_length,
        }
    }

    /// Create validator with an explicit threshold and default length bounds
    #[must_use]
    pub fn with_threshold(quality_threshold: f64) -> Self {
        Self::new(&LearningConfig::default().with_quality_threshold(quality_threshold))
    }

    /// Acceptance threshold
    #[inline]
    #[must_use]
    pub fn quality_threshold(&self) -> f64 {
        self.quality_threshold
    }

    /// Validate a sample
    ///
    /// Pure function of the sample and the validator's bounds.
    #[must_use]
    pub fn validate(&self, sample: &FeedbackData) -> ValidationOutcome {
        let mut reasons = Vec::new();
        self.check_content("input", &sample.input, &mut reasons);
        self.check_content("output", &sample.output, &mut reasons);

        if sample.input == sample.output {
            reasons.push("no-op sample: input and output are identical".to_string());
        }

        if let Some(rating) = sample.rating {
            if !RATING_RANGE.contains(&rating) {
                reasons.push(format!("rating {rating} outside 1..=5"));
            }
        }

        if !reasons.is_empty() {
            return ValidationOutcome::invalid(reasons);
        }

        let score = self.score(sample);
        let accepted = score >= self.quality_threshold;
        if !accepted {
            reasons.push(format!(
                "quality score {score:.2} below threshold {:.2}",
                self.quality_threshold
            ));
        }

        ValidationOutcome {
            accepted,
            quality_score: score,
            quality_level: QualityLevel::from_score(score, self.quality_threshold),
            reasons,
        }
    }

    fn check_content(&self, label: &str, content: &str, reasons: &mut Vec<String>) {
        if content.trim().is_empty() {
            reasons.push(format!("empty {label}"));
        } else if content.len() < self.min_length {
            reasons.push(format!(
                "{label} too short ({} < {} bytes)",
                content.len(),
                self.min_length
            ));
        } else if content.len() > self.max_length {
            reasons.push(format!(
                "{label} too long ({} > {} bytes)",
                content.len(),
                self.max_length
            ));
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn score(&self, sample: &FeedbackData) -> f64 {
        let ratio = sample.output.len() as f64 / sample.input.len().max(1) as f64;
        let length = if ADEQUATE_RATIO.contains(&ratio) { 1.0 } else { 0.5 };

        let correction = match &sample.corrected_output {
            Some(corrected) if !corrected.trim().is_empty() && corrected != &sample.output => 1.0,
            _ => match sample.kind {
                FeedbackKind::Acceptance => 1.0,
                FeedbackKind::Correction | FeedbackKind::Rating => 0.5,
                FeedbackKind::Rejection => 0.0,
            },
        };

        let score = match sample.rating {
            Some(rating) => {
                let rating = f64::from(rating - 1) / 4.0;
                LENGTH_WEIGHT * length + CORRECTION_WEIGHT * correction + RATING_WEIGHT * rating
            }
            None => {
                (LENGTH_WEIGHT * length + CORRECTION_WEIGHT * correction)
                    / (LENGTH_WEIGHT + CORRECTION_WEIGHT)
            }
        };

        score.clamp(0.0, 1.0)
    }
}

impl Default for DataValidator {
    fn default() -> Self {
        Self::new(&LearningConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn validator() -> DataValidator {
        DataValidator::with_threshold(0.7)
    }

    #[test]
    fn identical_content_is_a_noop() {
        let sample = FeedbackData::new(FeedbackKind::Acceptance, "x = 1", "x = 1").with_rating(5);
        let outcome = validator().validate(&sample);
        assert!(!outcome.accepted);
        assert!(outcome.is_structural_failure());
        assert!(outcome.reasons.iter().any(|r| r.contains("no-op")));
    }

    #[test]
    fn empty_output_is_invalid() {
        let sample = FeedbackData::new(FeedbackKind::Acceptance, "x = 1", "   ");
        let outcome = validator().validate(&sample);
        assert!(!outcome.accepted);
        assert_eq!(outcome.quality_score, 0.0);
        assert!(outcome.reasons.iter().any(|r| r == "empty output"));
    }

    #[test]
    fn out_of_range_rating_is_invalid() {
        let sample = FeedbackData::new(FeedbackKind::Rating, "x = 1", "x = 2").with_rating(7);
        let outcome = validator().validate(&sample);
        assert!(outcome.is_structural_failure());
        assert!(outcome.reasons.iter().any(|r| r.contains("rating 7")));
    }

    #[test]
    fn too_long_content_is_invalid() {
        let config = LearningConfig::default();
        let validator = DataValidator::new(&LearningConfig {
            max_length: 16,
            ..config
        });
        let sample = FeedbackData::new(FeedbackKind::Acceptance, "short", "a much longer output text");
        let outcome = validator.validate(&sample);
        assert!(outcome.reasons.iter().any(|r| r.contains("output too long")));
    }

    #[test]
    fn rated_acceptance_passes_default_threshold() {
        let sample =
            FeedbackData::new(FeedbackKind::Acceptance, "def f(): pass", "def f():\n    return 1")
                .with_rating(4);
        let outcome = validator().validate(&sample);
        assert!(outcome.accepted, "reasons: {:?}", outcome.reasons);
        assert!((outcome.quality_score - 0.925).abs() < 1e-9);
        assert_eq!(outcome.quality_level, QualityLevel::High);
    }

    #[test]
    fn unrated_rejection_without_correction_scores_low() {
        let sample = FeedbackData::new(FeedbackKind::Rejection, "let a = 1;", "let a = 2;");
        let outcome = validator().validate(&sample);
        assert!(!outcome.accepted);
        assert!(!outcome.is_structural_failure());
        assert!(outcome.reasons[0].contains("below threshold"));
    }

    #[test]
    fn correction_lifts_rejection() {
        let sample = FeedbackData::new(FeedbackKind::Rejection, "let a = 1;", "let a = 2;")
            .with_correction("let a: u8 = 1;");
        let outcome = validator().validate(&sample);
        assert!(outcome.accepted);
    }

    fn kind_strategy() -> impl Strategy<Value = FeedbackKind> {
        prop_oneof![
            Just(FeedbackKind::Correction),
            Just(FeedbackKind::Acceptance),
            Just(FeedbackKind::Rejection),
            Just(FeedbackKind::Rating),
        ]
    }

    proptest! {
        #[test]
        fn identical_input_and_output_never_accepted(
            text in ".{0,64}",
            kind in kind_strategy(),
            rating in proptest::option::of(-2i32..8),
        ) {
            let mut sample = FeedbackData::new(kind, text.clone(), text);
            sample.rating = rating;
            prop_assert!(!validator().validate(&sample).accepted);
        }

        #[test]
        fn acceptance_agrees_with_threshold(
            input in "[a-z ]{0,40}",
            output in "[a-z ]{0,40}",
            kind in kind_strategy(),
            rating in proptest::option::of(-1i32..7),
            threshold in 0.0f64..=1.0,
        ) {
            let mut sample = FeedbackData::new(kind, input, output);
            sample.rating = rating;
            let validator = DataValidator::with_threshold(threshold);
            let outcome = validator.validate(&sample);

            prop_assert!((0.0..=1.0).contains(&outcome.quality_score));
            if outcome.accepted {
                prop_assert!(outcome.quality_score >= threshold);
                prop_assert!(outcome.reasons.is_empty());
            } else {
                prop_assert!(outcome.quality_score < threshold || outcome.is_structural_failure());
            }
        }
    }
}
