//! Presentational review banding.
//!
//! Pure functions of a [`SignalResult`]; nothing in the scheduler depends on them.

use serde::{Deserialize, Serialize};

use crate::result::SignalResult;

/// Scores at or above this are considered high-confidence.
pub const HIGH_CONFIDENCE_CUTOFF: f64 = 0.8;

/// Scores below this are considered low-confidence.
pub const LOW_CONFIDENCE_CUTOFF: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewBand {
    High,
    Medium,
    Low,
}

impl ReviewBand {
    /// Non-finite scores land in `Low`.
    pub fn for_score(score: f64) -> Self {
        if score >= HIGH_CONFIDENCE_CUTOFF {
            ReviewBand::High
        } else if score >= LOW_CONFIDENCE_CUTOFF {
            ReviewBand::Medium
        } else {
            ReviewBand::Low
        }
    }
}

/// Whether a result should be flagged for a human look.
pub fn needs_review(result: &SignalResult) -> bool {
    ReviewBand::for_score(result.quality_score) != ReviewBand::High
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_split_at_cutoffs() {
        assert_eq!(ReviewBand::for_score(1.0), ReviewBand::High);
        assert_eq!(ReviewBand::for_score(0.8), ReviewBand::High);
        assert_eq!(ReviewBand::for_score(0.79), ReviewBand::Medium);
        assert_eq!(ReviewBand::for_score(0.5), ReviewBand::Medium);
        assert_eq!(ReviewBand::for_score(0.49), ReviewBand::Low);
        assert_eq!(ReviewBand::for_score(f64::NAN), ReviewBand::Low);
    }

    #[test]
    fn needs_review_below_high_confidence() {
        assert!(!needs_review(&SignalResult::new(0.95, 1.0)));
        assert!(needs_review(&SignalResult::new(0.6, 1.0)));
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: review flag is exactly "score below the high cutoff".
            #[test]
            fn review_flag_matches_cutoff(score in 0.0f64..=1.0, confidence in 0.0f64..=1.0) {
                let result = SignalResult::new(score, confidence);
                prop_assert_eq!(needs_review(&result), score < HIGH_CONFIDENCE_CUTOFF);
            }
        }
    }
}
