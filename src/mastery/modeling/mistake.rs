//! Separates actionable mistakes from noise.
//!
//! A mistake is *diagnosable* when it is small, recurs at the same stage,
//! carries an explanation and is narrow enough to fix with one change. It is
//! *high quality* when a clean rep on the same stage follows shortly after.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::mastery::types::Attempt;

const SMALL_MIN_OBSERVED: f64 = 0.35;
const REPEAT_LOOKBACK: usize = 6;
const CLEAN_LOOKAHEAD: usize = 5;
const MAX_FIXABLE_TAGS: usize = 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MistakeQuality {
    pub small: bool,
    pub repeatable: bool,
    pub explainable: bool,
    pub fixable: bool,
    pub diagnosable: bool,
    pub followed_by_clean: bool,
    pub high_quality: bool,
}

/// Classifies `history[index]`. `clean_threshold` is the observed quality a
/// later clean rep must reach to count as a recovery.
pub fn mistake_quality(history: &[Attempt], index: usize, clean_threshold: f64) -> MistakeQuality {
    let Some(attempt) = history.get(index) else {
        return MistakeQuality::default();
    };
    if !attempt.has_error() {
        return MistakeQuality::default();
    }

    let small = attempt.error_types.len() == 1 && attempt.observed >= SMALL_MIN_OBSERVED;
    let repeatable = history[index.saturating_sub(REPEAT_LOOKBACK)..index]
        .iter()
        .any(|prev| prev.failure_point == attempt.failure_point && prev.shares_error_with(attempt));
    let explainable = !attempt.failure_point.is_empty();
    let fixable = explainable && attempt.error_types.len() <= MAX_FIXABLE_TAGS;
    let diagnosable = small && repeatable && explainable && fixable;

    let followed_by_clean = history
        .iter()
        .skip(index + 1)
        .filter(|next| next.failure_point == attempt.failure_point)
        .take(CLEAN_LOOKAHEAD)
        .any(|next| !next.has_error() && next.observed >= clean_threshold);

    MistakeQuality {
        small,
        repeatable,
        explainable,
        fixable,
        diagnosable,
        followed_by_clean,
        high_quality: diagnosable && followed_by_clean,
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ErrorProfile {
    pub attempts: usize,
    pub errors: usize,
    pub error_rate: f64,
    pub diagnosable_share: f64,
    pub high_quality_share: f64,
    pub noisy_share: f64,
}

/// Error statistics for `history[window]`; quality shares are taken over the
/// error-bearing attempts only.
pub fn error_profile(history: &[Attempt], window: Range<usize>, clean_threshold: f64) -> ErrorProfile {
    let window = window.start.min(history.len())..window.end.min(history.len());
    let attempts = window.len();
    let mut errors = 0usize;
    let mut diagnosable = 0usize;
    let mut high_quality = 0usize;

    for index in window {
        if !history[index].has_error() {
            continue;
        }
        errors += 1;
        let quality = mistake_quality(history, index, clean_threshold);
        if quality.diagnosable {
            diagnosable += 1;
        }
        if quality.high_quality {
            high_quality += 1;
        }
    }

    if attempts == 0 || errors == 0 {
        return ErrorProfile {
            attempts,
            errors,
            ..ErrorProfile::default()
        };
    }

    let diagnosable_share = diagnosable as f64 / errors as f64;
    ErrorProfile {
        attempts,
        errors,
        error_rate: errors as f64 / attempts as f64,
        diagnosable_share,
        high_quality_share: high_quality as f64 / errors as f64,
        noisy_share: 1.0 - diagnosable_share,
    }
}
