use crate::mastery::modeling::mistake::ErrorProfile;
use crate::mastery::types::{DifficultySignal, ErrorZone};

pub const SUCCESS_BAND_MARGIN: f64 = 0.10;

/// Classifies a window against a phase's error zone.
///
/// Noise above `noisy_ceiling` always reads as too hard. With no attempts the
/// raw success estimate decides alone.
pub fn classify_signal(
    zone: ErrorZone,
    profile: &ErrorProfile,
    probability: f64,
    noisy_ceiling: f64,
) -> DifficultySignal {
    let (success_lo, success_hi) = zone.success_zone();
    let band_lo = success_lo - SUCCESS_BAND_MARGIN;
    let band_hi = success_hi + SUCCESS_BAND_MARGIN;

    if profile.attempts == 0 {
        return if probability > band_hi {
            DifficultySignal::TooEasy
        } else if probability < band_lo {
            DifficultySignal::TooHard
        } else {
            DifficultySignal::Stretch
        };
    }

    if profile.errors > 0 && profile.noisy_share > noisy_ceiling {
        return DifficultySignal::TooHard;
    }
    if profile.error_rate > zone.hi || probability < band_lo {
        return DifficultySignal::TooHard;
    }
    if profile.error_rate < zone.lo || probability > band_hi {
        return DifficultySignal::TooEasy;
    }
    DifficultySignal::Stretch
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(attempts: usize, errors: usize, diagnosable_share: f64) -> ErrorProfile {
        ErrorProfile {
            attempts,
            errors,
            error_rate: if attempts == 0 { 0.0 } else { errors as f64 / attempts as f64 },
            diagnosable_share,
            high_quality_share: 0.0,
            noisy_share: if errors == 0 { 0.0 } else { 1.0 - diagnosable_share },
        }
    }

    #[test]
    fn test_empty_window_uses_probability() {
        let zone = ErrorZone::new(0.15, 0.30);
        let empty = ErrorProfile::default();
        assert_eq!(classify_signal(zone, &empty, 0.99, 0.5), DifficultySignal::TooEasy);
        assert_eq!(classify_signal(zone, &empty, 0.40, 0.5), DifficultySignal::TooHard);
        assert_eq!(classify_signal(zone, &empty, 0.78, 0.5), DifficultySignal::Stretch);
    }

    #[test]
    fn test_noise_forces_too_hard() {
        let zone = ErrorZone::new(0.15, 0.30);
        let noisy = profile(10, 2, 0.0);
        assert_eq!(classify_signal(zone, &noisy, 0.78, 0.5), DifficultySignal::TooHard);
    }

    #[test]
    fn test_error_rate_against_zone() {
        let zone = ErrorZone::new(0.15, 0.30);
        assert_eq!(
            classify_signal(zone, &profile(10, 0, 0.0), 0.78, 0.5),
            DifficultySignal::TooEasy
        );
        assert_eq!(
            classify_signal(zone, &profile(10, 5, 1.0), 0.78, 0.5),
            DifficultySignal::TooHard
        );
        assert_eq!(
            classify_signal(zone, &profile(10, 2, 1.0), 0.78, 0.5),
            DifficultySignal::Stretch
        );
    }
}
