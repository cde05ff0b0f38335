//! Logistic success model and the bisection that inverts it.

pub const SENSITIVITY: f64 = 6.0;
pub const DRILL_WEIGHT: f64 = 0.70;
pub const STAGE_WEIGHT: f64 = 0.30;
pub const CALIBRATION_ITERATIONS: usize = 20;

/// Logistic function in the two-branch form that never exponentiates a large
/// positive argument.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

pub fn blend_mastery(drill_mastery: f64, stage_mastery: f64) -> f64 {
    DRILL_WEIGHT * drill_mastery + STAGE_WEIGHT * stage_mastery
}

pub fn success_probability(effective_mastery: f64, difficulty: f64) -> f64 {
    sigmoid(SENSITIVITY * (effective_mastery - difficulty))
}

/// Finds the difficulty in `[0, 1]` at which `success_at` predicts `target`.
///
/// `success_at` must be non-increasing in difficulty.
pub fn calibrate_difficulty<F>(target: f64, success_at: F) -> f64
where
    F: Fn(f64) -> f64,
{
    let mut lo = 0.0_f64;
    let mut hi = 1.0_f64;
    for _ in 0..CALIBRATION_ITERATIONS {
        let mid = (lo + hi) / 2.0;
        if success_at(mid) > target {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    (lo + hi) / 2.0
}
