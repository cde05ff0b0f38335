use serde::{Deserialize, Serialize};

use crate::mastery::types::Attempt;

pub const BIAS_THRESHOLD: f64 = 0.10;

/// How well the learner forecasts their own results. Positive bias means
/// results beat predictions (underconfidence).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CalibrationMetrics {
    pub samples: usize,
    pub bias: f64,
    pub mean_abs_gap: f64,
    pub brier: f64,
}

impl CalibrationMetrics {
    pub fn from_attempts(attempts: &[Attempt]) -> Self {
        if attempts.is_empty() {
            return Self::default();
        }
        let n = attempts.len() as f64;
        let bias = attempts.iter().map(Attempt::prediction_gap).sum::<f64>() / n;
        let mean_abs_gap = attempts
            .iter()
            .map(|a| a.prediction_gap().abs())
            .sum::<f64>()
            / n;
        let brier = attempts
            .iter()
            .map(|a| a.prediction_gap().powi(2))
            .sum::<f64>()
            / n;

        Self {
            samples: attempts.len(),
            bias,
            mean_abs_gap,
            brier,
        }
    }

    pub fn overconfident(&self) -> bool {
        self.samples > 0 && self.bias < -BIAS_THRESHOLD
    }

    pub fn underconfident(&self) -> bool {
        self.samples > 0 && self.bias > BIAS_THRESHOLD
    }
}
