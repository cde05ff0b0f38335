use serde::{Deserialize, Serialize};

use crate::mastery::types::{clamp01, ErrorZone, Phase};

/// Tunables for the edge-of-competence controller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgePolicy {
    pub target_success_zone: (f64, f64),
    pub feedback_half_life_seconds: f64,
    pub min_update_weight: f64,
    pub max_update_weight: f64,
    pub noisy_error_ceiling: f64,
}

impl Default for EdgePolicy {
    fn default() -> Self {
        Self {
            target_success_zone: (0.70, 0.85),
            feedback_half_life_seconds: 300.0,
            min_update_weight: 0.35,
            max_update_weight: 1.0,
            noisy_error_ceiling: 0.50,
        }
    }
}

impl EdgePolicy {
    pub fn sanitized(&self) -> Self {
        let (a, b) = (
            clamp01(self.target_success_zone.0),
            clamp01(self.target_success_zone.1),
        );
        let min_w = clamp01(self.min_update_weight);
        let max_w = clamp01(self.max_update_weight).max(min_w);
        let half_life = if self.feedback_half_life_seconds.is_finite()
            && self.feedback_half_life_seconds > 0.0
        {
            self.feedback_half_life_seconds
        } else {
            EdgePolicy::default().feedback_half_life_seconds
        };

        Self {
            target_success_zone: (a.min(b), a.max(b)),
            feedback_half_life_seconds: half_life,
            min_update_weight: min_w,
            max_update_weight: max_w,
            noisy_error_ceiling: clamp01(self.noisy_error_ceiling),
        }
    }

    /// Exponential decay from `max_update_weight` toward `min_update_weight`
    /// as feedback arrives later.
    pub fn latency_weight(&self, feedback_seconds: Option<f64>) -> f64 {
        let policy = self.sanitized();
        match feedback_seconds {
            Some(latency) => {
                let latency = latency.max(0.0);
                let decay = (-latency / policy.feedback_half_life_seconds).exp();
                let weight = policy.min_update_weight
                    + (policy.max_update_weight - policy.min_update_weight) * decay;
                weight.clamp(policy.min_update_weight, policy.max_update_weight)
            }
            None => DEFAULT_LATENCY_WEIGHT,
        }
    }
}

pub const DEFAULT_LATENCY_WEIGHT: f64 = 0.60;

/// Per-phase error bands. The error-hunt band lives on the skill state itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PhasePlan {
    pub warmup: ErrorZone,
    pub correction: ErrorZone,
    pub consolidate: ErrorZone,
    pub consolidate_target_clean_reps: u32,
}

impl Default for PhasePlan {
    fn default() -> Self {
        Self {
            warmup: ErrorZone::new(0.00, 0.10),
            correction: ErrorZone::new(0.10, 0.20),
            consolidate: ErrorZone::new(0.03, 0.08),
            consolidate_target_clean_reps: 3,
        }
    }
}

impl PhasePlan {
    pub fn zone(&self, phase: Phase, error_hunt: ErrorZone) -> ErrorZone {
        match phase {
            Phase::Warmup => self.warmup,
            Phase::ErrorHunt => error_hunt,
            Phase::Correction => self.correction,
            Phase::Consolidate => self.consolidate,
        }
    }
}
