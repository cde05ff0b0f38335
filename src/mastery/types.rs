use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const UNLABELED_ERROR: &str = "unlabeled_error";

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Warmup,
    #[default]
    ErrorHunt,
    Correction,
    Consolidate,
}

impl Phase {
    pub const ALL: [Phase; 4] = [
        Phase::Warmup,
        Phase::ErrorHunt,
        Phase::Correction,
        Phase::Consolidate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warmup => "warmup",
            Self::ErrorHunt => "error_hunt",
            Self::Correction => "correction",
            Self::Consolidate => "consolidate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "warmup" => Some(Self::Warmup),
            "error_hunt" => Some(Self::ErrorHunt),
            "correction" => Some(Self::Correction),
            "consolidate" => Some(Self::Consolidate),
            _ => None,
        }
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationMode {
    ProveFix,
    ErrorHunt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DifficultySignal {
    TooEasy,
    TooHard,
    Stretch,
}

impl DifficultySignal {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TooEasy => "too_easy",
            Self::TooHard => "too_hard",
            Self::Stretch => "stretch",
        }
    }
}

/// Error-rate band for a phase. The matching success band is its dual.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ErrorZone {
    pub lo: f64,
    pub hi: f64,
}

impl ErrorZone {
    pub fn new(lo: f64, hi: f64) -> Self {
        let lo = lo.clamp(0.0, 1.0);
        let hi = hi.clamp(0.0, 1.0);
        if lo <= hi {
            Self { lo, hi }
        } else {
            Self { lo: hi, hi: lo }
        }
    }

    pub fn success_zone(&self) -> (f64, f64) {
        (1.0 - self.hi, 1.0 - self.lo)
    }

    pub fn midpoint(&self) -> f64 {
        (self.lo + self.hi) / 2.0
    }

    pub fn contains(&self, rate: f64) -> bool {
        rate >= self.lo && rate <= self.hi
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attempt {
    pub timestamp: DateTime<Utc>,
    pub phase: Phase,
    pub drill_id: String,
    pub difficulty: f64,
    pub prediction: f64,
    pub observed: f64,
    #[serde(default)]
    pub error_types: Vec<String>,
    #[serde(default)]
    pub failure_point: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback_seconds: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correction: Option<String>,
    #[serde(default)]
    pub clean_rep: bool,
}

impl Attempt {
    pub fn has_error(&self) -> bool {
        !self.error_types.is_empty()
    }

    pub fn prediction_gap(&self) -> f64 {
        self.observed - self.prediction
    }

    pub fn shares_error_with(&self, other: &Attempt) -> bool {
        self.error_types
            .iter()
            .any(|tag| other.error_types.iter().any(|t| t == tag))
    }
}

/// A drill knob: either a constant or a `(low, high)` range scaled by difficulty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Knob {
    Range(f64, f64),
    Fixed(serde_json::Value),
}

impl Knob {
    pub fn resolve(&self, difficulty: f64) -> serde_json::Value {
        match self {
            Self::Range(low, high) => {
                let d = difficulty.clamp(0.0, 1.0);
                let value = round2(low + (high - low) * d);
                serde_json::json!(value)
            }
            Self::Fixed(value) => value.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Drill {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub knobs: BTreeMap<String, Knob>,
}

impl Drill {
    pub fn resolve_knobs(&self, difficulty: f64) -> BTreeMap<String, serde_json::Value> {
        self.knobs
            .iter()
            .map(|(name, knob)| (name.clone(), knob.resolve(difficulty)))
            .collect()
    }
}

/// An open remediation: one change, proven by a run of clean reps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixSpec {
    pub dominant_error_type: String,
    pub failure_moment: String,
    #[serde(default)]
    pub trigger: String,
    #[serde(default)]
    pub one_change: String,
    #[serde(default)]
    pub cue: String,
    #[serde(default)]
    pub proof_clean_reps: u32,
    #[serde(default = "default_required_clean_reps")]
    pub required_clean_reps: u32,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_required_clean_reps() -> u32 {
    2
}

impl FixSpec {
    pub fn is_pending(&self) -> bool {
        self.proof_clean_reps < self.required_clean_reps
    }

    pub fn remaining_reps(&self) -> u32 {
        self.required_clean_reps
            .saturating_sub(self.proof_clean_reps)
            .max(1)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionSpec {
    pub from_stage: String,
    pub to_stage: String,
    pub drill_id: String,
    #[serde(default)]
    pub reason: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub at_attempt: usize,
}

pub fn clamp01(value: f64) -> f64 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_parse_roundtrip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::parse("error-hunt"), Some(Phase::ErrorHunt));
        assert_eq!(Phase::parse("sprint"), None);
    }

    #[test]
    fn test_knob_range_clamps_difficulty() {
        let knob = Knob::Range(10.0, 30.0);
        assert_eq!(knob.resolve(0.5), serde_json::json!(20.0));
        assert_eq!(knob.resolve(-1.0), serde_json::json!(10.0));
        assert_eq!(knob.resolve(7.0), serde_json::json!(30.0));
    }

    #[test]
    fn test_knob_untagged_deserialization() {
        let range: Knob = serde_json::from_str("[1.0, 4.0]").unwrap();
        assert_eq!(range, Knob::Range(1.0, 4.0));
        let fixed: Knob = serde_json::from_str("\"written\"").unwrap();
        assert_eq!(fixed, Knob::Fixed(serde_json::json!("written")));
    }

    #[test]
    fn test_fix_pending_and_remaining() {
        let mut fix = FixSpec {
            dominant_error_type: "x".into(),
            failure_moment: "implement".into(),
            trigger: String::new(),
            one_change: String::new(),
            cue: String::new(),
            proof_clean_reps: 0,
            required_clean_reps: 3,
            created_at: Utc::now(),
        };
        assert!(fix.is_pending());
        assert_eq!(fix.remaining_reps(), 3);
        fix.proof_clean_reps = 3;
        assert!(!fix.is_pending());
        assert_eq!(fix.remaining_reps(), 1);
    }

    #[test]
    fn test_error_zone_duality() {
        let zone = ErrorZone::new(0.30, 0.15);
        assert_eq!(zone.lo, 0.15);
        let (lo, hi) = zone.success_zone();
        assert!((lo - 0.70).abs() < 1e-12);
        assert!((hi - 0.85).abs() < 1e-12);
        assert!(zone.contains(0.2));
        assert!(!zone.contains(0.05));
    }
}
