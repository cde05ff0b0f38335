use std::collections::{BTreeMap, HashSet};
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::mastery::config::{EdgePolicy, PhasePlan};
use crate::mastery::types::{Attempt, Drill, ErrorZone, FixSpec, Knob, Phase, TransitionSpec};

pub const MASTERY_PRIOR_FLOOR: f64 = 0.05;
const SEED_MASTERY: f64 = 0.55;
const SEED_DIFFICULTY: f64 = 0.35;

/// Everything the controller knows about one learner practising one skill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SkillState {
    pub skill: String,
    pub metric: String,
    pub pipeline: Vec<String>,
    pub drills: Vec<Drill>,
    pub current_drill_id: String,
    pub current_stage: String,
    pub difficulty: f64,
    pub target_error_rate: ErrorZone,
    pub drill_focus: BTreeMap<String, String>,
    pub drill_mastery: BTreeMap<String, f64>,
    pub stage_mastery: BTreeMap<String, f64>,
    pub policy: EdgePolicy,
    pub plan: PhasePlan,
    pub error_counts: BTreeMap<String, u32>,
    pub history: Vec<Attempt>,
    pub open_fix: Option<FixSpec>,
    pub last_transition: Option<TransitionSpec>,
}

impl Default for SkillState {
    fn default() -> Self {
        let seed = seed_catalog();
        let pipeline: Vec<String> = seed.iter().map(|(stage, _)| stage.to_string()).collect();
        let drill_focus = seed
            .iter()
            .map(|(stage, drill)| (drill.id.clone(), stage.to_string()))
            .collect();
        let current_drill_id = seed[0].1.id.clone();
        let stage_mastery = pipeline
            .iter()
            .map(|stage| (stage.clone(), SEED_MASTERY))
            .collect();
        let mut drill_mastery = BTreeMap::new();
        drill_mastery.insert(current_drill_id.clone(), SEED_MASTERY);

        Self {
            skill: "problem_solving".to_string(),
            metric: "solution quality judged after feedback (0 = broken, 1 = clean)".to_string(),
            current_stage: pipeline[0].clone(),
            pipeline,
            drills: seed.into_iter().map(|(_, drill)| drill).collect(),
            current_drill_id,
            difficulty: SEED_DIFFICULTY,
            target_error_rate: ErrorZone::new(0.15, 0.30),
            drill_focus,
            drill_mastery,
            stage_mastery,
            policy: EdgePolicy::default(),
            plan: PhasePlan::default(),
            error_counts: BTreeMap::new(),
            history: Vec::new(),
            open_fix: None,
            last_transition: None,
        }
    }
}

impl SkillState {
    pub fn drill(&self, id: &str) -> Option<&Drill> {
        self.drills.iter().find(|d| d.id == id)
    }

    pub fn current_drill(&self) -> Option<&Drill> {
        self.drill(&self.current_drill_id)
    }

    pub fn drill_mastery_or_prior(&self, drill_id: &str, difficulty: f64) -> f64 {
        self.drill_mastery
            .get(drill_id)
            .copied()
            .unwrap_or_else(|| mastery_prior(difficulty))
    }

    pub fn stage_mastery_or_prior(&self, stage: &str, difficulty: f64) -> f64 {
        self.stage_mastery
            .get(stage)
            .copied()
            .unwrap_or_else(|| mastery_prior(difficulty))
    }

    pub fn error_zone(&self, phase: Phase) -> ErrorZone {
        self.plan.zone(phase, self.target_error_rate)
    }

    /// Pipeline order first, then stages only known through mastery, then
    /// the current stage. Each stage appears once.
    pub fn ordered_stages(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        let mut ordered = Vec::new();
        let candidates = self
            .pipeline
            .iter()
            .chain(self.stage_mastery.keys())
            .chain(std::iter::once(&self.current_stage));
        for stage in candidates {
            if seen.insert(stage.as_str()) {
                ordered.push(stage.clone());
            }
        }
        ordered
    }

    pub fn ensure_stage(&mut self, stage: &str) {
        if !stage.is_empty() && !self.pipeline.iter().any(|s| s == stage) {
            self.pipeline.push(stage.to_string());
        }
    }

    pub fn ensure_drill(&mut self, drill_id: &str) {
        if drill_id.is_empty() || self.drill(drill_id).is_some() {
            return;
        }
        self.drills.push(Drill {
            id: drill_id.to_string(),
            name: drill_id.replace('_', " "),
            description: String::new(),
            knobs: BTreeMap::new(),
        });
    }

    /// Index range of the last `n` attempts in `history`.
    pub fn recent_range(&self, n: usize) -> Range<usize> {
        let end = self.history.len();
        end.saturating_sub(n)..end
    }

    pub fn recent(&self, n: usize) -> &[Attempt] {
        &self.history[self.recent_range(n)]
    }

    pub fn active_phase(&self) -> Phase {
        self.history
            .last()
            .map(|a| a.phase)
            .unwrap_or(Phase::ErrorHunt)
    }

    pub fn pending_fix(&self) -> Option<&FixSpec> {
        self.open_fix.as_ref().filter(|fix| fix.is_pending())
    }
}

pub fn mastery_prior(difficulty: f64) -> f64 {
    (1.0 - difficulty).max(MASTERY_PRIOR_FLOOR)
}

fn seed_catalog() -> Vec<(&'static str, Drill)> {
    vec![
        (
            "formalize_problem",
            seed_drill(
                "restate_and_constrain",
                "Restate and constrain",
                "Rewrite the problem in your own words, list inputs, outputs and every constraint before touching a solution.",
                &[
                    ("time_limit_minutes", Knob::Range(12.0, 5.0)),
                    ("hidden_constraints", Knob::Range(0.0, 3.0)),
                    ("format", Knob::Fixed(serde_json::json!("written"))),
                ],
            ),
        ),
        (
            "choose_approach",
            seed_drill(
                "approach_sprint",
                "Approach sprint",
                "Name two candidate approaches with their complexity and pick one with a one-line justification.",
                &[
                    ("time_limit_minutes", Knob::Range(10.0, 4.0)),
                    ("candidate_approaches", Knob::Range(2.0, 4.0)),
                ],
            ),
        ),
        (
            "implement",
            seed_drill(
                "timed_implementation",
                "Timed implementation",
                "Implement the chosen approach under a time box without running it until you believe it is correct.",
                &[
                    ("time_limit_minutes", Knob::Range(40.0, 15.0)),
                    ("problem_size_lines", Knob::Range(30.0, 120.0)),
                    ("reference_allowed", Knob::Fixed(serde_json::json!(false))),
                ],
            ),
        ),
        (
            "verify",
            seed_drill(
                "edge_case_hunt",
                "Edge-case hunt",
                "Enumerate edge cases and predict the output for each before executing any test.",
                &[
                    ("min_edge_cases", Knob::Range(3.0, 8.0)),
                    ("time_limit_minutes", Knob::Range(10.0, 5.0)),
                ],
            ),
        ),
        (
            "reflect",
            seed_drill(
                "post_mortem",
                "Post-mortem",
                "Write down what broke, where it broke and the single change that would have prevented it.",
                &[
                    ("max_words", Knob::Range(150.0, 60.0)),
                    ("format", Knob::Fixed(serde_json::json!("bullet list"))),
                ],
            ),
        ),
    ]
}

fn seed_drill(id: &str, name: &str, description: &str, knobs: &[(&str, Knob)]) -> Drill {
    Drill {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        knobs: knobs
            .iter()
            .map(|(name, knob)| (name.to_string(), knob.clone()))
            .collect(),
    }
}
