use std::cmp::Ordering;
use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;

use crate::mastery::modeling::{
    blend_mastery, calibrate_difficulty, classify_signal, error_profile, mistake_quality,
    success_probability, CalibrationMetrics, ErrorProfile,
};
use crate::mastery::state::SkillState;
use crate::mastery::types::{
    clamp01, round2, Attempt, DifficultySignal, Drill, ErrorZone, FixSpec, Phase,
    RecommendationMode, TransitionSpec, UNLABELED_ERROR,
};

const CLEAN_QUALITY_FLOOR: f64 = 0.70;

const SIGNAL_WINDOW: usize = 20;
const WEAKNESS_WINDOW: usize = 30;
const STATUS_WINDOW: usize = 20;
const ADJUST_WINDOW: usize = 12;

const TARGET_SIGNAL_NUDGE: f64 = 0.03;
const TARGET_BIAS_NUDGE: f64 = 0.02;
const PROVE_FIX_ZONE_POSITION: f64 = 0.75;
const PROVE_FIX_MAX_TARGET: f64 = 0.95;

const BASE_LEARNING_RATE: f64 = 0.18;
const MIN_LEARNING_RATE: f64 = 0.05;
const MAX_LEARNING_RATE: f64 = 0.30;
const DIAGNOSABLE_MULTIPLIER: f64 = 1.10;
const NOISY_MULTIPLIER: f64 = 0.70;
const GAP_DAMPING: f64 = 0.90;
const GAP_DAMPING_THRESHOLD: f64 = 0.25;
const PROOF_REP_BONUS: f64 = 0.08;
const CLEAN_BONUS: f64 = 0.05;
const DIAGNOSABLE_PENALTY: f64 = 0.12;
const NOISY_PENALTY: f64 = 0.28;
const OVERCONFIDENCE_PENALTY: f64 = 0.05;
const OVERCONFIDENCE_GAP: f64 = 0.15;

const ADVANCE_WINDOW: usize = 20;
const ADVANCE_MIN_ATTEMPTS: usize = 10;
const ADVANCE_MIN_STAGE_ATTEMPTS: usize = 5;
const ADVANCE_ERROR_FLOOR: f64 = 0.06;
const ADVANCE_MIN_MASTERY: f64 = 0.75;
const ADVANCE_MIN_DIFFICULTY: f64 = 0.65;
const ENTRY_SUCCESS_TARGET: f64 = 0.78;
const STAY_ON_STAGE_ATTEMPTS: usize = 4;

const MAX_DIFFICULTY_STEP: f64 = 0.20;

/// Input for [`MasteryController::record_attempt`]. Omitted drill, difficulty
/// and failure point fall back to the state's current values.
#[derive(Debug, Clone, Default)]
pub struct AttemptInput {
    pub phase: Phase,
    pub prediction: f64,
    pub observed: f64,
    pub error_types: Vec<String>,
    pub drill_id: Option<String>,
    pub difficulty: Option<f64>,
    pub failure_point: Option<String>,
    pub feedback_seconds: Option<f64>,
    pub notes: Option<String>,
    pub correction: Option<String>,
    pub clean_rep: bool,
}

impl AttemptInput {
    pub fn new(phase: Phase, prediction: f64, observed: f64) -> Self {
        Self {
            phase,
            prediction,
            observed,
            ..Self::default()
        }
    }

    pub fn with_errors<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.error_types = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn on_stage(mut self, stage: impl Into<String>) -> Self {
        self.failure_point = Some(stage.into());
        self
    }

    pub fn on_drill(mut self, drill_id: impl Into<String>) -> Self {
        self.drill_id = Some(drill_id.into());
        self
    }

    pub fn at_difficulty(mut self, difficulty: f64) -> Self {
        self.difficulty = Some(difficulty);
        self
    }

    pub fn with_feedback_seconds(mut self, seconds: f64) -> Self {
        self.feedback_seconds = Some(seconds);
        self
    }

    pub fn as_proof_rep(mut self) -> Self {
        self.clean_rep = true;
        self
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    pub mode: RecommendationMode,
    pub phase: Phase,
    pub drill_id: String,
    pub drill_name: String,
    pub drill_description: String,
    pub knobs: BTreeMap<String, serde_json::Value>,
    pub stage: String,
    pub difficulty: f64,
    pub predicted_success: f64,
    pub predicted_error_rate: f64,
    /// Success probability the difficulty was calibrated toward.
    pub target_success: f64,
    pub repeat_reps: u32,
    pub target_error_rate: ErrorZone,
    pub error_budget: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<DifficultySignal>,
    pub rationale: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct FixStatus {
    #[serde(flatten)]
    pub fix: FixSpec,
    pub resolved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct StageScore {
    pub stage: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub skill: String,
    pub metric: String,
    pub phase: Phase,
    pub stage: String,
    pub drill_id: String,
    pub difficulty: f64,
    pub predicted_success: f64,
    pub target_error_rate: ErrorZone,
    pub actual_error_rate: f64,
    pub attempts_recorded: usize,
    pub calibration: CalibrationMetrics,
    pub mistake_quality: ErrorProfile,
    pub top_error_types: Vec<(String, u32)>,
    pub weakest_stages: Vec<StageScore>,
    pub stage_mastery: BTreeMap<String, f64>,
    pub ready_to_advance: bool,
    pub recommendation: Recommendation,
    pub pending_fix: Option<FixStatus>,
    pub last_transition: Option<TransitionSpec>,
}

/// Drives one skill: records outcomes, keeps the mastery estimates moving and
/// decides what the learner should attempt next.
pub struct MasteryController {
    state: SkillState,
}

impl MasteryController {
    pub fn new(state: SkillState) -> Self {
        Self { state }
    }

    pub fn state(&self) -> &SkillState {
        &self.state
    }

    pub fn into_state(self) -> SkillState {
        self.state
    }

    pub fn record_attempt(&mut self, input: AttemptInput) -> Attempt {
        let drill_id = input
            .drill_id
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .unwrap_or_else(|| self.state.current_drill_id.clone());
        let stage = input
            .failure_point
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.state.current_stage.clone());
        let difficulty = clamp01(input.difficulty.unwrap_or(self.state.difficulty));

        let mut error_types: Vec<String> = Vec::new();
        for tag in input.error_types {
            let tag = tag.trim().to_string();
            if !tag.is_empty() && !error_types.contains(&tag) {
                error_types.push(tag);
            }
        }

        let attempt = Attempt {
            timestamp: Utc::now(),
            phase: input.phase,
            drill_id: drill_id.clone(),
            difficulty,
            prediction: clamp01(input.prediction),
            observed: clamp01(input.observed),
            error_types,
            failure_point: stage.clone(),
            feedback_seconds: input
                .feedback_seconds
                .filter(|s| s.is_finite())
                .map(|s| s.max(0.0)),
            notes: input.notes.filter(|n| !n.trim().is_empty()),
            correction: input.correction.filter(|c| !c.trim().is_empty()),
            clean_rep: input.clean_rep,
        };

        self.state.ensure_drill(&drill_id);
        self.state.ensure_stage(&stage);
        self.state.history.push(attempt.clone());
        self.state.current_drill_id = drill_id;
        self.state.current_stage = stage;
        for tag in &attempt.error_types {
            *self.state.error_counts.entry(tag.clone()).or_insert(0) += 1;
        }

        self.update_fix_progress(&attempt);
        self.update_mastery_models(&attempt);
        self.maybe_advance_failure_point();

        attempt
    }

    pub fn estimate_success_probability(
        &self,
        drill_id: Option<&str>,
        difficulty: Option<f64>,
        stage: Option<&str>,
    ) -> f64 {
        let drill_id = drill_id.unwrap_or(self.state.current_drill_id.as_str());
        let stage = stage.unwrap_or(self.state.current_stage.as_str());
        let difficulty = clamp01(difficulty.unwrap_or(self.state.difficulty));

        let effective = blend_mastery(
            self.state.drill_mastery_or_prior(drill_id, difficulty),
            self.state.stage_mastery_or_prior(stage, difficulty),
        );
        clamp01(success_probability(effective, difficulty))
    }

    /// Stages ranked by recent trouble plus their mastery shortfall.
    pub fn weakest_subskills(&self, recent_n: usize, top_k: usize) -> Vec<(String, f64)> {
        let window = self.state.recent(recent_n);
        let mut scores: Vec<(String, f64)> = Vec::new();

        let last = window.len().saturating_sub(1);
        for (i, attempt) in window.iter().enumerate() {
            let weight = if last == 0 {
                1.0
            } else {
                0.5 + 0.5 * (i as f64 / last as f64)
            };
            let penalty = (1.0 - attempt.observed)
                + 0.35 * f64::from(u8::from(attempt.has_error()))
                + 0.10 * attempt.error_types.len() as f64;
            add_score(&mut scores, &attempt.failure_point, weight * penalty);
        }

        for stage in self.state.ordered_stages() {
            if let Some(mastery) = self.state.stage_mastery.get(&stage) {
                add_score(&mut scores, &stage, (0.70 - mastery).max(0.0));
            }
        }

        scores.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));
        scores.truncate(top_k);
        scores
    }

    pub fn recommend_next_attempt(&self) -> Recommendation {
        match self.state.pending_fix() {
            Some(fix) => self.recommend_prove_fix(fix),
            None => self.recommend_error_hunt(),
        }
    }

    /// Opens a fresh remediation from the recent mistakes, replacing any
    /// pending one.
    pub fn diagnose(&mut self, recent_n: usize) -> FixSpec {
        let window = self.state.recent(recent_n);

        let mut tag_counts: Vec<(String, usize)> = Vec::new();
        let mut stage_counts: Vec<(String, usize)> = Vec::new();
        for attempt in window.iter().filter(|a| a.has_error()) {
            for tag in &attempt.error_types {
                bump(&mut tag_counts, tag);
            }
            bump(&mut stage_counts, &attempt.failure_point);
        }

        let (dominant, dominant_count) =
            most_frequent(&tag_counts).unwrap_or_else(|| (UNLABELED_ERROR.to_string(), 0));
        let failure_moment = most_frequent(&stage_counts)
            .map(|(stage, _)| stage)
            .unwrap_or_else(|| self.state.current_stage.clone());

        let recommendation = self.recommend_next_attempt();
        let signal = self.signal_for_phase(recommendation.phase);
        let required = self.state.plan.consolidate_target_clean_reps.max(2);

        let one_change = match signal {
            DifficultySignal::TooEasy => format!(
                "Add one constraint to {}: tighten a single knob and keep everything else fixed.",
                recommendation.drill_name
            ),
            DifficultySignal::TooHard => format!(
                "Reduce difficulty by 0.10 (to {:.2}) and force exactly one error tag per rep.",
                (self.state.difficulty - 0.10).max(0.0)
            ),
            DifficultySignal::Stretch => format!(
                "Run {} reps at difficulty {:.2} on {}, changing only how you handle {}.",
                required, recommendation.difficulty, failure_moment, dominant
            ),
        };

        let fix = FixSpec {
            trigger: format!(
                "{} appeared {} time(s) in the last {} attempts, mostly at {}",
                dominant,
                dominant_count,
                window.len(),
                failure_moment
            ),
            cue: format!(
                "At {}: stop and check for {}",
                failure_moment,
                dominant.replace('_', " ")
            ),
            one_change,
            dominant_error_type: dominant,
            failure_moment,
            proof_clean_reps: 0,
            required_clean_reps: required,
            created_at: Utc::now(),
        };

        tracing::info!(
            dominant = %fix.dominant_error_type,
            stage = %fix.failure_moment,
            signal = signal.as_str(),
            required = fix.required_clean_reps,
            "fix opened"
        );
        self.state.open_fix = Some(fix.clone());
        fix
    }

    pub fn adjust_difficulty(&mut self) -> f64 {
        let phase = self.state.active_phase();
        let zone = self.state.error_zone(phase);
        let (success_lo, success_hi) = zone.success_zone();
        let window = self.state.recent_range(ADJUST_WINDOW);
        let profile = error_profile(&self.state.history, window.clone(), self.clean_threshold());
        let calibration = CalibrationMetrics::from_attempts(&self.state.history[window]);
        let probability = self.estimate_success_probability(None, None, None);

        let mut step = 0.0;

        if profile.attempts > 0 {
            if profile.error_rate < zone.lo {
                step += 0.08 + ((zone.lo - profile.error_rate) * 0.30).min(0.08);
            } else if profile.error_rate > zone.hi {
                step -= 0.08 + ((profile.error_rate - zone.hi) * 0.30).min(0.08);
            }
        } else if probability > success_hi {
            step += 0.08;
        } else if probability < success_lo {
            step -= 0.08;
        }

        if profile.errors > 0 && profile.noisy_share > self.state.policy.noisy_error_ceiling {
            step -= 0.06;
        } else if profile.errors > 0
            && zone.contains(profile.error_rate)
            && profile.diagnosable_share >= 0.60
        {
            step += 0.02;
        }

        if calibration.overconfident() {
            step -= 0.04;
        } else if calibration.underconfident() {
            step += 0.02;
        }
        if calibration.mean_abs_gap > 0.20 {
            step -= 0.02;
        }

        if probability > success_hi + 0.08 {
            step += 0.04;
        } else if probability < success_lo - 0.08 {
            step -= 0.04;
        }

        let step = step.clamp(-MAX_DIFFICULTY_STEP, MAX_DIFFICULTY_STEP);
        let previous = self.state.difficulty;
        self.state.difficulty = clamp01(previous + step);

        tracing::info!(
            phase = phase.as_str(),
            error_rate = profile.error_rate,
            probability,
            step,
            from = previous,
            to = self.state.difficulty,
            "difficulty adjusted"
        );
        self.state.difficulty
    }

    pub fn status(&self) -> StatusSnapshot {
        let phase = self.state.active_phase();
        let window = self.state.recent_range(STATUS_WINDOW);
        let profile = error_profile(&self.state.history, window.clone(), self.clean_threshold());

        let mut top_error_types: Vec<(String, u32)> = self
            .state
            .error_counts
            .iter()
            .map(|(tag, count)| (tag.clone(), *count))
            .collect();
        top_error_types.sort_by(|a, b| b.1.cmp(&a.1));
        top_error_types.truncate(5);

        StatusSnapshot {
            skill: self.state.skill.clone(),
            metric: self.state.metric.clone(),
            phase,
            stage: self.state.current_stage.clone(),
            drill_id: self.state.current_drill_id.clone(),
            difficulty: round2(self.state.difficulty),
            predicted_success: self.estimate_success_probability(None, None, None),
            target_error_rate: self.state.error_zone(phase),
            actual_error_rate: profile.error_rate,
            attempts_recorded: self.state.history.len(),
            calibration: CalibrationMetrics::from_attempts(&self.state.history[window]),
            mistake_quality: profile,
            top_error_types,
            weakest_stages: self
                .weakest_subskills(WEAKNESS_WINDOW, 3)
                .into_iter()
                .map(|(stage, score)| StageScore { stage, score })
                .collect(),
            stage_mastery: self.state.stage_mastery.clone(),
            ready_to_advance: self.should_switch_failure_point(),
            recommendation: self.recommend_next_attempt(),
            pending_fix: self.state.open_fix.clone().map(|fix| FixStatus {
                resolved: !fix.is_pending(),
                fix,
            }),
            last_transition: self.state.last_transition.clone(),
        }
    }

    pub fn should_switch_failure_point(&self) -> bool {
        if self.state.pending_fix().is_some() {
            return false;
        }

        let window = self.state.recent(ADVANCE_WINDOW);
        if window.len() < ADVANCE_MIN_ATTEMPTS {
            return false;
        }

        let stage = &self.state.current_stage;
        let on_stage: Vec<&Attempt> = window.iter().filter(|a| &a.failure_point == stage).collect();
        if on_stage.len() < ADVANCE_MIN_STAGE_ATTEMPTS {
            return false;
        }

        let errors = on_stage.iter().filter(|a| a.has_error()).count();
        let error_rate = errors as f64 / on_stage.len() as f64;
        let error_floor = ADVANCE_ERROR_FLOOR.max(self.state.plan.consolidate.lo);
        let mastery = self
            .state
            .stage_mastery_or_prior(stage, self.state.difficulty);

        error_rate < error_floor
            && mastery > ADVANCE_MIN_MASTERY
            && self.state.difficulty > ADVANCE_MIN_DIFFICULTY
    }

    fn recommend_prove_fix(&self, fix: &FixSpec) -> Recommendation {
        let phase = Phase::Correction;
        let zone = self.state.error_zone(phase);
        let (lo, hi) = zone.success_zone();
        let target = (lo + PROVE_FIX_ZONE_POSITION * (hi - lo)).min(PROVE_FIX_MAX_TARGET);

        let stage = fix.failure_moment.clone();
        let drill_id = self.drill_for_stage(&stage);
        let difficulty = self.difficulty_for_target(target, &drill_id, &stage);
        let reps = fix.remaining_reps();

        let rationale = format!(
            "Fix for {} at {} is still unproven ({}/{} clean reps). Apply '{}' and bank {} more clean rep(s) near {:.0}% predicted success.",
            fix.dominant_error_type,
            stage,
            fix.proof_clean_reps,
            fix.required_clean_reps,
            fix.one_change,
            reps,
            target * 100.0
        );

        self.build_recommendation(
            RecommendationMode::ProveFix,
            phase,
            drill_id,
            stage,
            difficulty,
            target,
            reps,
            None,
            rationale,
        )
    }

    fn recommend_error_hunt(&self) -> Recommendation {
        let phase = Phase::ErrorHunt;
        let zone = self.state.error_zone(phase);
        let (success_lo, success_hi) = zone.success_zone();
        let window = self.state.recent_range(SIGNAL_WINDOW);
        let profile = error_profile(&self.state.history, window.clone(), self.clean_threshold());
        let calibration = CalibrationMetrics::from_attempts(&self.state.history[window]);
        let probability = self.estimate_success_probability(None, None, None);
        let signal = classify_signal(
            zone,
            &profile,
            probability,
            self.state.policy.noisy_error_ceiling,
        );

        let mut target = (success_lo + success_hi) / 2.0;
        match signal {
            DifficultySignal::TooEasy => target -= TARGET_SIGNAL_NUDGE,
            DifficultySignal::TooHard => target += TARGET_SIGNAL_NUDGE,
            DifficultySignal::Stretch => {}
        }
        if calibration.overconfident() {
            target -= TARGET_BIAS_NUDGE;
        } else if calibration.underconfident() {
            target += TARGET_BIAS_NUDGE;
        }
        let target = target.clamp(0.05, 0.95);

        let focus_current = self.should_focus_current_failure_point();
        let stage = if focus_current {
            self.state.current_stage.clone()
        } else {
            self.weakest_subskills(WEAKNESS_WINDOW, 1)
                .into_iter()
                .next()
                .map(|(stage, _)| stage)
                .unwrap_or_else(|| self.state.current_stage.clone())
        };
        let drill_id = self.drill_for_stage(&stage);
        let difficulty = self.difficulty_for_target(target, &drill_id, &stage);

        let reps = match signal {
            DifficultySignal::TooEasy => 6,
            DifficultySignal::TooHard => 3,
            DifficultySignal::Stretch if profile.errors > 0 && profile.diagnosable_share >= 0.5 => 5,
            DifficultySignal::Stretch => 4,
        };

        let focus_reason = if focus_current {
            "just advanced here, collecting a direct sample"
        } else {
            "weakest recent stage"
        };
        let rationale = format!(
            "Recent window reads {} (error rate {:.0}%, target {:.0}-{:.0}%). Hunting errors at {} ({}), aiming for ~{:.0}% success.",
            signal.as_str(),
            profile.error_rate * 100.0,
            zone.lo * 100.0,
            zone.hi * 100.0,
            stage,
            focus_reason,
            target * 100.0
        );

        self.build_recommendation(
            RecommendationMode::ErrorHunt,
            phase,
            drill_id,
            stage,
            difficulty,
            target,
            reps,
            Some(signal),
            rationale,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build_recommendation(
        &self,
        mode: RecommendationMode,
        phase: Phase,
        drill_id: String,
        stage: String,
        difficulty: f64,
        target_success: f64,
        repeat_reps: u32,
        signal: Option<DifficultySignal>,
        rationale: String,
    ) -> Recommendation {
        let difficulty = round2(difficulty);
        let zone = self.state.error_zone(phase);
        let predicted_success =
            self.estimate_success_probability(Some(&drill_id), Some(difficulty), Some(&stage));
        let (drill_name, drill_description, knobs) = match self.state.drill(&drill_id) {
            Some(drill) => (
                drill.name.clone(),
                drill.description.clone(),
                drill.resolve_knobs(difficulty),
            ),
            None => (drill_id.clone(), String::new(), BTreeMap::new()),
        };

        Recommendation {
            mode,
            phase,
            drill_id,
            drill_name,
            drill_description,
            knobs,
            stage,
            difficulty,
            predicted_success,
            predicted_error_rate: 1.0 - predicted_success,
            target_success,
            repeat_reps,
            target_error_rate: zone,
            error_budget: (zone.hi * f64::from(repeat_reps)).ceil() as u32,
            signal,
            rationale,
        }
    }

    /// Least-mastered drill focused on `stage`, else the least-mastered drill
    /// overall, else the current drill.
    fn drill_for_stage(&self, stage: &str) -> String {
        let difficulty = self.state.difficulty;
        let by_mastery = |a: &&Drill, b: &&Drill| {
            self.state
                .drill_mastery_or_prior(&a.id, difficulty)
                .partial_cmp(&self.state.drill_mastery_or_prior(&b.id, difficulty))
                .unwrap_or(Ordering::Equal)
        };

        self.state
            .drills
            .iter()
            .filter(|d| self.state.drill_focus.get(&d.id).map(String::as_str) == Some(stage))
            .min_by(by_mastery)
            .or_else(|| self.state.drills.iter().min_by(by_mastery))
            .map(|d| d.id.clone())
            .unwrap_or_else(|| self.state.current_drill_id.clone())
    }

    fn difficulty_for_target(&self, target: f64, drill_id: &str, stage: &str) -> f64 {
        calibrate_difficulty(target, |d| {
            self.estimate_success_probability(Some(drill_id), Some(d), Some(stage))
        })
    }

    fn signal_for_phase(&self, phase: Phase) -> DifficultySignal {
        let zone = self.state.error_zone(phase);
        let profile = error_profile(
            &self.state.history,
            self.state.recent_range(SIGNAL_WINDOW),
            self.clean_threshold(),
        );
        let probability = self.estimate_success_probability(None, None, None);
        classify_signal(
            zone,
            &profile,
            probability,
            self.state.policy.noisy_error_ceiling,
        )
    }

    /// After a stage transition, hold focus on the new stage until it has a
    /// few direct attempts.
    fn should_focus_current_failure_point(&self) -> bool {
        let Some(transition) = &self.state.last_transition else {
            return false;
        };
        if transition.to_stage != self.state.current_stage {
            return false;
        }
        let since = self
            .state
            .history
            .iter()
            .skip(transition.at_attempt)
            .filter(|a| a.failure_point == transition.to_stage)
            .count();
        since < STAY_ON_STAGE_ATTEMPTS
    }

    fn clean_threshold(&self) -> f64 {
        CLEAN_QUALITY_FLOOR.max(self.state.policy.sanitized().target_success_zone.0)
    }

    fn update_fix_progress(&mut self, attempt: &Attempt) {
        let (phase_success_lo, _) = self.state.error_zone(attempt.phase).success_zone();
        let threshold = CLEAN_QUALITY_FLOOR.max(phase_success_lo);

        let Some(fix) = self.state.open_fix.as_mut() else {
            return;
        };
        if !fix.is_pending() || attempt.failure_point != fix.failure_moment {
            return;
        }

        if attempt.has_error() {
            let relevant = fix.dominant_error_type == UNLABELED_ERROR
                || attempt.error_types.iter().any(|t| *t == fix.dominant_error_type);
            if relevant {
                fix.proof_clean_reps = 0;
            }
        } else if attempt.observed >= threshold {
            fix.proof_clean_reps += 1;
        } else {
            fix.proof_clean_reps = 0;
        }

        tracing::debug!(
            dominant = %fix.dominant_error_type,
            proof = fix.proof_clean_reps,
            required = fix.required_clean_reps,
            "fix progress"
        );
    }

    fn update_mastery_models(&mut self, attempt: &Attempt) {
        let Some(index) = self.state.history.len().checked_sub(1) else {
            return;
        };
        let latency_weight = self.state.policy.latency_weight(attempt.feedback_seconds);
        let quality = mistake_quality(&self.state.history, index, self.clean_threshold());

        let mut multiplier = if !attempt.has_error() {
            1.0
        } else if quality.diagnosable {
            DIAGNOSABLE_MULTIPLIER
        } else {
            NOISY_MULTIPLIER
        };
        if attempt.prediction_gap().abs() > GAP_DAMPING_THRESHOLD {
            multiplier *= GAP_DAMPING;
        }
        let alpha =
            (BASE_LEARNING_RATE * latency_weight * multiplier).clamp(MIN_LEARNING_RATE, MAX_LEARNING_RATE);

        let stage_target = if attempt.has_error() {
            let penalty = if quality.diagnosable {
                DIAGNOSABLE_PENALTY
            } else {
                NOISY_PENALTY
            };
            let mut target = attempt.observed - penalty;
            if attempt.prediction - attempt.observed > OVERCONFIDENCE_GAP {
                target -= OVERCONFIDENCE_PENALTY;
            }
            target.max(0.0)
        } else {
            let bonus = if attempt.clean_rep {
                PROOF_REP_BONUS
            } else {
                CLEAN_BONUS
            };
            (attempt.observed + bonus).min(1.0)
        };

        let old_drill = self
            .state
            .drill_mastery_or_prior(&attempt.drill_id, attempt.difficulty);
        let old_stage = self
            .state
            .stage_mastery_or_prior(&attempt.failure_point, attempt.difficulty);
        let new_drill = clamp01(old_drill + alpha * (attempt.observed - old_drill));
        let new_stage = clamp01(old_stage + alpha * (stage_target - old_stage));

        self.state
            .drill_mastery
            .insert(attempt.drill_id.clone(), new_drill);
        self.state
            .stage_mastery
            .insert(attempt.failure_point.clone(), new_stage);

        tracing::debug!(
            drill = %attempt.drill_id,
            stage = %attempt.failure_point,
            alpha,
            drill_mastery = new_drill,
            stage_mastery = new_stage,
            diagnosable = quality.diagnosable,
            "mastery updated"
        );
    }

    fn maybe_advance_failure_point(&mut self) -> Option<TransitionSpec> {
        if !self.should_switch_failure_point() {
            return None;
        }

        let ordered = self.state.ordered_stages();
        let position = ordered
            .iter()
            .position(|s| *s == self.state.current_stage)?;
        let next_stage = ordered.get(position + 1)?.clone();

        let drill_id = self.drill_for_stage(&next_stage);
        let entry_difficulty =
            self.difficulty_for_target(ENTRY_SUCCESS_TARGET, &drill_id, &next_stage);

        let transition = TransitionSpec {
            from_stage: self.state.current_stage.clone(),
            to_stage: next_stage.clone(),
            drill_id: drill_id.clone(),
            reason: format!(
                "{} stable: error rate under floor, mastery {:.2}, difficulty {:.2}",
                self.state.current_stage,
                self.state
                    .stage_mastery_or_prior(&self.state.current_stage, self.state.difficulty),
                self.state.difficulty
            ),
            timestamp: Utc::now(),
            at_attempt: self.state.history.len(),
        };

        self.state.ensure_stage(&next_stage);
        self.state.current_stage = next_stage;
        self.state.current_drill_id = drill_id;
        self.state.difficulty = self.state.difficulty.min(entry_difficulty);
        self.state.open_fix = None;
        self.state.last_transition = Some(transition.clone());

        tracing::info!(
            from = %transition.from_stage,
            to = %transition.to_stage,
            drill = %transition.drill_id,
            difficulty = self.state.difficulty,
            "advanced to next stage"
        );
        Some(transition)
    }
}

fn add_score(scores: &mut Vec<(String, f64)>, stage: &str, amount: f64) {
    match scores.iter_mut().find(|(s, _)| s == stage) {
        Some((_, score)) => *score += amount,
        None => scores.push((stage.to_string(), amount)),
    }
}

fn bump(counts: &mut Vec<(String, usize)>, key: &str) {
    match counts.iter_mut().find(|(k, _)| k == key) {
        Some((_, count)) => *count += 1,
        None => counts.push((key.to_string(), 1)),
    }
}

/// Highest count, earliest-seen on ties.
fn most_frequent(counts: &[(String, usize)]) -> Option<(String, usize)> {
    let mut best: Option<&(String, usize)> = None;
    for entry in counts {
        if best.map_or(true, |b| entry.1 > b.1) {
            best = Some(entry);
        }
    }
    best.cloned()
}
