//! End-to-end behaviour of the mastery controller on a single skill.

use deliberate_practice::mastery::engine::{AttemptInput, MasteryController};
use deliberate_practice::mastery::modeling::sigmoid;
use deliberate_practice::mastery::state::SkillState;
use deliberate_practice::mastery::types::{Phase, RecommendationMode};

fn clean(phase: Phase, observed: f64) -> AttemptInput {
    AttemptInput::new(phase, observed, observed).with_feedback_seconds(60.0)
}

fn failed(tag: &str, prediction: f64, observed: f64) -> AttemptInput {
    AttemptInput::new(Phase::ErrorHunt, prediction, observed).with_errors([tag])
}

// ============================================================================
// Scenarios
// ============================================================================

#[test]
fn scenario_a_fresh_state_success_estimate() {
    let controller = MasteryController::new(SkillState::default());
    assert_eq!(controller.state().difficulty, 0.35);
    assert_eq!(controller.state().current_stage, "formalize_problem");

    let p = controller.estimate_success_probability(None, None, None);
    let expected = sigmoid(6.0 * (0.55 - 0.35));
    assert!((p - expected).abs() < 1e-9, "p={p}, expected={expected}");
    assert!(p > 0.70 && p < 0.85);
}

#[test]
fn scenario_b_clean_reps_raise_stage_mastery() {
    let mut controller = MasteryController::new(SkillState::default());
    let stage = controller.state().current_stage.clone();
    let mut previous = controller.state().stage_mastery[&stage];

    for _ in 0..5 {
        controller.record_attempt(clean(Phase::ErrorHunt, 0.9));
        let current = controller.state().stage_mastery[&stage];
        assert!(current > previous, "{current} <= {previous}");
        assert!(current <= 1.0);
        previous = current;
    }
}

#[test]
fn scenario_c_diagnose_picks_dominant_error() {
    let mut controller = MasteryController::new(SkillState::default());
    controller.record_attempt(failed("shallow_formalization", 0.70, 0.52));

    let fix = controller.diagnose(10);
    assert_eq!(fix.dominant_error_type, "shallow_formalization");
    assert_eq!(fix.failure_moment, "formalize_problem");
    assert_eq!(fix.proof_clean_reps, 0);
    assert!(fix.required_clean_reps >= 2);
    assert!(!fix.one_change.is_empty());
}

#[test]
fn scenario_d_relevant_error_resets_proof() {
    let mut state = SkillState::default();
    state.plan.consolidate_target_clean_reps = 3;
    let mut controller = MasteryController::new(state);

    controller.record_attempt(failed("shallow_formalization", 0.70, 0.52));
    let fix = controller.diagnose(10);
    assert_eq!(fix.required_clean_reps, 3);

    controller.record_attempt(clean(Phase::Correction, 0.9).as_proof_rep());
    controller.record_attempt(clean(Phase::Correction, 0.9).as_proof_rep());
    assert_eq!(controller.state().open_fix.as_ref().unwrap().proof_clean_reps, 2);

    controller.record_attempt(failed("shallow_formalization", 0.8, 0.6));
    assert_eq!(controller.state().open_fix.as_ref().unwrap().proof_clean_reps, 0);
}

#[test]
fn scenario_e_low_error_rate_raises_difficulty() {
    let mut controller = MasteryController::new(SkillState::default());
    for _ in 0..6 {
        controller.record_attempt(clean(Phase::ErrorHunt, 0.9));
    }
    let before = controller.state().difficulty;
    let after = controller.adjust_difficulty();
    assert!(after > before);
    assert!(after <= before + 0.20 + 1e-12);
    assert_eq!(controller.state().difficulty, after);
}

// ============================================================================
// Fix lifecycle
// ============================================================================

#[test]
fn proof_reps_resolve_fix_and_switch_mode_back() {
    let mut controller = MasteryController::new(SkillState::default());
    controller.record_attempt(failed("shallow_formalization", 0.7, 0.5));
    let fix = controller.diagnose(10);

    let recommendation = controller.recommend_next_attempt();
    assert_eq!(recommendation.mode, RecommendationMode::ProveFix);
    assert_eq!(recommendation.phase, Phase::Correction);
    assert_eq!(recommendation.stage, fix.failure_moment);
    assert_eq!(recommendation.repeat_reps, fix.required_clean_reps);

    for _ in 0..fix.required_clean_reps {
        controller.record_attempt(clean(Phase::Correction, 0.92).as_proof_rep());
    }
    let open = controller.state().open_fix.as_ref().unwrap();
    assert_eq!(open.proof_clean_reps, open.required_clean_reps);
    assert!(!open.is_pending());

    // further reps never push the counter past the requirement
    controller.record_attempt(clean(Phase::Correction, 0.92));
    let open = controller.state().open_fix.as_ref().unwrap();
    assert_eq!(open.proof_clean_reps, open.required_clean_reps);

    let status = controller.status();
    assert!(status.pending_fix.unwrap().resolved);
    assert_eq!(status.recommendation.mode, RecommendationMode::ErrorHunt);
}

#[test]
fn diagnose_replaces_pending_fix() {
    let mut controller = MasteryController::new(SkillState::default());
    controller.record_attempt(failed("shallow_formalization", 0.7, 0.5));
    controller.diagnose(10);
    controller.record_attempt(clean(Phase::Correction, 0.9));
    assert_eq!(controller.state().open_fix.as_ref().unwrap().proof_clean_reps, 1);

    for _ in 0..3 {
        controller.record_attempt(failed("missed_constraint", 0.7, 0.5).on_stage("verify"));
    }
    let fix = controller.diagnose(3);
    assert_eq!(fix.dominant_error_type, "missed_constraint");
    assert_eq!(fix.failure_moment, "verify");
    assert_eq!(fix.proof_clean_reps, 0);
}

#[test]
fn diagnose_without_errors_uses_fallbacks() {
    let mut controller = MasteryController::new(SkillState::default());
    let fix = controller.diagnose(10);
    assert_eq!(fix.dominant_error_type, "unlabeled_error");
    assert_eq!(fix.failure_moment, "formalize_problem");
}

// ============================================================================
// Recording
// ============================================================================

#[test]
fn record_then_status_reflects_attempt() {
    let mut controller = MasteryController::new(SkillState::default());
    controller.record_attempt(failed("off_by_one", 0.6, 0.5).on_stage("implement"));
    let before = controller.state().error_counts.clone();

    let attempt = controller.record_attempt(
        AttemptInput::new(Phase::ErrorHunt, 0.8, 0.4)
            .with_errors(["off_by_one", "wrong_invariant"])
            .on_stage("implement")
            .on_drill("timed_implementation"),
    );

    let status = controller.status();
    assert_eq!(status.attempts_recorded, 2);
    let last = controller.state().history.last().unwrap();
    assert_eq!(last.error_types, attempt.error_types);
    assert_eq!(last.failure_point, "implement");
    assert_eq!(status.stage, "implement");
    assert_eq!(status.drill_id, "timed_implementation");

    for tag in &attempt.error_types {
        let old = before.get(tag).copied().unwrap_or(0);
        assert_eq!(controller.state().error_counts[tag], old + 1);
    }
}

#[test]
fn out_of_range_inputs_are_clamped() {
    let mut controller = MasteryController::new(SkillState::default());
    let attempt = controller.record_attempt(
        AttemptInput::new(Phase::Warmup, 1.7, -0.3).at_difficulty(4.0),
    );
    assert_eq!(attempt.prediction, 1.0);
    assert_eq!(attempt.observed, 0.0);
    assert_eq!(attempt.difficulty, 1.0);
    assert!(!attempt.has_error());
}

#[test]
fn novel_stage_and_drill_are_registered() {
    let mut controller = MasteryController::new(SkillState::default());
    controller.record_attempt(
        clean(Phase::Warmup, 0.8)
            .on_stage("read_statement")
            .on_drill("speed_reading"),
    );
    let state = controller.state();
    assert!(state.pipeline.iter().any(|s| s == "read_statement"));
    assert!(state.drill("speed_reading").is_some());
    assert_eq!(state.current_stage, "read_statement");
}

// ============================================================================
// Reads
// ============================================================================

#[test]
fn empty_history_reads_are_well_defined() {
    let controller = MasteryController::new(SkillState::default());

    let weakest = controller.weakest_subskills(30, 3);
    assert_eq!(weakest.len(), 3);
    assert_eq!(weakest[0].0, "formalize_problem");

    let recommendation = controller.recommend_next_attempt();
    assert_eq!(recommendation.mode, RecommendationMode::ErrorHunt);
    assert_eq!(recommendation.stage, "formalize_problem");
    assert!((0.0..=1.0).contains(&recommendation.difficulty));
    assert!(!recommendation.knobs.is_empty());

    let status = controller.status();
    assert_eq!(status.attempts_recorded, 0);
    assert_eq!(status.actual_error_rate, 0.0);
    assert!(status.pending_fix.is_none());
    assert!(status.last_transition.is_none());
}

#[test]
fn weakest_subskills_follows_recent_trouble() {
    let mut controller = MasteryController::new(SkillState::default());
    for _ in 0..4 {
        controller.record_attempt(failed("missed_edge_case", 0.7, 0.3).on_stage("verify"));
        controller.record_attempt(clean(Phase::ErrorHunt, 0.9).on_stage("implement"));
    }
    let weakest = controller.weakest_subskills(30, 2);
    assert_eq!(weakest[0].0, "verify");
    assert!(weakest[0].1 > weakest[1].1);
}

#[test]
fn reads_are_idempotent() {
    let mut controller = MasteryController::new(SkillState::default());
    controller.record_attempt(failed("shallow_formalization", 0.7, 0.5));
    controller.record_attempt(clean(Phase::ErrorHunt, 0.85));

    let p1 = controller.estimate_success_probability(None, None, None);
    let p2 = controller.estimate_success_probability(None, None, None);
    assert_eq!(p1, p2);
    assert_eq!(
        controller.weakest_subskills(30, 3),
        controller.weakest_subskills(30, 3)
    );
    let r1 = controller.recommend_next_attempt();
    let r2 = controller.recommend_next_attempt();
    assert_eq!(r1.difficulty, r2.difficulty);
    assert_eq!(r1.stage, r2.stage);
}

#[test]
fn recommendation_lands_near_target_zone() {
    let controller = MasteryController::new(SkillState::default());
    let recommendation = controller.recommend_next_attempt();
    let (lo, hi) = recommendation.target_error_rate.success_zone();
    assert!(recommendation.predicted_success > lo - 0.1);
    assert!(recommendation.predicted_success < hi + 0.1);
    assert!(
        (recommendation.predicted_error_rate + recommendation.predicted_success - 1.0).abs() < 1e-12
    );
}

// ============================================================================
// Difficulty adjustment
// ============================================================================

#[test]
fn noisy_errors_lower_difficulty() {
    let mut state = SkillState::default();
    state.difficulty = 0.6;
    let mut controller = MasteryController::new(state);
    for i in 0..8 {
        controller.record_attempt(
            AttemptInput::new(Phase::ErrorHunt, 0.8, 0.2)
                .with_errors([format!("mess_{i}"), "panic".to_string(), "timeout".to_string()]),
        );
    }
    let before = controller.state().difficulty;
    let after = controller.adjust_difficulty();
    assert!(after < before);
    assert!(after >= before - 0.20 - 1e-12);
}

#[test]
fn adjust_on_empty_history_stays_bounded() {
    let mut controller = MasteryController::new(SkillState::default());
    let before = controller.state().difficulty;
    let after = controller.adjust_difficulty();
    assert!((0.0..=1.0).contains(&after));
    assert!((after - before).abs() <= 0.20 + 1e-12);
}
