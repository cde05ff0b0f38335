use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;

use crate::config::Config;
use crate::mastery::{AttemptInput, JsonStateStore, MasteryController, Phase};

#[derive(Parser, Debug)]
#[command(name = "practice")]
#[command(about = "Deliberate-practice coach: diagnose, fix, prove, advance", long_about = None)]
pub struct Cli {
    /// Skill state file (overrides PRACTICE_STATE_PATH)
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a fresh skill state
    Init {
        #[arg(long)]
        force: bool,
    },
    /// Show the current snapshot
    Status,
    /// Suggest the next attempt
    Recommend,
    /// Record one attempt
    Record(RecordArgs),
    /// Open a fix from recent mistakes
    Diagnose {
        #[arg(long, default_value_t = 10)]
        recent: usize,
    },
    /// Move global difficulty toward the edge of competence
    Adjust,
    /// List drills with knobs resolved at the current difficulty
    Drills,
    /// Rank stages by recent weakness
    Weakest {
        #[arg(long, default_value_t = 30)]
        recent: usize,
        #[arg(long, default_value_t = 3)]
        top: usize,
    },
}

#[derive(clap::Args, Debug)]
pub struct RecordArgs {
    #[arg(long, value_parser = parse_phase)]
    pub phase: Phase,
    /// Expected quality before feedback, 0..1
    #[arg(long)]
    pub prediction: f64,
    /// Quality after feedback, 0..1
    #[arg(long)]
    pub observed: f64,
    #[arg(long = "error-type", value_delimiter = ',')]
    pub error_types: Vec<String>,
    #[arg(long)]
    pub failure_point: Option<String>,
    #[arg(long)]
    pub feedback_seconds: Option<f64>,
    #[arg(long)]
    pub drill: Option<String>,
    #[arg(long)]
    pub difficulty: Option<f64>,
    #[arg(long)]
    pub notes: Option<String>,
    #[arg(long)]
    pub correction: Option<String>,
    #[arg(long)]
    pub clean_rep: bool,
    /// Adjust difficulty after recording
    #[arg(long)]
    pub adjust: bool,
    /// Diagnose after recording
    #[arg(long)]
    pub diagnose: bool,
}

impl From<RecordArgs> for AttemptInput {
    fn from(args: RecordArgs) -> Self {
        AttemptInput {
            phase: args.phase,
            prediction: args.prediction,
            observed: args.observed,
            error_types: args.error_types,
            drill_id: args.drill,
            difficulty: args.difficulty,
            failure_point: args.failure_point,
            feedback_seconds: args.feedback_seconds,
            notes: args.notes,
            correction: args.correction,
            clean_rep: args.clean_rep,
        }
    }
}

fn parse_phase(value: &str) -> Result<Phase, String> {
    Phase::parse(value).ok_or_else(|| {
        format!("unknown phase '{value}' (expected warmup, error_hunt, correction or consolidate)")
    })
}

/// Runs one command against the state file and returns its JSON output.
pub fn run(cli: Cli, config: &Config) -> Result<serde_json::Value> {
    let config = config.clone().with_state_path(cli.state);
    let store = JsonStateStore::new(&config.state_path);
    let _lock = store
        .lock()
        .with_context(|| format!("failed to lock {}", store.path().display()))?;
    let open = || -> Result<MasteryController> {
        let state = store
            .load_or_init()
            .with_context(|| format!("failed to load {}", store.path().display()))?;
        Ok(MasteryController::new(state))
    };

    let (output, changed) = match cli.command {
        Commands::Init { force } => {
            let state = store.init(force)?;
            tracing::info!(path = %store.path().display(), "skill state initialised");
            let output = json!({
                "initialized": store.path().display().to_string(),
                "skill": state.skill,
                "stage": state.current_stage,
                "drill": state.current_drill_id,
                "difficulty": state.difficulty,
            });
            return Ok(output);
        }
        Commands::Status => {
            let controller = open()?;
            (serde_json::to_value(controller.status())?, None)
        }
        Commands::Recommend => {
            let controller = open()?;
            (serde_json::to_value(controller.recommend_next_attempt())?, None)
        }
        Commands::Record(args) => {
            let mut controller = open()?;
            let adjust = args.adjust;
            let diagnose = args.diagnose;
            let attempt = controller.record_attempt(args.into());
            let mut output = json!({ "attempt": attempt });
            if adjust {
                output["difficulty"] = json!(controller.adjust_difficulty());
            }
            if diagnose {
                output["fix"] = serde_json::to_value(controller.diagnose(10))?;
            }
            output["recommendation"] = serde_json::to_value(controller.recommend_next_attempt())?;
            (output, Some(controller))
        }
        Commands::Diagnose { recent } => {
            let mut controller = open()?;
            let fix = controller.diagnose(recent);
            (serde_json::to_value(fix)?, Some(controller))
        }
        Commands::Adjust => {
            let mut controller = open()?;
            let previous = controller.state().difficulty;
            let difficulty = controller.adjust_difficulty();
            (
                json!({ "previous_difficulty": previous, "difficulty": difficulty }),
                Some(controller),
            )
        }
        Commands::Drills => {
            let controller = open()?;
            let state = controller.state();
            let drills: Vec<serde_json::Value> = state
                .drills
                .iter()
                .map(|drill| {
                    json!({
                        "id": drill.id,
                        "name": drill.name,
                        "description": drill.description,
                        "focus": state.drill_focus.get(&drill.id),
                        "mastery": state.drill_mastery.get(&drill.id),
                        "knobs": drill.resolve_knobs(state.difficulty),
                    })
                })
                .collect();
            (json!({ "difficulty": state.difficulty, "drills": drills }), None)
        }
        Commands::Weakest { recent, top } => {
            let controller = open()?;
            let ranked: Vec<serde_json::Value> = controller
                .weakest_subskills(recent, top)
                .into_iter()
                .map(|(stage, score)| json!({ "stage": stage, "score": score }))
                .collect();
            (json!(ranked), None)
        }
    };

    if let Some(controller) = changed {
        store
            .save(controller.state())
            .with_context(|| format!("failed to save {}", store.path().display()))?;
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_for(dir: &tempfile::TempDir) -> Config {
        Config {
            state_path: dir.path().join("state.json"),
            log_level: "warn".into(),
            file_logs: false,
            log_dir: dir.path().join("logs"),
        }
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("practice").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_record_parses_comma_separated_tags() {
        let cli = parse(&[
            "record",
            "--phase",
            "error-hunt",
            "--prediction",
            "0.7",
            "--observed",
            "0.5",
            "--error-type",
            "a,b",
            "--error-type",
            "c",
        ]);
        match cli.command {
            Commands::Record(args) => {
                assert_eq!(args.phase, Phase::ErrorHunt);
                assert_eq!(args.error_types, vec!["a", "b", "c"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unknown_phase_is_rejected() {
        let result = Cli::try_parse_from([
            "practice",
            "record",
            "--phase",
            "sprint",
            "--prediction",
            "0.5",
            "--observed",
            "0.5",
        ]);
        assert!(result.is_err());
    }

    #[test]
    fn test_record_then_status_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir);

        let output = run(
            parse(&[
                "record",
                "--phase",
                "error_hunt",
                "--prediction",
                "0.7",
                "--observed",
                "0.52",
                "--error-type",
                "shallow_formalization",
                "--diagnose",
            ]),
            &config,
        )
        .unwrap();
        assert_eq!(output["fix"]["dominant_error_type"], "shallow_formalization");

        let status = run(parse(&["status"]), &config).unwrap();
        assert_eq!(status["attempts_recorded"], 1);
        assert_eq!(status["pending_fix"]["resolved"], false);
        assert_eq!(status["recommendation"]["mode"], "prove_fix");
    }

    #[test]
    fn test_init_without_force_fails_when_present() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_for(&dir);
        run(parse(&["init"]), &config).unwrap();
        assert!(run(parse(&["init"]), &config).is_err());
        assert!(run(parse(&["init", "--force"]), &config).is_ok());
    }
}
