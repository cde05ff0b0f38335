pub mod cli;
pub mod config;
pub mod logging;
pub mod mastery;

pub use mastery::{AttemptInput, MasteryController, SkillState};
