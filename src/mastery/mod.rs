pub mod config;
pub mod engine;
pub mod modeling;
pub mod persistence;
pub mod state;
pub mod types;

pub use config::{EdgePolicy, PhasePlan};
pub use engine::{AttemptInput, MasteryController, Recommendation, StatusSnapshot};
pub use persistence::{JsonStateStore, StoreError};
pub use state::SkillState;
pub use types::*;
