//! Skill rating and lobby quality

pub mod evaluator;
pub mod glicko2;

pub use evaluator::LobbyQualityEvaluator;
pub use glicko2::{update, MatchOutcome, Rating};
