//! Matchmaking queues and lobby promotion

pub mod queue;
pub mod service;

pub use queue::{QueueError, QueuedPlayer};
pub use service::{MatchResultError, MatchmakingService};
