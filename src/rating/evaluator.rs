//! Lobby quality evaluation over candidate groups of ratings

use crate::ws::protocol::GameMode;

use super::glicko2::{match_quality, Rating};

/// Largest population standard deviation of ratings allowed in one lobby
pub const MAX_SKILL_SPREAD: f64 = 600.0;
/// Largest per-player rating deviation allowed in one lobby
pub const MAX_PLAYER_DEVIATION: f64 = 350.0;
/// Quality a valid lobby needs before it is match-ready
pub const MATCH_READY_QUALITY: f64 = 0.6;
/// Half-width of the acceptable rating window when filling a lobby one player at a time
pub const JOIN_RATING_WINDOW: f64 = 300.0;

/// Outcome of evaluating a candidate group
#[derive(Debug, Clone, PartialEq)]
pub struct LobbyEvaluation {
    pub quality: f64,
    pub skill_spread: f64,
    pub valid: bool,
    pub reason: Option<String>,
}

impl LobbyEvaluation {
    fn rejected(skill_spread: f64, reason: String) -> Self {
        Self {
            quality: 0.0,
            skill_spread,
            valid: false,
            reason: Some(reason),
        }
    }

    /// Valid and at or above the general quality bar
    pub fn is_match_ready(&self) -> bool {
        self.valid && self.quality >= MATCH_READY_QUALITY
    }
}

/// Rules for forming acceptable lobbies
pub struct LobbyQualityEvaluator;

impl LobbyQualityEvaluator {
    /// Evaluate a full candidate group for `mode`.
    ///
    /// Rules are checked in order and the first failure is reported:
    /// player count, skill spread, then per-player deviation.
    pub fn evaluate(players: &[Rating], mode: GameMode) -> LobbyEvaluation {
        let required = mode.required_players();
        let skill_spread = skill_spread(players);

        if players.len() != required {
            return LobbyEvaluation::rejected(
                skill_spread,
                format!(
                    "{} requires {} players, got {}",
                    mode.as_str(),
                    required,
                    players.len()
                ),
            );
        }

        if skill_spread > MAX_SKILL_SPREAD {
            return LobbyEvaluation::rejected(
                skill_spread,
                format!(
                    "skill spread {:.1} exceeds {:.0}",
                    skill_spread, MAX_SKILL_SPREAD
                ),
            );
        }

        if let Some(uncertain) = players.iter().find(|p| p.deviation > MAX_PLAYER_DEVIATION) {
            return LobbyEvaluation::rejected(
                skill_spread,
                format!(
                    "rating deviation {:.1} exceeds {:.0}",
                    uncertain.deviation, MAX_PLAYER_DEVIATION
                ),
            );
        }

        let mut total = 0.0;
        let mut pairs = 0usize;
        for (i, a) in players.iter().enumerate() {
            for b in &players[i + 1..] {
                total += match_quality(a, b);
                pairs += 1;
            }
        }

        LobbyEvaluation {
            quality: if pairs == 0 { 0.0 } else { total / pairs as f64 },
            skill_spread,
            valid: true,
            reason: None,
        }
    }

    /// Acceptable rating window for the next player joining `group`.
    /// `None` when the group is empty and anyone may start it.
    pub fn valid_rating_range(group: &[Rating]) -> Option<(f64, f64)> {
        if group.is_empty() {
            return None;
        }
        let avg = average_rating(group);
        Some((avg - JOIN_RATING_WINDOW, avg + JOIN_RATING_WINDOW))
    }

    /// Whether `candidate` may be added to a partially filled `group`
    pub fn can_player_join(group: &[Rating], candidate: &Rating, mode: GameMode) -> bool {
        if group.len() >= mode.required_players() {
            return false;
        }
        match Self::valid_rating_range(group) {
            None => true,
            Some((low, high)) => (low..=high).contains(&candidate.rating),
        }
    }
}

fn average_rating(players: &[Rating]) -> f64 {
    players.iter().map(|p| p.rating).sum::<f64>() / players.len() as f64
}

/// Population standard deviation of the ratings
fn skill_spread(players: &[Rating]) -> f64 {
    if players.is_empty() {
        return 0.0;
    }
    let mean = average_rating(players);
    let variance = players
        .iter()
        .map(|p| (p.rating - mean).powi(2))
        .sum::<f64>()
        / players.len() as f64;
    variance.sqrt()
}
