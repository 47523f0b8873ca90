//! Matchmaking queue implementation

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::rating::{LobbyQualityEvaluator, Rating};
use crate::ws::protocol::GameMode;

/// Duels need a better fit than the general match-ready threshold
pub const DUEL_PROMOTION_QUALITY: f64 = 0.7;

/// Player in the matchmaking queue
#[derive(Debug, Clone)]
pub struct QueuedPlayer {
    /// Session token
    pub player_id: u64,
    pub account_id: Option<u64>,
    /// Rating snapshot taken at enqueue time
    pub rating: Rating,
    pub mode: GameMode,
    pub enqueued_at: Instant,
}

impl QueuedPlayer {
    pub fn new(player_id: u64, account_id: Option<u64>, rating: Rating, mode: GameMode) -> Self {
        Self {
            player_id,
            account_id,
            rating,
            mode,
            enqueued_at: Instant::now(),
        }
    }

    /// How long this player has been waiting
    pub fn wait_time(&self) -> Duration {
        self.enqueued_at.elapsed()
    }
}

/// Players removed from the queue together
#[derive(Debug, Clone)]
pub struct PromotedGroup {
    pub mode: GameMode,
    pub players: Vec<QueuedPlayer>,
    pub quality: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("Player is already queued")]
    AlreadyQueued,

    #[error("Player is already in a match")]
    InMatch,
}

/// FIFO queues per game mode
#[derive(Debug, Default)]
pub struct MatchmakingQueue {
    duel: VecDeque<QueuedPlayer>,
    arena: VecDeque<QueuedPlayer>,
}

impl MatchmakingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lane(&self, mode: GameMode) -> &VecDeque<QueuedPlayer> {
        match mode {
            GameMode::Duel => &self.duel,
            GameMode::Arena => &self.arena,
        }
    }

    fn lane_mut(&mut self, mode: GameMode) -> &mut VecDeque<QueuedPlayer> {
        match mode {
            GameMode::Duel => &mut self.duel,
            GameMode::Arena => &mut self.arena,
        }
    }

    /// Add a player to the back of their mode's queue.
    /// A player may wait in only one queue at a time.
    pub fn enqueue(&mut self, player: QueuedPlayer) -> Result<(), QueueError> {
        if self.contains(player.player_id) {
            return Err(QueueError::AlreadyQueued);
        }
        self.lane_mut(player.mode).push_back(player);
        Ok(())
    }

    /// Remove a player from whichever queue holds them. No-op if absent.
    pub fn dequeue(&mut self, player_id: u64) -> Option<QueuedPlayer> {
        for lane in [&mut self.duel, &mut self.arena] {
            if let Some(pos) = lane.iter().position(|p| p.player_id == player_id) {
                return lane.remove(pos);
            }
        }
        None
    }

    pub fn contains(&self, player_id: u64) -> bool {
        self.duel
            .iter()
            .chain(self.arena.iter())
            .any(|p| p.player_id == player_id)
    }

    pub fn len(&self, mode: GameMode) -> usize {
        self.lane(mode).len()
    }

    pub fn total_len(&self) -> usize {
        self.duel.len() + self.arena.len()
    }

    /// First acceptable pair in queue order. Scanning i < j from the front
    /// means the oldest qualifying pair is promoted.
    pub fn try_promote_duel(&mut self) -> Option<PromotedGroup> {
        let mut found = None;
        'scan: for i in 0..self.duel.len() {
            for j in (i + 1)..self.duel.len() {
                let pair = [self.duel[i].rating, self.duel[j].rating];
                let evaluation = LobbyQualityEvaluator::evaluate(&pair, GameMode::Duel);
                if evaluation.valid && evaluation.quality >= DUEL_PROMOTION_QUALITY {
                    found = Some((i, j, evaluation.quality));
                    break 'scan;
                }
            }
        }

        let (i, j, quality) = found?;
        // Remove the later index first so the earlier one stays valid
        let second = self.duel.remove(j)?;
        let first = self.duel.remove(i)?;
        Some(PromotedGroup {
            mode: GameMode::Duel,
            players: vec![first, second],
            quality,
        })
    }

    /// First window of consecutive arena entries that is match-ready
    pub fn try_promote_arena(&mut self) -> Option<PromotedGroup> {
        let size = GameMode::Arena.required_players();
        if self.arena.len() < size {
            return None;
        }

        let (start, quality) = (0..=self.arena.len() - size).find_map(|start| {
            let window: Vec<Rating> = self.arena.range(start..start + size).map(|p| p.rating).collect();
            let evaluation = LobbyQualityEvaluator::evaluate(&window, GameMode::Arena);
            evaluation.is_match_ready().then_some((start, evaluation.quality))
        })?;

        let players: Vec<QueuedPlayer> = self.arena.drain(start..start + size).collect();
        Some(PromotedGroup {
            mode: GameMode::Arena,
            players,
            quality,
        })
    }

    /// Promote every qualifying group, duels first
    pub fn promote_all(&mut self) -> Vec<PromotedGroup> {
        let mut groups = Vec::new();
        while let Some(group) = self.try_promote_duel() {
            groups.push(group);
        }
        while let Some(group) = self.try_promote_arena() {
            groups.push(group);
        }
        groups
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rated(rating: f64, deviation: f64) -> Rating {
        Rating {
            rating,
            deviation,
            ..Rating::default()
        }
    }

    fn player(id: u64, rating: Rating, mode: GameMode) -> QueuedPlayer {
        QueuedPlayer::new(id, Some(id), rating, mode)
    }

    #[test]
    fn test_enqueue_rejects_duplicates_across_modes() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(player(1, Rating::default(), GameMode::Duel)).unwrap();
        assert_eq!(
            queue.enqueue(player(1, Rating::default(), GameMode::Arena)),
            Err(QueueError::AlreadyQueued)
        );
        assert_eq!(queue.total_len(), 1);
    }

    #[test]
    fn test_dequeue_is_idempotent() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(player(1, Rating::default(), GameMode::Arena)).unwrap();
        assert!(queue.dequeue(1).is_some());
        assert!(queue.dequeue(1).is_none());
        assert!(queue.dequeue(42).is_none());
        assert_eq!(queue.total_len(), 0);
    }

    #[test]
    fn test_duel_scenario_promotes() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(player(1, rated(1500.0, 350.0), GameMode::Duel)).unwrap();
        queue.enqueue(player(2, rated(1650.0, 300.0), GameMode::Duel)).unwrap();

        let group = queue.try_promote_duel().unwrap();
        assert!(group.quality >= DUEL_PROMOTION_QUALITY);
        let ids: Vec<u64> = group.players.iter().map(|p| p.player_id).collect();
        assert_eq!(ids, vec![1, 2]);
        assert!(!queue.contains(1));
        assert!(!queue.contains(2));
    }

    #[test]
    fn test_poor_duel_waits() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(player(1, rated(1000.0, 350.0), GameMode::Duel)).unwrap();
        queue.enqueue(player(2, rated(2000.0, 350.0), GameMode::Duel)).unwrap();

        assert!(queue.try_promote_duel().is_none());
        assert_eq!(queue.len(GameMode::Duel), 2);
    }

    #[test]
    fn test_duel_prefers_oldest_pair() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(player(1, rated(900.0, 350.0), GameMode::Duel)).unwrap();
        queue.enqueue(player(2, rated(1500.0, 350.0), GameMode::Duel)).unwrap();
        queue.enqueue(player(3, rated(1500.0, 350.0), GameMode::Duel)).unwrap();
        queue.enqueue(player(4, rated(1500.0, 350.0), GameMode::Duel)).unwrap();

        let group = queue.try_promote_duel().unwrap();
        let ids: Vec<u64> = group.players.iter().map(|p| p.player_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert!(queue.contains(1));
        assert!(queue.contains(4));
    }

    #[test]
    fn test_arena_skips_outlier_window() {
        let mut queue = MatchmakingQueue::new();
        queue.enqueue(player(1, rated(3000.0, 350.0), GameMode::Arena)).unwrap();
        for id in 2..=5 {
            queue.enqueue(player(id, Rating::default(), GameMode::Arena)).unwrap();
        }

        let group = queue.try_promote_arena().unwrap();
        let ids: Vec<u64> = group.players.iter().map(|p| p.player_id).collect();
        assert_eq!(ids, vec![2, 3, 4, 5]);
        assert_eq!(queue.len(GameMode::Arena), 1);
        assert!(queue.contains(1));
    }

    #[test]
    fn test_promotion_leaves_no_duplicates() {
        let mut queue = MatchmakingQueue::new();
        for id in 1..=4 {
            queue.enqueue(player(id, Rating::default(), GameMode::Duel)).unwrap();
        }
        for id in 10..=13 {
            queue.enqueue(player(id, Rating::default(), GameMode::Arena)).unwrap();
        }

        let groups = queue.promote_all();
        assert_eq!(groups.len(), 3);

        let mut seen: Vec<u64> = groups
            .iter()
            .flat_map(|g| g.players.iter().map(|p| p.player_id))
            .collect();
        let count = seen.len();
        seen.sort();
        seen.dedup();
        assert_eq!(seen.len(), count);
        assert_eq!(queue.total_len(), 0);
    }
}
