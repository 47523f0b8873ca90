//! Matchmaking service - manages queues, lobby creation and match results

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::game::{GameLobby, LobbyHandle, LobbyMember, LobbyRegistry, SimulationConfig};
use crate::rating::{update as update_rating, MatchOutcome, Rating};
use crate::store::{MatchRecord, PlayerRecord, PlayerStore, StoreError};
use crate::ws::protocol::GameMode;

use super::queue::{MatchmakingQueue, PromotedGroup, QueueError, QueuedPlayer};

#[derive(Debug, thiserror::Error)]
pub enum MatchResultError {
    #[error("Match {0} not found")]
    MatchNotFound(u64),

    #[error("Player {0} did not play in this match")]
    InvalidWinner(u64),

    #[error("Match result is already being recorded")]
    InProgress,

    #[error("A result with a different winner than {0} is already being recorded")]
    ConflictingWinner(u64),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Rows computed for a match result. Kept until every write lands so a
/// retry rewrites the same rows instead of rating the match twice.
#[derive(Debug, Clone)]
struct PendingResult {
    winner_id: u64,
    record: MatchRecord,
    players: Vec<PlayerRecord>,
}

/// Queue state plus the player -> lobby routing table
#[derive(Clone)]
pub struct MatchmakingService {
    queue: Arc<Mutex<MatchmakingQueue>>,
    registry: Arc<LobbyRegistry>,
    store: PlayerStore,
    /// Map of player -> current lobby
    player_lobbies: Arc<DashMap<u64, u64>>,
    /// Match id -> result awaiting its remaining writes
    pending_results: Arc<DashMap<u64, PendingResult>>,
    sim_config: SimulationConfig,
    interval: Duration,
}

impl MatchmakingService {
    pub fn new(
        registry: Arc<LobbyRegistry>,
        store: PlayerStore,
        sim_config: SimulationConfig,
        interval: Duration,
    ) -> Self {
        Self {
            queue: Arc::new(Mutex::new(MatchmakingQueue::new())),
            registry,
            store,
            player_lobbies: Arc::new(DashMap::new()),
            pending_results: Arc::new(DashMap::new()),
            sim_config,
            interval,
        }
    }

    /// Join matchmaking queue
    pub async fn join_queue(&self, player: QueuedPlayer) -> Result<(), QueueError> {
        let player_id = player.player_id;
        let mode = player.mode;

        // Promotion reserves lobby seats under this lock
        let mut queue = self.queue.lock().await;
        if self.player_lobbies.contains_key(&player_id) {
            return Err(QueueError::InMatch);
        }
        queue.enqueue(player)?;

        info!(
            player_id,
            mode = mode.as_str(),
            queue_size = queue.len(mode),
            "Player joined matchmaking queue"
        );
        Ok(())
    }

    /// Leave matchmaking queue; no-op if not queued
    pub async fn leave_queue(&self, player_id: u64) -> bool {
        let removed = self.queue.lock().await.dequeue(player_id).is_some();
        if removed {
            info!(player_id, "Player left matchmaking queue");
        }
        removed
    }

    pub async fn is_queued(&self, player_id: u64) -> bool {
        self.queue.lock().await.contains(player_id)
    }

    /// (duel, arena) queue lengths
    pub async fn queue_sizes(&self) -> (usize, usize) {
        let queue = self.queue.lock().await;
        (queue.len(GameMode::Duel), queue.len(GameMode::Arena))
    }

    /// Player's current lobby
    pub fn lobby_of(&self, player_id: u64) -> Option<LobbyHandle> {
        let lobby_id = *self.player_lobbies.get(&player_id)?;
        self.registry.get(lobby_id)
    }

    /// Run the matchmaking service (periodic queue processing)
    pub async fn run(&self) {
        info!(interval_ms = self.interval.as_millis() as u64, "Matchmaking loop started");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            interval.tick().await;
            self.process_queue().await;
        }
    }

    /// One scan: promote every qualifying group into a lobby
    pub async fn process_queue(&self) -> Vec<LobbyHandle> {
        let reserved = self.reserve_promotions().await;

        let mut lobbies = Vec::with_capacity(reserved.len());
        for (lobby_id, group) in reserved {
            lobbies.push(self.create_lobby(lobby_id, group).await);
        }
        lobbies
    }

    /// Promote groups and route their players to fresh lobby ids without
    /// releasing the queue lock in between
    async fn reserve_promotions(&self) -> Vec<(u64, PromotedGroup)> {
        let mut queue = self.queue.lock().await;
        queue
            .promote_all()
            .into_iter()
            .map(|group| {
                let lobby_id = self.registry.allocate_id();
                for player in &group.players {
                    self.player_lobbies.insert(player.player_id, lobby_id);
                }
                (lobby_id, group)
            })
            .collect()
    }

    async fn create_lobby(&self, lobby_id: u64, group: PromotedGroup) -> LobbyHandle {
        let members: Vec<LobbyMember> = group
            .players
            .iter()
            .map(|p| LobbyMember {
                player_id: p.player_id,
                account_id: p.account_id,
                rating: p.rating,
            })
            .collect();

        let (lobby, handle) = GameLobby::new(
            lobby_id,
            group.mode,
            group.quality,
            members,
            self.sim_config.clone(),
            rand::random(),
        );

        self.registry.insert(handle.clone());
        for player in &group.players {
            self.player_lobbies.insert(player.player_id, lobby_id);
        }

        let longest_wait_ms = group
            .players
            .iter()
            .map(|p| p.wait_time().as_millis() as u64)
            .max()
            .unwrap_or(0);
        info!(
            lobby_id,
            mode = group.mode.as_str(),
            quality = group.quality,
            player_count = group.players.len(),
            longest_wait_ms,
            "Created new lobby"
        );

        tokio::spawn(lobby.run());

        for account_id in group.players.iter().filter_map(|p| p.account_id) {
            if let Err(e) = self.store.set_match(account_id, Some(lobby_id)).await {
                warn!(lobby_id, account_id, error = %e, "Failed to mark player in match");
            }
        }

        handle
    }

    /// Seat an anonymous player in the newest arena lobby with room,
    /// opening one if none exists. Skips quality matching entirely.
    pub async fn join_legacy(&self) -> (u64, LobbyHandle) {
        let player_id = loop {
            let candidate: u64 = rand::random();
            if candidate != 0 && !self.player_lobbies.contains_key(&candidate) {
                break candidate;
            }
        };
        let rating = Rating::default();

        if let Some(lobby) = self.registry.latest_joinable(GameMode::Arena, &rating) {
            let member = LobbyMember {
                player_id,
                account_id: None,
                rating,
            };
            if lobby.join(member) {
                self.player_lobbies.insert(player_id, lobby.id);
                info!(player_id, lobby_id = lobby.id, "Legacy player joined lobby");
                return (player_id, lobby);
            }
        }

        let group = PromotedGroup {
            mode: GameMode::Arena,
            players: vec![QueuedPlayer::new(player_id, None, rating, GameMode::Arena)],
            quality: 0.0,
        };
        let lobby_id = self.registry.allocate_id();
        let lobby = self.create_lobby(lobby_id, group).await;
        (player_id, lobby)
    }

    /// Apply rating updates, persist the match and close the lobby.
    /// `winner_id` is the winner's session token. The lobby stays open if
    /// any write fails; a retry with the same winner rewrites the same rows.
    pub async fn record_result(&self, match_id: u64, winner_id: u64) -> Result<(), MatchResultError> {
        let lobby = self
            .registry
            .get(match_id)
            .ok_or(MatchResultError::MatchNotFound(match_id))?;

        if !lobby.begin_resolving() {
            return Err(MatchResultError::InProgress);
        }

        if let Err(e) = self.persist_result(&lobby, winner_id).await {
            lobby.end_resolving();
            if matches!(e, MatchResultError::Store(_)) {
                error!(match_id, error = %e, "Failed to record match result");
            }
            return Err(e);
        }

        lobby.close();
        self.registry.remove(match_id);
        self.pending_results.remove(&match_id);
        for member in lobby.members() {
            self.player_lobbies.remove(&member.player_id);
        }

        info!(match_id, winner_id, "Match result recorded");
        Ok(())
    }

    async fn persist_result(&self, lobby: &LobbyHandle, winner_id: u64) -> Result<(), MatchResultError> {
        let pending = match self.pending_results.get(&lobby.id).map(|p| p.value().clone()) {
            Some(pending) if pending.winner_id == winner_id => pending,
            Some(_) => return Err(MatchResultError::ConflictingWinner(winner_id)),
            None => {
                let pending = self.prepare_result(lobby, winner_id).await?;
                self.pending_results.insert(lobby.id, pending.clone());
                pending
            }
        };

        self.store.record_match(&pending.record).await?;
        for record in &pending.players {
            self.store.update_player(record).await?;
        }
        Ok(())
    }

    /// Compute every row the result writes. The winner scores 1 against each
    /// other rated member, who each score 0 against the winner. Nothing is
    /// rated when the winner has no account.
    async fn prepare_result(&self, lobby: &LobbyHandle, winner_id: u64) -> Result<PendingResult, MatchResultError> {
        let winner = lobby
            .member(winner_id)
            .ok_or(MatchResultError::InvalidWinner(winner_id))?;

        let mut players = Vec::new();
        for account_id in lobby.members().iter().filter_map(|m| m.account_id) {
            match self.store.get_player(account_id).await? {
                Some(record) => players.push(record),
                None => return Err(StoreError::NotFound(account_id).into()),
            }
        }

        let ratings: Vec<(u64, Rating)> = players.iter().map(|p| (p.id, p.rating())).collect();
        let rated_winner = winner
            .account_id
            .and_then(|account_id| ratings.iter().find(|(id, _)| *id == account_id).copied());

        for record in &mut players {
            if let Some((winner_account, winner_rating)) = rated_winner {
                let results: Vec<MatchOutcome> = if record.id == winner_account {
                    ratings
                        .iter()
                        .filter(|(id, _)| *id != winner_account)
                        .map(|(_, r)| MatchOutcome::win(*r))
                        .collect()
                } else {
                    vec![MatchOutcome::loss(winner_rating)]
                };
                let updated = update_rating(&record.rating(), &results);
                record.apply_rating(&updated);
            }
            record.match_id = None;
        }

        Ok(PendingResult {
            winner_id,
            record: MatchRecord {
                id: lobby.id,
                timestamp: Utc::now(),
                glicko_match_weight: lobby.quality,
                winner_id: winner.account_id,
            },
            players,
        })
    }
}
