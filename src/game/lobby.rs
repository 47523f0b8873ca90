//! Lobby handles, registry and the per-lobby tick driver

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::rating::{LobbyQualityEvaluator, Rating};
use crate::util::time::tick_period;
use crate::ws::protocol::{EntitySnapshot, EntityState, GameMode, MatchEnded, PlayerInput, ServerMsg};

use super::simulation::{Simulation, SimulationConfig};

const INBOX_CAPACITY: usize = 512;
const BROADCAST_CAPACITY: usize = 64;

/// A seated player
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LobbyMember {
    /// Session token, also the in-game player id
    pub player_id: u64,
    /// Persistent account id; None for anonymous joiners
    pub account_id: Option<u64>,
    pub rating: Rating,
}

/// Messages from connections to the tick driver
#[derive(Debug, Clone, Copy)]
pub enum LobbyCommand {
    Input { player_id: u64, input: PlayerInput },
    Join { player_id: u64 },
    Leave { player_id: u64 },
}

/// Last known state of every live entity, kept for late joiners and
/// receivers that fell behind the broadcast
#[derive(Debug, Default)]
pub struct EntityMirror {
    tick: u64,
    entities: BTreeMap<u64, EntityState>,
}

impl EntityMirror {
    pub fn apply(&mut self, snapshot: &EntitySnapshot) {
        self.tick = snapshot.tick;
        if snapshot.full {
            self.entities.clear();
        }
        for state in &snapshot.entities {
            self.entities.insert(state.network_id, state.clone());
        }
        for id in &snapshot.deleted_entities {
            self.entities.remove(id);
        }
    }

    pub fn full_snapshot(&self) -> EntitySnapshot {
        EntitySnapshot {
            tick: self.tick,
            full: true,
            entities: self.entities.values().cloned().collect(),
            deleted_entities: Vec::new(),
        }
    }
}

/// Shared handle to a running lobby
#[derive(Clone)]
pub struct LobbyHandle {
    pub id: u64,
    pub mode: GameMode,
    /// Evaluated quality when the lobby was formed
    pub quality: f64,
    members: Arc<RwLock<Vec<LobbyMember>>>,
    inbox: mpsc::Sender<LobbyCommand>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    mirror: Arc<RwLock<EntityMirror>>,
    closed: Arc<AtomicBool>,
    resolving: Arc<AtomicBool>,
}

impl LobbyHandle {
    pub fn members(&self) -> Vec<LobbyMember> {
        self.members.read().clone()
    }

    /// Whether a player rated `candidate` may take a free seat
    pub fn accepts(&self, candidate: &Rating) -> bool {
        let ratings: Vec<Rating> = self.members.read().iter().map(|m| m.rating).collect();
        !self.is_closed() && LobbyQualityEvaluator::can_player_join(&ratings, candidate, self.mode)
    }

    pub fn member_count(&self) -> usize {
        self.members.read().len()
    }

    pub fn member(&self, player_id: u64) -> Option<LobbyMember> {
        self.members.read().iter().find(|m| m.player_id == player_id).copied()
    }

    pub fn member_by_account(&self, account_id: u64) -> Option<LobbyMember> {
        self.members
            .read()
            .iter()
            .find(|m| m.account_id == Some(account_id))
            .copied()
    }

    /// Seat a late joiner. Returns false if closed, full or already seated.
    pub fn join(&self, member: LobbyMember) -> bool {
        if self.is_closed() {
            return false;
        }
        {
            let mut members = self.members.write();
            if members.len() >= self.mode.required_players()
                || members.iter().any(|m| m.player_id == member.player_id)
            {
                return false;
            }
            members.push(member);
        }
        self.send(LobbyCommand::Join {
            player_id: member.player_id,
        })
    }

    /// Respawn a seated member's pawn after a reconnect. No-op if it still exists.
    pub fn resume(&self, player_id: u64) -> bool {
        if self.is_closed() || self.member(player_id).is_none() {
            return false;
        }
        self.send(LobbyCommand::Join { player_id })
    }

    /// Remove the member's pawn; the seat is kept for a reconnect
    pub fn leave(&self, player_id: u64) -> bool {
        if self.is_closed() {
            return false;
        }
        self.send(LobbyCommand::Leave { player_id })
    }

    /// Queue input for the next tick. Dropped if the inbox is full.
    pub fn submit_input(&self, player_id: u64, input: PlayerInput) -> bool {
        if self.is_closed() {
            return false;
        }
        self.send(LobbyCommand::Input { player_id, input })
    }

    fn send(&self, command: LobbyCommand) -> bool {
        match self.inbox.try_send(command) {
            Ok(()) => true,
            Err(e) => {
                warn!(lobby_id = self.id, error = %e, "Lobby inbox rejected command");
                false
            }
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ServerMsg> {
        self.snapshot_tx.subscribe()
    }

    pub fn full_snapshot(&self) -> EntitySnapshot {
        self.mirror.read().full_snapshot()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Stop the tick driver after its current tick
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Claim the right to resolve this lobby's result. Only one caller wins.
    pub fn begin_resolving(&self) -> bool {
        self.resolving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn end_resolving(&self) {
        self.resolving.store(false, Ordering::Release);
    }
}

/// Registry of all active lobbies
pub struct LobbyRegistry {
    lobbies: DashMap<u64, LobbyHandle>,
    next_id: AtomicU64,
}

impl LobbyRegistry {
    pub fn new() -> Self {
        Self {
            lobbies: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn allocate_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn get(&self, id: u64) -> Option<LobbyHandle> {
        self.lobbies.get(&id).map(|l| l.value().clone())
    }

    pub fn insert(&self, handle: LobbyHandle) {
        self.lobbies.insert(handle.id, handle);
    }

    pub fn remove(&self, id: u64) -> Option<LobbyHandle> {
        self.lobbies.remove(&id).map(|(_, h)| h)
    }

    pub fn active_lobbies(&self) -> usize {
        self.lobbies.len()
    }

    pub fn total_players(&self) -> usize {
        self.lobbies.iter().map(|l| l.value().member_count()).sum()
    }

    /// Most recently created open lobby of `mode` with a free seat in
    /// rating range of `candidate`
    pub fn latest_joinable(&self, mode: GameMode, candidate: &Rating) -> Option<LobbyHandle> {
        self.lobbies
            .iter()
            .filter(|l| l.value().mode == mode && l.value().accepts(candidate))
            .max_by_key(|l| *l.key())
            .map(|l| l.value().clone())
    }
}

impl Default for LobbyRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Owns one lobby's simulation and drives it at the tick rate
pub struct GameLobby {
    id: u64,
    tick_rate: u32,
    sim: Simulation,
    inbox_rx: mpsc::Receiver<LobbyCommand>,
    snapshot_tx: broadcast::Sender<ServerMsg>,
    mirror: Arc<RwLock<EntityMirror>>,
    closed: Arc<AtomicBool>,
}

impl GameLobby {
    pub fn new(
        id: u64,
        mode: GameMode,
        quality: f64,
        members: Vec<LobbyMember>,
        config: SimulationConfig,
        seed: u64,
    ) -> (Self, LobbyHandle) {
        let (inbox, inbox_rx) = mpsc::channel(INBOX_CAPACITY);
        let (snapshot_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let tick_rate = config.tick_rate;

        let player_ids: Vec<u64> = members.iter().map(|m| m.player_id).collect();
        let mut sim = Simulation::new(id, config);
        sim.start(seed, &player_ids);

        let mut mirror = EntityMirror::default();
        mirror.apply(&sim.flush_snapshot());
        let mirror = Arc::new(RwLock::new(mirror));
        let closed = Arc::new(AtomicBool::new(false));

        let handle = LobbyHandle {
            id,
            mode,
            quality,
            members: Arc::new(RwLock::new(members)),
            inbox,
            snapshot_tx: snapshot_tx.clone(),
            mirror: mirror.clone(),
            closed: closed.clone(),
            resolving: Arc::new(AtomicBool::new(false)),
        };

        let lobby = Self {
            id,
            tick_rate,
            sim,
            inbox_rx,
            snapshot_tx,
            mirror,
            closed,
        };
        (lobby, handle)
    }

    /// Tick until closed or every handle is dropped
    pub async fn run(mut self) {
        info!(lobby_id = self.id, tick_rate = self.tick_rate, "Lobby tick driver started");

        let mut ticker = interval(tick_period(self.tick_rate));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if !self.tick_once() {
                break;
            }
        }

        self.sim.close();
        let _ = self.snapshot_tx.send(ServerMsg::MatchEnded(MatchEnded { match_id: self.id }));
        info!(lobby_id = self.id, tick = self.sim.tick(), "Lobby tick driver stopped");
    }

    /// One iteration of the driver. Returns false when the lobby should stop.
    fn tick_once(&mut self) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }

        let Some(inputs) = self.drain_inbox() else {
            debug!(lobby_id = self.id, "All lobby handles dropped");
            return false;
        };

        self.sim.step(&inputs);
        let snapshot = self.sim.flush_snapshot();
        self.mirror.write().apply(&snapshot);

        if !snapshot.is_empty() {
            // No receivers is fine; late joiners resync from the mirror
            let _ = self.snapshot_tx.send(ServerMsg::Snapshot(snapshot));
        }
        true
    }

    /// Collapse queued commands to the latest input per player.
    /// None once every sender is gone.
    fn drain_inbox(&mut self) -> Option<HashMap<u64, PlayerInput>> {
        let mut latest = HashMap::new();
        loop {
            match self.inbox_rx.try_recv() {
                Ok(LobbyCommand::Input { player_id, input }) => {
                    latest.insert(player_id, input);
                }
                Ok(LobbyCommand::Join { player_id }) => {
                    if self.sim.add_player(player_id) {
                        info!(
                            lobby_id = self.id,
                            player_id,
                            players = self.sim.player_count(),
                            "Player joined running lobby"
                        );
                    }
                }
                Ok(LobbyCommand::Leave { player_id }) => {
                    latest.remove(&player_id);
                    if self.sim.remove_player(player_id) {
                        info!(
                            lobby_id = self.id,
                            player_id,
                            players = self.sim.player_count(),
                            "Player left lobby"
                        );
                    }
                }
                Err(TryRecvError::Empty) => return Some(latest),
                Err(TryRecvError::Disconnected) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::KIND_PAWN;
    use std::time::Duration;

    fn member(player_id: u64) -> LobbyMember {
        LobbyMember {
            player_id,
            account_id: Some(player_id * 10),
            rating: Rating::default(),
        }
    }

    fn lobby(players: &[u64]) -> (GameLobby, LobbyHandle) {
        GameLobby::new(
            1,
            GameMode::Duel,
            0.8,
            players.iter().map(|&p| member(p)).collect(),
            SimulationConfig::default(),
            11,
        )
    }

    fn pawn_x(handle: &LobbyHandle, player_id: u64) -> f32 {
        handle
            .full_snapshot()
            .entities
            .iter()
            .find(|e| e.player_id == Some(player_id))
            .map(|e| e.position[0])
            .unwrap()
    }

    #[test]
    fn test_mirror_ready_before_first_tick() {
        let (_lobby, handle) = lobby(&[1, 2]);
        let snapshot = handle.full_snapshot();
        assert!(snapshot.full);
        let pawns = snapshot.entities.iter().filter(|e| e.kind == KIND_PAWN).count();
        assert_eq!(pawns, 2);
    }

    #[test]
    fn test_latest_input_wins() {
        let (mut lobby, handle) = lobby(&[1, 2]);
        let start = pawn_x(&handle, 1);

        let right = PlayerInput {
            move_right: true,
            ..Default::default()
        };
        let left = PlayerInput {
            move_left: true,
            ..Default::default()
        };
        assert!(handle.submit_input(1, right));
        assert!(handle.submit_input(1, left));
        assert!(lobby.tick_once());

        assert!(pawn_x(&handle, 1) < start);
    }

    #[test]
    fn test_join_spawns_once() {
        let (mut lobby, handle) = lobby(&[1]);
        assert!(handle.join(member(2)));
        assert!(!handle.join(member(2)));
        assert!(lobby.tick_once());

        assert_eq!(handle.member_count(), 2);
        let pawns = handle
            .full_snapshot()
            .entities
            .iter()
            .filter(|e| e.kind == KIND_PAWN)
            .count();
        assert_eq!(pawns, 2);
    }

    #[test]
    fn test_join_respects_capacity() {
        let (mut lobby, handle) = lobby(&[1]);
        assert!(handle.join(member(2)));
        assert!(!handle.join(member(3)));
        assert!(!handle.accepts(&Rating::default()));
        assert!(lobby.tick_once());
        assert_eq!(handle.member_count(), 2);
    }

    #[test]
    fn test_leave_and_resume() {
        let (mut lobby, handle) = lobby(&[1, 2]);
        let pawns = |h: &LobbyHandle| h.full_snapshot().entities.iter().filter(|e| e.kind == KIND_PAWN).count();

        assert!(handle.leave(1));
        assert!(lobby.tick_once());
        assert_eq!(pawns(&handle), 1);
        assert_eq!(handle.member_count(), 2);

        assert!(!handle.resume(3));
        assert!(handle.resume(1));
        assert!(lobby.tick_once());
        assert_eq!(pawns(&handle), 2);
    }

    #[test]
    fn test_resolving_claim_is_exclusive() {
        let (_lobby, handle) = lobby(&[1, 2]);
        assert!(handle.begin_resolving());
        assert!(!handle.begin_resolving());
        handle.end_resolving();
        assert!(handle.begin_resolving());
    }

    #[test]
    fn test_closed_lobby_rejects_input() {
        let (mut lobby, handle) = lobby(&[1, 2]);
        handle.close();
        assert!(!handle.submit_input(1, PlayerInput::default()));
        assert!(!lobby.tick_once());
    }

    #[test]
    fn test_registry_prefers_latest_open_lobby() {
        let registry = LobbyRegistry::new();
        let (_a, first) = GameLobby::new(registry.allocate_id(), GameMode::Arena, 0.7, vec![member(1)], SimulationConfig::default(), 1);
        let (_b, second) = GameLobby::new(registry.allocate_id(), GameMode::Arena, 0.7, vec![member(2)], SimulationConfig::default(), 2);
        registry.insert(first.clone());
        registry.insert(second.clone());

        let rating = Rating::default();
        assert_eq!(registry.latest_joinable(GameMode::Arena, &rating).map(|l| l.id), Some(second.id));
        assert!(registry.latest_joinable(GameMode::Duel, &rating).is_none());

        let outlier = Rating {
            rating: rating.rating + 400.0,
            ..rating
        };
        assert!(registry.latest_joinable(GameMode::Arena, &outlier).is_none());

        second.close();
        assert_eq!(registry.latest_joinable(GameMode::Arena, &rating).map(|l| l.id), Some(first.id));
        assert_eq!(registry.total_players(), 2);
    }

    #[tokio::test]
    async fn test_driver_broadcasts_and_announces_end() {
        let (lobby, handle) = lobby(&[1, 2]);
        let mut rx = handle.subscribe();
        handle.submit_input(
            1,
            PlayerInput {
                move_forward: true,
                ..Default::default()
            },
        );
        let task = tokio::spawn(lobby.run());

        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(msg, ServerMsg::Snapshot(_)));

        handle.close();
        let ended = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Ok(ServerMsg::MatchEnded(e)) = rx.recv().await {
                    return e.match_id;
                }
            }
        })
        .await
        .unwrap();
        assert_eq!(ended, 1);
        task.await.unwrap();
    }
}
