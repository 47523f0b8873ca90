//! Authoritative per-lobby simulation
//!
//! One `Simulation` owns one lobby's entity store. It is driven by a single
//! tick driver; other threads only reach it through drained input.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::{debug, info};

use crate::util::vec::{Vec2, Vec3};
use crate::ws::protocol::{EntitySnapshot, PlayerInput};

use super::combat::{CombatSystem, WeaponStats};
use super::components::{Pawn, Projectile, RigidBody, TileKind, Transform, KIND_PAWN, KIND_PROJECTILE};
use super::entity::{EntityId, EntityStore};
use super::physics::{Aabb, PhysicsSystem};
use super::snapshot::SnapshotBuilder;
use super::world::{self, TileMap, TILE_SIZE};

const TILE_LAYER: f32 = 0.0;
const PAWN_LAYER: f32 = 1.0;
const PROJECTILE_LAYER: f32 = 2.0;

/// Lobby lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LobbyPhase {
    /// Constructed, no world yet
    Created,
    /// World generated and pawns spawned
    Started,
    /// At least one tick processed
    Ticking,
    /// Result recorded, no further ticks
    Closed,
}

/// Simulation tuning
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub tick_rate: u32,
    pub map_width: usize,
    pub map_height: usize,
    /// Pawn speed (units per second)
    pub pawn_speed: f32,
    pub pawn_scale: Vec2,
    pub starting_lives: u32,
    pub weapon: WeaponStats,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_rate: crate::util::time::DEFAULT_TICK_RATE,
            map_width: world::DEFAULT_WIDTH,
            map_height: world::DEFAULT_HEIGHT,
            pawn_speed: 600.0,
            pawn_scale: Vec2::new(150.0, 150.0),
            starting_lives: 3,
            weapon: WeaponStats::default(),
        }
    }
}

pub struct Simulation {
    lobby_id: u64,
    phase: LobbyPhase,
    config: SimulationConfig,
    dt: f32,
    tick: u64,
    store: EntityStore,
    spawn_points: Vec<Vec2>,
    pawns_by_player: BTreeMap<u64, EntityId>,
    /// Entities to destroy at the end of the current tick
    pending_removal: BTreeSet<EntityId>,
    /// Network ids destroyed since the last snapshot
    destroyed: Vec<u64>,
    snapshots: SnapshotBuilder,
}

impl Simulation {
    pub fn new(lobby_id: u64, config: SimulationConfig) -> Self {
        let dt = 1.0 / config.tick_rate.max(1) as f32;
        Self {
            lobby_id,
            phase: LobbyPhase::Created,
            config,
            dt,
            tick: 0,
            store: EntityStore::new(),
            spawn_points: Vec::new(),
            pawns_by_player: BTreeMap::new(),
            pending_removal: BTreeSet::new(),
            destroyed: Vec::new(),
            snapshots: SnapshotBuilder::new(),
        }
    }

    pub fn phase(&self) -> LobbyPhase {
        self.phase
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Simulated seconds since start
    pub fn elapsed(&self) -> f32 {
        self.tick as f32 * self.dt
    }

    pub fn accepts_input(&self) -> bool {
        matches!(self.phase, LobbyPhase::Started | LobbyPhase::Ticking)
    }

    pub fn player_count(&self) -> usize {
        self.pawns_by_player.len()
    }

    pub fn lives_of(&self, player_id: u64) -> Option<u32> {
        let id = self.pawns_by_player.get(&player_id)?;
        self.store.pawn(*id).map(|p| p.lives)
    }

    pub fn position_of(&self, player_id: u64) -> Option<Vec2> {
        let id = self.pawns_by_player.get(&player_id)?;
        self.store.transform(*id).map(|t| t.position.xy())
    }

    /// Generate the world from `seed` and spawn a pawn per player
    pub fn start(&mut self, seed: u64, players: &[u64]) {
        if self.phase != LobbyPhase::Created {
            return;
        }
        let map = TileMap::generate(seed, self.config.map_width, self.config.map_height);
        self.load_map(&map);
        self.begin(map.spawn_points(), players);
    }

    fn load_map(&mut self, map: &TileMap) {
        for (x, y, kind) in map.iter() {
            if kind.is_solid() {
                self.spawn_obstacle(world::tile_center(x, y), Vec2::new(TILE_SIZE, TILE_SIZE), kind);
            }
        }
    }

    fn begin(&mut self, spawn_points: Vec<Vec2>, players: &[u64]) {
        self.spawn_points = spawn_points;
        self.phase = LobbyPhase::Started;
        for &player_id in players {
            self.add_player(player_id);
        }
        info!(
            lobby_id = self.lobby_id,
            entities = self.store.len(),
            players = self.pawns_by_player.len(),
            "Lobby world started"
        );
    }

    /// Spawn a pawn for `player_id`. Returns false if the lobby is not
    /// running or the player already has one.
    pub fn add_player(&mut self, player_id: u64) -> bool {
        if !self.accepts_input() || self.pawns_by_player.contains_key(&player_id) {
            return false;
        }

        let spawn = if self.spawn_points.is_empty() {
            Vec2::ZERO
        } else {
            self.spawn_points[self.pawns_by_player.len() % self.spawn_points.len()]
        };

        let id = self.store.spawn(
            Transform::new(Vec3::from_xy(spawn, PAWN_LAYER), self.config.pawn_scale),
            KIND_PAWN,
        );
        self.store.insert_pawn(
            id,
            Pawn::new(
                player_id,
                spawn,
                self.config.starting_lives,
                -self.config.weapon.cooldown,
            ),
        );
        self.pawns_by_player.insert(player_id, id);

        debug!(lobby_id = self.lobby_id, player_id, "Pawn spawned");
        true
    }

    /// Remove `player_id`'s pawn. The deletion goes out with the next snapshot.
    pub fn remove_player(&mut self, player_id: u64) -> bool {
        let Some(id) = self.pawns_by_player.remove(&player_id) else {
            return false;
        };
        if let Some(network_id) = self.store.despawn(id) {
            self.destroyed.push(network_id);
        }
        debug!(lobby_id = self.lobby_id, player_id, "Pawn removed");
        true
    }

    pub fn spawn_obstacle(&mut self, center: Vec2, scale: Vec2, kind: TileKind) -> EntityId {
        let id = self.store.spawn(
            Transform::new(Vec3::from_xy(center, TILE_LAYER), scale),
            kind.code(),
        );
        self.store.insert_body(
            id,
            RigidBody {
                is_solid: kind.is_solid(),
            },
        );
        id
    }

    pub fn spawn_projectile(&mut self, owner_id: u64, position: Vec2, direction: Vec2) -> EntityId {
        let direction = direction.normalize();
        let mut transform = Transform::new(
            Vec3::from_xy(position, PROJECTILE_LAYER),
            self.config.weapon.projectile_scale,
        );
        transform.rotation = direction.y.atan2(direction.x);

        let id = self.store.spawn(transform, KIND_PROJECTILE);
        self.store.insert_projectile(
            id,
            Projectile {
                owner_id,
                direction,
                speed: self.config.weapon.projectile_speed,
                spawn_time: self.elapsed(),
            },
        );
        id
    }

    /// Run one tick against the drained input buffer
    pub fn step(&mut self, inputs: &HashMap<u64, PlayerInput>) {
        if !self.accepts_input() {
            return;
        }
        self.phase = LobbyPhase::Ticking;
        self.tick += 1;

        self.apply_inputs(inputs);
        self.update_movement();
        self.update_shooting();
        self.update_projectiles();
        self.destroy_marked();
    }

    /// Dirty entities plus deletions since the last call
    pub fn flush_snapshot(&mut self) -> EntitySnapshot {
        let deleted = std::mem::take(&mut self.destroyed);
        self.snapshots.build(self.tick, &mut self.store, deleted)
    }

    pub fn close(&mut self) {
        if self.phase != LobbyPhase::Closed {
            self.phase = LobbyPhase::Closed;
            info!(lobby_id = self.lobby_id, tick = self.tick, "Lobby closed");
        }
    }

    /// Reset every pawn's per-tick flags to its drained input. Pawns with no
    /// input this tick stop moving and shooting but keep their aim.
    fn apply_inputs(&mut self, inputs: &HashMap<u64, PlayerInput>) {
        let pawns: Vec<(u64, EntityId)> = self.pawns_by_player.iter().map(|(p, e)| (*p, *e)).collect();

        for (player_id, id) in pawns {
            let Some(pawn) = self.store.pawn_mut(id) else {
                debug!(lobby_id = self.lobby_id, player_id, "Pawn missing, skipping input");
                continue;
            };

            let input = inputs.get(&player_id).copied().unwrap_or(PlayerInput {
                aim_rotation: pawn.aim_rotation,
                ..PlayerInput::default()
            });
            pawn.move_forward = input.move_forward;
            pawn.move_backward = input.move_backward;
            pawn.move_left = input.move_left;
            pawn.move_right = input.move_right;
            pawn.is_shooting = input.is_shooting;
            if input.aim_rotation.is_finite() {
                pawn.aim_rotation = input.aim_rotation;
            }

            let aim = pawn.aim_rotation;
            self.store.set_rotation(id, aim);
        }
    }

    fn update_movement(&mut self) {
        let obstacles: Vec<Aabb> = self
            .store
            .solid_bodies()
            .map(|(_, t)| PhysicsSystem::body_bounds(t.position.xy(), t.scale))
            .collect();

        let movers: Vec<(EntityId, Vec2, Transform)> = self
            .store
            .pawns()
            .map(|(id, pawn, t)| {
                (id, PhysicsSystem::movement_delta(pawn, self.config.pawn_speed, self.dt), *t)
            })
            .filter(|(_, delta, _)| !delta.is_zero())
            .collect();

        for (id, delta, transform) in movers {
            let next = PhysicsSystem::move_axis_separated(transform.position, delta, transform.scale, &obstacles);
            self.store.set_position(id, next);
        }
    }

    fn update_shooting(&mut self) {
        let now = self.elapsed();
        let weapon = self.config.weapon;

        let shooters: Vec<(EntityId, Pawn, Transform)> = self
            .store
            .pawns()
            .filter(|(_, pawn, _)| pawn.is_shooting)
            .map(|(id, pawn, t)| (id, *pawn, *t))
            .collect();

        for (id, pawn, transform) in shooters {
            if !CombatSystem::can_fire(pawn.last_shot_time, now, &weapon) {
                continue;
            }

            let spawn = CombatSystem::spawn_position(transform.position.xy(), pawn.aim_rotation, &weapon);
            let bounds = PhysicsSystem::body_bounds(spawn, weapon.projectile_scale);
            let blocked = self
                .store
                .projectiles()
                .any(|(_, t)| PhysicsSystem::body_bounds(t.position.xy(), t.scale).overlaps(&bounds));
            if blocked {
                debug!(lobby_id = self.lobby_id, player_id = pawn.player_id, "Shot spawn blocked");
                continue;
            }

            self.spawn_projectile(pawn.player_id, spawn, Vec2::from_angle(pawn.aim_rotation));
            if let Some(p) = self.store.pawn_mut(id) {
                p.last_shot_time = now;
            }
        }
    }

    fn update_projectiles(&mut self) {
        let now = self.elapsed();
        let weapon = self.config.weapon;

        for id in self.store.projectile_ids() {
            if self.pending_removal.contains(&id) {
                continue;
            }
            let (Some(projectile), Some(transform)) =
                (self.store.projectile(id).copied(), self.store.transform(id).copied())
            else {
                debug!(lobby_id = self.lobby_id, "Projectile missing components");
                continue;
            };

            if CombatSystem::is_expired(projectile.spawn_time, now, &weapon) {
                self.pending_removal.insert(id);
                continue;
            }

            let position = CombatSystem::advance(transform.position.xy(), projectile.direction, projectile.speed, self.dt);
            self.store.set_xy(id, position);
            let bounds = PhysicsSystem::body_bounds(position, transform.scale);

            let obstacle = self
                .store
                .solid_bodies()
                .find(|(_, t)| PhysicsSystem::body_bounds(t.position.xy(), t.scale).overlaps(&bounds))
                .map(|(oid, _)| oid);
            if let Some(obstacle) = obstacle {
                self.pending_removal.insert(id);
                self.hit_obstacle(obstacle);
                continue;
            }

            let pending = &self.pending_removal;
            let other = self
                .store
                .projectiles()
                .find(|(pid, t)| {
                    *pid != id
                        && !pending.contains(pid)
                        && PhysicsSystem::body_bounds(t.position.xy(), t.scale).overlaps(&bounds)
                })
                .map(|(pid, _)| pid);
            if let Some(other) = other {
                self.pending_removal.insert(id);
                self.pending_removal.insert(other);
                continue;
            }

            let struck = self
                .store
                .pawns()
                .find(|(_, pawn, t)| {
                    pawn.player_id != projectile.owner_id
                        && PhysicsSystem::body_bounds(t.position.xy(), t.scale).overlaps(&bounds)
                })
                .map(|(pid, _, _)| pid);
            if let Some(struck) = struck {
                self.pending_removal.insert(id);
                self.hit_pawn(struck);
            }
        }
    }

    fn hit_obstacle(&mut self, id: EntityId) {
        let Some(kind) = self.store.tag(id).and_then(|t| TileKind::from_code(t.kind)) else {
            return;
        };

        match kind {
            TileKind::Destructible => {
                self.store.set_kind(id, TileKind::Floor.code());
                self.store.set_solid(id, false);
            }
            TileKind::Bomb => {
                if let Some(center) = self.store.transform(id).map(|t| t.position.xy()) {
                    self.detonate(center);
                }
            }
            TileKind::Wall | TileKind::Border | TileKind::Floor => {}
        }
    }

    /// Clear blastable tiles and send pawns back to spawn within the blast radius
    fn detonate(&mut self, center: Vec2) {
        let weapon = self.config.weapon;

        for id in self.store.body_ids() {
            let Some(position) = self.store.transform(id).map(|t| t.position.xy()) else {
                continue;
            };
            let blastable = self
                .store
                .tag(id)
                .and_then(|t| TileKind::from_code(t.kind))
                .is_some_and(TileKind::is_blastable);
            if blastable && CombatSystem::in_blast(center, position, &weapon) {
                self.store.set_kind(id, TileKind::Floor.code());
                self.store.set_solid(id, false);
            }
        }

        let caught: Vec<EntityId> = self
            .store
            .pawns()
            .filter(|(_, _, t)| CombatSystem::in_blast(center, t.position.xy(), &weapon))
            .map(|(id, _, _)| id)
            .collect();
        for id in caught {
            self.respawn(id);
        }

        debug!(lobby_id = self.lobby_id, x = center.x, y = center.y, "Bomb detonated");
    }

    fn hit_pawn(&mut self, id: EntityId) {
        let Some(lives) = self.store.pawn(id).map(|p| p.lives) else {
            return;
        };
        self.store.set_lives(id, CombatSystem::apply_hit(lives));
        self.respawn(id);
    }

    fn respawn(&mut self, id: EntityId) {
        if let Some(spawn) = self.store.pawn(id).map(|p| p.spawn_point) {
            self.store.set_xy(id, spawn);
        }
    }

    fn destroy_marked(&mut self) {
        for id in std::mem::take(&mut self.pending_removal) {
            if let Some(network_id) = self.store.despawn(id) {
                self.destroyed.push(network_id);
            }
        }
    }
}
