//! Per-lobby entity store
//!
//! Components live in parallel typed arenas keyed by a stable entity index.
//! Indices are never reused within a lobby, so a stale `EntityId` can only
//! miss, never alias another entity. Every entity is networked: spawning
//! attaches a `Transform` and a `NetworkTag` with a fresh network id.
//! Writes through the store's setters mark the tag dirty when the value
//! actually changes.

use std::collections::BTreeMap;

use crate::util::vec::{Vec2, Vec3};
use crate::ws::protocol::EntityState;

use super::components::{NetworkTag, Pawn, Projectile, RigidBody, Transform};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntityId(u32);

#[derive(Debug, Default)]
pub struct EntityStore {
    next_index: u32,
    next_network_id: u64,
    transforms: BTreeMap<EntityId, Transform>,
    tags: BTreeMap<EntityId, NetworkTag>,
    pawns: BTreeMap<EntityId, Pawn>,
    bodies: BTreeMap<EntityId, RigidBody>,
    projectiles: BTreeMap<EntityId, Projectile>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self {
            next_network_id: 1,
            ..Default::default()
        }
    }

    /// Create a networked entity. It starts dirty.
    pub fn spawn(&mut self, transform: Transform, kind: u32) -> EntityId {
        let id = EntityId(self.next_index);
        self.next_index += 1;

        let network_id = self.next_network_id;
        self.next_network_id += 1;

        self.transforms.insert(id, transform);
        self.tags.insert(
            id,
            NetworkTag {
                network_id,
                kind,
                dirty: true,
            },
        );
        id
    }

    pub fn insert_pawn(&mut self, id: EntityId, pawn: Pawn) {
        if self.contains(id) {
            self.pawns.insert(id, pawn);
        }
    }

    pub fn insert_body(&mut self, id: EntityId, body: RigidBody) {
        if self.contains(id) {
            self.bodies.insert(id, body);
        }
    }

    pub fn insert_projectile(&mut self, id: EntityId, projectile: Projectile) {
        if self.contains(id) {
            self.projectiles.insert(id, projectile);
        }
    }

    /// Remove an entity and all its components. Returns its network id.
    pub fn despawn(&mut self, id: EntityId) -> Option<u64> {
        self.transforms.remove(&id);
        self.pawns.remove(&id);
        self.bodies.remove(&id);
        self.projectiles.remove(&id);
        self.tags.remove(&id).map(|tag| tag.network_id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.tags.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn transform(&self, id: EntityId) -> Option<&Transform> {
        self.transforms.get(&id)
    }

    pub fn tag(&self, id: EntityId) -> Option<&NetworkTag> {
        self.tags.get(&id)
    }

    pub fn pawn(&self, id: EntityId) -> Option<&Pawn> {
        self.pawns.get(&id)
    }

    /// Mutable pawn access. Input flags are not networked, so this does not
    /// dirty the entity; use `set_lives` for the networked field.
    pub fn pawn_mut(&mut self, id: EntityId) -> Option<&mut Pawn> {
        self.pawns.get_mut(&id)
    }

    pub fn projectile(&self, id: EntityId) -> Option<&Projectile> {
        self.projectiles.get(&id)
    }

    pub fn mark_dirty(&mut self, id: EntityId) {
        if let Some(tag) = self.tags.get_mut(&id) {
            tag.dirty = true;
        }
    }

    pub fn set_position(&mut self, id: EntityId, position: Vec3) {
        let changed = match self.transforms.get_mut(&id) {
            Some(t) if t.position != position => {
                t.position = position;
                true
            }
            _ => false,
        };
        if changed {
            self.mark_dirty(id);
        }
    }

    /// Move on the play plane, keeping the entity's layer
    pub fn set_xy(&mut self, id: EntityId, xy: Vec2) {
        if let Some(z) = self.transforms.get(&id).map(|t| t.position.z) {
            self.set_position(id, Vec3::from_xy(xy, z));
        }
    }

    pub fn set_rotation(&mut self, id: EntityId, rotation: f32) {
        let changed = match self.transforms.get_mut(&id) {
            Some(t) if t.rotation != rotation => {
                t.rotation = rotation;
                true
            }
            _ => false,
        };
        if changed {
            self.mark_dirty(id);
        }
    }

    pub fn set_kind(&mut self, id: EntityId, kind: u32) {
        if let Some(tag) = self.tags.get_mut(&id) {
            if tag.kind != kind {
                tag.kind = kind;
                tag.dirty = true;
            }
        }
    }

    pub fn set_solid(&mut self, id: EntityId, is_solid: bool) {
        let changed = match self.bodies.get_mut(&id) {
            Some(body) if body.is_solid != is_solid => {
                body.is_solid = is_solid;
                true
            }
            _ => false,
        };
        if changed {
            self.mark_dirty(id);
        }
    }

    pub fn set_lives(&mut self, id: EntityId, lives: u32) {
        let changed = match self.pawns.get_mut(&id) {
            Some(pawn) if pawn.lives != lives => {
                pawn.lives = lives;
                true
            }
            _ => false,
        };
        if changed {
            self.mark_dirty(id);
        }
    }

    pub fn projectile_ids(&self) -> Vec<EntityId> {
        self.projectiles.keys().copied().collect()
    }

    pub fn body_ids(&self) -> Vec<EntityId> {
        self.bodies.keys().copied().collect()
    }

    /// Transforms of every entity whose RigidBody is solid
    pub fn solid_bodies(&self) -> impl Iterator<Item = (EntityId, &Transform)> + '_ {
        self.bodies
            .iter()
            .filter(|(_, body)| body.is_solid)
            .filter_map(|(id, _)| self.transforms.get(id).map(|t| (*id, t)))
    }

    pub fn projectiles(&self) -> impl Iterator<Item = (EntityId, &Transform)> + '_ {
        self.projectiles
            .keys()
            .filter_map(|id| self.transforms.get(id).map(|t| (*id, t)))
    }

    pub fn pawns(&self) -> impl Iterator<Item = (EntityId, &Pawn, &Transform)> + '_ {
        self.pawns
            .iter()
            .filter_map(|(id, pawn)| self.transforms.get(id).map(|t| (*id, pawn, t)))
    }

    /// Networked view of one entity
    pub fn entity_state(&self, id: EntityId) -> Option<EntityState> {
        let tag = self.tags.get(&id)?;
        let transform = self.transforms.get(&id)?;
        let pawn = self.pawns.get(&id);
        Some(EntityState {
            network_id: tag.network_id,
            kind: tag.kind,
            position: [
                transform.position.x,
                transform.position.y,
                transform.position.z,
            ],
            rotation: transform.rotation,
            scale: [transform.scale.x, transform.scale.y],
            player_id: pawn.map(|p| p.player_id),
            lives: pawn.map(|p| p.lives),
        })
    }

    /// Collect entity states (all, or dirty only) and clear every dirty flag
    pub fn flush(&mut self, include_clean: bool) -> Vec<EntityState> {
        let ids: Vec<EntityId> = self
            .tags
            .iter()
            .filter(|(_, tag)| include_clean || tag.dirty)
            .map(|(id, _)| *id)
            .collect();

        let states = ids.iter().filter_map(|id| self.entity_state(*id)).collect();

        for tag in self.tags.values_mut() {
            tag.dirty = false;
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::TileKind;

    fn tile(store: &mut EntityStore, x: f32) -> EntityId {
        let id = store.spawn(
            Transform::new(Vec3::new(x, 0.0, 0.0), Vec2::new(200.0, 200.0)),
            TileKind::Wall.code(),
        );
        store.insert_body(id, RigidBody { is_solid: true });
        id
    }

    #[test]
    fn test_network_ids_are_monotonic_and_not_reused() {
        let mut store = EntityStore::new();
        let a = tile(&mut store, 0.0);
        let b = tile(&mut store, 200.0);
        let a_net = store.tag(a).unwrap().network_id;
        let b_net = store.tag(b).unwrap().network_id;
        assert!(b_net > a_net);

        assert_eq!(store.despawn(a), Some(a_net));
        assert_eq!(store.despawn(a), None);
        let c = tile(&mut store, 400.0);
        assert!(store.tag(c).unwrap().network_id > b_net);
        assert_ne!(c, a);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_setters_only_dirty_on_change() {
        let mut store = EntityStore::new();
        let id = tile(&mut store, 0.0);
        store.flush(false);

        store.set_position(id, Vec3::new(0.0, 0.0, 0.0));
        store.set_solid(id, true);
        store.set_kind(id, TileKind::Wall.code());
        assert!(!store.tag(id).unwrap().dirty);

        store.set_kind(id, TileKind::Floor.code());
        assert!(store.tag(id).unwrap().dirty);
    }

    #[test]
    fn test_components_require_live_entity() {
        let mut store = EntityStore::new();
        let id = tile(&mut store, 0.0);
        store.despawn(id);
        store.insert_body(id, RigidBody { is_solid: true });
        assert_eq!(store.solid_bodies().count(), 0);
        assert!(store.body_ids().is_empty());
    }

    #[test]
    fn test_flush_clears_dirty() {
        let mut store = EntityStore::new();
        tile(&mut store, 0.0);
        tile(&mut store, 200.0);

        assert_eq!(store.flush(false).len(), 2);
        assert!(store.flush(false).is_empty());
        assert_eq!(store.flush(true).len(), 2);
    }
}
