//! Snapshot building

use crate::ws::protocol::EntitySnapshot;

use super::entity::EntityStore;

/// Builds dirty-only snapshots for network transmission
#[derive(Debug, Default)]
pub struct SnapshotBuilder {
    /// First flush carries every entity
    sent_initial: bool,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect dirty entities (all entities the first time), clear their
    /// dirty flags and attach the network ids destroyed since the last build
    pub fn build(&mut self, tick: u64, store: &mut EntityStore, deleted: Vec<u64>) -> EntitySnapshot {
        let full = !self.sent_initial;
        self.sent_initial = true;

        EntitySnapshot {
            tick,
            full,
            entities: store.flush(full),
            deleted_entities: deleted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::components::{RigidBody, TileKind, Transform};
    use crate::util::vec::{Vec2, Vec3};

    fn store_with_tiles(n: usize) -> EntityStore {
        let mut store = EntityStore::new();
        for i in 0..n {
            let id = store.spawn(
                Transform::new(Vec3::new(i as f32 * 200.0, 0.0, 0.0), Vec2::new(200.0, 200.0)),
                TileKind::Destructible.code(),
            );
            store.insert_body(id, RigidBody { is_solid: true });
        }
        store
    }

    #[test]
    fn test_first_build_is_full() {
        let mut store = store_with_tiles(3);
        store.flush(false);
        let mut builder = SnapshotBuilder::new();

        let snapshot = builder.build(1, &mut store, vec![]);
        assert!(snapshot.full);
        assert_eq!(snapshot.entities.len(), 3);
    }

    #[test]
    fn test_consecutive_flushes_are_idempotent() {
        let mut store = store_with_tiles(3);
        let mut builder = SnapshotBuilder::new();

        builder.build(1, &mut store, vec![]);
        let second = builder.build(2, &mut store, vec![]);
        assert!(!second.full);
        assert!(second.is_empty());
    }

    #[test]
    fn test_delta_carries_only_changes() {
        let mut store = store_with_tiles(3);
        let mut builder = SnapshotBuilder::new();
        builder.build(1, &mut store, vec![]);

        let ids = store.body_ids();
        store.set_kind(ids[1], TileKind::Floor.code());
        let gone = store.despawn(ids[2]).unwrap();

        let delta = builder.build(2, &mut store, vec![gone]);
        assert_eq!(delta.entities.len(), 1);
        assert_eq!(delta.entities[0].kind, TileKind::Floor.code());
        assert_eq!(delta.deleted_entities, vec![gone]);
    }
}
