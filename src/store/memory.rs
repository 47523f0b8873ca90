//! In-process player store used when no database is configured

use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;

use super::players::{MatchRecord, NewPlayer, PlayerRecord};
use super::StoreError;

#[derive(Default)]
struct Tables {
    players: BTreeMap<u64, PlayerRecord>,
    matches: BTreeMap<u64, MatchRecord>,
    next_id: u64,
    #[cfg(test)]
    failing_updates: std::collections::BTreeSet<u64>,
}

impl Tables {
    #[cfg(test)]
    fn take_failure(&mut self, id: u64) -> bool {
        self.failing_updates.remove(&id)
    }

    #[cfg(not(test))]
    fn take_failure(&mut self, _id: u64) -> bool {
        false
    }
}

#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_player(&self, player: NewPlayer) -> Result<PlayerRecord, StoreError> {
        let mut tables = self.tables.write();
        if tables.players.values().any(|p| p.username == player.username) {
            return Err(StoreError::UsernameTaken);
        }
        tables.next_id += 1;
        let record = player.into_record(tables.next_id);
        tables.players.insert(record.id, record.clone());
        Ok(record)
    }

    pub fn find_by_username(&self, username: &str) -> Option<PlayerRecord> {
        self.tables
            .read()
            .players
            .values()
            .find(|p| p.username == username)
            .cloned()
    }

    pub fn get_player(&self, id: u64) -> Option<PlayerRecord> {
        self.tables.read().players.get(&id).cloned()
    }

    pub fn update_player(&self, player: &PlayerRecord) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        if tables.take_failure(player.id) {
            return Err(StoreError::NotFound(player.id));
        }
        let slot = tables
            .players
            .get_mut(&player.id)
            .ok_or(StoreError::NotFound(player.id))?;
        *slot = player.clone();
        Ok(())
    }

    pub fn set_match(&self, id: u64, match_id: Option<u64>) -> Result<(), StoreError> {
        let mut tables = self.tables.write();
        let slot = tables.players.get_mut(&id).ok_or(StoreError::NotFound(id))?;
        slot.match_id = match_id;
        Ok(())
    }

    pub fn record_match(&self, record: &MatchRecord) {
        self.tables.write().matches.insert(record.id, record.clone());
    }

    pub fn get_match(&self, id: u64) -> Option<MatchRecord> {
        self.tables.read().matches.get(&id).cloned()
    }

    /// Make the next update of player `id` fail
    #[cfg(test)]
    pub fn fail_next_update(&self, id: u64) {
        self.tables.write().failing_updates.insert(id);
    }
}
