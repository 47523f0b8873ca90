//! Persistence for players and match results

pub mod memory;
pub mod players;
pub mod supabase;

pub use memory::MemoryStore;
pub use players::{MatchRecord, NewPlayer, PlayerRecord, SupabasePlayers};
pub use supabase::{SupabaseClient, SupabaseError};

use crate::config::Config;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Username already taken")]
    UsernameTaken,

    #[error("Player {0} not found")]
    NotFound(u64),

    #[error(transparent)]
    Supabase(#[from] SupabaseError),
}

impl StoreError {
    /// A unique violation on the players table is a taken username
    fn from_player_insert(e: SupabaseError) -> Self {
        if e.is_conflict() {
            StoreError::UsernameTaken
        } else {
            StoreError::Supabase(e)
        }
    }
}

/// Player store backend
#[derive(Clone)]
pub enum PlayerStore {
    Memory(MemoryStore),
    Supabase(SupabasePlayers),
}

impl PlayerStore {
    /// Supabase when credentials are configured, memory otherwise
    pub fn from_config(config: &Config) -> Self {
        match config.supabase() {
            Some((url, key)) => PlayerStore::Supabase(SupabasePlayers::new(SupabaseClient::new(url, key))),
            None => PlayerStore::Memory(MemoryStore::new()),
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            PlayerStore::Memory(_) => "memory",
            PlayerStore::Supabase(_) => "supabase",
        }
    }

    pub async fn create_player(&self, player: NewPlayer) -> Result<PlayerRecord, StoreError> {
        match self {
            PlayerStore::Memory(m) => m.create_player(player),
            PlayerStore::Supabase(s) => s
                .create_player(&player)
                .await
                .map_err(StoreError::from_player_insert),
        }
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<PlayerRecord>, StoreError> {
        match self {
            PlayerStore::Memory(m) => Ok(m.find_by_username(username)),
            PlayerStore::Supabase(s) => Ok(s.find_by_username(username).await?),
        }
    }

    pub async fn get_player(&self, id: u64) -> Result<Option<PlayerRecord>, StoreError> {
        match self {
            PlayerStore::Memory(m) => Ok(m.get_player(id)),
            PlayerStore::Supabase(s) => Ok(s.get_player(id).await?),
        }
    }

    pub async fn update_player(&self, player: &PlayerRecord) -> Result<(), StoreError> {
        match self {
            PlayerStore::Memory(m) => m.update_player(player),
            PlayerStore::Supabase(s) => Ok(s.update_player(player).await?),
        }
    }

    pub async fn set_match(&self, id: u64, match_id: Option<u64>) -> Result<(), StoreError> {
        match self {
            PlayerStore::Memory(m) => m.set_match(id, match_id),
            PlayerStore::Supabase(s) => Ok(s.set_match(id, match_id).await?),
        }
    }

    pub async fn record_match(&self, record: &MatchRecord) -> Result<(), StoreError> {
        match self {
            PlayerStore::Memory(m) => {
                m.record_match(record);
                Ok(())
            }
            PlayerStore::Supabase(s) => Ok(s.record_match(record).await?),
        }
    }
}
