//! Player and match rows

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rating::Rating;

use super::supabase::{SupabaseClient, SupabaseError};

const PLAYERS_TABLE: &str = "Players";
const MATCHES_TABLE: &str = "Matches";

/// Stored player row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRecord {
    pub id: u64,
    pub username: String,
    /// sha256 hex of `username:password`
    pub password: String,
    pub mmr: i64,
    pub glicko_rating: f64,
    pub rating_deviation: f64,
    pub volatility: f64,
    #[serde(default)]
    pub wins: u32,
    #[serde(default)]
    pub losses: u32,
    pub match_id: Option<u64>,
}

impl PlayerRecord {
    pub fn rating(&self) -> Rating {
        Rating {
            rating: self.glicko_rating,
            deviation: self.rating_deviation,
            volatility: self.volatility,
            wins: self.wins,
            losses: self.losses,
        }
    }

    /// Copy an updated rating into the row; mmr follows the rounded rating
    pub fn apply_rating(&mut self, rating: &Rating) {
        self.glicko_rating = rating.rating;
        self.rating_deviation = rating.deviation;
        self.volatility = rating.volatility;
        self.wins = rating.wins;
        self.losses = rating.losses;
        self.mmr = rating.rating.round() as i64;
    }
}

/// Player row for insertion; the id is assigned by the store
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewPlayer {
    pub username: String,
    pub password: String,
    pub mmr: i64,
    pub glicko_rating: f64,
    pub rating_deviation: f64,
    pub volatility: f64,
    pub wins: u32,
    pub losses: u32,
}

impl NewPlayer {
    /// Fresh account at the default rating
    pub fn new(username: &str, password_hash: String) -> Self {
        let rating = Rating::default();
        Self {
            username: username.to_string(),
            password: password_hash,
            mmr: rating.rating.round() as i64,
            glicko_rating: rating.rating,
            rating_deviation: rating.deviation,
            volatility: rating.volatility,
            wins: 0,
            losses: 0,
        }
    }

    pub fn into_record(self, id: u64) -> PlayerRecord {
        PlayerRecord {
            id,
            username: self.username,
            password: self.password,
            mmr: self.mmr,
            glicko_rating: self.glicko_rating,
            rating_deviation: self.rating_deviation,
            volatility: self.volatility,
            wins: self.wins,
            losses: self.losses,
            match_id: None,
        }
    }
}

/// Completed match row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRecord {
    pub id: u64,
    pub timestamp: DateTime<Utc>,
    /// Lobby quality at formation
    pub glicko_match_weight: f64,
    /// Winner's account; None when the winner played without one
    pub winner_id: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MatchAssignment {
    match_id: Option<u64>,
}

/// Player/match tables behind PostgREST
#[derive(Clone)]
pub struct SupabasePlayers {
    client: SupabaseClient,
}

impl SupabasePlayers {
    pub fn new(client: SupabaseClient) -> Self {
        Self { client }
    }

    pub async fn create_player(&self, player: &NewPlayer) -> Result<PlayerRecord, SupabaseError> {
        self.client.insert(PLAYERS_TABLE, player).await
    }

    pub async fn find_by_username(&self, username: &str) -> Result<Option<PlayerRecord>, SupabaseError> {
        let query = format!("username=eq.{}", username);
        self.client.get_one(PLAYERS_TABLE, &query).await
    }

    pub async fn get_player(&self, id: u64) -> Result<Option<PlayerRecord>, SupabaseError> {
        let query = format!("id=eq.{}", id);
        self.client.get_one(PLAYERS_TABLE, &query).await
    }

    pub async fn update_player(&self, player: &PlayerRecord) -> Result<(), SupabaseError> {
        let query = format!("id=eq.{}", player.id);
        self.client.update(PLAYERS_TABLE, &query, player).await
    }

    pub async fn set_match(&self, id: u64, match_id: Option<u64>) -> Result<(), SupabaseError> {
        let query = format!("id=eq.{}", id);
        self.client
            .update(PLAYERS_TABLE, &query, &MatchAssignment { match_id })
            .await
    }

    /// Write the match row; retries overwrite it
    pub async fn record_match(&self, record: &MatchRecord) -> Result<(), SupabaseError> {
        self.client.upsert(MATCHES_TABLE, record, "id").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_uses_column_names() {
        let record = NewPlayer::new("ace1", "hash".into()).into_record(4);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["glickoRating"], 1500.0);
        assert_eq!(json["ratingDeviation"], 350.0);
        assert_eq!(json["mmr"], 1500);
        assert!(json["matchId"].is_null());
    }

    #[test]
    fn test_apply_rating_rounds_mmr() {
        let mut record = NewPlayer::new("ace1", "hash".into()).into_record(1);
        record.apply_rating(&Rating {
            rating: 1612.6,
            deviation: 200.0,
            volatility: 0.059,
            wins: 1,
            losses: 0,
        });
        assert_eq!(record.mmr, 1613);
        assert_eq!(record.rating().wins, 1);
    }
}
