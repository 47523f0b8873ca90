//! Wire types for client-server communication

use serde::{Deserialize, Serialize};

/// Game modes players can queue for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameMode {
    /// 1v1
    #[serde(rename = "HEX_DUEL")]
    Duel,
    /// Four-player free for all
    #[serde(rename = "HEX_ARENA")]
    Arena,
}

impl GameMode {
    /// Players needed to fill a lobby of this mode
    pub fn required_players(self) -> usize {
        match self {
            GameMode::Duel => 2,
            GameMode::Arena => 4,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            GameMode::Duel => "HEX_DUEL",
            GameMode::Arena => "HEX_ARENA",
        }
    }
}

/// Per-tick control state sent by a client. Latest message wins.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PlayerInput {
    pub move_forward: bool,
    pub move_backward: bool,
    pub move_left: bool,
    pub move_right: bool,
    /// Aim direction in radians
    pub aim_rotation: f32,
    pub is_shooting: bool,
}

/// Message sent from client to server over the persistent channel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientMsg {
    pub player_id: u64,
    pub input: PlayerInput,
}

/// Networked view of one entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityState {
    pub network_id: u64,
    /// Tile code or entity kind
    pub kind: u32,
    pub position: [f32; 3],
    pub rotation: f32,
    pub scale: [f32; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    pub player_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lives: Option<u32>,
}

/// Entity changes for one tick. `full` snapshots carry every live entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub tick: u64,
    pub full: bool,
    pub entities: Vec<EntityState>,
    pub deleted_entities: Vec<u64>,
}

impl EntitySnapshot {
    /// Nothing changed and nothing was deleted
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.deleted_entities.is_empty()
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Sent once after the channel opens
    Welcome(Welcome),

    /// Player was placed in a lobby
    MatchJoined(MatchJoined),

    /// Dirty-only (or full) entity state
    Snapshot(EntitySnapshot),

    /// Lobby closed after its result was recorded
    MatchEnded(MatchEnded),

    /// Error message
    Error(ErrorMsg),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Welcome {
    pub player_id: u64,
    pub server_time: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchJoined {
    pub match_id: u64,
    pub mode: GameMode,
    pub members: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchEnded {
    pub match_id: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMsg {
    pub code: String,
    pub message: String,
}

impl ErrorMsg {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_mode_wire_names() {
        assert_eq!(serde_json::to_string(&GameMode::Duel).unwrap(), "\"HEX_DUEL\"");
        let mode: GameMode = serde_json::from_str("\"HEX_ARENA\"").unwrap();
        assert_eq!(mode, GameMode::Arena);
        assert!(serde_json::from_str::<GameMode>("\"HEX_SOLO\"").is_err());
    }

    #[test]
    fn test_client_msg_parses_camel_case() {
        let msg: ClientMsg = serde_json::from_str(
            r#"{"playerId":42,"input":{"moveForward":true,"moveLeft":true,"aimRotation":1.5,"isShooting":true}}"#,
        )
        .unwrap();
        assert_eq!(msg.player_id, 42);
        assert!(msg.input.move_forward && msg.input.move_left);
        assert!(!msg.input.move_backward);
        assert_eq!(msg.input.aim_rotation, 1.5);
        assert!(msg.input.is_shooting);
    }

    #[test]
    fn test_snapshot_message_shape() {
        let msg = ServerMsg::Snapshot(EntitySnapshot {
            tick: 7,
            full: false,
            entities: vec![EntityState {
                network_id: 3,
                kind: 2,
                position: [200.0, 400.0, 0.0],
                rotation: 0.0,
                scale: [200.0, 200.0],
                player_id: None,
                lives: None,
            }],
            deleted_entities: vec![9],
        });
        let json: serde_json::Value = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "snapshot");
        assert_eq!(json["deletedEntities"][0], 9);
        assert_eq!(json["entities"][0]["networkId"], 3);
        assert!(json["entities"][0].get("playerId").is_none());
    }
}
