//! Entity components

use crate::util::vec::{Vec2, Vec3};

/// Tile codes carried in `NetworkTag::kind` for world geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TileKind {
    /// Passable ground
    Floor = 0,
    /// Solid, stops projectiles, cleared by blasts
    Wall = 1,
    /// Solid, turns to floor when shot
    Destructible = 2,
    /// Solid, detonates when shot
    Bomb = 3,
    /// Outer ring, never cleared
    Border = 4,
}

impl TileKind {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            0 => Some(TileKind::Floor),
            1 => Some(TileKind::Wall),
            2 => Some(TileKind::Destructible),
            3 => Some(TileKind::Bomb),
            4 => Some(TileKind::Border),
            _ => None,
        }
    }

    pub fn is_solid(self) -> bool {
        !matches!(self, TileKind::Floor)
    }

    /// Cleared to floor by a bomb blast
    pub fn is_blastable(self) -> bool {
        matches!(self, TileKind::Wall | TileKind::Destructible | TileKind::Bomb)
    }
}

/// Kind code for player pawns
pub const KIND_PAWN: u32 = 100;
/// Kind code for projectiles
pub const KIND_PROJECTILE: u32 = 101;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: f32,
    pub scale: Vec2,
}

impl Transform {
    pub fn new(position: Vec3, scale: Vec2) -> Self {
        Self {
            position,
            rotation: 0.0,
            scale,
        }
    }
}

/// Marks an entity as visible to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetworkTag {
    /// Lobby-unique, assigned monotonically, stable for the entity's lifetime
    pub network_id: u64,
    pub kind: u32,
    /// Changed since the last flush to clients
    pub dirty: bool,
}

/// A connected player's avatar
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pawn {
    pub player_id: u64,
    pub move_forward: bool,
    pub move_backward: bool,
    pub move_left: bool,
    pub move_right: bool,
    pub aim_rotation: f32,
    pub is_shooting: bool,
    pub last_shot_time: f32,
    pub lives: u32,
    pub spawn_point: Vec2,
}

impl Pawn {
    pub fn new(player_id: u64, spawn_point: Vec2, lives: u32, last_shot_time: f32) -> Self {
        Self {
            player_id,
            move_forward: false,
            move_backward: false,
            move_left: false,
            move_right: false,
            aim_rotation: 0.0,
            is_shooting: false,
            last_shot_time,
            lives,
            spawn_point,
        }
    }
}

/// Collidable geometry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RigidBody {
    pub is_solid: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Projectile {
    /// Player id of the shooter
    pub owner_id: u64,
    /// Unit vector
    pub direction: Vec2,
    pub speed: f32,
    pub spawn_time: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tile_codes_roundtrip() {
        for kind in [
            TileKind::Floor,
            TileKind::Wall,
            TileKind::Destructible,
            TileKind::Bomb,
            TileKind::Border,
        ] {
            assert_eq!(TileKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(TileKind::from_code(KIND_PAWN), None);
    }

    #[test]
    fn test_border_survives_blasts() {
        assert!(TileKind::Border.is_solid());
        assert!(!TileKind::Border.is_blastable());
        assert!(TileKind::Bomb.is_blastable());
        assert!(!TileKind::Floor.is_solid());
    }
}
