//! Pawn movement and AABB collision

use crate::util::vec::{Vec2, Vec3};

use super::components::Pawn;

/// Mover half-extent as a fraction of its scale. Smaller than the obstacle
/// factor so pawns slip past corners instead of snagging.
pub const MOVER_EXTENT_FACTOR: f32 = 0.4;
/// Obstacle (and projectile/hitbox) half-extent as a fraction of scale
pub const BODY_EXTENT_FACTOR: f32 = 0.5;

/// Axis-aligned bounding box
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec2,
    pub max: Vec2,
}

impl Aabb {
    pub fn from_center(center: Vec2, half_extent: Vec2) -> Self {
        Self {
            min: center - half_extent,
            max: center + half_extent,
        }
    }

    /// Strict overlap; boxes that only touch do not collide
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
    }
}

/// Physics system for moving pawns through solid geometry
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Shrunk box used for a moving pawn
    pub fn mover_bounds(center: Vec2, scale: Vec2) -> Aabb {
        Aabb::from_center(center, scale * MOVER_EXTENT_FACTOR)
    }

    /// Full box used for obstacles, projectiles and hit tests
    pub fn body_bounds(center: Vec2, scale: Vec2) -> Aabb {
        Aabb::from_center(center, scale * BODY_EXTENT_FACTOR)
    }

    /// Per-tick displacement from a pawn's movement flags.
    /// Forward is +y, right is +x. Diagonals are normalized.
    pub fn movement_delta(pawn: &Pawn, speed: f32, dt: f32) -> Vec2 {
        let mut dir = Vec2::ZERO;
        if pawn.move_forward {
            dir.y += 1.0;
        }
        if pawn.move_backward {
            dir.y -= 1.0;
        }
        if pawn.move_right {
            dir.x += 1.0;
        }
        if pawn.move_left {
            dir.x -= 1.0;
        }
        dir.normalize() * (speed * dt)
    }

    /// Apply `delta` one axis at a time. Each axis step is reverted in full
    /// if the mover would overlap any obstacle, so a blocked axis does not
    /// stop motion along the other one.
    pub fn move_axis_separated(position: Vec3, delta: Vec2, scale: Vec2, obstacles: &[Aabb]) -> Vec3 {
        let blocked = |center: Vec2| {
            let bounds = Self::mover_bounds(center, scale);
            obstacles.iter().any(|o| bounds.overlaps(o))
        };

        let mut current = position.xy();

        if delta.x != 0.0 {
            let candidate = Vec2::new(current.x + delta.x, current.y);
            if !blocked(candidate) {
                current = candidate;
            }
        }

        if delta.y != 0.0 {
            let candidate = Vec2::new(current.x, current.y + delta.y);
            if !blocked(candidate) {
                current = candidate;
            }
        }

        Vec3::from_xy(current, position.z)
    }
}
