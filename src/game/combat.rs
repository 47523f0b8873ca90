//! Combat rules - shooting, projectiles, hits and blasts

use crate::util::vec::Vec2;

/// Weapon and projectile tuning
#[derive(Debug, Clone, Copy)]
pub struct WeaponStats {
    /// Projectile speed (units per second)
    pub projectile_speed: f32,
    /// Cooldown between shots (seconds)
    pub cooldown: f32,
    /// Projectile lifetime (seconds)
    pub max_lifetime: f32,
    /// Distance ahead of the shooter where projectiles appear
    pub spawn_offset: f32,
    /// Projectile box size
    pub projectile_scale: Vec2,
    /// Reach of a bomb detonation
    pub blast_radius: f32,
}

impl Default for WeaponStats {
    fn default() -> Self {
        Self {
            projectile_speed: 800.0,
            cooldown: 0.5,
            max_lifetime: 5.0,
            spawn_offset: 400.0,
            projectile_scale: Vec2::new(20.0, 20.0),
            blast_radius: 500.0,
        }
    }
}

/// Combat system helpers used by the simulation tick
pub struct CombatSystem;

impl CombatSystem {
    /// Check if a pawn can fire (cooldown check)
    pub fn can_fire(last_shot_time: f32, now: f32, stats: &WeaponStats) -> bool {
        now - last_shot_time >= stats.cooldown
    }

    /// Where a projectile aimed along `aim_rotation` appears
    pub fn spawn_position(shooter: Vec2, aim_rotation: f32, stats: &WeaponStats) -> Vec2 {
        shooter + Vec2::from_angle(aim_rotation) * stats.spawn_offset
    }

    /// Position after one step of straight flight
    pub fn advance(position: Vec2, direction: Vec2, speed: f32, dt: f32) -> Vec2 {
        position + direction * (speed * dt)
    }

    pub fn is_expired(spawn_time: f32, now: f32, stats: &WeaponStats) -> bool {
        now - spawn_time > stats.max_lifetime
    }

    /// Lives left after a hit; never below zero
    pub fn apply_hit(lives: u32) -> u32 {
        lives.saturating_sub(1)
    }

    pub fn in_blast(center: Vec2, target: Vec2, stats: &WeaponStats) -> bool {
        center.distance_to(target) <= stats.blast_radius
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown() {
        let stats = WeaponStats::default();
        assert!(CombatSystem::can_fire(-stats.cooldown, 0.0, &stats));
        assert!(!CombatSystem::can_fire(1.0, 1.2, &stats));
        assert!(CombatSystem::can_fire(1.0, 1.5, &stats));
    }

    #[test]
    fn test_spawn_offset_along_aim() {
        let stats = WeaponStats::default();
        let pos = CombatSystem::spawn_position(Vec2::new(100.0, 100.0), std::f32::consts::FRAC_PI_2, &stats);
        assert!((pos.x - 100.0).abs() < 1e-3);
        assert!((pos.y - 500.0).abs() < 1e-3);
    }

    #[test]
    fn test_lives_floor_at_zero() {
        let mut lives = 2;
        for _ in 0..5 {
            lives = CombatSystem::apply_hit(lives);
        }
        assert_eq!(lives, 0);
        assert_eq!(CombatSystem::apply_hit(0), 0);
    }

    #[test]
    fn test_expiry_is_strictly_after_lifetime() {
        let stats = WeaponStats::default();
        assert!(!CombatSystem::is_expired(0.0, 5.0, &stats));
        assert!(CombatSystem::is_expired(0.0, 5.01, &stats));
    }

    #[test]
    fn test_blast_radius_inclusive() {
        let stats = WeaponStats::default();
        assert!(CombatSystem::in_blast(Vec2::ZERO, Vec2::new(500.0, 0.0), &stats));
        assert!(!CombatSystem::in_blast(Vec2::ZERO, Vec2::new(300.0, 400.1), &stats));
    }
}
