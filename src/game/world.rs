//! Arena layout generation
//!
//! Produces a rectangular tile grid from a seed. Only the grid matters to the
//! simulation; the generator itself is deliberately simple.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

use crate::util::vec::Vec2;

use super::components::TileKind;

/// World units per tile edge
pub const TILE_SIZE: f32 = 200.0;

pub const DEFAULT_WIDTH: usize = 15;
pub const DEFAULT_HEIGHT: usize = 11;

const WALL_CHANCE: f64 = 0.10;
const DESTRUCTIBLE_CHANCE: f64 = 0.22;
const BOMB_CHANCE: f64 = 0.04;

/// Generated arena
#[derive(Debug, Clone)]
pub struct TileMap {
    width: usize,
    height: usize,
    tiles: Vec<TileKind>,
}

impl TileMap {
    /// Border ring, random interior, and four clear corner spawn areas.
    /// Dimensions below 5x5 are raised to 5x5.
    pub fn generate(seed: u64, width: usize, height: usize) -> Self {
        let width = width.max(5);
        let height = height.max(5);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);

        let mut tiles = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let kind = if x == 0 || y == 0 || x == width - 1 || y == height - 1 {
                    TileKind::Border
                } else {
                    let roll: f64 = rng.gen();
                    if roll < WALL_CHANCE {
                        TileKind::Wall
                    } else if roll < WALL_CHANCE + DESTRUCTIBLE_CHANCE {
                        TileKind::Destructible
                    } else if roll < WALL_CHANCE + DESTRUCTIBLE_CHANCE + BOMB_CHANCE {
                        TileKind::Bomb
                    } else {
                        TileKind::Floor
                    }
                };
                tiles.push(kind);
            }
        }

        let mut map = Self {
            width,
            height,
            tiles,
        };
        map.clear_spawn_areas();
        map
    }

    fn set(&mut self, x: usize, y: usize, kind: TileKind) {
        if x < self.width && y < self.height {
            self.tiles[y * self.width + x] = kind;
        }
    }

    /// Inner corner tiles, in spawn assignment order
    pub fn spawn_tiles(&self) -> [(usize, usize); 4] {
        let (w, h) = (self.width, self.height);
        [(1, 1), (w - 2, h - 2), (w - 2, 1), (1, h - 2)]
    }

    /// World positions of the spawn tiles
    pub fn spawn_points(&self) -> Vec<Vec2> {
        self.spawn_tiles()
            .iter()
            .map(|&(x, y)| tile_center(x, y))
            .collect()
    }

    /// Every tile with its grid coordinates
    pub fn iter(&self) -> impl Iterator<Item = (usize, usize, TileKind)> + '_ {
        self.tiles
            .iter()
            .enumerate()
            .map(move |(i, kind)| (i % self.width, i / self.width, *kind))
    }

    /// Keep each spawn tile and its orthogonal neighbours walkable
    fn clear_spawn_areas(&mut self) {
        for (x, y) in self.spawn_tiles() {
            let neighbours = [(x, y), (x + 1, y), (x - 1, y), (x, y + 1), (x, y - 1)];
            for (nx, ny) in neighbours {
                if nx > 0 && ny > 0 && nx < self.width - 1 && ny < self.height - 1 {
                    self.set(nx, ny, TileKind::Floor);
                }
            }
        }
    }
}

/// World position of a tile's center
pub fn tile_center(x: usize, y: usize) -> Vec2 {
    Vec2::new(x as f32 * TILE_SIZE, y as f32 * TILE_SIZE)
}
