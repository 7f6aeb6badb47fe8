//! Deterministic terrain generation.
//!
//! A 16x16 height map drives block assignment per column; the same height
//! rule is re-evaluated for the edge strips of the four neighbouring chunks
//! to fill the skirts, which is what lets a chunk mesh before its
//! neighbours exist.

use crate::world::block::{Block, BlockId};
use crate::world::chunk::{
    block_index, skirt_index, BlockVolume, CHUNK_DEPTH, CHUNK_HEIGHT, CHUNK_VOLUME, CHUNK_WIDTH,
    SKIRTS,
};
use glam::IVec2;
use noise::{NoiseFn, Perlin};

pub const MIN_TERRAIN_HEIGHT: i32 = 100;
pub const MAX_TERRAIN_HEIGHT: i32 = 250;
pub const WATER_LEVEL: i32 = MIN_TERRAIN_HEIGHT + 50;

const OCTAVE_SCALES: [f64; 5] = [0.002, 0.005, 0.04, 0.015, 0.004];
const OCTAVE_WEIGHTS: [f64; 5] = [0.6, 0.2, 0.05, 0.1, 0.05];

/// Mutable views over the block arrays of one chunk, so generation can
/// target either a live chunk or scratch slices from a worker arena.
pub struct VolumeMut<'a> {
    pub blocks: &'a mut [Block],
    pub skirts: [&'a mut [Block]; 4],
}

impl<'a> VolumeMut<'a> {
    pub fn of_volume(volume: &'a mut BlockVolume) -> Self {
        let [front, back, left, right] = &mut volume.skirts;
        Self {
            blocks: &mut volume.blocks,
            skirts: [front, back, left, right],
        }
    }
}

pub struct TerrainGenerator<N = Perlin> {
    source: N,
    seed: i32,
}

impl TerrainGenerator<Perlin> {
    pub fn new(seed: i32) -> Self {
        Self {
            source: Perlin::new(seed as u32),
            seed,
        }
    }
}

impl<N: NoiseFn<f64, 2>> TerrainGenerator<N> {
    /// Generator with a custom noise source; tests use `noise::Constant`.
    pub fn with_source(source: N, seed: i32) -> Self {
        Self { source, seed }
    }

    pub fn seed(&self) -> i32 {
        self.seed
    }

    fn sample_point(&self, chunk: IVec2, x: i32, z: i32) -> [f64; 2] {
        [
            self.seed as f64 + (chunk.x * CHUNK_WIDTH + x) as f64 + 0.5,
            self.seed as f64 + (chunk.y * CHUNK_DEPTH + z) as f64 + 0.5,
        ]
    }

    fn noise01(&self, point: [f64; 2]) -> f64 {
        let mut noise = 0.0;
        for (scale, weight) in OCTAVE_SCALES.iter().zip(OCTAVE_WEIGHTS) {
            let value = self.source.get([point[0] * scale, point[1] * scale]);
            noise += (value + 1.0) * 0.5 * weight;
        }
        noise
    }

    /// Terrain height for one column, in [MIN_TERRAIN_HEIGHT, MAX_TERRAIN_HEIGHT].
    pub fn height_at(&self, chunk: IVec2, x: i32, z: i32) -> i32 {
        let noise = self.noise01(self.sample_point(chunk, x, z));
        MIN_TERRAIN_HEIGHT + ((MAX_TERRAIN_HEIGHT - MIN_TERRAIN_HEIGHT) as f64 * noise) as i32
    }

    /// Fills a live chunk volume.
    pub fn generate(&self, coords: IVec2, volume: &mut BlockVolume) {
        self.generate_into(coords, &mut VolumeMut::of_volume(volume));
    }

    /// Fills any set of chunk-shaped block slices.
    pub fn generate_into(&self, coords: IVec2, out: &mut VolumeMut<'_>) {
        debug_assert_eq!(out.blocks.len(), CHUNK_VOLUME);

        let mut height_map = [[0i32; CHUNK_WIDTH as usize]; CHUNK_DEPTH as usize];
        for z in 0..CHUNK_DEPTH {
            for x in 0..CHUNK_WIDTH {
                height_map[z as usize][x as usize] = self.height_at(coords, x, z);
            }
        }

        for y in 0..CHUNK_HEIGHT {
            for z in 0..CHUNK_DEPTH {
                for x in 0..CHUNK_WIDTH {
                    let height = height_map[z as usize][x as usize];
                    out.blocks[block_index(glam::IVec3::new(x, y, z))] =
                        block_for_height(y, height);
                }
            }
        }

        for skirt in SKIRTS {
            let neighbour = coords + skirt.neighbour_offset();
            for i in 0..CHUNK_WIDTH {
                let edge = skirt.neighbour_edge_coords(0, i);
                let height = self.height_at(neighbour, edge.x, edge.z);
                for y in 0..CHUNK_HEIGHT {
                    out.skirts[skirt as usize][skirt_index(y, i)] = block_for_height(y, height);
                }
            }
        }
    }
}

/// Height-based block assignment; grass wins over water at the surface.
pub fn block_for_height(y: i32, height: i32) -> Block {
    if y > height {
        if y < WATER_LEVEL {
            Block::new(BlockId::Water)
        } else {
            Block::AIR
        }
    } else if y == height {
        Block::new(BlockId::Grass)
    } else {
        Block::new(BlockId::Dirt)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;
    use noise::Constant;

    #[test]
    fn generation_is_deterministic() {
        let a = TerrainGenerator::new(42);
        let b = TerrainGenerator::new(42);
        let coords = IVec2::new(-7, 13);

        let mut va = BlockVolume::new();
        let mut vb = BlockVolume::new();
        a.generate(coords, &mut va);
        b.generate(coords, &mut vb);

        assert_eq!(va.blocks, vb.blocks);
        for side in 0..4 {
            assert_eq!(va.skirts[side], vb.skirts[side]);
        }
    }

    #[test]
    fn different_seeds_differ() {
        let a = TerrainGenerator::new(1);
        let b = TerrainGenerator::new(2);
        let mut va = BlockVolume::new();
        let mut vb = BlockVolume::new();
        a.generate(IVec2::ZERO, &mut va);
        b.generate(IVec2::ZERO, &mut vb);
        assert_ne!(va.blocks, vb.blocks);
    }

    #[test]
    fn skirts_match_neighbour_edges() {
        let generator = TerrainGenerator::new(7);
        let coords = IVec2::new(2, -5);

        let mut volume = BlockVolume::new();
        generator.generate(coords, &mut volume);

        for skirt in SKIRTS {
            let mut neighbour_volume = BlockVolume::new();
            generator.generate(coords + skirt.neighbour_offset(), &mut neighbour_volume);

            for y in (0..CHUNK_HEIGHT).step_by(13) {
                for i in 0..CHUNK_WIDTH {
                    let edge = skirt.neighbour_edge_coords(y, i);
                    assert_eq!(
                        volume.skirt_block(skirt, y, i),
                        neighbour_volume.block(edge),
                        "skirt {skirt:?} y={y} i={i}"
                    );
                }
            }
        }
    }

    #[test]
    fn constant_noise_gives_flat_terrain() {
        // Constant 0 maps each octave to 0.5, so height = 100 + 150/2 = 175.
        let generator = TerrainGenerator::with_source(Constant::new(0.0), 0);
        assert_eq!(generator.height_at(IVec2::ZERO, 0, 0), 175);

        let mut volume = BlockVolume::new();
        generator.generate(IVec2::ZERO, &mut volume);

        for z in 0..CHUNK_DEPTH {
            for x in 0..CHUNK_WIDTH {
                assert_eq!(volume.block(IVec3::new(x, 175, z)), Block::new(BlockId::Grass));
                assert_eq!(volume.block(IVec3::new(x, 100, z)), Block::new(BlockId::Dirt));
                assert!(volume.block(IVec3::new(x, 176, z)).is_air());
                assert!(volume.block(IVec3::new(x, 255, z)).is_air());
            }
        }
    }

    #[test]
    fn low_terrain_floods_to_water_level() {
        // Constant -1 maps every octave to 0, so height = 100.
        let generator = TerrainGenerator::with_source(Constant::new(-1.0), 0);
        let mut volume = BlockVolume::new();
        generator.generate(IVec2::ZERO, &mut volume);

        let column = |y| volume.block(IVec3::new(8, y, 8));
        assert_eq!(column(100), Block::new(BlockId::Grass));
        assert_eq!(column(101), Block::new(BlockId::Water));
        assert_eq!(column(WATER_LEVEL - 1), Block::new(BlockId::Water));
        assert!(column(WATER_LEVEL).is_air());
    }
}
