//! On-disk chunk persistence.
//!
//! A chunk file stores only the blocks that differ from regeneration, one
//! array per region in header order (volume, then the four skirts). The
//! absence of a file means "identical to regeneration", so reverting the
//! last edit deletes the file.
//!
//! Layout, little-endian:
//!
//! ```text
//! u32 block_count
//! u32 front_skirt_count
//! u32 back_skirt_count
//! u32 left_skirt_count
//! u32 right_skirt_count
//! { u16 index, u16 id } * (sum of counts)
//! ```

use crate::error::{Result, WorldError};
use crate::memory::TempArena;
use crate::world::block::Block;
use crate::world::chunk::{BlockVolume, CHUNK_VOLUME, SKIRT_AREA};
use crate::world::generator::{TerrainGenerator, VolumeMut};
use glam::IVec2;
use noise::NoiseFn;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::PathBuf;

const HEADER_BYTES: usize = 20;
const DELTA_BYTES: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, bytemuck::Pod, bytemuck::Zeroable)]
#[repr(C)]
pub struct BlockDelta {
    pub index: u16,
    pub id: u16,
}

pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        std::fs::create_dir_all(&root).map_err(|source| WorldError::IoWrite {
            path: root.clone(),
            source,
        })?;
        Ok(Self { root })
    }

    pub fn chunk_path(&self, coords: IVec2) -> PathBuf {
        self.root.join(format!("chunk_{}_{}.pkg", coords.x, coords.y))
    }

    fn meta_path(&self) -> PathBuf {
        self.root.join("meta")
    }

    /// Seed stored in the world directory, if one exists.
    pub fn read_seed(&self) -> Result<Option<i32>> {
        let path = self.meta_path();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(WorldError::IoRead { path, source }),
        };
        text.trim()
            .parse::<i32>()
            .map(Some)
            .map_err(|_| WorldError::BadMeta { path })
    }

    pub fn write_seed(&self, seed: i32) -> Result<()> {
        let path = self.meta_path();
        std::fs::write(&path, format!("{seed}\n")).map_err(|source| WorldError::IoWrite {
            path,
            source,
        })
    }

    /// Diffs `live` against a fresh regeneration and writes the delta file.
    /// Returns true when a file was written, false when the chunk matched
    /// regeneration and any stale file was removed instead.
    pub fn save_chunk<N: NoiseFn<f64, 2>>(
        &self,
        coords: IVec2,
        live: &BlockVolume,
        generator: &TerrainGenerator<N>,
        temp: &TempArena<'_>,
    ) -> Result<bool> {
        let scratch_blocks: &mut [Block] = temp.alloc_slice(CHUNK_VOLUME);
        let scratch_skirts: [&mut [Block]; 4] =
            std::array::from_fn(|_| temp.alloc_slice::<Block>(SKIRT_AREA));
        let mut scratch = VolumeMut {
            blocks: scratch_blocks,
            skirts: scratch_skirts,
        };
        generator.generate_into(coords, &mut scratch);

        let mut regions: [&mut [BlockDelta]; 5] = [
            temp.alloc_slice(CHUNK_VOLUME),
            temp.alloc_slice(SKIRT_AREA),
            temp.alloc_slice(SKIRT_AREA),
            temp.alloc_slice(SKIRT_AREA),
            temp.alloc_slice(SKIRT_AREA),
        ];
        let mut counts = [0u32; 5];

        diff_region(&live.blocks, &scratch.blocks, &mut regions[0], &mut counts[0]);
        for side in 0..4 {
            diff_region(
                &live.skirts[side],
                &scratch.skirts[side],
                &mut regions[side + 1],
                &mut counts[side + 1],
            );
        }

        let path = self.chunk_path(coords);
        let total: u32 = counts.iter().sum();
        if total == 0 {
            match std::fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => return Err(WorldError::IoWrite { path, source }),
            }
            return Ok(false);
        }

        let io_write = |source| WorldError::IoWrite {
            path: path.clone(),
            source,
        };
        let file = File::create(&path).map_err(io_write)?;
        let mut writer = BufWriter::new(file);
        for count in counts {
            writer.write_all(&count.to_le_bytes()).map_err(io_write)?;
        }
        for (region, &count) in regions.iter().zip(&counts) {
            for delta in &region[..count as usize] {
                writer.write_all(&delta.index.to_le_bytes()).map_err(io_write)?;
                writer.write_all(&delta.id.to_le_bytes()).map_err(io_write)?;
            }
        }
        writer.flush().map_err(io_write)?;
        Ok(true)
    }

    /// Patches an already-generated volume with the chunk's delta file.
    /// Returns false when no file exists.
    pub fn load_chunk(&self, coords: IVec2, volume: &mut BlockVolume) -> Result<bool> {
        let path = self.chunk_path(coords);
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(source) => return Err(WorldError::IoRead { path, source }),
        };
        let corrupt = |reason: &str| WorldError::CorruptDelta {
            path: path.clone(),
            reason: reason.to_string(),
        };

        if bytes.len() < HEADER_BYTES {
            return Err(corrupt("file shorter than header"));
        }
        let mut counts = [0usize; 5];
        for (i, count) in counts.iter_mut().enumerate() {
            let offset = i * 4;
            *count =
                u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()) as usize;
        }
        let total: usize = counts.iter().sum();
        if HEADER_BYTES + total * DELTA_BYTES != bytes.len() {
            return Err(corrupt("delta counts disagree with file size"));
        }

        let mut cursor = HEADER_BYTES;
        let mut next_delta = || {
            let index = u16::from_le_bytes(bytes[cursor..cursor + 2].try_into().unwrap());
            let id = u16::from_le_bytes(bytes[cursor + 2..cursor + 4].try_into().unwrap());
            cursor += DELTA_BYTES;
            BlockDelta { index, id }
        };

        for _ in 0..counts[0] {
            let delta = next_delta();
            volume.blocks[delta.index as usize] = Block { id: delta.id };
        }
        for side in 0..4 {
            for _ in 0..counts[side + 1] {
                let delta = next_delta();
                if delta.index as usize >= SKIRT_AREA {
                    return Err(corrupt("skirt delta index out of range"));
                }
                volume.skirts[side][delta.index as usize] = Block { id: delta.id };
            }
        }
        Ok(true)
    }

}

fn diff_region(live: &[Block], original: &[Block], out: &mut [BlockDelta], count: &mut u32) {
    debug_assert_eq!(live.len(), original.len());
    for (index, (live_block, original_block)) in live.iter().zip(original).enumerate() {
        if live_block.id != original_block.id {
            out[*count as usize] = BlockDelta {
                index: index as u16,
                id: live_block.id,
            };
            *count += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::Arena;
    use crate::world::block::BlockId;
    use crate::world::chunk::block_index;
    use glam::IVec3;

    fn arena() -> Arena {
        // Scratch volume + skirts + worst-case delta arrays.
        Arena::new(2 * 1024 * 1024)
    }

    #[test]
    fn unmodified_chunk_writes_no_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).unwrap();
        let generator = TerrainGenerator::new(11);
        let coords = IVec2::new(1, 2);

        let mut volume = BlockVolume::new();
        generator.generate(coords, &mut volume);

        let mut arena = arena();
        let written = arena
            .with_temp(|temp| store.save_chunk(coords, &volume, &generator, temp))
            .unwrap();
        assert!(!written);
        assert!(!store.chunk_path(coords).exists());
    }

    #[test]
    fn single_edit_produces_minimal_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).unwrap();
        let generator = TerrainGenerator::new(0);
        let coords = IVec2::new(1, 2);

        let mut volume = BlockVolume::new();
        generator.generate(coords, &mut volume);
        let edit = IVec3::new(7, 151, 4);
        volume.set_block(edit, Block::new(BlockId::Stone));

        let mut arena = arena();
        assert!(arena
            .with_temp(|temp| store.save_chunk(coords, &volume, &generator, temp))
            .unwrap());

        let bytes = std::fs::read(store.chunk_path(coords)).unwrap();
        assert_eq!(bytes.len(), HEADER_BYTES + DELTA_BYTES);
        assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1);
        for skirt_count in 1..5 {
            let offset = skirt_count * 4;
            assert_eq!(
                u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap()),
                0
            );
        }
        let index = u16::from_le_bytes(bytes[20..22].try_into().unwrap());
        let id = u16::from_le_bytes(bytes[22..24].try_into().unwrap());
        assert_eq!(index as usize, block_index(edit));
        assert_eq!(index, 151 * 256 + 4 * 16 + 7);
        assert_eq!(id, BlockId::Stone as u16);

        // Reverting the edit removes the file again.
        volume.set_block(edit, block_at_generated(&generator, coords, edit));
        assert!(!arena
            .with_temp(|temp| store.save_chunk(coords, &volume, &generator, temp))
            .unwrap());
        assert!(!store.chunk_path(coords).exists());
    }

    fn block_at_generated(
        generator: &TerrainGenerator,
        coords: IVec2,
        block: IVec3,
    ) -> Block {
        let mut volume = BlockVolume::new();
        generator.generate(coords, &mut volume);
        volume.block(block)
    }

    #[test]
    fn save_load_roundtrip_restores_edits() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).unwrap();
        let generator = TerrainGenerator::new(99);
        let coords = IVec2::new(-4, 9);

        let mut volume = BlockVolume::new();
        generator.generate(coords, &mut volume);
        let edits = [
            (IVec3::new(0, 120, 0), BlockId::Glowstone),
            (IVec3::new(15, 254, 15), BlockId::Glass),
            (IVec3::new(8, 100, 8), BlockId::Air),
        ];
        for (at, id) in edits {
            volume.set_block(at, Block::new(id));
        }
        volume.set_skirt_block(crate::world::chunk::Skirt::Left, 33, 2, Block::new(BlockId::Sand));

        let mut arena = arena();
        assert!(arena
            .with_temp(|temp| store.save_chunk(coords, &volume, &generator, temp))
            .unwrap());

        let mut restored = BlockVolume::new();
        generator.generate(coords, &mut restored);
        assert!(store.load_chunk(coords, &mut restored).unwrap());

        assert_eq!(volume.blocks, restored.blocks);
        for side in 0..4 {
            assert_eq!(volume.skirts[side], restored.skirts[side]);
        }
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).unwrap();
        let mut volume = BlockVolume::new();
        assert!(!store.load_chunk(IVec2::new(5, 5), &mut volume).unwrap());
    }

    #[test]
    fn truncated_file_is_reported_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).unwrap();
        let coords = IVec2::new(0, 0);
        // Header claims one delta but provides none.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 16]);
        std::fs::write(store.chunk_path(coords), bytes).unwrap();

        let mut volume = BlockVolume::new();
        assert!(matches!(
            store.load_chunk(coords, &mut volume),
            Err(WorldError::CorruptDelta { .. })
        ));
    }

    #[test]
    fn seed_meta_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChunkStore::new(dir.path()).unwrap();
        assert_eq!(store.read_seed().unwrap(), None);
        store.write_seed(-1234).unwrap();
        assert_eq!(store.read_seed().unwrap(), Some(-1234));
    }
}
