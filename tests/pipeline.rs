//! End-to-end pipeline scenarios through the public API: residency,
//! persistence, cross-chunk lighting, selection, and eviction.

use glam::{IVec2, IVec3, Vec3};
use stratum::config::EngineConfig;
use stratum::memory::Arena;
use stratum::world::chunk::BlockVolume;
use stratum::world::{BlockFace, BlockId, ChunkStore, TerrainGenerator, World};

const SETTLE_TICKS: usize = 4000;

fn test_config() -> EngineConfig {
    EngineConfig {
        chunk_radius: 8,
        ..Default::default()
    }
}

fn spawn_position() -> Vec3 {
    Vec3::new(8.0, 200.0, 8.0)
}

fn look_down() -> Vec3 {
    Vec3::new(0.0, -1.0, 0.1)
}

fn settled_world(dir: &std::path::Path, seed: i32) -> World {
    let mut world = World::init(test_config(), seed, dir).expect("world init");
    assert!(
        world.tick_until_idle(spawn_position(), look_down(), SETTLE_TICKS),
        "pipeline did not settle"
    );
    world
}

#[test]
fn region_loads_lights_and_meshes() {
    let dir = tempfile::tempdir().unwrap();
    let mut world = settled_world(dir.path(), 0);

    let stats = world.stats();
    // 17x17 active region fully resident.
    assert!(stats.resident_chunks >= 17 * 17);
    assert!(stats.buckets_used > 0);
    assert!(stats.vertex_bytes_used > 0);

    let commands = world.tick(spawn_position(), look_down());
    assert!(!commands.opaque.is_empty(), "terrain below should draw");

    // The surface block under the player resolves and is not air.
    let generator = TerrainGenerator::new(0);
    let height = generator.height_at(IVec2::ZERO, 8, 8);
    let surface = world
        .query_block(Vec3::new(8.5, height as f32 + 0.5, 8.5))
        .expect("surface block resident");
    assert_eq!(surface.block.id, BlockId::Grass as u16);
    let above = world
        .query_block(Vec3::new(8.5, 254.5, 8.5))
        .expect("air block resident");
    assert!(above.block.is_air());
}

#[test]
fn delta_save_is_minimal_and_reverts() {
    let dir = tempfile::tempdir().unwrap();
    let mut world = settled_world(dir.path(), 0);

    let chunk_coords = IVec2::new(1, 2);
    let edit = IVec3::new(7, 151, 4);

    let generator = TerrainGenerator::new(0);
    let mut reference = BlockVolume::new();
    generator.generate(chunk_coords, &mut reference);
    let original = reference.block(edit);
    assert_ne!(original.id, BlockId::Stone as u16);

    assert!(world.set_block(chunk_coords, edit, BlockId::Stone as u16));
    world.save_all();

    let path = dir.path().join("chunk_1_2.pkg");
    let bytes = std::fs::read(&path).expect("delta file written");
    assert_eq!(bytes.len(), 24);
    assert_eq!(u32::from_le_bytes(bytes[0..4].try_into().unwrap()), 1);
    assert_eq!(&bytes[4..20], &[0u8; 16]);
    let index = u16::from_le_bytes(bytes[20..22].try_into().unwrap());
    let id = u16::from_le_bytes(bytes[22..24].try_into().unwrap());
    assert_eq!(index, 151 * 256 + 4 * 16 + 7);
    assert_eq!(id, BlockId::Stone as u16);

    // Reverting the edit erases the file: no file means "as generated".
    assert!(world.set_block(chunk_coords, edit, original.id));
    world.save_all();
    assert!(!path.exists());
}

#[test]
fn glowstone_light_crosses_chunk_borders() {
    let dir = tempfile::tempdir().unwrap();

    // Seed the world directory with a delta placing a glowstone on the
    // border column of chunk (0,0), high above the terrain.
    {
        let store = ChunkStore::new(dir.path()).unwrap();
        let generator = TerrainGenerator::new(0);
        let mut volume = BlockVolume::new();
        generator.generate(IVec2::ZERO, &mut volume);
        volume.set_block(
            IVec3::new(15, 252, 8),
            stratum::world::Block::new(BlockId::Glowstone),
        );
        let mut arena = Arena::new(2 * 1024 * 1024);
        arena
            .with_temp(|temp| store.save_chunk(IVec2::ZERO, &volume, &generator, temp))
            .unwrap();
    }

    let world = settled_world(dir.path(), 0);

    let source_at = |x: f32| {
        world
            .query_light(Vec3::new(x, 252.5, 8.5))
            .expect("lit block resident")
            .1
    };
    assert_eq!(source_at(15.5), 15);
    assert_eq!(source_at(14.5), 14);
    // Across the border into chunk (1,0).
    assert_eq!(source_at(16.5), 14);
    assert_eq!(source_at(17.5), 13);
}

#[test]
fn select_block_reports_entry_face_and_hit_point() {
    let dir = tempfile::tempdir().unwrap();
    let world = settled_world(dir.path(), 0);

    let generator = TerrainGenerator::new(0);
    let height = generator.height_at(IVec2::ZERO, 8, 8);

    // Looking straight down onto the grass surface.
    let origin = Vec3::new(8.5, height as f32 + 5.0, 8.5);
    let selected = world
        .select_block(origin, Vec3::new(0.0, -1.0, 0.0), 10.0)
        .expect("terrain within reach");
    assert_eq!(selected.query.block.id, BlockId::Grass as u16);
    assert_eq!(selected.query.local_coords, IVec3::new(8, height, 8));
    assert_eq!(selected.face, Some(BlockFace::Top));
    assert!((selected.hit_point.y - (height as f32 + 1.0)).abs() < 1e-3);

    // A ray starting inside a block reports that block with no entry face.
    let buried = Vec3::new(8.5, height as f32 - 2.5, 8.5);
    let inside = world
        .select_block(buried, Vec3::new(0.0, 0.0, -1.0), 5.0)
        .expect("buried block");
    assert_eq!(inside.face, None);
    assert_eq!(inside.hit_point, buried);
    assert_eq!(inside.query.block.id, BlockId::Dirt as u16);

    // Looking up from above the world finds nothing.
    assert!(world
        .select_block(Vec3::new(8.5, 254.0, 8.5), Vec3::new(0.0, 1.0, 0.0), 5.0)
        .is_none());
}

#[test]
fn teleport_evicts_saves_and_reloads() {
    let dir = tempfile::tempdir().unwrap();
    let mut world = settled_world(dir.path(), 0);

    // Dirty one chunk so eviction has to serialize it.
    let edited_chunk = IVec2::new(2, 0);
    let edit = IVec3::new(1, 240, 1);
    assert!(world.set_block(edited_chunk, edit, BlockId::Stone as u16));

    // One-tick teleport far outside the old region.
    let far_position = Vec3::new(100.0 * 16.0 + 8.0, 200.0, 8.0);
    assert!(
        world.tick_until_idle(far_position, look_down(), SETTLE_TICKS),
        "pipeline did not settle after teleport"
    );

    // Old region fully drained: nothing resident there, pool refilled.
    assert!(world.query_block(spawn_position()).is_none());
    let stats = world.stats();
    assert!(stats.resident_chunks <= 21 * 21);
    assert!(stats.chunk_slots_free > 0);

    // The dirty chunk was serialized on its way out.
    assert!(dir.path().join("chunk_2_0.pkg").exists());

    // Walking back reloads the edit from disk.
    assert!(
        world.tick_until_idle(spawn_position(), look_down(), SETTLE_TICKS),
        "pipeline did not settle after returning"
    );
    let reloaded = world
        .query_block(Vec3::new(
            (edited_chunk.x * 16 + edit.x) as f32 + 0.5,
            edit.y as f32 + 0.5,
            (edited_chunk.y * 16 + edit.z) as f32 + 0.5,
        ))
        .expect("edited chunk resident again");
    assert_eq!(reloaded.block.id, BlockId::Stone as u16);
}

#[test]
fn reopened_world_keeps_seed_and_edits() {
    let dir = tempfile::tempdir().unwrap();
    let edit_position = Vec3::new(4.5, 230.5, 4.5);

    {
        let mut world = settled_world(dir.path(), 1234);
        assert!(world.set_block(IVec2::ZERO, IVec3::new(4, 230, 4), BlockId::Glass as u16));
        world.save_all();
        world.shutdown();
    }

    // A different requested seed must lose to the stored meta.
    let mut world = World::init(test_config(), 999, dir.path()).expect("world reopen");
    assert_eq!(world.seed(), 1234);
    assert!(
        world.tick_until_idle(spawn_position(), look_down(), SETTLE_TICKS),
        "pipeline did not settle after reopen"
    );
    let block = world
        .query_block(edit_position)
        .expect("edited block resident");
    assert_eq!(block.block.id, BlockId::Glass as u16);
}
