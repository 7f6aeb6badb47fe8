pub mod block;
pub mod chunk;
pub mod core;
pub mod generator;
pub mod lighting;
pub mod mesher;
pub mod pool;
pub mod storage;
pub mod view;

pub use block::{Block, BlockFace, BlockId};
pub use chunk::{Chunk, ChunkState};
pub use core::{BlockQuery, RegionBounds, SelectedBlock, World, WorldStats};
pub use generator::TerrainGenerator;
pub use storage::ChunkStore;
