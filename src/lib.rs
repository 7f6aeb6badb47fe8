//! Stratum: a chunk-pipeline voxel engine core.
//!
//! The crate covers the concurrent chunk pipeline of a blocks-in-chunks
//! sandbox: region residency, deterministic generation, delta persistence,
//! sky/emissive lighting, sub-chunk meshing with ambient occlusion, GPU
//! bucket management, and indirect draw command assembly. Windowing, input
//! and the GL context belong to the embedding application; the engine hands
//! it command lists and mapped-buffer contents each frame.

pub mod config;
pub mod containers;
pub mod error;
pub mod jobs;
pub mod memory;
pub mod render;
pub mod world;

/// Commonly used engine types.
pub mod prelude {
    pub use crate::config::EngineConfig;
    pub use crate::error::{Result, WorldError};
    pub use crate::render::{DrawElementsIndirectCommand, FrameCommands};
    pub use crate::world::{BlockFace, BlockId, BlockQuery, SelectedBlock, World, WorldStats};

    pub use glam::{IVec2, IVec3, Vec3};
}

/// Current engine version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
