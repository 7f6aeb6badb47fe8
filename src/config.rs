use crate::error::{Result, WorldError};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const MIN_CHUNK_RADIUS: i32 = 8;
pub const MAX_CHUNK_RADIUS: i32 = 30;

/// Width of the annulus around the active region in which chunks stay
/// resident but idle, so oscillating players do not thrash the pool.
pub const PENDING_FREE_BAND: i32 = 2;

/// Engine configuration.
///
/// Only the knobs the pipeline itself consumes live here; window and input
/// settings belong to the embedding application.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Radius of the active region in chunks, 8..=30.
    pub chunk_radius: i32,
    /// MSAA sample count the embedder should create framebuffers with.
    pub msaa_samples: u32,
    /// Whether the embedder should run an FXAA pass after compositing.
    pub fxaa: bool,
    /// Vertical field of view in degrees, used for frustum culling.
    pub fov_degrees: f32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_radius: 8,
            msaa_samples: 8,
            fxaa: false,
            fov_degrees: 70.0,
        }
    }
}

impl EngineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| WorldError::IoRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config: EngineConfig = toml::from_str(&text).map_err(|e| WorldError::CorruptDelta {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(MIN_CHUNK_RADIUS..=MAX_CHUNK_RADIUS).contains(&self.chunk_radius) {
            return Err(WorldError::BadRadius(self.chunk_radius));
        }
        if ![1, 2, 4, 8, 16].contains(&self.msaa_samples) {
            return Err(WorldError::BadSampleCount(self.msaa_samples));
        }
        Ok(())
    }

    /// Number of chunk slots the pool is created with. Covers the active
    /// region plus the pending-free band with slack for a full region move.
    pub fn chunk_capacity(&self) -> usize {
        let r = (self.chunk_radius + PENDING_FREE_BAND) as usize;
        4 * r * r
    }

    /// Number of vertex buckets and instance slots in the GPU slab.
    pub fn bucket_capacity(&self) -> usize {
        4 * self.chunk_capacity()
    }
}
