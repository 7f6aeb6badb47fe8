use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by the chunk pipeline.
///
/// None of these abort the tick: I/O and corruption faults are logged and the
/// affected chunk falls back to its regenerated state or retries on a later
/// frame. Pool or slab exhaustion is a sizing bug and panics instead of
/// returning a value.
#[derive(Debug, Error)]
pub enum WorldError {
    #[error("failed to read {}: {source}", path.display())]
    IoRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to write {}: {source}", path.display())]
    IoWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("corrupt chunk delta {}: {reason}", path.display())]
    CorruptDelta { path: PathBuf, reason: String },

    #[error("world meta file {} is not a valid seed", path.display())]
    BadMeta { path: PathBuf },

    #[error("chunk radius {0} outside the supported range 8..=30")]
    BadRadius(i32),

    #[error("msaa sample count {0} is not one of 1, 2, 4, 8, 16")]
    BadSampleCount(u32),
}

pub type Result<T> = std::result::Result<T, WorldError>;
