//! Error types for terrain streaming

use thiserror::Error;

/// Main error type for the crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("GPU error: {0}")]
    Gpu(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Asset error: {key}: {reason}")]
    Asset { key: String, reason: String },

    #[error("Metadata error: {0}")]
    Metadata(String),

    #[error("Page pool exhausted: {capacity} slots in use")]
    PoolExhausted { capacity: u32 },

    #[error("Terrain '{0}' is already active")]
    AlreadyActive(String),
}
