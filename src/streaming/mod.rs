//! Asset loading and the cooperative page streaming pipeline

pub mod asset;
pub mod loader;
pub mod metadata;
pub mod pipeline;

pub use asset::{AssetKind, AssetStore, DirectoryAssetStore, MemoryAssetStore, TexelData, TextureAsset};
pub use loader::{AssetLoader, AssetTicket};
pub use metadata::TerrainMetadata;
pub use pipeline::{PipelineStats, StreamingPipeline};
