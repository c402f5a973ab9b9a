//! Terrastream - quadtree-driven virtual texture streaming for large terrains
//!
//! A [`Terrain`] owns a LOD quadtree, a page table over a fixed pool of GPU
//! texture slots and a streaming pipeline that fills those slots from an
//! [`AssetStore`](streaming::AssetStore). GPU work goes through the
//! [`TerrainGpu`] trait: [`WgpuTerrainGpu`] renders with wgpu and
//! [`SoftwareTerrainGpu`] runs the same kernels on the CPU.

pub mod core;
pub mod math;
pub mod quadtree;
pub mod render;
pub mod streaming;
pub mod terrain;
pub mod virtual_texture;

pub use crate::core::{Error, Result, TerrainConfig};
pub use quadtree::QuadTree;
pub use render::{SoftwareTerrainGpu, TerrainGpu, WgpuTerrainGpu};
pub use streaming::{AssetLoader, DirectoryAssetStore, MemoryAssetStore, StreamingPipeline};
pub use terrain::{Terrain, TerrainRegistry};
pub use virtual_texture::VirtualTexture;
