//! GPU side of the terrain: the backend seam and its implementations

pub mod buffer;
pub mod context;
pub mod gpu;
pub mod pipeline;
pub mod software;
pub mod texture;
pub mod wgpu_backend;

pub use buffer::{ChunkBuffer, GpuDrawArgs, GpuTerrainChunk};
pub use context::GpuContext;
pub use gpu::{SurfaceLayer, TerrainGpu};
pub use software::{DrawRecord, GpuOp, SoftwareTerrainGpu};
pub use wgpu_backend::{WgpuDrawContext, WgpuTerrainGpu};
