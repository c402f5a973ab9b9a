//! GPU buffer management

pub mod chunk_buffer;

pub use chunk_buffer::{ChunkBuffer, GpuDrawArgs, GpuTerrainChunk};
