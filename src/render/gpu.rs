//! The GPU seam used by the page table, streaming pipeline and coordinator
//!
//! Everything that touches GPU memory goes through [`TerrainGpu`]. The wgpu
//! implementation records compute passes and indirect draws; the software
//! implementation runs the same kernels on the host so headless hosts and
//! tests can inspect page contents directly.

use crate::core::types::{Result, Vec4};
use crate::render::buffer::GpuTerrainChunk;
use crate::streaming::asset::TextureAsset;
use crate::virtual_texture::{CombinePlan, PageLayout, PageLookup};

/// The three textures of one base surface material
#[derive(Clone, Copy, Debug)]
pub struct SurfaceLayer<'a> {
    pub albedo_occlusion: &'a TextureAsset,
    pub normal: &'a TextureAsset,
    pub smoothness_metallic: &'a TextureAsset,
}

pub trait TerrainGpu {
    /// Whatever the backend needs from the host to record a draw
    type DrawContext<'a>;

    /// Allocate the physical page arrays. Returns the slot count actually
    /// allocated, which may be lower than requested on small devices.
    fn allocate_pages(&mut self, capacity: u32, layout: PageLayout) -> Result<u32>;

    /// Fill one surface array layer; `None` writes the default surface
    fn upload_surface_layer(&mut self, layer: u32, surface: Option<SurfaceLayer<'_>>) -> Result<()>;

    /// Number of surface layers the colour composite blends
    fn set_surface_count(&mut self, count: u32);

    /// Blend surfaces into the colour channels of `slot` using `mask`, or
    /// write the default colour channels when the mask is missing
    fn composite_color(&mut self, slot: u32, mask: Option<&TextureAsset>) -> Result<()>;

    /// Resample `height` into the height channel of `slot`, or write the default
    fn composite_height(&mut self, slot: u32, height: Option<&TextureAsset>) -> Result<()>;

    /// Downsample four child slots into the target slot of `plan`
    fn combine_pages(&mut self, plan: &CombinePlan) -> Result<()>;

    fn publish_lookup(&mut self, lookup: &PageLookup);

    fn chunk_capacity(&self) -> usize;

    /// Grow the chunk buffer to at least `capacity`
    fn reserve_chunks(&mut self, capacity: usize) -> Result<()>;

    fn upload_chunks(&mut self, chunks: &[GpuTerrainChunk]);

    /// Cull the uploaded chunks against six planes and issue one indirect draw
    fn draw(&mut self, ctx: &mut Self::DrawContext<'_>, planes: &[Vec4; 6], pass: usize) -> Result<()>;

    /// Free every GPU resource. Further calls are no-ops.
    fn release(&mut self);
}
