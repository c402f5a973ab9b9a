//! Host-side reference implementation of [`TerrainGpu`]
//!
//! Stores every page channel as `[f32; 4]` texels and runs the composite,
//! combine and cull kernels on the CPU. Meant for small page resolutions:
//! headless tools and tests.

use crate::core::config::TerrainConfig;
use crate::core::error::Error;
use crate::core::types::{Result, Vec4};
use crate::math::{Aabb, Frustum};
use crate::render::buffer::GpuTerrainChunk;
use crate::render::gpu::{SurfaceLayer, TerrainGpu};
use crate::streaming::asset::TextureAsset;
use crate::virtual_texture::{CombinePlan, PageLayout, PageLookup, TextureChannel};

/// Operation log entry, in submission order
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GpuOp {
    SurfaceLayer { layer: u32, default: bool },
    SurfaceCount(u32),
    Color { slot: u32, decoded: bool },
    Height { slot: u32, decoded: bool },
    Combine { target: u32 },
    Lookup,
    ReserveChunks(usize),
    UploadChunks(usize),
    Draw { pass: usize, instances: u32 },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DrawRecord {
    pub pass: usize,
    pub vertex_count: u32,
    pub instance_count: u32,
}

pub struct SoftwareTerrainGpu {
    layout: PageLayout,
    capacity: u32,
    /// Per channel, `capacity` pages of `res * res` texels
    pages: [Vec<[f32; 4]>; 4],
    /// Per layer: albedo, normal, smoothness/metallic at colour resolution
    surfaces: Vec<[Vec<[f32; 4]>; 3]>,
    surface_count: u32,
    surface_tiling: f32,
    lookup: Option<PageLookup>,
    chunks: Vec<GpuTerrainChunk>,
    chunk_capacity: usize,
    chunk_reallocations: u32,
    visible: Vec<u32>,
    vertex_count: u32,
    draws: Vec<DrawRecord>,
    ops: Vec<GpuOp>,
    released: bool,
}

impl SoftwareTerrainGpu {
    pub fn new(config: &TerrainConfig) -> Self {
        Self {
            layout: PageLayout {
                height_resolution: config.height_resolution,
                color_resolution: config.color_resolution,
                surface_layers: 1,
            },
            capacity: 0,
            pages: Default::default(),
            surfaces: Vec::new(),
            surface_count: 0,
            surface_tiling: config.surface_tiling,
            lookup: None,
            chunks: Vec::new(),
            chunk_capacity: 0,
            chunk_reallocations: 0,
            visible: Vec::new(),
            vertex_count: 6 * config.planar_resolution * config.planar_resolution,
            draws: Vec::new(),
            ops: Vec::new(),
            released: false,
        }
    }

    fn check_slot(&self, slot: u32) -> Result<()> {
        if self.released {
            return Err(Error::Gpu("terrain GPU resources were released".into()));
        }
        if slot >= self.capacity {
            return Err(Error::Gpu(format!(
                "page slot {} out of range (capacity {})",
                slot, self.capacity
            )));
        }
        Ok(())
    }

    fn page_range(&self, channel: TextureChannel, slot: u32) -> std::ops::Range<usize> {
        let res = self.layout.resolution(channel) as usize;
        let start = slot as usize * res * res;
        start..start + res * res
    }

    /// All texels of one page channel, row-major
    pub fn page(&self, channel: TextureChannel, slot: u32) -> &[[f32; 4]] {
        &self.pages[channel.index()][self.page_range(channel, slot)]
    }

    pub fn texel(&self, channel: TextureChannel, slot: u32, x: u32, y: u32) -> [f32; 4] {
        let res = self.layout.resolution(channel);
        self.page(channel, slot)[(y * res + x) as usize]
    }

    fn fill_page(&mut self, channel: TextureChannel, slot: u32, value: [f32; 4]) {
        let range = self.page_range(channel, slot);
        self.pages[channel.index()][range].fill(value);
    }

    fn write_page(&mut self, channel: TextureChannel, slot: u32, texels: Vec<[f32; 4]>) {
        let range = self.page_range(channel, slot);
        self.pages[channel.index()][range].copy_from_slice(&texels);
    }

    fn surface_texel(&self, layer: usize, channel: usize, x: u32, y: u32) -> [f32; 4] {
        let res = self.layout.color_resolution;
        let tile = |c: u32| {
            let u = ((c as f32 + 0.5) / res as f32 * self.surface_tiling).fract();
            ((u * res as f32) as u32).min(res - 1)
        };
        self.surfaces[layer][channel][(tile(y) * res + tile(x)) as usize]
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn surface_count(&self) -> u32 {
        self.surface_count
    }

    /// Last published lookup
    pub fn lookup(&self) -> Option<&PageLookup> {
        self.lookup.as_ref()
    }

    pub fn chunks(&self) -> &[GpuTerrainChunk] {
        &self.chunks
    }

    pub fn chunk_reallocations(&self) -> u32 {
        self.chunk_reallocations
    }

    /// Chunk indices that survived the last cull
    pub fn visible(&self) -> &[u32] {
        &self.visible
    }

    pub fn draws(&self) -> &[DrawRecord] {
        &self.draws
    }

    pub fn ops(&self) -> &[GpuOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl TerrainGpu for SoftwareTerrainGpu {
    type DrawContext<'a> = ();

    fn allocate_pages(&mut self, capacity: u32, layout: PageLayout) -> Result<u32> {
        self.layout = PageLayout {
            surface_layers: layout.surface_layers.max(1),
            ..layout
        };
        self.capacity = capacity;
        for channel in TextureChannel::ALL {
            let res = layout.resolution(channel) as usize;
            self.pages[channel.index()] =
                vec![[0.0; 4]; capacity as usize * res * res];
        }
        let surface_texels = (layout.color_resolution * layout.color_resolution) as usize;
        self.surfaces = (0..self.layout.surface_layers)
            .map(|_| {
                TextureChannel::COLOR.map(|c| vec![c.default_value(); surface_texels])
            })
            .collect();
        self.released = false;
        log::info!(
            "Allocated {} software page slots ({} KB)",
            capacity,
            capacity as u64 * self.layout.slot_bytes() / 1024
        );
        Ok(capacity)
    }

    fn upload_surface_layer(&mut self, layer: u32, surface: Option<SurfaceLayer<'_>>) -> Result<()> {
        let Some(textures) = self.surfaces.get_mut(layer as usize) else {
            return Err(Error::Gpu(format!("surface layer {} out of range", layer)));
        };
        let res = self.layout.color_resolution;
        match surface {
            Some(s) => {
                textures[0] = s.albedo_occlusion.resample(res);
                textures[1] = s.normal.resample(res);
                textures[2] = s.smoothness_metallic.resample(res);
            }
            None => {
                for (texels, channel) in textures.iter_mut().zip(TextureChannel::COLOR) {
                    texels.fill(channel.default_value());
                }
            }
        }
        self.ops.push(GpuOp::SurfaceLayer { layer, default: surface.is_none() });
        Ok(())
    }

    fn set_surface_count(&mut self, count: u32) {
        self.surface_count = count.min(self.surfaces.len() as u32);
        self.ops.push(GpuOp::SurfaceCount(count));
    }

    fn composite_color(&mut self, slot: u32, mask: Option<&TextureAsset>) -> Result<()> {
        self.check_slot(slot)?;
        let mask = mask.filter(|m| !m.is_empty());
        self.ops.push(GpuOp::Color { slot, decoded: mask.is_some() });

        let Some(mask) = mask else {
            for channel in TextureChannel::COLOR {
                self.fill_page(channel, slot, channel.default_value());
            }
            return Ok(());
        };

        let res = self.layout.color_resolution;
        let weights = mask.resample(res);
        let active = (self.surface_count as usize).min(4);
        let mut out: [Vec<[f32; 4]>; 3] = Default::default();

        for y in 0..res {
            for x in 0..res {
                let w = weights[(y * res + x) as usize];
                let total: f32 = w[..active].iter().sum();
                for (c, channel) in TextureChannel::COLOR.iter().enumerate() {
                    let value = if total <= 0.0 {
                        channel.default_value()
                    } else {
                        let mut acc = [0.0f32; 4];
                        for (layer, weight) in w[..active].iter().enumerate() {
                            let s = self.surface_texel(layer, c, x, y);
                            for k in 0..4 {
                                acc[k] += s[k] * weight / total;
                            }
                        }
                        acc
                    };
                    out[c].push(value);
                }
            }
        }

        for (texels, channel) in out.into_iter().zip(TextureChannel::COLOR) {
            self.write_page(channel, slot, texels);
        }
        Ok(())
    }

    fn composite_height(&mut self, slot: u32, height: Option<&TextureAsset>) -> Result<()> {
        self.check_slot(slot)?;
        let height = height.filter(|h| !h.is_empty());
        self.ops.push(GpuOp::Height { slot, decoded: height.is_some() });

        match height {
            Some(asset) => {
                let texels = asset
                    .resample(self.layout.height_resolution)
                    .into_iter()
                    .map(|t| [t[0], 0.0, 0.0, 0.0])
                    .collect();
                self.write_page(TextureChannel::Height, slot, texels);
            }
            None => {
                let value = TextureChannel::Height.default_value();
                self.fill_page(TextureChannel::Height, slot, value);
            }
        }
        Ok(())
    }

    fn combine_pages(&mut self, plan: &CombinePlan) -> Result<()> {
        self.check_slot(plan.target)?;
        for slot in plan.children.iter().flatten() {
            self.check_slot(*slot)?;
        }
        self.ops.push(GpuOp::Combine { target: plan.target });

        for channel in TextureChannel::ALL {
            let res = self.layout.resolution(channel);
            let half = res / 2;
            let mut texels = Vec::with_capacity((res * res) as usize);
            for y in 0..res {
                for x in 0..res {
                    let quadrant = (x >= half) as usize | (((y >= half) as usize) << 1);
                    let value = match plan.children[quadrant] {
                        None => channel.default_value(),
                        Some(child) => {
                            // 2x2 box filter over the child's texels
                            let cx = (x % half.max(1)) * 2;
                            let cy = (y % half.max(1)) * 2;
                            let mut acc = [0.0f32; 4];
                            for (dx, dy) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
                                let t = self.texel(
                                    channel,
                                    child,
                                    (cx + dx).min(res - 1),
                                    (cy + dy).min(res - 1),
                                );
                                for k in 0..4 {
                                    acc[k] += t[k] * 0.25;
                                }
                            }
                            acc
                        }
                    };
                    texels.push(value);
                }
            }
            self.write_page(channel, plan.target, texels);
        }
        Ok(())
    }

    fn publish_lookup(&mut self, lookup: &PageLookup) {
        self.lookup = Some(lookup.clone());
        self.ops.push(GpuOp::Lookup);
    }

    fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    fn reserve_chunks(&mut self, capacity: usize) -> Result<()> {
        if capacity > self.chunk_capacity {
            log::info!(
                "Growing terrain chunk buffer {} -> {} chunks",
                self.chunk_capacity,
                capacity
            );
            let mut grown = Vec::with_capacity(capacity);
            grown.extend_from_slice(&self.chunks);
            self.chunks = grown;
            self.chunk_capacity = capacity;
            self.chunk_reallocations += 1;
            self.ops.push(GpuOp::ReserveChunks(capacity));
        }
        Ok(())
    }

    fn upload_chunks(&mut self, chunks: &[GpuTerrainChunk]) {
        let count = chunks.len().min(self.chunk_capacity);
        self.chunks.clear();
        self.chunks.extend_from_slice(&chunks[..count]);
        self.ops.push(GpuOp::UploadChunks(count));
    }

    fn draw(&mut self, _ctx: &mut (), planes: &[Vec4; 6], pass: usize) -> Result<()> {
        if self.released {
            return Err(Error::Gpu("terrain GPU resources were released".into()));
        }
        let frustum = Frustum::from_planes(planes);
        self.visible = self
            .chunks
            .iter()
            .enumerate()
            .filter(|(_, c)| {
                frustum.intersects_aabb(&Aabb::from_chunk(c.world_pos, c.scale[0], c.min_max_height))
            })
            .map(|(i, _)| i as u32)
            .collect();

        let record = DrawRecord {
            pass,
            vertex_count: self.vertex_count,
            instance_count: self.visible.len() as u32,
        };
        self.draws.push(record);
        self.ops.push(GpuOp::Draw { pass, instances: record.instance_count });
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.pages = Default::default();
        self.surfaces.clear();
        self.chunks = Vec::new();
        self.chunk_capacity = 0;
        self.lookup = None;
        self.released = true;
        log::info!("Released software terrain resources");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::Vec3;
    use crate::math::Plane;

    fn small_gpu(capacity: u32) -> SoftwareTerrainGpu {
        let config = TerrainConfig {
            height_resolution: 4,
            color_resolution: 4,
            surface_tiling: 1.0,
            ..Default::default()
        };
        let mut gpu = SoftwareTerrainGpu::new(&config);
        let layout = PageLayout {
            height_resolution: 4,
            color_resolution: 4,
            surface_layers: 2,
        };
        gpu.allocate_pages(capacity, layout).unwrap();
        gpu
    }

    fn surface(albedo: [u8; 4]) -> [TextureAsset; 3] {
        [
            TextureAsset::uniform_rgba8(4, 4, albedo),
            TextureAsset::uniform_rgba8(4, 4, [128, 128, 255, 0]),
            TextureAsset::uniform_rgba8(4, 4, [0, 0, 0, 0]),
        ]
    }

    fn layer(textures: &[TextureAsset; 3]) -> SurfaceLayer<'_> {
        SurfaceLayer {
            albedo_occlusion: &textures[0],
            normal: &textures[1],
            smoothness_metallic: &textures[2],
        }
    }

    #[test]
    fn test_default_fills() {
        let mut gpu = small_gpu(2);
        gpu.composite_color(1, None).unwrap();
        gpu.composite_height(1, None).unwrap();

        for channel in TextureChannel::ALL {
            assert!(gpu.page(channel, 1).iter().all(|t| *t == channel.default_value()));
        }
    }

    #[test]
    fn test_mask_blends_surface_layers() {
        let mut gpu = small_gpu(1);
        let red = surface([255, 0, 0, 255]);
        let blue = surface([0, 0, 255, 255]);
        gpu.upload_surface_layer(0, Some(layer(&red))).unwrap();
        gpu.upload_surface_layer(1, Some(layer(&blue))).unwrap();
        gpu.set_surface_count(2);

        let mask = TextureAsset::uniform_rgba8(2, 2, [255, 255, 0, 0]);
        gpu.composite_color(0, Some(&mask)).unwrap();
        assert_eq!(gpu.texel(TextureChannel::Albedo, 0, 2, 2), [0.5, 0.0, 0.5, 1.0]);

        // Weights on layers that do not exist fall back to the default
        let unused = TextureAsset::uniform_rgba8(2, 2, [0, 0, 255, 0]);
        gpu.composite_color(0, Some(&unused)).unwrap();
        assert_eq!(
            gpu.texel(TextureChannel::Albedo, 0, 0, 0),
            TextureChannel::Albedo.default_value()
        );
    }

    #[test]
    fn test_height_decode() {
        let mut gpu = small_gpu(1);
        let height = TextureAsset::r32_float(2, 2, vec![1.0, 2.0, 3.0, 4.0]);
        gpu.composite_height(0, Some(&height)).unwrap();
        assert_eq!(gpu.texel(TextureChannel::Height, 0, 0, 0), [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(gpu.texel(TextureChannel::Height, 0, 3, 3), [4.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_combine_downsamples_quadrants() {
        let mut gpu = small_gpu(5);
        for slot in 0..3 {
            let h = TextureAsset::uniform_height(4, 4, slot as f32 + 1.0);
            gpu.composite_height(slot, Some(&h)).unwrap();
        }
        let plan = CombinePlan {
            target: 4,
            children: [Some(0), Some(1), Some(2), None],
        };
        gpu.combine_pages(&plan).unwrap();

        assert_eq!(gpu.texel(TextureChannel::Height, 4, 0, 0)[0], 1.0);
        assert_eq!(gpu.texel(TextureChannel::Height, 4, 3, 0)[0], 2.0);
        assert_eq!(gpu.texel(TextureChannel::Height, 4, 1, 3)[0], 3.0);
        assert_eq!(gpu.texel(TextureChannel::Height, 4, 3, 3)[0], 0.0);
    }

    #[test]
    fn test_out_of_range_slot() {
        let mut gpu = small_gpu(1);
        assert!(matches!(gpu.composite_color(3, None), Err(Error::Gpu(_))));
    }

    #[test]
    fn test_cull_against_planes() {
        let mut gpu = small_gpu(1);
        gpu.reserve_chunks(4).unwrap();
        let chunk = |x: f32| GpuTerrainChunk {
            world_pos: [x, 0.0],
            min_max_height: [0.0, 1.0],
            scale: [10.0, 1.0],
            uv_start_index: [0, 0],
        };
        gpu.upload_chunks(&[chunk(0.0), chunk(100.0), chunk(-50.0)]);

        // Box x in [-5, 20], everything else unbounded
        let planes = [
            Plane::new(Vec3::X, 5.0),
            Plane::new(-Vec3::X, 20.0),
            Plane::new(Vec3::Y, 1000.0),
            Plane::new(-Vec3::Y, 1000.0),
            Plane::new(Vec3::Z, 1000.0),
            Plane::new(-Vec3::Z, 1000.0),
        ]
        .map(|p| p.to_vec4());

        gpu.draw(&mut (), &planes, 1).unwrap();
        assert_eq!(gpu.visible(), &[0]);
        assert_eq!(gpu.draws()[0].instance_count, 1);
        assert_eq!(gpu.draws()[0].pass, 1);
        assert_eq!(gpu.draws()[0].vertex_count, 600);
    }

    #[test]
    fn test_release_is_idempotent() {
        let mut gpu = small_gpu(1);
        gpu.release();
        gpu.release();
        assert!(gpu.is_released());
        assert!(gpu.composite_height(0, None).is_err());
    }
}
