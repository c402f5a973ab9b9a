//! wgpu implementation of [`TerrainGpu`]
//!
//! Page composites and combines are submitted immediately on the queue. The
//! cull and indirect draw are recorded into the host's encoder, so they run
//! in order with the host's own passes.

use crate::core::config::TerrainConfig;
use crate::core::error::Error;
use crate::core::types::{Result, Vec4};
use crate::render::buffer::{ChunkBuffer, GpuTerrainChunk};
use crate::render::gpu::{SurfaceLayer, TerrainGpu};
use crate::render::pipeline::{CompositeParams, CompositePipeline, CullPipeline};
use crate::render::texture::PageTextures;
use crate::streaming::asset::TextureAsset;
use crate::virtual_texture::{CombinePlan, PageLayout, PageLookup, TextureChannel};

/// Host targets the terrain draw renders into
pub struct WgpuDrawContext<'a> {
    pub encoder: &'a mut wgpu::CommandEncoder,
    pub color: &'a wgpu::TextureView,
    pub depth: Option<&'a wgpu::TextureView>,
}

pub struct WgpuTerrainGpu {
    device: wgpu::Device,
    queue: wgpu::Queue,
    max_depth: u32,
    surface_tiling: f32,
    surface_count: u32,
    pages: Option<PageTextures>,
    composite: CompositePipeline,
    cull: CullPipeline,
    chunks: ChunkBuffer,
    material_layout: wgpu::BindGroupLayout,
    material_bind_group: Option<wgpu::BindGroup>,
    sampler: wgpu::Sampler,
    /// Material pipelines, indexed by draw pass
    pass_pipelines: Vec<Option<wgpu::RenderPipeline>>,
    released: bool,
}

impl WgpuTerrainGpu {
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, config: &TerrainConfig) -> Self {
        let chunks = ChunkBuffer::new(&device, config.initial_chunk_capacity, config.planar_resolution);
        let composite = CompositePipeline::new(&device);
        let cull = CullPipeline::new(&device, &chunks);
        let material_layout = create_material_layout(&device);

        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("terrain_page_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Linear,
            min_filter: wgpu::FilterMode::Linear,
            ..Default::default()
        });

        Self {
            device,
            queue,
            max_depth: config.lod_count(),
            surface_tiling: config.surface_tiling,
            surface_count: 0,
            pages: None,
            composite,
            cull,
            chunks,
            material_layout,
            material_bind_group: None,
            sampler,
            pass_pipelines: Vec::new(),
            released: false,
        }
    }

    /// Register the material pipeline used by `draw` for `pass`. Its group 0
    /// must be [`material_layout`](Self::material_layout).
    pub fn set_pass_pipeline(&mut self, pass: usize, pipeline: wgpu::RenderPipeline) {
        if self.pass_pipelines.len() <= pass {
            self.pass_pipelines.resize_with(pass + 1, || None);
        }
        self.pass_pipelines[pass] = Some(pipeline);
    }

    /// Layout of the chunk, lookup and page bindings the material reads
    pub fn material_layout(&self) -> &wgpu::BindGroupLayout {
        &self.material_layout
    }

    /// `None` until pages are allocated
    pub fn material_bind_group(&self) -> Option<&wgpu::BindGroup> {
        self.material_bind_group.as_ref()
    }

    /// Physical page array of one channel
    pub fn texture(&self, channel: TextureChannel) -> Option<&wgpu::TextureView> {
        self.pages.as_ref().map(|p| p.page_view(channel))
    }

    pub fn chunk_buffer(&self) -> &ChunkBuffer {
        &self.chunks
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    fn pages(&self) -> Result<&PageTextures> {
        if self.released {
            return Err(Error::Gpu("terrain GPU resources were released".into()));
        }
        self.pages
            .as_ref()
            .ok_or_else(|| Error::Gpu("terrain page textures are not allocated".into()))
    }

    fn check_slot(&self, slot: u32) -> Result<&PageTextures> {
        let pages = self.pages()?;
        if slot >= pages.capacity() {
            return Err(Error::Gpu(format!(
                "page slot {} out of range (capacity {})",
                slot,
                pages.capacity()
            )));
        }
        Ok(pages)
    }

    fn rebuild_material_bind_group(&mut self) {
        let Some(pages) = &self.pages else {
            self.material_bind_group = None;
            return;
        };

        let mut entries = vec![
            wgpu::BindGroupEntry {
                binding: 0,
                resource: self.chunks.chunks().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 1,
                resource: self.chunks.cull_results().as_entire_binding(),
            },
            wgpu::BindGroupEntry {
                binding: 2,
                resource: wgpu::BindingResource::TextureView(pages.lookup_view()),
            },
        ];
        entries.extend(TextureChannel::ALL.iter().map(|channel| wgpu::BindGroupEntry {
            binding: 3 + channel.index() as u32,
            resource: wgpu::BindingResource::TextureView(pages.page_view(*channel)),
        }));
        entries.push(wgpu::BindGroupEntry {
            binding: 7,
            resource: wgpu::BindingResource::Sampler(&self.sampler),
        });

        self.material_bind_group = Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_material_bind_group"),
            layout: &self.material_layout,
            entries: &entries,
        }));
    }

    /// Upload an asset as a single sampled texture for a decode pass
    fn upload_source(&self, asset: &TextureAsset, format: wgpu::TextureFormat, label: &str) -> wgpu::TextureView {
        let size = wgpu::Extent3d {
            width: asset.width,
            height: asset.height,
            depth_or_array_layers: 1,
        };
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some(label),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });

        let bytes = match format {
            wgpu::TextureFormat::R32Float => bytemuck::cast_slice::<f32, u8>(&asset.to_r32_floats()).to_vec(),
            _ => asset.to_rgba8_bytes(),
        };
        self.queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            &bytes,
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(asset.width * 4),
                rows_per_image: Some(asset.height),
            },
            size,
        );
        texture.create_view(&wgpu::TextureViewDescriptor::default())
    }
}

impl TerrainGpu for WgpuTerrainGpu {
    type DrawContext<'a> = WgpuDrawContext<'a>;

    fn allocate_pages(&mut self, capacity: u32, layout: PageLayout) -> Result<u32> {
        if let Some(old) = self.pages.take() {
            old.destroy();
        }

        let max_layers = self.device.limits().max_texture_array_layers;
        if capacity > max_layers {
            log::warn!(
                "Requested {} page slots but the device supports {} array layers, clamping",
                capacity,
                max_layers
            );
        }
        let capacity = capacity.min(max_layers);
        let layout = PageLayout {
            surface_layers: layout.surface_layers.clamp(1, max_layers),
            ..layout
        };

        self.pages = Some(PageTextures::new(&self.device, capacity, layout, self.max_depth));
        self.released = false;
        self.rebuild_material_bind_group();
        Ok(capacity)
    }

    fn upload_surface_layer(&mut self, layer: u32, surface: Option<SurfaceLayer<'_>>) -> Result<()> {
        let pages = self.pages()?;
        let layout = pages.layout();
        if layer >= layout.surface_layers {
            return Err(Error::Gpu(format!("surface layer {} out of range", layer)));
        }

        let res = layout.color_resolution;
        let texels = (res * res) as usize;
        let textures: [Vec<u8>; 3] = match surface {
            Some(s) => [s.albedo_occlusion, s.normal, s.smoothness_metallic]
                .map(|asset| asset.resample(res).iter().flat_map(|t| unorm8(*t)).collect()),
            None => TextureChannel::COLOR.map(|c| unorm8(c.default_value()).repeat(texels)),
        };
        pages.write_surface_layer(&self.queue, layer, [textures[0].as_slice(), textures[1].as_slice(), textures[2].as_slice()]);
        Ok(())
    }

    fn set_surface_count(&mut self, count: u32) {
        self.surface_count = count;
    }

    fn composite_color(&mut self, slot: u32, mask: Option<&TextureAsset>) -> Result<()> {
        let pages = self.check_slot(slot)?;
        let mut params = CompositeParams::new(slot, pages.layout().color_resolution);
        params.surface_count = self.surface_count.min(pages.layout().surface_layers);
        params.tiling = self.surface_tiling;

        let mask_view = mask
            .filter(|m| !m.is_empty())
            .map(|m| self.upload_source(m, wgpu::TextureFormat::Rgba8Unorm, "terrain_mask_source"));
        self.composite
            .composite_color(&self.device, &self.queue, pages, params, mask_view.as_ref());
        Ok(())
    }

    fn composite_height(&mut self, slot: u32, height: Option<&TextureAsset>) -> Result<()> {
        let pages = self.check_slot(slot)?;
        let mut params = CompositeParams::new(slot, pages.layout().height_resolution);
        params.fill = TextureChannel::Height.default_value();

        let height_view = height
            .filter(|h| !h.is_empty())
            .map(|h| self.upload_source(h, wgpu::TextureFormat::R32Float, "terrain_height_source"));
        self.composite
            .composite_height(&self.device, &self.queue, pages, params, height_view.as_ref());
        Ok(())
    }

    fn combine_pages(&mut self, plan: &CombinePlan) -> Result<()> {
        let pages = self.check_slot(plan.target)?;
        for slot in plan.children.iter().flatten() {
            self.check_slot(*slot)?;
        }
        self.composite.combine(&self.device, &self.queue, pages, plan);
        Ok(())
    }

    fn publish_lookup(&mut self, lookup: &PageLookup) {
        if let Ok(pages) = self.pages() {
            pages.write_lookup(&self.queue, lookup);
        }
    }

    fn chunk_capacity(&self) -> usize {
        self.chunks.capacity()
    }

    fn reserve_chunks(&mut self, capacity: usize) -> Result<()> {
        if self.released {
            return Err(Error::Gpu("terrain GPU resources were released".into()));
        }
        if self.chunks.reserve(&self.device, capacity) {
            self.cull.rebind(&self.device, &self.chunks);
            self.rebuild_material_bind_group();
        }
        Ok(())
    }

    fn upload_chunks(&mut self, chunks: &[GpuTerrainChunk]) {
        if !self.released {
            self.chunks.upload(&self.queue, chunks);
        }
    }

    fn draw(&mut self, ctx: &mut WgpuDrawContext<'_>, planes: &[Vec4; 6], pass: usize) -> Result<()> {
        self.pages()?;
        let Some(pipeline) = self.pass_pipelines.get(pass).and_then(|p| p.as_ref()) else {
            return Err(Error::Gpu(format!("no terrain pipeline registered for pass {}", pass)));
        };
        let Some(material) = &self.material_bind_group else {
            return Err(Error::Gpu("terrain material bind group missing".into()));
        };

        self.cull.record(&self.device, &mut *ctx.encoder, &self.chunks, planes);

        let mut render_pass = ctx.encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("terrain_draw_pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: ctx.color,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
                depth_slice: None,
            })],
            depth_stencil_attachment: ctx.depth.map(|view| wgpu::RenderPassDepthStencilAttachment {
                view,
                depth_ops: Some(wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: None,
            }),
            timestamp_writes: None,
            occlusion_query_set: None,
            multiview_mask: None,
        });
        render_pass.set_pipeline(pipeline);
        render_pass.set_bind_group(0, material, &[]);
        render_pass.draw_indirect(self.chunks.draw_args(), 0);
        Ok(())
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        if let Some(pages) = self.pages.take() {
            pages.destroy();
        }
        self.chunks.destroy();
        self.material_bind_group = None;
        self.pass_pipelines.clear();
        self.released = true;
        log::info!("Released terrain GPU resources");
    }
}

fn unorm8(texel: [f32; 4]) -> [u8; 4] {
    texel.map(|v| (v.clamp(0.0, 1.0) * 255.0).round() as u8)
}

/// Bindings visible to the host's terrain material:
/// 0 chunks, 1 cull results, 2 lookup, 3..=6 page arrays, 7 sampler
fn create_material_layout(device: &wgpu::Device) -> wgpu::BindGroupLayout {
    let visibility = wgpu::ShaderStages::VERTEX | wgpu::ShaderStages::FRAGMENT;
    let storage = |binding: u32| wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only: true },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    };
    let texture = |binding: u32, sample_type: wgpu::TextureSampleType, view_dimension| wgpu::BindGroupLayoutEntry {
        binding,
        visibility,
        ty: wgpu::BindingType::Texture {
            sample_type,
            view_dimension,
            multisampled: false,
        },
        count: None,
    };

    let mut entries = vec![
        storage(0),
        storage(1),
        texture(2, wgpu::TextureSampleType::Uint, wgpu::TextureViewDimension::D2),
    ];
    for channel in TextureChannel::ALL {
        // R32Float heights are read with textureLoad
        let filterable = channel != TextureChannel::Height;
        entries.push(texture(
            3 + channel.index() as u32,
            wgpu::TextureSampleType::Float { filterable },
            wgpu::TextureViewDimension::D2Array,
        ));
    }
    entries.push(wgpu::BindGroupLayoutEntry {
        binding: 7,
        visibility,
        ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
        count: None,
    });

    device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
        label: Some("terrain_material_layout"),
        entries: &entries,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::context::GpuContext;

    fn small_config() -> TerrainConfig {
        TerrainConfig {
            lod_distances: vec![1000.0, 600.0],
            height_resolution: 8,
            color_resolution: 8,
            initial_chunk_capacity: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_unorm8_conversion() {
        assert_eq!(unorm8([0.0, 0.5, 1.0, 2.0]), [0, 128, 255, 255]);
        assert_eq!(unorm8(TextureChannel::Normal.default_value()), [128, 128, 255, 0]);
    }

    // Runs only where an adapter is available
    #[test]
    fn test_headless_page_lifecycle() {
        let Ok(context) = GpuContext::new_headless_blocking() else {
            return;
        };
        let config = small_config();
        let mut gpu = WgpuTerrainGpu::new(context.device.clone(), context.queue.clone(), &config);

        let layout = PageLayout {
            height_resolution: 8,
            color_resolution: 8,
            surface_layers: 1,
        };
        let capacity = gpu.allocate_pages(16, layout).unwrap();
        assert_eq!(capacity, 16);
        assert!(gpu.material_bind_group().is_some());
        assert!(gpu.texture(TextureChannel::Height).is_some());

        gpu.upload_surface_layer(0, None).unwrap();
        gpu.set_surface_count(1);
        gpu.composite_color(0, Some(&TextureAsset::uniform_rgba8(4, 4, [255, 0, 0, 0])))
            .unwrap();
        gpu.composite_height(0, None).unwrap();
        gpu.combine_pages(&CombinePlan {
            target: 1,
            children: [Some(0), None, None, None],
        })
        .unwrap();
        assert!(gpu.composite_height(99, None).is_err());

        gpu.reserve_chunks(600).unwrap();
        assert_eq!(gpu.chunk_buffer().reallocations(), 1);

        gpu.release();
        assert!(gpu.composite_color(0, None).is_err());
    }
}
