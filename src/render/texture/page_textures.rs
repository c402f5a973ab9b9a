//! Physical page arrays, surface arrays and the page lookup texture

use crate::virtual_texture::{PageLayout, PageLookup, TextureChannel};

/// Base surface textures are stored at colour resolution in this format
pub const SURFACE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;

/// GPU memory behind the virtual texture.
///
/// Each channel is a 2D array with one layer per physical slot. Combine
/// writes into a per-channel scratch page first and then copies it into the
/// target layer, because a pass cannot sample and store the same texture.
pub struct PageTextures {
    layout: PageLayout,
    capacity: u32,
    pages: [wgpu::Texture; 4],
    /// Whole-array views, indexed by `TextureChannel::index`
    page_views: [wgpu::TextureView; 4],
    scratch: [wgpu::Texture; 4],
    scratch_views: [wgpu::TextureView; 4],
    /// Albedo, normal, smoothness/metallic
    surfaces: [wgpu::Texture; 3],
    surface_views: [wgpu::TextureView; 3],
    lookup: wgpu::Texture,
    lookup_view: wgpu::TextureView,
    lookup_resolution: u32,
}

impl PageTextures {
    /// Allocate `capacity` slots of every channel and a lookup for `max_depth`
    pub fn new(device: &wgpu::Device, capacity: u32, layout: PageLayout, max_depth: u32) -> Self {
        let capacity = capacity.max(1);
        let surface_layers = layout.surface_layers.max(1);

        let pages = TextureChannel::ALL.map(|channel| {
            let res = layout.resolution(channel);
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some(channel.label()),
                size: wgpu::Extent3d {
                    width: res,
                    height: res,
                    depth_or_array_layers: capacity,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: channel.format(),
                usage: wgpu::TextureUsages::TEXTURE_BINDING
                    | wgpu::TextureUsages::STORAGE_BINDING
                    | wgpu::TextureUsages::COPY_DST,
                view_formats: &[],
            })
        });
        let page_views = pages.each_ref().map(array_view);

        let scratch = TextureChannel::ALL.map(|channel| {
            let res = layout.resolution(channel);
            device.create_texture(&wgpu::TextureDescriptor {
                label: Some("terrain_page_scratch"),
                size: wgpu::Extent3d {
                    width: res,
                    height: res,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: channel.format(),
                usage: wgpu::TextureUsages::STORAGE_BINDING | wgpu::TextureUsages::COPY_SRC,
                view_formats: &[],
            })
        });
        let scratch_views = scratch
            .each_ref()
            .map(|t| t.create_view(&wgpu::TextureViewDescriptor::default()));

        let surfaces = ["terrain_surface_albedo", "terrain_surface_normal", "terrain_surface_smoothness_metallic"]
            .map(|label| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: wgpu::Extent3d {
                        width: layout.color_resolution,
                        height: layout.color_resolution,
                        depth_or_array_layers: surface_layers,
                    },
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format: SURFACE_FORMAT,
                    usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
                    view_formats: &[],
                })
            });
        let surface_views = surfaces.each_ref().map(array_view);

        let lookup_resolution = 1u32 << max_depth;
        let lookup = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("terrain_page_lookup"),
            size: wgpu::Extent3d {
                width: lookup_resolution,
                height: lookup_resolution,
                depth_or_array_layers: 1,
            },
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::R32Uint,
            usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
            view_formats: &[],
        });
        let lookup_view = lookup.create_view(&wgpu::TextureViewDescriptor::default());

        let layout = PageLayout {
            surface_layers,
            ..layout
        };
        log::info!(
            "Allocated {} terrain page slots: {} MB pages, {}x{} lookup",
            capacity,
            capacity as u64 * layout.slot_bytes() / (1024 * 1024),
            lookup_resolution,
            lookup_resolution
        );

        Self {
            layout,
            capacity,
            pages,
            page_views,
            scratch,
            scratch_views,
            surfaces,
            surface_views,
            lookup,
            lookup_view,
            lookup_resolution,
        }
    }

    /// Upload one surface layer. `textures` are albedo, normal and
    /// smoothness/metallic texels at colour resolution.
    pub fn write_surface_layer(&self, queue: &wgpu::Queue, layer: u32, textures: [&[u8]; 3]) {
        let res = self.layout.color_resolution;
        for (texture, bytes) in self.surfaces.iter().zip(textures) {
            queue.write_texture(
                wgpu::TexelCopyTextureInfo {
                    texture,
                    mip_level: 0,
                    origin: wgpu::Origin3d { x: 0, y: 0, z: layer },
                    aspect: wgpu::TextureAspect::All,
                },
                bytes,
                wgpu::TexelCopyBufferLayout {
                    offset: 0,
                    bytes_per_row: Some(res * 4),
                    rows_per_image: Some(res),
                },
                wgpu::Extent3d {
                    width: res,
                    height: res,
                    depth_or_array_layers: 1,
                },
            );
        }
    }

    pub fn write_lookup(&self, queue: &wgpu::Queue, lookup: &PageLookup) {
        if lookup.resolution() != self.lookup_resolution {
            log::warn!(
                "Page lookup is {}x{}, texture is {}x{}; skipping upload",
                lookup.resolution(),
                lookup.resolution(),
                self.lookup_resolution,
                self.lookup_resolution
            );
            return;
        }
        queue.write_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.lookup,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            lookup.as_bytes(),
            wgpu::TexelCopyBufferLayout {
                offset: 0,
                bytes_per_row: Some(self.lookup_resolution * 4),
                rows_per_image: Some(self.lookup_resolution),
            },
            wgpu::Extent3d {
                width: self.lookup_resolution,
                height: self.lookup_resolution,
                depth_or_array_layers: 1,
            },
        );
    }

    /// Record a copy of the channel's scratch page into `slot`
    pub fn copy_scratch_to_slot(&self, encoder: &mut wgpu::CommandEncoder, channel: TextureChannel, slot: u32) {
        let res = self.layout.resolution(channel);
        encoder.copy_texture_to_texture(
            wgpu::TexelCopyTextureInfo {
                texture: &self.scratch[channel.index()],
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::TexelCopyTextureInfo {
                texture: &self.pages[channel.index()],
                mip_level: 0,
                origin: wgpu::Origin3d { x: 0, y: 0, z: slot },
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::Extent3d {
                width: res,
                height: res,
                depth_or_array_layers: 1,
            },
        );
    }

    pub fn layout(&self) -> PageLayout {
        self.layout
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    pub fn page_view(&self, channel: TextureChannel) -> &wgpu::TextureView {
        &self.page_views[channel.index()]
    }

    pub fn scratch_view(&self, channel: TextureChannel) -> &wgpu::TextureView {
        &self.scratch_views[channel.index()]
    }

    /// Albedo, normal and smoothness/metallic surface array views
    pub fn surface_views(&self) -> &[wgpu::TextureView; 3] {
        &self.surface_views
    }

    pub fn lookup_view(&self) -> &wgpu::TextureView {
        &self.lookup_view
    }

    /// Destroy every texture now instead of waiting for the last reference
    pub fn destroy(&self) {
        for texture in self.pages.iter().chain(&self.scratch).chain(&self.surfaces) {
            texture.destroy();
        }
        self.lookup.destroy();
    }
}

fn array_view(texture: &wgpu::Texture) -> wgpu::TextureView {
    texture.create_view(&wgpu::TextureViewDescriptor {
        dimension: Some(wgpu::TextureViewDimension::D2Array),
        ..Default::default()
    })
}
