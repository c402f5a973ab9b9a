//! Page composition compute pipelines (page_composite.wgsl)

use bytemuck::{Pod, Zeroable};

use crate::render::texture::PageTextures;
use crate::virtual_texture::{CombinePlan, TextureChannel};

const WORKGROUP_SIZE: u32 = 8;
const NO_SLOT: u32 = u32::MAX;

/// Uniform block shared by every composite entry point
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CompositeParams {
    pub slot: u32,
    pub surface_count: u32,
    pub resolution: u32,
    pub tiling: f32,
    pub children: [u32; 4],
    pub fill: [f32; 4],
    pub default_albedo: [f32; 4],
    pub default_normal: [f32; 4],
    pub default_smoothness_metallic: [f32; 4],
}

impl CompositeParams {
    pub fn new(slot: u32, resolution: u32) -> Self {
        Self {
            slot,
            surface_count: 0,
            resolution,
            tiling: 1.0,
            children: [NO_SLOT; 4],
            fill: [0.0; 4],
            default_albedo: TextureChannel::Albedo.default_value(),
            default_normal: TextureChannel::Normal.default_value(),
            default_smoothness_metallic: TextureChannel::SmoothnessMetallic.default_value(),
        }
    }
}

struct Kernel {
    pipeline: wgpu::ComputePipeline,
    layout: wgpu::BindGroupLayout,
}

/// Decode, default-fill and combine kernels.
///
/// Every dispatch writes its params, records one compute pass and submits
/// right away, so consecutive composites never share a uniform write.
pub struct CompositePipeline {
    params_buffer: wgpu::Buffer,
    decode_color: Kernel,
    default_color: Kernel,
    decode_height: Kernel,
    default_height: Kernel,
    combine_r32f: Kernel,
    combine_rgba8: Kernel,
    combine_rgba16f: Kernel,
}

impl CompositePipeline {
    pub fn new(device: &wgpu::Device) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("page_composite_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/page_composite.wgsl").into()),
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("page_composite_params"),
            size: std::mem::size_of::<CompositeParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let page_outputs = [
            storage_entry(5, TextureChannel::Albedo.format(), wgpu::TextureViewDimension::D2Array),
            storage_entry(6, TextureChannel::Normal.format(), wgpu::TextureViewDimension::D2Array),
            storage_entry(
                7,
                TextureChannel::SmoothnessMetallic.format(),
                wgpu::TextureViewDimension::D2Array,
            ),
        ];
        let height_output =
            storage_entry(9, TextureChannel::Height.format(), wgpu::TextureViewDimension::D2Array);

        let decode_color = Kernel::new(
            device,
            &shader,
            "decode_color",
            &[
                uniform_entry(0),
                texture_entry(1, wgpu::TextureViewDimension::D2),
                texture_entry(2, wgpu::TextureViewDimension::D2Array),
                texture_entry(3, wgpu::TextureViewDimension::D2Array),
                texture_entry(4, wgpu::TextureViewDimension::D2Array),
                page_outputs[0],
                page_outputs[1],
                page_outputs[2],
            ],
        );
        let default_color = Kernel::new(
            device,
            &shader,
            "default_color",
            &[uniform_entry(0), page_outputs[0], page_outputs[1], page_outputs[2]],
        );
        let decode_height = Kernel::new(
            device,
            &shader,
            "decode_height",
            &[uniform_entry(0), texture_entry(8, wgpu::TextureViewDimension::D2), height_output],
        );
        let default_height = Kernel::new(device, &shader, "default_height", &[uniform_entry(0), height_output]);

        let combine = |entry_point: &str, binding: u32, format: wgpu::TextureFormat| {
            Kernel::new(
                device,
                &shader,
                entry_point,
                &[
                    uniform_entry(0),
                    texture_entry(10, wgpu::TextureViewDimension::D2Array),
                    storage_entry(binding, format, wgpu::TextureViewDimension::D2),
                ],
            )
        };
        let combine_r32f = combine("combine_r32f", 11, wgpu::TextureFormat::R32Float);
        let combine_rgba8 = combine("combine_rgba8", 12, wgpu::TextureFormat::Rgba8Unorm);
        let combine_rgba16f = combine("combine_rgba16f", 13, wgpu::TextureFormat::Rgba16Float);

        Self {
            params_buffer,
            decode_color,
            default_color,
            decode_height,
            default_height,
            combine_r32f,
            combine_rgba8,
            combine_rgba16f,
        }
    }

    /// Blend the surfaces into `slot` by `mask`, or fill defaults without one
    pub fn composite_color(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        textures: &PageTextures,
        params: CompositeParams,
        mask: Option<&wgpu::TextureView>,
    ) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        let outputs = [
            (5, textures.page_view(TextureChannel::Albedo)),
            (6, textures.page_view(TextureChannel::Normal)),
            (7, textures.page_view(TextureChannel::SmoothnessMetallic)),
        ];

        let (kernel, bind_group) = match mask {
            Some(mask) => {
                let surfaces = textures.surface_views();
                let views = [(1, mask), (2, &surfaces[0]), (3, &surfaces[1]), (4, &surfaces[2])];
                let entries: Vec<_> = views.into_iter().chain(outputs).collect();
                (&self.decode_color, self.bind_group(device, &self.decode_color, &entries))
            }
            None => (&self.default_color, self.bind_group(device, &self.default_color, &outputs)),
        };
        self.dispatch(device, queue, kernel, &bind_group, params.resolution, "page_composite_color");
    }

    /// Resample `height` into `slot`, or fill the default height without one
    pub fn composite_height(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        textures: &PageTextures,
        params: CompositeParams,
        height: Option<&wgpu::TextureView>,
    ) {
        queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));
        let output = (9, textures.page_view(TextureChannel::Height));

        let (kernel, bind_group) = match height {
            Some(height) => (
                &self.decode_height,
                self.bind_group(device, &self.decode_height, &[(8, height), output]),
            ),
            None => (&self.default_height, self.bind_group(device, &self.default_height, &[output])),
        };
        self.dispatch(device, queue, kernel, &bind_group, params.resolution, "page_composite_height");
    }

    /// Downsample the plan's children into its target, one channel at a time
    pub fn combine(&self, device: &wgpu::Device, queue: &wgpu::Queue, textures: &PageTextures, plan: &CombinePlan) {
        for channel in TextureChannel::ALL {
            let resolution = textures.layout().resolution(channel);
            let mut params = CompositeParams::new(plan.target, resolution);
            params.children = plan.children.map(|c| c.unwrap_or(NO_SLOT));
            params.fill = channel.default_value();
            queue.write_buffer(&self.params_buffer, 0, bytemuck::bytes_of(&params));

            let (kernel, binding) = match channel.format() {
                wgpu::TextureFormat::R32Float => (&self.combine_r32f, 11),
                wgpu::TextureFormat::Rgba16Float => (&self.combine_rgba16f, 13),
                _ => (&self.combine_rgba8, 12),
            };
            let bind_group = self.bind_group(
                device,
                kernel,
                &[(10, textures.page_view(channel)), (binding, textures.scratch_view(channel))],
            );

            let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("page_combine_encoder"),
            });
            Self::record(&mut encoder, kernel, &bind_group, resolution);
            textures.copy_scratch_to_slot(&mut encoder, channel, plan.target);
            queue.submit(std::iter::once(encoder.finish()));
        }
    }

    fn bind_group(
        &self,
        device: &wgpu::Device,
        kernel: &Kernel,
        views: &[(u32, &wgpu::TextureView)],
    ) -> wgpu::BindGroup {
        let mut entries = vec![wgpu::BindGroupEntry {
            binding: 0,
            resource: self.params_buffer.as_entire_binding(),
        }];
        entries.extend(views.iter().map(|&(binding, view)| wgpu::BindGroupEntry {
            binding,
            resource: wgpu::BindingResource::TextureView(view),
        }));
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("page_composite_bind_group"),
            layout: &kernel.layout,
            entries: &entries,
        })
    }

    fn dispatch(
        &self,
        device: &wgpu::Device,
        queue: &wgpu::Queue,
        kernel: &Kernel,
        bind_group: &wgpu::BindGroup,
        resolution: u32,
        label: &str,
    ) {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) });
        Self::record(&mut encoder, kernel, bind_group, resolution);
        queue.submit(std::iter::once(encoder.finish()));
    }

    fn record(encoder: &mut wgpu::CommandEncoder, kernel: &Kernel, bind_group: &wgpu::BindGroup, resolution: u32) {
        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("page_composite_pass"),
            timestamp_writes: None,
        });
        pass.set_pipeline(&kernel.pipeline);
        pass.set_bind_group(0, bind_group, &[]);
        let groups = resolution.div_ceil(WORKGROUP_SIZE);
        pass.dispatch_workgroups(groups, groups, 1);
    }
}

impl Kernel {
    fn new(
        device: &wgpu::Device,
        shader: &wgpu::ShaderModule,
        entry_point: &str,
        entries: &[wgpu::BindGroupLayoutEntry],
    ) -> Self {
        let layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some(entry_point),
            entries,
        });
        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some(entry_point),
            bind_group_layouts: &[&layout],
            immediate_size: 0,
        });
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(entry_point),
            layout: Some(&pipeline_layout),
            module: shader,
            entry_point: Some(entry_point),
            compilation_options: Default::default(),
            cache: None,
        });
        Self { pipeline, layout }
    }
}

fn uniform_entry(binding: u32) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Uniform,
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

// Page formats include R32Float, so every sampled input is bound unfilterable
fn texture_entry(binding: u32, view_dimension: wgpu::TextureViewDimension) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Texture {
            sample_type: wgpu::TextureSampleType::Float { filterable: false },
            view_dimension,
            multisampled: false,
        },
        count: None,
    }
}

fn storage_entry(
    binding: u32,
    format: wgpu::TextureFormat,
    view_dimension: wgpu::TextureViewDimension,
) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::StorageTexture {
            access: wgpu::StorageTextureAccess::WriteOnly,
            format,
            view_dimension,
        },
        count: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_layout_matches_shader() {
        // 4 scalars + 5 vec4s, all 16-byte aligned
        assert_eq!(std::mem::size_of::<CompositeParams>(), 96);
        let params = CompositeParams::new(3, 64);
        assert_eq!(params.children, [u32::MAX; 4]);
        assert_eq!(params.default_normal, TextureChannel::Normal.default_value());
    }
}
