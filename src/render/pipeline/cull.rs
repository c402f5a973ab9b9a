//! GPU frustum culling of terrain chunks into indirect draw arguments

use bytemuck::{Pod, Zeroable};
use wgpu::util::DeviceExt;

use crate::core::types::Vec4;
use crate::render::buffer::ChunkBuffer;

const WORKGROUP_SIZE: u32 = 64;

/// Cull uniforms (matches `CullParams` in terrain_cull.wgsl)
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub struct CullParams {
    /// (normal.xyz, distance), pointing inward
    pub planes: [[f32; 4]; 6],
    pub chunk_count: u32,
    pub vertex_count: u32,
    pub _pad: [u32; 2],
}

impl CullParams {
    pub fn new(planes: &[Vec4; 6], chunk_count: u32, vertex_count: u32) -> Self {
        Self {
            planes: planes.map(|p| p.to_array()),
            chunk_count,
            vertex_count,
            _pad: [0; 2],
        }
    }
}

/// Resets the draw args, then appends visible chunk indices to the cull results
pub struct CullPipeline {
    clear_pipeline: wgpu::ComputePipeline,
    cull_pipeline: wgpu::ComputePipeline,
    params_buffer: wgpu::Buffer,
    bind_group_layout: wgpu::BindGroupLayout,
    bind_group: wgpu::BindGroup,
}

impl CullPipeline {
    pub fn new(device: &wgpu::Device, chunks: &ChunkBuffer) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("terrain_cull_shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("../../../shaders/terrain_cull.wgsl").into()),
        });

        let params_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_cull_params"),
            size: std::mem::size_of::<CullParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let storage = |binding: u32, read_only: bool| wgpu::BindGroupLayoutEntry {
            binding,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("terrain_cull_layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                storage(1, true),
                storage(2, false),
                storage(3, false),
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("terrain_cull_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            immediate_size: 0,
        });

        let create = |entry_point: &str| {
            device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(entry_point),
                layout: Some(&pipeline_layout),
                module: &shader,
                entry_point: Some(entry_point),
                compilation_options: Default::default(),
                cache: None,
            })
        };
        let clear_pipeline = create("clear_args");
        let cull_pipeline = create("cull");

        let bind_group = Self::create_bind_group(device, &bind_group_layout, &params_buffer, chunks);

        Self {
            clear_pipeline,
            cull_pipeline,
            params_buffer,
            bind_group_layout,
            bind_group,
        }
    }

    fn create_bind_group(
        device: &wgpu::Device,
        layout: &wgpu::BindGroupLayout,
        params_buffer: &wgpu::Buffer,
        chunks: &ChunkBuffer,
    ) -> wgpu::BindGroup {
        device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("terrain_cull_bind_group"),
            layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: params_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: chunks.chunks().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: chunks.cull_results().as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 3,
                    resource: chunks.draw_args().as_entire_binding(),
                },
            ],
        })
    }

    /// Rebind after the chunk buffer reallocated
    pub fn rebind(&mut self, device: &wgpu::Device, chunks: &ChunkBuffer) {
        self.bind_group = Self::create_bind_group(device, &self.bind_group_layout, &self.params_buffer, chunks);
    }

    /// Record clear + cull. The draw args are ready for `draw_indirect` afterwards.
    ///
    /// Params are copied inside the encoder so several passes recorded into
    /// one encoder each cull against their own planes.
    pub fn record(
        &self,
        device: &wgpu::Device,
        encoder: &mut wgpu::CommandEncoder,
        chunks: &ChunkBuffer,
        planes: &[Vec4; 6],
    ) {
        let params = CullParams::new(planes, chunks.len() as u32, chunks.vertex_count());
        let staging = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("terrain_cull_params_staging"),
            contents: bytemuck::bytes_of(&params),
            usage: wgpu::BufferUsages::COPY_SRC,
        });
        encoder.copy_buffer_to_buffer(
            &staging,
            0,
            &self.params_buffer,
            0,
            std::mem::size_of::<CullParams>() as u64,
        );

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some("terrain_cull_pass"),
            timestamp_writes: None,
        });
        pass.set_bind_group(0, &self.bind_group, &[]);

        pass.set_pipeline(&self.clear_pipeline);
        pass.dispatch_workgroups(1, 1, 1);

        if !chunks.is_empty() {
            pass.set_pipeline(&self.cull_pipeline);
            pass.dispatch_workgroups((chunks.len() as u32).div_ceil(WORKGROUP_SIZE), 1, 1);
        }
    }
}
