//! GPU storage for the per-frame terrain chunk list

use bytemuck::{Pod, Zeroable};

/// One drawable terrain chunk (32 bytes, matches `TerrainChunk` in terrain_cull.wgsl)
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct GpuTerrainChunk {
    /// World-space min corner on the XZ plane
    pub world_pos: [f32; 2],
    pub min_max_height: [f32; 2],
    /// Chunk edge length in world units, page size in finest cells
    pub scale: [f32; 2],
    /// Page start in finest cells
    pub uv_start_index: [u32; 2],
}

/// Indirect draw arguments as laid out by `wgpu::util::DrawIndirectArgs`
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, Pod, Zeroable)]
pub struct GpuDrawArgs {
    pub vertex_count: u32,
    pub instance_count: u32,
    pub first_vertex: u32,
    pub first_instance: u32,
}

/// Chunk storage, cull survivors and indirect args.
///
/// Capacity only ever grows. Contents are rewritten every frame from the
/// freshly built chunk list, so a reallocation does not need to copy.
pub struct ChunkBuffer {
    chunks: wgpu::Buffer,
    cull_results: wgpu::Buffer,
    draw_args: wgpu::Buffer,
    capacity: usize,
    len: usize,
    vertex_count: u32,
    reallocations: u32,
}

impl ChunkBuffer {
    pub fn new(device: &wgpu::Device, capacity: usize, planar_resolution: u32) -> Self {
        let capacity = capacity.max(1);
        let (chunks, cull_results) = Self::create_storage(device, capacity);

        let draw_args = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_draw_args"),
            size: std::mem::size_of::<GpuDrawArgs>() as u64,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::INDIRECT
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Self {
            chunks,
            cull_results,
            draw_args,
            capacity,
            len: 0,
            // Two triangles per grid quad
            vertex_count: 6 * planar_resolution * planar_resolution,
            reallocations: 0,
        }
    }

    fn create_storage(device: &wgpu::Device, capacity: usize) -> (wgpu::Buffer, wgpu::Buffer) {
        let chunks = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_chunks"),
            size: (capacity * std::mem::size_of::<GpuTerrainChunk>()) as u64,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let cull_results = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("terrain_cull_results"),
            size: (capacity * std::mem::size_of::<u32>()) as u64,
            usage: wgpu::BufferUsages::STORAGE,
            mapped_at_creation: false,
        });
        (chunks, cull_results)
    }

    /// Reallocate to hold at least `capacity` chunks. Returns whether buffers changed.
    pub fn reserve(&mut self, device: &wgpu::Device, capacity: usize) -> bool {
        if capacity <= self.capacity {
            return false;
        }
        log::info!(
            "Growing terrain chunk buffer {} -> {} chunks",
            self.capacity,
            capacity
        );
        let (chunks, cull_results) = Self::create_storage(device, capacity);
        self.chunks = chunks;
        self.cull_results = cull_results;
        self.capacity = capacity;
        self.reallocations += 1;
        true
    }

    /// Upload the frame's chunk list. Callers reserve first.
    pub fn upload(&mut self, queue: &wgpu::Queue, chunks: &[GpuTerrainChunk]) {
        let count = chunks.len().min(self.capacity);
        if count < chunks.len() {
            log::warn!(
                "Chunk list of {} exceeds buffer capacity {}, truncating",
                chunks.len(),
                self.capacity
            );
        }
        if count > 0 {
            queue.write_buffer(&self.chunks, 0, bytemuck::cast_slice(&chunks[..count]));
        }
        self.len = count;
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    pub fn reallocations(&self) -> u32 {
        self.reallocations
    }

    pub fn chunks(&self) -> &wgpu::Buffer {
        &self.chunks
    }

    pub fn cull_results(&self) -> &wgpu::Buffer {
        &self.cull_results
    }

    pub fn draw_args(&self) -> &wgpu::Buffer {
        &self.draw_args
    }

    pub fn destroy(&mut self) {
        self.chunks.destroy();
        self.cull_results.destroy();
        self.draw_args.destroy();
        self.len = 0;
    }
}
