//! Per-frame terrain coordinator
//!
//! Host call order each frame:
//!
//! 1. [`Terrain::prepare`] moves the quadtree into a background job and
//!    resumes the streaming pipeline once. Never blocks.
//! 2. [`Terrain::finish`] joins the job, applies its change events to the
//!    page table, publishes the lookup and uploads the chunk list.
//! 3. [`Terrain::draw_terrain`] any number of times until the next prepare.

pub mod job;
pub mod registry;

pub use job::{JobFailure, QuadTreeJob, UpdateOutput};
pub use registry::{Registration, TerrainRegistry};

use std::sync::Arc;

use crate::core::config::TerrainConfig;
use crate::core::error::Error;
use crate::core::types::{DVec2, Result, Vec3, Vec4};
use crate::math::Frustum;
use crate::quadtree::{LoadEvent, QuadTree};
use crate::render::buffer::GpuTerrainChunk;
use crate::render::gpu::TerrainGpu;
use crate::streaming::{AssetLoader, AssetStore, PipelineStats, StreamingPipeline, TerrainMetadata};
use crate::virtual_texture::{
    default_capacity, PageLayout, PageTableStats, VirtualTexture, MAX_PHYSICAL_SLOTS,
};

/// Asset loads the threaded loader runs at once
pub const MAX_CONCURRENT_LOADS: usize = 4;

/// Coordinator-level counters
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TerrainStats {
    pub frames: u64,
    pub loads_queued: u64,
    pub unloads: u64,
    pub combines: u64,
    pub combine_failures: u64,
    pub job_failures: u64,
}

pub struct Terrain<G: TerrainGpu> {
    config: TerrainConfig,
    gpu: G,
    vt: VirtualTexture,
    pipeline: StreamingPipeline,
    metadata: Arc<TerrainMetadata>,
    /// `None` while the background job owns it
    tree: Option<QuadTree>,
    chunks: Vec<GpuTerrainChunk>,
    job: Option<QuadTreeJob>,
    registration: Option<Registration>,
    enabled: bool,
    stats: TerrainStats,
}

impl<G: TerrainGpu> Terrain<G> {
    /// Create a terrain that loads assets on a background runtime.
    ///
    /// If `registry` already holds an active terrain, the new one logs an
    /// error and stays disabled.
    pub fn new(
        config: TerrainConfig,
        gpu: G,
        store: Arc<dyn AssetStore>,
        registry: &TerrainRegistry,
    ) -> Result<Self> {
        config.validate()?;
        match registry.register(&config.name) {
            Ok(registration) => {
                let loader = AssetLoader::new(store, MAX_CONCURRENT_LOADS)?;
                Self::build(config, gpu, loader, Some(registration))
            }
            Err(e) => Self::build_disabled(config, gpu, store, e),
        }
    }

    /// Create a terrain with a caller-supplied loader
    pub fn with_loader(
        config: TerrainConfig,
        gpu: G,
        loader: AssetLoader,
        registry: &TerrainRegistry,
    ) -> Result<Self> {
        config.validate()?;
        match registry.register(&config.name) {
            Ok(registration) => Self::build(config, gpu, loader, Some(registration)),
            Err(e) => {
                let store = loader.store();
                Self::build_disabled(config, gpu, store, e)
            }
        }
    }

    fn build(
        config: TerrainConfig,
        mut gpu: G,
        loader: AssetLoader,
        registration: Option<Registration>,
    ) -> Result<Self> {
        let max_depth = config.lod_count();
        let metadata = Arc::new(TerrainMetadata::load_or_empty(&config.read_write_path, max_depth));

        let requested = config.page_capacity.unwrap_or_else(|| default_capacity(max_depth));
        let layout = PageLayout {
            height_resolution: config.height_resolution,
            color_resolution: config.color_resolution,
            surface_layers: config.surface_textures.len().max(1) as u32,
        };
        let capacity = gpu.allocate_pages(requested.min(MAX_PHYSICAL_SLOTS), layout)?;
        gpu.reserve_chunks(config.initial_chunk_capacity)?;

        let vt = VirtualTexture::new(max_depth, capacity);
        let tree = QuadTree::new(&config, metadata.clone());
        let pipeline = StreamingPipeline::new(loader, config.asset_keys.clone(), config.surface_textures.clone());

        log::info!(
            "Terrain '{}' ready: {} LOD levels, {} page slots, root {}",
            config.name,
            max_depth,
            capacity,
            config.largest_chunk_size
        );

        Ok(Self {
            chunks: Vec::with_capacity(config.initial_chunk_capacity),
            config,
            gpu,
            vt,
            pipeline,
            metadata,
            tree: Some(tree),
            job: None,
            registration,
            enabled: true,
            stats: TerrainStats::default(),
        })
    }

    fn build_disabled(config: TerrainConfig, gpu: G, store: Arc<dyn AssetStore>, reason: Error) -> Result<Self> {
        log::error!("Terrain '{}' disabled: {}", config.name, reason);
        let max_depth = config.lod_count();
        let metadata = Arc::new(TerrainMetadata::new(max_depth));
        Ok(Self {
            vt: VirtualTexture::new(max_depth, 1),
            pipeline: StreamingPipeline::new(AssetLoader::immediate(store), config.asset_keys.clone(), Vec::new()),
            tree: None,
            chunks: Vec::new(),
            config,
            gpu,
            metadata,
            job: None,
            registration: None,
            enabled: false,
            stats: TerrainStats::default(),
        })
    }

    /// Start the frame: schedule the quadtree update and resume streaming
    pub fn prepare(&mut self, camera_position: Vec3) {
        if !self.enabled {
            return;
        }
        if self.job.is_some() {
            log::warn!("Terrain prepare called twice without finish");
            return;
        }
        let Some(tree) = self.tree.take() else {
            log::error!("Terrain quadtree missing at prepare");
            return;
        };

        let mut chunks = std::mem::take(&mut self.chunks);
        chunks.clear();
        let camera = DVec2::new(camera_position.x as f64, camera_position.z as f64);
        self.job = Some(QuadTreeJob::spawn(tree, chunks, camera));

        self.vt.advance_frame();
        self.pipeline.resume(&mut self.vt, &mut self.gpu);
    }

    /// Finish the frame: join the update, apply its events, publish and upload
    pub fn finish(&mut self) {
        if !self.enabled {
            return;
        }
        let Some(job) = self.job.take() else {
            return;
        };
        self.stats.frames += 1;

        match job.join() {
            Ok(UpdateOutput { tree, chunks }) => {
                self.tree = Some(tree);
                self.chunks = chunks;
            }
            Err(failure) => self.recover(failure),
        }

        self.apply_events();
        // After the events so freed slots never stay in the published lookup
        self.vt.update(&mut self.gpu);
        self.upload_chunks();
    }

    fn recover(&mut self, failure: JobFailure) {
        log::error!("{}; rebuilding terrain quadtree", failure);
        self.stats.job_failures += 1;
        self.tree = Some(QuadTree::new(&self.config, self.metadata.clone()));
        self.chunks = Vec::with_capacity(self.config.initial_chunk_capacity);
        self.vt.reset();
    }

    fn apply_events(&mut self) {
        let Some(tree) = self.tree.as_mut() else {
            return;
        };
        let events: Vec<LoadEvent> = tree.drain_events().collect();
        let Some(tree) = self.tree.as_ref() else {
            return;
        };

        for event in events {
            match event {
                LoadEvent::Load(chunk) => {
                    self.vt.mark_pending(chunk.page);
                    self.pipeline.enqueue(chunk);
                    self.stats.loads_queued += 1;
                }
                LoadEvent::Unload(page) => {
                    self.vt.unload_texture(page);
                    self.stats.unloads += 1;
                }
                LoadEvent::Combine(page) => {
                    let combined = match self.vt.combine_texture(page) {
                        Ok(Some(plan)) => match self.gpu.combine_pages(&plan) {
                            Ok(()) => {
                                self.vt.complete_write(plan.target);
                                self.stats.combines += 1;
                                true
                            }
                            Err(e) => {
                                log::error!("Combine into {:?} failed: {}", page, e);
                                self.vt.complete_write(plan.target);
                                self.vt.unload_texture(page);
                                false
                            }
                        },
                        Ok(None) => true,
                        Err(e) => {
                            log::warn!("Cannot combine {:?}: {}", page, e);
                            false
                        }
                    };

                    // The collapsed node is a leaf now and must get a page
                    if !combined {
                        self.stats.combine_failures += 1;
                        let chunk = tree.descriptor(page.node(tree.max_depth()));
                        self.vt.mark_pending(chunk.page);
                        self.pipeline.enqueue(chunk);
                        self.stats.loads_queued += 1;
                    }
                }
            }
        }
    }

    /// Grow the GPU chunk buffer if the list outgrew it, then upload
    fn upload_chunks(&mut self) {
        let needed = self.chunks.len();
        if needed > self.gpu.chunk_capacity() {
            let target = self.chunks.capacity().max(needed);
            if let Err(e) = self.gpu.reserve_chunks(target) {
                log::error!("Failed to grow chunk buffer to {}: {}", target, e);
            }
        }
        self.gpu.upload_chunks(&self.chunks);
    }

    /// Cull the active chunks against `planes` and issue one indirect draw
    pub fn draw_terrain(&mut self, ctx: &mut G::DrawContext<'_>, planes: &[Vec4; 6], pass: usize) {
        if !self.enabled || self.chunks.is_empty() {
            return;
        }
        if let Err(e) = self.gpu.draw(ctx, planes, pass) {
            log::error!("Terrain draw for pass {} failed: {}", pass, e);
        }
    }

    pub fn draw_terrain_frustum(&mut self, ctx: &mut G::DrawContext<'_>, frustum: &Frustum, pass: usize) {
        self.draw_terrain(ctx, &frustum.to_vec4_array(), pass);
    }

    /// Quiesce and release everything. Further calls are no-ops.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        if let Some(job) = self.job.take() {
            match job.join() {
                Ok(output) => {
                    self.tree = Some(output.tree);
                    self.chunks = output.chunks;
                }
                Err(failure) => log::warn!("{} during shutdown", failure),
            }
        }

        self.pipeline.stop();
        self.pipeline.resume(&mut self.vt, &mut self.gpu);
        self.gpu.release();
        self.chunks.clear();
        self.registration = None;
        self.enabled = false;
        log::info!("Terrain '{}' disabled", self.config.name);
    }

    /// Write the height-bound metadata to `read_write_path`
    pub fn save_metadata(&self) -> Result<()> {
        self.metadata.save(&self.config.read_write_path)
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn config(&self) -> &TerrainConfig {
        &self.config
    }

    pub fn gpu(&self) -> &G {
        &self.gpu
    }

    pub fn gpu_mut(&mut self) -> &mut G {
        &mut self.gpu
    }

    pub fn page_table(&self) -> &VirtualTexture {
        &self.vt
    }

    /// `None` between prepare and finish, or when disabled
    pub fn quadtree(&self) -> Option<&QuadTree> {
        self.tree.as_ref()
    }

    pub fn metadata(&self) -> &TerrainMetadata {
        &self.metadata
    }

    /// Chunks uploaded at the last finish
    pub fn active_chunks(&self) -> &[GpuTerrainChunk] {
        &self.chunks
    }

    pub fn stats(&self) -> TerrainStats {
        self.stats
    }

    pub fn pipeline_stats(&self) -> PipelineStats {
        self.pipeline.stats()
    }

    pub fn page_stats(&self) -> PageTableStats {
        self.vt.stats()
    }

    pub fn is_streaming_idle(&self) -> bool {
        self.pipeline.is_idle()
    }
}

impl<G: TerrainGpu> Drop for Terrain<G> {
    fn drop(&mut self) {
        self.disable();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::software::SoftwareTerrainGpu;
    use crate::streaming::{MemoryAssetStore, TextureAsset};
    use crate::quadtree::NodeCoord;
    use crate::virtual_texture::{TextureChannel, NO_PAGE};
    use std::collections::HashSet;

    fn test_config() -> TerrainConfig {
        TerrainConfig {
            height_resolution: 2,
            color_resolution: 2,
            initial_chunk_capacity: 10,
            // Keep the metadata lookup away from real files
            read_write_path: "does/not/exist.mquad".into(),
            ..Default::default()
        }
    }

    fn terrain_with(config: TerrainConfig, store: Arc<MemoryAssetStore>, registry: &TerrainRegistry) -> Terrain<SoftwareTerrainGpu> {
        let gpu = SoftwareTerrainGpu::new(&config);
        Terrain::with_loader(config, gpu, AssetLoader::immediate(store), registry).unwrap()
    }

    fn run_frames(terrain: &mut Terrain<SoftwareTerrainGpu>, camera: Vec3, frames: usize) {
        for _ in 0..frames {
            terrain.prepare(camera);
            terrain.finish();
        }
    }

    fn accept_all() -> [Vec4; 6] {
        [Vec4::new(0.0, 1.0, 0.0, 1.0e9); 6]
    }

    #[test]
    fn test_second_instance_is_disabled() {
        let registry = TerrainRegistry::new();
        let store = Arc::new(MemoryAssetStore::new());
        let first = terrain_with(test_config(), store.clone(), &registry);
        let mut second = terrain_with(
            TerrainConfig {
                name: "second".into(),
                ..test_config()
            },
            store,
            &registry,
        );

        assert!(first.is_enabled());
        assert!(!second.is_enabled());
        assert_eq!(registry.active().as_deref(), Some("terrain"));

        // Calls on the disabled instance do nothing
        run_frames(&mut second, Vec3::new(500.0, 0.0, 500.0), 3);
        assert!(second.gpu().ops().is_empty());
        assert_eq!(second.stats(), TerrainStats::default());

        drop(first);
        assert!(!registry.is_active());
    }

    #[test]
    fn test_streams_to_steady_state() {
        let registry = TerrainRegistry::new();
        let store = Arc::new(MemoryAssetStore::new());
        store.insert("terrain/height/0/0_0", TextureAsset::uniform_height(2, 2, 42.0));
        let mut terrain = terrain_with(test_config(), store, &registry);

        let camera = Vec3::new(500.0, 0.0, 500.0);
        run_frames(&mut terrain, camera, 40);

        let tree = terrain.quadtree().unwrap();
        let leaves = tree.leaves();
        assert_eq!(terrain.active_chunks().len(), leaves.len());
        assert_eq!(terrain.gpu().chunks().len(), leaves.len());
        assert!(terrain.is_streaming_idle());

        // Every leaf page is resident and no slot is shared
        let mut slots = HashSet::new();
        for leaf in &leaves {
            let page = leaf.page(tree.max_depth());
            let slot = terrain.page_table().slot_of(page).expect("leaf page resident");
            assert!(slots.insert(slot));
        }
        assert_eq!(terrain.page_stats().resident as usize, leaves.len());

        // The published lookup covers the camera cell
        let lookup = terrain.gpu().lookup().unwrap();
        let mid = lookup.resolution() / 2;
        assert_ne!(lookup.get(mid, mid), NO_PAGE);

        let stats = terrain.pipeline_stats();
        assert!(stats.pages_composited >= leaves.len() as u64);
        // Only the root has a height asset and it is split before it streams
        assert!(stats.default_height_fills >= leaves.len() as u64);
        assert!(stats.default_color_fills >= leaves.len() as u64);
    }

    #[test]
    fn test_missing_assets_fill_defaults() {
        let registry = TerrainRegistry::new();
        let mut terrain = terrain_with(test_config(), Arc::new(MemoryAssetStore::new()), &registry);
        run_frames(&mut terrain, Vec3::new(500.0, 0.0, 500.0), 40);

        let tree = terrain.quadtree().unwrap();
        let page = tree.leaves()[0].page(tree.max_depth());
        let slot = terrain.page_table().slot_of(page).unwrap();
        for channel in TextureChannel::ALL {
            assert!(
                terrain
                    .gpu()
                    .page(channel, slot)
                    .iter()
                    .all(|t| *t == channel.default_value()),
                "{:?} not default-filled",
                channel
            );
        }
    }

    #[test]
    fn test_moving_away_combines_pages() {
        let registry = TerrainRegistry::new();
        let mut terrain = terrain_with(test_config(), Arc::new(MemoryAssetStore::new()), &registry);
        run_frames(&mut terrain, Vec3::new(500.0, 0.0, 500.0), 20);
        assert!(terrain.quadtree().unwrap().leaf_count() > 1);

        run_frames(&mut terrain, Vec3::new(1.0e6, 0.0, 1.0e6), 20);
        let tree = terrain.quadtree().unwrap();
        assert_eq!(tree.leaf_count(), 1);
        assert!(terrain.stats().combines > 0);

        // Only the root page is left mapped
        let root = tree.leaves()[0].page(tree.max_depth());
        assert!(terrain.page_table().slot_of(root).is_some());
        assert_eq!(terrain.page_stats().resident, 1);
    }

    #[test]
    fn test_chunk_buffer_grows_once() {
        let registry = TerrainRegistry::new();
        let mut terrain = terrain_with(test_config(), Arc::new(MemoryAssetStore::new()), &registry);
        let baseline = terrain.gpu().chunk_reallocations();

        let chunk = |i: usize| GpuTerrainChunk {
            world_pos: [i as f32, 0.0],
            min_max_height: [0.0, 1.0],
            scale: [1.0, 1.0],
            uv_start_index: [i as u32, 0],
        };

        terrain.chunks = (0..10).map(chunk).collect();
        terrain.upload_chunks();
        assert_eq!(terrain.gpu().chunk_reallocations(), baseline);

        terrain.chunks = (0..600).map(chunk).collect();
        terrain.upload_chunks();
        assert_eq!(terrain.gpu().chunk_reallocations(), baseline + 1);
        assert!(terrain.gpu().chunk_capacity() >= 600);
        assert_eq!(terrain.gpu().chunks().len(), 600);
        for i in 0..10 {
            assert_eq!(terrain.gpu().chunks()[i], chunk(i));
        }
    }

    #[test]
    fn test_draw_skips_empty_set() {
        let registry = TerrainRegistry::new();
        let mut terrain = terrain_with(test_config(), Arc::new(MemoryAssetStore::new()), &registry);
        terrain.draw_terrain(&mut (), &accept_all(), 0);
        assert!(terrain.gpu().draws().is_empty());

        run_frames(&mut terrain, Vec3::new(500.0, 0.0, 500.0), 5);
        terrain.draw_terrain(&mut (), &accept_all(), 1);
        let draws = terrain.gpu().draws();
        assert_eq!(draws.len(), 1);
        assert_eq!(draws[0].pass, 1);
        assert_eq!(draws[0].instance_count as usize, terrain.active_chunks().len());
    }

    #[test]
    fn test_job_failure_recovers() {
        let registry = TerrainRegistry::new();
        let mut terrain = terrain_with(test_config(), Arc::new(MemoryAssetStore::new()), &registry);
        run_frames(&mut terrain, Vec3::new(500.0, 0.0, 500.0), 10);
        assert!(terrain.page_stats().resident > 0);

        terrain.tree = None;
        terrain.recover(JobFailure::Panicked("test".into()));
        assert_eq!(terrain.stats().job_failures, 1);
        assert_eq!(terrain.quadtree().unwrap().node_count(), 1);
        assert_eq!(terrain.page_stats().resident, 0);

        // The next frame starts over from the root
        run_frames(&mut terrain, Vec3::new(500.0, 0.0, 500.0), 20);
        assert!(terrain.page_stats().resident > 0);
    }

    #[test]
    fn test_disable_releases_everything() {
        let registry = TerrainRegistry::new();
        let mut terrain = terrain_with(test_config(), Arc::new(MemoryAssetStore::new()), &registry);
        terrain.prepare(Vec3::new(500.0, 0.0, 500.0));

        // Disabling mid-frame joins the job first
        terrain.disable();
        assert!(!terrain.is_enabled());
        assert!(terrain.quadtree().is_some());
        assert!(terrain.gpu().is_released());
        assert!(!registry.is_active());

        let ops = terrain.gpu().ops().len();
        run_frames(&mut terrain, Vec3::ZERO, 2);
        assert_eq!(terrain.gpu().ops().len(), ops);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = TerrainConfig {
            lod_distances: Vec::new(),
            ..test_config()
        };
        let gpu = SoftwareTerrainGpu::new(&config);
        let result = Terrain::with_loader(
            config,
            gpu,
            AssetLoader::immediate(Arc::new(MemoryAssetStore::new())),
            &TerrainRegistry::new(),
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_failed_combine_reloads_parent() {
        // Four children fill the default pool, so the combine cannot allocate
        let config = TerrainConfig {
            lod_distances: vec![1000.0],
            ..test_config()
        };
        let registry = TerrainRegistry::new();
        let mut terrain = terrain_with(config, Arc::new(MemoryAssetStore::new()), &registry);

        run_frames(&mut terrain, Vec3::new(500.0, 0.0, 500.0), 10);
        assert_eq!(terrain.quadtree().unwrap().leaf_count(), 4);
        assert_eq!(terrain.page_stats().resident, 4);
        assert_eq!(terrain.page_table().capacity(), 4);

        run_frames(&mut terrain, Vec3::new(1.0e6, 0.0, 1.0e6), 10);
        let tree = terrain.quadtree().unwrap();
        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(terrain.stats().combine_failures, 1);

        let root = NodeCoord::ROOT.page(tree.max_depth());
        assert!(terrain.page_table().slot_of(root).is_some());
        assert_eq!(terrain.page_stats().resident, 1);
        let lookup = terrain.gpu().lookup().unwrap();
        assert_ne!(lookup.get(0, 0), NO_PAGE);
        assert!(terrain.is_streaming_idle());
    }
}
