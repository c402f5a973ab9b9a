//! Cooperative page streaming
//!
//! [`StreamingPipeline`] is a state machine resumed once per frame by the
//! coordinator. Each [`resume`](StreamingPipeline::resume) runs until the
//! next suspension point and returns; it never blocks. Suspension points:
//!
//! - while requested assets are unresolved, then once more after they are
//! - after finishing a batch of commands (one tick before the next batch)
//! - while there is nothing to do
//!
//! Base surface textures are primed exactly once before any page composite.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::core::config::{AssetKeyPatterns, SurfaceTextureSet};
use crate::quadtree::ChunkDescriptor;
use crate::render::gpu::{SurfaceLayer, TerrainGpu};
use crate::streaming::asset::AssetKind;
use crate::streaming::loader::{AssetLoader, AssetTicket};
use crate::virtual_texture::VirtualTexture;

/// Counters for streaming work
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub pages_composited: u64,
    pub default_color_fills: u64,
    pub default_height_fills: u64,
    pub surface_default_fills: u64,
    /// Loads skipped because the page was unloaded or combined first
    pub cancelled: u64,
    pub allocation_failures: u64,
    pub composite_failures: u64,
    pub batches: u64,
}

/// Assets of one page being streamed
struct PageRequest {
    chunk: ChunkDescriptor,
    mask: AssetTicket,
    height: AssetTicket,
    settled: bool,
}

enum State {
    /// Surface priming not started yet
    Unprimed,
    Priming {
        layers: Vec<[AssetTicket; 3]>,
        settled: bool,
    },
    /// Waiting for commands
    Idle,
    Batch {
        batch: VecDeque<ChunkDescriptor>,
        current: Option<PageRequest>,
    },
    Stopped,
}

enum Step {
    Continue,
    Yield,
}

pub struct StreamingPipeline {
    state: State,
    loader: AssetLoader,
    commands: VecDeque<ChunkDescriptor>,
    keys: AssetKeyPatterns,
    surfaces: Vec<SurfaceTextureSet>,
    alive: Arc<AtomicBool>,
    stats: PipelineStats,
}

impl StreamingPipeline {
    pub fn new(loader: AssetLoader, keys: AssetKeyPatterns, surfaces: Vec<SurfaceTextureSet>) -> Self {
        Self {
            state: State::Unprimed,
            loader,
            commands: VecDeque::new(),
            keys,
            surfaces,
            alive: Arc::new(AtomicBool::new(true)),
            stats: PipelineStats::default(),
        }
    }

    /// Queue a page load. Commands arriving mid-batch run in the next batch.
    pub fn enqueue(&mut self, chunk: ChunkDescriptor) {
        self.commands.push_back(chunk);
    }

    /// Shared liveness flag; clearing it stops the pipeline at its next resume
    pub fn liveness(&self) -> Arc<AtomicBool> {
        self.alive.clone()
    }

    pub fn stop(&mut self) {
        self.alive.store(false, Ordering::Release);
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    pub fn is_primed(&self) -> bool {
        !matches!(self.state, State::Unprimed | State::Priming { .. })
    }

    /// No queued commands and no batch in progress
    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle) && self.commands.is_empty()
    }

    pub fn queued(&self) -> usize {
        let in_batch = match &self.state {
            State::Batch { batch, current } => batch.len() + current.is_some() as usize,
            _ => 0,
        };
        self.commands.len() + in_batch
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn loader(&self) -> &AssetLoader {
        &self.loader
    }

    /// Run until the next suspension point
    pub fn resume<G: TerrainGpu>(&mut self, vt: &mut VirtualTexture, gpu: &mut G) {
        if !self.is_alive() {
            self.shutdown();
            return;
        }
        self.loader.poll();
        while let Step::Continue = self.step(vt, gpu) {}
    }

    /// Release everything in flight and stay stopped
    fn shutdown(&mut self) {
        match std::mem::replace(&mut self.state, State::Stopped) {
            State::Priming { layers, .. } => {
                for ticket in layers.into_iter().flatten() {
                    self.loader.release(ticket);
                }
            }
            State::Batch { current: Some(request), .. } => {
                self.loader.release(request.mask);
                self.loader.release(request.height);
            }
            State::Stopped => return,
            _ => {}
        }
        self.commands.clear();
        log::info!("Terrain streaming stopped");
    }

    fn step<G: TerrainGpu>(&mut self, vt: &mut VirtualTexture, gpu: &mut G) -> Step {
        match std::mem::replace(&mut self.state, State::Idle) {
            State::Stopped => {
                self.state = State::Stopped;
                Step::Yield
            }
            State::Unprimed => {
                if self.surfaces.is_empty() {
                    gpu.set_surface_count(0);
                    return Step::Continue;
                }
                let layers = self
                    .surfaces
                    .iter()
                    .map(|set| {
                        [&set.albedo_occlusion, &set.normal, &set.smoothness_metallic]
                            .map(|key| self.loader.request(key.clone(), AssetKind::Surface))
                    })
                    .collect();
                log::info!("Priming {} terrain surface layers", self.surfaces.len());
                self.state = State::Priming { layers, settled: false };
                Step::Continue
            }
            State::Priming { layers, settled } => {
                let ready = layers.iter().flatten().all(|t| self.loader.is_ready(*t));
                if !ready || !settled {
                    self.state = State::Priming { layers, settled: ready };
                    return Step::Yield;
                }
                self.upload_surfaces(&layers, gpu);
                Step::Continue
            }
            State::Idle => {
                if self.commands.is_empty() {
                    return Step::Yield;
                }
                let batch = std::mem::take(&mut self.commands);
                log::debug!("Streaming batch of {} pages", batch.len());
                self.state = State::Batch { batch, current: None };
                Step::Continue
            }
            State::Batch { mut batch, current: None } => {
                let Some(chunk) = batch.pop_front() else {
                    // One tick between batches
                    self.stats.batches += 1;
                    return Step::Yield;
                };
                if !vt.is_pending(chunk.page) {
                    log::trace!("Skipping cancelled load {:?}", chunk.page);
                    self.stats.cancelled += 1;
                    self.state = State::Batch { batch, current: None };
                    return Step::Continue;
                }
                let request = PageRequest {
                    mask: self.loader.request(chunk.format_key(&self.keys.mask), AssetKind::Mask),
                    height: self.loader.request(chunk.format_key(&self.keys.height), AssetKind::Height),
                    chunk,
                    settled: false,
                };
                self.state = State::Batch { batch, current: Some(request) };
                Step::Continue
            }
            State::Batch { batch, current: Some(mut request) } => {
                let ready = self.loader.is_ready(request.mask) && self.loader.is_ready(request.height);
                if !ready || !request.settled {
                    request.settled = ready;
                    self.state = State::Batch { batch, current: Some(request) };
                    return Step::Yield;
                }
                self.composite(&request, vt, gpu);
                self.loader.release(request.mask);
                self.loader.release(request.height);
                self.state = State::Batch { batch, current: None };
                Step::Continue
            }
        }
    }

    fn upload_surfaces<G: TerrainGpu>(&mut self, layers: &[[AssetTicket; 3]], gpu: &mut G) {
        for (layer, tickets) in layers.iter().enumerate() {
            let assets = tickets.map(|t| self.loader.get(t).filter(|a| !a.is_empty()));
            let surface = match assets {
                [Some(albedo_occlusion), Some(normal), Some(smoothness_metallic)] => Some(SurfaceLayer {
                    albedo_occlusion,
                    normal,
                    smoothness_metallic,
                }),
                _ => {
                    log::warn!("Surface layer {} is missing textures, using default surface", layer);
                    self.stats.surface_default_fills += 1;
                    None
                }
            };
            if let Err(e) = gpu.upload_surface_layer(layer as u32, surface) {
                log::error!("Failed to upload surface layer {}: {}", layer, e);
            }
        }
        for ticket in layers.iter().flatten() {
            self.loader.release(*ticket);
        }
        gpu.set_surface_count(layers.len() as u32);
    }

    fn composite<G: TerrainGpu>(&mut self, request: &PageRequest, vt: &mut VirtualTexture, gpu: &mut G) {
        let page = request.chunk.page;
        if !vt.take_pending(page) {
            log::trace!("Load of {:?} cancelled while streaming", page);
            self.stats.cancelled += 1;
            return;
        }

        let slot = match vt.load_new_texture(page) {
            Ok(slot) => slot,
            Err(e) => {
                log::warn!("No slot for page {:?}: {}", page, e);
                self.stats.allocation_failures += 1;
                return;
            }
        };

        let mask = self.loader.get(request.mask).filter(|a| !a.is_empty());
        let height = self.loader.get(request.height).filter(|a| !a.is_empty());
        if mask.is_none() {
            self.stats.default_color_fills += 1;
        }
        if height.is_none() {
            self.stats.default_height_fills += 1;
        }

        let result = gpu
            .composite_color(slot, mask)
            .and_then(|_| gpu.composite_height(slot, height));
        vt.complete_write(slot);

        match result {
            Ok(()) => {
                self.stats.pages_composited += 1;
                log::trace!("Composited {:?} into slot {}", page, slot);
            }
            Err(e) => {
                log::error!("Composite of {:?} failed: {}", page, e);
                self.stats.composite_failures += 1;
                vt.unload_texture(page);
            }
        }
    }
}
