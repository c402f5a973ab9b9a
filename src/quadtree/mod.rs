//! Distance-driven terrain quadtree
//!
//! A single root covers the whole terrain. Each [`QuadTree::check_update`]
//! walks the tree top-down against the camera position and
//!
//! - splits a leaf closer than its depth threshold (one level per update),
//!   emitting a `Load` per new child followed by an `Unload` of the parent,
//! - folds an interior node further than its threshold plus hysteresis back
//!   into a leaf, emitting one `Combine` per collapsed group, deepest first.
//!
//! Leaves are the drawn chunks. The tree is moved into a background job for
//! the update and handed back afterwards, so it owns everything it reads.

pub mod event;
pub mod lod;
pub mod node;

pub use event::{ChunkDescriptor, LoadEvent, NodeCoord, PageCoord};
pub use lod::LodThresholds;
pub use node::{Node, NodeArena, NodeId};

use std::sync::Arc;

use crate::core::config::TerrainConfig;
use crate::core::types::DVec2;
use crate::render::buffer::GpuTerrainChunk;
use crate::streaming::metadata::TerrainMetadata;

pub struct QuadTree {
    arena: NodeArena,
    lod: LodThresholds,
    origin: DVec2,
    root_size: f64,
    height_range: [f32; 2],
    metadata: Arc<TerrainMetadata>,
    events: Vec<LoadEvent>,
    /// Set until the first update has requested the root page
    root_pending: bool,
}

impl QuadTree {
    pub fn new(config: &TerrainConfig, metadata: Arc<TerrainMetadata>) -> Self {
        Self {
            arena: NodeArena::new(),
            lod: LodThresholds::new(&config.lod_distances, config.lod_deferred_offset),
            origin: DVec2::from(config.terrain_origin),
            root_size: config.largest_chunk_size,
            height_range: config.height_range,
            metadata,
            events: Vec::new(),
            root_pending: true,
        }
    }

    pub fn max_depth(&self) -> u32 {
        self.lod.max_depth()
    }

    pub fn lod(&self) -> &LodThresholds {
        &self.lod
    }

    /// Edge length of a node at `depth` in world units
    pub fn node_size(&self, depth: u32) -> f64 {
        self.root_size / (1u64 << depth) as f64
    }

    /// World-space min corner of a node on the XZ plane
    pub fn node_min(&self, coord: NodeCoord) -> DVec2 {
        let size = self.node_size(coord.depth);
        self.origin + DVec2::new(coord.x as f64, coord.y as f64) * size
    }

    pub fn node_center(&self, coord: NodeCoord) -> DVec2 {
        self.node_min(coord) + DVec2::splat(self.node_size(coord.depth) * 0.5)
    }

    pub fn descriptor(&self, coord: NodeCoord) -> ChunkDescriptor {
        ChunkDescriptor {
            coord,
            page: coord.page(self.max_depth()),
            world_pos: self.node_min(coord),
            size: self.node_size(coord.depth),
        }
    }

    /// Re-evaluate subdivision against the camera's XZ position
    pub fn check_update(&mut self, camera: DVec2) {
        if self.root_pending {
            self.root_pending = false;
            self.events.push(LoadEvent::Load(self.descriptor(NodeCoord::ROOT)));
        }
        self.update_node(NodeId::ROOT, camera);
    }

    fn update_node(&mut self, id: NodeId, camera: DVec2) {
        let node = self.arena.get(id);
        let coord = node.coord;
        let distance = self.node_center(coord).distance(camera);

        match node.children {
            None => {
                if self.lod.should_subdivide(coord.depth, distance) {
                    self.subdivide(id);
                }
            }
            Some(children) => {
                if self.lod.should_collapse(coord.depth, distance) {
                    self.collapse(id);
                } else {
                    for child in children {
                        self.update_node(child, camera);
                    }
                }
            }
        }
    }

    fn subdivide(&mut self, id: NodeId) {
        let children = self.arena.split(id);
        for child in children {
            let coord = self.arena.get(child).coord;
            self.events.push(LoadEvent::Load(self.descriptor(coord)));
        }
        let page = self.arena.get(id).coord.page(self.max_depth());
        self.events.push(LoadEvent::Unload(page));
    }

    fn collapse(&mut self, id: NodeId) {
        let Some(children) = self.arena.get_mut(id).children.take() else {
            return;
        };
        for child in children {
            self.collapse(child);
        }
        let page = self.arena.get(id).coord.page(self.max_depth());
        self.events.push(LoadEvent::Combine(page));
        for child in children {
            self.arena.release(child);
        }
    }

    /// Append one chunk per leaf, depth-first in quadrant order
    pub fn push_draw_request(&self, list: &mut Vec<GpuTerrainChunk>) {
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            let node = self.arena.get(id);
            match node.children {
                // Reversed so quadrant 0 is popped first
                Some(children) => stack.extend(children.iter().rev()),
                None => list.push(self.chunk_of(node.coord)),
            }
        }
    }

    fn chunk_of(&self, coord: NodeCoord) -> GpuTerrainChunk {
        let min = self.node_min(coord);
        let page = coord.page(self.max_depth());
        GpuTerrainChunk {
            world_pos: [min.x as f32, min.y as f32],
            min_max_height: self
                .metadata
                .height_bounds(coord)
                .unwrap_or(self.height_range),
            scale: [self.node_size(coord.depth) as f32, page.size as f32],
            uv_start_index: [page.start.x, page.start.y],
        }
    }

    pub fn events(&self) -> &[LoadEvent] {
        &self.events
    }

    pub fn drain_events(&mut self) -> std::vec::Drain<'_, LoadEvent> {
        self.events.drain(..)
    }

    pub fn clear_events(&mut self) {
        self.events.clear();
    }

    /// Leaf coordinates in draw order
    pub fn leaves(&self) -> Vec<NodeCoord> {
        let mut out = Vec::new();
        let mut stack = vec![NodeId::ROOT];
        while let Some(id) = stack.pop() {
            let node = self.arena.get(id);
            match node.children {
                Some(children) => stack.extend(children.iter().rev()),
                None => out.push(node.coord),
            }
        }
        out
    }

    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    pub fn node_count(&self) -> usize {
        self.arena.len()
    }

    /// Depth of the leaf containing `point`, `None` outside the terrain
    pub fn depth_at(&self, point: DVec2) -> Option<u32> {
        let local = point - self.origin;
        if local.x < 0.0 || local.y < 0.0 || local.x > self.root_size || local.y > self.root_size {
            return None;
        }

        let mut id = NodeId::ROOT;
        while let Some(children) = self.arena.get(id).children {
            let center = self.node_center(self.arena.get(id).coord);
            let quadrant = (point.x >= center.x) as usize | (((point.y >= center.y) as usize) << 1);
            id = children[quadrant];
        }
        Some(self.arena.get(id).coord.depth)
    }
}
