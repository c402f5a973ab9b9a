//! Node/page coordinates and the structural change events emitted by the quadtree

use crate::core::types::{DVec2, UVec2};

/// Quadtree node position: depth plus cell index within that depth's grid
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeCoord {
    pub depth: u32,
    pub x: u32,
    pub y: u32,
}

impl NodeCoord {
    pub const ROOT: NodeCoord = NodeCoord { depth: 0, x: 0, y: 0 };

    pub fn new(depth: u32, x: u32, y: u32) -> Self {
        Self { depth, x, y }
    }

    /// Child in quadrant order: 0 = (-x,-z), 1 = (+x,-z), 2 = (-x,+z), 3 = (+x,+z)
    pub fn child(&self, quadrant: usize) -> NodeCoord {
        let dx = (quadrant & 1) as u32;
        let dy = (quadrant >> 1) as u32;
        NodeCoord {
            depth: self.depth + 1,
            x: self.x * 2 + dx,
            y: self.y * 2 + dy,
        }
    }

    pub fn parent(&self) -> Option<NodeCoord> {
        (self.depth > 0).then(|| NodeCoord {
            depth: self.depth - 1,
            x: self.x / 2,
            y: self.y / 2,
        })
    }

    /// Page owned by this node in a tree of `max_depth`
    pub fn page(&self, max_depth: u32) -> PageCoord {
        let size = 1u32 << (max_depth - self.depth);
        PageCoord {
            start: UVec2::new(self.x * size, self.y * size),
            size,
        }
    }
}

/// Logical page in units of the finest cell grid (`2^max_depth` cells per axis)
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PageCoord {
    pub start: UVec2,
    pub size: u32,
}

impl PageCoord {
    pub fn new(start: UVec2, size: u32) -> Self {
        Self { start, size }
    }

    /// Depth of the node owning this page
    pub fn depth(&self, max_depth: u32) -> u32 {
        max_depth - self.size.trailing_zeros()
    }

    /// Node owning this page
    pub fn node(&self, max_depth: u32) -> NodeCoord {
        NodeCoord {
            depth: self.depth(max_depth),
            x: self.start.x / self.size,
            y: self.start.y / self.size,
        }
    }

    /// Pages of the four children, quadrant order. Empty for finest-level pages.
    pub fn children(&self) -> Option<[PageCoord; 4]> {
        if self.size < 2 {
            return None;
        }
        let half = self.size / 2;
        Some(std::array::from_fn(|q| PageCoord {
            start: self.start + UVec2::new((q as u32 & 1) * half, (q as u32 >> 1) * half),
            size: half,
        }))
    }

    /// Whether `other` lies fully inside this page
    pub fn contains(&self, other: &PageCoord) -> bool {
        other.start.x >= self.start.x
            && other.start.y >= self.start.y
            && other.start.x + other.size <= self.start.x + self.size
            && other.start.y + other.size <= self.start.y + self.size
    }
}

/// Everything the streaming side needs to load one chunk's page
#[derive(Clone, Debug, PartialEq)]
pub struct ChunkDescriptor {
    pub coord: NodeCoord,
    pub page: PageCoord,
    /// World-space min corner on the XZ plane
    pub world_pos: DVec2,
    /// Edge length in world units
    pub size: f64,
}

impl ChunkDescriptor {
    /// Substitute `{depth}`, `{x}`, `{y}` and `{size}` in an asset key pattern
    ///
    /// # Examples
    /// ```
    /// use terrastream::quadtree::{ChunkDescriptor, NodeCoord};
    /// use glam::DVec2;
    ///
    /// let coord = NodeCoord::new(2, 1, 3);
    /// let chunk = ChunkDescriptor {
    ///     coord,
    ///     page: coord.page(3),
    ///     world_pos: DVec2::ZERO,
    ///     size: 250.0,
    /// };
    /// assert_eq!(chunk.format_key("height/{depth}/{x}_{y}"), "height/2/1_3");
    /// assert_eq!(chunk.format_key("s{size}"), "s2");
    /// ```
    pub fn format_key(&self, pattern: &str) -> String {
        pattern
            .replace("{depth}", &self.coord.depth.to_string())
            .replace("{x}", &self.coord.x.to_string())
            .replace("{y}", &self.coord.y.to_string())
            .replace("{size}", &self.page.size.to_string())
    }
}

/// Structural change produced by a quadtree update, consumed once
#[derive(Clone, Debug, PartialEq)]
pub enum LoadEvent {
    /// A node became a leaf and its page must be streamed in
    Load(ChunkDescriptor),
    /// A node stopped being a leaf; its page slot can be reused
    Unload(PageCoord),
    /// A subtree collapsed; fold the children pages into this one
    Combine(PageCoord),
}

impl LoadEvent {
    pub fn page(&self) -> PageCoord {
        match self {
            LoadEvent::Load(chunk) => chunk.page,
            LoadEvent::Unload(page) | LoadEvent::Combine(page) => *page,
        }
    }
}
