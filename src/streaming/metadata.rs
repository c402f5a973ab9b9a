//! Persisted per-node terrain metadata
//!
//! Stores the min/max height of every quadtree node that has ever been
//! recorded, one dense grid per depth. On disk the table is an rkyv archive
//! compressed with LZ4. A missing file is not an error: the terrain falls
//! back to the configured height range until bounds are recorded.

use std::io;
use std::path::Path;

use rkyv::{Archive, Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;
use crate::quadtree::NodeCoord;

const EMPTY_BOUNDS: [f32; 2] = [f32::INFINITY, f32::NEG_INFINITY];

#[derive(Archive, Deserialize, Serialize, Clone, Debug, Default, PartialEq)]
pub struct TerrainMetadata {
    pub max_depth: u32,
    /// `levels[d]` holds `4^d` `[min, max]` pairs, row-major by `(x, y)`.
    /// Levels are allocated on first write.
    pub levels: Vec<Vec<[f32; 2]>>,
}

impl TerrainMetadata {
    pub fn new(max_depth: u32) -> Self {
        Self {
            max_depth,
            levels: Vec::new(),
        }
    }

    fn index(coord: NodeCoord) -> usize {
        let side = 1usize << coord.depth;
        coord.y as usize * side + coord.x as usize
    }

    /// Recorded height bounds of a node
    pub fn height_bounds(&self, coord: NodeCoord) -> Option<[f32; 2]> {
        let bounds = *self.levels.get(coord.depth as usize)?.get(Self::index(coord))?;
        (bounds[0] <= bounds[1]).then_some(bounds)
    }

    /// Widen the bounds of `coord` and every ancestor to include `bounds`
    pub fn record(&mut self, coord: NodeCoord, bounds: [f32; 2]) {
        if coord.depth > self.max_depth {
            log::warn!(
                "Ignoring height bounds for depth {} (max depth {})",
                coord.depth,
                self.max_depth
            );
            return;
        }

        let mut current = Some(coord);
        while let Some(c) = current {
            let level = self.level_mut(c.depth);
            let entry = &mut level[Self::index(c)];
            entry[0] = entry[0].min(bounds[0]);
            entry[1] = entry[1].max(bounds[1]);
            current = c.parent();
        }
    }

    fn level_mut(&mut self, depth: u32) -> &mut Vec<[f32; 2]> {
        let depth = depth as usize;
        while self.levels.len() <= depth {
            let side = 1usize << self.levels.len();
            self.levels.push(vec![EMPTY_BOUNDS; side * side]);
        }
        let level = &mut self.levels[depth];
        let cells = 1usize << (2 * depth);
        if level.len() < cells {
            level.resize(cells, EMPTY_BOUNDS);
        }
        level
    }

    /// Reject level tables that do not match `max_depth`
    fn validate(&self) -> Result<()> {
        if self.levels.len() > self.max_depth as usize + 1 {
            return Err(Error::Metadata(format!(
                "{} levels stored for max depth {}",
                self.levels.len(),
                self.max_depth
            )));
        }
        for (depth, level) in self.levels.iter().enumerate() {
            let expected = 1usize << (2 * depth);
            if level.len() != expected {
                return Err(Error::Metadata(format!(
                    "level {} has {} entries, expected {}",
                    depth,
                    level.len(),
                    expected
                )));
            }
        }
        Ok(())
    }

    /// Archive and compress
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| Error::Metadata(e.to_string()))?;
        Ok(lz4_flex::compress_prepend_size(&bytes))
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        let decompressed = lz4_flex::decompress_size_prepended(data)
            .map_err(|e| Error::Metadata(format!("LZ4 decompression failed: {}", e)))?;
        // Archive access needs aligned storage
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(decompressed.len());
        aligned.extend_from_slice(&decompressed);
        let archived = rkyv::access::<ArchivedTerrainMetadata, rkyv::rancor::Error>(&aligned)
            .map_err(|e| Error::Metadata(e.to_string()))?;
        let metadata = rkyv::deserialize::<TerrainMetadata, rkyv::rancor::Error>(archived)
            .map_err(|e| Error::Metadata(e.to_string()))?;
        metadata.validate()?;
        Ok(metadata)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_bytes()?)?;
        Ok(())
    }

    /// Load from disk, or return empty metadata when the file does not exist
    pub fn load(path: &Path, max_depth: u32) -> Result<Self> {
        match std::fs::read(path) {
            Ok(data) => {
                let metadata = Self::from_bytes(&data)?;
                if metadata.max_depth != max_depth {
                    log::warn!(
                        "Metadata at {} was built for depth {}, terrain uses {}",
                        path.display(),
                        metadata.max_depth,
                        max_depth
                    );
                }
                Ok(metadata)
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                log::info!("No terrain metadata at {}, starting empty", path.display());
                Ok(Self::new(max_depth))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Like [`load`](Self::load) but logs failures and falls back to empty
    pub fn load_or_empty(path: &Path, max_depth: u32) -> Self {
        Self::load(path, max_depth).unwrap_or_else(|e| {
            log::warn!("Failed to read terrain metadata {}: {}", path.display(), e);
            Self::new(max_depth)
        })
    }
}
