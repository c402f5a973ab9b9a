//! Terrain streaming configuration

use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::core::error::Error;
use crate::core::types::Result;

/// Resolution of one height page in texels
pub const HEIGHT_RESOLUTION: u32 = 256;

/// Resolution of one colour page in texels
pub const COLOR_RESOLUTION: u32 = 1024;

/// Chunk buffer capacity allocated before the first frame
pub const INITIAL_CHUNK_CAPACITY: usize = 500;

/// Deepest supported LOD count; the lookup grid is `2^levels` cells square
pub const MAX_LOD_LEVELS: usize = 12;

/// Asset keys for one base surface material (the non-virtualized
/// high-frequency textures blended by the page masks)
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SurfaceTextureSet {
    /// Albedo (rgb) + occlusion (a)
    pub albedo_occlusion: String,
    /// Tangent-space normal (rg)
    pub normal: String,
    /// Smoothness (r) + metallic (g)
    pub smoothness_metallic: String,
}

/// Patterns used to turn a chunk descriptor into asset keys.
///
/// Supported placeholders: `{depth}`, `{x}`, `{y}`, `{size}`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetKeyPatterns {
    pub height: String,
    pub mask: String,
}

impl Default for AssetKeyPatterns {
    fn default() -> Self {
        Self {
            height: "terrain/height/{depth}/{x}_{y}".to_string(),
            mask: "terrain/mask/{depth}/{x}_{y}".to_string(),
        }
    }
}

/// Configuration for a streamed terrain
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerrainConfig {
    /// Subdivision distances, coarsest level first
    pub lod_distances: Vec<f32>,
    /// Hysteresis added to a level's threshold before it collapses
    pub lod_deferred_offset: f32,
    /// Edge length of the root chunk in world units
    pub largest_chunk_size: f64,
    /// World-space XZ position of the terrain's min corner
    pub terrain_origin: [f64; 2],
    /// Grid resolution of one drawn chunk (quads per edge)
    pub planar_resolution: u32,
    /// Location of the persisted quadtree/page metadata
    pub read_write_path: PathBuf,
    /// Texels per edge of a height page
    pub height_resolution: u32,
    /// Texels per edge of a colour page
    pub color_resolution: u32,
    /// Explicit physical slot count; derived from the LOD count when absent
    pub page_capacity: Option<u32>,
    /// Chunk buffer capacity before the first frame
    pub initial_chunk_capacity: usize,
    /// Height bounds used when the metadata has no entry for a chunk
    pub height_range: [f32; 2],
    /// Asset key formatting
    pub asset_keys: AssetKeyPatterns,
    /// Base surface materials primed once at startup
    pub surface_textures: Vec<SurfaceTextureSet>,
    /// Surface texture repeats across one page
    pub surface_tiling: f32,
    /// Debug name used in logs and by the registry
    pub name: String,
}

impl Default for TerrainConfig {
    fn default() -> Self {
        Self {
            lod_distances: vec![1000.0, 600.0, 300.0],
            lod_deferred_offset: 2.0,
            largest_chunk_size: 1000.0,
            terrain_origin: [0.0, 0.0],
            planar_resolution: 10,
            read_write_path: PathBuf::from("assets/terrain/terrain.mquad"),
            height_resolution: HEIGHT_RESOLUTION,
            color_resolution: COLOR_RESOLUTION,
            page_capacity: None,
            initial_chunk_capacity: INITIAL_CHUNK_CAPACITY,
            height_range: [0.0, 500.0],
            asset_keys: AssetKeyPatterns::default(),
            surface_textures: Vec::new(),
            surface_tiling: 4.0,
            name: "terrain".to_string(),
        }
    }
}

impl TerrainConfig {
    /// Number of LOD levels (also the deepest quadtree depth)
    pub fn lod_count(&self) -> u32 {
        self.lod_distances.len() as u32
    }

    /// Check the configuration for values the streaming core cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.lod_distances.is_empty() {
            return Err(Error::Config("lod_distances must not be empty".into()));
        }
        if self.lod_distances.len() > MAX_LOD_LEVELS {
            return Err(Error::Config(format!(
                "{} LOD levels requested, at most {} are supported",
                self.lod_distances.len(),
                MAX_LOD_LEVELS
            )));
        }
        if self.lod_distances.iter().any(|d| !d.is_finite() || *d < 0.0) {
            return Err(Error::Config("lod_distances must be finite and non-negative".into()));
        }
        if !(self.largest_chunk_size > 0.0) {
            return Err(Error::Config("largest_chunk_size must be positive".into()));
        }
        if self.lod_deferred_offset < 0.0 {
            return Err(Error::Config("lod_deferred_offset must be non-negative".into()));
        }
        if self.height_resolution == 0 || self.color_resolution == 0 {
            return Err(Error::Config("page resolutions must be non-zero".into()));
        }
        if self.height_range[0] > self.height_range[1] {
            return Err(Error::Config("height_range min exceeds max".into()));
        }
        if self.page_capacity == Some(0) {
            return Err(Error::Config("page_capacity must be non-zero".into()));
        }
        Ok(())
    }

    /// Save to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        std::fs::write(path, json)?;
        Ok(())
    }

    /// Load from a JSON file and validate it
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }
}
