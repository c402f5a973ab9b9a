//! Decoded texture assets and the storage backends that resolve them

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::core::error::Error;
use crate::core::types::Result;

/// How an asset key should be decoded
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum AssetKind {
    /// Splat mask: one weight per surface layer in rgba
    Mask,
    /// Single-channel height
    Height,
    /// Base surface material texture
    Surface,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TexelData {
    Rgba8(Vec<[u8; 4]>),
    Luma16(Vec<u16>),
    R32Float(Vec<f32>),
}

/// CPU-side texture resolved from an asset key
#[derive(Clone, Debug, PartialEq)]
pub struct TextureAsset {
    pub width: u32,
    pub height: u32,
    pub data: TexelData,
}

impl TextureAsset {
    pub fn rgba8(width: u32, height: u32, texels: Vec<[u8; 4]>) -> Self {
        debug_assert_eq!(texels.len(), (width * height) as usize);
        Self { width, height, data: TexelData::Rgba8(texels) }
    }

    pub fn luma16(width: u32, height: u32, texels: Vec<u16>) -> Self {
        debug_assert_eq!(texels.len(), (width * height) as usize);
        Self { width, height, data: TexelData::Luma16(texels) }
    }

    pub fn r32_float(width: u32, height: u32, texels: Vec<f32>) -> Self {
        debug_assert_eq!(texels.len(), (width * height) as usize);
        Self { width, height, data: TexelData::R32Float(texels) }
    }

    pub fn uniform_rgba8(width: u32, height: u32, value: [u8; 4]) -> Self {
        Self::rgba8(width, height, vec![value; (width * height) as usize])
    }

    pub fn uniform_height(width: u32, height: u32, value: f32) -> Self {
        Self::r32_float(width, height, vec![value; (width * height) as usize])
    }

    /// No texels to sample: zero-sized, or data shorter than the extent
    pub fn is_empty(&self) -> bool {
        let texels = match &self.data {
            TexelData::Rgba8(t) => t.len(),
            TexelData::Luma16(t) => t.len(),
            TexelData::R32Float(t) => t.len(),
        };
        self.width == 0 || self.height == 0 || texels < self.width as usize * self.height as usize
    }

    /// Texel as normalized floats; single-channel data lands in `r`.
    /// Empty assets read as zero.
    pub fn texel(&self, x: u32, y: u32) -> [f32; 4] {
        if self.is_empty() {
            return [0.0; 4];
        }
        let i = (y.min(self.height - 1) * self.width + x.min(self.width - 1)) as usize;
        match &self.data {
            TexelData::Rgba8(t) => t[i].map(|c| c as f32 / 255.0),
            TexelData::Luma16(t) => [t[i] as f32 / 65535.0, 0.0, 0.0, 1.0],
            TexelData::R32Float(t) => [t[i], 0.0, 0.0, 1.0],
        }
    }

    /// Nearest-neighbour resample onto a `resolution` square
    pub fn resample(&self, resolution: u32) -> Vec<[f32; 4]> {
        if self.is_empty() {
            return vec![[0.0; 4]; (resolution * resolution) as usize];
        }
        let mut out = Vec::with_capacity((resolution * resolution) as usize);
        for y in 0..resolution {
            let sy = ((y as u64 * 2 + 1) * self.height as u64 / (resolution as u64 * 2)) as u32;
            for x in 0..resolution {
                let sx = ((x as u64 * 2 + 1) * self.width as u64 / (resolution as u64 * 2)) as u32;
                out.push(self.texel(sx, sy));
            }
        }
        out
    }

    /// Rows of RGBA8 texels, for GPU upload
    pub fn to_rgba8_bytes(&self) -> Vec<u8> {
        match &self.data {
            TexelData::Rgba8(t) => bytemuck::cast_slice(t).to_vec(),
            _ => (0..self.height)
                .flat_map(|y| (0..self.width).map(move |x| (x, y)))
                .flat_map(|(x, y)| self.texel(x, y).map(|c| (c.clamp(0.0, 1.0) * 255.0).round() as u8))
                .collect(),
        }
    }

    /// Rows of `r` as f32, for GPU upload
    pub fn to_r32_floats(&self) -> Vec<f32> {
        match &self.data {
            TexelData::R32Float(t) => t.clone(),
            _ => (0..self.height)
                .flat_map(|y| (0..self.width).map(move |x| (x, y)))
                .map(|(x, y)| self.texel(x, y)[0])
                .collect(),
        }
    }

    pub fn byte_size(&self) -> usize {
        match &self.data {
            TexelData::Rgba8(t) => t.len() * 4,
            TexelData::Luma16(t) => t.len() * 2,
            TexelData::R32Float(t) => t.len() * 4,
        }
    }
}

/// Backend resolving asset keys to textures.
///
/// `Ok(None)` means the asset does not exist, which callers handle with a
/// default fill. Implementations are called from loader worker threads.
pub trait AssetStore: Send + Sync + 'static {
    fn load(&self, key: &str, kind: AssetKind) -> Result<Option<TextureAsset>>;
}

/// In-memory store, for tests and procedurally generated terrains
#[derive(Default)]
pub struct MemoryAssetStore {
    assets: RwLock<HashMap<String, TextureAsset>>,
}

impl MemoryAssetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: impl Into<String>, asset: TextureAsset) {
        if let Ok(mut assets) = self.assets.write() {
            assets.insert(key.into(), asset);
        }
    }

    pub fn remove(&self, key: &str) -> Option<TextureAsset> {
        self.assets.write().ok()?.remove(key)
    }

    pub fn len(&self) -> usize {
        self.assets.read().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AssetStore for MemoryAssetStore {
    fn load(&self, key: &str, _kind: AssetKind) -> Result<Option<TextureAsset>> {
        let assets = self.assets.read().map_err(|e| Error::Asset {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        Ok(assets.get(key).cloned())
    }
}

/// Reads `<root>/<key>.png` from disk
pub struct DirectoryAssetStore {
    root: PathBuf,
}

impl DirectoryAssetStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.png", key))
    }
}

impl AssetStore for DirectoryAssetStore {
    fn load(&self, key: &str, kind: AssetKind) -> Result<Option<TextureAsset>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let image = image::open(&path).map_err(|e| Error::Asset {
            key: key.to_string(),
            reason: e.to_string(),
        })?;

        let asset = match kind {
            AssetKind::Height => {
                let luma = image.to_luma16();
                let (width, height) = luma.dimensions();
                TextureAsset::luma16(width, height, luma.into_raw())
            }
            AssetKind::Mask | AssetKind::Surface => {
                let rgba = image.to_rgba8();
                let (width, height) = rgba.dimensions();
                let texels = rgba.pixels().map(|p| p.0).collect();
                TextureAsset::rgba8(width, height, texels)
            }
        };
        Ok(Some(asset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texel_normalization() {
        let rgba = TextureAsset::uniform_rgba8(2, 2, [255, 0, 51, 255]);
        assert_eq!(rgba.texel(1, 1), [1.0, 0.0, 0.2, 1.0]);

        let luma = TextureAsset::luma16(1, 1, vec![65535]);
        assert_eq!(luma.texel(0, 0)[0], 1.0);
    }

    #[test]
    fn test_resample_nearest() {
        let asset = TextureAsset::r32_float(2, 1, vec![1.0, 2.0]);
        let out = asset.resample(4);
        let row: Vec<f32> = out[..4].iter().map(|t| t[0]).collect();
        assert_eq!(row, vec![1.0, 1.0, 2.0, 2.0]);
        assert_eq!(out.len(), 16);
    }

    #[test]
    fn test_empty_asset_samples_zero() {
        let empty = TextureAsset::rgba8(0, 0, Vec::new());
        assert!(empty.is_empty());
        assert_eq!(empty.texel(3, 3), [0.0; 4]);
        assert_eq!(empty.resample(2), vec![[0.0; 4]; 4]);

        // Data shorter than the declared extent
        let short = TextureAsset { width: 4, height: 4, data: TexelData::R32Float(vec![1.0]) };
        assert!(short.is_empty());
        assert_eq!(short.texel(2, 2), [0.0; 4]);
        assert!(!TextureAsset::uniform_height(1, 1, 5.0).is_empty());
    }

    #[test]
    fn test_conversions() {
        let asset = TextureAsset::luma16(2, 1, vec![0, 65535]);
        assert_eq!(asset.to_r32_floats(), vec![0.0, 1.0]);
        assert_eq!(asset.to_rgba8_bytes(), vec![0, 0, 0, 255, 255, 0, 0, 255]);
        assert_eq!(asset.byte_size(), 4);
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryAssetStore::new();
        store.insert("a", TextureAsset::uniform_height(1, 1, 3.0));
        assert_eq!(store.len(), 1);
        assert!(store.load("a", AssetKind::Height).unwrap().is_some());
        assert!(store.load("b", AssetKind::Height).unwrap().is_none());
    }

    #[test]
    fn test_directory_store_decodes_png() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryAssetStore::new(dir.path());

        std::fs::create_dir_all(dir.path().join("mask")).unwrap();
        let mask = image::RgbaImage::from_pixel(4, 4, image::Rgba([255, 0, 0, 0]));
        mask.save(store.path_for("mask/0")).unwrap();

        let height = image::ImageBuffer::<image::Luma<u16>, _>::from_pixel(2, 2, image::Luma([32768u16]));
        height.save(store.path_for("height")).unwrap();

        let loaded = store.load("mask/0", AssetKind::Mask).unwrap().unwrap();
        assert_eq!((loaded.width, loaded.height), (4, 4));
        assert_eq!(loaded.texel(3, 3), [1.0, 0.0, 0.0, 0.0]);

        let loaded = store.load("height", AssetKind::Height).unwrap().unwrap();
        assert!(matches!(loaded.data, TexelData::Luma16(_)));
        assert!((loaded.texel(0, 0)[0] - 0.5).abs() < 1e-3);

        assert!(store.load("missing", AssetKind::Mask).unwrap().is_none());
    }

    #[test]
    fn test_directory_store_bad_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = DirectoryAssetStore::new(dir.path());
        std::fs::write(store.path_for("broken"), b"not a png").unwrap();
        assert!(matches!(
            store.load("broken", AssetKind::Mask),
            Err(Error::Asset { .. })
        ));
    }
}
