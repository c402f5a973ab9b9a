//! Physical page channels and their storage formats

/// One of the four page channels sharing a physical slot
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TextureChannel {
    Height,
    /// Albedo (rgb) + occlusion (a)
    Albedo,
    /// Tangent-space normal, encoded to [0, 1]
    Normal,
    /// Smoothness (r) + metallic (g)
    SmoothnessMetallic,
}

impl TextureChannel {
    pub const ALL: [TextureChannel; 4] = [
        TextureChannel::Height,
        TextureChannel::Albedo,
        TextureChannel::Normal,
        TextureChannel::SmoothnessMetallic,
    ];

    /// Colour channels written by the colour composite
    pub const COLOR: [TextureChannel; 3] = [
        TextureChannel::Albedo,
        TextureChannel::Normal,
        TextureChannel::SmoothnessMetallic,
    ];

    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn format(self) -> wgpu::TextureFormat {
        match self {
            TextureChannel::Height => wgpu::TextureFormat::R32Float,
            TextureChannel::Albedo => wgpu::TextureFormat::Rgba8Unorm,
            TextureChannel::Normal => wgpu::TextureFormat::Rgba16Float,
            TextureChannel::SmoothnessMetallic => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    pub fn bytes_per_texel(self) -> u32 {
        match self {
            TextureChannel::Height => 4,
            TextureChannel::Albedo => 4,
            TextureChannel::Normal => 8,
            TextureChannel::SmoothnessMetallic => 4,
        }
    }

    /// Value written by the default fill
    pub fn default_value(self) -> [f32; 4] {
        match self {
            TextureChannel::Height => [0.0, 0.0, 0.0, 0.0],
            TextureChannel::Albedo => [0.5, 0.5, 0.5, 1.0],
            TextureChannel::Normal => [0.5, 0.5, 1.0, 0.0],
            TextureChannel::SmoothnessMetallic => [0.0, 0.0, 0.0, 0.0],
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            TextureChannel::Height => "terrain_page_height",
            TextureChannel::Albedo => "terrain_page_albedo",
            TextureChannel::Normal => "terrain_page_normal",
            TextureChannel::SmoothnessMetallic => "terrain_page_smoothness_metallic",
        }
    }
}

/// Page sizes and surface layer count the GPU side allocates for
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PageLayout {
    pub height_resolution: u32,
    pub color_resolution: u32,
    /// Base surface layers (at least one so the array is never empty)
    pub surface_layers: u32,
}

impl PageLayout {
    pub fn resolution(&self, channel: TextureChannel) -> u32 {
        match channel {
            TextureChannel::Height => self.height_resolution,
            _ => self.color_resolution,
        }
    }

    /// Bytes one slot occupies across all four channels
    pub fn slot_bytes(&self) -> u64 {
        TextureChannel::ALL
            .iter()
            .map(|c| {
                let res = self.resolution(*c) as u64;
                res * res * c.bytes_per_texel() as u64
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_indices_are_dense() {
        for (i, channel) in TextureChannel::ALL.iter().enumerate() {
            assert_eq!(channel.index(), i);
        }
        assert!(!TextureChannel::COLOR.contains(&TextureChannel::Height));
    }

    #[test]
    fn test_slot_bytes() {
        let layout = PageLayout {
            height_resolution: 256,
            color_resolution: 1024,
            surface_layers: 1,
        };
        let expected = 256 * 256 * 4 + 1024 * 1024 * (4 + 8 + 4);
        assert_eq!(layout.slot_bytes(), expected);
    }

    #[test]
    fn test_texel_size_matches_format() {
        for channel in TextureChannel::ALL {
            assert_eq!(
                channel.format().block_copy_size(None),
                Some(channel.bytes_per_texel())
            );
        }
    }
}
