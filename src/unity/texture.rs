use binrw::binrw;
use image::{imageops, DynamicImage, RgbaImage};
use intel_tex_2::{bc1, bc3, bc7, RgbaSurface};

use crate::unity::util::{AlignedBytes, AlignedString, U8Bool};

/// `Texture2D` (class 28) as serialized by Unity 2022.2 and later.
#[binrw]
#[derive(Debug, Clone, PartialEq)]
pub struct Texture2D {
    pub object_name: AlignedString,
    pub forced_fallback_format: i32,
    pub downscale_fallback: U8Bool,
    pub is_alpha_channel_optional: U8Bool,
    #[brw(align_before = 4)]
    pub width: i32,
    pub height: i32,
    pub complete_image_size: u32,
    pub mips_stripped: i32,
    pub texture_format: i32,
    pub mip_count: i32,
    pub is_readable: U8Bool,
    pub is_pre_processed: U8Bool,
    pub ignore_mipmap_limit: U8Bool,
    #[brw(align_before = 4)]
    pub mipmap_limit_group_name: AlignedString,
    pub streaming_mipmaps: U8Bool,
    #[brw(align_before = 4)]
    pub streaming_mipmaps_priority: i32,
    pub image_count: i32,
    pub texture_dimension: i32,
    pub texture_settings: TextureSettings,
    pub lightmap_format: i32,
    pub color_space: i32,
    pub platform_blob: AlignedBytes,
    pub image_data: AlignedBytes,
    pub stream_data: StreamingInfo,
}

#[binrw]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct TextureSettings {
    pub filter_mode: i32,
    pub aniso: i32,
    pub mip_bias: f32,
    pub wrap_u: i32,
    pub wrap_v: i32,
    pub wrap_w: i32,
}

/// Location of texture data stored outside the object, usually in a `.resS` node.
#[binrw]
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StreamingInfo {
    pub offset: u64,
    pub size: u32,
    pub path: AlignedString,
}

impl StreamingInfo {
    pub fn is_streamed(&self) -> bool {
        !self.path.is_empty()
    }

    /// Node name the path points at, e.g. `CAB-1a2b.resS` for
    /// `archive:/CAB-1a2b/CAB-1a2b.resS`.
    pub fn resource_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(self.path.as_str())
    }
}

/// Pixel layouts this tool can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    Alpha8,
    Rgb24,
    Rgba32,
    Argb32,
    /// DXT1
    Bc1,
    /// DXT5
    Bc3,
    Bgra32,
    Bc7,
    R8,
}

impl TextureFormat {
    pub fn from_raw(raw: i32) -> Option<Self> {
        Some(match raw {
            1 => TextureFormat::Alpha8,
            3 => TextureFormat::Rgb24,
            4 => TextureFormat::Rgba32,
            5 => TextureFormat::Argb32,
            10 => TextureFormat::Bc1,
            12 => TextureFormat::Bc3,
            14 => TextureFormat::Bgra32,
            25 => TextureFormat::Bc7,
            63 => TextureFormat::R8,
            _ => return None,
        })
    }

    pub fn raw(self) -> i32 {
        match self {
            TextureFormat::Alpha8 => 1,
            TextureFormat::Rgb24 => 3,
            TextureFormat::Rgba32 => 4,
            TextureFormat::Argb32 => 5,
            TextureFormat::Bc1 => 10,
            TextureFormat::Bc3 => 12,
            TextureFormat::Bgra32 => 14,
            TextureFormat::Bc7 => 25,
            TextureFormat::R8 => 63,
        }
    }

    /// Encodes `image` in this format. Rows are flipped since Unity stores textures
    /// bottom-up. Block compressed formats cover the image in whole 4x4 blocks.
    pub fn encode(self, image: &DynamicImage) -> Vec<u8> {
        let rgba = imageops::flip_vertical(&image.to_rgba8());
        let pixels = rgba.pixels();
        match self {
            TextureFormat::Bc1 => compress(&rgba, bc1::compress_blocks),
            TextureFormat::Bc3 => compress(&rgba, bc3::compress_blocks),
            TextureFormat::Bc7 => compress(&rgba, |surface| bc7::compress_blocks(&bc7::alpha_basic_settings(), surface)),
            TextureFormat::Alpha8 => pixels.map(|p| p[3]).collect(),
            TextureFormat::R8 => pixels.map(|p| p[0]).collect(),
            TextureFormat::Rgb24 => pixels.flat_map(|p| [p[0], p[1], p[2]]).collect(),
            TextureFormat::Rgba32 => pixels.flat_map(|p| p.0).collect(),
            TextureFormat::Argb32 => pixels.flat_map(|p| [p[3], p[0], p[1], p[2]]).collect(),
            TextureFormat::Bgra32 => pixels.flat_map(|p| [p[2], p[1], p[0], p[3]]).collect(),
        }
    }
}

/// Pads `rgba` to whole blocks by repeating its last row and column, then hands it
/// to a block encoder.
fn compress(rgba: &RgbaImage, encoder: impl Fn(&RgbaSurface) -> Vec<u8>) -> Vec<u8> {
    let (width, height) = rgba.dimensions();
    let padded_width = width.div_ceil(4) * 4;
    let padded_height = height.div_ceil(4) * 4;
    let padded = if (padded_width, padded_height) == (width, height) {
        rgba.clone()
    } else {
        RgbaImage::from_fn(padded_width, padded_height, |x, y| {
            *rgba.get_pixel(x.min(width.saturating_sub(1)), y.min(height.saturating_sub(1)))
        })
    };
    encoder(&RgbaSurface {
        data: padded.as_raw(),
        width: padded_width,
        height: padded_height,
        stride: padded_width * 4,
    })
}

/// Picks the output format for a texture currently stored as `raw`. Formats this tool
/// cannot encode (ASTC, ETC and the like) fall back to RGBA32.
pub fn target_format(raw: i32) -> TextureFormat {
    TextureFormat::from_raw(raw).unwrap_or(TextureFormat::Rgba32)
}
