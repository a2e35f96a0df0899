//! Console GPU texture untiling
//!
//! Xbox 360 textures are stored in the GPU's tiled layout with big-endian
//! words. Untiling moves each block (4x4 texels for compressed formats, one
//! texel otherwise) to its linear position and swaps the words back to
//! little-endian, giving a buffer an ordinary DDS writer can take.

use serde::{Deserialize, Serialize};

/// Pixel formats found in console texture captures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextureFormat {
    Dxt1,
    Dxt3,
    Dxt5,
    /// Two-channel normal map compression (ATI2)
    Dxn,
    A8R8G8B8,
}

impl TextureFormat {
    /// Texels per block side
    pub fn block_dim(self) -> u32 {
        match self {
            TextureFormat::A8R8G8B8 => 1,
            _ => 4,
        }
    }

    pub fn bytes_per_block(self) -> usize {
        match self {
            TextureFormat::Dxt1 => 8,
            TextureFormat::Dxt3 | TextureFormat::Dxt5 | TextureFormat::Dxn => 16,
            TextureFormat::A8R8G8B8 => 4,
        }
    }

    /// Width of the word swapped when restoring little-endian order
    fn swap_width(self) -> usize {
        match self {
            TextureFormat::A8R8G8B8 => 4,
            _ => 2,
        }
    }
}

/// Tiled texture data as found in the capture
#[derive(Debug, Clone, Copy)]
pub struct TiledTexture<'a> {
    pub data: &'a [u8],
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
}

/// Untiled, little-endian texture data
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinearTexture {
    pub width: u32,
    pub height: u32,
    pub format: TextureFormat,
    #[serde(skip)]
    pub data: Vec<u8>,
    /// Blocks whose tiled source lay past the end of the capture; left zero
    pub missing_blocks: usize,
}

impl LinearTexture {
    /// Bytes per row of blocks
    pub fn row_pitch(&self) -> usize {
        blocks(self.width, self.format) as usize * self.format.bytes_per_block()
    }
}

fn blocks(texels: u32, format: TextureFormat) -> u32 {
    texels.div_ceil(format.block_dim())
}

/// Position of block `(x, y)` in a tiled surface `width` blocks wide,
/// in units of blocks
///
/// `texel_pitch` is the block size in bytes (4, 8 or 16).
pub fn tiled_offset(x: u32, y: u32, width: u32, texel_pitch: u32) -> u32 {
    let aligned_width = (width + 31) & !31;
    let log_bpp = (texel_pitch >> 2) + ((texel_pitch >> 1) >> (texel_pitch >> 2));

    let macro_offset = ((x >> 5) + (y >> 5) * (aligned_width >> 5)) << (log_bpp + 7);
    let micro_offset = ((x & 7) + ((y & 6) << 2)) << log_bpp;
    let offset = macro_offset
        + ((micro_offset & !15) << 1)
        + (micro_offset & 15)
        + ((y & 8) << (3 + log_bpp))
        + ((y & 1) << 4);

    (((offset & !511) << 3)
        + ((offset & 448) << 2)
        + (offset & 63)
        + ((y & 16) << 7)
        + ((((y & 8) >> 2) + (x >> 3)) & 3) * 64)
        >> log_bpp
}

/// Untile and byte swap a texture
pub fn untile(texture: &TiledTexture<'_>) -> LinearTexture {
    let format = texture.format;
    let block_bytes = format.bytes_per_block();
    let blocks_wide = blocks(texture.width, format);
    let blocks_high = blocks(texture.height, format);
    let swap = format.swap_width();

    let mut data = vec![0u8; blocks_wide as usize * blocks_high as usize * block_bytes];
    let mut missing_blocks = 0usize;

    for by in 0..blocks_high {
        for bx in 0..blocks_wide {
            let src_block = tiled_offset(bx, by, blocks_wide, block_bytes as u32) as usize;
            let src = src_block * block_bytes;
            let dst = (by as usize * blocks_wide as usize + bx as usize) * block_bytes;

            let Some(source) = texture.data.get(src..src + block_bytes) else {
                missing_blocks += 1;
                continue;
            };
            let target = &mut data[dst..dst + block_bytes];
            for (out, word) in target.chunks_exact_mut(swap).zip(source.chunks_exact(swap)) {
                for (i, b) in word.iter().rev().enumerate() {
                    out[i] = *b;
                }
            }
        }
    }

    if missing_blocks > 0 {
        tracing::debug!(
            "Texture {}x{} {:?}: {} blocks past capture end",
            texture.width,
            texture.height,
            format,
            missing_blocks
        );
    }

    LinearTexture {
        width: texture.width,
        height: texture.height,
        format,
        data,
        missing_blocks,
    }
}
