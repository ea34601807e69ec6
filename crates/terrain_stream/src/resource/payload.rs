//! Payload capabilities.
//!
//! The resource tree is generic over a [`PayloadKind`], which names the
//! decoded geometry and texture types. Everything else about the tree is
//! shared between geometry-bearing and texture-only directories.

use crate::error::{Result, StreamError};
use crate::format::ImageChunk;

/// How the two payload axes of a tree decode.
pub trait PayloadKind: Send + Sync + 'static {
  type Geometry: Send + 'static;
  type Texture: Send + 'static;

  fn decode_geometry(bytes: Vec<u8>) -> Result<Self::Geometry>;
  fn decode_texture(bytes: Vec<u8>) -> Result<Self::Texture>;
}

/// A decoded payload of either axis, as produced off-thread by the loader.
pub enum Payload<K: PayloadKind> {
  Geometry(K::Geometry),
  Texture(K::Texture),
}

/// Default payload kind: height grids and raw image tiles.
#[derive(Clone, Copy, Debug, Default)]
pub struct RawKind;

impl PayloadKind for RawKind {
  type Geometry = HeightGrid;
  type Texture = ImageChunk;

  fn decode_geometry(bytes: Vec<u8>) -> Result<HeightGrid> {
    HeightGrid::decode(&bytes)
  }

  fn decode_texture(bytes: Vec<u8>) -> Result<ImageChunk> {
    ImageChunk::decode(&bytes)
  }
}

/// Square grid of stored 16-bit heights, row-major from the south-west.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeightGrid {
  pub size: u32,
  pub heights: Vec<i16>,
}

impl HeightGrid {
  pub fn decode(bytes: &[u8]) -> Result<Self> {
    let invalid = |reason: String| StreamError::InvalidPayload { offset: 0, reason };
    if bytes.len() < 4 {
      return Err(invalid(format!("height grid of {} bytes has no header", bytes.len())));
    }
    let size = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
    let body = &bytes[4..];
    let expected = (size as usize) * (size as usize) * 2;
    if body.len() != expected {
      return Err(invalid(format!(
        "{size}x{size} height grid needs {expected} bytes, found {}",
        body.len()
      )));
    }
    let heights = body
      .chunks_exact(2)
      .map(|b| i16::from_le_bytes([b[0], b[1]]))
      .collect();
    Ok(Self { size, heights })
  }

  #[inline]
  pub fn height(&self, x: u32, y: u32) -> i16 {
    self.heights[(y * self.size + x) as usize]
  }
}

/// Read access to decoded texels, for blitting into clip levels.
pub trait TexelSource {
  /// Side of the square tile in texels.
  fn size(&self) -> u32;

  /// RGBA texel at (x, y).
  fn texel(&self, x: u32, y: u32) -> [u8; 4];

  /// Write `out.len() / 4` RGBA texels of row `y` starting at `x`.
  fn copy_row_rgba(&self, x: u32, y: u32, out: &mut [u8]) {
    for (i, px) in out.chunks_exact_mut(4).enumerate() {
      px.copy_from_slice(&self.texel(x + i as u32, y));
    }
  }
}

impl TexelSource for ImageChunk {
  fn size(&self) -> u32 {
    self.width
  }

  fn texel(&self, x: u32, y: u32) -> [u8; 4] {
    ImageChunk::texel(self, x, y)
  }

  fn copy_row_rgba(&self, x: u32, y: u32, out: &mut [u8]) {
    let len = (out.len() / 4) as u32;
    let src = self.span(x, y, len);
    if self.bytes_per_pixel == 4 {
      out.copy_from_slice(src);
      return;
    }
    for (dst, rgb) in out.chunks_exact_mut(4).zip(src.chunks_exact(3)) {
      dst[..3].copy_from_slice(rgb);
      dst[3] = 0xFF;
    }
  }
}
