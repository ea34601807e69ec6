//! Clip stack levels and their physical surfaces.

use glam::{IVec2, Vec2};

use crate::rect::TexelRect;

/// Square RGBA8 image standing in for one physical level texture.
///
/// Writes address texels modulo the surface size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Surface {
  size: u32,
  data: Vec<u8>,
}

impl Surface {
  pub const BYTES_PER_TEXEL: usize = 4;

  /// Black, transparent surface.
  pub fn new(size: u32) -> Self {
    Self {
      size,
      data: vec![0; size as usize * size as usize * Self::BYTES_PER_TEXEL],
    }
  }

  #[inline]
  pub fn size(&self) -> u32 {
    self.size
  }

  #[inline]
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  #[inline]
  fn offset(&self, x: i32, y: i32) -> usize {
    let s = self.size as i32;
    let (x, y) = (x.rem_euclid(s) as usize, y.rem_euclid(s) as usize);
    (y * self.size as usize + x) * Self::BYTES_PER_TEXEL
  }

  /// RGBA at wrapped `(x, y)`.
  pub fn texel(&self, x: i32, y: i32) -> [u8; 4] {
    let o = self.offset(x, y);
    [self.data[o], self.data[o + 1], self.data[o + 2], self.data[o + 3]]
  }

  pub fn set_texel(&mut self, x: i32, y: i32, rgba: [u8; 4]) {
    let o = self.offset(x, y);
    self.data[o..o + 4].copy_from_slice(&rgba);
  }

  /// Mutable bytes of `width` texels on row `y` from `x`. The span must not
  /// cross the right edge once wrapped.
  pub fn span_mut(&mut self, x: i32, y: i32, width: usize) -> &mut [u8] {
    let o = self.offset(x, y);
    debug_assert!(x.rem_euclid(self.size as i32) as usize + width <= self.size as usize);
    &mut self.data[o..o + width * Self::BYTES_PER_TEXEL]
  }

  pub fn fill(&mut self, rgba: [u8; 4]) {
    for px in self.data.chunks_exact_mut(Self::BYTES_PER_TEXEL) {
      px.copy_from_slice(&rgba);
    }
  }

  /// Fill `rect` (wrapped) with one colour.
  pub fn fill_rect(&mut self, rect: TexelRect, rgba: [u8; 4]) {
    for p in rect.points() {
      self.set_texel(p.x, p.y, rgba);
    }
  }
}

/// Per-level colour for debug surfaces.
pub const DEBUG_COLORS: [[u8; 3]; 16] = [
  [0xFF, 0x00, 0x0F],
  [0xFF, 0x00, 0xA0],
  [0xFF, 0x00, 0xFF],
  [0x00, 0xA0, 0x00],
  [0x00, 0xA0, 0xAF],
  [0x00, 0xA0, 0xF0],
  [0xA0, 0xFF, 0xA0],
  [0x00, 0xF0, 0xA0],
  [0x00, 0xF0, 0xFF],
  [0xA0, 0x00, 0x00],
  [0xA0, 0x00, 0xAF],
  [0xA0, 0x00, 0xF0],
  [0xA0, 0xF0, 0x0F],
  [0xA0, 0xF0, 0xA0],
  [0xA0, 0xF0, 0xFF],
  [0x00, 0xFF, 0x00],
];

/// Bright/dim checker in the level's debug colour, 4 texel cells.
pub fn debug_surface(level: usize, size: u32) -> Surface {
  let [r, g, b] = DEBUG_COLORS[level % DEBUG_COLORS.len()];
  let bright = [r, g, b, 0xFF];
  let dim = [r / 3, g / 3, b / 3, 0xFF];
  let mut surface = Surface::new(size);
  for y in 0..size as i32 {
    for x in 0..size as i32 {
      let lit = ((x & 4) ^ (y & 4)) != 0;
      surface.set_texel(x, y, if lit { bright } else { dim });
    }
  }
  surface
}

/// One level of the clip stack.
#[derive(Clone, Debug)]
pub struct ClipStackLevel {
  /// Level footprint relative to the cap, a power of two.
  pub scale: u32,
  /// Normalised centre the level was last recentred on.
  pub clip_center: Vec2,
  /// Top-left texel of the current window in level texel space.
  pub toroidal_offset: IVec2,
  /// `None` between `zombify` and `resurrect`.
  pub surface: Option<Surface>,
  pub debug_surface: Option<Surface>,
  /// False until the first committed update.
  pub populated: bool,
}

impl ClipStackLevel {
  pub fn new(scale: u32, clip_map_size: u32) -> Self {
    Self {
      scale,
      clip_center: Vec2::splat(0.5),
      toroidal_offset: IVec2::ZERO,
      surface: Some(Surface::new(clip_map_size)),
      debug_surface: None,
      populated: false,
    }
  }

  /// Texels across this level's logical texture.
  #[inline]
  pub fn level_size(&self, clip_map_size: u32) -> u32 {
    clip_map_size * self.scale
  }

  /// Current window in level texel space.
  #[inline]
  pub fn window(&self, clip_map_size: u32) -> TexelRect {
    TexelRect::square(self.toroidal_offset, clip_map_size as i32)
  }
}
