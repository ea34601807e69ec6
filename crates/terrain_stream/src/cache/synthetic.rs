//! Procedural debug backend with no data dependency.

use glam::IVec2;

use super::CacheBackend;
use crate::clipmap::{Surface, DEBUG_COLORS};
use crate::error::Result;
use crate::rect::TexelRect;

/// Paints a per-level checker in level texel space. Always available, so
/// every texel a clip stack holds can be checked against [`Self::texel_at`].
#[derive(Clone, Debug)]
pub struct SyntheticCache {
  cell: i32,
  clip_map_size: u32,
  depth: u32,
  interest: IVec2,
  rect_updates: u64,
}

impl SyntheticCache {
  /// Checker with `cell`-texel squares.
  pub fn new(cell: u32) -> Self {
    Self {
      cell: cell.max(1) as i32,
      clip_map_size: 0,
      depth: 0,
      interest: IVec2::ZERO,
      rect_updates: 0,
    }
  }

  /// Colour of texel `(x, y)` of `level`.
  pub fn texel_at(&self, level: u32, x: i32, y: i32) -> [u8; 4] {
    let [r, g, b] = DEBUG_COLORS[level as usize % DEBUG_COLORS.len()];
    let lit = (x.div_euclid(self.cell) + y.div_euclid(self.cell)) & 1 == 1;
    if lit {
      [r, g, b, 0xFF]
    } else {
      [r / 3, g / 3, b / 3, 0xFF]
    }
  }

  pub fn interest(&self) -> IVec2 {
    self.interest
  }

  pub fn rect_updates(&self) -> u64 {
    self.rect_updates
  }

  pub fn depth(&self) -> u32 {
    self.depth
  }

  pub fn clip_map_size(&self) -> u32 {
    self.clip_map_size
  }
}

impl Default for SyntheticCache {
  fn default() -> Self {
    Self::new(8)
  }
}

impl CacheBackend for SyntheticCache {
  fn initialize(&mut self, clip_map_size: u32, clip_stack_depth: u32) -> Result<()> {
    self.clip_map_size = clip_map_size;
    self.depth = clip_stack_depth;
    Ok(())
  }

  fn set_interest_center(&mut self, texel: IVec2) {
    self.interest = texel;
  }

  fn is_data_available(&self, _level: u32, _region: TexelRect) -> bool {
    true
  }

  fn do_rect_update(&mut self, level: u32, surface: &mut Surface, src: TexelRect, dst: TexelRect) {
    for row in 0..src.extent.y {
      let span = surface.span_mut(dst.point.x, dst.point.y + row, src.extent.x as usize);
      for (col, px) in span.chunks_exact_mut(4).enumerate() {
        px.copy_from_slice(&self.texel_at(level, src.point.x + col as i32, src.point.y + row));
      }
    }
    self.rect_updates += 1;
  }
}
