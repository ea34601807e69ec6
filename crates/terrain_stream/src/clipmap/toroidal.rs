//! Toroidal window arithmetic.
//!
//! A level window is `clip × clip` texels of its level's texel space. The
//! physical surface holds texel `p` at `p mod clip`, so moving the window
//! only needs the newly exposed texels, cut wherever they cross a multiple
//! of `clip` (the wraparound seam).

use smallvec::SmallVec;

use crate::rect::TexelRect;

/// At most two delta rects, each cut in at most four.
pub type DeltaRects = SmallVec<[TexelRect; 8]>;

/// Split `rect` where it crosses a multiple of `spacing` on either axis.
///
/// `spacing` must be a power of two and `rect` no larger than `spacing`,
/// which bounds the result to four pieces.
pub fn clip_against_grid(spacing: i32, rect: TexelRect) -> SmallVec<[TexelRect; 4]> {
  debug_assert!(spacing > 0 && (spacing & (spacing - 1)) == 0);
  let mask = !(spacing - 1);

  let start_x = rect.point.x;
  let end_x = rect.end().x;
  let grid_x = end_x & mask;

  let mut columns: SmallVec<[TexelRect; 2]> = SmallVec::new();
  if (start_x & mask) != grid_x && end_x - grid_x > 0 {
    columns.push(TexelRect::new(start_x, rect.point.y, grid_x - start_x, rect.extent.y));
    columns.push(TexelRect::new(grid_x, rect.point.y, end_x - grid_x, rect.extent.y));
  } else {
    columns.push(rect);
  }

  let mut out = SmallVec::new();
  for column in columns {
    let start_y = column.point.y;
    let end_y = column.end().y;
    let grid_y = end_y & mask;
    if (start_y & mask) != grid_y && end_y - grid_y > 0 {
      out.push(TexelRect::new(column.point.x, start_y, column.extent.x, grid_y - start_y));
      out.push(TexelRect::new(column.point.x, grid_y, column.extent.x, end_y - grid_y));
    } else {
      out.push(column);
    }
  }
  out
}

/// Texels of `new` that `old` does not hold, cut against the `clip` grid.
///
/// Both windows must be `clip × clip` with non-negative origins.
///
/// - same origin: nothing
/// - no overlap: the whole new window
/// - movement along one axis: one strip
/// - movement along both: an L of two strips, the full-height X strip
///   plus the remaining part of the Y strip
pub fn calculate_modulo_delta_bounds(old: TexelRect, new: TexelRect, clip: i32) -> DeltaRects {
  debug_assert!(old.is_valid() && new.is_valid());
  debug_assert!(old.point.cmpge(glam::IVec2::ZERO).all() && new.point.cmpge(glam::IVec2::ZERO).all());
  debug_assert_eq!(old.extent, new.extent, "delta bounds need matching extents");

  let mut out = DeltaRects::new();
  if old.point == new.point {
    return out;
  }
  if !old.overlaps(&new) {
    out.extend(clip_against_grid(clip, new));
    return out;
  }

  let dx = new.point.x - old.point.x;
  let dy = new.point.y - old.point.y;

  let x_strip = || {
    if dx < 0 {
      TexelRect::new(new.point.x, new.point.y, -dx, clip)
    } else {
      TexelRect::new(old.end().x, new.point.y, dx, clip)
    }
  };
  let y_span = || {
    if dy < 0 {
      (new.point.y, -dy)
    } else {
      (old.end().y, dy)
    }
  };

  if dx == 0 {
    let (y, height) = y_span();
    out.extend(clip_against_grid(clip, TexelRect::new(new.point.x, y, clip, height)));
  } else if dy == 0 {
    out.extend(clip_against_grid(clip, x_strip()));
  } else {
    let x_rect = x_strip();
    let (x, width) = if dx < 0 {
      (x_rect.end().x, clip - dx.abs())
    } else {
      (x_rect.end().x - clip, clip - x_rect.extent.x)
    };
    let (y, height) = y_span();
    let y_rect = TexelRect::new(x, y, width, height);
    debug_assert!(!y_rect.overlaps(&x_rect), "L-shaped delta strips overlap");

    out.extend(clip_against_grid(clip, x_rect));
    out.extend(clip_against_grid(clip, y_rect));
  }
  out
}

/// Top-left texel of a `clip` window centred on `center` (normalised) in a
/// level `clip · scale` texels across, kept inside the level.
#[inline]
pub fn window_origin(center: glam::Vec2, clip: u32, scale: u32) -> glam::IVec2 {
  let half = (clip / 2) as i32;
  let max = (clip * scale) as i32 - half;
  let texel = (center * (clip * scale) as f32).floor();
  glam::IVec2::new(
    (texel.x as i32).clamp(half, max) - half,
    (texel.y as i32).clamp(half, max) - half,
  )
}

#[cfg(test)]
mod tests {
  use super::*;
  use glam::{IVec2, Vec2};
  use std::collections::HashSet;

  const CLIP: i32 = 16;

  fn window(x: i32, y: i32) -> TexelRect {
    TexelRect::square(IVec2::new(x, y), CLIP)
  }

  fn texels(rects: &[TexelRect]) -> Vec<IVec2> {
    rects.iter().flat_map(|r| r.points()).collect()
  }

  /// Union is exactly new − old, pieces disjoint and inside the new window.
  fn check_exact(old: TexelRect, new: TexelRect) {
    let rects = calculate_modulo_delta_bounds(old, new, CLIP);
    let covered = texels(&rects);
    let unique: HashSet<_> = covered.iter().copied().collect();
    assert_eq!(unique.len(), covered.len(), "pieces overlap for {old:?} → {new:?}");

    let expected: HashSet<_> = new.points().filter(|p| !old.contains_point(*p)).collect();
    assert_eq!(unique, expected, "wrong coverage for {old:?} → {new:?}");

    for r in &rects {
      assert!(r.is_valid());
      assert!(new.contains(r));
      // No piece straddles the wrap seam.
      let start = r.point.div_euclid(IVec2::splat(CLIP));
      let last = (r.end() - IVec2::ONE).div_euclid(IVec2::splat(CLIP));
      assert_eq!(start, last, "{r:?} crosses the grid");
    }
  }

  #[test]
  fn test_no_movement_is_empty() {
    assert!(calculate_modulo_delta_bounds(window(5, 5), window(5, 5), CLIP).is_empty());
  }

  /// One texel east is one strip, not an L.
  #[test]
  fn test_pure_axis_move_is_one_rect() {
    let rects = calculate_modulo_delta_bounds(window(0, 0), window(1, 0), CLIP);
    assert_eq!(rects.as_slice(), &[TexelRect::new(16, 0, 1, 16)]);
  }

  #[test]
  fn test_disjoint_windows_upload_everything() {
    let rects = calculate_modulo_delta_bounds(window(0, 0), window(40, 3), CLIP);
    assert_eq!(rects.iter().map(|r| r.area()).sum::<u64>(), 256);
    check_exact(window(0, 0), window(40, 3));
  }

  #[test]
  fn test_delta_covers_exactly_the_new_texels() {
    let moves = [(1, 0), (-3, 0), (0, 7), (0, -2), (5, 9), (-4, 6), (6, -11), (-15, -15), (15, 1)];
    for origin in [(20, 20), (16, 32), (31, 17)] {
      let old = window(origin.0, origin.1);
      for (dx, dy) in moves {
        check_exact(old, window(origin.0 + dx, origin.1 + dy));
      }
    }
  }

  #[test]
  fn test_clip_against_grid_splits_both_axes() {
    let rects = clip_against_grid(16, TexelRect::new(10, 12, 16, 16));
    assert_eq!(rects.len(), 4);
    assert_eq!(rects[0], TexelRect::new(10, 12, 6, 4));
    assert_eq!(rects[3], TexelRect::new(16, 16, 10, 12));
  }

  /// A rect ending exactly on the grid is not split.
  #[test]
  fn test_clip_against_grid_aligned() {
    let rects = clip_against_grid(16, TexelRect::new(16, 0, 16, 16));
    assert_eq!(rects.as_slice(), &[TexelRect::new(16, 0, 16, 16)]);
  }

  #[test]
  fn test_window_origin_clamps_to_level() {
    assert_eq!(window_origin(Vec2::splat(0.5), 16, 4), IVec2::new(24, 24));
    assert_eq!(window_origin(Vec2::ZERO, 16, 4), IVec2::ZERO);
    assert_eq!(window_origin(Vec2::ONE, 16, 4), IVec2::new(48, 48));
    // The cap level never moves.
    assert_eq!(window_origin(Vec2::new(0.9, 0.1), 16, 1), IVec2::ZERO);
  }
}
