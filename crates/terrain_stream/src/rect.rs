//! Integer and float rectangles in texel space.
//!
//! A rect covers `[point, point + extent)` on both axes. Rects with a
//! non-positive extent are empty.

use glam::{IVec2, Vec2};

/// Integer texel rectangle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct TexelRect {
  pub point: IVec2,
  pub extent: IVec2,
}

impl TexelRect {
  #[inline]
  pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
    Self {
      point: IVec2::new(x, y),
      extent: IVec2::new(width, height),
    }
  }

  #[inline]
  pub const fn from_point_extent(point: IVec2, extent: IVec2) -> Self {
    Self { point, extent }
  }

  /// Square rect of side `size` at `point`.
  #[inline]
  pub const fn square(point: IVec2, size: i32) -> Self {
    Self {
      point,
      extent: IVec2::new(size, size),
    }
  }

  /// Exclusive lower-right corner.
  #[inline]
  pub fn end(&self) -> IVec2 {
    self.point + self.extent
  }

  #[inline]
  pub fn is_valid(&self) -> bool {
    self.extent.x > 0 && self.extent.y > 0
  }

  /// Texel count. Zero for empty rects.
  #[inline]
  pub fn area(&self) -> u64 {
    if self.is_valid() {
      self.extent.x as u64 * self.extent.y as u64
    } else {
      0
    }
  }

  #[inline]
  pub fn contains_point(&self, p: IVec2) -> bool {
    p.cmpge(self.point).all() && p.cmplt(self.end()).all()
  }

  /// True if `other` lies entirely within this rect.
  #[inline]
  pub fn contains(&self, other: &TexelRect) -> bool {
    other.point.cmpge(self.point).all() && other.end().cmple(self.end()).all()
  }

  /// True if the rects share at least one texel.
  #[inline]
  pub fn overlaps(&self, other: &TexelRect) -> bool {
    self.intersection(other).is_some()
  }

  pub fn intersection(&self, other: &TexelRect) -> Option<TexelRect> {
    let min = self.point.max(other.point);
    let max = self.end().min(other.end());
    let rect = TexelRect::from_point_extent(min, max - min);
    rect.is_valid().then_some(rect)
  }

  /// Smallest rect covering both.
  pub fn union(&self, other: &TexelRect) -> TexelRect {
    let min = self.point.min(other.point);
    let max = self.end().max(other.end());
    TexelRect::from_point_extent(min, max - min)
  }

  /// Shrink by `d` on every side; negative values grow the rect.
  #[inline]
  pub fn inset(&self, dx: i32, dy: i32) -> TexelRect {
    TexelRect::from_point_extent(
      self.point + IVec2::new(dx, dy),
      self.extent - IVec2::new(2 * dx, 2 * dy),
    )
  }

  #[inline]
  pub fn translated(&self, by: IVec2) -> TexelRect {
    TexelRect::from_point_extent(self.point + by, self.extent)
  }

  /// Rect of grid cells (of side `cell`) touched by this texel rect.
  pub fn to_cells(&self, cell: i32) -> TexelRect {
    let min = IVec2::new(
      self.point.x.div_euclid(cell),
      self.point.y.div_euclid(cell),
    );
    let last = self.end() - IVec2::ONE;
    let max = IVec2::new(last.x.div_euclid(cell), last.y.div_euclid(cell)) + IVec2::ONE;
    TexelRect::from_point_extent(min, max - min)
  }

  /// Clamp both corners into `[0, limit]`.
  pub fn clamped(&self, limit: i32) -> TexelRect {
    let min = self.point.clamp(IVec2::ZERO, IVec2::splat(limit));
    let max = self.end().clamp(IVec2::ZERO, IVec2::splat(limit));
    TexelRect::from_point_extent(min, max - min)
  }

  /// Iterate every integer point in the rect, row-major.
  pub fn points(&self) -> impl Iterator<Item = IVec2> {
    let r = *self;
    (r.point.y..r.end().y).flat_map(move |y| (r.point.x..r.end().x).map(move |x| IVec2::new(x, y)))
  }
}

/// Floating point rectangle, used for texture-coordinate footprints.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TexRect {
  pub point: Vec2,
  pub extent: Vec2,
}

impl TexRect {
  #[inline]
  pub const fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
    Self {
      point: Vec2::new(x, y),
      extent: Vec2::new(width, height),
    }
  }

  #[inline]
  pub fn end(&self) -> Vec2 {
    self.point + self.extent
  }

  #[inline]
  pub fn scaled(&self, factor: f32) -> TexRect {
    TexRect {
      point: self.point * factor,
      extent: self.extent * factor,
    }
  }

  #[inline]
  pub fn inset(&self, dx: f32, dy: f32) -> TexRect {
    TexRect {
      point: self.point + Vec2::new(dx, dy),
      extent: self.extent - Vec2::new(2.0 * dx, 2.0 * dy),
    }
  }

  #[inline]
  pub fn contains(&self, other: &TexRect) -> bool {
    other.point.cmpge(self.point).all() && other.end().cmple(self.end()).all()
  }

  #[inline]
  pub fn overlaps(&self, other: &TexRect) -> bool {
    self.point.cmplt(other.end()).all() && other.point.cmplt(self.end()).all()
  }
}
