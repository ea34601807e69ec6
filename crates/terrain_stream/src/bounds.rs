//! Axis-aligned bounding box for terrain chunks.
//!
//! Terrain is Z-up: X/Y span the quadtree plane, Z carries height.

use glam::Vec3;

/// Axis-aligned bounding box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb3 {
  /// Minimum corner (inclusive).
  pub min: Vec3,
  /// Maximum corner (inclusive).
  pub max: Vec3,
}

impl Aabb3 {
  /// Create a new AABB from min and max corners.
  ///
  /// # Panics
  /// Debug-asserts that min <= max on all axes.
  pub fn new(min: Vec3, max: Vec3) -> Self {
    debug_assert!(
      min.x <= max.x && min.y <= max.y && min.z <= max.z,
      "AABB min must be <= max on all axes"
    );
    Self { min, max }
  }

  /// Grow the box by `epsilon` on every side.
  #[inline]
  pub fn expanded(&self, epsilon: f32) -> Self {
    Self {
      min: self.min - Vec3::splat(epsilon),
      max: self.max + Vec3::splat(epsilon),
    }
  }

  /// True if `other` lies entirely inside this box (boundaries included).
  #[inline]
  pub fn contains(&self, other: &Aabb3) -> bool {
    self.min.cmple(other.min).all() && self.max.cmpge(other.max).all()
  }

  /// Check if this AABB contains a point.
  #[inline]
  pub fn contains_point(&self, point: Vec3) -> bool {
    self.min.cmple(point).all() && self.max.cmpge(point).all()
  }

  /// Euclidean distance from `point` to the nearest point of the box.
  /// Zero when the point is inside.
  #[inline]
  pub fn distance_to_point(&self, point: Vec3) -> f32 {
    let nearest = point.clamp(self.min, self.max);
    nearest.distance(point)
  }

  /// Get the size of the AABB (max - min).
  #[inline]
  pub fn size(&self) -> Vec3 {
    self.max - self.min
  }

  /// Get the center of the AABB.
  #[inline]
  pub fn center(&self) -> Vec3 {
    (self.min + self.max) * 0.5
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_contains_child() {
    let parent = Aabb3::new(Vec3::ZERO, Vec3::new(4.0, 4.0, 2.0));
    let child = Aabb3::new(Vec3::new(2.0, 0.0, 0.5), Vec3::new(4.0, 2.0, 1.0));
    assert!(parent.contains(&child));
    assert!(!child.contains(&parent));
  }

  #[test]
  fn test_contains_is_inclusive() {
    let a = Aabb3::new(Vec3::ZERO, Vec3::ONE);
    assert!(a.contains(&a));
  }

  #[test]
  fn test_expanded() {
    let a = Aabb3::new(Vec3::ZERO, Vec3::ONE).expanded(0.5);
    assert_eq!(a.min, Vec3::splat(-0.5));
    assert_eq!(a.max, Vec3::splat(1.5));
  }

  #[test]
  fn test_distance_inside_is_zero() {
    let a = Aabb3::new(Vec3::ZERO, Vec3::splat(10.0));
    assert_eq!(a.distance_to_point(Vec3::splat(5.0)), 0.0);
  }

  #[test]
  fn test_distance_outside() {
    let a = Aabb3::new(Vec3::ZERO, Vec3::splat(10.0));
    assert_eq!(a.distance_to_point(Vec3::new(13.0, 5.0, 14.0)), 5.0);
  }

  #[test]
  fn test_center_and_size() {
    let a = Aabb3::new(Vec3::new(-2.0, 0.0, 0.0), Vec3::new(2.0, 4.0, 6.0));
    assert_eq!(a.center(), Vec3::new(0.0, 2.0, 3.0));
    assert_eq!(a.size(), Vec3::new(4.0, 4.0, 6.0));
  }
}
