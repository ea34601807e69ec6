//! Distance to LOD heuristics.
//!
//! A geometry LOD is packed as `level << 8 | fraction`: the high byte is a
//! tree level, the low byte how far toward the next level the node wants
//! to be. Closer viewers get higher values.

use glam::Vec3;

use crate::bounds::Aabb3;

/// Desired geometry LOD for `bounds` seen from `viewer`.
///
/// Each doubling of distance past `distance_lod_max` costs one level.
#[inline]
pub fn compute_lod(tree_depth: u32, bounds: &Aabb3, viewer: Vec3, distance_lod_max: f32) -> u16 {
  let d = bounds.distance_to_point(viewer);
  let falloff = (d / distance_lod_max).max(1.0).log2();
  let lod = ((tree_depth as i32) << 8) - 1 - (falloff * 256.0) as i32;
  lod.clamp(0, 0xFFFF) as u16
}

/// Desired texture level for `bounds`. May be negative far away.
#[inline]
pub fn compute_texture_lod(tree_depth: u32, bounds: &Aabb3, viewer: Vec3, texture_distance_lod_max: f32) -> i32 {
  let d = bounds.distance_to_point(viewer);
  let falloff = (d / texture_distance_lod_max).max(1.0).log2();
  tree_depth as i32 - 1 - falloff.floor() as i32
}

/// Lowest LOD of the band of `lod`'s level.
#[inline]
pub const fn band_floor(lod: u16) -> u16 {
  lod & 0xFF00
}

/// Highest LOD of the band of `lod`'s level.
#[inline]
pub const fn band_ceiling(lod: u16) -> u16 {
  lod | 0x00FF
}

#[inline]
pub const fn lod_level(lod: u16) -> u32 {
  (lod >> 8) as u32
}

/// Morph factor a node at `lod` is heading toward: 1 at the start of its
/// band, 0 when fully refined.
#[inline]
pub fn morph_target(lod: u16) -> f32 {
  1.0 - f32::from(lod & 0xFF) / 255.0
}
