//! Draw requests emitted by an instance tree.

use glam::{Vec3, Vec4};

use crate::resource::NodeHandle;

/// One resident chunk to draw this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawRequest {
  pub node: NodeHandle,
  /// Morph factor toward the parent's shape, 0..=1.
  pub morph: f32,
  /// (centre x, centre y, half size, morph).
  pub scale_offset: Vec4,
  /// (offset u, offset v, scale u, scale v) into the bound texture.
  pub texgen: Vec4,
  /// Node whose texture is bound, if any.
  pub texture: Option<NodeHandle>,
}

/// Front-to-back child order keyed by viewer quadrant
/// (bit 1 = north of centre, bit 0 = east of centre). Children are
/// stored NW, NE, SW, SE.
pub const RENDER_ORDER: [[usize; 4]; 4] = [
  [2, 0, 3, 1], // south-west viewer
  [3, 1, 2, 0], // south-east
  [0, 1, 2, 3], // north-west
  [1, 3, 0, 2], // north-east
];

/// Quadrant of `viewer` relative to `center`, as indexed by [`RENDER_ORDER`].
#[inline]
pub fn viewer_quadrant(viewer: Vec3, center: Vec3) -> usize {
  (usize::from(viewer.y > center.y) << 1) | usize::from(viewer.x > center.x)
}
