//! Arena node types for the resource quadtree.

use glam::IVec2;

use super::payload::PayloadKind;
use crate::bounds::Aabb3;

/// Index of a node in its tree's arena.
///
/// After the two-phase load the handle equals the node's directory label.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeHandle(pub u32);

impl NodeHandle {
  #[inline]
  pub fn index(self) -> usize {
    self.0 as usize
  }
}

/// The two independent residency axes of a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Axis {
  Geometry,
  Texture,
}

impl Axis {
  pub const ALL: [Axis; 2] = [Axis::Geometry, Axis::Texture];

  #[inline]
  pub const fn index(self) -> usize {
    match self {
      Axis::Geometry => 0,
      Axis::Texture => 1,
    }
  }
}

/// Neighbor slot, in stored order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
  East,
  North,
  West,
  South,
}

impl Direction {
  pub const ALL: [Direction; 4] = [Direction::East, Direction::North, Direction::West, Direction::South];
}

/// Child slot, in stored order. North is +Y.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Quadrant {
  NorthWest,
  NorthEast,
  SouthWest,
  SouthEast,
}

impl Quadrant {
  pub const ALL: [Quadrant; 4] = [
    Quadrant::NorthWest,
    Quadrant::NorthEast,
    Quadrant::SouthWest,
    Quadrant::SouthEast,
  ];

  /// Offset of this child within its parent's 2x2 block.
  #[inline]
  pub const fn offset(self) -> IVec2 {
    match self {
      Quadrant::NorthWest => IVec2::new(0, 1),
      Quadrant::NorthEast => IVec2::new(1, 1),
      Quadrant::SouthWest => IVec2::new(0, 0),
      Quadrant::SouthEast => IVec2::new(1, 0),
    }
  }
}

/// Load state of one axis of one node.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum StubState {
  /// No payload and nobody asking for one.
  #[default]
  Unloaded,
  /// Requested, waiting for the loader.
  Pending,
  /// Handed to the loader, result not yet retired.
  Loading,
  /// Payload resident.
  Loaded,
}

/// Demand and residency bookkeeping for one axis.
#[derive(Clone, Debug, Default)]
pub struct AxisState {
  pub ref_count: u32,
  /// Head of this axis' request list in the tree's request pool.
  pub(crate) requests: Option<u32>,
  pub state: StubState,
  /// Bumped on every unload so stale load results can be told apart.
  pub(crate) generation: u32,
}

/// One quadtree cell.
pub struct ChunkNode<K: PayloadKind> {
  pub label: i32,
  pub level: u32,
  pub position: IVec2,
  pub bounds: Aabb3,
  /// East, north, west, south.
  pub neighbors: [Option<NodeHandle>; 4],
  /// NW, NE, SW, SE.
  pub children: Option<[NodeHandle; 4]>,
  pub parent: Option<NodeHandle>,
  /// Byte offset of the framed geometry payload.
  pub data_offset: u64,
  pub(crate) axes: [AxisState; 2],
  pub(crate) geometry: Option<K::Geometry>,
  pub(crate) texture: Option<K::Texture>,
  /// Decaying activity counter, diagnostics only.
  pub heat: f32,
}

impl<K: PayloadKind> ChunkNode<K> {
  #[inline]
  pub fn axis(&self, axis: Axis) -> &AxisState {
    &self.axes[axis.index()]
  }

  #[inline]
  pub(crate) fn axis_mut(&mut self, axis: Axis) -> &mut AxisState {
    &mut self.axes[axis.index()]
  }

  #[inline]
  pub fn neighbor(&self, dir: Direction) -> Option<NodeHandle> {
    self.neighbors[dir as usize]
  }

  #[inline]
  pub fn child(&self, quadrant: Quadrant) -> Option<NodeHandle> {
    self.children.map(|c| c[quadrant as usize])
  }

  pub fn has_resident_geometry(&self) -> bool {
    self.geometry.is_some()
  }

  pub fn has_resident_texture(&self) -> bool {
    self.texture.is_some()
  }

  #[inline]
  pub fn is_resident(&self, axis: Axis) -> bool {
    match axis {
      Axis::Geometry => self.geometry.is_some(),
      Axis::Texture => self.texture.is_some(),
    }
  }

  pub fn geometry(&self) -> Option<&K::Geometry> {
    self.geometry.as_ref()
  }

  pub fn texture(&self) -> Option<&K::Texture> {
    self.texture.as_ref()
  }

  /// Drop the payload of `axis`.
  pub(crate) fn release(&mut self, axis: Axis) {
    match axis {
      Axis::Geometry => self.geometry = None,
      Axis::Texture => self.texture = None,
    }
  }
}
