use super::*;
use crate::config::LoaderConfig;
use crate::format::DirectoryBuilder;
use crate::resource::{LoaderStage, MemorySource, PayloadSource, RawKind};
use std::sync::Arc;

fn setup(depth: u32, texture_depth: u32) -> (ResourceTree, LoaderStage<RawKind>) {
  let mut builder = DirectoryBuilder::new(depth).base_chunk_size(16.0);
  if texture_depth > 0 {
    builder = builder.texture(texture_depth, 4, 4);
  }
  let terrain = builder.build(|_, _| 0.0, |level, _, _| [level as u8, 0, 0, 255]);
  let tree = ResourceTree::open(Arc::new(MemorySource::from_generated(terrain).unwrap())).unwrap();
  let loader = LoaderStage::new(LoaderConfig {
    max_in_flight: 16,
    max_queue_scan: 64,
  });
  (tree, loader)
}

fn run(
  instance: &mut InstanceTree,
  tree: &mut ResourceTree,
  loader: &mut LoaderStage<RawKind>,
  viewer: Vec3,
  frames: usize,
) -> LodStats {
  let mut stats = LodStats::default();
  for _ in 0..frames {
    stats = instance.frame(tree, viewer);
    loader.run_to_idle(tree);
  }
  stats
}

const NEAR: Vec3 = Vec3::new(8.0, 8.0, 0.0);
const FAR: Vec3 = Vec3::new(1.0e5, 1.0e5, 0.0);

// ===== Batch 1: convergence =====

/// A close viewer ends up drawing every leaf.
#[test]
fn test_near_viewer_reaches_leaves() {
  let (mut tree, mut loader) = setup(3, 0);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());

  let stats = run(&mut instance, &mut tree, &mut loader, NEAR, 8);

  assert_eq!(stats.draws, 16);
  assert!(instance
    .draw_queue()
    .iter()
    .all(|d| tree.node(d.node).level == 2));
  assert!(instance.is_split(&tree, tree.root()));
}

/// A distant viewer draws only the root and keeps one level warm.
#[test]
fn test_far_viewer_draws_root() {
  let (mut tree, mut loader) = setup(3, 0);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());

  let stats = run(&mut instance, &mut tree, &mut loader, FAR, 4);

  assert_eq!(stats.draws, 1);
  let draw = instance.draw_queue()[0];
  assert_eq!(draw.node, tree.root());
  assert_eq!(draw.scale_offset, Vec4::new(32.0, 32.0, 32.0, 1.0));
  for c in tree.node(tree.root()).children.unwrap() {
    assert!(instance.node(c).geometry_referenced);
    assert!(tree.has_resident(c, Axis::Geometry));
  }
  // Grandchildren are never warmed.
  assert_eq!(tree.resident_count(Axis::Geometry), 5);
}

/// Walking away collapses the tree and releases the leaves.
#[test]
fn test_moving_away_releases_leaves() {
  let (mut tree, mut loader) = setup(3, 0);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  run(&mut instance, &mut tree, &mut loader, NEAR, 8);
  assert_eq!(tree.resident_count(Axis::Geometry), 21);

  let stats = run(&mut instance, &mut tree, &mut loader, FAR, 2);
  assert_eq!(stats.draws, 1);
  assert_eq!(tree.resident_count(Axis::Geometry), 5);
}

// ===== Batch 2: split constraints =====

/// A split node always has resident children.
#[test]
fn test_split_implies_resident_children() {
  let (mut tree, mut loader) = setup(4, 0);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  for frame in 0..10 {
    instance.frame(&mut tree, NEAR);
    for h in tree.handles() {
      if instance.is_split(&tree, h) {
        for c in tree.node(h).children.unwrap() {
          assert!(tree.has_resident(c, Axis::Geometry), "frame {frame}: child of split node missing");
        }
      }
    }
    loader.run_to_idle(&mut tree);
  }
}

/// Missing children are requested and referenced, and block the split.
#[test]
fn test_can_split_requests_children() {
  let (mut tree, _) = setup(3, 0);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  let root = tree.root();
  tree.load_immediate(root, Axis::Geometry, LoadReason::RootLoad).unwrap();

  assert!(!instance.can_split(&mut tree, root));
  for c in tree.node(root).children.unwrap() {
    assert!(instance.node(c).geometry_referenced);
    assert_eq!(tree.get_load_priority(c, Axis::Geometry), 1.0);
  }
}

/// A node still morphing may not split; the morph gets a nudge instead.
#[test]
fn test_morph_blocks_split() {
  let (mut tree, _) = setup(2, 0);
  tree.precache(Axis::Geometry).unwrap();
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  let root = tree.root();

  instance.nodes[root.index()].last_morph = 0.5;
  assert!(!instance.can_split(&mut tree, root));
  assert!((instance.node(root).last_morph - 0.3).abs() < 1e-6);
  assert!(!instance.can_split(&mut tree, root));
  assert!(instance.can_split(&mut tree, root));
}

/// A neighbor two levels up must be able to split too.
#[test]
fn test_neighbor_two_levels_up_blocks_split() {
  let (mut tree, _) = setup(5, 0);
  let at = |tree: &ResourceTree, level: u32, x: i32, y: i32| tree.lookup(level, IVec2::new(x, y)).unwrap();
  let load = |tree: &mut ResourceTree, h: NodeHandle| {
    tree.load_immediate(h, Axis::Geometry, LoadReason::Precache).unwrap();
  };

  // Root, every level 1 node, the south-west block and the path to (3, 3).
  let mut resident = vec![tree.root()];
  resident.extend(tree.node(tree.root()).children.unwrap());
  for (x, y) in [(0, 0), (1, 0), (0, 1), (1, 1)] {
    resident.push(at(&tree, 2, x, y));
  }
  for (x, y) in [(2, 2), (3, 2), (2, 3), (3, 3)] {
    resident.push(at(&tree, 3, x, y));
  }
  for (x, y) in [(6, 6), (7, 6), (6, 7), (7, 7)] {
    resident.push(at(&tree, 4, x, y));
  }
  for h in resident {
    load(&mut tree, h);
  }

  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  let target = at(&tree, 3, 3, 3);
  // East of (3, 3) climbs to the south-east level 1 node, north to the
  // north-west one; neither has children loaded.
  assert!(!instance.can_split(&mut tree, target));

  for (x, y) in [(2, 0), (3, 0), (2, 1), (3, 1), (0, 2), (1, 2), (0, 3), (1, 3)] {
    let h = at(&tree, 2, x, y);
    load(&mut tree, h);
  }
  assert!(instance.can_split(&mut tree, target));
}

// ===== Batch 3: texture and render =====

/// Texture follows geometry down to the texture depth and binds the
/// deepest textured ancestor.
#[test]
fn test_texture_binding_and_texgen() {
  let (mut tree, mut loader) = setup(3, 2);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  run(&mut instance, &mut tree, &mut loader, NEAR, 8);

  assert_eq!(tree.resident_count(Axis::Texture), 5);
  assert_eq!(instance.draw_queue().len(), 16);
  for draw in instance.draw_queue() {
    let node = tree.node(draw.node);
    let owner = draw.texture.expect("leaf should inherit a texture");
    assert_eq!(Some(owner), node.parent);
    let expected = (node.position - tree.node(owner).position * 2).as_vec2() * 0.5;
    assert_eq!(draw.texgen, Vec4::new(expected.x, expected.y, 0.5, 0.5));
  }
}

/// Far away, texture is never requested.
#[test]
fn test_far_viewer_loads_no_texture() {
  let (mut tree, mut loader) = setup(3, 2);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  run(&mut instance, &mut tree, &mut loader, FAR, 4);
  assert_eq!(tree.resident_count(Axis::Texture), 0);
}

/// Morph decreases by at most the configured rate per frame.
#[test]
fn test_morph_rate_limited() {
  let (mut tree, _) = setup(2, 0);
  tree.precache(Axis::Geometry).unwrap();
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  let root = tree.root();
  instance.nodes[root.index()].lod = 0x00FF;
  instance.nodes[root.index()].last_morph = 1.0;

  let draws = instance.render(&tree, FAR).to_vec();
  assert_eq!(draws.len(), 1);
  assert!((draws[0].morph - 0.95).abs() < 1e-6);

  // A higher target snaps up immediately.
  instance.nodes[root.index()].lod = 0;
  let draws = instance.render(&tree, FAR).to_vec();
  assert_eq!(draws[0].morph, 1.0);
}

/// Split children come out nearest first.
#[test]
fn test_render_order_front_to_back() {
  let (mut tree, mut loader) = setup(2, 0);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  let viewer = Vec3::new(30.0, 2.0, 0.0);
  run(&mut instance, &mut tree, &mut loader, viewer, 4);

  let first = instance.draw_queue()[0].node;
  assert_eq!(tree.node(first).position, IVec2::new(1, 0));
}

// ===== Batch 4: attach / detach =====

/// Detaching returns every reference and request.
#[test]
fn test_detach_releases_everything() {
  let (mut tree, mut loader) = setup(3, 2);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  run(&mut instance, &mut tree, &mut loader, NEAR, 8);

  instance.detach(&mut tree);
  for h in tree.handles() {
    for axis in Axis::ALL {
      assert_eq!(tree.ref_count(h, axis), 0);
    }
  }
  assert_eq!(tree.live_requests(), 0);
  assert_eq!(tree.resident_count(Axis::Geometry), 0);
  assert_eq!(tree.owner_count(), 0);
}

/// Two viewers share residency; one leaving keeps the other's data.
#[test]
fn test_shared_tree_between_viewers() {
  let (mut tree, mut loader) = setup(3, 0);
  let mut near = InstanceTree::attach(&mut tree, LodConfig::default());
  let mut far = InstanceTree::attach(&mut tree, LodConfig::default());

  for _ in 0..8 {
    near.frame(&mut tree, NEAR);
    far.frame(&mut tree, FAR);
    loader.run_to_idle(&mut tree);
  }
  assert_eq!(tree.ref_count(tree.root(), Axis::Geometry), 2);

  far.detach(&mut tree);
  assert_eq!(tree.resident_count(Axis::Geometry), 21);
  let stats = near.frame(&mut tree, NEAR);
  assert_eq!(stats.draws, 16);
}

// ===== Batch 6: request upkeep =====

/// Fails the first geometry read, then serves bytes normally.
struct FlakySource {
  inner: MemorySource,
  failed: std::sync::atomic::AtomicBool,
}

impl PayloadSource for FlakySource {
  fn directory(&self) -> crate::error::Result<crate::format::ChunkDirectory> {
    self.inner.directory()
  }

  fn read_geometry(&self, offset: u64) -> crate::error::Result<Vec<u8>> {
    if !self.failed.swap(true, std::sync::atomic::Ordering::SeqCst) {
      return Err(std::io::Error::other("transient read failure").into());
    }
    self.inner.read_geometry(offset)
  }

  fn read_texture(&self, level: u32, position: glam::IVec2) -> crate::error::Result<Option<Vec<u8>>> {
    self.inner.read_texture(level, position)
  }

  fn texture_depth(&self) -> u32 {
    self.inner.texture_depth()
  }

  fn tile_size(&self) -> u32 {
    self.inner.tile_size()
  }
}

/// A load that fails once is retried while the viewer still wants it.
#[test]
fn test_failed_root_load_is_retried() {
  let terrain = DirectoryBuilder::new(3)
    .base_chunk_size(16.0)
    .build(|_, _| 0.0, |_, _, _| [0; 4]);
  let source = FlakySource {
    inner: MemorySource::from_generated(terrain).unwrap(),
    failed: std::sync::atomic::AtomicBool::new(false),
  };
  let mut tree: ResourceTree = ResourceTree::open(Arc::new(source)).unwrap();
  let mut loader = LoaderStage::new(LoaderConfig::default());
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());

  let stats = run(&mut instance, &mut tree, &mut loader, FAR, 8);

  assert_eq!(loader.stats().failed, 1);
  assert!(tree.has_resident(tree.root(), Axis::Geometry));
  assert_eq!(tree.ref_count(tree.root(), Axis::Geometry), 1);
  assert_eq!(stats.draws, 1);
}

/// Warm-up priority follows the latest call instead of the first one.
#[test]
fn test_warm_up_priority_tracks_latest() {
  let (mut tree, _loader) = setup(3, 0);
  let mut instance = InstanceTree::attach(&mut tree, LodConfig::default());
  let child = tree.node(tree.root()).children.unwrap()[0];

  instance.warm_up(&mut tree, child, 0.9);
  assert_eq!(tree.get_load_priority(child, Axis::Geometry), 0.9);

  instance.warm_up(&mut tree, child, 0.6);
  assert_eq!(tree.get_load_priority(child, Axis::Geometry), 0.6);
  // The reference is taken once.
  assert_eq!(tree.ref_count(child, Axis::Geometry), 1);
}
