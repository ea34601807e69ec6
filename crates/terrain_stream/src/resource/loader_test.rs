use super::*;
use crate::format::DirectoryBuilder;
use crate::resource::{Axis, LoadReason, MemorySource, RawKind, RequesterId, StubState};

fn tree(depth: u32) -> ResourceTree<RawKind> {
  let terrain = DirectoryBuilder::new(depth)
    .texture(depth, 4, 3)
    .build(|x, _| x, |_, u, v| [(u * 255.0) as u8, (v * 255.0) as u8, 0, 255]);
  ResourceTree::open(Arc::new(MemorySource::from_generated(terrain).unwrap())).unwrap()
}

fn config(max_in_flight: usize) -> LoaderConfig {
  LoaderConfig {
    max_in_flight,
    max_queue_scan: 64,
  }
}

/// Requests become resident after the loader runs.
#[test]
fn test_loads_become_resident() {
  let mut tree = tree(3);
  let mut loader = LoaderStage::new(config(3));
  let a = RequesterId::new();
  let root = tree.root();
  tree.request_load(root, Axis::Geometry, a, 1.0, LoadReason::RootLoad);
  tree.request_load(root, Axis::Texture, a, 1.0, LoadReason::UpdateTextureLoad);
  tree.inc_ref(root, Axis::Geometry);
  tree.inc_ref(root, Axis::Texture);

  loader.run_to_idle(&mut tree);

  assert!(tree.has_resident(root, Axis::Geometry));
  assert!(tree.has_resident(root, Axis::Texture));
  assert_eq!(loader.stats().installed, 2);
  assert!(loader.is_idle());
}

/// No more than `max_in_flight` loads start per tick.
#[test]
fn test_in_flight_limit() {
  let mut tree = tree(2);
  let mut loader = LoaderStage::new(config(2));
  let a = RequesterId::new();
  for h in tree.handles().collect::<Vec<_>>() {
    tree.request_load(h, Axis::Texture, a, 0.5, LoadReason::Precache);
    tree.inc_ref(h, Axis::Texture);
  }

  assert_eq!(loader.tick(&mut tree), 2);
  assert_eq!(loader.tick(&mut tree), 0);
  assert_eq!(loader.in_flight(), 2);

  loader.flush(&mut tree);
  loader.run_to_idle(&mut tree);
  assert_eq!(tree.resident_count(Axis::Texture), 5);
}

/// Cancelling while in flight lets the load finish, then throws it away.
#[test]
fn test_cancelled_in_flight_discarded() {
  let mut tree = tree(2);
  let mut loader = LoaderStage::new(config(1));
  let a = RequesterId::new();
  let root = tree.root();
  tree.request_load(root, Axis::Geometry, a, 1.0, LoadReason::RootLoad);
  assert_eq!(loader.tick(&mut tree), 1);
  assert_eq!(tree.node(root).axis(Axis::Geometry).state, StubState::Loading);

  tree.cancel_load_request(root, Axis::Geometry, a);
  loader.flush(&mut tree);

  assert!(!tree.has_resident(root, Axis::Geometry));
  assert_eq!(tree.node(root).axis(Axis::Geometry).state, StubState::Unloaded);
  assert_eq!(loader.stats().discarded, 1);
}

/// Children only load once their parent's geometry is in.
#[test]
fn test_children_follow_parent() {
  let mut tree = tree(3);
  let mut loader = LoaderStage::new(config(8));
  let a = RequesterId::new();
  let root = tree.root();
  let child = tree.node(root).children.unwrap()[0];
  tree.request_load(child, Axis::Geometry, a, 1.0, LoadReason::CanSplitChildPreload);
  tree.inc_ref(child, Axis::Geometry);

  assert_eq!(loader.tick(&mut tree), 0);

  tree.request_load(root, Axis::Geometry, a, 0.1, LoadReason::RootLoad);
  tree.inc_ref(root, Axis::Geometry);
  loader.run_to_idle(&mut tree);
  assert!(tree.has_resident(child, Axis::Geometry));
}
