use super::*;
use crate::format::{read_directory, DirectoryBuilder};
use crate::resource::{MemorySource, Quadrant};
use std::io::Cursor;

fn terrain(depth: u32) -> crate::format::GeneratedTerrain {
  DirectoryBuilder::new(depth)
    .base_chunk_size(16.0)
    .texture(depth.min(2), 8, 4)
    .build(|x, y| x * 0.5 + y, |level, _, _| [level as u8, 0, 0, 255])
}

fn open(depth: u32) -> ResourceTree {
  let source = MemorySource::from_generated(terrain(depth)).unwrap();
  ResourceTree::open(Arc::new(source)).unwrap()
}

/// Phase one output for hand edits before phase two.
fn directory(depth: u32) -> (ChunkDirectory, Arc<dyn PayloadSource>) {
  let generated = terrain(depth);
  let dir = read_directory(&mut Cursor::new(&generated.chunk_file)).unwrap();
  let source: Arc<dyn PayloadSource> = Arc::new(MemorySource::from_generated(generated).unwrap());
  (dir, source)
}

// =========================================================================
// Two-phase load
// =========================================================================

/// Every label becomes a handle; links point at the right cells.
#[test]
fn test_open_links() {
  let tree = open(3);
  assert_eq!(tree.len(), 21);
  assert_eq!(tree.texture_depth(), 2);

  let root = tree.node(tree.root());
  assert_eq!(root.level, 0);
  let ne = root.child(Quadrant::NorthEast).unwrap();
  assert_eq!(tree.node(ne).position, IVec2::new(1, 1));
  assert_eq!(tree.node(ne).parent, Some(tree.root()));
  assert_eq!(tree.lookup(1, IVec2::new(1, 1)), Some(ne));

  let nw = root.child(Quadrant::NorthWest).unwrap();
  assert_eq!(tree.node(nw).neighbor(crate::resource::Direction::East), Some(ne));
  assert_eq!(tree.node(nw).neighbor(crate::resource::Direction::West), None);
}

/// Each node's box contains its children's boxes.
#[test]
fn test_bounds_contain_children() {
  let tree = open(4);
  for h in tree.handles() {
    let node = tree.node(h);
    for child in node.children.iter().flatten() {
      assert!(node.bounds.contains(&tree.node(*child).bounds));
    }
  }
  let root = tree.node(tree.root());
  assert!(root.bounds.min.x < 0.0 && root.bounds.max.x > 128.0);
}

/// A stored neighbor label past the entry count means "no neighbor".
#[test]
fn test_out_of_range_neighbor_resolves_to_none() {
  let (mut dir, source) = directory(3);
  let entry = dir.label_to_entry[3];
  dir.entries[entry].stub.neighbors = [500, -1, 21, -7];
  let tree: ResourceTree = ResourceTree::from_directory(dir, source).unwrap();
  assert_eq!(tree.node(NodeHandle(3)).neighbors, [None; 4]);
}

#[test]
fn test_self_neighbor_rejected() {
  let (mut dir, source) = directory(2);
  let entry = dir.label_to_entry[2];
  dir.entries[entry].stub.neighbors[1] = 2;
  let err = ResourceTree::<RawKind>::from_directory(dir, source).err().unwrap();
  assert!(matches!(err, StreamError::BadHeader { .. }));
}

/// A child poking out of its parent is structural corruption.
#[test]
fn test_bounds_violation_rejected() {
  let (mut dir, source) = directory(2);
  let child = dir.entries[0].children.unwrap()[2];
  dir.entries[child].stub.max_height = 30_000;
  let err = ResourceTree::<RawKind>::from_directory(dir, source).err().unwrap();
  assert!(matches!(err, StreamError::BoundsViolation { .. }));
}

// =========================================================================
// Refcounting
// =========================================================================

/// Dropping the last reference releases the payload right away.
#[test]
fn test_dec_ref_to_zero_unloads() {
  let mut tree = open(3);
  let requester = RequesterId::new();
  let h = NodeHandle(0);

  tree.load_immediate(h, Axis::Geometry, LoadReason::RootLoad).unwrap();
  tree.inc_ref(h, Axis::Geometry);
  tree.inc_ref(h, Axis::Geometry);
  assert!(tree.node(h).geometry().is_some());

  tree.dec_ref(h, Axis::Geometry, requester);
  assert!(tree.has_resident(h, Axis::Geometry));
  tree.dec_ref(h, Axis::Geometry, requester);
  assert!(tree.node(h).geometry().is_none());
  assert_eq!(tree.node(h).axis(Axis::Geometry).state, StubState::Unloaded);
}

#[test]
#[should_panic(expected = "refcount underflow")]
fn test_dec_ref_underflow_panics() {
  let mut tree = open(2);
  tree.dec_ref(NodeHandle(1), Axis::Texture, RequesterId::new());
}

/// `dec_ref` also drops the caller's queued request.
#[test]
fn test_dec_ref_removes_request() {
  let mut tree = open(2);
  let (a, b) = (RequesterId::new(), RequesterId::new());
  let h = NodeHandle(1);
  tree.request_load(h, Axis::Geometry, a, 0.9, LoadReason::WarmUpPreload);
  tree.request_load(h, Axis::Geometry, b, 0.4, LoadReason::WarmUpPreload);
  tree.inc_ref(h, Axis::Geometry);
  tree.inc_ref(h, Axis::Geometry);

  tree.dec_ref(h, Axis::Geometry, a);
  assert!(!tree.has_request(h, Axis::Geometry, a));
  assert_eq!(tree.get_load_priority(h, Axis::Geometry), 0.4);
}

// =========================================================================
// Requests
// =========================================================================

/// Repeated requests from one requester replace each other.
#[test]
fn test_request_upsert_and_priority() {
  let mut tree = open(2);
  let (a, b) = (RequesterId::new(), RequesterId::new());
  let h = NodeHandle(0);

  tree.request_load(h, Axis::Geometry, a, 0.2, LoadReason::WarmUpPreload);
  tree.request_load(h, Axis::Geometry, a, 0.6, LoadReason::CanSplitChildPreload);
  tree.request_load(h, Axis::Geometry, b, 0.5, LoadReason::WarmUpPreload);

  assert_eq!(tree.requests(h, Axis::Geometry).count(), 2);
  assert_eq!(tree.get_load_priority(h, Axis::Geometry), 0.6);
  assert_eq!(tree.get_load_priority(h, Axis::Texture), 0.0);
  assert_eq!(tree.node(h).axis(Axis::Geometry).state, StubState::Pending);
  assert_eq!(tree.node(h).heat, 3.0);
}

/// Cancelling the last request of an unreferenced node drops it from the queue.
#[test]
fn test_cancel_leaves_queue() {
  let mut tree = open(2);
  let a = RequesterId::new();
  let h = NodeHandle(0);
  tree.request_load(h, Axis::Geometry, a, 1.0, LoadReason::RootLoad);
  assert_eq!(tree.pending_requests(8).len(), 1);

  tree.cancel_load_request(h, Axis::Geometry, a);
  assert!(tree.pending_requests(8).is_empty());
  assert_eq!(tree.node(h).axis(Axis::Geometry).state, StubState::Unloaded);
  assert_eq!(tree.live_requests(), 0);
}

/// Children wait for their parent's geometry; texture does not.
#[test]
fn test_pending_requests_order_and_gate() {
  let mut tree = open(3);
  let a = RequesterId::new();
  let root = tree.root();
  let [nw, ne, ..] = tree.node(root).children.unwrap();

  tree.request_load(nw, Axis::Geometry, a, 0.9, LoadReason::WarmUpPreload);
  tree.request_load(ne, Axis::Texture, a, 0.3, LoadReason::UpdateTextureLoad);
  tree.request_load(root, Axis::Geometry, a, 0.5, LoadReason::RootLoad);

  let order: Vec<_> = tree.pending_requests(8).iter().map(|p| (p.handle, p.axis)).collect();
  assert_eq!(order, vec![(root, Axis::Geometry), (ne, Axis::Texture)]);

  tree.load_immediate(root, Axis::Geometry, LoadReason::RootLoad).unwrap();
  tree.inc_ref(root, Axis::Geometry);
  let order: Vec<_> = tree.pending_requests(1).iter().map(|p| p.handle).collect();
  assert_eq!(order, vec![nw]);
}

// =========================================================================
// Load lifecycle
// =========================================================================

/// A result for an axis that was unloaded while in flight is stale.
#[test]
fn test_stale_generation_discarded() {
  let mut tree = open(2);
  let a = RequesterId::new();
  let h = tree.root();
  tree.request_load(h, Axis::Geometry, a, 1.0, LoadReason::RootLoad);
  tree.inc_ref(h, Axis::Geometry);

  let ticket = tree.begin_load(h, Axis::Geometry).unwrap();
  let payload = ticket.fetch::<RawKind>(tree.source().as_ref());
  tree.unload(h, Axis::Geometry, UnloadReason::Purge);

  assert_eq!(tree.complete_load(ticket, payload), LoadOutcome::Discarded);
  assert!(!tree.has_resident(h, Axis::Geometry));
  // Still requested, so it is queued again.
  assert_eq!(tree.node(h).axis(Axis::Geometry).state, StubState::Pending);
}

#[test]
fn test_complete_load_installs() {
  let mut tree = open(2);
  let a = RequesterId::new();
  let h = tree.root();
  tree.request_load(h, Axis::Texture, a, 1.0, LoadReason::UpdateTextureLoad);

  let ticket = tree.begin_load(h, Axis::Texture).unwrap();
  assert!(tree.begin_load(h, Axis::Texture).is_none());
  let payload = ticket.fetch::<RawKind>(tree.source().as_ref());
  assert_eq!(tree.complete_load(ticket, payload), LoadOutcome::Installed);
  assert_eq!(tree.node(h).texture().unwrap().width, 8);
}

/// A failed read goes back to pending while someone still asks for it.
#[test]
fn test_failed_load() {
  let mut tree = open(2);
  let a = RequesterId::new();
  let h = tree.root();
  tree.request_load(h, Axis::Geometry, a, 1.0, LoadReason::RootLoad);
  let ticket = tree.begin_load(h, Axis::Geometry).unwrap();
  let err = Err(StreamError::Config("boom".to_string()));
  assert_eq!(tree.complete_load(ticket, err), LoadOutcome::Failed);
  assert_eq!(tree.node(h).axis(Axis::Geometry).state, StubState::Pending);
  assert_eq!(tree.pending_requests(4).len(), 1);

  // Retried, and once nobody asks the node rests unloaded.
  let ticket = tree.begin_load(h, Axis::Geometry).unwrap();
  tree.cancel_load_request(h, Axis::Geometry, a);
  let err = Err(StreamError::Config("boom".to_string()));
  assert_eq!(tree.complete_load(ticket, err), LoadOutcome::Discarded);
  assert_eq!(tree.node(h).axis(Axis::Geometry).state, StubState::Unloaded);
  assert!(tree.pending_requests(4).is_empty());
}

#[test]
fn test_precache_geometry() {
  let mut tree = open(3);
  assert_eq!(tree.precache(Axis::Geometry).unwrap(), 21);
  assert_eq!(tree.resident_count(Axis::Geometry), 21);
  assert_eq!(tree.ref_count(NodeHandle(7), Axis::Geometry), 1);

  // Only levels above the texture depth hold texture.
  assert_eq!(tree.precache(Axis::Texture).unwrap(), 5);
}

// =========================================================================
// Purge and owners
// =========================================================================

/// Purge drops payloads but keeps refcounts.
#[test]
fn test_purge_keeps_refcounts() {
  let mut tree = open(2);
  tree.precache(Axis::Geometry).unwrap();
  tree.purge_all();
  assert_eq!(tree.resident_count(Axis::Geometry), 0);
  assert_eq!(tree.ref_count(NodeHandle(0), Axis::Geometry), 1);
}

#[test]
fn test_last_owner_detach_purges() {
  let mut tree = open(2);
  tree.attach_owner();
  tree.attach_owner();
  tree.load_immediate(NodeHandle(0), Axis::Geometry, LoadReason::RootLoad).unwrap();

  tree.detach_owner();
  assert!(tree.has_resident(NodeHandle(0), Axis::Geometry));
  tree.detach_owner();
  assert!(!tree.has_resident(NodeHandle(0), Axis::Geometry));
}

/// Requests left behind by departed owners are dropped with them.
#[test]
fn test_last_owner_detach_drops_requests() {
  let mut tree = open(2);
  let a = RequesterId::new();
  tree.attach_owner();
  tree.request_load(NodeHandle(0), Axis::Geometry, a, 1.0, LoadReason::RootLoad);
  tree.request_load(NodeHandle(1), Axis::Geometry, a, 0.5, LoadReason::WarmUpPreload);
  assert_eq!(tree.pending_requests(8).len(), 1);

  tree.detach_owner();
  for h in [NodeHandle(0), NodeHandle(1)] {
    assert!(!tree.has_request(h, Axis::Geometry, a));
    assert_eq!(tree.get_load_priority(h, Axis::Geometry), 0.0);
    assert_eq!(tree.node(h).axis(Axis::Geometry).state, StubState::Unloaded);
  }
  assert!(tree.pending_requests(8).is_empty());

  // Freed records are reused by later requests.
  tree.request_load(NodeHandle(0), Axis::Geometry, a, 0.25, LoadReason::RootLoad);
  assert_eq!(tree.get_load_priority(NodeHandle(0), Axis::Geometry), 0.25);
}

#[test]
fn test_heat_decays_and_clamps() {
  let mut tree = open(2);
  let a = RequesterId::new();
  for _ in 0..20 {
    tree.request_load(NodeHandle(1), Axis::Geometry, a, 0.5, LoadReason::WarmUpPreload);
  }
  tree.decay_heat(1.0, 10.0);
  assert_eq!(tree.node(NodeHandle(1)).heat, 10.0);
  tree.decay_heat(20.0, 10.0);
  assert_eq!(tree.node(NodeHandle(1)).heat, 0.0);
}
