//! ResourceTree - shared residency and demand state for one terrain.
//!
//! # Two-phase load
//!
//! 1. [`PayloadSource::directory`] reads and validates every stub in file
//!    order and builds the label→entry map.
//! 2. [`ResourceTree::from_directory`] allocates one arena slot per label,
//!    resolves parent, child and neighbor labels into [`NodeHandle`]s and
//!    checks bounds containment.
//!
//! # Demand
//!
//! Each node axis carries a refcount and a request list keyed by
//! [`RequesterId`]. The refcount reaching zero releases the payload
//! synchronously. Request lists only express intent: the loader reads
//! [`ResourceTree::pending_requests`] and installs results on a later frame.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::{IVec2, Vec3};

use super::node::{Axis, AxisState, ChunkNode, NodeHandle, StubState};
use super::payload::{Payload, PayloadKind, RawKind};
use super::request::{LoadReason, LoadRequest, RequestPool, RequesterId, UnloadReason};
use super::source::PayloadSource;
use crate::bounds::Aabb3;
use crate::error::{Result, StreamError};
use crate::format::{ChunkDirectory, ChunkFileHeader};

/// Slack added around every chunk box so shared edges never crack.
pub const BOUNDS_EPSILON: f32 = 0.01;

/// A node axis waiting for the loader, as reported by
/// [`ResourceTree::pending_requests`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PendingLoad {
  pub handle: NodeHandle,
  pub axis: Axis,
  pub priority: f32,
}

/// Everything a worker needs to fetch one payload without touching the tree.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadTicket {
  pub handle: NodeHandle,
  pub axis: Axis,
  pub(crate) generation: u32,
  pub data_offset: u64,
  pub level: u32,
  pub position: IVec2,
}

impl LoadTicket {
  /// Read and decode the payload. `None` when the source has no tile for
  /// this node.
  pub fn fetch<K: PayloadKind>(&self, source: &dyn PayloadSource) -> Result<Option<Payload<K>>> {
    match self.axis {
      Axis::Geometry => {
        let bytes = source.read_geometry(self.data_offset)?;
        Ok(Some(Payload::Geometry(K::decode_geometry(bytes)?)))
      }
      Axis::Texture => match source.read_texture(self.level, self.position)? {
        Some(bytes) => Ok(Some(Payload::Texture(K::decode_texture(bytes)?))),
        None => Ok(None),
      },
    }
  }
}

/// How a retired load ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoadOutcome {
  Installed,
  /// Nobody wanted the result any more, or the node moved on.
  Discarded,
  Failed,
}

/// File-backed chunk quadtree, generic over its payload kind.
pub struct ResourceTree<K: PayloadKind = RawKind> {
  source: Arc<dyn PayloadSource>,
  header: ChunkFileHeader,
  nodes: Vec<ChunkNode<K>>,
  root: NodeHandle,
  positions: HashMap<(u32, IVec2), NodeHandle>,
  requests: RequestPool,
  pending: HashSet<(NodeHandle, Axis)>,
  texture_depth: u32,
  tile_size: u32,
  owners: u32,
}

impl<K: PayloadKind> ResourceTree<K> {
  /// Read the directory from `source` and build the tree.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "resource::open"))]
  pub fn open(source: Arc<dyn PayloadSource>) -> Result<Self> {
    let directory = source.directory()?;
    Self::from_directory(directory, source)
  }

  /// Phase two: resolve labels into handles and validate structure.
  pub fn from_directory(directory: ChunkDirectory, source: Arc<dyn PayloadSource>) -> Result<Self> {
    let ChunkDirectory {
      header,
      entries,
      label_to_entry,
    } = directory;
    let count = entries.len();
    let label_of = |entry: usize| NodeHandle(entries[entry].stub.label as u32);

    let mut nodes = Vec::with_capacity(count);
    let mut positions = HashMap::with_capacity(count);
    for (label, &entry_index) in label_to_entry.iter().enumerate() {
      let entry = &entries[entry_index];
      let stub = &entry.stub;

      let mut neighbors = [None; 4];
      for (slot, &raw) in neighbors.iter_mut().zip(&stub.neighbors) {
        if raw >= 0 && (raw as usize) < count {
          if raw as usize == label {
            return Err(StreamError::BadHeader {
              format: "chunk directory",
              reason: format!("chunk {label} lists itself as a neighbor"),
            });
          }
          *slot = Some(NodeHandle(raw as u32));
        }
      }

      let level = u32::from(stub.level);
      let position = IVec2::new(i32::from(stub.x), i32::from(stub.y));
      let size = chunk_size(&header, level);
      let origin = position.as_vec2() * size;
      let bounds = Aabb3::new(
        Vec3::new(origin.x, origin.y, f32::from(stub.min_height) * header.vertical_scale),
        Vec3::new(
          origin.x + size,
          origin.y + size,
          f32::from(stub.max_height.max(stub.min_height)) * header.vertical_scale,
        ),
      )
      .expanded(BOUNDS_EPSILON);

      positions.insert((level, position), NodeHandle(label as u32));
      nodes.push(ChunkNode {
        label: stub.label,
        level,
        position,
        bounds,
        neighbors,
        children: entry.children.map(|c| c.map(label_of)),
        parent: entry.parent.map(label_of),
        data_offset: u64::from(stub.payload_offset),
        axes: [AxisState::default(), AxisState::default()],
        geometry: None,
        texture: None,
        heat: 0.0,
      });
    }

    for node in &nodes {
      for child in node.children.iter().flatten() {
        if !node.bounds.contains(&nodes[child.index()].bounds) {
          return Err(StreamError::BoundsViolation {
            parent: node.label,
            child: nodes[child.index()].label,
          });
        }
      }
    }

    let texture_depth = source.texture_depth().min(header.tree_depth);
    let tile_size = source.tile_size();
    log::info!(
      "opened terrain: depth {}, {} chunks, texture depth {}",
      header.tree_depth,
      count,
      texture_depth
    );

    Ok(Self {
      root: label_of(0),
      source,
      header,
      nodes,
      positions,
      requests: RequestPool::default(),
      pending: HashSet::new(),
      texture_depth,
      tile_size,
      owners: 0,
    })
  }

  // ===========================================================================
  // Structure
  // ===========================================================================

  #[inline]
  pub fn node(&self, handle: NodeHandle) -> &ChunkNode<K> {
    &self.nodes[handle.index()]
  }

  #[inline]
  pub fn root(&self) -> NodeHandle {
    self.root
  }

  pub fn len(&self) -> usize {
    self.nodes.len()
  }

  pub fn is_empty(&self) -> bool {
    self.nodes.is_empty()
  }

  pub fn handles(&self) -> impl Iterator<Item = NodeHandle> {
    (0..self.nodes.len() as u32).map(NodeHandle)
  }

  pub fn header(&self) -> &ChunkFileHeader {
    &self.header
  }

  pub fn tree_depth(&self) -> u32 {
    self.header.tree_depth
  }

  /// Levels `0..texture_depth` can hold texture.
  pub fn texture_depth(&self) -> u32 {
    self.texture_depth
  }

  /// Side of a texture tile in texels, 0 when there is no texture.
  pub fn tile_size(&self) -> u32 {
    self.tile_size
  }

  pub fn source(&self) -> &Arc<dyn PayloadSource> {
    &self.source
  }

  /// World size of a chunk at `level`.
  pub fn chunk_size(&self, level: u32) -> f32 {
    chunk_size(&self.header, level)
  }

  /// Node at (level, x, y), if the directory has one.
  pub fn lookup(&self, level: u32, position: IVec2) -> Option<NodeHandle> {
    self.positions.get(&(level, position)).copied()
  }

  #[inline]
  pub fn has_resident(&self, handle: NodeHandle, axis: Axis) -> bool {
    self.nodes[handle.index()].is_resident(axis)
  }

  pub fn resident_count(&self, axis: Axis) -> usize {
    self.nodes.iter().filter(|n| n.is_resident(axis)).count()
  }

  /// Request records currently in use across the whole tree.
  pub fn live_requests(&self) -> usize {
    self.requests.live()
  }

  // ===========================================================================
  // Refcounting
  // ===========================================================================

  pub fn inc_ref(&mut self, handle: NodeHandle, axis: Axis) {
    self.nodes[handle.index()].axis_mut(axis).ref_count += 1;
  }

  /// Drop one reference and the requester's pending request. Reaching zero
  /// unloads the axis immediately.
  ///
  /// # Panics
  /// On refcount underflow.
  pub fn dec_ref(&mut self, handle: NodeHandle, axis: Axis, requester: RequesterId) {
    let node = &mut self.nodes[handle.index()];
    let label = node.label;
    let state = &mut node.axes[axis.index()];
    assert!(
      state.ref_count > 0,
      "refcount underflow on chunk {label} ({axis:?})"
    );
    state.ref_count -= 1;
    self.requests.remove(&mut state.requests, requester);

    if state.ref_count == 0 {
      self.unload(handle, axis, UnloadReason::RefCountZero);
    }
  }

  pub fn ref_count(&self, handle: NodeHandle, axis: Axis) -> u32 {
    self.nodes[handle.index()].axis(axis).ref_count
  }

  // ===========================================================================
  // Requests
  // ===========================================================================

  /// Upsert `requester`'s request. Idempotent across frames.
  pub fn request_load(
    &mut self,
    handle: NodeHandle,
    axis: Axis,
    requester: RequesterId,
    priority: f32,
    reason: LoadReason,
  ) {
    let node = &mut self.nodes[handle.index()];
    debug_assert!(
      axis == Axis::Geometry || node.level < self.texture_depth,
      "texture requested below the texture depth"
    );
    node.heat += 1.0;
    let state = &mut node.axes[axis.index()];
    self.requests.upsert(
      &mut state.requests,
      LoadRequest {
        requester,
        priority,
        reason,
      },
    );
    if state.state == StubState::Unloaded {
      state.state = StubState::Pending;
      self.pending.insert((handle, axis));
    }
  }

  /// Remove `requester`'s request. A node nobody wants any more leaves the
  /// pending queue; an in-flight load keeps running and is discarded when
  /// it retires.
  pub fn cancel_load_request(&mut self, handle: NodeHandle, axis: Axis, requester: RequesterId) {
    let state = &mut self.nodes[handle.index()].axes[axis.index()];
    self.requests.remove(&mut state.requests, requester);
    if state.requests.is_none() && state.ref_count == 0 && state.state == StubState::Pending {
      state.state = StubState::Unloaded;
      self.pending.remove(&(handle, axis));
    }
  }

  pub fn has_request(&self, handle: NodeHandle, axis: Axis, requester: RequesterId) -> bool {
    let state = self.nodes[handle.index()].axis(axis);
    self.requests.contains(state.requests, requester)
  }

  /// Maximum priority across every requester, 0 when nobody asks.
  pub fn get_load_priority(&self, handle: NodeHandle, axis: Axis) -> f32 {
    let state = self.nodes[handle.index()].axis(axis);
    self.requests.max_priority(state.requests).unwrap_or(0.0)
  }

  pub fn requests(&self, handle: NodeHandle, axis: Axis) -> impl Iterator<Item = &LoadRequest> + '_ {
    self.requests.iter(self.nodes[handle.index()].axis(axis).requests)
  }

  /// Up to `max` loadable node axes, highest priority first.
  ///
  /// Geometry waits until the parent's geometry is resident.
  pub fn pending_requests(&self, max: usize) -> Vec<PendingLoad> {
    let mut out: Vec<PendingLoad> = self
      .pending
      .iter()
      .filter(|&&(handle, axis)| {
        let node = &self.nodes[handle.index()];
        node.axis(axis).state == StubState::Pending
          && (axis == Axis::Texture || node.parent.map_or(true, |p| self.has_resident(p, Axis::Geometry)))
      })
      .map(|&(handle, axis)| PendingLoad {
        handle,
        axis,
        priority: self.get_load_priority(handle, axis),
      })
      .collect();

    out.sort_by(|a, b| {
      b.priority
        .total_cmp(&a.priority)
        .then(a.handle.cmp(&b.handle))
        .then(a.axis.index().cmp(&b.axis.index()))
    });
    out.truncate(max);
    out
  }

  // ===========================================================================
  // Load lifecycle
  // ===========================================================================

  /// Move a pending axis to `Loading` and describe the work.
  pub fn begin_load(&mut self, handle: NodeHandle, axis: Axis) -> Option<LoadTicket> {
    let node = &mut self.nodes[handle.index()];
    let (level, position, data_offset) = (node.level, node.position, node.data_offset);
    let state = node.axis_mut(axis);
    if state.state != StubState::Pending {
      return None;
    }
    state.state = StubState::Loading;
    self.pending.remove(&(handle, axis));
    Some(LoadTicket {
      handle,
      axis,
      generation: state.generation,
      data_offset,
      level,
      position,
    })
  }

  /// Retire a load started with [`Self::begin_load`].
  pub fn complete_load(&mut self, ticket: LoadTicket, result: Result<Option<Payload<K>>>) -> LoadOutcome {
    let LoadTicket { handle, axis, .. } = ticket;
    let parent = self.nodes[handle.index()].parent;
    let parent_lost = axis == Axis::Geometry && parent.is_some_and(|p| !self.has_resident(p, Axis::Geometry));

    let node = &mut self.nodes[handle.index()];
    let label = node.label;
    let state = node.axis_mut(axis);
    if state.state != StubState::Loading || state.generation != ticket.generation {
      log::warn!("chunk {label} ({axis:?}): stale load discarded");
      return LoadOutcome::Discarded;
    }

    let unwanted = state.ref_count == 0 && state.requests.is_none();
    if unwanted || parent_lost {
      self.settle(handle, axis);
      log::warn!("chunk {label} ({axis:?}): load no longer wanted, discarded");
      return LoadOutcome::Discarded;
    }

    match result {
      Ok(Some(payload)) => {
        self.install(handle, payload);
        LoadOutcome::Installed
      }
      Ok(None) => {
        log::warn!("chunk {label} ({axis:?}): source has no payload");
        self.settle(handle, axis);
        LoadOutcome::Failed
      }
      Err(err) => {
        // Still-wanted axes go back to pending and are retried.
        log::warn!("chunk {label} ({axis:?}): load failed: {err}");
        self.settle(handle, axis);
        LoadOutcome::Failed
      }
    }
  }

  /// Load one axis synchronously on the calling thread.
  pub fn load_immediate(&mut self, handle: NodeHandle, axis: Axis, reason: LoadReason) -> Result<()> {
    let node = &self.nodes[handle.index()];
    if node.is_resident(axis) {
      return Ok(());
    }
    let ticket = LoadTicket {
      handle,
      axis,
      generation: node.axis(axis).generation,
      data_offset: node.data_offset,
      level: node.level,
      position: node.position,
    };
    let payload = ticket.fetch::<K>(self.source.as_ref())?.ok_or_else(|| StreamError::InvalidPayload {
      offset: ticket.data_offset,
      reason: format!("chunk {} has no {axis:?} payload", node.label),
    })?;
    log::trace!("chunk {} ({axis:?}) loaded immediately: {reason:?}", node.label);
    self.pending.remove(&(handle, axis));
    self.install(handle, payload);
    Ok(())
  }

  /// Synchronously load and reference every node that can hold `axis`.
  /// Release with [`Self::dec_ref`] per node.
  pub fn precache(&mut self, axis: Axis) -> Result<usize> {
    let texture_depth = self.texture_depth;
    let targets: Vec<NodeHandle> = self
      .handles()
      .filter(|&h| axis == Axis::Geometry || self.nodes[h.index()].level < texture_depth)
      .collect();
    for &handle in &targets {
      self.load_immediate(handle, axis, LoadReason::Precache)?;
      self.inc_ref(handle, axis);
    }
    log::info!("precached {} chunks ({axis:?})", targets.len());
    Ok(targets.len())
  }

  fn install(&mut self, handle: NodeHandle, payload: Payload<K>) {
    let node = &mut self.nodes[handle.index()];
    let axis = match payload {
      Payload::Geometry(g) => {
        node.geometry = Some(g);
        Axis::Geometry
      }
      Payload::Texture(t) => {
        node.texture = Some(t);
        Axis::Texture
      }
    };
    node.axis_mut(axis).state = StubState::Loaded;
  }

  /// After a payload leaves (or never arrived), return the axis to
  /// `Pending` if anyone still asks for it, otherwise `Unloaded`.
  fn settle(&mut self, handle: NodeHandle, axis: Axis) {
    let state = self.nodes[handle.index()].axis_mut(axis);
    if state.requests.is_some() {
      state.state = StubState::Pending;
      self.pending.insert((handle, axis));
    } else {
      state.state = StubState::Unloaded;
      self.pending.remove(&(handle, axis));
    }
  }

  // ===========================================================================
  // Unloading
  // ===========================================================================

  /// Release the payload of one axis. Refcounts and requests are kept.
  pub fn unload(&mut self, handle: NodeHandle, axis: Axis, reason: UnloadReason) {
    let node = &mut self.nodes[handle.index()];
    let was_resident = node.is_resident(axis);
    node.release(axis);
    let state = node.axis_mut(axis);
    state.generation = state.generation.wrapping_add(1);
    if was_resident {
      log::trace!("chunk {} ({axis:?}) unloaded: {reason:?}", node.label);
    }
    self.settle(handle, axis);
  }

  /// Unload both axes regardless of refcount.
  pub fn purge(&mut self, handle: NodeHandle) {
    for axis in Axis::ALL {
      self.unload(handle, axis, UnloadReason::Purge);
    }
  }

  /// Device-loss reset: every payload goes. Callers must tolerate refcounts
  /// that no longer match residency.
  pub fn purge_all(&mut self) {
    for handle in self.handles().collect::<Vec<_>>() {
      self.purge(handle);
    }
    log::info!("purged all {} chunks", self.nodes.len());
  }

  pub fn decay_heat(&mut self, amount: f32, max_heat: f32) {
    for node in &mut self.nodes {
      node.heat = (node.heat - amount).clamp(0.0, max_heat);
    }
  }

  // ===========================================================================
  // Owners
  // ===========================================================================

  /// Register a viewer or cache that holds references on this tree.
  pub fn attach_owner(&mut self) {
    self.owners += 1;
  }

  /// The last owner leaving drops every outstanding request and purges
  /// the whole tree.
  pub fn detach_owner(&mut self) {
    assert!(self.owners > 0, "detach_owner without a matching attach_owner");
    self.owners -= 1;
    if self.owners == 0 {
      for node in &mut self.nodes {
        for state in &mut node.axes {
          self.requests.clear(&mut state.requests);
        }
      }
      self.purge_all();
    }
  }

  pub fn owner_count(&self) -> u32 {
    self.owners
  }
}

#[inline]
fn chunk_size(header: &ChunkFileHeader, level: u32) -> f32 {
  (1u64 << (header.tree_depth - 1 - level)) as f32 * header.base_chunk_size
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
