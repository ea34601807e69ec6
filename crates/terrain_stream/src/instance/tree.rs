//! InstanceTree - one viewer's LOD state over a shared resource tree.
//!
//! # Per-frame step
//!
//! 1. Clear every split flag.
//! 2. `update_lod` from the root: split where the viewer wants more detail
//!    and every child, ancestor and nearby neighbor is ready, otherwise
//!    warm up or release the next levels.
//! 3. `update_texture` from the root: texture follows geometry and never
//!    outruns the parent's texture.
//! 4. Build the render queue and advance morph factors.
//!
//! The resource tree is passed into every operation; the instance only
//! holds its own per-node flags and a [`RequesterId`].

use glam::{IVec2, Vec3, Vec4};

use super::lod::{band_ceiling, band_floor, compute_lod, compute_texture_lod, lod_level, morph_target};
use super::render::{viewer_quadrant, DrawRequest, RENDER_ORDER};
use crate::config::LodConfig;
use crate::resource::{Axis, LoadReason, NodeHandle, PayloadKind, RequesterId, ResourceTree, UnloadReason};

/// Most levels a neighbor may lag behind before it blocks a split.
const MAX_NEIGHBOR_LEVEL_DIFFERENCE: usize = 2;

/// Per-viewer state of one node.
#[derive(Clone, Debug)]
pub struct InstanceNode {
  pub lod: u16,
  pub split: bool,
  pub last_morph: f32,
  pub geometry_referenced: bool,
  pub texture_referenced: bool,
  parent: Option<NodeHandle>,
  children: Option<[NodeHandle; 4]>,
  neighbors: [Option<NodeHandle>; 4],
}

/// Counters for one frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LodStats {
  pub nodes_split: usize,
  pub geometry_refs_taken: usize,
  pub geometry_refs_released: usize,
  pub texture_refs_taken: usize,
  pub texture_refs_released: usize,
  pub draws: usize,
}

pub struct InstanceTree {
  requester: RequesterId,
  config: LodConfig,
  nodes: Vec<InstanceNode>,
  root: NodeHandle,
  tree_depth: u32,
  texture_depth: u32,
  viewer: Vec3,
  stats: LodStats,
  draws: Vec<DrawRequest>,
}

impl InstanceTree {
  /// Mirror `tree` for a new viewer and register as one of its owners.
  pub fn attach<K: PayloadKind>(tree: &mut ResourceTree<K>, config: LodConfig) -> Self {
    let nodes = tree
      .handles()
      .map(|h| {
        let node = tree.node(h);
        for link in node.neighbors.iter().flatten().chain(node.parent.iter()) {
          assert_ne!(*link, h, "chunk {} links to itself", node.label);
        }
        InstanceNode {
          lod: (node.level as u16) << 8,
          split: false,
          last_morph: 0.0,
          geometry_referenced: false,
          texture_referenced: false,
          parent: node.parent,
          children: node.children,
          neighbors: node.neighbors,
        }
      })
      .collect();

    tree.attach_owner();
    let requester = RequesterId::new();
    log::debug!("instance {} attached", requester.raw());

    Self {
      requester,
      config,
      nodes,
      root: tree.root(),
      tree_depth: tree.tree_depth(),
      texture_depth: tree.texture_depth(),
      viewer: Vec3::ZERO,
      stats: LodStats::default(),
      draws: Vec::new(),
    }
  }

  /// Release every reference this viewer holds and leave the tree.
  pub fn detach<K: PayloadKind>(mut self, tree: &mut ResourceTree<K>) {
    for (i, node) in self.nodes.iter_mut().enumerate() {
      let h = NodeHandle(i as u32);
      if node.texture_referenced {
        tree.dec_ref(h, Axis::Texture, self.requester);
        node.texture_referenced = false;
      }
      if node.geometry_referenced {
        tree.dec_ref(h, Axis::Geometry, self.requester);
        node.geometry_referenced = false;
      }
    }
    tree.detach_owner();
    log::debug!("instance {} detached", self.requester.raw());
  }

  pub fn requester(&self) -> RequesterId {
    self.requester
  }

  #[inline]
  pub fn node(&self, handle: NodeHandle) -> &InstanceNode {
    &self.nodes[handle.index()]
  }

  /// Draws produced by the last [`Self::frame`] or [`Self::render`].
  pub fn draw_queue(&self) -> &[DrawRequest] {
    &self.draws
  }

  /// Run one full frame for a viewer at `viewer`.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "instance::frame"))]
  pub fn frame<K: PayloadKind>(&mut self, tree: &mut ResourceTree<K>, viewer: Vec3) -> LodStats {
    self.viewer = viewer;
    self.stats = LodStats::default();

    self.clear();
    tree.decay_heat(self.config.heat_decay, self.config.max_heat);

    let root = self.root;
    tree.request_load(root, Axis::Geometry, self.requester, 1.0, LoadReason::RootLoad);
    self.take_geometry_ref(tree, root);

    // Phase 1: Geometry LOD
    {
      #[cfg(feature = "tracing")]
      let _span = tracing::info_span!("update_lod").entered();
      if tree.has_resident(root, Axis::Geometry) {
        self.update_lod(tree, root);
      }
    }

    // Phase 2: Texture LOD
    {
      #[cfg(feature = "tracing")]
      let _span = tracing::info_span!("update_texture").entered();
      self.update_texture(tree, root);
    }

    // Phase 3: Draw list
    {
      #[cfg(feature = "tracing")]
      let _span = tracing::info_span!("render").entered();
      self.render(tree, viewer);
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_lod_frame(&self.stats);

    self.stats
  }

  /// Reset split flags; they are rebuilt by `update_lod`.
  pub fn clear(&mut self) {
    for node in &mut self.nodes {
      node.split = false;
    }
  }

  // ===========================================================================
  // Geometry
  // ===========================================================================

  fn desired_lod<K: PayloadKind>(&self, tree: &ResourceTree<K>, h: NodeHandle) -> u16 {
    compute_lod(
      self.tree_depth,
      &tree.node(h).bounds,
      self.viewer,
      self.config.distance_lod_max,
    )
  }

  /// Split state counts only while the node's geometry is resident.
  pub fn is_split<K: PayloadKind>(&self, tree: &ResourceTree<K>, h: NodeHandle) -> bool {
    self.nodes[h.index()].split && tree.has_resident(h, Axis::Geometry)
  }

  fn take_geometry_ref<K: PayloadKind>(&mut self, tree: &mut ResourceTree<K>, h: NodeHandle) {
    let node = &mut self.nodes[h.index()];
    if !node.geometry_referenced {
      tree.inc_ref(h, Axis::Geometry);
      node.geometry_referenced = true;
      self.stats.geometry_refs_taken += 1;
    }
  }

  /// Decide between showing `h` and showing its children.
  pub fn update_lod<K: PayloadKind>(&mut self, tree: &mut ResourceTree<K>, h: NodeHandle) {
    let desired = self.desired_lod(tree, h);
    let lod = self.nodes[h.index()].lod;
    debug_assert_eq!(lod_level(lod), tree.node(h).level, "lod band out of step with level");
    let children = self.nodes[h.index()].children;

    if let Some(children) = children {
      if desired > band_ceiling(lod) && self.can_split(tree, h) {
        self.do_split(tree, h);
        for c in children {
          self.update_lod(tree, c);
        }
        return;
      }
    }

    if band_floor(lod) == 0 {
      // The root has no parent to seed it.
      self.nodes[h.index()].lod = desired.clamp(band_floor(lod), band_ceiling(lod));
    }

    if let Some(children) = children {
      let lod = self.nodes[h.index()].lod;
      let priority = if desired > band_floor(lod) {
        f32::from(lod & 0xFF) / 255.0
      } else {
        0.5
      };

      for c in children {
        if priority < 0.5 {
          self.request_unload_geometry(tree, c, UnloadReason::UpdateLod);
        } else {
          self.warm_up(tree, c, priority);
        }
      }
    }
  }

  /// True when `h` may show its children this frame.
  ///
  /// Every check runs even after one fails, so missing children are
  /// requested and blocked neighbors are warmed in the same frame.
  pub fn can_split<K: PayloadKind>(&mut self, tree: &mut ResourceTree<K>, h: NodeHandle) -> bool {
    if self.is_split(tree, h) {
      return true;
    }
    let Some(children) = self.nodes[h.index()].children else {
      return false;
    };

    let mut split_ok = true;

    for c in children {
      if !tree.has_resident(c, Axis::Geometry) {
        tree.request_load(c, Axis::Geometry, self.requester, 1.0, LoadReason::CanSplitChildPreload);
        self.take_geometry_ref(tree, c);
        split_ok = false;
      }
    }

    let mut ancestor = self.nodes[h.index()].parent;
    while let Some(p) = ancestor {
      if !self.can_split(tree, p) {
        split_ok = false;
      }
      ancestor = self.nodes[p.index()].parent;
    }

    for neighbor in self.nodes[h.index()].neighbors {
      let mut n = neighbor;
      for _ in 0..MAX_NEIGHBOR_LEVEL_DIFFERENCE {
        n = n.and_then(|n| self.nodes[n.index()].parent);
      }
      if let Some(n) = n {
        if !self.can_split(tree, n) {
          split_ok = false;
        }
      }
    }

    let node = &mut self.nodes[h.index()];
    if node.last_morph > self.config.morph_split_threshold {
      if split_ok {
        node.last_morph -= self.config.morph_nudge;
      }
      split_ok = false;
    }

    split_ok
  }

  /// Show the children of `h`, splitting any collapsed ancestors first.
  pub fn do_split<K: PayloadKind>(&mut self, tree: &mut ResourceTree<K>, h: NodeHandle) {
    if self.nodes[h.index()].split {
      return;
    }
    debug_assert!(
      self.nodes[h.index()].geometry_referenced,
      "splitting a node without a geometry reference"
    );

    if let Some(children) = self.nodes[h.index()].children {
      for c in children {
        let desired = self.desired_lod(tree, c);
        let child = &mut self.nodes[c.index()];
        child.lod = desired.clamp(band_floor(child.lod), band_ceiling(child.lod));
      }
    }

    let mut ancestor = self.nodes[h.index()].parent;
    while let Some(p) = ancestor {
      if self.is_split(tree, p) {
        break;
      }
      self.do_split(tree, p);
      ancestor = self.nodes[p.index()].parent;
    }

    self.nodes[h.index()].split = true;
    self.stats.nodes_split += 1;
  }

  /// Keep `h` loaded and trim below it according to `priority`.
  pub fn warm_up<K: PayloadKind>(&mut self, tree: &mut ResourceTree<K>, h: NodeHandle, priority: f32) {
    tree.request_load(h, Axis::Geometry, self.requester, priority, LoadReason::WarmUpPreload);
    self.take_geometry_ref(tree, h);

    let Some(children) = self.nodes[h.index()].children else {
      return;
    };
    if priority < 0.5 {
      for c in children {
        self.request_unload_geometry(tree, c, UnloadReason::WarmUpUnimportant);
      }
    } else {
      for c in children {
        if let Some(grandchildren) = self.nodes[c.index()].children {
          for g in grandchildren {
            self.request_unload_geometry(tree, g, UnloadReason::WarmUpImportant);
          }
        }
      }
    }
  }

  /// Release this viewer's geometry on `h` and everything below it,
  /// deepest first.
  pub fn request_unload_geometry<K: PayloadKind>(
    &mut self,
    tree: &mut ResourceTree<K>,
    h: NodeHandle,
    reason: UnloadReason,
  ) {
    if !self.nodes[h.index()].geometry_referenced {
      return;
    }
    if let Some(children) = self.nodes[h.index()].children {
      for c in children {
        self.request_unload_geometry(tree, c, reason);
      }
    }
    log::trace!("release geometry {}: {reason:?}", h.0);
    tree.dec_ref(h, Axis::Geometry, self.requester);
    self.nodes[h.index()].geometry_referenced = false;
    self.stats.geometry_refs_released += 1;
  }

  // ===========================================================================
  // Texture
  // ===========================================================================

  /// Load texture where geometry is resident and the viewer is close
  /// enough; release it where it no longer is.
  pub fn update_texture<K: PayloadKind>(&mut self, tree: &mut ResourceTree<K>, h: NodeHandle) {
    let level = tree.node(h).level;
    if level >= self.texture_depth {
      return;
    }

    let desired = compute_texture_lod(
      self.tree_depth,
      &tree.node(h).bounds,
      self.viewer,
      self.config.texture_distance_lod_max,
    );

    if tree.has_resident(h, Axis::Texture) {
      if !tree.has_resident(h, Axis::Geometry) {
        self.request_unload_textures(tree, h, UnloadReason::TextureNoGeometry);
      } else if desired < level as i32 {
        self.request_unload_textures(tree, h, UnloadReason::TextureLevelTooHigh);
      } else if let Some(children) = self.nodes[h.index()].children {
        for c in children {
          self.update_texture(tree, c);
        }
      }
    } else if desired >= level as i32 && tree.has_resident(h, Axis::Geometry) {
      tree.request_load(h, Axis::Texture, self.requester, 1.0, LoadReason::UpdateTextureLoad);
      let node = &mut self.nodes[h.index()];
      if !node.texture_referenced {
        tree.inc_ref(h, Axis::Texture);
        node.texture_referenced = true;
        self.stats.texture_refs_taken += 1;
      }
    }
  }

  /// Release this viewer's texture on `h` and below, deepest first.
  pub fn request_unload_textures<K: PayloadKind>(
    &mut self,
    tree: &mut ResourceTree<K>,
    h: NodeHandle,
    reason: UnloadReason,
  ) {
    if tree.node(h).level >= self.texture_depth {
      return;
    }
    let referenced = self.nodes[h.index()].texture_referenced;
    if !referenced && !tree.has_resident(h, Axis::Texture) {
      return;
    }
    if let Some(children) = self.nodes[h.index()].children {
      for c in children {
        self.request_unload_textures(tree, c, reason);
      }
    }
    if referenced {
      log::trace!("release texture {}: {reason:?}", h.0);
      tree.dec_ref(h, Axis::Texture, self.requester);
      self.nodes[h.index()].texture_referenced = false;
      self.stats.texture_refs_released += 1;
    }
  }

  // ===========================================================================
  // Render queue
  // ===========================================================================

  /// Rebuild the draw queue front to back and advance morph factors.
  pub fn render<K: PayloadKind>(&mut self, tree: &ResourceTree<K>, viewer: Vec3) -> &[DrawRequest] {
    self.draws.clear();
    let root = self.root;
    if tree.has_resident(root, Axis::Geometry) {
      self.render_node(tree, root, None, viewer);
    }
    self.stats.draws = self.draws.len();
    &self.draws
  }

  fn render_node<K: PayloadKind>(
    &mut self,
    tree: &ResourceTree<K>,
    h: NodeHandle,
    bound: Option<NodeHandle>,
    viewer: Vec3,
  ) {
    let split = self.is_split(tree, h);
    let children = self.nodes[h.index()].children;
    let mut bound = bound;
    if tree.has_resident(h, Axis::Texture) {
      let children_lack_texture = children.map_or(true, |c| c.iter().any(|&c| !tree.has_resident(c, Axis::Texture)));
      if !split || children_lack_texture {
        bound = Some(h);
      }
    }

    if let (true, Some(children)) = (split, children) {
      let order = RENDER_ORDER[viewer_quadrant(viewer, tree.node(h).bounds.center())];
      // Untextured first, then textured.
      for textured in [false, true] {
        for i in order {
          let c = children[i];
          if tree.has_resident(c, Axis::Texture) == textured {
            self.render_node(tree, c, bound, viewer);
          }
        }
      }
      return;
    }

    if !tree.has_resident(h, Axis::Geometry) {
      return;
    }

    let node = &mut self.nodes[h.index()];
    let target = morph_target(node.lod);
    if target > node.last_morph {
      node.last_morph = target;
    } else {
      node.last_morph -= self.config.morph_rate.min(node.last_morph - target);
    }
    let morph = node.last_morph;

    let chunk = tree.node(h);
    let size = tree.chunk_size(chunk.level);
    let half = size * 0.5;
    let scale_offset = Vec4::new(
      chunk.position.x as f32 * size + half,
      chunk.position.y as f32 * size + half,
      half,
      morph,
    );

    let texgen = match bound {
      Some(b) => {
        let owner = tree.node(b);
        let shift = chunk.level - owner.level;
        let scale = 1.0 / (1u32 << shift) as f32;
        let delta: IVec2 = chunk.position - owner.position * (1 << shift);
        Vec4::new(delta.x as f32 * scale, delta.y as f32 * scale, scale, scale)
      }
      None => Vec4::new(0.0, 0.0, 1.0, 1.0),
    };

    self.draws.push(DrawRequest {
      node: h,
      morph,
      scale_offset,
      texgen,
      texture: bound,
    });
  }
}

#[cfg(test)]
#[path = "tree_test.rs"]
mod tree_test;
