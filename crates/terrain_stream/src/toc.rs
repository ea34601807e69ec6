//! TextureToc - a texture-only resource tree with its own loader.
//!
//! Cache backends see texture data as a stack of tile grids: level `l`
//! holds `2^l × 2^l` tiles of `tile_size` texels. A TOC keeps its root
//! tile loaded for its whole life and manages the rest through an
//! interest set: every call to [`TextureToc::apply_interest`] requests the
//! tiles it names and releases the ones it no longer names.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use glam::{IVec2, Vec2};

use crate::config::LoaderConfig;
use crate::error::{Result, StreamError};
use crate::rect::TexelRect;
use crate::resource::{
  Axis, LoadReason, LoaderStage, LoaderStats, NodeHandle, PayloadKind, PayloadSource, RawKind, RequesterId,
  ResourceTree, TexelSource,
};

/// Fill colour for texels whose tile is not resident.
pub const MISSING_TEXEL: [u8; 4] = [0xFF, 0x00, 0xFF, 0x00];

pub struct TextureToc<K: PayloadKind = RawKind> {
  tree: ResourceTree<K>,
  loader: LoaderStage<K>,
  requester: RequesterId,
  interest: HashSet<(u32, IVec2)>,
}

impl<K: PayloadKind> TextureToc<K>
where
  K::Texture: TexelSource,
{
  /// Open a texture tree and load its root tile synchronously.
  pub fn open(source: Arc<dyn PayloadSource>, loader: LoaderConfig) -> Result<Self> {
    let mut tree = ResourceTree::<K>::open(source)?;
    if tree.texture_depth() == 0 || tree.tile_size() == 0 {
      return Err(StreamError::Config("texture source has no tiles".to_string()));
    }

    let root = tree.root();
    tree.attach_owner();
    tree.load_immediate(root, Axis::Texture, LoadReason::RootLoad)?;
    tree.inc_ref(root, Axis::Texture);

    Ok(Self {
      tree,
      loader: LoaderStage::new(loader),
      requester: RequesterId::new(),
      interest: HashSet::new(),
    })
  }

  /// Number of tile levels.
  pub fn depth(&self) -> u32 {
    self.tree.texture_depth()
  }

  pub fn tile_size(&self) -> u32 {
    self.tree.tile_size()
  }

  /// Texels across the deepest level.
  pub fn texture_size(&self) -> u32 {
    self.tile_size() << (self.depth() - 1)
  }

  pub fn tree(&self) -> &ResourceTree<K> {
    &self.tree
  }

  pub fn loader_stats(&self) -> LoaderStats {
    self.loader.stats()
  }

  fn node_at(&self, level: u32, cell: IVec2) -> Option<NodeHandle> {
    self.tree.lookup(level, cell)
  }

  pub fn has_tile(&self, level: u32, cell: IVec2) -> bool {
    self
      .node_at(level, cell)
      .is_some_and(|h| self.tree.has_resident(h, Axis::Texture))
  }

  pub fn tile(&self, level: u32, cell: IVec2) -> Option<&K::Texture> {
    self.node_at(level, cell).and_then(|h| self.tree.node(h).texture())
  }

  /// True when every tile of `cells` (a rect in tile units) is resident.
  pub fn has_cells(&self, level: u32, cells: TexelRect) -> bool {
    cells.points().all(|c| self.has_tile(level, c))
  }

  /// Texel rect of `level` → clamped rect of tile cells.
  pub fn cells_of(&self, level: u32, rect: TexelRect) -> TexelRect {
    rect.to_cells(self.tile_size() as i32).clamped(1 << level)
  }

  /// Ask for one tile. The first request from this TOC takes a reference.
  pub fn request_tile(&mut self, level: u32, cell: IVec2, priority: f32, reason: LoadReason) {
    let Some(h) = self.node_at(level, cell) else {
      return;
    };
    if !self.tree.has_request(h, Axis::Texture, self.requester) {
      self.tree.inc_ref(h, Axis::Texture);
    }
    self.tree.request_load(h, Axis::Texture, self.requester, priority, reason);
  }

  /// Drop this TOC's request and reference on one tile.
  pub fn cancel_tile(&mut self, level: u32, cell: IVec2) {
    let Some(h) = self.node_at(level, cell) else {
      return;
    };
    if self.tree.has_request(h, Axis::Texture, self.requester) {
      self.tree.dec_ref(h, Axis::Texture, self.requester);
    }
  }

  /// Replace the interest set: request every tile in `wanted` at its
  /// priority and cancel the previously wanted tiles that are not in it.
  pub fn apply_interest(&mut self, wanted: &HashMap<(u32, IVec2), f32>) {
    let stale: Vec<_> = self
      .interest
      .iter()
      .filter(|key| !wanted.contains_key(key))
      .copied()
      .collect();
    for (level, cell) in stale {
      self.cancel_tile(level, cell);
    }

    for (&(level, cell), &priority) in wanted {
      self.request_tile(level, cell, priority, LoadReason::InterestRegion);
    }
    self.interest = wanted.keys().copied().collect();
  }

  /// Retire finished loads and start new ones.
  pub fn service(&mut self) -> usize {
    self.loader.pump(&mut self.tree)
  }

  /// Load everything currently wanted before returning.
  pub fn flush(&mut self) {
    self.loader.run_to_idle(&mut self.tree);
  }

  // ===========================================================================
  // Texel access
  // ===========================================================================

  /// RGBA texel at `texel` of `level`, `None` when its tile is not resident.
  pub fn texel(&self, level: u32, texel: IVec2) -> Option<[u8; 4]> {
    let tile = self.tile_size() as i32;
    let cell = texel.div_euclid(IVec2::splat(tile));
    let local = texel.rem_euclid(IVec2::splat(tile));
    self
      .tile(level, cell)
      .map(|t| t.texel(local.x as u32, local.y as u32))
  }

  /// Copy `out.len() / 4` texels of row `y` starting at `x`, crossing tile
  /// boundaries. Spans over missing tiles are filled with
  /// [`MISSING_TEXEL`].
  pub fn copy_row(&self, level: u32, x: i32, y: i32, out: &mut [u8]) {
    let tile = self.tile_size() as i32;
    let mut x = x;
    let mut rest = out;
    while !rest.is_empty() {
      let local_x = x.rem_euclid(tile);
      let run = ((tile - local_x) as usize).min(rest.len() / 4);
      let (span, tail) = rest.split_at_mut(run * 4);
      let cell = IVec2::new(x.div_euclid(tile), y.div_euclid(tile));
      match self.tile(level, cell) {
        Some(t) => t.copy_row_rgba(local_x as u32, y.rem_euclid(tile) as u32, span),
        None => {
          for px in span.chunks_exact_mut(4) {
            px.copy_from_slice(&MISSING_TEXEL);
          }
        }
      }
      x += run as i32;
      rest = tail;
    }
  }

  /// Bilinear sample at continuous texel coordinates of `level`, clamped
  /// to the level's edge.
  pub fn sample_bilinear(&self, level: u32, at: Vec2) -> [u8; 4] {
    let max = ((self.tile_size() << level) - 1) as i32;
    let p = at - Vec2::splat(0.5);
    let base = p.floor();
    let f = p - base;
    let fetch = |dx: i32, dy: i32| {
      let t = IVec2::new(
        (base.x as i32 + dx).clamp(0, max),
        (base.y as i32 + dy).clamp(0, max),
      );
      self.texel(level, t).unwrap_or(MISSING_TEXEL)
    };
    let (a, b, c, d) = (fetch(0, 0), fetch(1, 0), fetch(0, 1), fetch(1, 1));
    let mut out = [0u8; 4];
    for i in 0..4 {
      let top = f32::from(a[i]) * (1.0 - f.x) + f32::from(b[i]) * f.x;
      let bottom = f32::from(c[i]) * (1.0 - f.x) + f32::from(d[i]) * f.x;
      out[i] = (top * (1.0 - f.y) + bottom * f.y).round() as u8;
    }
    out
  }
}
