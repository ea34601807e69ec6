//! TocAggregator - several texture TOCs presented as one virtual tree.
//!
//! Virtual level `v` is `min_tile · 2^v` texels across. Each TOC maps it to
//! the level with the same texel size, clamped to the levels it actually
//! has. When the clamp kicks in the virtual rect is scaled by
//! `2^(virtual − clamped)`, so a shallow TOC answers deep queries from its
//! deepest tiles.
//!
//! Availability needs every TOC. Requests fan out to every TOC, and a tile
//! hit by several virtual regions in one pass keeps the highest priority.

use std::collections::HashMap;

use glam::{IVec2, Vec2};

use crate::error::{Result, StreamError};
use crate::rect::TexelRect;
use crate::resource::{PayloadKind, RawKind, TexelSource};
use crate::toc::TextureToc;

/// A virtual region expressed in one TOC's own coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MappedRegion {
  pub level: u32,
  pub rect: TexelRect,
  /// `virtual − clamped` in powers of two. Positive when the TOC is
  /// coarser than the virtual level.
  pub shift: i32,
}

pub struct TocAggregator<K: PayloadKind = RawKind> {
  tocs: Vec<TextureToc<K>>,
  min_tile: u32,
  depth: u32,
}

impl<K: PayloadKind> TocAggregator<K>
where
  K::Texture: TexelSource,
{
  /// Aggregate `tocs` into a virtual tree covering `texture_size` texels.
  pub fn new(tocs: Vec<TextureToc<K>>, texture_size: u32) -> Result<Self> {
    if tocs.len() < 2 {
      return Err(StreamError::Config(format!(
        "an aggregator needs at least 2 TOCs, got {}",
        tocs.len()
      )));
    }
    if !texture_size.is_power_of_two() {
      return Err(StreamError::Config(format!(
        "texture_size must be a power of 2, got {texture_size}"
      )));
    }

    let min_tile = tocs.iter().map(|t| t.tile_size()).min().unwrap_or(1);
    if texture_size < min_tile {
      return Err(StreamError::Config(format!(
        "texture_size {texture_size} is smaller than the smallest tile {min_tile}"
      )));
    }
    let depth = (texture_size / min_tile).trailing_zeros() + 1;

    Ok(Self {
      tocs,
      min_tile,
      depth,
    })
  }

  /// Number of virtual levels.
  pub fn depth(&self) -> u32 {
    self.depth
  }

  pub fn min_tile(&self) -> u32 {
    self.min_tile
  }

  pub fn tocs(&self) -> &[TextureToc<K>] {
    &self.tocs
  }

  pub fn toc(&self, index: usize) -> &TextureToc<K> {
    &self.tocs[index]
  }

  /// Map virtual `level` and `rect` into TOC `index`.
  pub fn map_level(&self, index: usize, level: u32, rect: TexelRect) -> MappedRegion {
    let toc = &self.tocs[index];
    let tile_shift = (toc.tile_size() / self.min_tile).trailing_zeros() as i32;
    let wanted = level as i32 - tile_shift;
    let clamped = wanted.clamp(0, toc.depth() as i32 - 1);
    let shift = wanted - clamped;

    let rect = match shift.cmp(&0) {
      std::cmp::Ordering::Equal => rect,
      std::cmp::Ordering::Greater => {
        let div = 1 << shift;
        let min = rect.point.div_euclid(IVec2::splat(div));
        let max = (rect.end() + IVec2::splat(div - 1)).div_euclid(IVec2::splat(div));
        TexelRect::from_point_extent(min, max - min)
      }
      std::cmp::Ordering::Less => {
        let mul = -shift;
        TexelRect::from_point_extent(rect.point << mul, rect.extent << mul)
      }
    };

    MappedRegion {
      level: clamped as u32,
      rect,
      shift,
    }
  }

  /// True when every TOC holds every tile covering `rect` (grown by one
  /// texel for filtering seams) at virtual `level`.
  pub fn is_region_resident(&self, level: u32, rect: TexelRect) -> bool {
    let padded = rect.inset(-1, -1);
    (0..self.tocs.len()).all(|i| {
      let mapped = self.map_level(i, level, padded);
      let toc = &self.tocs[i];
      toc.has_cells(mapped.level, toc.cells_of(mapped.level, mapped.rect))
    })
  }

  /// Replace the interest set of every TOC with `regions`, given as
  /// `(virtual level, rect, priority)`.
  pub fn set_interest(&mut self, regions: &[(u32, TexelRect, f32)]) {
    for i in 0..self.tocs.len() {
      let mut wanted: HashMap<(u32, IVec2), f32> = HashMap::new();
      for &(level, rect, priority) in regions {
        let mapped = self.map_level(i, level, rect);
        let toc = &self.tocs[i];
        for cell in toc.cells_of(mapped.level, mapped.rect).points() {
          let entry = wanted.entry((mapped.level, cell)).or_insert(priority);
          *entry = entry.max(priority);
        }
      }
      self.tocs[i].apply_interest(&wanted);
    }
  }

  /// Service every TOC's loader once. Returns loads retired.
  pub fn pump(&mut self) -> usize {
    self.tocs.iter_mut().map(|t| t.service()).sum()
  }

  /// Block until every TOC has loaded what it wants.
  pub fn flush(&mut self) {
    for toc in &mut self.tocs {
      toc.flush();
    }
  }

  /// Colour of virtual texel `at` of `level` from TOC `index`, bilinearly
  /// magnified when the TOC is coarser than the level.
  pub fn sample(&self, index: usize, level: u32, at: IVec2) -> [u8; 4] {
    let mapped = self.map_level(index, level, TexelRect::square(at, 1));
    let toc = &self.tocs[index];
    if mapped.shift > 0 {
      let scale = 1.0 / (1 << mapped.shift) as f32;
      let p = (at.as_vec2() + Vec2::splat(0.5)) * scale;
      toc.sample_bilinear(mapped.level, p)
    } else {
      toc.texel(mapped.level, mapped.rect.point).unwrap_or(crate::toc::MISSING_TEXEL)
    }
  }
}
