//! DirectLookupCache - clip stack texels copied straight out of one TOC.
//!
//! Clip level `c` spans `clip · 2^(depth − 1 − c)` texels, which is TOC
//! level `log2(span / tile)`. Levels finer than the TOC's deepest level are
//! bilinearly magnified from the deepest one.

use std::collections::HashMap;

use glam::{IVec2, Vec2};

use super::CacheBackend;
use crate::clipmap::Surface;
use crate::error::{Result, StreamError};
use crate::rect::TexelRect;
use crate::resource::{PayloadKind, RawKind, TexelSource};
use crate::toc::TextureToc;

pub struct DirectLookupCache<K: PayloadKind = RawKind> {
  toc: TextureToc<K>,
  texture_size: u32,
  clip_map_size: u32,
  clip_depth: u32,
  level_offset: u32,
  cache_radius: i32,
}

impl<K: PayloadKind> DirectLookupCache<K>
where
  K::Texture: TexelSource,
{
  /// Serve a clip stack the size of `toc`'s deepest level.
  pub fn new(toc: TextureToc<K>) -> Self {
    let texture_size = toc.texture_size();
    Self {
      toc,
      texture_size,
      clip_map_size: 0,
      clip_depth: 0,
      level_offset: 0,
      cache_radius: 0,
    }
  }

  /// Present a larger logical texture, magnifying beyond the TOC's depth.
  pub fn with_texture_size(mut self, texture_size: u32) -> Self {
    self.texture_size = texture_size.max(self.toc.texture_size());
    self
  }

  pub fn toc(&self) -> &TextureToc<K> {
    &self.toc
  }

  /// First TOC level at least as wide as the clip map.
  pub fn level_offset(&self) -> u32 {
    self.level_offset
  }

  pub fn cache_radius(&self) -> i32 {
    self.cache_radius
  }

  /// Block until every wanted tile is resident.
  pub fn flush(&mut self) {
    self.toc.flush();
  }

  /// `(toc level, magnification shift)` serving clip `level`.
  fn toc_level(&self, level: u32) -> (u32, u32) {
    let span = self.clip_map_size << (self.clip_depth - 1 - level);
    let wanted = (span / self.toc.tile_size()).trailing_zeros();
    let deepest = self.toc.depth() - 1;
    if wanted > deepest {
      (deepest, wanted - deepest)
    } else {
      (wanted, 0)
    }
  }

  /// `rect` shrunk by `2^shift` and grown by one texel for filtering.
  fn magnified_source(rect: TexelRect, shift: u32) -> TexelRect {
    let div = IVec2::splat(1 << shift);
    let min = rect.point.div_euclid(div);
    let max = (rect.end() + div - IVec2::ONE).div_euclid(div);
    TexelRect::from_point_extent(min, max - min).inset(-1, -1)
  }

  fn blit(&self, level: u32, surface: &mut Surface, src: TexelRect, dst: TexelRect) {
    let (toc_level, shift) = self.toc_level(level);
    let width = src.extent.x as usize;

    if shift == 0 {
      for row in 0..src.extent.y {
        let out = surface.span_mut(dst.point.x, dst.point.y + row, width);
        self.toc.copy_row(toc_level, src.point.x, src.point.y + row, out);
      }
      return;
    }

    let scale = 1.0 / (1u32 << shift) as f32;
    for row in 0..src.extent.y {
      let out = surface.span_mut(dst.point.x, dst.point.y + row, width);
      for (col, px) in out.chunks_exact_mut(4).enumerate() {
        let at = IVec2::new(src.point.x + col as i32, src.point.y + row).as_vec2() + Vec2::splat(0.5);
        px.copy_from_slice(&self.toc.sample_bilinear(toc_level, at * scale));
      }
    }
  }
}

impl<K: PayloadKind> CacheBackend for DirectLookupCache<K>
where
  K::Texture: TexelSource,
{
  fn initialize(&mut self, clip_map_size: u32, clip_stack_depth: u32) -> Result<()> {
    let tile = self.toc.tile_size();
    if tile > clip_map_size {
      return Err(StreamError::Config(format!(
        "texture tiles ({tile}px) are larger than the clip map ({clip_map_size}px)"
      )));
    }
    let Some(offset) = (0..self.toc.depth()).find(|&i| (tile << i) >= clip_map_size) else {
      return Err(StreamError::Config(format!(
        "clip map ({clip_map_size}px) is larger than every level of the texture TOC"
      )));
    };

    self.clip_map_size = clip_map_size;
    self.clip_depth = clip_stack_depth;
    self.level_offset = offset;
    let tiles = (clip_map_size as f32 / tile as f32).ceil();
    self.cache_radius = (((tiles + 2.0) / 2.0).ceil() * tile as f32) as i32;

    log::debug!(
      "[cache] direct lookup: level offset {offset}, radius {} texels",
      self.cache_radius
    );
    Ok(())
  }

  fn texture_size(&self) -> Option<u32> {
    Some(self.texture_size)
  }

  /// Request the tiles within the cache radius on every TOC level the stack
  /// uses; tiles nearer the root get higher priority.
  fn set_interest_center(&mut self, texel: IVec2) {
    let deepest = self.toc.depth() - 1;
    let (_, magnify) = self.toc_level(0);
    let origin = IVec2::new(texel.x >> magnify, texel.y >> magnify);
    let half = (self.clip_map_size / 2) as i32;
    let levels = self.clip_depth.max(1) as f32;

    let mut wanted = HashMap::new();
    for i in self.level_offset..=deepest {
      let level_size = (self.toc.tile_size() << i) as i32;
      let shift = deepest - i;
      let center = IVec2::new(origin.x >> shift, origin.y >> shift).clamp(
        IVec2::splat(half),
        IVec2::splat((level_size - half).max(half)),
      );
      let radius = self.cache_radius;
      let rect = TexelRect::square(center - IVec2::splat(radius), 2 * radius);

      let rank = (i - self.level_offset) as f32;
      let priority = (levels - rank + 1.0) / (levels + 1.0);
      for cell in self.toc.cells_of(i, rect).points() {
        wanted.insert((i, cell), priority);
      }
    }
    self.toc.apply_interest(&wanted);
  }

  fn is_data_available(&self, level: u32, region: TexelRect) -> bool {
    let (toc_level, shift) = self.toc_level(level);
    let source = if shift == 0 {
      region
    } else {
      Self::magnified_source(region, shift)
    };
    self.toc.has_cells(toc_level, self.toc.cells_of(toc_level, source))
  }

  fn do_rect_update(&mut self, level: u32, surface: &mut Surface, src: TexelRect, dst: TexelRect) {
    self.blit(level, surface, src, dst);
  }

  fn service(&mut self) {
    self.toc.service();
  }
}

#[cfg(test)]
#[path = "direct_test.rs"]
mod direct_test;
