//! ClipStack - a fixed set of toroidal windows over one large texture.
//!
//! Level `i` has scale `2^(depth − 1 − i)`: level 0 is the finest, and
//! the cap level `depth − 1` holds the whole texture in one window. Every
//! recenter moves each window towards the new centre and asks the backend
//! for only the newly exposed texels.
//!
//! # Recenter
//!
//! Levels are walked finest to coarsest. A level whose new window is not
//! fully available is skipped and keeps its stale window; partial updates
//! are never committed. Once the texels uploaded in a pass exceed the
//! budget, coarser levels wait for the next call.

use glam::{IVec2, Vec2};
use smallvec::SmallVec;

use super::budget::{RecenterStats, UploadBudget};
use super::level::{debug_surface, ClipStackLevel, Surface};
use super::toroidal::{calculate_modulo_delta_bounds, clip_against_grid, window_origin, DeltaRects};
use crate::cache::CacheBackend;
use crate::config::ClipMapConfig;
use crate::error::{Result, StreamError};
use crate::rect::{TexRect, TexelRect};

/// Screen-space size of a world-space radius at a distance.
pub trait ScreenProjection {
  fn project_radius(&self, distance: f32, radius: f32) -> f32;
}

/// Symmetric perspective projection.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PerspectiveProjection {
  pub fov_y: f32,
  pub viewport_height: f32,
}

impl ScreenProjection for PerspectiveProjection {
  fn project_radius(&self, distance: f32, radius: f32) -> f32 {
    let half = (self.fov_y * 0.5).tan();
    if distance <= 0.0 || half <= 0.0 {
      return f32::MAX;
    }
    radius / (distance * half) * self.viewport_height * 0.5
  }
}

/// Contiguous clip levels chosen for one piece of geometry, `start` finest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClipLevelSpan {
  pub start: u32,
  pub end: u32,
}

impl ClipLevelSpan {
  #[inline]
  pub fn count(&self) -> u32 {
    self.end - self.start + 1
  }

  pub fn levels(&self) -> impl Iterator<Item = u32> {
    self.start..=self.end
  }
}

/// Shader constants for one selected level.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LevelConstants {
  pub level: u32,
  /// Clip centre in level texel units.
  pub center: Vec2,
  pub inv_scale: f32,
}

pub struct ClipStack<B: CacheBackend> {
  clip_map_size: u32,
  texture_size: u32,
  depth: u32,
  budget: UploadBudget,
  near_density_distance: f32,
  min_projected_texel: f32,
  levels: Vec<ClipStackLevel>,
  backend: B,
  total_updates: u64,
  texels_updated: u64,
}

impl<B: CacheBackend> ClipStack<B> {
  /// Build the stack and initialise `backend`. A backend that dictates a
  /// texture size overrides `config.texture_size`.
  pub fn new(config: &ClipMapConfig, mut backend: B) -> Result<Self> {
    let clip_map_size = config.clip_map_size;
    let texture_size = backend.texture_size().unwrap_or(config.texture_size);
    if !clip_map_size.is_power_of_two() || !texture_size.is_power_of_two() || texture_size < clip_map_size {
      return Err(StreamError::Config(format!(
        "clip map {clip_map_size} cannot window a {texture_size} texture"
      )));
    }

    let depth = texture_size.trailing_zeros() - clip_map_size.trailing_zeros() + 1;
    backend.initialize(clip_map_size, depth)?;

    let levels = (0..depth)
      .map(|i| ClipStackLevel::new(1 << (depth - 1 - i), clip_map_size))
      .collect();

    let level_bytes = u64::from(clip_map_size) * u64::from(clip_map_size) * 4;
    log::info!(
      "[clipmap] {clip_map_size}px clip map over a {texture_size}px texture: {} levels + cap, ~{:.1}MB",
      depth - 1,
      (level_bytes * u64::from(depth)) as f64 / (1024.0 * 1024.0)
    );

    Ok(Self {
      clip_map_size,
      texture_size,
      depth,
      budget: UploadBudget::from_config(config),
      near_density_distance: config.near_density_distance,
      min_projected_texel: config.min_projected_texel,
      levels,
      backend,
      total_updates: 0,
      texels_updated: 0,
    })
  }

  pub fn depth(&self) -> u32 {
    self.depth
  }

  pub fn clip_map_size(&self) -> u32 {
    self.clip_map_size
  }

  pub fn texture_size(&self) -> u32 {
    self.texture_size
  }

  pub fn level(&self, i: usize) -> &ClipStackLevel {
    &self.levels[i]
  }

  pub fn levels(&self) -> &[ClipStackLevel] {
    &self.levels
  }

  pub fn backend(&self) -> &B {
    &self.backend
  }

  pub fn backend_mut(&mut self) -> &mut B {
    &mut self.backend
  }

  pub fn set_budget(&mut self, budget: UploadBudget) {
    self.budget = budget;
  }

  /// Rect updates issued over the stack's lifetime.
  pub fn total_updates(&self) -> u64 {
    self.total_updates
  }

  pub fn texels_updated(&self) -> u64 {
    self.texels_updated
  }

  /// Window top-left for level `i` centred on `center`.
  #[inline]
  fn origin(&self, i: usize, center: Vec2) -> IVec2 {
    window_origin(center, self.clip_map_size, self.levels[i].scale)
  }

  fn interest_texel(&self, center: Vec2) -> IVec2 {
    let texel = (center * (self.clip_map_size * self.levels[0].scale) as f32).floor();
    IVec2::new(texel.x as i32, texel.y as i32)
  }

  /// Send `rects` of level `i` to the backend at their wrapped positions.
  fn upload(&mut self, i: usize, rects: &[TexelRect], stats: &mut RecenterStats) {
    if rects.is_empty() {
      return;
    }
    let clip = self.clip_map_size as i32;
    let level = i as u32;
    let Some(surface) = self.levels[i].surface.as_mut() else {
      return;
    };

    self.backend.begin_rect_updates(level, surface);
    for src in rects {
      debug_assert!(src.is_valid());
      let dst = TexelRect::from_point_extent(src.point.rem_euclid(IVec2::splat(clip)), src.extent);
      self.backend.do_rect_update(level, surface, *src, dst);
      stats.rects += 1;
      stats.texels += src.area();
    }
    self.backend.finish_rect_updates(level, surface);
  }

  /// Move every window towards `center` (normalised texture coordinates).
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "clipmap::recenter"))]
  pub fn recenter(&mut self, center: Vec2) -> RecenterStats {
    self.backend.service();
    let interest = self.interest_texel(center);
    self.backend.set_interest_center(interest);

    let clip = self.clip_map_size as i32;
    let mut stats = RecenterStats::default();

    for i in 0..self.levels.len() {
      if self.levels[i].surface.is_none() {
        continue;
      }

      let new_window = TexelRect::square(self.origin(i, center), clip);
      if !self.backend.is_data_available(i as u32, new_window) {
        log::warn!("[clipmap] level {i} data unavailable for {new_window:?}, keeping stale window");
        stats.levels_skipped += 1;
        continue;
      }

      let rects: DeltaRects = if self.levels[i].populated {
        let old_window = self.levels[i].window(self.clip_map_size);
        calculate_modulo_delta_bounds(old_window, new_window, clip)
      } else {
        clip_against_grid(clip, new_window).into_iter().collect()
      };
      debug_assert!(rects.iter().all(|r| new_window.contains(r)));

      let level = &mut self.levels[i];
      level.clip_center = center;
      level.toroidal_offset = new_window.point;
      level.populated = true;

      self.upload(i, &rects, &mut stats);
      stats.levels_updated += 1;

      if !self.budget.can_continue(stats.texels) {
        if i + 1 < self.levels.len() {
          stats.budget_exhausted = true;
          log::debug!(
            "[clipmap] upload budget spent after level {i} ({} texels), deferring coarser levels",
            stats.texels
          );
        }
        break;
      }
    }

    self.total_updates += u64::from(stats.rects);
    self.texels_updated += stats.texels;

    #[cfg(feature = "metrics")]
    crate::metrics::record_recenter(&stats);

    stats
  }

  /// Repopulate every level from its remembered centre. Returns false,
  /// touching nothing, if any level's data is not yet available.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "clipmap::fill"))]
  pub fn fill_with_texture_data(&mut self) -> bool {
    self.backend.service();
    let interest = self.interest_texel(self.levels[0].clip_center);
    self.backend.set_interest_center(interest);

    let clip = self.clip_map_size as i32;
    let mut desired = Vec::with_capacity(self.levels.len());
    for i in 0..self.levels.len() {
      let window = TexelRect::square(self.origin(i, self.levels[i].clip_center), clip);
      if !self.backend.is_data_available(i as u32, window) {
        return false;
      }
      desired.push(window);
    }

    let mut stats = RecenterStats::default();
    for (i, window) in desired.into_iter().enumerate() {
      let rects: DeltaRects = clip_against_grid(clip, window).into_iter().collect();
      self.upload(i, &rects, &mut stats);
      let level = &mut self.levels[i];
      level.toroidal_offset = window.point;
      level.populated = true;
      stats.levels_updated += 1;
    }

    self.total_updates += u64::from(stats.rects);
    self.texels_updated += stats.texels;
    true
  }

  /// Release every level surface (device lost). Levels stay uncommitted
  /// until a fill or recenter uploads their whole window again.
  pub fn zombify(&mut self) {
    for level in &mut self.levels {
      level.surface = None;
      level.populated = false;
    }
  }

  /// Reallocate level surfaces and refill them. Returns the fill result.
  pub fn resurrect(&mut self) -> bool {
    let started = web_time::Instant::now();
    for level in &mut self.levels {
      level.surface = Some(Surface::new(self.clip_map_size));
    }
    let filled = self.fill_with_texture_data();
    log::info!(
      "[clipmap] refilled {} levels after device reset in {:?} (complete: {filled})",
      self.levels.len(),
      started.elapsed()
    );
    filled
  }

  /// Allocate the per-level debug checker surfaces.
  pub fn init_debug_surfaces(&mut self) {
    for (i, level) in self.levels.iter_mut().enumerate() {
      level.debug_surface = Some(debug_surface(i, self.clip_map_size));
    }
  }

  /// Choose the clip levels for geometry seen between `near` and `far`
  /// whose texture footprint is `tex_bounds` (normalised).
  ///
  /// The finest level that fully contains the footprint becomes the
  /// ceiling; finer levels that only overlap it may become the floor when
  /// their texels are still worth drawing at `near`. Only levels holding
  /// committed data take part.
  pub fn calculate_clip_map_levels(
    &self,
    near: f32,
    far: f32,
    tex_bounds: TexRect,
    projection: &dyn ScreenProjection,
  ) -> ClipLevelSpan {
    let depth = self.depth as i32;
    if depth < 2 {
      return ClipLevelSpan { start: 0, end: 0 };
    }

    let footprint = tex_bounds.scaled(self.texture_size as f32).inset(1.0, 1.0);
    let mut min_overlap = depth + 1;
    let mut max_overlap = -1;

    for i in (0..depth).rev() {
      let level = &self.levels[i as usize];
      if !level.populated {
        continue;
      }
      let factor = (1u32 << i) as f32;
      let region = TexRect {
        point: level.toroidal_offset.as_vec2() * factor,
        extent: Vec2::splat(self.clip_map_size as f32 * factor),
      };

      if region.contains(&footprint) {
        max_overlap = i;
        min_overlap = i;
        continue;
      }

      if region.overlaps(&footprint) {
        if near > self.near_density_distance {
          let texel = (far - near) / ((footprint.extent.x + footprint.extent.y) / 2.0);
          if projection.project_radius(near, texel) < self.min_projected_texel {
            continue;
          }
        }
        min_overlap = min_overlap.min(i);
      }
    }

    let end = max_overlap.clamp(1, depth - 1);
    let start = min_overlap.clamp(end - 3, end - 1).max(0);
    ClipLevelSpan {
      start: start as u32,
      end: end as u32,
    }
  }

  /// `(centre · scale, 1 / scale)` for every level of `span`.
  pub fn level_constants(&self, span: ClipLevelSpan) -> SmallVec<[LevelConstants; 4]> {
    span
      .levels()
      .map(|i| {
        let level = &self.levels[i as usize];
        LevelConstants {
          level: i,
          center: level.clip_center * level.scale as f32,
          inv_scale: 1.0 / level.scale as f32,
        }
      })
      .collect()
  }
}

#[cfg(test)]
#[path = "stack_test.rs"]
mod stack_test;
