use super::*;
use crate::cache::SyntheticCache;

const CLIP: u32 = 16;

fn config() -> ClipMapConfig {
  ClipMapConfig {
    clip_map_size: CLIP,
    texture_size: 128,
    ..Default::default()
  }
}

fn stack() -> ClipStack<SyntheticCache> {
  let mut stack = ClipStack::new(&config(), SyntheticCache::new(4)).unwrap();
  stack.set_budget(UploadBudget::UNLIMITED);
  stack
}

/// Synthetic backend with switchable availability and size.
struct GatedCache {
  inner: SyntheticCache,
  blocked: Vec<u32>,
  size: Option<u32>,
}

impl GatedCache {
  fn new() -> Self {
    Self {
      inner: SyntheticCache::new(4),
      blocked: Vec::new(),
      size: None,
    }
  }
}

impl CacheBackend for GatedCache {
  fn initialize(&mut self, clip_map_size: u32, clip_stack_depth: u32) -> Result<()> {
    self.inner.initialize(clip_map_size, clip_stack_depth)
  }

  fn texture_size(&self) -> Option<u32> {
    self.size
  }

  fn set_interest_center(&mut self, texel: IVec2) {
    self.inner.set_interest_center(texel);
  }

  fn is_data_available(&self, level: u32, _region: TexelRect) -> bool {
    !self.blocked.contains(&level)
  }

  fn do_rect_update(&mut self, level: u32, surface: &mut Surface, src: TexelRect, dst: TexelRect) {
    self.inner.do_rect_update(level, surface, src, dst);
  }
}

/// Every texel of every populated window matches the backend pattern.
fn assert_windows_match(stack: &ClipStack<SyntheticCache>) {
  for (i, level) in stack.levels().iter().enumerate() {
    assert!(level.populated, "level {i} not populated");
    let surface = level.surface.as_ref().unwrap();
    for p in level.window(CLIP).points() {
      assert_eq!(
        surface.texel(p.x, p.y),
        stack.backend().texel_at(i as u32, p.x, p.y),
        "level {i} texel {p}"
      );
    }
  }
}

// =========================================================================
// Batch 1: Construction
// =========================================================================

/// 512px clip over an 8192px texture gives 5 levels.
#[test]
fn test_depth_from_sizes() {
  let config = ClipMapConfig {
    clip_map_size: 512,
    texture_size: 8192,
    ..Default::default()
  };
  let stack = ClipStack::new(&config, SyntheticCache::default()).unwrap();
  assert_eq!(stack.depth(), 5);
  assert_eq!(stack.level(0).scale, 16);
  assert_eq!(stack.level(4).scale, 1);
  assert_eq!(stack.backend().depth(), 5);
}

/// A backend that knows its texture size overrides the configured one.
#[test]
fn test_backend_texture_size_wins() {
  let mut backend = GatedCache::new();
  backend.size = Some(64);
  let stack = ClipStack::new(&config(), backend).unwrap();
  assert_eq!(stack.texture_size(), 64);
  assert_eq!(stack.depth(), 3);
}

#[test]
fn test_rejects_clip_larger_than_texture() {
  let mut backend = GatedCache::new();
  backend.size = Some(8);
  assert!(ClipStack::new(&config(), backend).is_err());
}

// =========================================================================
// Batch 2: Recenter
// =========================================================================

/// The first recenter uploads every window in full.
#[test]
fn test_first_recenter_populates_every_level() {
  let mut stack = stack();
  let stats = stack.recenter(Vec2::splat(0.5));

  assert_eq!(stats.levels_updated, 4);
  assert_eq!(stats.texels, 4 * u64::from(CLIP * CLIP));
  assert_eq!(stack.level(0).toroidal_offset, IVec2::new(56, 56));
  assert_eq!(stack.level(3).toroidal_offset, IVec2::ZERO);
  assert_windows_match(&stack);
}

/// One texel of movement on X at the finest level is a single strip.
#[test]
fn test_one_texel_move_uploads_one_strip() {
  let mut stack = stack();
  let start = Vec2::new(0.5, 72.5 / 128.0);
  stack.recenter(start);

  let stats = stack.recenter(start + Vec2::new(1.0 / 128.0, 0.0));
  assert_eq!(stats.rects, 1);
  assert_eq!(stats.texels, u64::from(CLIP));
  assert_eq!(stack.level(0).toroidal_offset, IVec2::new(57, 64));
  assert_windows_match(&stack);
}

/// Long diagonal moves stay correct through the wraparound.
#[test]
fn test_diagonal_moves_keep_windows_exact() {
  let mut stack = stack();
  let path = [(0.5, 0.5), (0.53, 0.47), (0.61, 0.52), (0.2, 0.9), (0.21, 0.88), (0.95, 0.05)];
  for (x, y) in path {
    stack.recenter(Vec2::new(x, y));
    assert_windows_match(&stack);
  }
}

#[test]
fn test_interest_center_is_finest_texel() {
  let mut stack = stack();
  stack.recenter(Vec2::new(0.25, 0.75));
  assert_eq!(stack.backend().interest(), IVec2::new(32, 96));
}

/// An unavailable level is skipped whole and picked up later.
#[test]
fn test_unavailable_level_is_skipped() {
  let mut backend = GatedCache::new();
  backend.blocked.push(1);
  let mut stack = ClipStack::new(&config(), backend).unwrap();
  stack.set_budget(UploadBudget::UNLIMITED);

  let stats = stack.recenter(Vec2::splat(0.5));
  assert_eq!(stats.levels_skipped, 1);
  assert_eq!(stats.levels_updated, 3);
  assert!(!stack.level(1).populated);

  stack.backend_mut().blocked.clear();
  let stats = stack.recenter(Vec2::splat(0.5));
  assert_eq!(stats.levels_updated, 4);
  // Only level 1 had anything to upload; its window straddles the seam.
  assert_eq!(stats.rects, 4);
  assert_eq!(stats.texels, u64::from(CLIP * CLIP));
  assert!(stack.level(1).populated);
}

/// The budget stops the pass after the level that exceeded it.
#[test]
fn test_budget_defers_coarser_levels() {
  let mut stack = stack();
  stack.set_budget(UploadBudget {
    max_texels: u64::from(CLIP * CLIP),
  });

  let stats = stack.recenter(Vec2::splat(0.5));
  assert!(stats.budget_exhausted);
  assert_eq!(stats.levels_updated, 2);
  assert!(!stack.level(2).populated);

  let stats = stack.recenter(Vec2::splat(0.5));
  assert!(!stats.budget_exhausted);
  assert!(stack.level(3).populated);
  assert_windows_match(&stack);
}

// =========================================================================
// Batch 3: Fill and device loss
// =========================================================================

/// Fill then recenter on the same centre uploads nothing.
#[test]
fn test_fill_then_recenter_is_noop() {
  let mut stack = stack();
  assert!(stack.fill_with_texture_data());
  assert_windows_match(&stack);

  let stats = stack.recenter(Vec2::splat(0.5));
  assert!(stats.is_noop());
  assert_eq!(stats.levels_updated, 4);
}

#[test]
fn test_fill_fails_when_any_level_missing() {
  let mut backend = GatedCache::new();
  backend.blocked.push(3);
  let mut stack = ClipStack::new(&config(), backend).unwrap();
  assert!(!stack.fill_with_texture_data());
  assert!(stack.levels().iter().all(|l| !l.populated));
}

#[test]
fn test_zombify_and_resurrect() {
  let mut stack = stack();
  stack.recenter(Vec2::new(0.4, 0.6));
  stack.zombify();
  assert!(stack.levels().iter().all(|l| l.surface.is_none()));

  let stats = stack.recenter(Vec2::new(0.4, 0.6));
  assert_eq!(stats.levels_updated, 0);

  assert!(stack.resurrect());
  assert_windows_match(&stack);
}

/// A refill that could not complete leaves blank levels uncommitted, and
/// the next recenter uploads their whole window.
#[test]
fn test_partial_resurrect_reuploads_windows() {
  let mut stack = ClipStack::new(&config(), GatedCache::new()).unwrap();
  stack.set_budget(UploadBudget::UNLIMITED);
  stack.recenter(Vec2::splat(0.5));
  stack.zombify();
  assert!(stack.levels().iter().all(|l| !l.populated));

  stack.backend_mut().blocked.push(0);
  assert!(!stack.resurrect());
  assert!(stack.levels().iter().all(|l| !l.populated));

  stack.backend_mut().blocked.clear();
  let stats = stack.recenter(Vec2::splat(0.5));
  assert_eq!(stats.levels_updated, 4);
  assert!(stats.texels >= 4 * u64::from(CLIP * CLIP));
  for (i, level) in stack.levels().iter().enumerate() {
    assert!(level.populated, "level {i} not populated");
    let surface = level.surface.as_ref().unwrap();
    for p in level.window(CLIP).points() {
      assert_eq!(
        surface.texel(p.x, p.y),
        stack.backend().inner.texel_at(i as u32, p.x, p.y),
        "level {i} texel {p}"
      );
    }
  }
}

#[test]
fn test_debug_surfaces() {
  let mut stack = stack();
  stack.init_debug_surfaces();
  assert!(stack.levels().iter().all(|l| l.debug_surface.is_some()));
}

// =========================================================================
// Batch 4: Level selection
// =========================================================================

const PROJECTION: PerspectiveProjection = PerspectiveProjection {
  fov_y: 1.0,
  viewport_height: 100.0,
};

/// A footprint inside the finest window uses the two finest levels.
#[test]
fn test_small_footprint_uses_finest_levels() {
  let mut stack = stack();
  stack.recenter(Vec2::splat(0.5));
  let span = stack.calculate_clip_map_levels(1.0, 2.0, TexRect::new(0.5, 0.5, 0.05, 0.05), &PROJECTION);
  assert_eq!(span, ClipLevelSpan { start: 0, end: 1 });
}

/// A wide footprint is capped by the finest containing level.
#[test]
fn test_wide_footprint_spans_overlapping_levels() {
  let mut stack = stack();
  stack.recenter(Vec2::splat(0.5));
  let bounds = TexRect::new(0.3, 0.3, 0.4, 0.4);

  let near = stack.calculate_clip_map_levels(10.0, 20.0, bounds, &PROJECTION);
  assert_eq!(near, ClipLevelSpan { start: 0, end: 2 });
  assert_eq!(near.count(), 3);

  // Far away the partially covered fine levels are not worth it.
  let far = stack.calculate_clip_map_levels(200.0, 201.0, bounds, &PROJECTION);
  assert_eq!(far, ClipLevelSpan { start: 1, end: 2 });
}

#[test]
fn test_level_constants() {
  let mut stack = stack();
  stack.recenter(Vec2::splat(0.5));
  let constants = stack.level_constants(ClipLevelSpan { start: 0, end: 1 });
  assert_eq!(constants.len(), 2);
  assert_eq!(constants[0].center, Vec2::splat(4.0));
  assert_eq!(constants[0].inv_scale, 0.125);
  assert_eq!(constants[1].level, 1);
}
