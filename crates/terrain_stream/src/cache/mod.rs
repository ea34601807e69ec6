//! Cache backends: where clip stack texels come from.
//!
//! The clip stack owns the window arithmetic; a [`CacheBackend`] only
//! answers "is this region ready" and paints regions on request. The stack
//! always checks [`CacheBackend::is_data_available`] for a level's whole
//! new window before issuing any update for it.
//!
//! # Module Structure
//!
//! - [`direct`]: copies tiles out of one texture TOC
//! - [`composite`]: blends an opacity and a shadow TOC with reference textures
//! - [`synthetic`]: procedural checker, always available

pub mod composite;
pub mod direct;
pub mod synthetic;

use glam::IVec2;

use crate::clipmap::Surface;
use crate::error::Result;
use crate::rect::TexelRect;

pub use composite::{
  BlendInput, BlendProgram, CompositeCache, LayerBlend, ProgramLibrary, ReferenceTexture, ShadingCapability,
  ONE_PASS_PROGRAM, TWO_PASS_PROGRAMS,
};
pub use direct::DirectLookupCache;
pub use synthetic::SyntheticCache;

/// Source of texels for a clip stack.
///
/// Levels are clip stack levels: 0 is the finest, `depth − 1` the cap.
/// Level `i` spans `clip_map_size · 2^(depth − 1 − i)` texels.
pub trait CacheBackend {
  /// Called once by the clip stack before any other method.
  fn initialize(&mut self, clip_map_size: u32, clip_stack_depth: u32) -> Result<()>;

  /// Logical texture size imposed by the backend's data, if any. The clip
  /// stack adopts it over its configured size.
  fn texture_size(&self) -> Option<u32> {
    None
  }

  /// Finest-level texel the viewer is centred on. Drives background
  /// prioritisation only.
  fn set_interest_center(&mut self, texel: IVec2);

  fn is_data_available(&self, level: u32, region: TexelRect) -> bool;

  fn begin_rect_updates(&mut self, _level: u32, _surface: &mut Surface) {}

  /// Paint level texels `src` into the wrapped `dst` of `surface`. Both
  /// rects have the same extent and `dst` does not cross the surface edge.
  fn do_rect_update(&mut self, level: u32, surface: &mut Surface, src: TexelRect, dst: TexelRect);

  fn finish_rect_updates(&mut self, _level: u32, _surface: &mut Surface) {}

  /// Per-frame poll, called at the start of every recenter.
  fn service(&mut self) {}
}
