//! Upload budget for clip stack recentering.

use crate::config::ClipMapConfig;

/// Texel upload limit for a single recenter.
///
/// Levels are processed until the texels uploaded in this pass exceed
/// `max_texels`; the remaining levels wait for the next recenter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UploadBudget {
  pub max_texels: u64,
}

impl UploadBudget {
  /// One full 512² level per recenter.
  pub const DEFAULT: Self = Self { max_texels: 512 * 512 };

  pub const UNLIMITED: Self = Self { max_texels: u64::MAX };

  pub fn from_config(config: &ClipMapConfig) -> Self {
    Self {
      max_texels: config.texel_budget(),
    }
  }

  /// Check if coarser levels may still be processed after `performed`
  /// texels.
  #[inline]
  pub fn can_continue(&self, performed: u64) -> bool {
    performed <= self.max_texels
  }
}

impl Default for UploadBudget {
  fn default() -> Self {
    Self::DEFAULT
  }
}

/// What one recenter did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RecenterStats {
  /// Levels whose window was committed (moved or not).
  pub levels_updated: u32,
  /// Levels left stale because their data was not available.
  pub levels_skipped: u32,
  /// Rect updates issued to the backend.
  pub rects: u32,
  pub texels: u64,
  /// The budget ran out before the coarsest level.
  pub budget_exhausted: bool,
}

impl RecenterStats {
  /// True when nothing was uploaded.
  #[inline]
  pub fn is_noop(&self) -> bool {
    self.rects == 0
  }
}
