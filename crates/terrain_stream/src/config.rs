//! StreamConfig - tunables for LOD selection, loading and the clip stack.
//!
//! Every field has a serde default so a partial TOML file (or none at all)
//! yields a working configuration.
//!
//! ```toml
//! [lod]
//! distance_lod_max = 100.0
//!
//! [clipmap]
//! clip_map_size = 512
//! texture_size = 8192
//! ```

use std::path::Path;

use serde::Deserialize;

use crate::error::{Result, StreamError};

/// Root streaming configuration.
#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
  pub lod: LodConfig,
  pub loader: LoaderConfig,
  pub clipmap: ClipMapConfig,
}

/// Distance heuristics and morph rates for the instance tree.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LodConfig {
  /// Distance at which the finest geometry LOD starts to fall off.
  #[serde(default = "default_distance_lod_max")]
  pub distance_lod_max: f32,
  /// Distance at which the finest texture level starts to fall off.
  #[serde(default = "default_texture_distance_lod_max")]
  pub texture_distance_lod_max: f32,
  /// Maximum per-frame decrease of a node's morph factor.
  #[serde(default = "default_morph_rate")]
  pub morph_rate: f32,
  /// Morph decrease applied when a split is blocked only by morphing.
  #[serde(default = "default_morph_nudge")]
  pub morph_nudge: f32,
  /// A node may split only once its morph factor is at or below this.
  #[serde(default = "default_morph_split_threshold")]
  pub morph_split_threshold: f32,
  /// Heat removed from every node each frame.
  #[serde(default = "default_heat_decay")]
  pub heat_decay: f32,
  /// Upper clamp for heat.
  #[serde(default = "default_max_heat")]
  pub max_heat: f32,
}

/// Background loader limits.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LoaderConfig {
  /// Loads allowed in flight at once.
  #[serde(default = "default_max_in_flight")]
  pub max_in_flight: usize,
  /// Candidates considered when choosing the next loads.
  #[serde(default = "default_max_queue_scan")]
  pub max_queue_scan: usize,
}

/// Clip stack geometry and upload budget.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ClipMapConfig {
  /// Physical size of every level (square, power of two).
  #[serde(default = "default_clip_map_size")]
  pub clip_map_size: u32,
  /// Logical texture size (square, power of two).
  #[serde(default = "default_texture_size")]
  pub texture_size: u32,
  /// Texels uploaded per recenter before deferring. 0 = clip_map_size².
  #[serde(default)]
  pub max_texel_upload_per_recenter: u64,
  /// Beyond this near distance a partially covered level must pass the
  /// projected texel size check to be selected.
  #[serde(default = "default_near_density_distance")]
  pub near_density_distance: f32,
  /// Minimum projected texel size in pixels for a partial level.
  #[serde(default = "default_min_projected_texel")]
  pub min_projected_texel: f32,
}

fn default_distance_lod_max() -> f32 {
  100.0
}

fn default_texture_distance_lod_max() -> f32 {
  90.0
}

fn default_morph_rate() -> f32 {
  0.05
}

fn default_morph_nudge() -> f32 {
  0.2
}

fn default_morph_split_threshold() -> f32 {
  0.1
}

fn default_heat_decay() -> f32 {
  0.01
}

fn default_max_heat() -> f32 {
  10.0
}

fn default_max_in_flight() -> usize {
  3
}

fn default_max_queue_scan() -> usize {
  64
}

fn default_clip_map_size() -> u32 {
  512
}

fn default_texture_size() -> u32 {
  8192
}

fn default_near_density_distance() -> f32 {
  100.0
}

fn default_min_projected_texel() -> f32 {
  0.9
}

impl Default for LodConfig {
  fn default() -> Self {
    Self {
      distance_lod_max: default_distance_lod_max(),
      texture_distance_lod_max: default_texture_distance_lod_max(),
      morph_rate: default_morph_rate(),
      morph_nudge: default_morph_nudge(),
      morph_split_threshold: default_morph_split_threshold(),
      heat_decay: default_heat_decay(),
      max_heat: default_max_heat(),
    }
  }
}

impl Default for LoaderConfig {
  fn default() -> Self {
    Self {
      max_in_flight: default_max_in_flight(),
      max_queue_scan: default_max_queue_scan(),
    }
  }
}

impl Default for ClipMapConfig {
  fn default() -> Self {
    Self {
      clip_map_size: default_clip_map_size(),
      texture_size: default_texture_size(),
      max_texel_upload_per_recenter: 0,
      near_density_distance: default_near_density_distance(),
      min_projected_texel: default_min_projected_texel(),
    }
  }
}

impl ClipMapConfig {
  /// Number of levels in the clip stack, cap level included.
  ///
  /// `log2(texture_size) - log2(clip_map_size) + 1`
  #[inline]
  pub fn clip_stack_depth(&self) -> u32 {
    self.texture_size.trailing_zeros() - self.clip_map_size.trailing_zeros() + 1
  }

  /// Effective texel budget per recenter.
  #[inline]
  pub fn texel_budget(&self) -> u64 {
    if self.max_texel_upload_per_recenter == 0 {
      u64::from(self.clip_map_size) * u64::from(self.clip_map_size)
    } else {
      self.max_texel_upload_per_recenter
    }
  }

  fn validate(&self) -> Result<()> {
    if self.clip_map_size == 0 || !self.clip_map_size.is_power_of_two() {
      return Err(StreamError::Config(format!(
        "clip_map_size must be a power of 2, got {}",
        self.clip_map_size
      )));
    }
    if self.texture_size == 0 || !self.texture_size.is_power_of_two() {
      return Err(StreamError::Config(format!(
        "texture_size must be a power of 2, got {}",
        self.texture_size
      )));
    }
    if self.texture_size < self.clip_map_size {
      return Err(StreamError::Config(format!(
        "texture_size {} is smaller than clip_map_size {}",
        self.texture_size, self.clip_map_size
      )));
    }
    Ok(())
  }
}

impl StreamConfig {
  /// Parse and validate a TOML document.
  pub fn from_toml_str(content: &str) -> Result<Self> {
    let config: StreamConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  /// Load configuration from a TOML file.
  pub fn load(path: &Path) -> Result<Self> {
    let content = std::fs::read_to_string(path)?;
    Self::from_toml_str(&content)
  }

  /// Check value ranges that serde cannot express.
  pub fn validate(&self) -> Result<()> {
    if self.lod.distance_lod_max <= 0.0 || self.lod.texture_distance_lod_max <= 0.0 {
      return Err(StreamError::Config(
        "LOD distances must be positive".to_string(),
      ));
    }
    if !(0.0..=1.0).contains(&self.lod.morph_rate) {
      return Err(StreamError::Config(format!(
        "morph_rate must be within 0..=1, got {}",
        self.lod.morph_rate
      )));
    }
    if self.loader.max_in_flight == 0 {
      return Err(StreamError::Config(
        "max_in_flight must be at least 1".to_string(),
      ));
    }
    self.clipmap.validate()
  }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod config_test;
