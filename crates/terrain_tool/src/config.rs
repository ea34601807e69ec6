//! Configuration parsing for terrain generation.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::Path;

/// Parameters of a generated terrain directory.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct GenerateConfig {
	/// Levels in the chunk quadtree.
	pub tree_depth: u32,
	/// World size of a leaf chunk.
	pub base_chunk_size: f32,
	/// Scale applied to stored 16-bit heights.
	pub vertical_scale: f32,
	/// Height samples per chunk edge.
	pub samples_per_chunk: u32,
	/// Levels in the texture quadtree (0 = no texture file).
	pub texture_depth: u32,
	/// Texture tile edge in pixels.
	pub tile_size: u32,
	/// 3 (RGB) or 4 (RGBA).
	pub bytes_per_pixel: u8,
	/// Hill amplitude in world units.
	pub amplitude: f32,
	/// Hill wavelength in world units.
	pub wavelength: f32,
}

impl Default for GenerateConfig {
	fn default() -> Self {
		Self {
			tree_depth: 6,
			base_chunk_size: 16.0,
			vertical_scale: 0.01,
			samples_per_chunk: 8,
			texture_depth: 5,
			tile_size: 64,
			bytes_per_pixel: 3,
			amplitude: 40.0,
			wavelength: 200.0,
		}
	}
}

impl GenerateConfig {
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config: {}", path.display()))?;
		let config: Self = toml::from_str(&content)
			.with_context(|| format!("Failed to parse config: {}", path.display()))?;
		config.validate()?;
		Ok(config)
	}

	/// Reject values the directory builder would refuse.
	pub fn validate(&self) -> Result<()> {
		if !(1..=16).contains(&self.tree_depth) {
			bail!("tree_depth must be 1..=16, got {}", self.tree_depth);
		}
		if self.texture_depth > self.tree_depth {
			bail!(
				"texture_depth {} exceeds tree_depth {}",
				self.texture_depth,
				self.tree_depth
			);
		}
		if self.texture_depth > 0 && !self.tile_size.is_power_of_two() {
			bail!("tile_size must be a power of 2, got {}", self.tile_size);
		}
		if self.bytes_per_pixel != 3 && self.bytes_per_pixel != 4 {
			bail!("bytes_per_pixel must be 3 or 4, got {}", self.bytes_per_pixel);
		}
		if self.base_chunk_size <= 0.0 || self.wavelength <= 0.0 {
			bail!("base_chunk_size and wavelength must be positive");
		}
		Ok(())
	}

	/// World size of the whole terrain.
	pub fn world_size(&self) -> f32 {
		(1u32 << (self.tree_depth - 1)) as f32 * self.base_chunk_size
	}
}
