//! CompositeCache - clip stack texels blended from several sources.
//!
//! An opacity TOC (four layer weights per texel) and a shadow TOC (RGB
//! light) are aggregated into one virtual tree. Each output texel blends up
//! to four wrap-addressed reference textures by the opacity weights and
//! lights the result with the shadow sample.
//!
//! Blending runs through named [`BlendProgram`]s from a [`ProgramLibrary`].
//! Depending on [`ShadingCapability`] it is one pass over all four layers,
//! or two passes of two layers each whose results are added. A program
//! missing from the library is reported once at initialise and its pass
//! paints a flat debug colour instead.

use std::collections::HashMap;
use std::sync::Arc;

use glam::{IVec2, Vec2, Vec4};
use smallvec::SmallVec;

use super::CacheBackend;
use crate::aggregator::TocAggregator;
use crate::clipmap::Surface;
use crate::error::{Result, StreamError};
use crate::rect::TexelRect;
use crate::resource::{PayloadKind, RawKind, TexelSource};
use crate::toc::TextureToc;

pub const ONE_PASS_PROGRAM: &str = "blend_one_pass";
pub const TWO_PASS_PROGRAMS: [&str; 2] = ["blend_two_pass_a", "blend_two_pass_b"];

/// Colour written by a pass whose program is missing.
pub const FALLBACK_COLOR: [u8; 4] = [0xFF, 0x00, 0xFF, 0xFF];

const OPACITY: usize = 0;
const SHADOW: usize = 1;
pub const MAX_LAYERS: usize = 4;

/// Everything one texel's blend can see.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct BlendInput {
  pub opacity: [u8; 4],
  pub shadow: [u8; 4],
  pub layers: [[u8; 4]; MAX_LAYERS],
}

/// A blend shader, evaluated per texel. Output channels are in `0..=1`.
pub trait BlendProgram: Send + Sync {
  fn shade(&self, input: &BlendInput) -> Vec4;
}

/// Weighted sum of a range of layers, lit by the shadow sample.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LayerBlend {
  pub first: usize,
  pub count: usize,
  pub alpha: f32,
}

impl BlendProgram for LayerBlend {
  fn shade(&self, input: &BlendInput) -> Vec4 {
    let unorm = |c: [u8; 4]| Vec4::from_array(c.map(f32::from)) / 255.0;
    let weights = unorm(input.opacity);
    let mut rgb = Vec4::ZERO;
    for k in self.first..(self.first + self.count).min(MAX_LAYERS) {
      rgb += unorm(input.layers[k]) * weights[k];
    }
    let light = unorm(input.shadow);
    (rgb * light).truncate().extend(self.alpha)
  }
}

/// Named blend programs.
#[derive(Clone, Default)]
pub struct ProgramLibrary {
  programs: HashMap<String, Arc<dyn BlendProgram>>,
}

impl ProgramLibrary {
  pub fn new() -> Self {
    Self::default()
  }

  /// Library holding the one-pass and both two-pass programs.
  pub fn with_defaults() -> Self {
    let mut library = Self::new();
    library.register(
      ONE_PASS_PROGRAM,
      Arc::new(LayerBlend {
        first: 0,
        count: 4,
        alpha: 1.0,
      }),
    );
    library.register(
      TWO_PASS_PROGRAMS[0],
      Arc::new(LayerBlend {
        first: 0,
        count: 2,
        alpha: 1.0,
      }),
    );
    library.register(
      TWO_PASS_PROGRAMS[1],
      Arc::new(LayerBlend {
        first: 2,
        count: 2,
        alpha: 0.0,
      }),
    );
    library
  }

  pub fn register(&mut self, name: &str, program: Arc<dyn BlendProgram>) {
    self.programs.insert(name.to_string(), program);
  }

  pub fn remove(&mut self, name: &str) -> Option<Arc<dyn BlendProgram>> {
    self.programs.remove(name)
  }

  pub fn get(&self, name: &str) -> Option<Arc<dyn BlendProgram>> {
    self.programs.get(name).cloned()
  }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ShadingCapability {
  #[default]
  OnePass,
  /// Two additive passes of two layers each.
  TwoPass,
}

impl ShadingCapability {
  pub fn program_names(self) -> &'static [&'static str] {
    match self {
      ShadingCapability::OnePass => std::slice::from_ref(&ONE_PASS_PROGRAM),
      ShadingCapability::TwoPass => &TWO_PASS_PROGRAMS,
    }
  }
}

/// Full-size detail texture, sampled with wrapping.
#[derive(Clone, Debug, PartialEq)]
pub struct ReferenceTexture {
  size: u32,
  data: Vec<[u8; 4]>,
  /// Times the texture repeats across the terrain.
  pub repeat: f32,
}

impl ReferenceTexture {
  pub fn from_fn(size: u32, repeat: f32, f: impl Fn(u32, u32) -> [u8; 4]) -> Self {
    let data = (0..size).flat_map(|y| (0..size).map(move |x| (x, y))).map(|(x, y)| f(x, y)).collect();
    Self { size, data, repeat }
  }

  pub fn solid(rgba: [u8; 4]) -> Self {
    Self::from_fn(1, 1.0, |_, _| rgba)
  }

  pub fn size(&self) -> u32 {
    self.size
  }

  fn texel(&self, x: i32, y: i32) -> Vec4 {
    let s = self.size as i32;
    let c = self.data[(y.rem_euclid(s) * s + x.rem_euclid(s)) as usize];
    Vec4::from_array(c.map(f32::from))
  }

  /// Bilinear, wrap-addressed sample at terrain coordinates `uv` in `0..1`.
  pub fn sample(&self, uv: Vec2) -> [u8; 4] {
    let p = uv * self.repeat * self.size as f32 - Vec2::splat(0.5);
    let base = p.floor();
    let f = p - base;
    let (x, y) = (base.x as i32, base.y as i32);
    let top = self.texel(x, y).lerp(self.texel(x + 1, y), f.x);
    let bottom = self.texel(x, y + 1).lerp(self.texel(x + 1, y + 1), f.x);
    top.lerp(bottom, f.y).round().to_array().map(|c| c as u8)
  }
}

pub struct CompositeCache<K: PayloadKind = RawKind> {
  aggregator: TocAggregator<K>,
  references: Vec<ReferenceTexture>,
  library: ProgramLibrary,
  capability: ShadingCapability,
  passes: SmallVec<[Option<Arc<dyn BlendProgram>>; 2]>,
  texture_size: u32,
  clip_map_size: u32,
  clip_depth: u32,
  cache_radius: i32,
}

impl<K: PayloadKind> CompositeCache<K>
where
  K::Texture: TexelSource,
{
  /// Blend `opacity` and `shadow` over a `texture_size` logical texture.
  pub fn new(
    opacity: TextureToc<K>,
    shadow: TextureToc<K>,
    texture_size: u32,
    library: ProgramLibrary,
    capability: ShadingCapability,
  ) -> Result<Self> {
    let aggregator = TocAggregator::new(vec![opacity, shadow], texture_size)?;
    Ok(Self {
      aggregator,
      references: Vec::new(),
      library,
      capability,
      passes: SmallVec::new(),
      texture_size,
      clip_map_size: 0,
      clip_depth: 0,
      cache_radius: 0,
    })
  }

  /// Add a detail texture; layer `k` of the blend is the `k`th one added.
  pub fn add_reference(&mut self, texture: ReferenceTexture) -> Result<()> {
    if self.references.len() == MAX_LAYERS {
      return Err(StreamError::Config(format!(
        "at most {MAX_LAYERS} reference textures can be blended"
      )));
    }
    self.references.push(texture);
    Ok(())
  }

  pub fn aggregator(&self) -> &TocAggregator<K> {
    &self.aggregator
  }

  pub fn capability(&self) -> ShadingCapability {
    self.capability
  }

  /// Block until every wanted tile of both TOCs is resident.
  pub fn flush(&mut self) {
    self.aggregator.flush();
  }

  /// Virtual level with the same texel size as clip `level`.
  fn virtual_level(&self, level: u32) -> u32 {
    let span = self.clip_map_size << (self.clip_depth - 1 - level);
    (span / self.aggregator.min_tile()).trailing_zeros()
  }

  fn blend(&self, input: &BlendInput) -> [u8; 4] {
    let mut sum = Vec4::ZERO;
    for pass in &self.passes {
      sum += match pass {
        Some(program) => program.shade(input),
        None => Vec4::from_array(FALLBACK_COLOR.map(f32::from)) / 255.0,
      };
    }
    (sum.clamp(Vec4::ZERO, Vec4::ONE) * 255.0).round().to_array().map(|c| c as u8)
  }
}

impl<K: PayloadKind> CacheBackend for CompositeCache<K>
where
  K::Texture: TexelSource,
{
  fn initialize(&mut self, clip_map_size: u32, clip_stack_depth: u32) -> Result<()> {
    let min_tile = self.aggregator.min_tile();
    if min_tile > clip_map_size {
      return Err(StreamError::Config(format!(
        "texture tiles ({min_tile}px) are larger than the clip map ({clip_map_size}px)"
      )));
    }
    self.clip_map_size = clip_map_size;
    self.clip_depth = clip_stack_depth;
    let tiles = (clip_map_size as f32 / min_tile as f32).ceil();
    self.cache_radius = (((tiles + 2.0) / 2.0).ceil() * min_tile as f32) as i32;

    self.passes = self
      .capability
      .program_names()
      .iter()
      .map(|name| {
        let program = self.library.get(name);
        if program.is_none() {
          log::warn!("[cache] blend program '{name}' not found, its pass will paint a flat debug colour");
        }
        program
      })
      .collect();
    Ok(())
  }

  fn texture_size(&self) -> Option<u32> {
    Some(self.texture_size)
  }

  fn set_interest_center(&mut self, texel: IVec2) {
    let half = (self.clip_map_size / 2) as i32;
    let radius = self.cache_radius + 1;
    let levels = self.clip_depth as f32;

    let regions: Vec<_> = (0..self.clip_depth)
      .map(|c| {
        let span = (self.clip_map_size << (self.clip_depth - 1 - c)) as i32;
        let center = IVec2::new(texel.x >> c, texel.y >> c)
          .clamp(IVec2::splat(half), IVec2::splat((span - half).max(half)));
        let rect = TexelRect::square(center - IVec2::splat(radius), 2 * radius);
        let rank = (self.clip_depth - 1 - c) as f32;
        (self.virtual_level(c), rect, (levels - rank + 1.0) / (levels + 1.0))
      })
      .collect();
    self.aggregator.set_interest(&regions);
  }

  fn is_data_available(&self, level: u32, region: TexelRect) -> bool {
    self.aggregator.is_region_resident(self.virtual_level(level), region)
  }

  fn do_rect_update(&mut self, level: u32, surface: &mut Surface, src: TexelRect, dst: TexelRect) {
    let v = self.virtual_level(level);
    let span = (self.clip_map_size << (self.clip_depth - 1 - level)) as f32;

    for row in 0..src.extent.y {
      let out = surface.span_mut(dst.point.x, dst.point.y + row, src.extent.x as usize);
      for (col, px) in out.chunks_exact_mut(4).enumerate() {
        let p = IVec2::new(src.point.x + col as i32, src.point.y + row);
        let uv = (p.as_vec2() + Vec2::splat(0.5)) / span;
        let mut input = BlendInput {
          opacity: self.aggregator.sample(OPACITY, v, p),
          shadow: self.aggregator.sample(SHADOW, v, p),
          ..Default::default()
        };
        for (k, reference) in self.references.iter().enumerate() {
          input.layers[k] = reference.sample(uv);
        }
        px.copy_from_slice(&self.blend(&input));
      }
    }
  }

  fn service(&mut self) {
    self.aggregator.pump();
  }
}

#[cfg(test)]
#[path = "composite_test.rs"]
mod composite_test;
