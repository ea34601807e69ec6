//! Generates complete, well-formed terrain directories.
//!
//! Used by the CLI and by tests. Heights come from a caller supplied
//! function over world X/Y; texture tiles from a colour function over
//! normalised texture coordinates.

use std::collections::HashMap;

use super::payload::{write_payload_record, ImageChunk};
use super::tqt::TqtWriter;
use super::{ChunkFileHeader, StubRecord, NO_NEIGHBOR};

/// Output of [`DirectoryBuilder::build`].
#[derive(Clone, Debug)]
pub struct GeneratedTerrain {
  pub header: ChunkFileHeader,
  /// Complete chunk directory file.
  pub chunk_file: Vec<u8>,
  /// Complete texture quadtree file, when texture depth is non-zero.
  pub texture_file: Option<Vec<u8>>,
}

/// Builder for synthetic terrain directories.
#[derive(Clone, Debug)]
pub struct DirectoryBuilder {
  tree_depth: u32,
  base_chunk_size: f32,
  vertical_scale: f32,
  base_max_error: f32,
  /// Height samples per chunk edge.
  samples: u32,
  texture_depth: u32,
  tile_size: u32,
  bytes_per_pixel: u8,
}

#[derive(Clone, Copy)]
struct PendingStub {
  level: u32,
  x: i32,
  y: i32,
  min_height: i16,
  max_height: i16,
}

impl DirectoryBuilder {
  pub fn new(tree_depth: u32) -> Self {
    assert!((1..=16).contains(&tree_depth), "tree depth must be 1..=16");
    Self {
      tree_depth,
      base_chunk_size: 1.0,
      vertical_scale: 1.0,
      base_max_error: 1.0,
      samples: 4,
      texture_depth: 0,
      tile_size: 0,
      bytes_per_pixel: 4,
    }
  }

  pub fn base_chunk_size(mut self, size: f32) -> Self {
    self.base_chunk_size = size;
    self
  }

  pub fn vertical_scale(mut self, scale: f32) -> Self {
    self.vertical_scale = scale;
    self
  }

  pub fn samples_per_chunk(mut self, samples: u32) -> Self {
    self.samples = samples.max(1);
    self
  }

  /// Also emit a texture quadtree with `depth` levels of `tile_size` tiles.
  pub fn texture(mut self, depth: u32, tile_size: u32, bytes_per_pixel: u8) -> Self {
    assert!(depth <= self.tree_depth, "texture depth cannot exceed tree depth");
    assert!(tile_size.is_power_of_two(), "tile size must be a power of 2");
    assert!(bytes_per_pixel == 3 || bytes_per_pixel == 4, "3 or 4 bytes per pixel");
    self.texture_depth = depth;
    self.tile_size = tile_size;
    self.bytes_per_pixel = bytes_per_pixel;
    self
  }

  /// World size of a chunk at `level`.
  #[inline]
  fn chunk_size(&self, level: u32) -> f32 {
    (1u32 << (self.tree_depth - 1 - level)) as f32 * self.base_chunk_size
  }

  pub fn build(
    &self,
    height: impl Fn(f32, f32) -> f32,
    color: impl Fn(u32, f32, f32) -> [u8; 4],
  ) -> GeneratedTerrain {
    // Depth-first pre-order; children NW, NE, SW, SE.
    let mut order = Vec::new();
    let mut stubs = HashMap::new();
    self.visit(0, 0, 0, &height, &mut order, &mut stubs);

    let labels: HashMap<(u32, i32, i32), i32> = order
      .iter()
      .enumerate()
      .map(|(label, key)| (*key, label as i32))
      .collect();

    let header = ChunkFileHeader {
      tree_depth: self.tree_depth,
      base_max_error: self.base_max_error,
      vertical_scale: self.vertical_scale,
      base_chunk_size: self.base_chunk_size,
      entry_count: order.len() as u32,
      collision_depth: 0,
    };

    let payloads: Vec<Vec<u8>> = order
      .iter()
      .map(|&(level, x, y)| self.geometry_payload(level, x, y, &height))
      .collect();

    let mut payload_offset =
      (ChunkFileHeader::BYTES + order.len() * StubRecord::BYTES) as u64;
    let mut chunk_file = Vec::new();
    // Vec<u8> writes cannot fail.
    let _ = header.write(&mut chunk_file);

    for (label, key) in order.iter().enumerate() {
      let pending = stubs[key];
      let (level, x, y) = *key;
      let neighbor = |dx: i32, dy: i32| {
        labels
          .get(&(level, x + dx, y + dy))
          .copied()
          .unwrap_or(NO_NEIGHBOR)
      };
      let stub = StubRecord {
        label: label as i32,
        neighbors: [neighbor(1, 0), neighbor(0, 1), neighbor(-1, 0), neighbor(0, -1)],
        level: pending.level as u8,
        x: pending.x as i16,
        y: pending.y as i16,
        min_height: pending.min_height,
        max_height: pending.max_height,
        payload_offset: payload_offset as u32,
      };
      let _ = stub.write(&mut chunk_file);
      payload_offset += 8 + payloads[label].len() as u64;
    }

    for payload in &payloads {
      let _ = write_payload_record(&mut chunk_file, payload);
    }

    let texture_file = (self.texture_depth > 0).then(|| self.texture_bytes(&color));

    GeneratedTerrain {
      header,
      chunk_file,
      texture_file,
    }
  }

  /// Returns the (min, max) stored heights of the subtree.
  fn visit(
    &self,
    level: u32,
    x: i32,
    y: i32,
    height: &impl Fn(f32, f32) -> f32,
    order: &mut Vec<(u32, i32, i32)>,
    stubs: &mut HashMap<(u32, i32, i32), PendingStub>,
  ) -> (i16, i16) {
    order.push((level, x, y));

    let (min_height, max_height) = if level + 1 < self.tree_depth {
      let children = [
        (2 * x, 2 * y + 1),
        (2 * x + 1, 2 * y + 1),
        (2 * x, 2 * y),
        (2 * x + 1, 2 * y),
      ];
      children
        .iter()
        .map(|&(cx, cy)| self.visit(level + 1, cx, cy, height, order, stubs))
        .fold((i16::MAX, i16::MIN), |(lo, hi), (a, b)| (lo.min(a), hi.max(b)))
    } else {
      self.sample_range(level, x, y, height)
    };

    stubs.insert(
      (level, x, y),
      PendingStub {
        level,
        x,
        y,
        min_height,
        max_height,
      },
    );
    (min_height, max_height)
  }

  fn sample_range(&self, level: u32, x: i32, y: i32, height: &impl Fn(f32, f32) -> f32) -> (i16, i16) {
    let mut lo = i16::MAX;
    let mut hi = i16::MIN;
    for (_, _, h) in self.samples_of(level, x, y, height) {
      let stored = h / self.vertical_scale;
      lo = lo.min(stored.floor().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
      hi = hi.max(stored.ceil().clamp(i16::MIN as f32, i16::MAX as f32) as i16);
    }
    (lo, hi)
  }

  fn samples_of<'a>(
    &'a self,
    level: u32,
    x: i32,
    y: i32,
    height: &'a impl Fn(f32, f32) -> f32,
  ) -> impl Iterator<Item = (u32, u32, f32)> + 'a {
    let size = self.chunk_size(level);
    let step = size / self.samples as f32;
    let origin = (x as f32 * size, y as f32 * size);
    let n = self.samples + 1;
    (0..n).flat_map(move |j| {
      (0..n).map(move |i| {
        let wx = origin.0 + i as f32 * step;
        let wy = origin.1 + j as f32 * step;
        (i, j, height(wx, wy))
      })
    })
  }

  /// Grid of stored heights; stands in for an encoded mesh.
  fn geometry_payload(&self, level: u32, x: i32, y: i32, height: &impl Fn(f32, f32) -> f32) -> Vec<u8> {
    let mut bytes = Vec::new();
    bytes.extend_from_slice(&(self.samples + 1).to_le_bytes());
    for (_, _, h) in self.samples_of(level, x, y, height) {
      let stored = (h / self.vertical_scale).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16;
      bytes.extend_from_slice(&stored.to_le_bytes());
    }
    bytes
  }

  fn texture_bytes(&self, color: &impl Fn(u32, f32, f32) -> [u8; 4]) -> Vec<u8> {
    let mut writer = TqtWriter::new(self.texture_depth, self.tile_size);
    for level in 0..self.texture_depth {
      let side = 1u32 << level;
      let level_texels = (side * self.tile_size) as f32;
      for y in 0..side {
        for x in 0..side {
          let tile = ImageChunk::from_fn(self.tile_size, self.bytes_per_pixel, |tx, ty| {
            let u = ((x * self.tile_size + tx) as f32 + 0.5) / level_texels;
            let v = ((y * self.tile_size + ty) as f32 + 0.5) / level_texels;
            color(level, u, v)
          });
          writer.set_tile(level, x, y, tile.encode());
        }
      }
    }
    let mut out = Vec::new();
    let _ = writer.write(&mut out);
    out
  }
}
