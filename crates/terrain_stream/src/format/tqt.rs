//! Texture quadtree file: a dense tile offset table over a full quadtree.
//!
//! ```text
//! magic "TQT0" | version u32 | tree_depth u32 | tile_size u32
//! offsets[node_count(tree_depth)] u32     (0 = tile absent)
//! tile: length u32 | bytes
//! ```

use std::io::{Read, Seek, SeekFrom, Write};

use super::{read_u32, write_u32};
use crate::error::{Result, StreamError};

pub const TQT_MAGIC: [u8; 4] = *b"TQT0";
pub const TQT_VERSION: u32 = 1;

const MAX_TQT_DEPTH: u32 = 12;
const MAX_TILE_BYTES: u32 = 64 << 20;

/// Number of nodes in a full quadtree of `depth` levels.
#[inline]
pub fn node_count(depth: u32) -> u64 {
  ((1u64 << (2 * depth)) - 1) / 3
}

/// Level-major dense index of (level, x, y).
#[inline]
pub fn node_index(level: u32, x: u32, y: u32) -> u64 {
  node_count(level) + u64::from(y) * (1u64 << level) + u64::from(x)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TqtHeader {
  pub version: u32,
  pub tree_depth: u32,
  /// Side of every tile in texels.
  pub tile_size: u32,
}

impl TqtHeader {
  pub const BYTES: u64 = 16;

  pub fn read(r: &mut impl Read) -> Result<Self> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != TQT_MAGIC {
      return Err(StreamError::BadMagic {
        expected: TQT_MAGIC,
        found: magic,
      });
    }
    let version = read_u32(r)?;
    if version != TQT_VERSION {
      return Err(StreamError::BadVersion {
        format: "texture quadtree",
        expected: TQT_VERSION,
        found: version,
      });
    }
    let tree_depth = read_u32(r)?;
    if !(1..=MAX_TQT_DEPTH).contains(&tree_depth) {
      return Err(StreamError::BadHeader {
        format: "texture quadtree",
        reason: format!("tree depth {tree_depth} outside 1..={MAX_TQT_DEPTH}"),
      });
    }
    let tile_size = read_u32(r)?;
    if tile_size == 0 || !tile_size.is_power_of_two() {
      return Err(StreamError::BadHeader {
        format: "texture quadtree",
        reason: format!("tile size {tile_size} is not a power of 2"),
      });
    }
    Ok(Self {
      version,
      tree_depth,
      tile_size,
    })
  }

  pub fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
    w.write_all(&TQT_MAGIC)?;
    write_u32(w, self.version)?;
    write_u32(w, self.tree_depth)?;
    write_u32(w, self.tile_size)
  }
}

/// Header plus the tile offset table.
#[derive(Clone, Debug)]
pub struct TqtIndex {
  pub header: TqtHeader,
  offsets: Vec<u32>,
}

impl TqtIndex {
  pub fn read(r: &mut impl Read) -> Result<Self> {
    let header = TqtHeader::read(r)?;
    let count = node_count(header.tree_depth) as usize;
    let mut offsets = Vec::with_capacity(count);
    for _ in 0..count {
      offsets.push(read_u32(r)?);
    }
    Ok(Self { header, offsets })
  }

  /// Offset of the tile at (level, x, y), `None` when absent.
  pub fn tile_offset(&self, level: u32, x: i32, y: i32) -> Result<Option<u64>> {
    let depth = self.header.tree_depth;
    let side = 1i32 << level.min(31);
    if level >= depth || x < 0 || y < 0 || x >= side || y >= side {
      return Err(StreamError::TileOutOfRange { level, x, y, depth });
    }
    let offset = self.offsets[node_index(level, x as u32, y as u32) as usize];
    Ok((offset != 0).then_some(u64::from(offset)))
  }

  /// Read the bytes of one tile.
  pub fn read_tile<R: Read + Seek>(&self, r: &mut R, level: u32, x: i32, y: i32) -> Result<Option<Vec<u8>>> {
    let Some(offset) = self.tile_offset(level, x, y)? else {
      return Ok(None);
    };
    r.seek(SeekFrom::Start(offset))?;
    let len = read_u32(r)?;
    if len > MAX_TILE_BYTES {
      return Err(StreamError::InvalidPayload {
        offset,
        reason: format!("tile length {len} exceeds limit"),
      });
    }
    let mut bytes = vec![0u8; len as usize];
    r.read_exact(&mut bytes)?;
    Ok(Some(bytes))
  }
}

/// Accumulates tiles in memory and serialises a complete TQT file.
pub struct TqtWriter {
  header: TqtHeader,
  tiles: Vec<Option<Vec<u8>>>,
}

impl TqtWriter {
  pub fn new(tree_depth: u32, tile_size: u32) -> Self {
    Self {
      header: TqtHeader {
        version: TQT_VERSION,
        tree_depth,
        tile_size,
      },
      tiles: vec![None; node_count(tree_depth) as usize],
    }
  }

  /// Store the encoded tile for (level, x, y), replacing any previous one.
  pub fn set_tile(&mut self, level: u32, x: u32, y: u32, bytes: Vec<u8>) {
    debug_assert!(level < self.header.tree_depth, "tile level out of range");
    self.tiles[node_index(level, x, y) as usize] = Some(bytes);
  }

  pub fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
    self.header.write(w)?;

    let table_bytes = self.tiles.len() as u64 * 4;
    let mut cursor = TqtHeader::BYTES + table_bytes;
    for tile in &self.tiles {
      match tile {
        Some(bytes) => {
          write_u32(w, cursor as u32)?;
          cursor += 4 + bytes.len() as u64;
        }
        None => write_u32(w, 0)?,
      }
    }

    for bytes in self.tiles.iter().flatten() {
      write_u32(w, bytes.len() as u32)?;
      w.write_all(bytes)?;
    }
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn test_node_count_and_index() {
    assert_eq!(node_count(1), 1);
    assert_eq!(node_count(3), 21);
    assert_eq!(node_index(0, 0, 0), 0);
    assert_eq!(node_index(1, 0, 0), 1);
    assert_eq!(node_index(1, 1, 1), 4);
    assert_eq!(node_index(2, 3, 3), 20);
  }

  #[test]
  fn test_written_tiles_are_readable() {
    let mut writer = TqtWriter::new(2, 4);
    writer.set_tile(0, 0, 0, b"root".to_vec());
    writer.set_tile(1, 1, 0, b"east".to_vec());

    let mut buf = Vec::new();
    writer.write(&mut buf).unwrap();

    let mut cursor = Cursor::new(buf);
    let index = TqtIndex::read(&mut cursor).unwrap();
    assert_eq!(index.header.tile_size, 4);
    assert_eq!(index.read_tile(&mut cursor, 1, 1, 0).unwrap().unwrap(), b"east");
    assert_eq!(index.read_tile(&mut cursor, 1, 0, 0).unwrap(), None);
  }

  #[test]
  fn test_out_of_range_tile() {
    let mut buf = Vec::new();
    TqtWriter::new(1, 4).write(&mut buf).unwrap();
    let index = TqtIndex::read(&mut Cursor::new(buf)).unwrap();
    assert!(matches!(
      index.tile_offset(1, 0, 0),
      Err(StreamError::TileOutOfRange { .. })
    ));
  }
}
