//! Chunk directory container: header plus depth-first node stubs.
//!
//! Reading is phase one of the two-phase load. Stubs are validated and
//! collected in file order together with a label→entry map; neighbor labels
//! stay raw and are resolved by the resource tree once every node exists.

use std::io::{Read, Write};

use super::{read_f32, read_i16, read_i32, read_u32, read_u8};
use super::{write_f32, write_i16, write_i32, write_u32};
use crate::error::{Result, StreamError};

/// File magic for chunk directories.
pub const CHUNK_MAGIC: [u8; 4] = *b"CHU3";
/// Supported directory version.
pub const CHUNK_VERSION: i16 = 400;
/// Marker preceding every node stub.
pub const NODE_SENTINEL: u32 = 0xDEAD_BEEF;
/// Stored neighbor label meaning "no neighbor".
pub const NO_NEIGHBOR: i32 = -1;

/// Deepest tree the 16-bit stub coordinates can address.
const MAX_TREE_DEPTH: i16 = 16;

/// Directory header.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkFileHeader {
  /// Number of levels; the root is level 0, leaves are `tree_depth - 1`.
  pub tree_depth: u32,
  /// Geometric error of the root chunk, carried for decoders.
  pub base_max_error: f32,
  /// Scale applied to stored 16-bit heights.
  pub vertical_scale: f32,
  /// Horizontal size of a leaf chunk in world units.
  pub base_chunk_size: f32,
  /// Number of stubs in the directory.
  pub entry_count: u32,
  /// Depth of the collision tree, passed through untouched.
  pub collision_depth: u32,
}

impl ChunkFileHeader {
  /// Encoded size in bytes.
  pub const BYTES: usize = 4 + 2 + 2 + 4 + 4 + 4 + 4 + 4;

  pub fn read(r: &mut impl Read) -> Result<Self> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic)?;
    if magic != CHUNK_MAGIC {
      return Err(StreamError::BadMagic {
        expected: CHUNK_MAGIC,
        found: magic,
      });
    }

    let version = read_i16(r)?;
    if version != CHUNK_VERSION {
      return Err(StreamError::BadVersion {
        format: "chunk directory",
        expected: CHUNK_VERSION as u32,
        found: version as u32,
      });
    }

    let tree_depth = read_i16(r)?;
    if !(1..=MAX_TREE_DEPTH).contains(&tree_depth) {
      return Err(StreamError::BadHeader {
        format: "chunk directory",
        reason: format!("tree depth {tree_depth} outside 1..={MAX_TREE_DEPTH}"),
      });
    }

    Ok(Self {
      tree_depth: tree_depth as u32,
      base_max_error: read_f32(r)?,
      vertical_scale: read_f32(r)?,
      base_chunk_size: read_f32(r)?,
      entry_count: read_u32(r)?,
      collision_depth: read_u32(r)?,
    })
  }

  pub fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
    w.write_all(&CHUNK_MAGIC)?;
    write_i16(w, CHUNK_VERSION)?;
    write_i16(w, self.tree_depth as i16)?;
    write_f32(w, self.base_max_error)?;
    write_f32(w, self.vertical_scale)?;
    write_f32(w, self.base_chunk_size)?;
    write_u32(w, self.entry_count)?;
    write_u32(w, self.collision_depth)
  }
}

/// One node stub as stored on disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StubRecord {
  pub label: i32,
  /// Raw neighbor labels: east, north, west, south.
  pub neighbors: [i32; 4],
  pub level: u8,
  pub x: i16,
  pub y: i16,
  pub min_height: i16,
  pub max_height: i16,
  /// Byte offset of the framed geometry payload.
  pub payload_offset: u32,
}

impl StubRecord {
  /// Encoded size in bytes, sentinel included.
  pub const BYTES: usize = 4 + 4 + 4 * 4 + 1 + 2 + 2 + 2 * 2 + 4;

  /// Read the fields that follow an already consumed sentinel.
  fn read_body(r: &mut impl Read) -> Result<Self> {
    let label = read_i32(r)?;
    let mut neighbors = [NO_NEIGHBOR; 4];
    for n in &mut neighbors {
      *n = read_i32(r)?;
    }
    Ok(Self {
      label,
      neighbors,
      level: read_u8(r)?,
      x: read_i16(r)?,
      y: read_i16(r)?,
      min_height: read_i16(r)?,
      max_height: read_i16(r)?,
      payload_offset: read_u32(r)?,
    })
  }

  pub fn write(&self, w: &mut impl Write) -> std::io::Result<()> {
    write_u32(w, NODE_SENTINEL)?;
    write_i32(w, self.label)?;
    for n in self.neighbors {
      write_i32(w, n)?;
    }
    w.write_all(&[self.level])?;
    write_i16(w, self.x)?;
    write_i16(w, self.y)?;
    write_i16(w, self.min_height)?;
    write_i16(w, self.max_height)?;
    write_u32(w, self.payload_offset)
  }
}

/// A validated stub with its position in the tree.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryEntry {
  pub stub: StubRecord,
  /// Entry index of the parent.
  pub parent: Option<usize>,
  /// Entry indices of the NW, NE, SW, SE children.
  pub children: Option<[usize; 4]>,
}

/// Result of phase one: every stub, in file order.
#[derive(Clone, Debug)]
pub struct ChunkDirectory {
  pub header: ChunkFileHeader,
  pub entries: Vec<DirectoryEntry>,
  /// `label_to_entry[label]` is the entry index holding that label.
  pub label_to_entry: Vec<usize>,
}

impl ChunkDirectory {
  /// Synthesize a complete directory of `tree_depth` levels with no
  /// geometry payloads. Backs texture-only trees, where every node exists
  /// and neighbors are the same-level cells on each side.
  pub fn full_quadtree(tree_depth: u32, base_chunk_size: f32) -> Self {
    let entry_count = super::node_count(tree_depth) as u32;
    let header = ChunkFileHeader {
      tree_depth,
      base_max_error: 0.0,
      vertical_scale: 1.0,
      base_chunk_size,
      entry_count,
      collision_depth: 0,
    };

    let mut entries = Vec::with_capacity(entry_count as usize);
    push_full_node(&mut entries, tree_depth, None, 0, 0, 0);

    let position: std::collections::HashMap<(u8, i16, i16), i32> = entries
      .iter()
      .map(|e: &DirectoryEntry| ((e.stub.level, e.stub.x, e.stub.y), e.stub.label))
      .collect();
    for entry in &mut entries {
      let StubRecord { level, x, y, .. } = entry.stub;
      let at = |dx: i16, dy: i16| {
        position
          .get(&(level, x + dx, y + dy))
          .copied()
          .unwrap_or(NO_NEIGHBOR)
      };
      entry.stub.neighbors = [at(1, 0), at(0, 1), at(-1, 0), at(0, -1)];
    }

    Self {
      header,
      label_to_entry: (0..entries.len()).collect(),
      entries,
    }
  }
}

fn push_full_node(
  entries: &mut Vec<DirectoryEntry>,
  tree_depth: u32,
  parent: Option<usize>,
  level: u32,
  x: i16,
  y: i16,
) -> usize {
  let index = entries.len();
  entries.push(DirectoryEntry {
    stub: StubRecord {
      label: index as i32,
      neighbors: [NO_NEIGHBOR; 4],
      level: level as u8,
      x,
      y,
      min_height: 0,
      max_height: 0,
      payload_offset: 0,
    },
    parent,
    children: None,
  });

  if level + 1 < tree_depth {
    let quads = [(2 * x, 2 * y + 1), (2 * x + 1, 2 * y + 1), (2 * x, 2 * y), (2 * x + 1, 2 * y)];
    let mut children = [0usize; 4];
    for (child, (cx, cy)) in children.iter_mut().zip(quads) {
      *child = push_full_node(entries, tree_depth, Some(index), level + 1, cx, cy);
    }
    entries[index].children = Some(children);
  }
  index
}

/// Read a complete chunk directory.
///
/// Any sentinel mismatch, out-of-range label, duplicate label or count
/// mismatch aborts the read.
#[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "format::read_directory"))]
pub fn read_directory(r: &mut impl Read) -> Result<ChunkDirectory> {
  let header = ChunkFileHeader::read(r)?;
  let capacity = super::node_count(header.tree_depth);
  if u64::from(header.entry_count) > capacity {
    return Err(StreamError::BadHeader {
      format: "chunk directory",
      reason: format!(
        "{} entries cannot fit a depth {} quadtree",
        header.entry_count, header.tree_depth
      ),
    });
  }

  let mut reader = DirectoryReader {
    header: &header,
    entries: Vec::with_capacity(header.entry_count as usize),
    seen: vec![None; header.entry_count as usize],
    last_label: None,
  };
  reader.read_node(r, None, 0)?;

  let DirectoryReader { entries, seen, .. } = reader;
  if entries.len() != header.entry_count as usize {
    return Err(StreamError::EntryCountMismatch {
      declared: header.entry_count,
      found: entries.len() as u32,
    });
  }

  // Unique in-range labels with a matching count form a permutation.
  let label_to_entry = seen.into_iter().flatten().collect();

  log::debug!(
    "read chunk directory: depth {}, {} entries",
    header.tree_depth,
    header.entry_count
  );

  Ok(ChunkDirectory {
    header,
    entries,
    label_to_entry,
  })
}

struct DirectoryReader<'h> {
  header: &'h ChunkFileHeader,
  entries: Vec<DirectoryEntry>,
  seen: Vec<Option<usize>>,
  last_label: Option<i32>,
}

impl DirectoryReader<'_> {
  fn read_node(&mut self, r: &mut impl Read, parent: Option<usize>, depth: u32) -> Result<usize> {
    let sentinel = read_u32(r)?;
    if sentinel != NODE_SENTINEL {
      return Err(StreamError::BadSentinel {
        found: sentinel,
        depth,
        last_label: self.last_label,
      });
    }

    let stub = StubRecord::read_body(r)?;
    if stub.label < 0 || stub.label as u32 >= self.header.entry_count {
      return Err(StreamError::LabelOutOfRange {
        label: stub.label,
        entry_count: self.header.entry_count,
        depth,
      });
    }
    if self.seen[stub.label as usize].is_some() {
      return Err(StreamError::DuplicateLabel {
        label: stub.label,
        depth,
      });
    }
    if u32::from(stub.level) != depth {
      return Err(StreamError::BadHeader {
        format: "chunk directory",
        reason: format!(
          "chunk {} stores level {} at recursion depth {depth}",
          stub.label, stub.level
        ),
      });
    }

    let index = self.entries.len();
    self.seen[stub.label as usize] = Some(index);
    self.last_label = Some(stub.label);
    self.entries.push(DirectoryEntry {
      stub,
      parent,
      children: None,
    });

    if depth + 1 < self.header.tree_depth {
      let mut children = [0usize; 4];
      for child in &mut children {
        *child = self.read_node(r, Some(index), depth + 1)?;
      }
      self.entries[index].children = Some(children);
    }

    Ok(index)
  }
}

#[cfg(test)]
#[path = "chunk_file_test.rs"]
mod chunk_file_test;
