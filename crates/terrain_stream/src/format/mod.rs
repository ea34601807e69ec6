//! On-disk containers for streamed terrain.
//!
//! Two files back one terrain:
//!
//! - the chunk directory ([`chunk_file`]): a header followed by depth-first
//!   node stubs, then framed geometry payloads addressed by byte offset;
//! - the texture quadtree ([`tqt`]): a dense offset table indexed by
//!   (level, x, y) followed by length-prefixed image tiles.
//!
//! All integers are little-endian.
//!
//! # Module Structure
//!
//! - [`chunk_file`]: header/stub records and the phase-one directory read
//! - [`payload`]: payload framing and the raw [`ImageChunk`] tile codec
//! - [`tqt`]: texture quadtree index and writer
//! - [`builder`]: generates well-formed directories from a height function

pub mod builder;
pub mod chunk_file;
pub mod payload;
pub mod tqt;

pub use builder::{DirectoryBuilder, GeneratedTerrain};
pub use chunk_file::{
  read_directory, ChunkDirectory, ChunkFileHeader, DirectoryEntry, StubRecord, CHUNK_MAGIC,
  CHUNK_VERSION, NODE_SENTINEL, NO_NEIGHBOR,
};
pub use payload::{read_payload_record, write_payload_record, ImageChunk, PAYLOAD_SENTINEL};
pub use tqt::{node_count, node_index, TqtHeader, TqtIndex, TqtWriter, TQT_MAGIC, TQT_VERSION};

use std::io::{self, Read, Write};

#[inline]
pub(crate) fn read_u8(r: &mut impl Read) -> io::Result<u8> {
  let mut b = [0u8; 1];
  r.read_exact(&mut b)?;
  Ok(b[0])
}

#[inline]
pub(crate) fn read_u16(r: &mut impl Read) -> io::Result<u16> {
  let mut b = [0u8; 2];
  r.read_exact(&mut b)?;
  Ok(u16::from_le_bytes(b))
}

#[inline]
pub(crate) fn read_i16(r: &mut impl Read) -> io::Result<i16> {
  let mut b = [0u8; 2];
  r.read_exact(&mut b)?;
  Ok(i16::from_le_bytes(b))
}

#[inline]
pub(crate) fn read_u32(r: &mut impl Read) -> io::Result<u32> {
  let mut b = [0u8; 4];
  r.read_exact(&mut b)?;
  Ok(u32::from_le_bytes(b))
}

#[inline]
pub(crate) fn read_i32(r: &mut impl Read) -> io::Result<i32> {
  let mut b = [0u8; 4];
  r.read_exact(&mut b)?;
  Ok(i32::from_le_bytes(b))
}

#[inline]
pub(crate) fn read_f32(r: &mut impl Read) -> io::Result<f32> {
  let mut b = [0u8; 4];
  r.read_exact(&mut b)?;
  Ok(f32::from_le_bytes(b))
}

#[inline]
pub(crate) fn write_u16(w: &mut impl Write, v: u16) -> io::Result<()> {
  w.write_all(&v.to_le_bytes())
}

#[inline]
pub(crate) fn write_i16(w: &mut impl Write, v: i16) -> io::Result<()> {
  w.write_all(&v.to_le_bytes())
}

#[inline]
pub(crate) fn write_u32(w: &mut impl Write, v: u32) -> io::Result<()> {
  w.write_all(&v.to_le_bytes())
}

#[inline]
pub(crate) fn write_i32(w: &mut impl Write, v: i32) -> io::Result<()> {
  w.write_all(&v.to_le_bytes())
}

#[inline]
pub(crate) fn write_f32(w: &mut impl Write, v: f32) -> io::Result<()> {
  w.write_all(&v.to_le_bytes())
}
