//! Byte sources backing a resource tree.
//!
//! A source hands out the directory once at open time and payload bytes on
//! demand. Loader tasks call it from rayon workers, so implementations are
//! `Send + Sync`.

use std::fs::File;
use std::io::{BufReader, Cursor};
use std::path::Path;
use std::sync::Mutex;

use glam::IVec2;

use crate::error::{Result, StreamError};
use crate::format::{read_directory, read_payload_record, ChunkDirectory, GeneratedTerrain, TqtIndex};

pub trait PayloadSource: Send + Sync {
  /// Phase one of the two-phase load.
  fn directory(&self) -> Result<ChunkDirectory>;

  /// Framed geometry payload at a stub's offset.
  fn read_geometry(&self, offset: u64) -> Result<Vec<u8>>;

  /// Encoded texture tile, `None` when the tile is absent.
  fn read_texture(&self, level: u32, position: IVec2) -> Result<Option<Vec<u8>>>;

  /// Depth of the texture quadtree, 0 when the source has none.
  fn texture_depth(&self) -> u32;

  /// Side of a texture tile in texels, 0 when the source has none.
  fn tile_size(&self) -> u32;
}

fn no_geometry(offset: u64) -> StreamError {
  StreamError::InvalidPayload {
    offset,
    reason: "source has no chunk directory".to_string(),
  }
}

fn texture_directory(index: Option<&TqtIndex>) -> Result<ChunkDirectory> {
  let index = index.ok_or_else(|| StreamError::Config("source has neither chunks nor texture".to_string()))?;
  Ok(ChunkDirectory::full_quadtree(
    index.header.tree_depth,
    index.header.tile_size as f32,
  ))
}

// =============================================================================
// MemorySource
// =============================================================================

/// Owned in-memory copies of the chunk directory and texture quadtree.
pub struct MemorySource {
  chunk_file: Option<Vec<u8>>,
  texture: Option<(TqtIndex, Vec<u8>)>,
}

impl MemorySource {
  pub fn new(chunk_file: Vec<u8>, texture_file: Option<Vec<u8>>) -> Result<Self> {
    let texture = texture_file.map(Self::index_texture).transpose()?;
    Ok(Self {
      chunk_file: Some(chunk_file),
      texture,
    })
  }

  /// A texture quadtree with no geometry; the directory is synthesized.
  pub fn texture_only(texture_file: Vec<u8>) -> Result<Self> {
    Ok(Self {
      chunk_file: None,
      texture: Some(Self::index_texture(texture_file)?),
    })
  }

  pub fn from_generated(terrain: GeneratedTerrain) -> Result<Self> {
    Self::new(terrain.chunk_file, terrain.texture_file)
  }

  fn index_texture(bytes: Vec<u8>) -> Result<(TqtIndex, Vec<u8>)> {
    let index = TqtIndex::read(&mut Cursor::new(&bytes))?;
    Ok((index, bytes))
  }
}

impl PayloadSource for MemorySource {
  fn directory(&self) -> Result<ChunkDirectory> {
    match &self.chunk_file {
      Some(bytes) => read_directory(&mut Cursor::new(bytes)),
      None => texture_directory(self.texture.as_ref().map(|(i, _)| i)),
    }
  }

  fn read_geometry(&self, offset: u64) -> Result<Vec<u8>> {
    let bytes = self.chunk_file.as_ref().ok_or_else(|| no_geometry(offset))?;
    read_payload_record(&mut Cursor::new(bytes), offset)
  }

  fn read_texture(&self, level: u32, position: IVec2) -> Result<Option<Vec<u8>>> {
    let Some((index, bytes)) = &self.texture else {
      return Ok(None);
    };
    index.read_tile(&mut Cursor::new(bytes), level, position.x, position.y)
  }

  fn texture_depth(&self) -> u32 {
    self.texture.as_ref().map_or(0, |(i, _)| i.header.tree_depth)
  }

  fn tile_size(&self) -> u32 {
    self.texture.as_ref().map_or(0, |(i, _)| i.header.tile_size)
  }
}

// =============================================================================
// FileSource
// =============================================================================

/// Files on disk, read through mutex-guarded buffered readers.
pub struct FileSource {
  chunk_file: Option<Mutex<BufReader<File>>>,
  texture: Option<(TqtIndex, Mutex<BufReader<File>>)>,
}

impl FileSource {
  pub fn open(chunk_path: Option<&Path>, texture_path: Option<&Path>) -> Result<Self> {
    let chunk_file = chunk_path
      .map(|p| File::open(p).map(|f| Mutex::new(BufReader::new(f))))
      .transpose()?;
    let texture = texture_path
      .map(|p| -> Result<_> {
        let mut reader = BufReader::new(File::open(p)?);
        let index = TqtIndex::read(&mut reader)?;
        Ok((index, Mutex::new(reader)))
      })
      .transpose()?;
    if chunk_file.is_none() && texture.is_none() {
      return Err(StreamError::Config("file source needs a chunk or texture file".to_string()));
    }
    Ok(Self { chunk_file, texture })
  }
}

impl PayloadSource for FileSource {
  fn directory(&self) -> Result<ChunkDirectory> {
    match &self.chunk_file {
      Some(reader) => {
        let mut reader = reader.lock().unwrap_or_else(|e| e.into_inner());
        std::io::Seek::rewind(&mut *reader)?;
        read_directory(&mut *reader)
      }
      None => texture_directory(self.texture.as_ref().map(|(i, _)| i)),
    }
  }

  fn read_geometry(&self, offset: u64) -> Result<Vec<u8>> {
    let reader = self.chunk_file.as_ref().ok_or_else(|| no_geometry(offset))?;
    let mut reader = reader.lock().unwrap_or_else(|e| e.into_inner());
    read_payload_record(&mut *reader, offset)
  }

  fn read_texture(&self, level: u32, position: IVec2) -> Result<Option<Vec<u8>>> {
    let Some((index, reader)) = &self.texture else {
      return Ok(None);
    };
    let mut reader = reader.lock().unwrap_or_else(|e| e.into_inner());
    index.read_tile(&mut *reader, level, position.x, position.y)
  }

  fn texture_depth(&self) -> u32 {
    self.texture.as_ref().map_or(0, |(i, _)| i.header.tree_depth)
  }

  fn tile_size(&self) -> u32 {
    self.texture.as_ref().map_or(0, |(i, _)| i.header.tile_size)
  }
}
