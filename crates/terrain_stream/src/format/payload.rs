//! Payload framing and the raw image tile codec.
//!
//! Geometry payloads in the chunk directory are framed as
//! `sentinel, length, bytes`. Image tiles carry a small header followed by
//! tightly packed rows.

use std::io::{Read, Seek, SeekFrom, Write};

use super::{read_u16, read_u32, read_u8, write_u16, write_u32};
use crate::error::{Result, StreamError};

/// Marker preceding every framed geometry payload.
pub const PAYLOAD_SENTINEL: u32 = 0xBEEF_1234;

/// Largest payload accepted by the reader (64 MiB).
const MAX_PAYLOAD_BYTES: u32 = 64 << 20;

/// Read the framed payload stored at `offset`.
pub fn read_payload_record<R: Read + Seek>(r: &mut R, offset: u64) -> Result<Vec<u8>> {
  r.seek(SeekFrom::Start(offset))?;

  let sentinel = read_u32(r)?;
  if sentinel != PAYLOAD_SENTINEL {
    return Err(StreamError::InvalidPayload {
      offset,
      reason: format!("bad payload sentinel {sentinel:#010x}"),
    });
  }

  let len = read_u32(r)?;
  if len > MAX_PAYLOAD_BYTES {
    return Err(StreamError::InvalidPayload {
      offset,
      reason: format!("payload length {len} exceeds limit"),
    });
  }

  let mut bytes = vec![0u8; len as usize];
  r.read_exact(&mut bytes)?;
  Ok(bytes)
}

/// Write a framed payload, returning the number of bytes written.
pub fn write_payload_record(w: &mut impl Write, bytes: &[u8]) -> std::io::Result<u64> {
  write_u32(w, PAYLOAD_SENTINEL)?;
  write_u32(w, bytes.len() as u32)?;
  w.write_all(bytes)?;
  Ok(8 + bytes.len() as u64)
}

/// Decoded image tile, rows packed top to bottom.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageChunk {
  pub width: u32,
  pub height: u32,
  /// 3 (RGB) or 4 (RGBA).
  pub bytes_per_pixel: u8,
  pub pixels: Vec<u8>,
}

impl ImageChunk {
  const HEADER_BYTES: usize = 2 + 2 + 1;

  /// Build a tile by evaluating `texel(x, y)` for every pixel.
  pub fn from_fn(size: u32, bytes_per_pixel: u8, mut texel: impl FnMut(u32, u32) -> [u8; 4]) -> Self {
    let bpp = bytes_per_pixel as usize;
    let mut pixels = Vec::with_capacity((size * size) as usize * bpp);
    for y in 0..size {
      for x in 0..size {
        pixels.extend_from_slice(&texel(x, y)[..bpp]);
      }
    }
    Self {
      width: size,
      height: size,
      bytes_per_pixel,
      pixels,
    }
  }

  /// Decode a tile from its stored bytes.
  pub fn decode(bytes: &[u8]) -> Result<Self> {
    let invalid = |reason: String| StreamError::InvalidPayload { offset: 0, reason };

    let mut r = bytes;
    let width = u32::from(read_u16(&mut r)?);
    let height = u32::from(read_u16(&mut r)?);
    let bytes_per_pixel = read_u8(&mut r)?;
    if bytes_per_pixel != 3 && bytes_per_pixel != 4 {
      return Err(invalid(format!("unsupported bytes per pixel {bytes_per_pixel}")));
    }

    let expected = (width * height) as usize * bytes_per_pixel as usize;
    if r.len() != expected {
      return Err(invalid(format!(
        "{width}x{height} tile needs {expected} pixel bytes, found {}",
        r.len()
      )));
    }

    Ok(Self {
      width,
      height,
      bytes_per_pixel,
      pixels: r.to_vec(),
    })
  }

  /// Encode into the stored representation.
  pub fn encode(&self) -> Vec<u8> {
    let mut out = Vec::with_capacity(Self::HEADER_BYTES + self.pixels.len());
    // Vec<u8> writes cannot fail.
    let _ = write_u16(&mut out, self.width as u16);
    let _ = write_u16(&mut out, self.height as u16);
    out.push(self.bytes_per_pixel);
    out.extend_from_slice(&self.pixels);
    out
  }

  /// RGBA texel at (x, y); RGB tiles report alpha 0xFF.
  #[inline]
  pub fn texel(&self, x: u32, y: u32) -> [u8; 4] {
    let bpp = self.bytes_per_pixel as usize;
    let i = (y * self.width + x) as usize * bpp;
    let p = &self.pixels[i..i + bpp];
    if bpp == 4 {
      [p[0], p[1], p[2], p[3]]
    } else {
      [p[0], p[1], p[2], 0xFF]
    }
  }

  /// Raw bytes of `len` texels starting at (x, y).
  #[inline]
  pub fn span(&self, x: u32, y: u32, len: u32) -> &[u8] {
    let bpp = self.bytes_per_pixel as usize;
    let start = (y * self.width + x) as usize * bpp;
    &self.pixels[start..start + len as usize * bpp]
  }
}
