//! Error type shared by every fallible streaming operation.
//!
//! Directory corruption is reported through [`StreamError`] and aborts the
//! whole open; there is no partial tree. Programming defects such as a
//! refcount underflow panic instead.

use thiserror::Error;

/// Errors raised while opening, reading or configuring streamed terrain.
#[derive(Debug, Error)]
pub enum StreamError {
  #[error("i/o error: {0}")]
  Io(#[from] std::io::Error),

  #[error("bad file magic: expected {expected:?}, found {found:?}")]
  BadMagic { expected: [u8; 4], found: [u8; 4] },

  #[error("unsupported {format} version {found} (expected {expected})")]
  BadVersion {
    format: &'static str,
    expected: u32,
    found: u32,
  },

  #[error("malformed {format} header: {reason}")]
  BadHeader {
    format: &'static str,
    reason: String,
  },

  #[error("bad chunk sentinel {found:#010x} at recursion depth {depth} (last good label {last_label:?})")]
  BadSentinel {
    found: u32,
    depth: u32,
    last_label: Option<i32>,
  },

  #[error("chunk label {label} out of range 0..{entry_count} at recursion depth {depth}")]
  LabelOutOfRange {
    label: i32,
    entry_count: u32,
    depth: u32,
  },

  #[error("duplicate chunk label {label} at recursion depth {depth}")]
  DuplicateLabel { label: i32, depth: u32 },

  #[error("chunk {child} bounds escape parent {parent}")]
  BoundsViolation { parent: i32, child: i32 },

  #[error("directory declares {declared} entries but stores {found}")]
  EntryCountMismatch { declared: u32, found: u32 },

  #[error("invalid payload at offset {offset}: {reason}")]
  InvalidPayload { offset: u64, reason: String },

  #[error("texture tile ({level}, {x}, {y}) is outside a depth {depth} quadtree")]
  TileOutOfRange { level: u32, x: i32, y: i32, depth: u32 },

  #[error("invalid configuration: {0}")]
  Config(String),

  #[error("failed to parse configuration: {0}")]
  ConfigParse(#[from] toml::de::Error),
}

/// Result alias for streaming operations.
pub type Result<T> = std::result::Result<T, StreamError>;
