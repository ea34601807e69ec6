//! terrain_stream - Engine independent quadtree terrain streaming
//!
//! Streams chunked heightfield geometry and tiled texture out of a
//! preprocessed directory, picks a level of detail per viewer, and keeps a
//! toroidal clip stack of texels centred on the camera.
//!
//! # Features
//!
//! - **Resource quadtree**: one shared, refcounted tree of chunk payloads
//!   with prioritised background loading on a rayon pool
//! - **Instance quadtree**: per-viewer LOD with morph factors and
//!   front-to-back draw lists
//! - **Texture TOC**: tiled texture quadtrees, aggregated when several must
//!   agree on residency
//! - **Clip stack**: toroidally addressed texel windows updated with minimal
//!   delta rects under an upload budget
//!
//! # Example
//!
//! ```ignore
//! use terrain_stream::{ClipMapConfig, ClipStack, DirectLookupCache, TextureToc};
//!
//! let toc = TextureToc::open(source, LoaderConfig::default())?;
//! let mut stack = ClipStack::new(&ClipMapConfig::default(), DirectLookupCache::new(toc))?;
//!
//! // Each frame:
//! let stats = stack.recenter(camera_uv);
//! ```

pub mod bounds;
pub mod config;
pub mod error;
pub mod rect;

pub use bounds::Aabb3;
pub use config::{ClipMapConfig, LoaderConfig, LodConfig, StreamConfig};
pub use error::{Result, StreamError};
pub use rect::{TexRect, TexelRect};

// Directory and tile file formats
pub mod format;
pub use format::{DirectoryBuilder, GeneratedTerrain};

// Shared resource quadtree and background loading
pub mod resource;
pub use resource::{
  Axis, FileSource, LoadReason, LoaderStage, MemorySource, NodeHandle, PayloadKind, PayloadSource, RawKind,
  RequesterId, ResourceTree,
};

// Per-viewer LOD
pub mod instance;
pub use instance::{DrawRequest, InstanceTree, LodStats};

// Texture tile quadtrees
pub mod aggregator;
pub mod toc;
pub use aggregator::TocAggregator;
pub use toc::TextureToc;

// Clip stack and its texel sources
pub mod cache;
pub mod clipmap;
pub use cache::{CacheBackend, CompositeCache, DirectLookupCache, SyntheticCache};
pub use clipmap::{ClipStack, RecenterStats, UploadBudget};

pub mod metrics;
