//! Instance quadtree: per-viewer LOD over a shared resource tree.
//!
//! Each viewer attaches its own [`InstanceTree`], which mirrors the
//! resource tree 1:1 by handle and keeps only what is specific to that
//! viewer: the packed LOD, split flag, morph factor and which references
//! it holds.
//!
//! # Module Structure
//!
//! - [`lod`]: distance heuristics and packed LOD helpers
//! - [`tree`]: split/collapse state machine, warm-up and texture tracking
//! - [`render`]: draw requests and front-to-back ordering

pub mod lod;
pub mod render;
pub mod tree;

pub use lod::{compute_lod, compute_texture_lod, morph_target};
pub use render::{viewer_quadrant, DrawRequest, RENDER_ORDER};
pub use tree::{InstanceNode, InstanceTree, LodStats};
