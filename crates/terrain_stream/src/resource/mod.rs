//! Resource quadtree: the shared, file-backed side of terrain streaming.
//!
//! One [`ResourceTree`] exists per terrain file and is shared by every
//! viewer. It owns all nodes in a flat arena, tracks per-axis refcounts and
//! requests, and is fed by a [`LoaderStage`].
//!
//! # Module Structure
//!
//! - [`node`]: arena node, handles, axes and stub states
//! - [`request`]: request records, reasons and the free-list pool
//! - [`payload`]: payload kinds and texel access
//! - [`source`]: byte sources (memory, files)
//! - [`tree`]: two-phase open, refcounting, requests and residency
//! - [`loader`]: rayon + channel background loads

pub mod loader;
pub mod node;
pub mod payload;
pub mod request;
pub mod source;
pub mod tree;

pub use loader::{LoaderStage, LoaderStats};
pub use node::{Axis, AxisState, ChunkNode, Direction, NodeHandle, Quadrant, StubState};
pub use payload::{HeightGrid, Payload, PayloadKind, RawKind, TexelSource};
pub use request::{LoadReason, LoadRequest, RequesterId, UnloadReason};
pub use source::{FileSource, MemorySource, PayloadSource};
pub use tree::{LoadOutcome, LoadTicket, PendingLoad, ResourceTree, BOUNDS_EPSILON};
