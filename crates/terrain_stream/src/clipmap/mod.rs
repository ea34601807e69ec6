//! Virtual texture clip stack.
//!
//! # Module Structure
//!
//! - [`toroidal`]: delta bounds and grid clipping for moving windows
//! - [`level`]: levels, physical surfaces and debug checkers
//! - [`budget`]: per-recenter upload budget and stats
//! - [`stack`]: the stack itself

pub mod budget;
pub mod level;
pub mod stack;
pub mod toroidal;

pub use budget::{RecenterStats, UploadBudget};
pub use level::{debug_surface, ClipStackLevel, Surface, DEBUG_COLORS};
pub use stack::{ClipLevelSpan, ClipStack, LevelConstants, PerspectiveProjection, ScreenProjection};
pub use toroidal::{calculate_modulo_delta_bounds, clip_against_grid, window_origin, DeltaRects};
