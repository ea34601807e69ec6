//! Engine-agnostic streaming statistics.
//!
//! Feature-gated and runtime-toggled. The loader, the instance trees and the
//! clip stack report into one process-wide [`StreamMetrics`]; callers read
//! it back with [`snapshot`].
//!
//! # Usage
//!
//! ```ignore
//! use terrain_stream::metrics::{self, COLLECT_METRICS};
//!
//! // Compile with --features metrics
//! // Runtime toggle:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! let m = metrics::snapshot();
//! println!("avg load {:.1}us", m.load_timings.average());
//! ```

use std::collections::VecDeque;
use std::sync::atomic::AtomicBool;
#[cfg(feature = "metrics")]
use std::sync::atomic::Ordering;
use std::sync::Mutex;

use crate::clipmap::RecenterStats;
use crate::instance::LodStats;

/// Runtime toggle for metrics collection.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

static METRICS: Mutex<Option<StreamMetrics>> = Mutex::new(None);

/// Check if metrics collection is enabled (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
  #[cfg(feature = "metrics")]
  {
    COLLECT_METRICS.load(Ordering::Relaxed)
  }
  #[cfg(not(feature = "metrics"))]
  {
    false
  }
}

/// Rolling window of recent values.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
  buffer: VecDeque<T>,
  capacity: usize,
}

impl<T> RollingWindow<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      buffer: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// Push a value, evicting the oldest at capacity.
  pub fn push(&mut self, value: T) {
    if self.buffer.len() >= self.capacity {
      self.buffer.pop_front();
    }
    self.buffer.push_back(value);
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
  }

  /// Oldest to newest.
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.buffer.iter()
  }

  pub fn last(&self) -> Option<&T> {
    self.buffer.back()
  }
}

impl RollingWindow<u64> {
  pub fn sum(&self) -> u64 {
    self.buffer.iter().sum()
  }

  pub fn average(&self) -> f64 {
    if self.buffer.is_empty() {
      0.0
    } else {
      self.sum() as f64 / self.buffer.len() as f64
    }
  }

  pub fn min_max(&self) -> Option<(u64, u64)> {
    let min = self.buffer.iter().min()?;
    let max = self.buffer.iter().max()?;
    Some((*min, *max))
  }
}

impl Default for RollingWindow<u64> {
  fn default() -> Self {
    Self::new(128) // ~2 seconds at 60fps
  }
}

#[derive(Debug, Clone, Default)]
pub struct StreamMetrics {
  // Loading
  /// Background load times in microseconds.
  pub load_timings: RollingWindow<u64>,
  /// Loads retired per instance frame.
  pub loads_per_frame: RollingWindow<u64>,
  pub total_loads: u64,
  /// Loads thrown away on retire because nobody wanted them any more.
  pub loads_discarded: u64,
  loads_since_frame: u64,

  // LOD
  /// Nodes split per instance frame.
  pub splits_per_frame: RollingWindow<u64>,
  /// Draws issued per instance frame.
  pub draws: RollingWindow<u64>,
  pub refs_taken: u64,
  pub refs_released: u64,

  // Clip stack
  /// Texels uploaded per recenter.
  pub recenter_texels: RollingWindow<u64>,
  /// Rect updates per recenter.
  pub recenter_rects: RollingWindow<u64>,
  pub recenters: u64,
  pub levels_skipped: u64,
  /// Recenters that stopped early on the upload budget.
  pub budget_stops: u64,
}

impl StreamMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record_load(&mut self, load_time_us: u64, discarded: bool) {
    self.load_timings.push(load_time_us);
    self.total_loads += 1;
    self.loads_since_frame += 1;
    if discarded {
      self.loads_discarded += 1;
    }
  }

  /// Close an instance frame; loads retired since the last one are
  /// attributed to it.
  pub fn record_lod_frame(&mut self, stats: &LodStats) {
    self.loads_per_frame.push(std::mem::take(&mut self.loads_since_frame));
    self.splits_per_frame.push(stats.nodes_split as u64);
    self.draws.push(stats.draws as u64);
    self.refs_taken += (stats.geometry_refs_taken + stats.texture_refs_taken) as u64;
    self.refs_released += (stats.geometry_refs_released + stats.texture_refs_released) as u64;
  }

  pub fn record_recenter(&mut self, stats: &RecenterStats) {
    self.recenter_texels.push(stats.texels);
    self.recenter_rects.push(u64::from(stats.rects));
    self.recenters += 1;
    self.levels_skipped += u64::from(stats.levels_skipped);
    if stats.budget_exhausted {
      self.budget_stops += 1;
    }
  }

  /// References still held: taken minus released.
  pub fn live_refs(&self) -> u64 {
    self.refs_taken.saturating_sub(self.refs_released)
  }
}

fn with_metrics(f: impl FnOnce(&mut StreamMetrics)) {
  if !is_enabled() {
    return;
  }
  // A poisoned lock only means a reporter panicked mid-update.
  let mut guard = METRICS.lock().unwrap_or_else(|e| e.into_inner());
  f(guard.get_or_insert_with(StreamMetrics::default));
}

pub fn record_load(load_time_us: u64, discarded: bool) {
  with_metrics(|m| m.record_load(load_time_us, discarded));
}

pub fn record_lod_frame(stats: &LodStats) {
  with_metrics(|m| m.record_lod_frame(stats));
}

pub fn record_recenter(stats: &RecenterStats) {
  with_metrics(|m| m.record_recenter(stats));
}

/// Copy of the process-wide metrics.
pub fn snapshot() -> StreamMetrics {
  let guard = METRICS.lock().unwrap_or_else(|e| e.into_inner());
  guard.clone().unwrap_or_default()
}

pub fn reset() {
  let mut guard = METRICS.lock().unwrap_or_else(|e| e.into_inner());
  *guard = None;
}
