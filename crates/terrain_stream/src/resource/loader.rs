//! Background loader for one resource tree.
//!
//! Following the stage pattern: Tick → Completions
//!
//! `tick` takes the highest priority pending node axes, marks them
//! `Loading` and reads plus decodes each payload on the rayon pool.
//! Results come back over a crossbeam channel and are retired on the
//! frame thread by `drain_completions`; there are no callbacks.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use web_time::Instant;

use super::payload::{Payload, PayloadKind};
use super::source::PayloadSource;
use super::tree::{LoadOutcome, LoadTicket, ResourceTree};
use crate::config::LoaderConfig;
use crate::error::Result;

struct LoadResult<K: PayloadKind> {
  ticket: LoadTicket,
  result: Result<Option<Payload<K>>>,
  load_time_us: u64,
}

/// Counters accumulated over the loader's lifetime.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoaderStats {
  pub started: u64,
  pub installed: u64,
  pub discarded: u64,
  pub failed: u64,
  /// Sum of worker read + decode time.
  pub load_time_us: u64,
}

pub struct LoaderStage<K: PayloadKind> {
  config: LoaderConfig,
  sender: Sender<LoadResult<K>>,
  receiver: Receiver<LoadResult<K>>,
  in_flight: usize,
  stats: LoaderStats,
}

impl<K: PayloadKind> LoaderStage<K> {
  pub fn new(config: LoaderConfig) -> Self {
    let (sender, receiver) = crossbeam_channel::unbounded();
    Self {
      config,
      sender,
      receiver,
      in_flight: 0,
      stats: LoaderStats::default(),
    }
  }

  /// Start loads up to the in-flight limit. Returns the number started.
  #[cfg_attr(feature = "tracing", tracing::instrument(skip_all, name = "loader::tick"))]
  pub fn tick(&mut self, tree: &mut ResourceTree<K>) -> usize {
    let free = self.config.max_in_flight.saturating_sub(self.in_flight);
    if free == 0 {
      return 0;
    }

    let mut started = 0;
    for pending in tree.pending_requests(self.config.max_queue_scan) {
      if started == free {
        break;
      }
      let Some(ticket) = tree.begin_load(pending.handle, pending.axis) else {
        continue;
      };
      self.spawn(Arc::clone(tree.source()), ticket);
      started += 1;
    }

    self.in_flight += started;
    self.stats.started += started as u64;
    started
  }

  fn spawn(&self, source: Arc<dyn PayloadSource>, ticket: LoadTicket) {
    let sender = self.sender.clone();
    rayon::spawn(move || {
      let start = Instant::now();
      let result = ticket.fetch::<K>(source.as_ref());
      let load_time_us = start.elapsed().as_micros() as u64;
      // The stage owns the receiver; a send only fails once it is gone.
      let _ = sender.send(LoadResult {
        ticket,
        result,
        load_time_us,
      });
    });
  }

  /// Retire every finished load without blocking. Returns the number
  /// retired.
  pub fn drain_completions(&mut self, tree: &mut ResourceTree<K>) -> usize {
    let mut retired = 0;
    while let Ok(done) = self.receiver.try_recv() {
      self.retire(tree, done);
      retired += 1;
    }
    retired
  }

  /// Block until every in-flight load has retired.
  pub fn flush(&mut self, tree: &mut ResourceTree<K>) -> usize {
    let mut retired = 0;
    while self.in_flight > 0 {
      match self.receiver.recv() {
        Ok(done) => {
          self.retire(tree, done);
          retired += 1;
        }
        Err(_) => break,
      }
    }
    retired
  }

  /// Retire finished loads, then start new ones.
  pub fn pump(&mut self, tree: &mut ResourceTree<K>) -> usize {
    self.drain_completions(tree);
    self.tick(tree)
  }

  /// Pump until nothing is pending or in flight. Tests and tools only.
  ///
  /// Failed loads go back to pending, so a round that only failed ends the
  /// pump instead of retrying a broken source forever.
  pub fn run_to_idle(&mut self, tree: &mut ResourceTree<K>) {
    loop {
      self.tick(tree);
      if self.in_flight == 0 {
        break;
      }
      let before = self.stats;
      self.flush(tree);
      if self.stats.failed > before.failed && self.stats.installed == before.installed {
        break;
      }
    }
  }

  fn retire(&mut self, tree: &mut ResourceTree<K>, done: LoadResult<K>) {
    self.in_flight -= 1;
    self.stats.load_time_us += done.load_time_us;
    let outcome = tree.complete_load(done.ticket, done.result);
    match outcome {
      LoadOutcome::Installed => self.stats.installed += 1,
      LoadOutcome::Discarded => self.stats.discarded += 1,
      LoadOutcome::Failed => self.stats.failed += 1,
    }

    #[cfg(feature = "metrics")]
    crate::metrics::record_load(done.load_time_us, outcome == LoadOutcome::Discarded);
  }

  pub fn in_flight(&self) -> usize {
    self.in_flight
  }

  pub fn is_idle(&self) -> bool {
    self.in_flight == 0
  }

  pub fn stats(&self) -> LoaderStats {
    self.stats
  }
}

#[cfg(test)]
#[path = "loader_test.rs"]
mod loader_test;
