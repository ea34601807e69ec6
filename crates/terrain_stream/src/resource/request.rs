//! Load request records and their free-list pool.
//!
//! Every node axis owns an intrusive singly linked list of requests, one
//! record per requester. Records live in one pool per tree and are
//! recycled through a free list, so per-frame request churn does not
//! allocate once the pool has warmed up.

use std::sync::atomic::{AtomicU64, Ordering};

/// Atomic counter for generating unique requester identities.
static REQUESTER_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Identity of a party holding references or requests on a tree.
///
/// Generated atomically - unique within the process lifetime.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct RequesterId(u64);

impl RequesterId {
  pub fn new() -> Self {
    Self(REQUESTER_ID_COUNTER.fetch_add(1, Ordering::Relaxed))
  }

  pub fn raw(&self) -> u64 {
    self.0
  }
}

impl Default for RequesterId {
  fn default() -> Self {
    Self::new()
  }
}

/// Why a load was asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LoadReason {
  CanSplitChildPreload,
  WarmUpPreload,
  UpdateTextureLoad,
  InterestRegion,
  RootLoad,
  Precache,
}

/// Why an unload was asked for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnloadReason {
  UpdateLod,
  WarmUpUnimportant,
  WarmUpImportant,
  TextureNoGeometry,
  TextureLevelTooHigh,
  Purge,
  RefCountZero,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LoadRequest {
  pub requester: RequesterId,
  pub priority: f32,
  pub reason: LoadReason,
}

struct Slot {
  request: Option<LoadRequest>,
  next: Option<u32>,
}

/// Pool of request records shared by every list of one tree.
#[derive(Default)]
pub(crate) struct RequestPool {
  slots: Vec<Slot>,
  free: Option<u32>,
  live: usize,
}

impl RequestPool {
  /// Insert or replace the record of `request.requester` in the list at
  /// `head`. Returns true when a new record was added.
  pub fn upsert(&mut self, head: &mut Option<u32>, request: LoadRequest) -> bool {
    let mut cursor = *head;
    while let Some(i) = cursor {
      let slot = &mut self.slots[i as usize];
      if let Some(existing) = slot.request.as_mut() {
        if existing.requester == request.requester {
          *existing = request;
          return false;
        }
      }
      cursor = slot.next;
    }

    let index = self.alloc(request, *head);
    *head = Some(index);
    true
  }

  /// Remove the record of `requester` from the list at `head`.
  pub fn remove(&mut self, head: &mut Option<u32>, requester: RequesterId) -> Option<LoadRequest> {
    let mut prev: Option<u32> = None;
    let mut cursor = *head;
    while let Some(i) = cursor {
      let next = self.slots[i as usize].next;
      let matches = self.slots[i as usize]
        .request
        .is_some_and(|r| r.requester == requester);
      if matches {
        match prev {
          Some(p) => self.slots[p as usize].next = next,
          None => *head = next,
        }
        return self.release(i);
      }
      prev = cursor;
      cursor = next;
    }
    None
  }

  /// Return every record of the list at `head` to the free list.
  pub fn clear(&mut self, head: &mut Option<u32>) {
    let mut cursor = head.take();
    while let Some(i) = cursor {
      cursor = self.slots[i as usize].next;
      self.release(i);
    }
  }

  pub fn iter(&self, head: Option<u32>) -> impl Iterator<Item = &LoadRequest> + '_ {
    let mut cursor = head;
    std::iter::from_fn(move || {
      let i = cursor?;
      let slot = &self.slots[i as usize];
      cursor = slot.next;
      slot.request.as_ref()
    })
  }

  pub fn contains(&self, head: Option<u32>, requester: RequesterId) -> bool {
    self.iter(head).any(|r| r.requester == requester)
  }

  /// Highest priority in the list at `head`.
  pub fn max_priority(&self, head: Option<u32>) -> Option<f32> {
    self.iter(head).map(|r| r.priority).reduce(f32::max)
  }

  /// Records currently in use.
  pub fn live(&self) -> usize {
    self.live
  }

  /// Records ever allocated, live or free.
  pub fn capacity(&self) -> usize {
    self.slots.len()
  }

  fn alloc(&mut self, request: LoadRequest, next: Option<u32>) -> u32 {
    self.live += 1;
    match self.free {
      Some(i) => {
        let slot = &mut self.slots[i as usize];
        self.free = slot.next;
        slot.request = Some(request);
        slot.next = next;
        i
      }
      None => {
        self.slots.push(Slot {
          request: Some(request),
          next,
        });
        (self.slots.len() - 1) as u32
      }
    }
  }

  fn release(&mut self, index: u32) -> Option<LoadRequest> {
    let slot = &mut self.slots[index as usize];
    let request = slot.request.take();
    slot.next = self.free;
    self.free = Some(index);
    self.live -= 1;
    request
  }
}
