use crate::key::KeyId;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

/// Identities of keys whose last handle was dropped, waiting to be swept.
///
/// Producers are key drop hooks on arbitrary threads; the consumer is the
/// sweep at the start of each cache operation. `pending` lets the sweep skip
/// the lock entirely when nothing was reclaimed.
#[derive(Debug, Default)]
pub(crate) struct ReclaimQueue {
  ids: Mutex<VecDeque<KeyId>>,
  pending: AtomicUsize,
}

impl ReclaimQueue {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn push(&self, id: KeyId) {
    let mut ids = self.ids.lock();
    ids.push_back(id);
    self.pending.fetch_add(1, Ordering::Release);
  }

  #[inline]
  pub(crate) fn is_empty(&self) -> bool {
    self.pending.load(Ordering::Acquire) == 0
  }

  /// Takes every queued identity, oldest first.
  pub(crate) fn drain(&self) -> Vec<KeyId> {
    if self.is_empty() {
      return Vec::new();
    }
    let mut ids = self.ids.lock();
    let drained: Vec<KeyId> = ids.drain(..).collect();
    self.pending.fetch_sub(drained.len(), Ordering::Release);
    drained
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use std::sync::Arc;
  use std::thread;

  #[test]
  fn test_drain_returns_in_order() {
    let queue = ReclaimQueue::new();
    assert!(queue.drain().is_empty());

    queue.push(KeyId(3));
    queue.push(KeyId(1));
    assert!(!queue.is_empty());
    assert_eq!(queue.drain(), vec![KeyId(3), KeyId(1)]);
    assert!(queue.is_empty());
  }

  #[test]
  fn test_concurrent_producers() {
    let queue = Arc::new(ReclaimQueue::new());
    let handles: Vec<_> = (0..8u64)
      .map(|t| {
        let queue = queue.clone();
        thread::spawn(move || {
          for i in 0..100u64 {
            queue.push(KeyId(t * 1000 + i + 1));
          }
        })
      })
      .collect();
    for handle in handles {
      handle.join().unwrap();
    }

    let mut drained = queue.drain();
    assert_eq!(drained.len(), 800);
    drained.sort();
    drained.dedup();
    assert_eq!(drained.len(), 800);
    assert!(queue.is_empty());
  }
}
