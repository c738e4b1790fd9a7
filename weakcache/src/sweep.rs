//! Opportunistic removal of entries whose key has been reclaimed.

use crate::holder::ValueHolder;
use crate::listener::RemovalCause;
use crate::metrics::Metrics;
use crate::shared::CacheShared;

use std::hash::{BuildHasher, Hash};

impl<K, P, S, V, E, H> CacheShared<K, P, S, V, E, H>
where
  P: ?Sized,
  S: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  /// Drains the reclamation queue and removes each reclaimed key's entry
  /// group along with its reverse-index entries.
  ///
  /// Costs one atomic load when nothing was reclaimed since the last call.
  pub(crate) fn expunge_stale_entries(&self) {
    if self.reclaimed.is_empty() {
      return;
    }

    let reclaimed = self.reclaimed.drain();
    let mut keys = 0u64;
    let mut expunged = 0u64;

    for id in reclaimed {
      // A dead wrapped key equals only its own identity, so this cannot hit
      // a live key's group.
      let Some((wrapped, inner)) = self.map.remove(&id) else {
        continue;
      };
      debug_assert!(!wrapped.is_alive());
      keys += 1;

      let slots: Vec<(S, ValueHolder<V>)> = inner
        .iter()
        .map(|slot| (slot.key().clone(), slot.value().clone()))
        .collect();
      drop(inner);

      for (sub_key, holder) in slots {
        let value = match &holder {
          ValueHolder::Ready(cache_value) => {
            self
              .reverse_index
              .remove_if(&cache_value.identity(), |_, indexed| indexed.same_as(cache_value));
            cache_value.get()
          }
          // Nothing can still be computing for a key nobody holds.
          ValueHolder::Pending(_) => None,
        };
        expunged += 1;
        if let Some(listener) = &self.listener {
          listener.on_removal(sub_key, value, RemovalCause::KeyReclaimed);
        }
      }
    }

    if keys > 0 {
      Metrics::record(&self.metrics.keys_reclaimed, keys);
      Metrics::record(&self.metrics.entries_expunged, expunged);
      tracing::debug!(keys, entries = expunged, "expunged reclaimed keys");
    }
  }
}
