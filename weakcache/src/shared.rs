use crate::error::CacheError;
use crate::factory::Factory;
use crate::holder::{CacheValue, LookupValue, ValueHolder, ValueId, ValueRetention};
use crate::key::{KeyHandle, KeyId, WrappedKey};
use crate::listener::{RemovalCause, RemovalListener};
use crate::metrics::Metrics;
use crate::reclaim::ReclaimQueue;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub(crate) type SubKeyFactory<K, P, S> = Arc<dyn Fn(Option<&K>, &P) -> S + Send + Sync>;
pub(crate) type ValueFactory<K, P, V, E> =
  Arc<dyn Fn(Option<&K>, &P) -> Result<Option<V>, E> + Send + Sync>;

/// Sub-key → slot, one per key.
pub(crate) type InnerMap<S, V, H> = DashMap<S, ValueHolder<V>, H>;

/// The internal, thread-safe core of the cache.
pub(crate) struct CacheShared<K, P: ?Sized, S, V, E, H> {
  pub(crate) map: DashMap<WrappedKey<K>, Arc<InnerMap<S, V, H>>, H>,
  pub(crate) reverse_index: DashMap<ValueId, CacheValue<V>, H>,
  pub(crate) reclaimed: Arc<ReclaimQueue>,
  pub(crate) sub_key_factory: SubKeyFactory<K, P, S>,
  pub(crate) value_factory: ValueFactory<K, P, V, E>,
  pub(crate) retention: ValueRetention,
  pub(crate) sub_key_shards: usize,
  pub(crate) hasher: H,
  pub(crate) listener: Option<Arc<dyn RemovalListener<S, V>>>,
  pub(crate) metrics: Metrics,
}

impl<K, P: ?Sized, S, V, E, H: BuildHasher + Clone> fmt::Debug for CacheShared<K, P, S, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CacheShared")
      .field("keys", &self.map.len())
      .field("values", &self.reverse_index.len())
      .field("retention", &self.retention)
      .field("metrics", &self.metrics.snapshot())
      .finish_non_exhaustive()
  }
}

impl<K, P, S, V, E, H> CacheShared<K, P, S, V, E, H>
where
  P: ?Sized,
  S: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  pub(crate) fn get(
    &self,
    key: Option<&KeyHandle<K>>,
    parameter: &P,
  ) -> Result<Arc<V>, CacheError<E>> {
    self.expunge_stale_entries();

    let inner = self.inner_map(key);
    let key = key.map(|handle| &**handle);
    let sub_key = (self.sub_key_factory)(key, parameter);

    let mut supplier = Self::read_slot(&inner, &sub_key);
    let mut factory: Option<Arc<Factory>> = None;

    loop {
      if let Some(holder) = &supplier {
        let resolved = match holder {
          ValueHolder::Ready(value) => {
            let value = value.get();
            if value.is_some() {
              Metrics::record(&self.metrics.hits, 1);
              tracing::trace!("cache hit");
            }
            value
          }
          ValueHolder::Pending(pending) => {
            self.resolve_factory(pending, &inner, &sub_key, key, parameter)?
          }
        };
        if let Some(value) = resolved {
          return Ok(value);
        }
      }

      // Absent, cleared, or a factory that lost its slot.
      let ours = Arc::clone(factory.get_or_insert_with(|| Arc::new(Factory::new())));

      supplier = match supplier {
        None => match inner.entry(sub_key.clone()) {
          Entry::Occupied(occupied) => Some(occupied.get().clone()),
          Entry::Vacant(vacant) => {
            vacant.insert(ValueHolder::Pending(Arc::clone(&ours)));
            tracing::trace!("installed factory in empty slot");
            Some(ValueHolder::Pending(ours))
          }
        },
        Some(current) => {
          let replacement = ValueHolder::Pending(Arc::clone(&ours));
          if Self::replace_slot(&inner, &sub_key, &current, replacement) {
            if let ValueHolder::Ready(cleared) = &current {
              self.supersede(&sub_key, cleared);
            }
            Some(ValueHolder::Pending(ours))
          } else {
            Self::read_slot(&inner, &sub_key)
          }
        }
      };
    }
  }

  pub(crate) fn contains_value(&self, value: &Arc<V>) -> bool {
    self.expunge_stale_entries();

    let lookup = LookupValue::new(value);
    self
      .reverse_index
      .get(&lookup.identity())
      .is_some_and(|entry| lookup.matches(entry.value()))
  }

  pub(crate) fn size(&self) -> usize {
    self.expunge_stale_entries();
    self.reverse_index.len()
  }

  /// Gets or creates the inner map for `key`. Only the thread whose map wins
  /// the insert registers this cache as a watcher of the key.
  fn inner_map(&self, key: Option<&KeyHandle<K>>) -> Arc<InnerMap<S, V, H>> {
    let id = key.map_or(KeyId::NULL, KeyHandle::id);
    if let Some(existing) = self.map.get(&id) {
      return Arc::clone(existing.value());
    }

    match self.map.entry(WrappedKey::new(key)) {
      Entry::Occupied(occupied) => Arc::clone(occupied.get()),
      Entry::Vacant(vacant) => {
        let inner = Arc::new(DashMap::with_hasher_and_shard_amount(
          self.hasher.clone(),
          self.sub_key_shards,
        ));
        vacant.insert(Arc::clone(&inner));
        if let Some(handle) = key {
          handle.watch(&self.reclaimed);
        }
        tracing::trace!(key = %id, "created entry group for key");
        inner
      }
    }
  }

  #[inline]
  fn read_slot(inner: &InnerMap<S, V, H>, sub_key: &S) -> Option<ValueHolder<V>> {
    inner.get(sub_key).map(|holder| holder.value().clone())
  }

  /// Replaces the slot only if it still holds exactly `expected`.
  fn replace_slot(
    inner: &InnerMap<S, V, H>,
    sub_key: &S,
    expected: &ValueHolder<V>,
    replacement: ValueHolder<V>,
  ) -> bool {
    match inner.get_mut(sub_key) {
      Some(mut slot) if slot.same_as(expected) => {
        *slot = replacement;
        true
      }
      _ => false,
    }
  }

  /// A dropped weak value was replaced by a new factory; forget it.
  fn supersede(&self, sub_key: &S, cleared: &CacheValue<V>) {
    self
      .reverse_index
      .remove_if(&cleared.identity(), |_, indexed| indexed.same_as(cleared));
    Metrics::record(&self.metrics.superseded, 1);
    tracing::debug!("cleared value superseded by a new computation");
    if let Some(listener) = &self.listener {
      listener.on_removal(sub_key.clone(), None, RemovalCause::Cleared);
    }
  }
}
