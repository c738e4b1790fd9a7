use crate::builder::WeakCacheBuilder;
use crate::error::CacheError;
use crate::key::KeyHandle;
use crate::metrics::MetricsSnapshot;
use crate::shared::CacheShared;

use std::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

/// A thread-safe, single-flight cache keyed by `(key, sub-key)`, whose entries
/// live as long as some `KeyHandle` to their key does.
///
/// Cloning is cheap; all clones share the same storage.
///
/// - `K`: key, held weakly and compared by identity through [`KeyHandle`].
/// - `P`: parameter passed to both factories. May be unsized (`str`, `[T]`).
/// - `S`: sub-key derived from `(key, parameter)`, compared by value.
/// - `V`: cached value, handed out as `Arc<V>` and compared by identity.
/// - `E`: error type of the value factory.
pub struct WeakCache<K, P: ?Sized, S, V, E, H = ahash::RandomState> {
  pub(crate) shared: Arc<CacheShared<K, P, S, V, E, H>>,
}

impl<K, P, S, V, E> WeakCache<K, P, S, V, E>
where
  P: ?Sized,
  S: Eq + Hash + Clone,
{
  /// Creates a cache with default settings from its two factories.
  ///
  /// `sub_key_factory` derives the sub-key for a `(key, parameter)` pair and
  /// runs on every `get`. `value_factory` computes the value for a slot and
  /// runs at most once per slot at a time; returning `Ok(None)` is reported
  /// to the caller as [`CacheError::NoValue`].
  pub fn new<SF, VF>(sub_key_factory: SF, value_factory: VF) -> Self
  where
    SF: Fn(Option<&K>, &P) -> S + Send + Sync + 'static,
    VF: Fn(Option<&K>, &P) -> Result<Option<V>, E> + Send + Sync + 'static,
  {
    WeakCacheBuilder::new().build_with(Arc::new(sub_key_factory), Arc::new(value_factory))
  }

  /// Returns a builder for configuring a cache.
  pub fn builder() -> WeakCacheBuilder<K, P, S, V, E> {
    WeakCacheBuilder::new()
  }
}

impl<K, P, S, V, E, H> WeakCache<K, P, S, V, E, H>
where
  P: ?Sized,
  S: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  /// Returns the value for `(key, parameter)`, computing it if needed.
  ///
  /// `None` stands for "no key"; those entries are never reclaimed.
  ///
  /// If another thread is already computing the same slot, this blocks until
  /// it finishes and then returns its value. If that computation fails, this
  /// call retries and may compute the value itself. A failure of the value
  /// factory is returned only to the caller that ran it, and leaves the slot
  /// empty for the next caller.
  ///
  /// The value factory must not call `get` for the slot it is computing;
  /// doing so returns [`CacheError::Recursive`].
  pub fn get(&self, key: Option<&KeyHandle<K>>, parameter: &P) -> Result<Arc<V>, CacheError<E>> {
    self.shared.get(key, parameter)
  }

  /// Returns `true` if this exact value (by identity, not `==`) is cached.
  pub fn contains_value(&self, value: &Arc<V>) -> bool {
    self.shared.contains_value(value)
  }

  /// Returns the number of values currently cached.
  ///
  /// This is a snapshot; with `ValueRetention::Weak` it may still count
  /// values whose callers have dropped them but whose slot was not yet
  /// recomputed or reclaimed.
  pub fn size(&self) -> usize {
    self.shared.size()
  }

  /// Returns `true` if [`size`](Self::size) is zero.
  pub fn is_empty(&self) -> bool {
    self.size() == 0
  }

  /// Returns a snapshot of the cache's counters.
  pub fn metrics(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }
}

impl<K, P: ?Sized, S, V, E, H> Clone for WeakCache<K, P, S, V, E, H> {
  fn clone(&self) -> Self {
    Self {
      shared: Arc::clone(&self.shared),
    }
  }
}

impl<K, P: ?Sized, S, V, E, H: BuildHasher + Clone> fmt::Debug for WeakCache<K, P, S, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WeakCache")
      .field("shared", &self.shared)
      .finish()
  }
}
