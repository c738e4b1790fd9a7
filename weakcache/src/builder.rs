use crate::error::BuildError;
use crate::handle::WeakCache;
use crate::holder::ValueRetention;
use crate::listener::RemovalListener;
use crate::metrics::Metrics;
use crate::reclaim::ReclaimQueue;
use crate::shared::{CacheShared, SubKeyFactory, ValueFactory};

use core::fmt;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use dashmap::DashMap;

/// Default shard count for the per-key sub-key maps. Most keys only ever
/// see a handful of sub-keys.
const DEFAULT_SUB_KEY_SHARDS: usize = 4;

/// A builder for creating `WeakCache` instances.
pub struct WeakCacheBuilder<K, P: ?Sized, S, V, E, H = ahash::RandomState> {
  shards: usize,
  sub_key_shards: usize,
  hasher: H,
  retention: ValueRetention,
  sub_key_factory: Option<SubKeyFactory<K, P, S>>,
  value_factory: Option<ValueFactory<K, P, V, E>>,
  listener: Option<Arc<dyn RemovalListener<S, V>>>,
}

// Manual Debug implementation for WeakCacheBuilder.
impl<K, P: ?Sized, S, V, E, H> fmt::Debug for WeakCacheBuilder<K, P, S, V, E, H> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WeakCacheBuilder")
      .field("shards", &self.shards)
      .field("sub_key_shards", &self.sub_key_shards)
      .field("retention", &self.retention)
      .field("has_sub_key_factory", &self.sub_key_factory.is_some())
      .field("has_value_factory", &self.value_factory.is_some())
      .field("has_listener", &self.listener.is_some())
      .finish_non_exhaustive()
  }
}

// --- Default Constructor ---
impl<K, P: ?Sized, S, V, E> WeakCacheBuilder<K, P, S, V, E> {
  /// Creates a new `WeakCacheBuilder` with default settings.
  pub fn new() -> Self {
    Self::with_hasher(ahash::RandomState::new())
  }
}

impl<K, P: ?Sized, S, V, E> Default for WeakCacheBuilder<K, P, S, V, E> {
  fn default() -> Self {
    Self::new()
  }
}

// --- General Configuration Methods ---
impl<K, P: ?Sized, S, V, E, H> WeakCacheBuilder<K, P, S, V, E, H> {
  /// Creates a new `WeakCacheBuilder` that hashes with `hasher`.
  pub fn with_hasher(hasher: H) -> Self {
    Self {
      shards: (num_cpus::get() * 4).max(1).next_power_of_two(),
      sub_key_shards: DEFAULT_SUB_KEY_SHARDS,
      hasher,
      retention: ValueRetention::default(),
      sub_key_factory: None,
      value_factory: None,
      listener: None,
    }
  }

  /// Sets the function deriving a sub-key from `(key, parameter)`.
  ///
  /// It runs on every `get`, so it should be cheap.
  pub fn sub_key_factory<F>(mut self, f: F) -> Self
  where
    F: Fn(Option<&K>, &P) -> S + Send + Sync + 'static,
  {
    self.sub_key_factory = Some(Arc::new(f));
    self
  }

  /// Sets the function computing the value of a slot.
  ///
  /// Returning `Ok(None)` makes `get` fail with `CacheError::NoValue`.
  pub fn value_factory<F>(mut self, f: F) -> Self
  where
    F: Fn(Option<&K>, &P) -> Result<Option<V>, E> + Send + Sync + 'static,
  {
    self.value_factory = Some(Arc::new(f));
    self
  }

  /// Sets the number of shards of the key map and the value index.
  ///
  /// Rounded up to a power of two, with a minimum of two.
  pub fn shards(mut self, shards: usize) -> Self {
    self.shards = shards;
    self
  }

  /// Sets the number of shards of each key's sub-key map.
  ///
  /// Rounded up to a power of two, with a minimum of two.
  pub fn sub_key_shards(mut self, shards: usize) -> Self {
    self.sub_key_shards = shards;
    self
  }

  /// Sets how published values are held. Defaults to `ValueRetention::Weak`.
  pub fn value_retention(mut self, retention: ValueRetention) -> Self {
    self.retention = retention;
    self
  }

  /// Sets the listener told about every slot leaving the cache.
  pub fn removal_listener<Listener>(mut self, listener: Listener) -> Self
  where
    Listener: RemovalListener<S, V> + 'static,
  {
    self.listener = Some(Arc::new(listener));
    self
  }

  /// Sets the hasher for the cache's maps.
  pub fn hasher<H2>(self, hasher: H2) -> WeakCacheBuilder<K, P, S, V, E, H2> {
    WeakCacheBuilder {
      shards: self.shards,
      sub_key_shards: self.sub_key_shards,
      hasher,
      retention: self.retention,
      sub_key_factory: self.sub_key_factory,
      value_factory: self.value_factory,
      listener: self.listener,
    }
  }
}

// --- Build Methods ---
impl<K, P, S, V, E, H> WeakCacheBuilder<K, P, S, V, E, H>
where
  P: ?Sized,
  S: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  /// Builds a `WeakCache`.
  pub fn build(mut self) -> Result<WeakCache<K, P, S, V, E, H>, BuildError> {
    self.validate()?;
    let sub_key_factory = self
      .sub_key_factory
      .take()
      .ok_or(BuildError::MissingSubKeyFactory)?;
    let value_factory = self
      .value_factory
      .take()
      .ok_or(BuildError::MissingValueFactory)?;
    Ok(self.build_with(sub_key_factory, value_factory))
  }

  /// Central logic to construct the shared core of the cache.
  pub(crate) fn build_with(
    self,
    sub_key_factory: SubKeyFactory<K, P, S>,
    value_factory: ValueFactory<K, P, V, E>,
  ) -> WeakCache<K, P, S, V, E, H> {
    let shards = shard_amount(self.shards);
    let sub_key_shards = shard_amount(self.sub_key_shards);

    let shared = CacheShared {
      map: DashMap::with_hasher_and_shard_amount(self.hasher.clone(), shards),
      reverse_index: DashMap::with_hasher_and_shard_amount(self.hasher.clone(), shards),
      reclaimed: Arc::new(ReclaimQueue::new()),
      sub_key_factory,
      value_factory,
      retention: self.retention,
      sub_key_shards,
      hasher: self.hasher,
      listener: self.listener,
      metrics: Metrics::new(),
    };
    tracing::debug!(shards, sub_key_shards, retention = ?self.retention, "built weak cache");

    WeakCache {
      shared: Arc::new(shared),
    }
  }

  /// Validates the builder configuration.
  pub(crate) fn validate(&self) -> Result<(), BuildError> {
    if self.shards == 0 || self.sub_key_shards == 0 {
      return Err(BuildError::ZeroShards);
    }
    Ok(())
  }
}

/// `DashMap` requires a power of two greater than one.
#[inline]
fn shard_amount(requested: usize) -> usize {
  requested.max(2).next_power_of_two()
}
