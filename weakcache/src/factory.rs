//! Single-flight computation of one cache slot.

use crate::error::CacheError;
use crate::holder::{CacheValue, ValueHolder};
use crate::listener::RemovalCause;
use crate::metrics::Metrics;
use crate::shared::{CacheShared, InnerMap};

use std::cell::RefCell;
use std::collections::HashSet;
use std::hash::{BuildHasher, Hash};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

thread_local! {
  // Factories the current thread is computing. A value factory that calls
  // back into the cache for its own slot would otherwise deadlock on the
  // factory lock.
  static COMPUTING: RefCell<HashSet<usize>> = RefCell::new(HashSet::new());
}

/// A pending computation installed in a slot.
///
/// Resolving it is serialized by its own lock, so concurrent resolvers of the
/// same slot wait for the first one while other slots proceed in parallel.
#[derive(Debug, Default)]
pub(crate) struct Factory {
  lock: Mutex<()>,
}

impl Factory {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  fn serialize(&self) -> MutexGuard<'_, ()> {
    self.lock.lock()
  }
}

/// Marks a factory as being computed on this thread until dropped.
struct ComputingGuard {
  id: usize,
}

impl ComputingGuard {
  /// Returns `None` if this thread is already computing `factory`.
  fn enter(factory: &Arc<Factory>) -> Option<Self> {
    let id = Arc::as_ptr(factory) as usize;
    let inserted = COMPUTING.with(|computing| computing.borrow_mut().insert(id));
    // Built lazily: a guard that is never returned must not run its drop
    // and clear the outer computation's marker.
    inserted.then(|| Self { id })
  }
}

impl Drop for ComputingGuard {
  fn drop(&mut self) {
    COMPUTING.with(|computing| {
      computing.borrow_mut().remove(&self.id);
    });
  }
}

/// Removes the factory's slot when dropped unless disarmed. This is the
/// failure path for errors, missing values and unwinding alike.
struct SlotGuard<'a, S, V, H>
where
  S: Eq + Hash,
  H: BuildHasher + Clone,
{
  inner: &'a InnerMap<S, V, H>,
  sub_key: &'a S,
  factory: &'a Arc<Factory>,
  armed: bool,
}

impl<'a, S, V, H> SlotGuard<'a, S, V, H>
where
  S: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn disarm(mut self) {
    self.armed = false;
  }
}

impl<'a, S, V, H> Drop for SlotGuard<'a, S, V, H>
where
  S: Eq + Hash,
  H: BuildHasher + Clone,
{
  fn drop(&mut self) {
    if !self.armed {
      return;
    }
    // Tolerates the slot already being gone or taken over.
    self
      .inner
      .remove_if(self.sub_key, |_, holder| holder.is_factory(self.factory));
    if std::thread::panicking() {
      tracing::warn!("value factory panicked, slot cleared");
    }
  }
}

impl<K, P, S, V, E, H> CacheShared<K, P, S, V, E, H>
where
  P: ?Sized,
  S: Eq + Hash + Clone,
  H: BuildHasher + Clone,
{
  /// Runs the value factory for `factory`'s slot if it still owns the slot.
  ///
  /// Returns `Ok(None)` when the factory was superseded or removed while this
  /// thread waited for it; the caller must re-read the slot and retry.
  pub(crate) fn resolve_factory(
    &self,
    factory: &Arc<Factory>,
    inner: &InnerMap<S, V, H>,
    sub_key: &S,
    key: Option<&K>,
    parameter: &P,
  ) -> Result<Option<Arc<V>>, CacheError<E>> {
    let Some(_computing) = ComputingGuard::enter(factory) else {
      return Err(CacheError::Recursive);
    };
    let _serial = factory.serialize();

    // A previous resolver may have published, failed, or been replaced while
    // we were waiting for the lock.
    let still_current = inner
      .get(sub_key)
      .is_some_and(|holder| holder.is_factory(factory));
    if !still_current {
      tracing::trace!("factory no longer owns its slot, retrying");
      return Ok(None);
    }

    Metrics::record(&self.metrics.misses, 1);
    tracing::debug!("computing value");

    let guard = SlotGuard {
      inner,
      sub_key,
      factory,
      armed: true,
    };
    let value = match (self.value_factory)(key, parameter) {
      Ok(Some(value)) => Arc::new(value),
      Ok(None) => {
        drop(guard);
        self.on_failure(sub_key);
        tracing::debug!("value factory produced no value, slot cleared");
        return Err(CacheError::NoValue);
      }
      Err(e) => {
        drop(guard);
        self.on_failure(sub_key);
        tracing::debug!("value factory failed, slot cleared");
        return Err(CacheError::Compute(e));
      }
    };

    let cache_value = CacheValue::new(&value, self.retention);
    self
      .reverse_index
      .insert(cache_value.identity(), cache_value.clone());

    let published = match inner.get_mut(sub_key) {
      Some(mut slot) if slot.is_factory(factory) => {
        *slot = ValueHolder::Ready(cache_value);
        true
      }
      _ => false,
    };
    // We still hold the factory lock, so nobody else can have touched the slot.
    assert!(published, "slot was taken from its computing factory");
    guard.disarm();

    Metrics::record(&self.metrics.loads, 1);
    tracing::debug!("value published");
    Ok(Some(value))
  }

  fn on_failure(&self, sub_key: &S) {
    Metrics::record(&self.metrics.load_failures, 1);
    if let Some(listener) = &self.listener {
      listener.on_removal(sub_key.clone(), None, RemovalCause::Failed);
    }
  }
}
