//! The contents of a cache slot.

use crate::factory::Factory;

use std::fmt;
use std::sync::{Arc, Weak};

/// How a published value is held by the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValueRetention {
  /// The cache holds only a weak reference. The value stays cached while
  /// some caller still holds the `Arc` returned by `get`; after that the
  /// next `get` computes it again.
  #[default]
  Weak,
  /// The cache holds the value strongly until its key is reclaimed.
  Strong,
}

/// The identity of a value: the address of its `Arc` allocation.
///
/// An address cannot be reused while any `Arc` or `Weak` to the allocation
/// is alive, and every indexed `CacheValue` holds one.
pub(crate) type ValueId = usize;

#[inline]
fn identity_of<V>(ptr: *const V) -> ValueId {
  ptr as *const () as usize
}

enum Reference<V> {
  Weak(Weak<V>),
  Strong(Arc<V>),
}

/// A published value, compared by identity.
pub(crate) struct CacheValue<V> {
  reference: Reference<V>,
}

impl<V> CacheValue<V> {
  pub(crate) fn new(value: &Arc<V>, retention: ValueRetention) -> Self {
    let reference = match retention {
      ValueRetention::Weak => Reference::Weak(Arc::downgrade(value)),
      ValueRetention::Strong => Reference::Strong(Arc::clone(value)),
    };
    Self { reference }
  }

  /// Returns the value, or `None` once it has been dropped everywhere else.
  #[inline]
  pub(crate) fn get(&self) -> Option<Arc<V>> {
    match &self.reference {
      Reference::Weak(weak) => weak.upgrade(),
      Reference::Strong(arc) => Some(Arc::clone(arc)),
    }
  }

  #[inline]
  pub(crate) fn identity(&self) -> ValueId {
    match &self.reference {
      Reference::Weak(weak) => identity_of(weak.as_ptr()),
      Reference::Strong(arc) => identity_of(Arc::as_ptr(arc)),
    }
  }

  #[inline]
  pub(crate) fn same_as(&self, other: &CacheValue<V>) -> bool {
    self.identity() == other.identity()
  }
}

impl<V> Clone for CacheValue<V> {
  fn clone(&self) -> Self {
    let reference = match &self.reference {
      Reference::Weak(weak) => Reference::Weak(Weak::clone(weak)),
      Reference::Strong(arc) => Reference::Strong(Arc::clone(arc)),
    };
    Self { reference }
  }
}

impl<V> fmt::Debug for CacheValue<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let alive = match &self.reference {
      Reference::Weak(weak) => weak.strong_count() > 0,
      Reference::Strong(_) => true,
    };
    f.debug_struct("CacheValue")
      .field("identity", &format_args!("{:#x}", self.identity()))
      .field("alive", &alive)
      .finish()
  }
}

/// A borrowed probe used to ask the reverse index about a value. Never stored.
pub(crate) struct LookupValue<'a, V>(&'a Arc<V>);

impl<'a, V> LookupValue<'a, V> {
  pub(crate) fn new(value: &'a Arc<V>) -> Self {
    Self(value)
  }

  #[inline]
  pub(crate) fn identity(&self) -> ValueId {
    identity_of(Arc::as_ptr(self.0))
  }

  /// A dead weak entry never matches, even though it still pins its address.
  pub(crate) fn matches(&self, candidate: &CacheValue<V>) -> bool {
    candidate.identity() == self.identity() && candidate.get().is_some()
  }
}

/// What an inner map stores for a sub-key.
pub(crate) enum ValueHolder<V> {
  Pending(Arc<Factory>),
  Ready(CacheValue<V>),
}

impl<V> ValueHolder<V> {
  /// Identity comparison, as used by the slot compare-and-swap.
  pub(crate) fn same_as(&self, other: &ValueHolder<V>) -> bool {
    match (self, other) {
      (ValueHolder::Pending(a), ValueHolder::Pending(b)) => Arc::ptr_eq(a, b),
      (ValueHolder::Ready(a), ValueHolder::Ready(b)) => a.same_as(b),
      _ => false,
    }
  }

  #[inline]
  pub(crate) fn is_factory(&self, factory: &Arc<Factory>) -> bool {
    matches!(self, ValueHolder::Pending(f) if Arc::ptr_eq(f, factory))
  }
}

impl<V> Clone for ValueHolder<V> {
  fn clone(&self) -> Self {
    match self {
      ValueHolder::Pending(factory) => ValueHolder::Pending(Arc::clone(factory)),
      ValueHolder::Ready(value) => ValueHolder::Ready(value.clone()),
    }
  }
}

impl<V> fmt::Debug for ValueHolder<V> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      ValueHolder::Pending(_) => write!(f, "Pending"),
      ValueHolder::Ready(value) => f.debug_tuple("Ready").field(value).finish(),
    }
  }
}
