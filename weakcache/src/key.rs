use crate::reclaim::ReclaimQueue;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

// 0 is reserved for the null-key sentinel.
static NEXT_KEY_ID: AtomicU64 = AtomicU64::new(1);

/// The identity of a key, unique for the lifetime of the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyId(pub(crate) u64);

impl KeyId {
  pub(crate) const NULL: KeyId = KeyId(0);

  fn next() -> Self {
    KeyId(NEXT_KEY_ID.fetch_add(1, Ordering::Relaxed))
  }

  /// Returns the raw identity number.
  pub fn as_u64(&self) -> u64 {
    self.0
  }
}

impl fmt::Display for KeyId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

pub(crate) struct KeyInner<K> {
  id: KeyId,
  value: K,
  /// Reclamation queues of every cache that holds an entry for this key.
  watchers: Mutex<Vec<Weak<ReclaimQueue>>>,
}

impl<K> Drop for KeyInner<K> {
  fn drop(&mut self) {
    // Runs once the last `KeyHandle` is gone. Only queues are touched here,
    // never a cache map, so this is safe to run under any map guard.
    for watcher in self.watchers.get_mut().drain(..) {
      if let Some(queue) = watcher.upgrade() {
        queue.push(self.id);
      }
    }
  }
}

/// A shared handle to a cache key, compared by identity.
///
/// A `WeakCache` only holds a weak reference to the key. Once every clone of
/// the handle has been dropped, each cache that stored entries for it is
/// notified, and those entries are discarded on the cache's next operation.
///
/// Two handles are equal only if one is a clone of the other. The key type's
/// own `Eq`/`Hash` are never consulted.
pub struct KeyHandle<K> {
  inner: Arc<KeyInner<K>>,
}

impl<K> KeyHandle<K> {
  /// Wraps `value` in a new handle with a fresh identity.
  pub fn new(value: K) -> Self {
    Self {
      inner: Arc::new(KeyInner {
        id: KeyId::next(),
        value,
        watchers: Mutex::new(Vec::new()),
      }),
    }
  }

  /// Returns this key's identity.
  #[inline]
  pub fn id(&self) -> KeyId {
    self.inner.id
  }

  /// Returns `true` if both handles refer to the same key.
  #[inline]
  pub fn ptr_eq(this: &Self, other: &Self) -> bool {
    Arc::ptr_eq(&this.inner, &other.inner)
  }

  /// Returns the number of live handles to this key.
  pub fn handle_count(this: &Self) -> usize {
    Arc::strong_count(&this.inner)
  }

  /// Registers a cache's reclamation queue to be told when this key dies.
  pub(crate) fn watch(&self, queue: &Arc<ReclaimQueue>) {
    let mut watchers = self.inner.watchers.lock();
    // Drop registrations of caches that no longer exist.
    watchers.retain(|w| w.strong_count() > 0);
    watchers.push(Arc::downgrade(queue));
  }

  pub(crate) fn downgrade(&self) -> Weak<KeyInner<K>> {
    Arc::downgrade(&self.inner)
  }
}

impl<K> Clone for KeyHandle<K> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<K> Deref for KeyHandle<K> {
  type Target = K;

  #[inline]
  fn deref(&self) -> &K {
    &self.inner.value
  }
}

impl<K> PartialEq for KeyHandle<K> {
  fn eq(&self, other: &Self) -> bool {
    KeyHandle::ptr_eq(self, other)
  }
}

impl<K> Eq for KeyHandle<K> {}

impl<K> Hash for KeyHandle<K> {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.inner.id.hash(state);
  }
}

impl<K: fmt::Debug> fmt::Debug for KeyHandle<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("KeyHandle")
      .field("id", &self.inner.id)
      .field("value", &self.inner.value)
      .finish()
  }
}

/// The outer-map key: a weak, identity-compared reference to a `KeyHandle`,
/// or the sentinel standing in for "no key".
///
/// Equality and hashing only look at the identity number, so a wrapped key
/// whose referent is gone still equals only itself.
pub(crate) enum WrappedKey<K> {
  Null,
  Key { id: KeyId, referent: Weak<KeyInner<K>> },
}

impl<K> WrappedKey<K> {
  pub(crate) fn new(key: Option<&KeyHandle<K>>) -> Self {
    match key {
      None => WrappedKey::Null,
      Some(handle) => WrappedKey::Key {
        id: handle.id(),
        referent: handle.downgrade(),
      },
    }
  }

  #[inline]
  pub(crate) fn id(&self) -> KeyId {
    match self {
      WrappedKey::Null => KeyId::NULL,
      WrappedKey::Key { id, .. } => *id,
    }
  }

  /// `false` once every handle to the key has been dropped. The null
  /// sentinel is always alive.
  pub(crate) fn is_alive(&self) -> bool {
    match self {
      WrappedKey::Null => true,
      WrappedKey::Key { referent, .. } => referent.strong_count() > 0,
    }
  }
}

impl<K> PartialEq for WrappedKey<K> {
  fn eq(&self, other: &Self) -> bool {
    self.id() == other.id()
  }
}

impl<K> Eq for WrappedKey<K> {}

// Must hash exactly like `KeyId` for the `Borrow` impl below.
impl<K> Hash for WrappedKey<K> {
  fn hash<H: Hasher>(&self, state: &mut H) {
    self.id().hash(state);
  }
}

impl<K> std::borrow::Borrow<KeyId> for WrappedKey<K> {
  fn borrow(&self) -> &KeyId {
    match self {
      WrappedKey::Null => &KeyId::NULL,
      WrappedKey::Key { id, .. } => id,
    }
  }
}

impl<K> fmt::Debug for WrappedKey<K> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      WrappedKey::Null => write!(f, "WrappedKey(null)"),
      WrappedKey::Key { id, .. } => f
        .debug_struct("WrappedKey")
        .field("id", id)
        .field("alive", &self.is_alive())
        .finish(),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_handles_compare_by_identity() {
    let a = KeyHandle::new("same".to_string());
    let b = KeyHandle::new("same".to_string());
    let a2 = a.clone();

    assert_eq!(*a, *b);
    assert_ne!(a, b);
    assert_eq!(a, a2);
    assert_eq!(a.id(), a2.id());
    assert_eq!(KeyHandle::handle_count(&a), 2);
  }

  #[test]
  fn test_dropping_last_handle_notifies_watchers() {
    let queue = Arc::new(ReclaimQueue::new());
    let key = KeyHandle::new(7u32);
    let id = key.id();
    key.watch(&queue);

    let clone = key.clone();
    drop(key);
    assert!(queue.is_empty(), "a live clone must keep the key alive");

    drop(clone);
    assert_eq!(queue.drain(), vec![id]);
  }

  #[test]
  fn test_dead_wrapped_key_equals_only_itself() {
    let key = KeyHandle::new(1u8);
    let wrapped = WrappedKey::new(Some(&key));
    let same = WrappedKey::new(Some(&key));
    drop(key);

    assert!(!wrapped.is_alive());
    assert_eq!(wrapped, same);

    let other = KeyHandle::new(1u8);
    assert_ne!(wrapped, WrappedKey::new(Some(&other)));
    assert_ne!(wrapped, WrappedKey::<u8>::Null);
  }

  #[test]
  fn test_null_sentinel() {
    let null = WrappedKey::<String>::new(None);
    assert!(null.is_alive());
    assert_eq!(null.id(), KeyId::NULL);
    assert_eq!(null, WrappedKey::Null);
  }
}
