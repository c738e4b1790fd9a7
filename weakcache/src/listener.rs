use std::fmt;
use std::sync::Arc;

/// Describes why a slot left the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalCause {
  /// Every handle to the slot's key was dropped and the sweep removed it.
  KeyReclaimed,
  /// The value factory returned an error or no value.
  Failed,
  /// A weakly held value was dropped by all callers and is being recomputed.
  Cleared,
}

impl fmt::Display for RemovalCause {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      RemovalCause::KeyReclaimed => write!(f, "key reclaimed"),
      RemovalCause::Failed => write!(f, "computation failed"),
      RemovalCause::Cleared => write!(f, "value cleared"),
    }
  }
}

/// A listener that is told about every slot removed from the cache.
///
/// `value` is the published value if it is still alive. The call happens
/// synchronously on the thread performing the cache operation, after all
/// internal locks are released, so it must not block for long.
pub trait RemovalListener<S, V>: Send + Sync {
  fn on_removal(&self, sub_key: S, value: Option<Arc<V>>, cause: RemovalCause);
}

impl<S, V, F> RemovalListener<S, V> for F
where
  F: Fn(S, Option<Arc<V>>, RemovalCause) + Send + Sync,
{
  fn on_removal(&self, sub_key: S, value: Option<Arc<V>>, cause: RemovalCause) {
    self(sub_key, value, cause)
  }
}
