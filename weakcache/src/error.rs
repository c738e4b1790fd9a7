use thiserror::Error;

/// Errors that can occur when building a cache.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BuildError {
  /// No function deriving sub-keys from `(key, parameter)` was configured.
  #[error("a sub-key factory is required")]
  MissingSubKeyFactory,
  /// No function computing values from `(key, parameter)` was configured.
  #[error("a value factory is required")]
  MissingValueFactory,
  /// The cache was configured with zero shards, which is not allowed.
  #[error("shard count cannot be zero")]
  ZeroShards,
}

/// Errors returned by `WeakCache::get`.
///
/// None of them leave anything behind in the cache: the next caller for the
/// same slot starts a fresh computation.
#[derive(Debug, Error)]
pub enum CacheError<E> {
  /// The value factory failed. The error is passed through unchanged.
  #[error("value computation failed: {0}")]
  Compute(E),
  /// The value factory completed without producing a value.
  #[error("value factory produced no value")]
  NoValue,
  /// The value factory asked the cache for the slot it was computing.
  #[error("value factory re-entered the cache for the slot it is computing")]
  Recursive,
}

impl<E> CacheError<E> {
  /// Returns the value factory's error, if that is what this is.
  pub fn into_compute(self) -> Option<E> {
    match self {
      CacheError::Compute(e) => Some(e),
      _ => None,
    }
  }
}
