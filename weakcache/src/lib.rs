//! A concurrent, single-flight memoizing cache whose entries live exactly as
//! long as their key.
//!
//! A [`WeakCache`] maps a *key* and a *parameter* to a value in two steps: a
//! sub-key factory derives a *sub-key* from `(key, parameter)`, and a value
//! factory computes the value for that `(key, sub-key)` slot the first time
//! it is requested.
//!
//! # Features
//! - **Single-flight**: concurrent requests for the same slot run the value
//!   factory at most once; the others wait for its result.
//! - **Identity semantics**: keys are [`KeyHandle`]s compared by identity,
//!   and `contains_value` compares values by identity, never by `==`.
//! - **Reclamation without removal calls**: once every clone of a key's
//!   `KeyHandle` is dropped, the cache discards that key's entries on its
//!   next operation. No background thread is involved.
//! - **Failure isolation**: a failing or panicking value factory affects only
//!   its caller and leaves the slot empty for the next one.
//! - **Observability**: counters via [`WeakCache::metrics`] and a
//!   [`RemovalListener`] hook.
//!
//! # Example
//!
//! ```
//! use std::convert::Infallible;
//! use std::sync::Arc;
//! use weakcache::{KeyHandle, WeakCache};
//!
//! let cache = WeakCache::new(
//!   |_key: Option<&String>, parameter: &str| parameter.to_string(),
//!   |key: Option<&String>, parameter: &str| {
//!     Ok::<_, Infallible>(Some(format!("{}:{}", key.map_or("-", |k| k.as_str()), parameter)))
//!   },
//! );
//!
//! let key = KeyHandle::new("A".to_string());
//! let first = cache.get(Some(&key), "x").unwrap();
//! let second = cache.get(Some(&key), "x").unwrap();
//! assert_eq!(*first, "A:x");
//! assert!(Arc::ptr_eq(&first, &second));
//!
//! drop(key);
//! assert_eq!(cache.size(), 0);
//! ```

// Public modules that form the API
pub mod builder;
pub mod error;
pub mod handle;
pub mod key;
pub mod listener;
pub mod metrics;

// Internal, crate-only modules
mod factory;
mod holder;
mod reclaim;
mod shared;
mod sweep;

// Re-export the primary user-facing types for convenience
pub use builder::WeakCacheBuilder;
pub use error::{BuildError, CacheError};
pub use handle::WeakCache;
pub use holder::ValueRetention;
pub use key::{KeyHandle, KeyId};
pub use listener::{RemovalCause, RemovalListener};
pub use metrics::MetricsSnapshot;
