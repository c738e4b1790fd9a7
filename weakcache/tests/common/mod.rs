#![allow(dead_code)]

use std::convert::Infallible;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use weakcache::{RemovalCause, RemovalListener, ValueRetention, WeakCache, WeakCacheBuilder};

pub type StringCache = WeakCache<String, str, String, String, Infallible>;

/// A cache using the parameter itself as sub-key and `"{key}:{parameter}"` as
/// value. The returned counter tracks value factory invocations.
pub fn build_string_cache() -> (StringCache, Arc<AtomicUsize>) {
  build_string_cache_with(ValueRetention::Weak)
}

pub fn build_string_cache_with(retention: ValueRetention) -> (StringCache, Arc<AtomicUsize>) {
  let computed = Arc::new(AtomicUsize::new(0));
  let cache = WeakCacheBuilder::new()
    .shards(4)
    .value_retention(retention)
    .sub_key_factory(|_key: Option<&String>, parameter: &str| parameter.to_string())
    .value_factory({
      let computed = computed.clone();
      move |key: Option<&String>, parameter: &str| {
        computed.fetch_add(1, Ordering::SeqCst);
        Ok(Some(format!("{}:{}", key.map_or("null", |k| k.as_str()), parameter)))
      }
    })
    .build()
    .unwrap();
  (cache, computed)
}

/// An error type for value factories that fail on purpose.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Boom(pub usize);

impl fmt::Display for Boom {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "boom #{}", self.0)
  }
}

/// Records every removal it is told about.
#[derive(Clone, Default)]
pub struct RecordingListener {
  pub events: Arc<Mutex<Vec<(String, Option<String>, RemovalCause)>>>,
}

impl RecordingListener {
  pub fn events(&self) -> Vec<(String, Option<String>, RemovalCause)> {
    self.events.lock().unwrap().clone()
  }

  pub fn count(&self, cause: RemovalCause) -> usize {
    self.events().iter().filter(|(_, _, c)| *c == cause).count()
  }
}

impl RemovalListener<String, String> for RecordingListener {
  fn on_removal(&self, sub_key: String, value: Option<Arc<String>>, cause: RemovalCause) {
    self
      .events
      .lock()
      .unwrap()
      .push((sub_key, value.map(|v| (*v).clone()), cause));
  }
}
