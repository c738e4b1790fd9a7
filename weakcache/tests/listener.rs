mod common;

use common::RecordingListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use weakcache::{KeyHandle, RemovalCause, WeakCache, WeakCacheBuilder};

fn build_listened_cache(
  listener: RecordingListener,
  fail_on: &'static str,
) -> WeakCache<String, str, String, String, String> {
  WeakCacheBuilder::new()
    .sub_key_factory(|_key: Option<&String>, parameter: &str| parameter.to_string())
    .value_factory(move |key: Option<&String>, parameter: &str| {
      if parameter == fail_on {
        return Err(format!("cannot compute {}", parameter));
      }
      Ok(Some(format!("{}:{}", key.map_or("null", |k| k.as_str()), parameter)))
    })
    .removal_listener(listener)
    .build()
    .unwrap()
}

#[test]
fn test_listener_sees_key_reclamation() {
  let listener = RecordingListener::default();
  let cache = build_listened_cache(listener.clone(), "never");
  let key = KeyHandle::new("A".to_string());

  let x = cache.get(Some(&key), "x").unwrap();
  let y = cache.get(Some(&key), "y").unwrap();
  drop(y);
  drop(key);

  assert_eq!(cache.size(), 0);

  let mut events = listener.events();
  events.sort_by(|a, b| a.0.cmp(&b.0));
  assert_eq!(
    events,
    vec![
      ("x".to_string(), Some((*x).clone()), RemovalCause::KeyReclaimed),
      // Nobody held `y` any more, so the listener only gets its sub-key.
      ("y".to_string(), None, RemovalCause::KeyReclaimed),
    ]
  );
}

#[test]
fn test_listener_sees_failures() {
  let listener = RecordingListener::default();
  let cache = build_listened_cache(listener.clone(), "bad");

  let err = cache.get(None, "bad").unwrap_err();
  assert_eq!(err.into_compute().as_deref(), Some("cannot compute bad"));

  assert_eq!(listener.events(), vec![("bad".to_string(), None, RemovalCause::Failed)]);
}

#[test]
fn test_listener_sees_cleared_values() {
  let listener = RecordingListener::default();
  let cache = build_listened_cache(listener.clone(), "never");
  let key = KeyHandle::new("A".to_string());

  drop(cache.get(Some(&key), "x").unwrap());
  assert_eq!(listener.count(RemovalCause::Cleared), 0);

  let _again = cache.get(Some(&key), "x").unwrap();
  assert_eq!(listener.events(), vec![("x".to_string(), None, RemovalCause::Cleared)]);
}

#[test]
fn test_closure_listener() {
  let removed = Arc::new(AtomicUsize::new(0));
  let cache: WeakCache<String, str, String, String, String> = WeakCacheBuilder::new()
    .sub_key_factory(|_key: Option<&String>, parameter: &str| parameter.to_string())
    .value_factory(|_key: Option<&String>, parameter: &str| Ok(Some(parameter.to_string())))
    .removal_listener({
      let removed = removed.clone();
      move |_sub_key: String, _value: Option<Arc<String>>, cause: RemovalCause| {
        assert_eq!(cause, RemovalCause::KeyReclaimed);
        removed.fetch_add(1, Ordering::SeqCst);
      }
    })
    .build()
    .unwrap();

  let key = KeyHandle::new("A".to_string());
  let _values: Vec<_> = ["a", "b", "c"]
    .iter()
    .map(|p| cache.get(Some(&key), *p).unwrap())
    .collect();
  drop(key);

  assert!(cache.is_empty());
  assert_eq!(removed.load(Ordering::SeqCst), 3);
}
