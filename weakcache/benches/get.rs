use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::convert::Infallible;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};
use weakcache::{KeyHandle, ValueRetention, WeakCache, WeakCacheBuilder};

type BenchCache = WeakCache<u64, u64, u64, u64, Infallible>;

fn build_cache(retention: ValueRetention) -> BenchCache {
  WeakCacheBuilder::new()
    .value_retention(retention)
    .sub_key_factory(|_key: Option<&u64>, parameter: &u64| *parameter)
    .value_factory(|key: Option<&u64>, parameter: &u64| {
      Ok(Some(key.copied().unwrap_or_default() ^ parameter))
    })
    .build()
    .unwrap()
}

fn bench_get_hit(c: &mut Criterion) {
  let mut group = c.benchmark_group("get_hit");
  group.throughput(Throughput::Elements(1));

  let cache = build_cache(ValueRetention::Strong);
  let keys: Vec<KeyHandle<u64>> = (0..64).map(KeyHandle::new).collect();
  for key in &keys {
    for p in 0..16u64 {
      cache.get(Some(key), &p).unwrap();
    }
  }

  group.bench_function("single_thread", |b| {
    let mut i = 0usize;
    b.iter(|| {
      let key = &keys[i % keys.len()];
      let value = cache.get(Some(key), &((i % 16) as u64)).unwrap();
      i = i.wrapping_add(1);
      black_box(value)
    })
  });
  group.finish();
}

fn bench_get_miss_and_reclaim(c: &mut Criterion) {
  let mut group = c.benchmark_group("get_miss");
  group.throughput(Throughput::Elements(1));

  for retention in [ValueRetention::Weak, ValueRetention::Strong] {
    let cache = build_cache(retention);
    group.bench_function(BenchmarkId::from_parameter(format!("{:?}", retention)), |b| {
      let mut i = 0u64;
      b.iter(|| {
        // Every iteration uses a fresh key that is reclaimed on the next one.
        let key = KeyHandle::new(i);
        let value = cache.get(Some(&key), &i).unwrap();
        i += 1;
        black_box(value)
      })
    });
  }
  group.finish();
}

fn bench_concurrent_hits(c: &mut Criterion) {
  let mut group = c.benchmark_group("get_hit_concurrent");
  group.sample_size(20);

  for threads in [2usize, 4, 8] {
    let ops_per_thread = 10_000u64;
    group.throughput(Throughput::Elements(threads as u64 * ops_per_thread));

    let cache = build_cache(ValueRetention::Strong);
    let key = KeyHandle::new(1u64);
    for p in 0..16u64 {
      cache.get(Some(&key), &p).unwrap();
    }

    group.bench_with_input(BenchmarkId::from_parameter(threads), &threads, |b, &threads| {
      b.iter_custom(|iters| {
        let mut total = Duration::ZERO;
        for _ in 0..iters {
          let barrier = Arc::new(Barrier::new(threads + 1));
          let handles: Vec<_> = (0..threads)
            .map(|_| {
              let cache = cache.clone();
              let key = key.clone();
              let barrier = barrier.clone();
              thread::spawn(move || {
                barrier.wait();
                for i in 0..ops_per_thread {
                  black_box(cache.get(Some(&key), &(i % 16)).unwrap());
                }
              })
            })
            .collect();

          barrier.wait();
          let start = Instant::now();
          for handle in handles {
            handle.join().unwrap();
          }
          total += start.elapsed();
        }
        total
      })
    });
  }
  group.finish();
}

criterion_group!(benches, bench_get_hit, bench_get_miss_and_reclaim, bench_concurrent_hits);
criterion_main!(benches);
