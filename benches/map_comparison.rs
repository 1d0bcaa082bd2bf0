use std::collections::HashMap as StdHashMap;
use std::hash::BuildHasher;
use std::hint::black_box;

use criterion::BenchmarkId;
use criterion::Criterion;
use criterion::Throughput;
use criterion::criterion_group;
use criterion::criterion_main;
use hashbrown::HashMap as HashbrownHashMap;
use hop_map::HopscotchMap;
use rand::TryRngCore;
use rand::rngs::OsRng;
use siphasher::sip::SipHasher;

const SIZES: &[usize] = &[1 << 10, 1 << 15, 1 << 19];

#[derive(Clone)]
struct SipState {
    k0: u64,
    k1: u64,
}

impl SipState {
    fn random() -> Self {
        let mut rng = OsRng;
        Self {
            k0: rng.try_next_u64().unwrap(),
            k1: rng.try_next_u64().unwrap(),
        }
    }
}

impl BuildHasher for SipState {
    type Hasher = SipHasher;

    fn build_hasher(&self) -> SipHasher {
        SipHasher::new_with_keys(self.k0, self.k1)
    }
}

fn random_keys(count: usize) -> Vec<u64> {
    let mut rng = OsRng;
    (0..count).map(|_| rng.try_next_u64().unwrap()).collect()
}

fn bench_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("insert");
    let state = SipState::random();

    for &size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        let keys = random_keys(size);

        group.bench_with_input(BenchmarkId::new("hop_map", size), &keys, |b, keys| {
            b.iter(|| {
                let mut map: HopscotchMap<u64, u64, SipState> =
                    HopscotchMap::with_hasher(state.clone());
                for &key in keys {
                    map.insert(key, key);
                }
                black_box(map.len())
            })
        });

        group.bench_with_input(BenchmarkId::new("hashbrown", size), &keys, |b, keys| {
            b.iter(|| {
                let mut map = HashbrownHashMap::with_hasher(state.clone());
                for &key in keys {
                    map.insert(key, key);
                }
                black_box(map.len())
            })
        });

        group.bench_with_input(BenchmarkId::new("std", size), &keys, |b, keys| {
            b.iter(|| {
                let mut map = StdHashMap::with_hasher(state.clone());
                for &key in keys {
                    map.insert(key, key);
                }
                black_box(map.len())
            })
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let mut group = c.benchmark_group("lookup");
    let state = SipState::random();

    for &size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        let keys = random_keys(size);
        let misses = random_keys(size);

        let mut hop: HopscotchMap<u64, u64, SipState> = HopscotchMap::with_hasher(state.clone());
        let mut brown = HashbrownHashMap::with_hasher(state.clone());
        let mut std_map = StdHashMap::with_hasher(state.clone());
        for &key in &keys {
            hop.insert(key, key);
            brown.insert(key, key);
            std_map.insert(key, key);
        }

        group.bench_with_input(BenchmarkId::new("hop_map", size), &keys, |b, keys| {
            b.iter(|| {
                let mut found = 0usize;
                for (key, miss) in keys.iter().zip(&misses) {
                    found += usize::from(hop.get(key).is_some());
                    found += usize::from(hop.get(miss).is_some());
                }
                black_box(found)
            })
        });

        group.bench_with_input(BenchmarkId::new("hashbrown", size), &keys, |b, keys| {
            b.iter(|| {
                let mut found = 0usize;
                for (key, miss) in keys.iter().zip(&misses) {
                    found += usize::from(brown.get(key).is_some());
                    found += usize::from(brown.get(miss).is_some());
                }
                black_box(found)
            })
        });

        group.bench_with_input(BenchmarkId::new("std", size), &keys, |b, keys| {
            b.iter(|| {
                let mut found = 0usize;
                for (key, miss) in keys.iter().zip(&misses) {
                    found += usize::from(std_map.get(key).is_some());
                    found += usize::from(std_map.get(miss).is_some());
                }
                black_box(found)
            })
        });
    }
    group.finish();
}

fn bench_remove(c: &mut Criterion) {
    let mut group = c.benchmark_group("remove");
    let state = SipState::random();

    for &size in SIZES {
        group.throughput(Throughput::Elements(size as u64));
        let keys = random_keys(size);

        group.bench_with_input(BenchmarkId::new("hop_map", size), &keys, |b, keys| {
            b.iter_batched(
                || {
                    let mut map: HopscotchMap<u64, u64, SipState> =
                        HopscotchMap::with_hasher(state.clone());
                    for &key in keys {
                        map.insert(key, key);
                    }
                    map
                },
                |mut map| {
                    for key in keys {
                        black_box(map.remove(key));
                    }
                },
                criterion::BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("hashbrown", size), &keys, |b, keys| {
            b.iter_batched(
                || {
                    let mut map = HashbrownHashMap::with_hasher(state.clone());
                    for &key in keys {
                        map.insert(key, key);
                    }
                    map
                },
                |mut map| {
                    for key in keys {
                        black_box(map.remove(key));
                    }
                },
                criterion::BatchSize::SmallInput,
            )
        });

        group.bench_with_input(BenchmarkId::new("std", size), &keys, |b, keys| {
            b.iter_batched(
                || {
                    let mut map = StdHashMap::with_hasher(state.clone());
                    for &key in keys {
                        map.insert(key, key);
                    }
                    map
                },
                |mut map| {
                    for key in keys {
                        black_box(map.remove(key));
                    }
                },
                criterion::BatchSize::SmallInput,
            )
        });
    }
    group.finish();
}

criterion_group!(benches, bench_insert, bench_lookup, bench_remove);
criterion_main!(benches);
