use booking_engine::clock::SystemClock;
use booking_engine::model::{Hold, HoldStatus};
use booking_engine::store::{ReservationStore, StoreConfig};
use chrono::Utc;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::{seq::SliceRandom, thread_rng, Rng};
use std::sync::Arc;
use std::thread;

fn hold(offer_key: &str) -> Hold {
    let now = Utc::now();
    Hold {
        offer_key: offer_key.to_string(),
        token: format!("tok-{offer_key}"),
        locked_price: 84.82,
        currency: "GBP".to_string(),
        created_at: now,
        expires_at: now + chrono::Duration::minutes(30),
        status: HoldStatus::Active,
    }
}

// Read-heavy contention over the hold cache, the hot path of every
// RequestHold call.
pub fn store_benchmark(c: &mut Criterion) {
    let mut group = c.benchmark_group("reservation_store");

    for max_entries in [1_000usize, 10_000, 100_000].iter() {
        group.bench_with_input(
            BenchmarkId::from_parameter(max_entries),
            max_entries,
            |b, &max_entries| {
                b.iter(|| {
                    let config = StoreConfig {
                        max_entries,
                        sweep_interval_seconds: 60,
                        sweep_grace_seconds: 300,
                    };
                    let store = Arc::new(ReservationStore::new(config, Arc::new(SystemClock)));

                    let offer_keys = (0..200)
                        .map(|i| format!("hotel{}:RO:ND{}", i % 50, i))
                        .collect::<Vec<_>>();

                    let mut handles = vec![];
                    for _ in 0..4 {
                        let store = Arc::clone(&store);
                        let offer_keys = offer_keys.clone();

                        let handle = thread::spawn(move || {
                            let mut rng = thread_rng();

                            for _ in 0..250 {
                                let offer_key = offer_keys.choose(&mut rng).unwrap();

                                if rng.gen_bool(0.3) {
                                    // 30% writes
                                    let _ = store.put(hold(offer_key));
                                } else {
                                    // 70% reads
                                    let _ = store.get(offer_key);
                                }
                            }
                        });

                        handles.push(handle);
                    }

                    for handle in handles {
                        handle.join().unwrap();
                    }

                    black_box(store.stats())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, store_benchmark);
criterion_main!(benches);
