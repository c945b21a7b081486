//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the fetch and refresh behaviour of a cached value
//! against a simple model. Each case runs on its own paused-clock runtime.

use proptest::prelude::*;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::cache::{CacheConfig, CachedValue, FetchFunction, RefreshControl, RefreshPolicy};

// == Test Configuration ==
const TEST_INTERVAL_MS: u64 = 100;
// Time only moves in steps of this size, which never land on the interval.
const TEST_STEP_MS: u64 = 30;

fn run_paused<F: Future>(future: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
        .block_on(future)
}

fn counting_cache(interval: Duration, latency: Duration) -> (CachedValue<u32>, Arc<AtomicU32>) {
    let cached = CachedValue::new(CacheConfig::new(RefreshPolicy::periodic(interval)));
    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    cached
        .bind(FetchFunction::one_shot(move || {
            let counter = Arc::clone(&counter);
            async move {
                let call = counter.fetch_add(1, Ordering::SeqCst) + 1;
                tokio::time::sleep(latency).await;
                Ok(call)
            }
        }))
        .unwrap();
    (cached, calls)
}

// == Strategies ==
#[derive(Debug, Clone)]
enum CacheOp {
    Value,
    Refresh,
    Invalidate,
    Advance { steps: u64 },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => Just(CacheOp::Value),
        1 => Just(CacheOp::Refresh),
        1 => Just(CacheOp::Invalidate),
        2 => (1u64..5).prop_map(|steps| CacheOp::Advance { steps }),
    ]
}

/// What a correct cached value would hold after each operation.
#[derive(Debug, Default)]
struct Model {
    cached: Option<u32>,
    calls: u32,
    since_success_ms: u64,
}

impl Model {
    fn fetch(&mut self) -> u32 {
        self.calls += 1;
        self.cached = Some(self.calls);
        self.since_success_ms = 0;
        self.calls
    }

    fn value(&mut self) -> u32 {
        match self.cached {
            Some(value) if self.since_success_ms < TEST_INTERVAL_MS => value,
            _ => self.fetch(),
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // A value is due exactly when the full interval has elapsed since the
    // last successful fetch.
    #[test]
    fn prop_refresh_due_after_interval(
        interval_ms in 1u64..10_000,
        elapsed_ms in 0u64..20_000
    ) {
        let due = run_paused(async move {
            let (control, _actions) =
                RefreshControl::new(RefreshPolicy::periodic(Duration::from_millis(interval_ms)));
            prop_assert!(control.should_refresh(), "Never fetched must be due");

            control.record_success(Instant::now());
            tokio::time::advance(Duration::from_millis(elapsed_ms)).await;
            Ok(control.should_refresh())
        })?;

        prop_assert_eq!(due, elapsed_ms >= interval_ms);
    }

    // Any number of concurrent readers of an empty value share one fetch
    // and all see its result.
    #[test]
    fn prop_concurrent_readers_single_flight(readers in 1usize..32) {
        let (values, calls) = run_paused(async move {
            let (cached, calls) = counting_cache(Duration::from_secs(60), Duration::from_millis(50));
            let cached = Arc::new(cached);
            let handles: Vec<_> = (0..readers)
                .map(|_| {
                    let cached = Arc::clone(&cached);
                    tokio::spawn(async move { cached.value().await })
                })
                .collect();

            let mut values = Vec::with_capacity(readers);
            for handle in handles {
                values.push(handle.await.unwrap().unwrap());
            }
            (values, calls.load(Ordering::SeqCst))
        });

        prop_assert_eq!(calls, 1);
        prop_assert!(values.iter().all(|value| *value == 1));
    }

    // For any sequence of reads, refreshes, invalidations and clock moves,
    // reads return exactly what the model predicts: the cached value while
    // it is fresh, a new fetch once it is due or was invalidated.
    #[test]
    fn prop_operation_sequence_matches_model(
        ops in prop::collection::vec(cache_op_strategy(), 1..40)
    ) {
        run_paused(async move {
            let (cached, calls) =
                counting_cache(Duration::from_millis(TEST_INTERVAL_MS), Duration::ZERO);
            let mut model = Model::default();

            for op in ops {
                match op {
                    CacheOp::Value => {
                        let expected = model.value();
                        prop_assert_eq!(cached.value().await.unwrap(), expected);
                    }
                    CacheOp::Refresh => {
                        let expected = model.fetch();
                        prop_assert_eq!(cached.refresh().await.unwrap(), expected);
                    }
                    CacheOp::Invalidate => {
                        model.cached = None;
                        cached.invalidate();
                        prop_assert_eq!(cached.peek(), None);
                    }
                    CacheOp::Advance { steps } => {
                        let elapsed = steps * TEST_STEP_MS;
                        model.since_success_ms += elapsed;
                        tokio::time::advance(Duration::from_millis(elapsed)).await;
                    }
                }
                prop_assert_eq!(calls.load(Ordering::SeqCst), model.calls);
            }

            let stats = cached.stats();
            prop_assert_eq!(stats.fetches, u64::from(model.calls));
            prop_assert_eq!(stats.failures, 0);
            Ok(())
        })?;
    }
}
