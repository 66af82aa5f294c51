//! Availability tracking and background recovery tests.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use reservoir::{Pool, PoolConfig, PoolError};
use reservoir_testing::{MockCounters, MockPolicy};

fn fast_check() -> PoolConfig {
    PoolConfig::new()
        .pool_size(4)
        .check_available_interval(Duration::from_millis(20))
}

fn pool_with(config: PoolConfig) -> Arc<Pool<MockPolicy>> {
    reservoir_testing::init_tracing();
    Arc::new(Pool::new(MockPolicy::new(config)).expect("valid config"))
}

fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

// =============================================================================
// Failure Streak
// =============================================================================

#[test]
fn test_three_creation_failures_make_pool_unavailable() {
    let pool = pool_with(fast_check());
    pool.policy().set_backend_down(true);

    for _ in 0..3 {
        let err = pool.acquire().unwrap_err();
        assert!(matches!(err, PoolError::Creation(_)), "{err:?}");
    }
    assert!(!pool.is_available());
    assert_eq!(
        MockCounters::get(&pool.policy().counters().unavailable_events),
        1
    );

    match pool.acquire() {
        Err(PoolError::Unavailable { pool: name, cause }) => {
            assert_eq!(name, "mock pool");
            assert_eq!(cause, "backend down");
        }
        other => panic!("expected Unavailable, got {other:?}"),
    }
    assert_eq!(pool.status().total, 0);

    pool.policy().set_backend_down(false);
    wait_for(|| pool.is_available());

    assert_eq!(
        MockCounters::get(&pool.policy().counters().available_events),
        1
    );
    assert!(pool.acquire().is_ok());
}

#[test]
fn test_success_resets_failure_streak() {
    let pool = pool_with(fast_check());

    for _ in 0..3 {
        pool.policy().fail_next_creates(2);
        assert!(pool.acquire().is_err());
        assert!(pool.acquire().is_err());
        // Detach so the next round has to create again.
        pool.acquire().unwrap().detach();
        assert_eq!(pool.monitor().failure_streak(), 0);
    }
    assert!(pool.is_available());
}

#[test]
fn test_custom_failure_threshold() {
    let pool = pool_with(fast_check().failure_threshold(1));
    pool.policy().fail_next_creates(1);

    assert!(matches!(pool.acquire(), Err(PoolError::Creation(_))));
    assert!(!pool.is_available());
}

#[test]
fn test_validation_failures_count_toward_streak() {
    let pool = pool_with(fast_check().failure_threshold(1).test_on_checkout(true));
    drop(pool.acquire().unwrap());
    pool.policy().set_valid(false);

    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, PoolError::Unavailable { .. }), "{err:?}");
    assert_eq!(pool.status().total, 0);
}

#[test]
fn test_validation_failures_ignored_when_disabled() {
    let pool = pool_with(
        fast_check()
            .failure_threshold(1)
            .test_on_checkout(true)
            .count_validation_failures(false),
    );
    drop(pool.acquire().unwrap());
    pool.policy().set_valid(false);

    let lease = pool.acquire().unwrap();
    assert_eq!(lease.id, 1);
    assert!(pool.is_available());
}

// =============================================================================
// Forced Transitions
// =============================================================================

#[test]
fn test_set_unavailable_reports_single_transition() {
    let pool = pool_with(PoolConfig::new());

    let callers: Vec<_> = (0..8)
        .map(|i| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.set_unavailable(&format!("caller {i}")))
        })
        .collect();
    let flips = callers
        .into_iter()
        .map(|c| c.join().unwrap())
        .filter(|flipped| *flipped)
        .count();

    assert_eq!(flips, 1);
    assert_eq!(
        MockCounters::get(&pool.policy().counters().unavailable_events),
        1
    );
    assert!(pool.monitor().unavailable_since().is_some());
}

#[test]
fn test_queued_callers_fail_fast_when_pool_goes_down() {
    let pool = pool_with(PoolConfig::new().pool_size(1).failure_threshold(1));
    let held = pool.acquire().unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || pool.acquire_timeout(Duration::from_secs(5)).map(|l| l.id))
        })
        .collect();
    wait_for(|| pool.status().waiting == 3);

    pool.policy().set_backend_down(true);
    pool.policy().set_create_delay(Duration::from_millis(100));
    let started = Instant::now();
    assert!(pool.set_unavailable("backend down"));
    held.detach();

    for waiter in waiters {
        let result = waiter.join().unwrap();
        assert!(
            matches!(result, Err(PoolError::Unavailable { .. })),
            "{result:?}"
        );
    }
    // Nobody waited on the dead backend.
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(MockCounters::get(&pool.policy().counters().created), 1);
    assert_eq!(pool.status().total, 0);
    assert_eq!(pool.status().waiting, 0);
}

#[test]
fn test_creation_failure_trip_fails_queued_callers() {
    let pool = pool_with(PoolConfig::new().pool_size(2).failure_threshold(1));
    let _a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire_timeout(Duration::from_secs(5)).map(|_| ()))
    };
    wait_for(|| pool.status().waiting == 1);

    // The freed slot goes to the waiter, whose creation trips the pool.
    pool.policy().set_backend_down(true);
    b.detach();
    assert!(matches!(waiter.join().unwrap(), Err(PoolError::Creation(_))));
    assert!(!pool.is_available());
    assert_eq!(pool.status().in_use, 1);
}

#[test]
fn test_recovery_requires_valid_probe() {
    let pool = pool_with(fast_check());
    pool.policy().set_valid(false);
    assert!(pool.set_unavailable("maintenance"));

    thread::sleep(Duration::from_millis(150));
    assert!(!pool.is_available());
    assert!(MockCounters::get(&pool.policy().counters().validated) > 0);
    // Probe resources are never tracked by the pool.
    assert_eq!(pool.status().total, 0);

    pool.policy().set_valid(true);
    wait_for(|| pool.is_available());
    assert!(pool.monitor().outage().is_none());
}

#[test]
fn test_outstanding_leases_survive_outage() {
    let pool = pool_with(fast_check());
    let held = pool.acquire().unwrap();
    pool.policy().set_backend_down(true);
    pool.set_unavailable("network partition");

    // Returning during an outage still re-idles the resource.
    drop(held);
    assert_eq!(pool.status().idle, 1);
    assert!(matches!(pool.try_acquire(), Err(PoolError::Unavailable { .. })));

    pool.policy().set_backend_down(false);
    wait_for(|| pool.is_available());
    assert_eq!(pool.acquire().unwrap().id, 0);
}
