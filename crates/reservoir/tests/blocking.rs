//! Blocking acquisition tests.
//!
//! Exercise the pool through its thread-blocking API with a scriptable
//! mock policy; no external services are needed.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use reservoir::{Pool, PoolConfig, PoolError};
use reservoir_testing::{MockCounters, MockPolicy};

fn pool_with(config: PoolConfig) -> Arc<Pool<MockPolicy>> {
    reservoir_testing::init_tracing();
    Arc::new(Pool::new(MockPolicy::new(config)).expect("valid config"))
}

/// Poll until `cond` holds or five seconds pass.
fn wait_for(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "condition not reached in time");
        thread::sleep(Duration::from_millis(5));
    }
}

// =============================================================================
// Capacity and Timeouts
// =============================================================================

#[test]
fn test_acquire_times_out_when_exhausted() {
    let pool = pool_with(PoolConfig::new().pool_size(2));
    let _a = pool.acquire().unwrap();
    let _b = pool.acquire().unwrap();

    let started = Instant::now();
    let err = pool.acquire_timeout(Duration::from_millis(50)).unwrap_err();
    let waited = started.elapsed();

    assert!(matches!(err, PoolError::AcquisitionTimeout(_)), "{err:?}");
    assert!(waited >= Duration::from_millis(50), "returned after {waited:?}");
    assert!(waited < Duration::from_secs(2), "returned after {waited:?}");

    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.in_use, 2);
    assert_eq!(status.waiting, 0);
    assert_eq!(status.stats.timeouts, 1);
    assert_eq!(MockCounters::get(&pool.policy().counters().timeouts), 1);
}

#[test]
fn test_suppressed_timeout() {
    let pool = pool_with(PoolConfig::new().pool_size(1).throw_on_get_timeout(false));
    let _held = pool.acquire().unwrap();

    let err = pool.acquire_timeout(Duration::from_millis(20)).unwrap_err();
    assert!(matches!(err, PoolError::TimeoutSuppressed(_)), "{err:?}");
    assert!(err.is_timeout());
    assert_eq!(MockCounters::get(&pool.policy().counters().timeouts), 1);
}

#[test]
fn test_configured_sync_timeout_is_used() {
    let pool = pool_with(
        PoolConfig::new()
            .pool_size(1)
            .sync_get_timeout(Duration::from_millis(30)),
    );
    let _held = pool.acquire().unwrap();

    let started = Instant::now();
    assert!(pool.acquire().unwrap_err().is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(30));
}

// =============================================================================
// Validation and Lend Hooks
// =============================================================================

#[test]
fn test_invalid_resource_replaced_transparently() {
    let pool = pool_with(PoolConfig::new().pool_size(1).test_on_checkout(true));
    drop(pool.acquire().unwrap());
    assert_eq!(pool.status().idle, 1);

    pool.policy().set_valid(false);
    let lease = pool.acquire().expect("replacement lent without error");

    assert_eq!(lease.id, 1);
    let counters = pool.policy().counters();
    assert_eq!(MockCounters::get(&counters.created), 2);
    assert_eq!(MockCounters::get(&counters.destroyed), 1);
    assert_eq!(pool.status().total, 1);
}

#[test]
fn test_failed_replacement_surfaces_validation_error() {
    let pool = pool_with(PoolConfig::new().pool_size(1).test_on_checkout(true));
    drop(pool.acquire().unwrap());

    pool.policy().set_valid(false);
    pool.policy().fail_next_creates(1);
    let err = pool.acquire().unwrap_err();

    assert!(matches!(err, PoolError::Validation(_)), "{err:?}");
    assert_eq!(pool.status().total, 0);
    assert_eq!(pool.policy().live(), 0);
}

#[test]
fn test_lend_failure_retried_once() {
    let pool = pool_with(PoolConfig::new().pool_size(1));
    drop(pool.acquire().unwrap());

    pool.policy().fail_next_lends(1);
    let lease = pool.acquire().unwrap();
    assert_eq!(lease.id, 1);
    drop(lease);

    pool.policy().fail_next_lends(2);
    let err = pool.acquire().unwrap_err();
    assert!(matches!(err, PoolError::Validation(_)), "{err:?}");
    assert_eq!(pool.status().total, 0);
}

#[test]
fn test_return_hook_failure_destroys_resource() {
    let pool = pool_with(PoolConfig::new().pool_size(2));
    pool.policy().fail_returns(true);

    drop(pool.acquire().unwrap());

    let status = pool.status();
    assert_eq!(status.idle, 0);
    assert_eq!(status.total, 0);
    assert_eq!(MockCounters::get(&pool.policy().counters().destroyed), 1);
}

// =============================================================================
// Waiters
// =============================================================================

#[test]
fn test_waiter_receives_returned_resource() {
    let pool = pool_with(PoolConfig::new().pool_size(1));
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire_timeout(Duration::from_secs(5)).map(|l| l.id))
    };
    wait_for(|| pool.status().waiting == 1);

    drop(held);
    assert_eq!(waiter.join().unwrap().unwrap(), 0);
    assert_eq!(MockCounters::get(&pool.policy().counters().created), 1);
}

#[test]
fn test_waiters_served_in_arrival_order() {
    let pool = pool_with(PoolConfig::new().pool_size(1));
    let held = pool.acquire().unwrap();
    let (tx, rx) = mpsc::channel();

    let mut workers = Vec::new();
    for (i, name) in ["first", "second", "third"].into_iter().enumerate() {
        let worker_pool = Arc::clone(&pool);
        let tx = tx.clone();
        workers.push(thread::spawn(move || {
            let lease = worker_pool.acquire_timeout(Duration::from_secs(5)).unwrap();
            tx.send(name).unwrap();
            thread::sleep(Duration::from_millis(10));
            drop(lease);
        }));
        wait_for(|| pool.status().waiting == i + 1);
    }

    drop(held);
    for worker in workers {
        worker.join().unwrap();
    }
    let order: Vec<_> = rx.try_iter().collect();
    assert_eq!(order, ["first", "second", "third"]);
}

#[test]
fn test_destroyed_resource_frees_slot_for_waiter() {
    let pool = pool_with(PoolConfig::new().pool_size(1));
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire_timeout(Duration::from_secs(5)).map(|l| l.id))
    };
    wait_for(|| pool.status().waiting == 1);

    // The waiter gets a creation grant instead of the held resource.
    held.detach();
    assert_eq!(waiter.join().unwrap().unwrap(), 1);
}

#[test]
fn test_close_fails_blocked_waiters() {
    let pool = pool_with(PoolConfig::new().pool_size(1));
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = Arc::clone(&pool);
        thread::spawn(move || pool.acquire_timeout(Duration::from_secs(5)).map(|_| ()))
    };
    wait_for(|| pool.status().waiting == 1);

    pool.close();
    assert!(matches!(
        waiter.join().unwrap(),
        Err(PoolError::ShuttingDown)
    ));

    drop(held);
    assert_eq!(pool.policy().live(), 0);
    assert!(matches!(pool.try_acquire(), Err(PoolError::ShuttingDown)));
}

// =============================================================================
// Concurrency
// =============================================================================

#[test]
fn test_no_resource_lent_twice_under_contention() {
    let pool = pool_with(PoolConfig::new().pool_size(3));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = Arc::clone(&pool);
            thread::spawn(move || {
                for _ in 0..200 {
                    let mut lease = pool.acquire_timeout(Duration::from_secs(10)).unwrap();
                    lease.uses += 1;
                    let status = pool.status();
                    assert!(status.total <= status.max, "{status:?}");
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let counters = pool.policy().counters();
    assert_eq!(MockCounters::get(&counters.double_lends), 0);
    assert!(MockCounters::get(&counters.created) <= 3);
    assert_eq!(pool.status().stats.acquisitions, 1600);
    assert_eq!(pool.status().in_use, 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[test]
fn test_background_check_evicts_idle_resources() {
    let pool = pool_with(
        PoolConfig::new()
            .pool_size(2)
            .idle_timeout(Duration::from_millis(40))
            .check_available_interval(Duration::from_millis(20)),
    );
    drop(pool.acquire().unwrap());
    assert_eq!(pool.status().idle, 1);

    wait_for(|| pool.status().idle == 0);
    assert_eq!(pool.policy().live(), 0);
}

#[test]
fn test_background_check_revalidates_stale_resources() {
    let pool = pool_with(
        PoolConfig::new()
            .pool_size(2)
            .stale_after(Duration::from_millis(30))
            .check_available_interval(Duration::from_millis(20)),
    );
    drop(pool.acquire().unwrap());
    pool.policy().set_valid(false);

    // The invalid idle resource is swapped for a fresh one.
    wait_for(|| MockCounters::get(&pool.policy().counters().destroyed) >= 1);
    pool.policy().set_valid(true);
    wait_for(|| pool.status().idle == 1);
    assert!(MockCounters::get(&pool.policy().counters().created) >= 2);
    assert_eq!(pool.status().total, 1);
}

#[test]
fn test_prewarm_creates_idle_resources() {
    let pool = pool_with(PoolConfig::new().pool_size(5));
    assert_eq!(pool.prewarm(3), 3);
    assert_eq!(pool.status().idle, 3);

    pool.policy().fail_next_creates(1);
    assert_eq!(pool.prewarm(5), 4);
}

#[test]
fn test_detached_resource_is_not_tracked() {
    let pool = pool_with(PoolConfig::new().pool_size(1));
    let resource = pool.acquire().unwrap().detach();
    assert_eq!(resource.id, 0);
    assert_eq!(pool.status().total, 0);
    assert_eq!(pool.policy().live(), 1);
}

#[test]
fn test_clone_shares_pool() {
    let pool = pool_with(PoolConfig::new().pool_size(1));
    let other: Pool<MockPolicy> = (*pool).clone();
    let _held = other.acquire().unwrap();
    assert_eq!(pool.status().in_use, 1);
    assert!(pool.try_acquire().unwrap().is_none());
}
