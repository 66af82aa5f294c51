//! Scriptable pool policy.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use reservoir::{Handle, PolicyError, PoolConfig, PoolPolicy};

/// Resource produced by [`MockPolicy`].
#[derive(Debug, PartialEq, Eq)]
pub struct MockResource {
    /// Creation order, starting at zero.
    pub id: u32,
    /// Times a borrower used the resource, for tests that mutate it.
    pub uses: u32,
}

/// Lifecycle counters recorded by [`MockPolicy`].
#[derive(Debug, Default)]
pub struct MockCounters {
    /// Successful `create` calls.
    pub created: AtomicUsize,
    /// `destroy` calls.
    pub destroyed: AtomicUsize,
    /// `validate` calls, including those made through `validate_async`.
    pub validated: AtomicUsize,
    /// `create_async` calls.
    pub async_creates: AtomicUsize,
    /// `validate_async` calls.
    pub async_validations: AtomicUsize,
    /// Successful lend hooks.
    pub lent: AtomicUsize,
    /// Return hooks.
    pub returned: AtomicUsize,
    /// Timeout notifications.
    pub timeouts: AtomicUsize,
    /// Available notifications.
    pub available_events: AtomicUsize,
    /// Unavailable notifications.
    pub unavailable_events: AtomicUsize,
    /// Resources lent while already on loan.
    pub double_lends: AtomicUsize,
}

impl MockCounters {
    /// Read a counter.
    #[must_use]
    pub fn get(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

/// A [`PoolPolicy`] whose behavior tests can change at runtime.
///
/// All switches are atomics so they can be flipped through
/// [`Pool::policy`](reservoir::Pool::policy) while the pool is in use.
#[derive(Debug)]
pub struct MockPolicy {
    name: String,
    config: PoolConfig,
    counters: MockCounters,
    next_id: AtomicU32,
    create_failures: AtomicUsize,
    backend_down: AtomicBool,
    valid: AtomicBool,
    lend_failures: AtomicUsize,
    return_fails: AtomicBool,
    create_delay: Mutex<Duration>,
    lend_delay: Mutex<Duration>,
    validate_delay: Mutex<Duration>,
    on_loan: Mutex<HashSet<u32>>,
}

impl MockPolicy {
    /// Create a policy with the given configuration.
    #[must_use]
    pub fn new(config: PoolConfig) -> Self {
        Self {
            name: "mock pool".to_string(),
            config,
            counters: MockCounters::default(),
            next_id: AtomicU32::new(0),
            create_failures: AtomicUsize::new(0),
            backend_down: AtomicBool::new(false),
            valid: AtomicBool::new(true),
            lend_failures: AtomicUsize::new(0),
            return_fails: AtomicBool::new(false),
            create_delay: Mutex::new(Duration::ZERO),
            lend_delay: Mutex::new(Duration::ZERO),
            validate_delay: Mutex::new(Duration::ZERO),
            on_loan: Mutex::new(HashSet::new()),
        }
    }

    /// Set the pool name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Lifecycle counters.
    #[must_use]
    pub fn counters(&self) -> &MockCounters {
        &self.counters
    }

    /// Resources created and not yet destroyed.
    #[must_use]
    pub fn live(&self) -> usize {
        MockCounters::get(&self.counters.created)
            .saturating_sub(MockCounters::get(&self.counters.destroyed))
    }

    /// Fail the next `n` creations.
    pub fn fail_next_creates(&self, n: usize) {
        self.create_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every creation while `down` is set.
    pub fn set_backend_down(&self, down: bool) {
        self.backend_down.store(down, Ordering::SeqCst);
    }

    /// Set the result of `validate`.
    pub fn set_valid(&self, valid: bool) {
        self.valid.store(valid, Ordering::SeqCst);
    }

    /// Fail the next `n` lend hooks.
    pub fn fail_next_lends(&self, n: usize) {
        self.lend_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every return hook while `fail` is set.
    pub fn fail_returns(&self, fail: bool) {
        self.return_fails.store(fail, Ordering::SeqCst);
    }

    /// Sleep this long inside every `create`.
    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock() = delay;
    }

    /// Sleep this long inside every async lend hook.
    pub fn set_lend_delay(&self, delay: Duration) {
        *self.lend_delay.lock() = delay;
    }

    /// Sleep this long inside every async validation.
    pub fn set_validate_delay(&self, delay: Duration) {
        *self.validate_delay.lock() = delay;
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait::async_trait]
impl PoolPolicy for MockPolicy {
    type Resource = MockResource;

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn create(&self) -> Result<MockResource, PolicyError> {
        let delay = *self.create_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        if self.backend_down.load(Ordering::SeqCst) {
            return Err(PolicyError::new("backend down"));
        }
        if Self::take_failure(&self.create_failures) {
            return Err(PolicyError::new("injected create failure"));
        }
        self.counters.created.fetch_add(1, Ordering::SeqCst);
        Ok(MockResource {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            uses: 0,
        })
    }

    async fn create_async(&self) -> Result<MockResource, PolicyError> {
        self.counters.async_creates.fetch_add(1, Ordering::SeqCst);
        self.create()
    }

    fn destroy(&self, resource: MockResource) {
        self.on_loan.lock().remove(&resource.id);
        self.counters.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn validate(&self, _resource: &mut MockResource) -> bool {
        self.counters.validated.fetch_add(1, Ordering::SeqCst);
        self.valid.load(Ordering::SeqCst)
    }

    async fn validate_async(&self, resource: &mut MockResource) -> bool {
        self.counters.async_validations.fetch_add(1, Ordering::SeqCst);
        let delay = *self.validate_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.validate(resource)
    }

    fn on_lend(&self, handle: &mut Handle<MockResource>) -> Result<(), PolicyError> {
        if Self::take_failure(&self.lend_failures) {
            return Err(PolicyError::new("injected lend failure"));
        }
        if !self.on_loan.lock().insert(handle.resource().id) {
            self.counters.double_lends.fetch_add(1, Ordering::SeqCst);
        }
        self.counters.lent.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_lend_async(&self, handle: &mut Handle<MockResource>) -> Result<(), PolicyError> {
        let delay = *self.lend_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.on_lend(handle)
    }

    fn on_return(&self, handle: &mut Handle<MockResource>) -> Result<(), PolicyError> {
        self.on_loan.lock().remove(&handle.resource().id);
        self.counters.returned.fetch_add(1, Ordering::SeqCst);
        if self.return_fails.load(Ordering::SeqCst) {
            return Err(PolicyError::new("injected return failure"));
        }
        Ok(())
    }

    fn on_acquire_timeout(&self) {
        self.counters.timeouts.fetch_add(1, Ordering::SeqCst);
    }

    fn on_available(&self) {
        self.counters.available_events.fetch_add(1, Ordering::SeqCst);
    }

    fn on_unavailable(&self) {
        self.counters.unavailable_events.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_injected_create_failures_are_consumed() {
        let policy = MockPolicy::new(PoolConfig::new());
        policy.fail_next_creates(2);
        assert!(policy.create().is_err());
        assert!(policy.create().is_err());
        let resource = policy.create().unwrap();
        assert_eq!(resource.id, 0);
        assert_eq!(policy.live(), 1);
    }

    #[test]
    fn test_backend_down_fails_every_create() {
        let policy = MockPolicy::new(PoolConfig::new());
        policy.set_backend_down(true);
        for _ in 0..5 {
            assert!(policy.create().is_err());
        }
        policy.set_backend_down(false);
        assert!(policy.create().is_ok());
    }

    #[test]
    fn test_destroy_counts() {
        let policy = MockPolicy::new(PoolConfig::new());
        let resource = policy.create().unwrap();
        policy.destroy(resource);
        assert_eq!(policy.live(), 0);
        assert_eq!(MockCounters::get(&policy.counters().destroyed), 1);
    }
}
