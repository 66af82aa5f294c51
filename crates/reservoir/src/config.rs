//! Pool configuration.

use std::time::Duration;

use crate::error::PoolError;

/// Default number of resources a pool may hold.
pub const DEFAULT_POOL_SIZE: usize = 100;

/// Default async wait queue capacity.
pub const DEFAULT_ASYNC_GET_CAPACITY: usize = 10_000;

/// Idle time after which a handle is re-validated before it is lent out.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(60);

/// Configuration for a resource pool.
///
/// This struct is marked `#[non_exhaustive]` to allow adding new fields
/// in future minor versions without breaking changes. Use the builder
/// pattern methods or [`Default::default()`] to construct instances.
#[derive(Debug, Clone)]
#[non_exhaustive]
pub struct PoolConfig {
    /// Maximum number of resources alive at once (idle plus on loan).
    pub pool_size: usize,

    /// Time a blocking acquisition waits before timing out.
    pub sync_get_timeout: Duration,

    /// Time a resource can sit idle before it is evicted.
    ///
    /// [`Duration::ZERO`] disables idle eviction.
    pub idle_timeout: Duration,

    /// Maximum number of queued asynchronous acquisitions.
    pub async_get_capacity: usize,

    /// Whether an elapsed deadline surfaces as
    /// [`PoolError::AcquisitionTimeout`] rather than
    /// [`PoolError::TimeoutSuppressed`].
    pub throw_on_get_timeout: bool,

    /// Interval of the background maintenance pass and recovery probe.
    pub check_available_interval: Duration,

    /// Consecutive failures that mark the pool unavailable.
    pub failure_threshold: u32,

    /// Whether lend-time validation failures count toward the failure streak.
    ///
    /// Creation failures always count.
    pub count_validation_failures: bool,

    /// Whether every idle resource is validated before it is lent out.
    pub test_on_checkout: bool,

    /// Idle time after which a resource is validated before lending,
    /// even when `test_on_checkout` is off.
    pub stale_after: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            sync_get_timeout: Duration::from_secs(10),
            idle_timeout: Duration::ZERO,
            async_get_capacity: DEFAULT_ASYNC_GET_CAPACITY,
            throw_on_get_timeout: true,
            check_available_interval: Duration::from_secs(5),
            failure_threshold: 3,
            count_validation_failures: true,
            test_on_checkout: false,
            stale_after: DEFAULT_STALE_AFTER,
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of resources.
    #[must_use]
    pub fn pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the blocking acquisition timeout.
    #[must_use]
    pub fn sync_get_timeout(mut self, timeout: Duration) -> Self {
        self.sync_get_timeout = timeout;
        self
    }

    /// Set the idle eviction timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the async wait queue capacity.
    #[must_use]
    pub fn async_get_capacity(mut self, capacity: usize) -> Self {
        self.async_get_capacity = capacity;
        self
    }

    /// Choose between a raised and a suppressed timeout error.
    #[must_use]
    pub fn throw_on_get_timeout(mut self, enabled: bool) -> Self {
        self.throw_on_get_timeout = enabled;
        self
    }

    /// Set the background check interval.
    #[must_use]
    pub fn check_available_interval(mut self, interval: Duration) -> Self {
        self.check_available_interval = interval;
        self
    }

    /// Set the consecutive failure threshold.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = threshold;
        self
    }

    /// Choose whether validation failures count toward the failure streak.
    #[must_use]
    pub fn count_validation_failures(mut self, enabled: bool) -> Self {
        self.count_validation_failures = enabled;
        self
    }

    /// Enable or disable validation of every idle resource on checkout.
    #[must_use]
    pub fn test_on_checkout(mut self, enabled: bool) -> Self {
        self.test_on_checkout = enabled;
        self
    }

    /// Set the staleness threshold for lend-time validation.
    #[must_use]
    pub fn stale_after(mut self, after: Duration) -> Self {
        self.stale_after = after;
        self
    }

    /// Whether idle eviction is enabled.
    #[must_use]
    pub fn evicts_idle(&self) -> bool {
        !self.idle_timeout.is_zero()
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), PoolError> {
        if self.pool_size == 0 {
            return Err(PoolError::Configuration(
                "pool_size must be greater than 0".into(),
            ));
        }
        if self.failure_threshold == 0 {
            return Err(PoolError::Configuration(
                "failure_threshold must be greater than 0".into(),
            ));
        }
        if self.check_available_interval.is_zero() {
            return Err(PoolError::Configuration(
                "check_available_interval must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
