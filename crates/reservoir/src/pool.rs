//! Resource pool implementation.

use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::availability::AvailabilityMonitor;
use crate::config::PoolConfig;
use crate::error::{PolicyError, PoolError};
use crate::handle::Handle;
use crate::policy::PoolPolicy;
use crate::waiter::{Grant, Mailbox, WaitQueue};

/// A bounded pool of resources managed by a [`PoolPolicy`].
///
/// The pool lends out at most [`PoolConfig::pool_size`] resources at a
/// time, creating them lazily. Callers that find the pool exhausted wait in
/// a single FIFO queue, either blocking their thread
/// ([`acquire`](Self::acquire)) or suspending their task
/// ([`acquire_async`](Self::acquire_async)).
///
/// Cloning a `Pool` is cheap and yields another handle to the same pool.
pub struct Pool<P: PoolPolicy> {
    inner: Arc<PoolInner<P>>,
}

impl<P: PoolPolicy> Clone for Pool<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: PoolPolicy> fmt::Debug for Pool<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pool")
            .field("name", &self.inner.policy.name())
            .field("status", &self.status())
            .finish()
    }
}

/// Status information about the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of idle resources ready for lending.
    pub idle: usize,
    /// Number of slots taken by lent, in-transit or being-created resources.
    pub in_use: usize,
    /// Idle plus in use.
    pub total: usize,
    /// Maximum allowed resources.
    pub max: usize,
    /// Callers waiting in the queue.
    pub waiting: usize,
    /// Asynchronous callers among `waiting`.
    pub async_waiting: usize,
    /// Whether the pool accepts acquisitions.
    pub is_available: bool,
    /// Lifetime counters.
    pub stats: PoolStats,
}

/// Lifetime counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Resources created, including replacements.
    pub created: u64,
    /// Resources destroyed.
    pub destroyed: u64,
    /// Successful acquisitions.
    pub acquisitions: u64,
    /// Resources returned.
    pub releases: u64,
    /// Blocking acquisitions that ran out of time.
    pub timeouts: u64,
}

#[derive(Debug, Default)]
struct Counters {
    created: AtomicU64,
    destroyed: AtomicU64,
    acquisitions: AtomicU64,
    releases: AtomicU64,
    timeouts: AtomicU64,
}

impl Counters {
    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStats {
        PoolStats {
            created: self.created.load(Ordering::Relaxed),
            destroyed: self.destroyed.load(Ordering::Relaxed),
            acquisitions: self.acquisitions.load(Ordering::Relaxed),
            releases: self.releases.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
        }
    }
}

/// Everything guarded by the pool lock.
struct PoolState<R> {
    idle: Vec<Handle<R>>,
    /// Slots held outside the idle set: lent, handed off, being checked,
    /// being created or being destroyed.
    outstanding: usize,
    on_loan: HashSet<u64>,
    waiters: WaitQueue<R>,
    next_handle_id: u64,
    closed: bool,
}

/// Wakes and stops the background thread.
#[derive(Default)]
struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Signal {
    /// Sleep for `interval`. Returns `true` once the pool is stopping.
    fn sleep(&self, interval: Duration) -> bool {
        let mut stopped = self.stopped.lock();
        if !*stopped {
            let _ = self.wake.wait_for(&mut stopped, interval);
        }
        *stopped
    }

    fn stop(&self) {
        *self.stopped.lock() = true;
        self.wake.notify_all();
    }
}

struct PoolInner<P: PoolPolicy> {
    policy: P,
    capacity: usize,
    monitor: AvailabilityMonitor,
    state: Mutex<PoolState<P::Resource>>,
    closed: AtomicBool,
    counters: Counters,
    signal: Arc<Signal>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

/// Outcome of the pre-lend checks on an idle handle.
enum Screen<R> {
    Lend(Handle<R>),
    /// Idle too long; destroyed, its slot kept for a fresh resource.
    Evicted,
    /// Failed validation; destroyed, its slot kept for one replacement.
    Rejected,
}

impl<P: PoolPolicy> Pool<P> {
    /// Create a pool for the given policy.
    ///
    /// Validates the policy's configuration and starts the background
    /// maintenance thread. No resource is created until it is needed or
    /// [`prewarm`](Self::prewarm) is called.
    pub fn new(policy: P) -> Result<Self, PoolError> {
        let config = policy.config();
        config.validate()?;
        let capacity = config.pool_size;
        let threshold = config.failure_threshold;
        let interval = config.check_available_interval;

        let inner = Arc::new(PoolInner {
            capacity,
            monitor: AvailabilityMonitor::new(threshold),
            state: Mutex::new(PoolState {
                idle: Vec::with_capacity(capacity.min(1024)),
                outstanding: 0,
                on_loan: HashSet::new(),
                waiters: WaitQueue::new(),
                next_handle_id: 0,
                closed: false,
            }),
            closed: AtomicBool::new(false),
            counters: Counters::default(),
            signal: Arc::new(Signal::default()),
            worker: Mutex::new(None),
            policy,
        });

        let weak = Arc::downgrade(&inner);
        let signal = Arc::clone(&inner.signal);
        let worker = std::thread::Builder::new()
            .name("reservoir-check".into())
            .spawn(move || {
                while !signal.sleep(interval) {
                    let Some(inner) = weak.upgrade() else { break };
                    inner.run_maintenance();
                }
            })
            .map_err(|e| {
                PoolError::Configuration(format!("failed to start background thread: {e}"))
            })?;
        *inner.worker.lock() = Some(worker);

        tracing::debug!(
            pool = inner.policy.name(),
            capacity,
            "resource pool created"
        );

        Ok(Self { inner })
    }

    /// Acquire a resource, blocking up to the configured
    /// [`sync_get_timeout`](PoolConfig::sync_get_timeout).
    pub fn acquire(&self) -> Result<Lease<P>, PoolError> {
        self.acquire_timeout(self.inner.policy.config().sync_get_timeout)
    }

    /// Acquire a resource, blocking the calling thread up to `timeout`.
    ///
    /// Returns an idle resource when one exists, creates one when the pool
    /// is below capacity, and otherwise queues behind earlier callers.
    pub fn acquire_timeout(&self, timeout: Duration) -> Result<Lease<P>, PoolError> {
        let inner = &self.inner;
        inner.check_usable()?;
        tracing::trace!(pool = inner.policy.name(), "acquiring resource");

        let deadline = Instant::now()
            .checked_add(timeout)
            .unwrap_or_else(|| Instant::now() + Duration::from_secs(86_400 * 365));

        let queued = {
            let mut state = inner.state.lock();
            if state.closed {
                return Err(PoolError::ShuttingDown);
            }
            match inner.take_grant(&mut state) {
                Some(grant) => Ok(grant),
                None => {
                    let mailbox = Arc::new(Mailbox::new());
                    let id = state.waiters.push_blocking(Arc::clone(&mailbox));
                    Err((id, mailbox))
                }
            }
        };

        let grant = match queued {
            Ok(grant) => grant,
            Err((id, mailbox)) => inner.wait_blocking(id, &mailbox, deadline, timeout)?,
        };

        let handle = inner.fulfil(grant)?;
        Ok(Lease::new(Arc::clone(inner), handle))
    }

    /// Acquire a resource without blocking.
    ///
    /// Returns `Ok(None)` when the pool is at capacity.
    pub fn try_acquire(&self) -> Result<Option<Lease<P>>, PoolError> {
        let inner = &self.inner;
        inner.check_usable()?;

        let grant = {
            let mut state = inner.state.lock();
            if state.closed {
                return Err(PoolError::ShuttingDown);
            }
            inner.take_grant(&mut state)
        };

        match grant {
            Some(grant) => {
                let handle = inner.fulfil(grant)?;
                Ok(Some(Lease::new(Arc::clone(inner), handle)))
            }
            None => Ok(None),
        }
    }

    /// Acquire a resource, suspending the calling task until one is free.
    ///
    /// Fails immediately with [`PoolError::CapacityExceeded`] when
    /// [`async_get_capacity`](PoolConfig::async_get_capacity) tasks are
    /// already queued. Cancelling `cancel`, or dropping the returned future,
    /// withdraws the request from the queue.
    pub async fn acquire_async(&self, cancel: &CancellationToken) -> Result<Lease<P>, PoolError> {
        let inner = &self.inner;
        inner.check_usable()?;
        tracing::trace!(pool = inner.policy.name(), "acquiring resource (async)");

        let queued = {
            let mut state = inner.state.lock();
            if state.closed {
                return Err(PoolError::ShuttingDown);
            }
            match inner.take_grant(&mut state) {
                Some(grant) => Ok(grant),
                None => {
                    let capacity = inner.policy.config().async_get_capacity;
                    if state.waiters.async_waiting() >= capacity {
                        tracing::debug!(
                            pool = inner.policy.name(),
                            capacity,
                            "async wait queue full"
                        );
                        return Err(PoolError::CapacityExceeded { capacity });
                    }
                    Err(state.waiters.push_async())
                }
            }
        };

        let grant = match queued {
            Ok(grant) => grant,
            Err((id, rx)) => {
                let mut wait = AsyncWait {
                    inner,
                    id,
                    rx: Some(rx),
                };
                wait.recv(cancel).await?
            }
        };

        let handle = inner.fulfil_async(grant).await?;
        Ok(Lease::new(Arc::clone(inner), handle))
    }

    /// Return a lease to the pool.
    ///
    /// Dropping a [`Lease`] does the same; this form reports misuse. A
    /// lease from another pool yields [`PoolError::InvalidReturn`] and goes
    /// back to its own pool.
    pub fn release(&self, mut lease: Lease<P>) -> Result<(), PoolError> {
        if !Arc::ptr_eq(&lease.pool, &self.inner) {
            return Err(PoolError::InvalidReturn);
        }
        match lease.handle.take() {
            Some(handle) => self.inner.check_in(handle),
            None => Err(PoolError::InvalidReturn),
        }
    }

    /// Mark the pool unavailable because of `cause`.
    ///
    /// Returns `true` if this call caused the transition; only that caller
    /// triggers the unavailable notification.
    pub fn set_unavailable(&self, cause: &str) -> bool {
        self.inner.set_unavailable(cause)
    }

    /// Whether the pool currently accepts acquisitions.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.inner.monitor.is_available()
    }

    /// The availability monitor.
    #[must_use]
    pub fn monitor(&self) -> &AvailabilityMonitor {
        &self.inner.monitor
    }

    /// Create up to `count` resources ahead of demand.
    ///
    /// Acquires up to `count` resources without waiting and returns them
    /// all, so reused idle resources count toward the total. Creation
    /// failures are skipped. Returns the number of idle resources afterwards.
    pub fn prewarm(&self, count: usize) -> usize {
        let mut warmed = Vec::with_capacity(count.min(self.inner.capacity));
        for _ in 0..count.min(self.inner.capacity) {
            match self.try_acquire() {
                Ok(Some(lease)) => warmed.push(lease),
                Ok(None) => break,
                Err(PoolError::Creation(e)) => {
                    tracing::debug!(pool = self.inner.policy.name(), error = %e, "prewarm creation failed");
                }
                Err(e) => {
                    tracing::debug!(pool = self.inner.policy.name(), error = %e, "prewarm stopped");
                    break;
                }
            }
        }
        drop(warmed);
        self.status().idle
    }

    /// Get the current pool status.
    #[must_use]
    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            idle: state.idle.len(),
            in_use: state.outstanding,
            total: state.idle.len() + state.outstanding,
            max: self.inner.capacity,
            waiting: state.waiters.len(),
            async_waiting: state.waiters.async_waiting(),
            is_available: self.inner.monitor.is_available(),
            stats: self.inner.counters.snapshot(),
        }
    }

    /// Get lifetime counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.inner.counters.snapshot()
    }

    /// Close the pool.
    ///
    /// Destroys idle resources, fails queued callers with
    /// [`PoolError::ShuttingDown`] and stops the background thread.
    /// Resources still on loan are destroyed when they come back.
    pub fn close(&self) {
        let inner = &self.inner;
        let idle = {
            let mut state = inner.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            inner.closed.store(true, Ordering::Release);
            state.waiters.close_all();
            std::mem::take(&mut state.idle)
        };

        inner.stop_worker();

        for handle in idle {
            inner.destroy(handle);
        }
        tracing::info!(pool = inner.policy.name(), "resource pool closed");
    }

    /// Check if the pool is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Get the pool configuration.
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        self.inner.policy.config()
    }

    /// Get the policy.
    #[must_use]
    pub fn policy(&self) -> &P {
        &self.inner.policy
    }
}

impl<P: PoolPolicy> PoolInner<P> {
    fn check_usable(&self) -> Result<(), PoolError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PoolError::ShuttingDown);
        }
        if !self.monitor.is_available() {
            return Err(self.unavailable_error());
        }
        Ok(())
    }

    fn unavailable_error(&self) -> PoolError {
        PoolError::Unavailable {
            pool: self.policy.name().to_string(),
            cause: self.monitor.outage_cause(),
        }
    }

    /// Reserve an idle handle or a creation slot, unless callers are queued.
    fn take_grant(&self, state: &mut PoolState<P::Resource>) -> Option<Grant<P::Resource>> {
        if !state.waiters.is_empty() {
            return None;
        }
        if let Some(handle) = state.idle.pop() {
            state.outstanding += 1;
            state.on_loan.insert(handle.id());
            return Some(Grant::Ready(handle));
        }
        if state.outstanding + state.idle.len() < self.capacity {
            state.outstanding += 1;
            return Some(Grant::Create);
        }
        None
    }

    fn wait_blocking(
        &self,
        id: u64,
        mailbox: &Mailbox<P::Resource>,
        deadline: Instant,
        timeout: Duration,
    ) -> Result<Grant<P::Resource>, PoolError> {
        if let Some(grant) = mailbox.wait_until(deadline) {
            return Ok(grant);
        }

        {
            let mut state = self.state.lock();
            // A grant may have been delivered between the timeout and the lock.
            if let Some(grant) = mailbox.take() {
                return Ok(grant);
            }
            state.waiters.remove(id);
        }

        Err(self.timed_out(timeout))
    }

    fn timed_out(&self, waited: Duration) -> PoolError {
        Counters::bump(&self.counters.timeouts);
        self.policy.on_acquire_timeout();
        tracing::debug!(pool = self.policy.name(), ?waited, "resource acquisition timed out");
        if self.policy.config().throw_on_get_timeout {
            PoolError::AcquisitionTimeout(waited)
        } else {
            PoolError::TimeoutSuppressed(waited)
        }
    }

    fn fulfil(&self, grant: Grant<P::Resource>) -> Result<Handle<P::Resource>, PoolError> {
        match grant {
            Grant::Ready(handle) => match self.screen(handle)? {
                Screen::Lend(mut handle) => match self.policy.on_lend(&mut handle) {
                    Ok(()) => Ok(self.lent(handle)),
                    Err(e) => {
                        self.lend_failed(handle, &e)?;
                        self.replace()
                    }
                },
                Screen::Evicted => self.create_and_lend(),
                Screen::Rejected => self.replace(),
            },
            Grant::Create => self.create_and_lend(),
            Grant::Closed => Err(PoolError::ShuttingDown),
            Grant::Unavailable => Err(self.unavailable_error()),
        }
    }

    async fn fulfil_async(
        &self,
        grant: Grant<P::Resource>,
    ) -> Result<Handle<P::Resource>, PoolError> {
        match grant {
            Grant::Ready(handle) => match self.screen_async(handle).await? {
                Screen::Lend(handle) => match self.lend_async(handle).await {
                    Ok(handle) => Ok(self.lent(handle)),
                    Err((handle, e)) => {
                        self.lend_failed(handle, &e)?;
                        self.replace_async().await
                    }
                },
                Screen::Evicted => self.create_and_lend_async().await,
                Screen::Rejected => self.replace_async().await,
            },
            Grant::Create => self.create_and_lend_async().await,
            Grant::Closed => Err(PoolError::ShuttingDown),
            Grant::Unavailable => Err(self.unavailable_error()),
        }
    }

    /// Idle-timeout eviction and staleness validation before lending.
    fn screen(&self, handle: Handle<P::Resource>) -> Result<Screen<P::Resource>, PoolError> {
        let Some(mut handle) = self.evict_expired(handle) else {
            return Ok(Screen::Evicted);
        };
        if !self.needs_validation(&handle) {
            return Ok(Screen::Lend(handle));
        }
        let valid = self.policy.validate(handle.resource_mut());
        self.checked(handle, valid)
    }

    async fn screen_async(
        &self,
        handle: Handle<P::Resource>,
    ) -> Result<Screen<P::Resource>, PoolError> {
        let Some(handle) = self.evict_expired(handle) else {
            return Ok(Screen::Evicted);
        };
        if !self.needs_validation(&handle) {
            return Ok(Screen::Lend(handle));
        }

        let mut guard = Reservation {
            inner: self,
            handle: Some(handle),
        };
        let valid = match guard.handle.as_mut() {
            Some(handle) => self.policy.validate_async(handle.resource_mut()).await,
            None => false,
        };
        self.checked(guard.disarm(), valid)
    }

    /// Destroy `handle` if it sat idle past the idle timeout.
    fn evict_expired(&self, handle: Handle<P::Resource>) -> Option<Handle<P::Resource>> {
        if !handle.is_idle_expired(self.policy.config().idle_timeout) {
            return Some(handle);
        }
        tracing::debug!(id = handle.id(), idle = ?handle.idle_for(), "evicting idle resource");
        self.discard(handle);
        None
    }

    fn needs_validation(&self, handle: &Handle<P::Resource>) -> bool {
        let config = self.policy.config();
        config.test_on_checkout || handle.is_stale(config.stale_after)
    }

    fn checked(
        &self,
        mut handle: Handle<P::Resource>,
        valid: bool,
    ) -> Result<Screen<P::Resource>, PoolError> {
        if !valid {
            tracing::debug!(id = handle.id(), "resource failed validation on checkout");
            self.lend_failed(handle, &PolicyError::new("resource failed validation"))?;
            return Ok(Screen::Rejected);
        }
        handle.mark_health_check();
        Ok(Screen::Lend(handle))
    }

    /// Destroy a handle whose validation or lend hook failed, keeping its slot.
    ///
    /// Errors with [`PoolError::Unavailable`] (and frees the slot) if the
    /// failure tripped the pool.
    fn lend_failed(&self, handle: Handle<P::Resource>, err: &PolicyError) -> Result<(), PoolError> {
        self.discard(handle);
        if self.policy.config().count_validation_failures && self.monitor.record_failure(err.message())
        {
            self.became_unavailable(err.message());
            self.release_slot();
            return Err(self.unavailable_error());
        }
        Ok(())
    }

    fn replace(&self) -> Result<Handle<P::Resource>, PoolError> {
        self.create_and_lend().map_err(Self::as_validation)
    }

    async fn replace_async(&self) -> Result<Handle<P::Resource>, PoolError> {
        self.create_and_lend_async()
            .await
            .map_err(Self::as_validation)
    }

    fn as_validation(err: PoolError) -> PoolError {
        match err {
            PoolError::Creation(e) => PoolError::Validation(e),
            other => other,
        }
    }

    /// Hand a reserved slot back instead of creating while the pool is down.
    fn ensure_available(&self) -> Result<(), PoolError> {
        if self.monitor.is_available() {
            return Ok(());
        }
        self.release_slot();
        Err(self.unavailable_error())
    }

    /// Create a resource in an already reserved slot and lend it.
    fn create_and_lend(&self) -> Result<Handle<P::Resource>, PoolError> {
        self.ensure_available()?;
        let mut handle = self.create_handle()?;
        match self.policy.on_lend(&mut handle) {
            Ok(()) => Ok(self.lent(handle)),
            Err(e) => Err(self.creation_failed(Some(handle), e)),
        }
    }

    async fn create_and_lend_async(&self) -> Result<Handle<P::Resource>, PoolError> {
        self.ensure_available()?;
        let handle = self.create_handle_async().await?;
        match self.lend_async(handle).await {
            Ok(handle) => Ok(self.lent(handle)),
            Err((handle, e)) => Err(self.creation_failed(Some(handle), e)),
        }
    }

    fn create_handle(&self) -> Result<Handle<P::Resource>, PoolError> {
        let created = self.policy.create();
        self.track(created)
    }

    /// Run the async create hook. If the caller's future is dropped
    /// mid-hook, the reserved slot is released.
    async fn create_handle_async(&self) -> Result<Handle<P::Resource>, PoolError> {
        let slot = SlotGuard {
            inner: self,
            armed: true,
        };
        let created = self.policy.create_async().await;
        slot.disarm();
        self.track(created)
    }

    /// Give a freshly created resource an id and put it on loan.
    fn track(
        &self,
        created: Result<P::Resource, PolicyError>,
    ) -> Result<Handle<P::Resource>, PoolError> {
        let resource = match created {
            Ok(resource) => resource,
            Err(e) => return Err(self.creation_failed(None, e)),
        };
        Counters::bump(&self.counters.created);

        let mut state = self.state.lock();
        let id = state.next_handle_id;
        state.next_handle_id += 1;
        state.on_loan.insert(id);
        drop(state);

        tracing::debug!(pool = self.policy.name(), id, "resource created");
        Ok(Handle::new(id, resource))
    }

    /// Run the async lend hook. If the caller's future is dropped
    /// mid-hook, the resource is destroyed and its slot released.
    async fn lend_async(
        &self,
        handle: Handle<P::Resource>,
    ) -> Result<Handle<P::Resource>, (Handle<P::Resource>, PolicyError)> {
        let mut guard = Reservation {
            inner: self,
            handle: Some(handle),
        };
        let result = match guard.handle.as_mut() {
            Some(handle) => self.policy.on_lend_async(handle).await,
            None => Ok(()),
        };
        let handle = guard.disarm();
        match result {
            Ok(()) => Ok(handle),
            Err(e) => Err((handle, e)),
        }
    }

    fn creation_failed(&self, handle: Option<Handle<P::Resource>>, err: PolicyError) -> PoolError {
        if let Some(handle) = handle {
            self.discard(handle);
        }
        self.release_slot();
        tracing::debug!(pool = self.policy.name(), error = %err, "resource creation failed");
        if self.monitor.record_failure(err.message()) {
            self.became_unavailable(err.message());
        }
        PoolError::Creation(err)
    }

    fn lent(&self, mut handle: Handle<P::Resource>) -> Handle<P::Resource> {
        handle.mark_checkout();
        self.monitor.reset_streak();
        Counters::bump(&self.counters.acquisitions);
        tracing::trace!(id = handle.id(), "resource lent");
        handle
    }

    fn check_in(&self, mut handle: Handle<P::Resource>) -> Result<(), PoolError> {
        if !self.state.lock().on_loan.contains(&handle.id()) {
            return Err(PoolError::InvalidReturn);
        }
        Counters::bump(&self.counters.releases);

        if let Err(e) = self.policy.on_return(&mut handle) {
            tracing::debug!(id = handle.id(), error = %e, "return hook failed, destroying resource");
            self.discard(handle);
            self.release_slot();
            return Ok(());
        }

        handle.mark_checkin();
        tracing::trace!(id = handle.id(), "resource returned");
        self.reoffer(handle);
        Ok(())
    }

    /// Put a handle held in a slot back: to the oldest waiter, else idle.
    fn reoffer(&self, handle: Handle<P::Resource>) {
        let mut state = self.state.lock();
        if state.closed {
            state.on_loan.remove(&handle.id());
            state.outstanding -= 1;
            drop(state);
            self.destroy(handle);
            return;
        }
        let id = handle.id();
        match state.waiters.hand_off(Grant::Ready(handle)) {
            Some(Grant::Ready(handle)) => {
                state.on_loan.remove(&id);
                state.outstanding -= 1;
                state.idle.push(handle);
            }
            _ => {
                state.on_loan.insert(id);
            }
        }
    }

    /// Give up a reserved slot: to the oldest waiter as a creation grant,
    /// else back to free capacity.
    fn release_slot(&self) {
        let mut state = self.state.lock();
        if state.closed || state.waiters.hand_off(Grant::Create).is_some() {
            state.outstanding -= 1;
        }
    }

    /// Destroy a handle that holds a slot, without releasing the slot.
    fn discard(&self, handle: Handle<P::Resource>) {
        self.state.lock().on_loan.remove(&handle.id());
        self.destroy(handle);
    }

    fn destroy(&self, handle: Handle<P::Resource>) {
        Counters::bump(&self.counters.destroyed);
        self.policy.destroy(handle.into_destroyed());
    }

    fn detach(&self, handle: Handle<P::Resource>) -> P::Resource {
        self.state.lock().on_loan.remove(&handle.id());
        self.release_slot();
        tracing::debug!(id = handle.id(), "resource detached from pool");
        handle.into_resource()
    }

    /// Hand back whatever an abandoned async waiter was granted.
    fn abandon(&self, grant: Grant<P::Resource>) {
        match grant {
            Grant::Ready(handle) => self.reoffer(handle),
            Grant::Create => self.release_slot(),
            Grant::Closed | Grant::Unavailable => {}
        }
    }

    fn set_unavailable(&self, cause: &str) -> bool {
        if self.monitor.set_unavailable(cause) {
            self.became_unavailable(cause);
            return true;
        }
        false
    }

    /// Fail queued callers and notify the policy.
    fn became_unavailable(&self, cause: &str) {
        let waiters = self.state.lock().waiters.fail_all(|| Grant::Unavailable);
        tracing::warn!(
            pool = self.policy.name(),
            cause,
            waiters,
            "resource pool marked unavailable; background check will probe for recovery"
        );
        self.policy.on_unavailable();
    }

    fn run_maintenance(&self) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        if self.monitor.is_available() {
            self.check_idle();
        } else {
            self.probe();
        }
    }

    /// Try a sacrificial resource; restore availability on success.
    fn probe(&self) {
        let mut resource = match self.policy.create() {
            Ok(resource) => resource,
            Err(e) => {
                tracing::debug!(pool = self.policy.name(), error = %e, "recovery probe failed");
                return;
            }
        };
        let healthy = self.policy.validate(&mut resource);
        self.policy.destroy(resource);

        if !healthy {
            tracing::debug!(pool = self.policy.name(), "recovery probe failed validation");
            return;
        }
        if self.monitor.record_success() {
            tracing::info!(pool = self.policy.name(), "resource pool available again");
            self.policy.on_available();
        }
    }

    /// Evict idle-expired handles and re-validate stale ones.
    fn check_idle(&self) {
        let config = self.policy.config();
        let (expired, stale) = {
            let mut state = self.state.lock();
            if state.idle.is_empty() {
                return;
            }
            let mut expired = Vec::new();
            let mut stale = Vec::new();
            let mut kept = Vec::with_capacity(state.idle.len());
            for handle in std::mem::take(&mut state.idle) {
                if handle.is_idle_expired(config.idle_timeout) {
                    expired.push(handle);
                } else if handle.is_stale(config.stale_after) {
                    stale.push(handle);
                } else {
                    kept.push(handle);
                }
            }
            state.idle = kept;
            // Stale handles keep their slot while they are checked.
            state.outstanding += stale.len();
            (expired, stale)
        };

        for handle in expired {
            tracing::debug!(id = handle.id(), idle = ?handle.idle_for(), "evicting idle resource");
            self.destroy(handle);
        }
        if !self.state.lock().waiters.is_empty() {
            // Capacity freed by eviction goes to queued callers.
            self.offer_free_capacity();
        }

        for mut handle in stale {
            if self.policy.validate(handle.resource_mut()) {
                handle.mark_health_check();
                self.reoffer(handle);
                continue;
            }
            tracing::debug!(id = handle.id(), "idle resource failed validation, recreating");
            self.destroy(handle);
            match self.policy.create() {
                Ok(resource) => {
                    Counters::bump(&self.counters.created);
                    let handle = {
                        let mut state = self.state.lock();
                        let id = state.next_handle_id;
                        state.next_handle_id += 1;
                        Handle::new(id, resource)
                    };
                    self.reoffer(handle);
                }
                Err(e) => {
                    tracing::debug!(pool = self.policy.name(), error = %e, "idle replacement failed");
                    self.release_slot();
                    if self.monitor.record_failure(e.message()) {
                        self.became_unavailable(e.message());
                    }
                }
            }
        }
    }

    /// Hand unused capacity to queued callers as creation grants.
    fn offer_free_capacity(&self) {
        let mut state = self.state.lock();
        while !state.closed
            && !state.waiters.is_empty()
            && state.outstanding + state.idle.len() < self.capacity
        {
            state.outstanding += 1;
            if state.waiters.hand_off(Grant::Create).is_some() {
                state.outstanding -= 1;
                break;
            }
        }
    }

    fn stop_worker(&self) {
        self.signal.stop();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if worker.thread().id() != std::thread::current().id() {
                let _ = worker.join();
            }
        }
    }
}

impl<P: PoolPolicy> Drop for PoolInner<P> {
    fn drop(&mut self) {
        self.signal.stop();
        let idle = std::mem::take(&mut self.state.get_mut().idle);
        for handle in idle {
            self.policy.destroy(handle.into_destroyed());
        }
    }
}

/// Owns a handle while an async validate or lend hook runs.
struct Reservation<'a, P: PoolPolicy> {
    inner: &'a PoolInner<P>,
    handle: Option<Handle<P::Resource>>,
}

impl<P: PoolPolicy> Reservation<'_, P> {
    fn disarm(mut self) -> Handle<P::Resource> {
        match self.handle.take() {
            Some(handle) => handle,
            None => unreachable!("reservation disarmed twice"),
        }
    }
}

impl<P: PoolPolicy> Drop for Reservation<'_, P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            tracing::debug!(id = handle.id(), "acquisition dropped during checkout, releasing slot");
            self.inner.discard(handle);
            self.inner.release_slot();
        }
    }
}

/// A reserved creation slot while the async create hook runs.
struct SlotGuard<'a, P: PoolPolicy> {
    inner: &'a PoolInner<P>,
    armed: bool,
}

impl<P: PoolPolicy> SlotGuard<'_, P> {
    fn disarm(mut self) {
        self.armed = false;
    }
}

impl<P: PoolPolicy> Drop for SlotGuard<'_, P> {
    fn drop(&mut self) {
        if self.armed {
            tracing::debug!("acquisition dropped during create, releasing slot");
            self.inner.release_slot();
        }
    }
}

/// A queued async acquisition; withdraws itself from the queue on drop.
struct AsyncWait<'a, P: PoolPolicy> {
    inner: &'a PoolInner<P>,
    id: u64,
    rx: Option<oneshot::Receiver<Grant<P::Resource>>>,
}

impl<P: PoolPolicy> AsyncWait<'_, P> {
    async fn recv(&mut self, cancel: &CancellationToken) -> Result<Grant<P::Resource>, PoolError> {
        let received = {
            let Some(rx) = self.rx.as_mut() else {
                return Err(PoolError::Cancelled);
            };
            tokio::select! {
                biased;
                result = rx => Some(result),
                () = cancel.cancelled() => None,
            }
        };

        match received {
            Some(result) => {
                self.rx = None;
                result.map_err(|_| PoolError::ShuttingDown)
            }
            None => {
                tracing::trace!(pool = self.inner.policy.name(), "async acquisition cancelled");
                Err(PoolError::Cancelled)
            }
        }
    }
}

impl<P: PoolPolicy> Drop for AsyncWait<'_, P> {
    fn drop(&mut self) {
        let Some(mut rx) = self.rx.take() else { return };
        if self.inner.state.lock().waiters.remove(self.id) {
            return;
        }
        // Already served: hand back whatever was granted.
        rx.close();
        if let Ok(grant) = rx.try_recv() {
            self.inner.abandon(grant);
        }
    }
}

/// A resource on loan from a [`Pool`].
///
/// Dereferences to the resource. When dropped, the resource is returned to
/// the pool.
pub struct Lease<P: PoolPolicy> {
    pool: Arc<PoolInner<P>>,
    handle: Option<Handle<P::Resource>>,
}

impl<P: PoolPolicy> Lease<P> {
    fn new(pool: Arc<PoolInner<P>>, handle: Handle<P::Resource>) -> Self {
        Self {
            pool,
            handle: Some(handle),
        }
    }

    /// Pool bookkeeping for the leased resource.
    #[must_use]
    pub fn handle(&self) -> &Handle<P::Resource> {
        match &self.handle {
            Some(handle) => handle,
            None => unreachable!("lease handle taken before drop"),
        }
    }

    fn handle_mut(&mut self) -> &mut Handle<P::Resource> {
        match &mut self.handle {
            Some(handle) => handle,
            None => unreachable!("lease handle taken before drop"),
        }
    }

    /// Take the resource out of the pool for good.
    ///
    /// Its slot is freed; the pool no longer tracks it.
    pub fn detach(mut self) -> P::Resource {
        match self.handle.take() {
            Some(handle) => self.pool.detach(handle),
            None => unreachable!("lease handle taken before drop"),
        }
    }
}

impl<P: PoolPolicy> Deref for Lease<P> {
    type Target = P::Resource;

    fn deref(&self) -> &Self::Target {
        self.handle().resource()
    }
}

impl<P: PoolPolicy> DerefMut for Lease<P> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.handle_mut().resource_mut()
    }
}

impl<P: PoolPolicy> fmt::Debug for Lease<P>
where
    P::Resource: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lease")
            .field("pool", &self.pool.policy.name())
            .field("handle", &self.handle)
            .finish()
    }
}

impl<P: PoolPolicy> Drop for Lease<P> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = self.pool.check_in(handle) {
                tracing::warn!(error = %e, "dropped lease could not be returned");
            }
        }
    }
}
