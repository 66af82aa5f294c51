//! Pool bookkeeping around a single resource.

use std::time::{Duration, Instant};

/// Where a handle currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleState {
    /// Sitting in the idle set, available for lending.
    Idle,
    /// On loan to exactly one caller.
    InUse,
    /// Being torn down; never lent again.
    Destroying,
}

impl HandleState {
    /// Check if the handle may be lent out.
    #[must_use]
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Check if the handle is currently lent out.
    #[must_use]
    pub fn is_in_use(&self) -> bool {
        matches!(self, Self::InUse)
    }
}

/// A resource together with the bookkeeping the pool keeps for it.
///
/// Exactly one handle exists per live resource. Policy hooks receive the
/// handle so they can look at [`last_return_time`](Self::last_return_time)
/// when deciding whether a resource needs reopening.
#[derive(Debug)]
pub struct Handle<R> {
    id: u64,
    created_at: Instant,
    last_return_time: Instant,
    last_checked_at: Option<Instant>,
    checkout_count: u64,
    state: HandleState,
    resource: R,
}

impl<R> Handle<R> {
    pub(crate) fn new(id: u64, resource: R) -> Self {
        let now = Instant::now();
        Self {
            id,
            created_at: now,
            last_return_time: now,
            last_checked_at: None,
            checkout_count: 0,
            state: HandleState::Idle,
            resource,
        }
    }

    /// Unique identifier of this handle within its pool.
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// When the resource was created.
    #[must_use]
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// When the resource was last returned to the pool.
    ///
    /// For a resource that has never been lent this is its creation time.
    #[must_use]
    pub fn last_return_time(&self) -> Instant {
        self.last_return_time
    }

    /// Time since the resource was last returned.
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.last_return_time.elapsed()
    }

    /// When the resource last passed a validity check.
    #[must_use]
    pub fn last_checked_at(&self) -> Option<Instant> {
        self.last_checked_at
    }

    /// Number of times the resource has been lent out.
    #[must_use]
    pub fn checkout_count(&self) -> u64 {
        self.checkout_count
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HandleState {
        self.state
    }

    /// Whether the handle is on loan.
    #[must_use]
    pub fn in_use(&self) -> bool {
        self.state.is_in_use()
    }

    /// Shared access to the resource.
    #[must_use]
    pub fn resource(&self) -> &R {
        &self.resource
    }

    /// Exclusive access to the resource.
    pub fn resource_mut(&mut self) -> &mut R {
        &mut self.resource
    }

    /// Check if the handle has been idle longer than `timeout`.
    #[must_use]
    pub fn is_idle_expired(&self, timeout: Duration) -> bool {
        !timeout.is_zero() && self.idle_for() > timeout
    }

    /// Check if the handle sat idle past `stale_after` without a validity
    /// check since.
    #[must_use]
    pub fn is_stale(&self, stale_after: Duration) -> bool {
        if self.idle_for() <= stale_after {
            return false;
        }
        match self.last_checked_at {
            Some(checked) => checked.elapsed() > stale_after,
            None => true,
        }
    }

    pub(crate) fn mark_health_check(&mut self) {
        self.last_checked_at = Some(Instant::now());
    }

    pub(crate) fn mark_checkout(&mut self) {
        self.checkout_count += 1;
        self.state = HandleState::InUse;
    }

    pub(crate) fn mark_checkin(&mut self) {
        self.last_return_time = Instant::now();
        self.state = HandleState::Idle;
    }

    pub(crate) fn into_destroyed(mut self) -> R {
        self.state = HandleState::Destroying;
        tracing::trace!(
            id = self.id,
            state = ?self.state,
            checkouts = self.checkout_count,
            "destroying resource"
        );
        self.resource
    }

    pub(crate) fn into_resource(self) -> R {
        self.resource
    }

    #[cfg(test)]
    pub(crate) fn backdate_return(&mut self, by: Duration) {
        if let Some(earlier) = self.last_return_time.checked_sub(by) {
            self.last_return_time = earlier;
        }
    }
}
