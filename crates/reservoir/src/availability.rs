//! Pool-wide availability tracking.
//!
//! [`AvailabilityMonitor`] counts consecutive creation and validation
//! failures. Once the streak reaches the configured threshold the pool is
//! flipped to unavailable and new acquisitions fail fast until the
//! background probe reports a success.
//!
//! Every transition is reported to exactly one caller: the `bool` returned
//! by [`record_failure`](AvailabilityMonitor::record_failure),
//! [`set_unavailable`](AvailabilityMonitor::set_unavailable) and
//! [`record_success`](AvailabilityMonitor::record_success) is `true` only
//! for the call that won the compare-and-swap.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Instant;

use parking_lot::Mutex;

/// Details of the failure that made the pool unavailable.
#[derive(Debug, Clone)]
pub struct Outage {
    /// Failure message.
    pub cause: String,
    /// When the pool became unavailable.
    pub since: Instant,
}

/// Tracks the failure streak and the available/unavailable flag.
#[derive(Debug)]
pub struct AvailabilityMonitor {
    available: AtomicBool,
    streak: AtomicU32,
    threshold: u32,
    outage: Mutex<Option<Outage>>,
}

impl AvailabilityMonitor {
    /// Create a monitor that trips after `threshold` consecutive failures.
    #[must_use]
    pub fn new(threshold: u32) -> Self {
        Self {
            available: AtomicBool::new(true),
            streak: AtomicU32::new(0),
            threshold: threshold.max(1),
            outage: Mutex::new(None),
        }
    }

    /// Whether the pool is currently available.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    /// Current consecutive failure count.
    #[must_use]
    pub fn failure_streak(&self) -> u32 {
        self.streak.load(Ordering::Acquire)
    }

    /// The failure that caused the current outage, if any.
    #[must_use]
    pub fn outage(&self) -> Option<Outage> {
        self.outage.lock().clone()
    }

    /// Cause text of the current outage, or a generic message.
    #[must_use]
    pub fn outage_cause(&self) -> String {
        self.outage
            .lock()
            .as_ref()
            .map_or_else(|| "backend unavailable".to_string(), |o| o.cause.clone())
    }

    /// Cause of the current outage, if any.
    #[must_use]
    pub fn last_failure(&self) -> Option<String> {
        self.outage.lock().as_ref().map(|o| o.cause.clone())
    }

    /// When the current outage began, if any.
    #[must_use]
    pub fn unavailable_since(&self) -> Option<Instant> {
        self.outage.lock().as_ref().map(|o| o.since)
    }

    /// Record a failure.
    ///
    /// Returns `true` if this call flipped the pool to unavailable.
    pub fn record_failure(&self, cause: &str) -> bool {
        let streak = self.streak.fetch_add(1, Ordering::AcqRel).saturating_add(1);
        if streak < self.threshold {
            return false;
        }
        self.set_unavailable(cause)
    }

    /// Force the pool unavailable regardless of the streak.
    ///
    /// Returns `true` if this call caused the transition.
    pub fn set_unavailable(&self, cause: &str) -> bool {
        if self
            .available
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.outage.lock() = Some(Outage {
            cause: cause.to_string(),
            since: Instant::now(),
        });
        true
    }

    /// Clear the failure streak after a successful acquisition.
    ///
    /// Does not restore availability; only the background probe does that.
    pub fn reset_streak(&self) {
        self.streak.store(0, Ordering::Release);
    }

    /// Record a successful recovery probe.
    ///
    /// Clears the streak and returns `true` if this call flipped the pool
    /// back to available.
    pub fn record_success(&self) -> bool {
        self.streak.store(0, Ordering::Release);
        if self
            .available
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        *self.outage.lock() = None;
        true
    }
}
