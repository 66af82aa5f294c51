//! The policy seam between the pool and the resources it manages.
//!
//! A [`PoolPolicy`] tells the pool how to create, check, prepare and tear
//! down one kind of resource. Only [`create`](PoolPolicy::create),
//! [`destroy`](PoolPolicy::destroy) and [`validate`](PoolPolicy::validate)
//! are required; every other hook defaults to a no-op.
//!
//! Hooks are never invoked while the pool lock is held, so they may block
//! on I/O. The asynchronous acquisition path calls the `_async` forms of
//! [`create`](PoolPolicy::create_async), [`validate`](PoolPolicy::validate_async)
//! and [`on_lend`](PoolPolicy::on_lend_async) instead. They delegate to the
//! blocking hooks by default; override them when the resource can connect
//! or check itself without blocking a runtime worker.

use crate::config::PoolConfig;
use crate::error::PolicyError;
use crate::handle::Handle;

/// Lifecycle hooks and configuration for one kind of pooled resource.
///
/// Uses `#[async_trait]` so the pool can hold the policy behind an
/// `Arc` and drive the async lend hook from any task.
#[async_trait::async_trait]
pub trait PoolPolicy: Send + Sync + 'static {
    /// The pooled resource.
    type Resource: Send + 'static;

    /// Human-readable name used in logs and errors.
    fn name(&self) -> &str {
        "resource pool"
    }

    /// Pool configuration.
    fn config(&self) -> &PoolConfig;

    /// Create a new resource.
    fn create(&self) -> Result<Self::Resource, PolicyError>;

    /// Asynchronous form of [`create`](Self::create).
    async fn create_async(&self) -> Result<Self::Resource, PolicyError> {
        self.create()
    }

    /// Tear a resource down.
    ///
    /// Best effort: failures should be logged by the implementation and
    /// are never surfaced to pool callers.
    fn destroy(&self, resource: Self::Resource);

    /// Cheap liveness probe.
    ///
    /// Used on checkout for stale resources and by the background
    /// recovery probe.
    fn validate(&self, resource: &mut Self::Resource) -> bool;

    /// Asynchronous form of [`validate`](Self::validate).
    async fn validate_async(&self, resource: &mut Self::Resource) -> bool {
        self.validate(resource)
    }

    /// Prepare a resource right before it is lent out.
    ///
    /// May reopen or re-check the resource. An error destroys the handle;
    /// the pool then creates one replacement for the caller.
    fn on_lend(&self, handle: &mut Handle<Self::Resource>) -> Result<(), PolicyError> {
        let _ = handle;
        Ok(())
    }

    /// Asynchronous form of [`on_lend`](Self::on_lend).
    async fn on_lend_async(
        &self,
        handle: &mut Handle<Self::Resource>,
    ) -> Result<(), PolicyError> {
        self.on_lend(handle)
    }

    /// Normalize a resource before it re-enters the idle set.
    ///
    /// An error destroys the handle instead of re-idling it.
    fn on_return(&self, handle: &mut Handle<Self::Resource>) -> Result<(), PolicyError> {
        let _ = handle;
        Ok(())
    }

    /// Called when a blocking acquisition runs out of time.
    fn on_acquire_timeout(&self) {}

    /// Called once when the pool becomes available again.
    fn on_available(&self) {}

    /// Called once when the pool becomes unavailable.
    fn on_unavailable(&self) {}
}
