//! # reservoir
//!
//! Generic, policy-driven pool for expensive resources such as database
//! sessions.
//!
//! The pool owns a bounded set of resources and lends them out one holder
//! at a time. Everything specific to the resource lives in a
//! [`PoolPolicy`]: how to create, validate, prepare and tear it down.
//!
//! ## Features
//!
//! - Blocking and async acquisition served from one FIFO queue
//! - Per-call timeouts and bounded async backpressure
//! - Idle eviction and lend-time validation of stale resources
//! - Failure-streak tracking that quarantines a failing backend
//! - Background recovery probing with exactly-once notifications
//! - RAII leases that return the resource on drop
//!
//! ## Example
//!
//! ```rust,ignore
//! use reservoir::{Pool, PoolConfig, PoolPolicy, PolicyError};
//!
//! let pool = Pool::new(MyPolicy::new(PoolConfig::new().pool_size(20)))?;
//! let lease = pool.acquire()?;
//! // Use the resource through the lease...
//! // It goes back to the pool when the lease is dropped
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod availability;
pub mod config;
pub mod error;
pub mod handle;
pub mod policy;
pub mod pool;
mod waiter;

pub use availability::{AvailabilityMonitor, Outage};
pub use config::PoolConfig;
pub use error::{PolicyError, PoolError};
pub use handle::{Handle, HandleState};
pub use policy::PoolPolicy;
pub use pool::{Lease, Pool, PoolStats, PoolStatus};
pub use tokio_util::sync::CancellationToken;
