//! # reservoir-testing
//!
//! Test infrastructure for reservoir pool development.
//!
//! ## Features
//!
//! - [`MockPolicy`]: a scriptable [`PoolPolicy`](reservoir::PoolPolicy)
//!   with failure injection, delays and lifecycle counters
//! - [`MockBackend`], [`MockFactory`] and [`MockSession`]: an in-memory
//!   stand-in for a database server, for exercising the SQL policy
//! - [`init_tracing`]: log capture for tests
//!
//! ## Example
//!
//! ```rust,ignore
//! use reservoir::{Pool, PoolConfig};
//! use reservoir_testing::MockPolicy;
//!
//! let pool = Pool::new(MockPolicy::new(PoolConfig::new().pool_size(2)))?;
//! pool.policy().fail_next_creates(3);
//! assert!(pool.acquire().is_err());
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod policy;
pub mod session;

pub use policy::{MockCounters, MockPolicy, MockResource};
pub use session::{MockBackend, MockFactory, MockSession};

/// Install a test-friendly tracing subscriber.
///
/// Honors `RUST_LOG`-style levels through the default `fmt` subscriber and
/// writes through the test harness so output is captured per test. Safe to
/// call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}
