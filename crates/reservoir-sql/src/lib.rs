//! # reservoir-sql
//!
//! SQL session policy for the [`reservoir`] pool.
//!
//! The policy creates sessions from a connection string through a
//! [`SessionFactory`], opens them right before they are lent, validates
//! them with a health check query and closes them on return. The pool
//! capacity comes from the connection string's `Max Pool Size`.
//!
//! ## Example
//!
//! ```rust,ignore
//! use reservoir_sql::SqlPolicy;
//!
//! let pool = SqlPolicy::builder(MyDriver::new())
//!     .connection_string("Server=db;Database=orders;Max Pool Size=20")
//!     .name("orders")
//!     .on_unavailable(|| eprintln!("orders database is down"))
//!     .build_pool()?;
//!
//! let session = pool.acquire()?;
//! // Run statements through the session...
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]

pub mod connection_string;
pub mod error;
pub mod policy;
pub mod session;

pub use connection_string::ConnectionString;
pub use error::{ConnectionStringError, Error, SessionError};
pub use policy::{
    AvailabilityHandler, DEFAULT_HEALTH_CHECK_QUERY, DEFAULT_POOL_NAME, SqlPolicy,
    SqlPolicyBuilder, SqlPool,
};
pub use session::{SessionFactory, SessionState, SqlSession};
