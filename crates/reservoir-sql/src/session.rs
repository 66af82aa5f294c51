//! The session seam.
//!
//! The pool never speaks a wire protocol itself. A [`SessionFactory`]
//! produces unopened [`SqlSession`]s for a connection string, and the
//! policy drives them through open, probe and close.

use crate::connection_string::ConnectionString;
use crate::error::SessionError;

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not connected. Newly created sessions start here.
    Closed,
    /// Connection in progress.
    Connecting,
    /// Connected and ready for statements.
    Open,
    /// The connection failed and must be reopened.
    Broken,
}

impl SessionState {
    /// Check if the session can run statements.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open)
    }
}

/// A database session managed by the pool.
#[async_trait::async_trait]
pub trait SqlSession: Send + 'static {
    /// Current connection state.
    fn state(&self) -> SessionState;

    /// Open the session.
    fn open(&mut self) -> Result<(), SessionError>;

    /// Open the session without blocking the calling task.
    async fn open_async(&mut self) -> Result<(), SessionError> {
        self.open()
    }

    /// Close the session. Closing a closed session is a no-op.
    fn close(&mut self) -> Result<(), SessionError>;

    /// Lightweight liveness check of an open session.
    fn ping(&mut self) -> bool;

    /// Asynchronous form of [`ping`](Self::ping).
    async fn ping_async(&mut self) -> bool {
        self.ping()
    }

    /// Run a statement and discard its result.
    fn execute_probe(&mut self, query: &str) -> Result<(), SessionError>;

    /// Asynchronous form of [`execute_probe`](Self::execute_probe).
    async fn execute_probe_async(&mut self, query: &str) -> Result<(), SessionError> {
        self.execute_probe(query)
    }
}

/// Creates unopened sessions.
pub trait SessionFactory: Send + Sync + 'static {
    /// Session type produced by this factory.
    type Session: SqlSession;

    /// Create a session for `connection_string`. Must not connect.
    fn session(&self, connection_string: &ConnectionString)
    -> Result<Self::Session, SessionError>;
}
