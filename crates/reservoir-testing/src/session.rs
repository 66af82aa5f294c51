//! In-memory database stand-in for the SQL policy.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::Mutex;
use reservoir_sql::{ConnectionString, SessionError, SessionFactory, SessionState, SqlSession};

/// Shared server-side state for a set of mock sessions.
#[derive(Debug, Default)]
pub struct MockBackend {
    down: AtomicBool,
    open_failures: AtomicUsize,
    probes_fail: AtomicBool,
    pings_fail: AtomicBool,
    closes_fail: AtomicBool,
    sessions: AtomicUsize,
    opens: AtomicUsize,
    closes: AtomicUsize,
    probes: AtomicUsize,
    async_probes: AtomicUsize,
    pings: AtomicUsize,
    open_now: AtomicUsize,
    last_query: Mutex<Option<String>>,
    connection_strings: Mutex<Vec<String>>,
}

impl MockBackend {
    /// Create a reachable backend.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make the server unreachable (or reachable again).
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Fail the next `n` opens.
    pub fn fail_next_opens(&self, n: usize) {
        self.open_failures.store(n, Ordering::SeqCst);
    }

    /// Fail every health check query while set.
    pub fn fail_probes(&self, fail: bool) {
        self.probes_fail.store(fail, Ordering::SeqCst);
    }

    /// Fail every ping while set.
    pub fn fail_pings(&self, fail: bool) {
        self.pings_fail.store(fail, Ordering::SeqCst);
    }

    /// Fail every close while set. The session still ends up closed.
    pub fn fail_closes(&self, fail: bool) {
        self.closes_fail.store(fail, Ordering::SeqCst);
    }

    /// Sessions created by the factory.
    #[must_use]
    pub fn sessions_created(&self) -> usize {
        self.sessions.load(Ordering::SeqCst)
    }

    /// Successful opens.
    #[must_use]
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    /// Successful closes.
    #[must_use]
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Health check queries received.
    #[must_use]
    pub fn probes(&self) -> usize {
        self.probes.load(Ordering::SeqCst)
    }

    /// Health check queries received through the async path.
    #[must_use]
    pub fn async_probes(&self) -> usize {
        self.async_probes.load(Ordering::SeqCst)
    }

    /// Pings received.
    #[must_use]
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    /// Sessions currently open.
    #[must_use]
    pub fn open_sessions(&self) -> usize {
        self.open_now.load(Ordering::SeqCst)
    }

    /// Most recent probe query.
    #[must_use]
    pub fn last_query(&self) -> Option<String> {
        self.last_query.lock().clone()
    }

    /// Connection strings sessions were created for, in order.
    #[must_use]
    pub fn connection_strings(&self) -> Vec<String> {
        self.connection_strings.lock().clone()
    }

    fn reachable(&self) -> bool {
        !self.down.load(Ordering::SeqCst)
    }

    fn take_open_failure(&self) -> bool {
        self.open_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// A session against a [`MockBackend`].
#[derive(Debug)]
pub struct MockSession {
    backend: Arc<MockBackend>,
    id: usize,
    state: SessionState,
}

impl MockSession {
    /// Session number, in creation order.
    #[must_use]
    pub fn id(&self) -> usize {
        self.id
    }

    /// Simulate the server dropping this session.
    pub fn break_connection(&mut self) {
        if self.state == SessionState::Open {
            self.backend.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        self.state = SessionState::Broken;
    }
}

#[async_trait::async_trait]
impl SqlSession for MockSession {
    fn state(&self) -> SessionState {
        self.state
    }

    fn open(&mut self) -> Result<(), SessionError> {
        if self.state == SessionState::Open {
            return Ok(());
        }
        if !self.backend.reachable() {
            self.state = SessionState::Broken;
            return Err(SessionError::Open("server unreachable".into()));
        }
        if self.backend.take_open_failure() {
            self.state = SessionState::Broken;
            return Err(SessionError::Open("login timeout expired".into()));
        }
        self.state = SessionState::Open;
        self.backend.opens.fetch_add(1, Ordering::SeqCst);
        self.backend.open_now.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn open_async(&mut self) -> Result<(), SessionError> {
        tokio::task::yield_now().await;
        self.open()
    }

    fn close(&mut self) -> Result<(), SessionError> {
        let was_open = self.state == SessionState::Open;
        if self.state == SessionState::Closed {
            return Ok(());
        }
        self.state = SessionState::Closed;
        if was_open {
            self.backend.open_now.fetch_sub(1, Ordering::SeqCst);
        }
        if self.backend.closes_fail.load(Ordering::SeqCst) {
            return Err(SessionError::Close("connection reset by peer".into()));
        }
        self.backend.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn ping(&mut self) -> bool {
        self.backend.pings.fetch_add(1, Ordering::SeqCst);
        self.state == SessionState::Open
            && self.backend.reachable()
            && !self.backend.pings_fail.load(Ordering::SeqCst)
    }

    async fn execute_probe_async(&mut self, query: &str) -> Result<(), SessionError> {
        self.backend.async_probes.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.execute_probe(query)
    }

    fn execute_probe(&mut self, query: &str) -> Result<(), SessionError> {
        self.backend.probes.fetch_add(1, Ordering::SeqCst);
        *self.backend.last_query.lock() = Some(query.to_string());
        if self.state != SessionState::Open {
            return Err(SessionError::Closed);
        }
        if !self.backend.reachable() || self.backend.probes_fail.load(Ordering::SeqCst) {
            return Err(SessionError::Query("server did not respond".into()));
        }
        Ok(())
    }
}

/// [`SessionFactory`] producing [`MockSession`]s.
#[derive(Debug, Clone)]
pub struct MockFactory {
    backend: Arc<MockBackend>,
}

impl MockFactory {
    /// Create a factory for `backend`.
    #[must_use]
    pub fn new(backend: Arc<MockBackend>) -> Self {
        Self { backend }
    }

    /// The shared backend.
    #[must_use]
    pub fn backend(&self) -> &Arc<MockBackend> {
        &self.backend
    }
}

impl SessionFactory for MockFactory {
    type Session = MockSession;

    fn session(&self, connection_string: &ConnectionString) -> Result<MockSession, SessionError> {
        let id = self.backend.sessions.fetch_add(1, Ordering::SeqCst);
        self.backend
            .connection_strings
            .lock()
            .push(connection_string.as_str().to_string());
        Ok(MockSession {
            backend: Arc::clone(&self.backend),
            id,
            state: SessionState::Closed,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn session(backend: &Arc<MockBackend>) -> MockSession {
        MockFactory::new(Arc::clone(backend))
            .session(&ConnectionString::default())
            .unwrap()
    }

    #[test]
    fn test_session_open_close_tracks_backend() {
        let backend = MockBackend::new();
        let mut s = session(&backend);
        assert_eq!(s.state(), SessionState::Closed);

        s.open().unwrap();
        assert_eq!(backend.open_sessions(), 1);
        assert!(s.ping());
        s.execute_probe("SELECT 1").unwrap();
        assert_eq!(backend.last_query().as_deref(), Some("SELECT 1"));

        s.close().unwrap();
        assert_eq!(backend.open_sessions(), 0);
        assert_eq!(backend.closes(), 1);
    }

    #[test]
    fn test_unreachable_backend_breaks_open() {
        let backend = MockBackend::new();
        backend.set_down(true);
        let mut s = session(&backend);
        assert!(s.open().is_err());
        assert_eq!(s.state(), SessionState::Broken);
    }

    #[test]
    fn test_break_connection() {
        let backend = MockBackend::new();
        let mut s = session(&backend);
        s.open().unwrap();
        s.break_connection();
        assert_eq!(backend.open_sessions(), 0);
        assert!(!s.ping());
        assert!(matches!(s.execute_probe("SELECT 1"), Err(SessionError::Closed)));
    }
}
