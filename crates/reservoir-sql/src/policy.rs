//! Pool policy for SQL sessions.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use reservoir::{Handle, PolicyError, Pool, PoolConfig, PoolPolicy};

use crate::connection_string::ConnectionString;
use crate::error::{Error, SessionError};
use crate::session::{SessionFactory, SessionState, SqlSession};

/// Default health check query.
pub const DEFAULT_HEALTH_CHECK_QUERY: &str = "SELECT 1";

/// Default pool name used in logs and errors.
pub const DEFAULT_POOL_NAME: &str = "SQL session pool";

/// Callback invoked on an availability transition.
pub type AvailabilityHandler = Arc<dyn Fn() + Send + Sync>;

struct Handlers {
    available: Mutex<Option<AvailabilityHandler>>,
    unavailable: Mutex<Option<AvailabilityHandler>>,
}

impl Handlers {
    fn fire(slot: &Mutex<Option<AvailabilityHandler>>) {
        // Clone out so the handler runs without the slot locked.
        let handler = slot.lock().clone();
        if let Some(handler) = handler {
            handler();
        }
    }
}

/// [`PoolPolicy`] for database sessions.
///
/// Sessions are created unopened and opened right before they are lent.
/// Returned sessions are closed; the next borrower reopens them.
pub struct SqlPolicy<F: SessionFactory> {
    factory: F,
    connection_string: ConnectionString,
    name: String,
    health_check_query: Arc<str>,
    config: PoolConfig,
    handlers: Handlers,
}

/// A pool of SQL sessions.
pub type SqlPool<F> = Pool<SqlPolicy<F>>;

impl<F: SessionFactory> SqlPolicy<F> {
    /// Start building a policy around `factory`.
    pub fn builder(factory: F) -> SqlPolicyBuilder<F> {
        SqlPolicyBuilder::new(factory)
    }

    /// The parsed connection string.
    #[must_use]
    pub fn connection_string(&self) -> &ConnectionString {
        &self.connection_string
    }

    /// The query used to validate sessions.
    #[must_use]
    pub fn health_check_query(&self) -> &str {
        &self.health_check_query
    }

    /// The session factory.
    #[must_use]
    pub fn factory(&self) -> &F {
        &self.factory
    }

    /// Register the callback run when the pool becomes available again.
    pub fn on_available_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.handlers.available.lock() = Some(Arc::new(handler));
    }

    /// Register the callback run when the pool becomes unavailable.
    pub fn on_unavailable_handler(&self, handler: impl Fn() + Send + Sync + 'static) {
        *self.handlers.unavailable.lock() = Some(Arc::new(handler));
    }

    /// Whether a session must be (re)opened before it is lent.
    fn needs_open(&self, handle: &mut Handle<F::Session>) -> bool {
        if !handle.resource().state().is_open() {
            return true;
        }
        handle.is_stale(self.config.stale_after) && !handle.resource_mut().ping()
    }

    async fn needs_open_async(&self, handle: &mut Handle<F::Session>) -> bool {
        if !handle.resource().state().is_open() {
            return true;
        }
        handle.is_stale(self.config.stale_after) && !handle.resource_mut().ping_async().await
    }

    fn health_checked(&self, result: Result<(), SessionError>) -> bool {
        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(pool = %self.name, error = %e, "health check failed");
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl<F: SessionFactory> PoolPolicy for SqlPolicy<F> {
    type Resource = F::Session;

    fn name(&self) -> &str {
        &self.name
    }

    fn config(&self) -> &PoolConfig {
        &self.config
    }

    fn create(&self) -> Result<F::Session, PolicyError> {
        Ok(self.factory.session(&self.connection_string)?)
    }

    fn destroy(&self, mut session: F::Session) {
        if session.state() != SessionState::Closed {
            if let Err(e) = session.close() {
                tracing::warn!(pool = %self.name, error = %e, "error closing session");
            }
        }
    }

    fn validate(&self, session: &mut F::Session) -> bool {
        if session.state() != SessionState::Open {
            if let Err(e) = session.open() {
                tracing::debug!(pool = %self.name, error = %e, "validation open failed");
                return false;
            }
        }
        self.health_checked(session.execute_probe(&self.health_check_query))
    }

    async fn validate_async(&self, session: &mut F::Session) -> bool {
        if session.state() != SessionState::Open {
            if let Err(e) = session.open_async().await {
                tracing::debug!(pool = %self.name, error = %e, "validation open failed");
                return false;
            }
        }
        let result = session.execute_probe_async(&self.health_check_query).await;
        self.health_checked(result)
    }

    fn on_lend(&self, handle: &mut Handle<F::Session>) -> Result<(), PolicyError> {
        if self.needs_open(handle) {
            tracing::trace!(id = handle.id(), "opening session");
            handle.resource_mut().open()?;
        }
        Ok(())
    }

    async fn on_lend_async(&self, handle: &mut Handle<F::Session>) -> Result<(), PolicyError> {
        if self.needs_open_async(handle).await {
            tracing::trace!(id = handle.id(), "opening session (async)");
            handle.resource_mut().open_async().await?;
        }
        Ok(())
    }

    fn on_return(&self, handle: &mut Handle<F::Session>) -> Result<(), PolicyError> {
        let session = handle.resource_mut();
        if session.state() != SessionState::Closed {
            if let Err(e) = session.close() {
                tracing::debug!(id = handle.id(), error = %e, "ignoring close error on return");
            }
        }
        Ok(())
    }

    fn on_available(&self) {
        tracing::info!(pool = %self.name, "database reachable again");
        Handlers::fire(&self.handlers.available);
    }

    fn on_unavailable(&self) {
        tracing::warn!(pool = %self.name, "database unreachable");
        Handlers::fire(&self.handlers.unavailable);
    }
}

impl<F: SessionFactory> fmt::Debug for SqlPolicy<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlPolicy")
            .field("name", &self.name)
            .field("connection_string", &self.connection_string.redacted())
            .field("health_check_query", &self.health_check_query)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Builder for [`SqlPolicy`].
pub struct SqlPolicyBuilder<F: SessionFactory> {
    factory: F,
    connection_string: String,
    name: String,
    health_check_query: Arc<str>,
    config: PoolConfig,
    on_available: Option<AvailabilityHandler>,
    on_unavailable: Option<AvailabilityHandler>,
    prewarm: Option<usize>,
}

impl<F: SessionFactory> SqlPolicyBuilder<F> {
    /// Create a new builder.
    pub fn new(factory: F) -> Self {
        Self {
            factory,
            connection_string: String::new(),
            name: DEFAULT_POOL_NAME.to_string(),
            health_check_query: Arc::from(DEFAULT_HEALTH_CHECK_QUERY),
            config: PoolConfig::default(),
            on_available: None,
            on_unavailable: None,
            prewarm: None,
        }
    }

    /// Set the connection string. Its `Max Pool Size` sets the capacity.
    #[must_use]
    pub fn connection_string(mut self, conn_str: impl Into<String>) -> Self {
        self.connection_string = conn_str.into();
        self
    }

    /// Set the pool name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the health check query.
    ///
    /// # Examples
    ///
    /// ```rust,ignore
    /// // Verify a specific database is reachable
    /// builder.health_check_query("SELECT 1 FROM sys.databases WHERE name = 'orders'");
    /// ```
    #[must_use]
    pub fn health_check_query(mut self, query: impl Into<Arc<str>>) -> Self {
        self.health_check_query = query.into();
        self
    }

    /// Set the base pool configuration.
    ///
    /// The capacity is still taken from the connection string.
    #[must_use]
    pub fn pool_config(mut self, config: PoolConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the blocking acquisition timeout.
    #[must_use]
    pub fn sync_get_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.sync_get_timeout(timeout);
        self
    }

    /// Set the idle eviction timeout.
    #[must_use]
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config = self.config.idle_timeout(timeout);
        self
    }

    /// Set the async wait queue capacity.
    #[must_use]
    pub fn async_get_capacity(mut self, capacity: usize) -> Self {
        self.config = self.config.async_get_capacity(capacity);
        self
    }

    /// Choose between a raised and a suppressed timeout error.
    #[must_use]
    pub fn throw_on_get_timeout(mut self, enabled: bool) -> Self {
        self.config = self.config.throw_on_get_timeout(enabled);
        self
    }

    /// Set the background check interval.
    #[must_use]
    pub fn check_available_interval(mut self, interval: Duration) -> Self {
        self.config = self.config.check_available_interval(interval);
        self
    }

    /// Set the consecutive failure threshold.
    #[must_use]
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.config = self.config.failure_threshold(threshold);
        self
    }

    /// Register the callback run when the pool becomes available again.
    #[must_use]
    pub fn on_available(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_available = Some(Arc::new(handler));
        self
    }

    /// Register the callback run when the pool becomes unavailable.
    #[must_use]
    pub fn on_unavailable(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_unavailable = Some(Arc::new(handler));
        self
    }

    /// Set how many sessions [`build_pool`](Self::build_pool) opens ahead
    /// of demand. Defaults to the pool size from the connection string.
    #[must_use]
    pub fn prewarm(mut self, count: usize) -> Self {
        self.prewarm = Some(count);
        self
    }

    /// Build the policy.
    pub fn build(self) -> Result<SqlPolicy<F>, Error> {
        let connection_string = ConnectionString::parse(&self.connection_string)?;
        let config = self.config.pool_size(connection_string.pool_size());
        config.validate()?;

        tracing::debug!(
            pool = %self.name,
            connection_string = %connection_string,
            pool_size = config.pool_size,
            "SQL policy configured"
        );

        Ok(SqlPolicy {
            factory: self.factory,
            connection_string,
            name: self.name,
            health_check_query: self.health_check_query,
            config,
            handlers: Handlers {
                available: Mutex::new(self.on_available),
                unavailable: Mutex::new(self.on_unavailable),
            },
        })
    }

    /// Build the policy, create its pool and fill it ahead of demand.
    ///
    /// Warms the full pool size unless [`prewarm`](Self::prewarm) says
    /// otherwise. Sessions that fail to open are skipped.
    pub fn build_pool(self) -> Result<SqlPool<F>, Error> {
        let prewarm = self.prewarm;
        let policy = self.build()?;
        let warm = prewarm.unwrap_or(policy.config.pool_size);
        let pool = Pool::new(policy)?;
        if warm > 0 {
            let idle = pool.prewarm(warm);
            tracing::debug!(pool = pool.policy().name(), requested = warm, idle, "pool prewarmed");
        }
        Ok(pool)
    }
}
