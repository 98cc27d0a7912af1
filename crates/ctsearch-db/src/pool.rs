//! Database connection pool management.
//!
//! [`LazyPool`] owns the store's pool and creates it on first use. Callers
//! racing on that first use share one initialization: the first caller
//! creates the pool while the others wait on the init lock and then reuse
//! its result.

use std::future::Future;
use std::time::{Duration, Instant};

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use ctsearch_core::defaults;
use ctsearch_core::{Error, Result};

/// Pool configuration options.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_connections: u32,
    /// Minimum number of connections to maintain.
    pub min_connections: u32,
    /// Connection timeout duration.
    pub connect_timeout: Duration,
    /// Idle connection timeout duration.
    pub idle_timeout: Duration,
    /// Maximum connection lifetime.
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            min_connections: defaults::DB_MIN_CONNECTIONS,
            connect_timeout: Duration::from_secs(defaults::DB_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(defaults::DB_IDLE_TIMEOUT_SECS),
            max_lifetime: Some(Duration::from_secs(1800)), // 30 minutes
        }
    }
}

impl PoolConfig {
    /// Create a new pool configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of connections.
    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n;
        self
    }

    /// Set the minimum number of connections.
    pub fn min_connections(mut self, n: u32) -> Self {
        self.min_connections = n;
        self
    }

    /// Set the connection timeout.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the idle connection timeout.
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the maximum connection lifetime.
    pub fn max_lifetime(mut self, lifetime: Option<Duration>) -> Self {
        self.max_lifetime = lifetime;
        self
    }
}

/// Parse a `postgres://` URL into connect options.
pub fn parse_database_url(database_url: &str) -> Result<PgConnectOptions> {
    database_url
        .parse::<PgConnectOptions>()
        .map_err(|e| Error::Config(format!("Invalid database URL: {}", e)))
}

/// Connection parameters given as separate settings rather than a URL.
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
}

impl ConnectParams {
    /// Build connect options. Unset fields keep libpq's defaults
    /// (`PGHOST`, `PGPORT`, ...).
    pub fn to_connect_options(&self) -> PgConnectOptions {
        let mut options = PgConnectOptions::new();
        if let Some(host) = &self.host {
            options = options.host(host);
        }
        if let Some(port) = self.port {
            options = options.port(port);
        }
        if let Some(username) = &self.username {
            options = options.username(username);
        }
        if let Some(password) = &self.password {
            options = options.password(password);
        }
        if let Some(database) = &self.database {
            options = options.database(database);
        }
        options
    }
}

/// Create a new PostgreSQL connection pool with custom configuration.
pub async fn create_pool_with_config(
    connect_options: PgConnectOptions,
    config: PoolConfig,
) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "db",
        component = "pool",
        op = "create",
        host = connect_options.get_host(),
        database = connect_options.get_database().unwrap_or("(default)"),
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        connect_timeout_secs = config.connect_timeout.as_secs(),
        "Creating database connection pool"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout);

    if let Some(max_lifetime) = config.max_lifetime {
        options = options.max_lifetime(max_lifetime);
    }

    let pool = options
        .connect_with(connect_options)
        .await
        .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

    info!(
        subsystem = "db",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        pool_idle = pool.num_idle(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log current pool health metrics. Warns when every connection is checked out.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "db",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool health check"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "db",
            component = "pool",
            pool_size = size,
            "Connection pool has no idle connections"
        );
    }
}

/// A value created at most once per open/close cycle, even under concurrent
/// first use.
pub struct SingleFlight<T> {
    value: RwLock<Option<T>>,
    init_lock: Mutex<()>,
}

impl<T: Clone> SingleFlight<T> {
    pub fn new() -> Self {
        Self {
            value: RwLock::new(None),
            init_lock: Mutex::new(()),
        }
    }

    /// Start out already initialized.
    pub fn with_value(value: T) -> Self {
        Self {
            value: RwLock::new(Some(value)),
            init_lock: Mutex::new(()),
        }
    }

    /// Current value, if initialized.
    pub async fn get(&self) -> Option<T> {
        self.value.read().await.clone()
    }

    /// Return the value, running `init` if nobody has yet.
    ///
    /// A failed `init` leaves the slot empty so a later call can try again.
    pub async fn get_or_try_init<F, Fut>(&self, init: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(value) = self.get().await {
            return Ok(value);
        }

        let _guard = self.init_lock.lock().await;
        // Another caller may have finished while we waited for the lock
        if let Some(value) = self.get().await {
            return Ok(value);
        }

        let value = init().await?;
        *self.value.write().await = Some(value.clone());
        Ok(value)
    }

    /// Remove and return the value.
    pub async fn take(&self) -> Option<T> {
        let _guard = self.init_lock.lock().await;
        self.value.write().await.take()
    }
}

impl<T: Clone> Default for SingleFlight<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Pool handle owned by a store, connected on first use.
pub struct LazyPool {
    connect_options: PgConnectOptions,
    config: PoolConfig,
    pool: SingleFlight<PgPool>,
}

impl LazyPool {
    /// Create an unconnected handle.
    pub fn new(connect_options: PgConnectOptions, config: PoolConfig) -> Self {
        Self {
            connect_options,
            config,
            pool: SingleFlight::new(),
        }
    }

    /// Wrap a pool that is already connected.
    pub fn from_pool(pool: PgPool) -> Self {
        let connect_options = pool.connect_options().as_ref().clone();
        Self {
            connect_options,
            config: PoolConfig::default(),
            pool: SingleFlight::with_value(pool),
        }
    }

    /// Get the pool, creating it if this is the first use.
    pub async fn connect(&self) -> Result<PgPool> {
        self.pool
            .get_or_try_init(|| {
                create_pool_with_config(self.connect_options.clone(), self.config.clone())
            })
            .await
    }

    /// Whether a pool currently exists.
    pub async fn is_connected(&self) -> bool {
        self.pool.get().await.is_some()
    }

    /// Close the pool. A later [`LazyPool::connect`] creates a new one.
    pub async fn close(&self) {
        if let Some(pool) = self.pool.take().await {
            info!(
                subsystem = "db",
                component = "pool",
                op = "close",
                "Closing database connection pool"
            );
            pool.close().await;
        }
    }
}
