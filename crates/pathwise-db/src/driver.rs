//! Driver seam and the SQLite driver.
//!
//! A [`Driver`] turns a connection string into a live [`DbHandle`].
//! Callers hand the driver to [`connect`](crate::connect) explicitly;
//! [`RoutingDriver`] picks SQLite or libsql by URL scheme.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use r2d2::{ManageConnection, Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{Connection, OpenFlags};
use thiserror::Error;

use crate::remote::{LibsqlDriver, RemoteDb};

/// Runtime tunables for SQLite connection behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbRuntimeSettings {
    /// Busy timeout for SQLite connections, in milliseconds.
    pub busy_timeout_ms: u64,

    /// Maximum number of pooled SQLite connections.
    pub pool_max_size: u32,

    /// How long a pool checkout may wait for a connection, in milliseconds.
    pub connect_timeout_ms: u64,
}

impl Default for DbRuntimeSettings {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            pool_max_size: 8,
            connect_timeout_ms: 5_000,
        }
    }
}

/// Pool of SQLite connections.
pub type DbPool = Pool<SqliteConnectionManager>;

/// A connection checked out of a [`DbPool`].
pub type DbConnection = PooledConnection<SqliteConnectionManager>;

/// The live engine behind a [`Database`](crate::Database).
#[derive(Debug)]
pub enum DbHandle {
    /// Embedded SQLite, pooled.
    Sqlite(DbPool),
    /// A remote libsql server.
    Remote(RemoteDb),
}

impl DbHandle {
    /// Name of the engine behind this handle.
    pub fn engine(&self) -> &'static str {
        match self {
            Self::Sqlite(_) => "sqlite",
            Self::Remote(_) => "libsql",
        }
    }

    /// Returns the SQLite pool, if this is a SQLite handle.
    pub fn sqlite(&self) -> Option<&DbPool> {
        match self {
            Self::Sqlite(pool) => Some(pool),
            Self::Remote(_) => None,
        }
    }

    /// Returns the remote database, if this is a libsql handle.
    pub fn remote(&self) -> Option<&RemoteDb> {
        match self {
            Self::Remote(remote) => Some(remote),
            Self::Sqlite(_) => None,
        }
    }
}

/// A statement failure from either engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Raised by SQLite.
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),

    /// Raised by the libsql client.
    #[error(transparent)]
    Remote(#[from] libsql::Error),
}

/// Errors raised while reaching a database engine.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// SQLite refused to open the database file.
    #[error("driver '{driver}' failed to open database: {source}")]
    Sqlite {
        /// Name of the driver that failed.
        driver: &'static str,
        /// The underlying SQLite error.
        source: rusqlite::Error,
    },

    /// The connection pool could not be built.
    #[error("driver '{driver}' failed to build connection pool: {source}")]
    Pool {
        /// Name of the driver that failed.
        driver: &'static str,
        /// The underlying pool error.
        source: r2d2::Error,
    },

    /// The libsql client could not be built.
    #[error("driver '{driver}' failed to open remote database: {source}")]
    Remote {
        /// Name of the driver that failed.
        driver: &'static str,
        /// The underlying libsql error.
        source: libsql::Error,
    },

    /// The runtime that drives remote calls could not start.
    #[error("failed to start remote database runtime: {0}")]
    Runtime(#[source] std::io::Error),

    /// The connection string uses a scheme the driver cannot serve.
    #[error("driver '{driver}' does not support '{scheme}://' connection strings")]
    UnsupportedScheme {
        /// Name of the driver that refused the connection string.
        driver: &'static str,
        /// The refused URL scheme.
        scheme: String,
    },

    /// No connection could be checked out of an open pool.
    #[error("failed to check out database connection: {0}")]
    Checkout(#[source] r2d2::Error),

    /// A SQLite connection was requested from a remote database.
    #[error("database opened by driver '{driver}' has no SQLite connection pool")]
    NotSqlite {
        /// Name of the driver that opened the database.
        driver: &'static str,
    },

    /// The engine did not answer a liveness query.
    #[error("database did not answer: {0}")]
    Unreachable(#[source] EngineError),
}

/// Opens handles for a SQL engine.
pub trait Driver: Send + Sync {
    /// Name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Opens a handle for the given connection string.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the engine cannot be reached or the
    /// connection string is not one this driver understands.
    fn open(&self, dsn: &str) -> Result<DbHandle, ConnectionError>;
}

/// Embedded SQLite through `rusqlite`, pooled with `r2d2`.
///
/// URI filenames are enabled, so `file:data.db` and
/// `file:data.db?mode=rwc` are both accepted. In-memory databases are
/// opened in shared-cache mode so every pooled connection sees the same
/// tables. Connection strings with any other URL scheme (`libsql://`,
/// `https://`) are refused.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteDriver {
    settings: DbRuntimeSettings,
}

impl SqliteDriver {
    /// Creates a driver with the given runtime settings.
    pub fn new(settings: DbRuntimeSettings) -> Self {
        Self { settings }
    }

    /// Returns the runtime settings applied to every pooled connection.
    pub fn settings(&self) -> DbRuntimeSettings {
        self.settings
    }
}

/// Returns the scheme of `scheme://...` strings.
pub(crate) fn url_scheme(dsn: &str) -> Option<&str> {
    let (scheme, _) = dsn.split_once("://")?;
    let mut chars = scheme.chars();
    let starts_alpha = chars.next().is_some_and(|c| c.is_ascii_alphabetic());
    let rest_valid = chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    (starts_alpha && rest_valid).then_some(scheme)
}

static NEXT_MEMORY_DB: AtomicU64 = AtomicU64::new(0);

/// Rewrites in-memory connection strings to a named shared-cache database.
///
/// Returns `None` for anything stored on disk. An anonymous `:memory:`
/// gets a fresh name per call, so two pools never share tables.
fn shared_memory_dsn(dsn: &str) -> Option<String> {
    let uri = dsn.strip_prefix("file:").unwrap_or(dsn);
    let (path, query) = uri.split_once('?').unwrap_or((uri, ""));
    let params: Vec<&str> = query.split('&').filter(|p| !p.is_empty()).collect();

    let anonymous = path.is_empty() || path == ":memory:";
    if path != ":memory:" && !params.contains(&"mode=memory") {
        return None;
    }

    let name = if anonymous {
        format!(
            "pathwise-memory-{}",
            NEXT_MEMORY_DB.fetch_add(1, Ordering::Relaxed)
        )
    } else {
        path.to_string()
    };

    let mut rewritten = format!("file:{name}?mode=memory&cache=shared");
    for param in params
        .iter()
        .filter(|p| !p.starts_with("mode=") && !p.starts_with("cache="))
    {
        rewritten.push('&');
        rewritten.push_str(param);
    }
    Some(rewritten)
}

fn prepare_connection(conn: &mut Connection, busy_timeout: Duration) -> rusqlite::Result<()> {
    let mode: String =
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
    if !matches!(mode.as_str(), "wal" | "memory") {
        return Err(rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
            Some(format!("journal_mode stayed '{mode}', expected 'wal'")),
        ));
    }
    conn.pragma_update(None, "foreign_keys", true)?;
    conn.busy_timeout(busy_timeout)
}

impl Driver for SqliteDriver {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn open(&self, dsn: &str) -> Result<DbHandle, ConnectionError> {
        if let Some(scheme) = url_scheme(dsn) {
            if !scheme.eq_ignore_ascii_case("file") {
                return Err(ConnectionError::UnsupportedScheme {
                    driver: self.name(),
                    scheme: scheme.to_string(),
                });
            }
        }

        let shared_memory = shared_memory_dsn(dsn);
        let target = shared_memory.as_deref().unwrap_or(dsn);

        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_FULL_MUTEX;

        let busy_timeout = Duration::from_millis(self.settings.busy_timeout_ms);
        let manager = SqliteConnectionManager::file(target)
            .with_flags(flags)
            .with_init(move |conn| prepare_connection(conn, busy_timeout));

        // Opened before the pool so a bad path fails with the SQLite error
        // instead of a pool timeout. It also keeps a shared in-memory
        // database alive until the pool holds connections of its own.
        let first = manager.connect().map_err(|source| ConnectionError::Sqlite {
            driver: self.name(),
            source,
        })?;

        tracing::debug!(
            driver = self.name(),
            pool_max_size = self.settings.pool_max_size,
            in_memory = shared_memory.is_some(),
            "building connection pool"
        );

        let mut builder = Pool::builder()
            .max_size(self.settings.pool_max_size.max(1))
            .connection_timeout(Duration::from_millis(self.settings.connect_timeout_ms.max(1)));
        if shared_memory.is_some() {
            // The database disappears with its last connection.
            builder = builder.max_lifetime(None).idle_timeout(None);
        }

        let pool = builder
            .build(manager)
            .map_err(|source| ConnectionError::Pool {
                driver: self.name(),
                source,
            })?;
        drop(first);

        Ok(DbHandle::Sqlite(pool))
    }
}

/// Sends remote URLs to libsql and everything else to SQLite.
#[derive(Debug, Clone, Copy, Default)]
pub struct RoutingDriver {
    local: SqliteDriver,
    remote: LibsqlDriver,
}

impl RoutingDriver {
    /// Creates a router whose SQLite side uses `settings`.
    pub fn new(settings: DbRuntimeSettings) -> Self {
        Self {
            local: SqliteDriver::new(settings),
            remote: LibsqlDriver,
        }
    }

    /// Returns the driver that serves `dsn`.
    pub fn route(&self, dsn: &str) -> &dyn Driver {
        match url_scheme(dsn) {
            Some(scheme) if LibsqlDriver::serves(scheme) => &self.remote,
            _ => &self.local,
        }
    }
}

impl Driver for RoutingDriver {
    fn name(&self) -> &'static str {
        "routing"
    }

    fn open(&self, dsn: &str) -> Result<DbHandle, ConnectionError> {
        let driver = self.route(dsn);
        tracing::debug!(driver = driver.name(), "routing connection string");
        driver.open(dsn)
    }
}
