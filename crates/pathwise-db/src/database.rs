//! The database handle and the factory that builds it.

use std::fmt;

use tracing::Span;

use crate::driver::{ConnectionError, DbConnection, DbHandle, Driver};
use crate::schema::{self, SchemaError};
use crate::source::ConnectionSource;

/// Construction-time database configuration.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct DatabaseOpts {
    /// Local file path, or the remote database name when `token` is set.
    pub url: String,

    /// Remote authentication token. Empty selects local mode.
    pub token: String,
}

impl fmt::Debug for DatabaseOpts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseOpts")
            .field("url", &self.url)
            .field("token_set", &!self.token.is_empty())
            .finish()
    }
}

/// Picks the connection source for the given configuration.
///
/// An empty token means `url` is a local file path; otherwise `url` is the
/// remote database name and `token` authenticates against it.
pub fn select_source(opts: &DatabaseOpts) -> ConnectionSource {
    if opts.token.is_empty() {
        ConnectionSource::Local {
            path: opts.url.clone(),
        }
    } else {
        ConnectionSource::Remote {
            name: opts.url.clone(),
            token: opts.token.clone(),
        }
    }
}

/// Opens the database described by `opts` with the given driver.
///
/// # Errors
///
/// Returns `ConnectionError` if the driver cannot open the selected source.
pub fn connect(driver: &dyn Driver, opts: &DatabaseOpts) -> Result<Database, ConnectionError> {
    Database::open(driver, select_source(opts))
}

/// A live database handle.
///
/// Share it by reference (or behind an `Arc`) between callers; both engines
/// are safe for concurrent use. Close it once, at shutdown.
pub struct Database {
    source: ConnectionSource,
    driver: &'static str,
    handle: DbHandle,
    span: Span,
}

impl Database {
    /// Opens `source` with the given driver.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if the driver refuses or cannot reach the
    /// source.
    pub fn open(driver: &dyn Driver, source: ConnectionSource) -> Result<Self, ConnectionError> {
        let span = tracing::info_span!(
            "database",
            driver = driver.name(),
            variant = source.kind(),
            dsn = %source,
        );

        let handle = span.in_scope(|| {
            tracing::debug!("opening database");
            driver.open(&source.connection_string()).inspect_err(|e| {
                tracing::error!(error = %e, "failed to open database");
            })
        })?;

        span.in_scope(|| tracing::info!(engine = handle.engine(), "database opened"));

        Ok(Self {
            source,
            driver: driver.name(),
            handle,
            span,
        })
    }

    /// Returns the engine handle.
    pub fn handle(&self) -> &DbHandle {
        &self.handle
    }

    /// Checks a SQLite connection out of the pool.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError::Checkout` if no connection becomes
    /// available before the pool's timeout, or `ConnectionError::NotSqlite`
    /// for a remote database.
    pub fn connection(&self) -> Result<DbConnection, ConnectionError> {
        match &self.handle {
            DbHandle::Sqlite(pool) => pool.get().map_err(ConnectionError::Checkout),
            DbHandle::Remote(_) => Err(ConnectionError::NotSqlite {
                driver: self.driver,
            }),
        }
    }

    /// Returns the source this database was opened from.
    pub fn source(&self) -> &ConnectionSource {
        &self.source
    }

    /// Returns the name of the driver that opened this database.
    pub fn driver_name(&self) -> &'static str {
        self.driver
    }

    /// Returns the span that scopes this database's log events.
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Runs [`schema::init_schema`] against the engine.
    ///
    /// # Errors
    ///
    /// Returns `SchemaError` if no connection is available or a schema
    /// statement fails.
    pub fn init_schema(&self) -> Result<usize, SchemaError> {
        let _entered = self.span.enter();
        match &self.handle {
            DbHandle::Sqlite(pool) => {
                let conn = pool.get().map_err(ConnectionError::Checkout)?;
                schema::init_schema(&*conn)
            }
            DbHandle::Remote(remote) => schema::init_schema(remote),
        }
    }

    /// Runs `SELECT 1` to check that the engine answers.
    ///
    /// # Errors
    ///
    /// Returns `ConnectionError` if no connection is available or the query
    /// fails.
    pub fn ping(&self) -> Result<(), ConnectionError> {
        match &self.handle {
            DbHandle::Sqlite(_) => {
                let conn = self.connection()?;
                conn.query_row("SELECT 1", [], |row| row.get::<_, i64>(0))
                    .map(|_| ())
                    .map_err(|e| ConnectionError::Unreachable(e.into()))
            }
            DbHandle::Remote(remote) => remote.ping().map_err(ConnectionError::Unreachable),
        }
    }

    /// Releases the handle.
    ///
    /// Pool clones taken from [`handle`](Self::handle) keep their
    /// connections open until they are dropped as well.
    pub fn close(self) {
        let _entered = self.span.enter();
        match &self.handle {
            DbHandle::Sqlite(pool) => {
                let state = pool.state();
                tracing::info!(
                    connections = state.connections,
                    idle = state.idle_connections,
                    "closing database"
                );
            }
            DbHandle::Remote(remote) => {
                tracing::info!(url = remote.url(), "closing database");
            }
        }
    }
}

impl fmt::Debug for Database {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Database")
            .field("source", &self.source)
            .field("driver", &self.driver)
            .field("engine", &self.handle.engine())
            .finish_non_exhaustive()
    }
}
