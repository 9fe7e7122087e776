//! Remote databases over the libsql protocol.
//!
//! The libsql client is async. [`RemoteDb`] owns a small current-thread
//! runtime and runs each call on a short-lived thread, so the blocking API
//! of this crate works the same inside and outside a tokio runtime.

use std::fmt;
use std::future::Future;

use tokio::runtime::Runtime;

use crate::driver::{url_scheme, ConnectionError, DbHandle, Driver, EngineError};
use crate::source::AUTH_TOKEN_PARAM;

/// Schemes the libsql client can reach.
const REMOTE_SCHEMES: &[&str] = &["libsql", "https", "http", "wss", "ws"];

fn block_on<F>(runtime: &Runtime, fut: F) -> F::Output
where
    F: Future + Send,
    F::Output: Send,
{
    // A fresh thread carries no runtime context, so `block_on` cannot panic
    // when the caller is itself a tokio worker.
    std::thread::scope(|scope| {
        scope
            .spawn(move || runtime.block_on(fut))
            .join()
            .unwrap_or_else(|panic| std::panic::resume_unwind(panic))
    })
}

/// Splits the `authToken` query parameter off a connection string.
///
/// Returns the URL without the token and the token itself, which is empty
/// when the URL carries none. Other query parameters are kept.
pub(crate) fn split_auth_token(dsn: &str) -> (String, String) {
    let Some((base, query)) = dsn.split_once('?') else {
        return (dsn.to_string(), String::new());
    };

    let mut token = String::new();
    let mut kept = Vec::new();
    for param in query.split('&').filter(|p| !p.is_empty()) {
        match param.strip_prefix(AUTH_TOKEN_PARAM) {
            Some(value) => token = value.to_string(),
            None => kept.push(param),
        }
    }

    let url = if kept.is_empty() {
        base.to_string()
    } else {
        format!("{base}?{}", kept.join("&"))
    };
    (url, token)
}

/// A remote libsql database.
pub struct RemoteDb {
    db: libsql::Database,
    // Only `None` while dropping.
    runtime: Option<Runtime>,
    url: String,
}

impl RemoteDb {
    /// Returns the libsql database for async callers.
    pub fn database(&self) -> &libsql::Database {
        &self.db
    }

    /// The server URL, without the auth token.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Drives `fut` to completion on this database's runtime.
    pub fn run<F>(&self, fut: F) -> F::Output
    where
        F: Future + Send,
        F::Output: Send,
    {
        let Some(runtime) = &self.runtime else {
            unreachable!("remote runtime is only taken on drop");
        };
        block_on(runtime, fut)
    }

    /// Executes one or more SQL statements on a fresh connection.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Remote` if the server rejects the batch or
    /// cannot be reached.
    pub fn execute_batch(&self, sql: &str) -> Result<(), EngineError> {
        self.run(async {
            let conn = self.db.connect()?;
            conn.execute_batch(sql).await?;
            Ok::<(), EngineError>(())
        })
    }

    /// Runs `SELECT 1` against the server.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::Remote` if the server does not answer.
    pub fn ping(&self) -> Result<(), EngineError> {
        self.run(async {
            let conn = self.db.connect()?;
            conn.query("SELECT 1", ()).await?;
            Ok::<(), EngineError>(())
        })
    }
}

impl Drop for RemoteDb {
    fn drop(&mut self) {
        // Dropping a runtime blocks, which tokio forbids on async threads.
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

impl fmt::Debug for RemoteDb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteDb")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

/// Remote databases through the `libsql` client.
///
/// Accepts `libsql://`, `https://`, `http://`, `wss://` and `ws://` URLs.
/// The token comes from the `authToken` query parameter.
#[derive(Debug, Clone, Copy, Default)]
pub struct LibsqlDriver;

impl LibsqlDriver {
    /// Whether this driver serves connection strings with `scheme`.
    pub fn serves(scheme: &str) -> bool {
        REMOTE_SCHEMES
            .iter()
            .any(|known| known.eq_ignore_ascii_case(scheme))
    }
}

impl Driver for LibsqlDriver {
    fn name(&self) -> &'static str {
        "libsql"
    }

    fn open(&self, dsn: &str) -> Result<DbHandle, ConnectionError> {
        match url_scheme(dsn) {
            Some(scheme) if Self::serves(scheme) => {}
            other => {
                return Err(ConnectionError::UnsupportedScheme {
                    driver: self.name(),
                    scheme: other.unwrap_or("file").to_string(),
                })
            }
        }

        let (url, token) = split_auth_token(dsn);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(ConnectionError::Runtime)?;

        tracing::debug!(driver = self.name(), %url, "building remote client");

        let builder = libsql::Builder::new_remote(url.clone(), token);
        let db = block_on(&runtime, builder.build()).map_err(|source| ConnectionError::Remote {
            driver: self.name(),
            source,
        })?;

        Ok(DbHandle::Remote(RemoteDb {
            db,
            runtime: Some(runtime),
            url,
        }))
    }
}
