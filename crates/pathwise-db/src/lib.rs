//! Database layer for the Pathwise job-application tracker.
//!
//! Provides one interface over SQL backends that differ only in how their
//! connection string is built, a factory that picks the backend from
//! configuration, and an idempotent schema initializer for the users,
//! sessions, job applications, notes and status-history tables.
//!
//! # Design decisions
//!
//! - **One source enum**: local files, remote token-authenticated databases
//!   and plain URLs are variants of [`ConnectionSource`], not parallel
//!   wrapper types. They all yield the same [`Database`] handle.
//! - **Injected driver**: the engine is passed to [`connect`] as a
//!   [`Driver`]. Nothing registers itself process-wide, so tests can swap
//!   the engine out.
//! - **Handle enum**: a [`DbHandle`] is either an `r2d2` pool of SQLite
//!   connections or a remote libsql client, so a single [`Database`] can be
//!   shared by every request handler whichever engine is behind it.
//! - **Scheme routing**: [`RoutingDriver`] sends `libsql://` and `https://`
//!   strings to [`LibsqlDriver`] and everything else to [`SqliteDriver`].
//! - **Conditional DDL**: every schema statement is `IF NOT EXISTS`, so
//!   [`init_schema`] runs on every startup without version tracking.

mod database;
mod driver;
mod remote;
mod schema;
mod source;

pub use database::{connect, select_source, Database, DatabaseOpts};
pub use driver::{
    ConnectionError, DbConnection, DbHandle, DbPool, DbRuntimeSettings, Driver, EngineError,
    RoutingDriver, SqliteDriver,
};
pub use pathwise_types::JobApplicationStatus;
pub use remote::{LibsqlDriver, RemoteDb};
pub use schema::{init_schema, SchemaError, SchemaTarget};
pub use source::{ConnectionSource, REMOTE_HOST_SUFFIX, REMOTE_SCHEME};
