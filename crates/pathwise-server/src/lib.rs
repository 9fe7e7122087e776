//! Startup wiring for the Pathwise server.
//!
//! Opens the database through the factory, initializes the schema, and
//! serves the health endpoint. Startup fails hard when the database cannot
//! be opened or initialized.

pub mod config;

use axum::{extract::State, http::StatusCode, routing::get, Json, Router};
use pathwise_db::{connect, ConnectionError, Database, RoutingDriver, SchemaError};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use crate::config::{Config, ConfigError, DatabaseConfig};

/// Errors that stop the server from starting or running.
#[derive(Debug, Error)]
pub enum StartupError {
    /// Configuration could not be loaded.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The database could not be opened.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The schema could not be initialized.
    #[error(transparent)]
    Schema(#[from] SchemaError),

    /// The listener could not bind.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        /// The address that could not be bound.
        addr: SocketAddr,
        /// The underlying I/O error.
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("server error: {0}")]
    Serve(#[source] std::io::Error),
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    /// The database shared by all handlers.
    pub db: Arc<Database>,
    /// Version reported by `/health`.
    pub version: String,
}

/// Health check handler.
///
/// Returns `200 OK` when the database answers, `503` otherwise.
async fn health(State(state): State<AppState>) -> (StatusCode, Json<Value>) {
    let db = Arc::clone(&state.db);
    let database_ok = match tokio::task::spawn_blocking(move || db.ping()).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "database health check failed");
            false
        }
        Err(e) => {
            tracing::error!(error = %e, "database health check task failed");
            false
        }
    };

    let (status, label, database) = if database_ok {
        (StatusCode::OK, "ok", "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded", "unavailable")
    };

    (
        status,
        Json(json!({
            "status": label,
            "version": state.version,
            "database": database,
        })),
    )
}

/// Builds the application router.
pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Opens the configured database and initializes its schema.
///
/// A set token selects the remote source, which [`RoutingDriver`] serves
/// with libsql; local paths go to SQLite.
///
/// # Errors
///
/// Returns `StartupError::Connection` or `StartupError::Schema`.
pub fn open_database(config: &DatabaseConfig) -> Result<Database, StartupError> {
    let driver = RoutingDriver::new(config.runtime_settings());
    let db = connect(&driver, &config.opts())?;
    let executed = db.init_schema()?;
    tracing::info!(
        engine = db.handle().engine(),
        statements = executed,
        "database ready"
    );
    Ok(db)
}

/// Runs the server until SIGINT or SIGTERM, then closes the database.
///
/// # Errors
///
/// Returns `StartupError` if the database cannot be prepared, the listener
/// cannot bind, or serving fails.
pub async fn run(config: Config) -> Result<(), StartupError> {
    let db = Arc::new(open_database(&config.database)?);

    let addr = SocketAddr::new(config.server.host, config.server.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| StartupError::Bind { addr, source })?;

    tracing::info!(%addr, "starting pathwise server");

    let state = AppState {
        db: Arc::clone(&db),
        version: config.server.version.clone(),
    };
    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(StartupError::Serve)?;

    match Arc::try_unwrap(db) {
        Ok(db) => db.close(),
        Err(_) => tracing::warn!("database still referenced at shutdown, dropping it later"),
    }

    tracing::info!("pathwise server shut down");
    Ok(())
}

/// Waits for a SIGINT (Ctrl+C) or SIGTERM signal for graceful shutdown.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => { tracing::info!("received SIGINT, initiating graceful shutdown"); }
        () = terminate => { tracing::info!("received SIGTERM, initiating graceful shutdown"); }
    }
}
