use axum::body::Body;
use axum::http::{Request, StatusCode};
use pathwise_db::{select_source, ConnectionError, RoutingDriver};
use pathwise_server::config::DatabaseConfig;
use pathwise_server::{app, open_database, AppState, StartupError};
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceExt;

fn local_config(dir: &tempfile::TempDir) -> DatabaseConfig {
    DatabaseConfig {
        url: dir.path().join("db.sqlite3").to_string_lossy().into_owned(),
        pool_max_size: 2,
        ..DatabaseConfig::default()
    }
}

#[tokio::test]
async fn health_reports_ok_with_live_database() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db = open_database(&local_config(&dir)).expect("failed to open database");

    let state = AppState {
        db: Arc::new(db),
        version: "0.0.1-test".to_string(),
    };

    let response = app(state)
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .expect("failed to build request"),
        )
        .await
        .expect("request failed");

    assert_eq!(response.status(), StatusCode::OK);

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("failed to read body");
    let json: Value = serde_json::from_slice(&body).expect("body should be json");
    assert_eq!(json["status"], "ok");
    assert_eq!(json["version"], "0.0.1-test");
    assert_eq!(json["database"], "ok");
}

#[test]
fn open_database_initializes_schema() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let db = open_database(&local_config(&dir)).expect("failed to open database");

    let conn = db.connection().expect("failed to get connection");
    let tables: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name IN
             ('users', 'sessions', 'job_applications', 'job_application_notes',
              'job_application_status_histories')",
            [],
            |row| row.get(0),
        )
        .expect("failed to count tables");
    assert_eq!(tables, 5);
}

#[test]
fn startup_fails_hard_for_unopenable_database() {
    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let config = DatabaseConfig {
        url: dir
            .path()
            .join("missing/db.sqlite3")
            .to_string_lossy()
            .into_owned(),
        ..DatabaseConfig::default()
    };

    let started = Instant::now();
    let err = open_database(&config).expect_err("unopenable database should stop startup");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(
        matches!(err, StartupError::Connection(ConnectionError::Sqlite { .. })),
        "unexpected error: {err:?}"
    );
}

#[test]
fn token_sends_startup_to_the_libsql_driver() {
    let config = DatabaseConfig {
        url: "pathwise".to_string(),
        token: "tok123".to_string(),
        ..DatabaseConfig::default()
    };

    let dsn = select_source(&config.opts()).connection_string();
    let driver = RoutingDriver::new(config.runtime_settings());
    assert_eq!(driver.route(&dsn).name(), "libsql");

    let local = DatabaseConfig::default();
    let dsn = select_source(&local.opts()).connection_string();
    assert_eq!(driver.route(&dsn).name(), "sqlite");
}
