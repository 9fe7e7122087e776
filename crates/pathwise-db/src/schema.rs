//! Idempotent schema initialization.
//!
//! The schema is a fixed, ordered list of statements. Every `CREATE` is
//! conditional on the object being absent, so the whole list runs on each
//! startup. Parent tables come before the tables that reference them.

use rusqlite::Connection;
use thiserror::Error;

use crate::driver::{ConnectionError, EngineError};
use crate::remote::RemoteDb;

/// Something schema statements can be executed on.
pub trait SchemaTarget {
    /// Executes one statement batch.
    ///
    /// # Errors
    ///
    /// Returns the engine's error if the batch fails.
    fn apply(&self, sql: &str) -> Result<(), EngineError>;
}

impl SchemaTarget for Connection {
    fn apply(&self, sql: &str) -> Result<(), EngineError> {
        Ok(self.execute_batch(sql)?)
    }
}

impl SchemaTarget for RemoteDb {
    fn apply(&self, sql: &str) -> Result<(), EngineError> {
        self.execute_batch(sql)
    }
}

/// A single named schema statement.
struct Statement {
    name: &'static str,
    sql: &'static str,
}

/// All schema statements in execution order.
const STATEMENTS: &[Statement] = &[
    Statement {
        name: "foreign_keys",
        sql: "PRAGMA foreign_keys = ON;",
    },
    Statement {
        name: "users",
        sql: "CREATE TABLE IF NOT EXISTS users (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            email TEXT NOT NULL UNIQUE,
            password TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        );",
    },
    Statement {
        name: "sessions",
        sql: "CREATE TABLE IF NOT EXISTS sessions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_id INTEGER NOT NULL,
            token TEXT NOT NULL UNIQUE,
            user_agent TEXT,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            expires_at TIMESTAMP,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );",
    },
    Statement {
        name: "job_applications",
        sql: "CREATE TABLE IF NOT EXISTS job_applications (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            company TEXT NOT NULL,
            title TEXT NOT NULL,
            url TEXT,
            status TEXT NOT NULL DEFAULT 'applied',
            applied_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            user_id INTEGER NOT NULL,
            FOREIGN KEY (user_id) REFERENCES users(id) ON DELETE CASCADE
        );",
    },
    Statement {
        name: "idx_job_applications_user_id",
        sql: "CREATE INDEX IF NOT EXISTS idx_job_applications_user_id
            ON job_applications (user_id);",
    },
    Statement {
        name: "idx_job_applications_stats",
        sql: "CREATE INDEX IF NOT EXISTS idx_job_applications_stats
            ON job_applications (user_id, id, company, status, applied_at);",
    },
    Statement {
        name: "idx_job_applications_user_updated",
        sql: "CREATE INDEX IF NOT EXISTS idx_job_applications_user_updated
            ON job_applications (user_id, updated_at);",
    },
    Statement {
        name: "job_application_notes",
        sql: "CREATE TABLE IF NOT EXISTS job_application_notes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_application_id INTEGER NOT NULL,
            note TEXT NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (job_application_id) REFERENCES job_applications(id) ON DELETE CASCADE
        );",
    },
    Statement {
        name: "job_application_status_histories",
        sql: "CREATE TABLE IF NOT EXISTS job_application_status_histories (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            job_application_id INTEGER NOT NULL,
            status TEXT NOT NULL DEFAULT 'applied',
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            FOREIGN KEY (job_application_id) REFERENCES job_applications(id) ON DELETE CASCADE
        );",
    },
    Statement {
        name: "idx_job_application_status_histories_stats",
        sql: "CREATE INDEX IF NOT EXISTS idx_job_application_status_histories_stats
            ON job_application_status_histories (status, job_application_id, created_at);",
    },
];

/// Errors that can occur while initializing the schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    /// A schema statement failed. Statements before it remain applied.
    #[error("schema statement '{name}' failed: {source}")]
    ExecutionFailed {
        /// The name of the statement that failed.
        name: &'static str,
        /// The engine's error.
        source: EngineError,
    },

    /// No connection was available to run the statements on.
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

/// Brings the target database to the expected schema.
///
/// Statements run in order and stop at the first failure. Nothing is
/// rolled back; because every statement is conditional, calling this again
/// after fixing the cause skips what is already in place.
///
/// Returns the number of statements executed.
///
/// # Errors
///
/// Returns `SchemaError::ExecutionFailed` naming the first statement that
/// failed.
pub fn init_schema<T: SchemaTarget + ?Sized>(target: &T) -> Result<usize, SchemaError> {
    run_statements(target, STATEMENTS)
}

fn run_statements<T: SchemaTarget + ?Sized>(
    target: &T,
    statements: &[Statement],
) -> Result<usize, SchemaError> {
    for statement in statements {
        tracing::debug!(statement = statement.name, "applying schema statement");

        target.apply(statement.sql).map_err(|source| {
            tracing::error!(
                statement = statement.name,
                error = %source,
                "schema statement failed"
            );
            SchemaError::ExecutionFailed {
                name: statement.name,
                source,
            }
        })?;
    }

    tracing::info!(statements = statements.len(), "schema initialized");
    Ok(statements.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::JobApplicationStatus;
    use rusqlite::{params, Connection};

    fn test_db() -> Connection {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        init_schema(&conn).expect("schema init should succeed");
        conn
    }

    fn schema_objects(conn: &Connection) -> Vec<(String, String)> {
        let mut stmt = conn
            .prepare(
                "SELECT type, name FROM sqlite_master
                 WHERE name NOT LIKE 'sqlite_%'
                 ORDER BY type, name",
            )
            .expect("should prepare sqlite_master query");
        stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .expect("should query sqlite_master")
            .map(|r| r.expect("should read schema row"))
            .collect()
    }

    fn names_of<'a>(objects: &'a [(String, String)], kind: &str) -> Vec<&'a str> {
        objects
            .iter()
            .filter(|(t, _)| t == kind)
            .map(|(_, n)| n.as_str())
            .collect()
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
            row.get(0)
        })
        .expect("should count rows")
    }

    fn seed_user(conn: &Connection, email: &str) -> i64 {
        conn.execute(
            "INSERT INTO users (email, password) VALUES (?1, 'hash')",
            [email],
        )
        .expect("should insert user");
        conn.last_insert_rowid()
    }

    fn seed_job_application(conn: &Connection, user_id: i64) -> i64 {
        conn.execute(
            "INSERT INTO job_applications (company, title, url, user_id)
             VALUES ('Acme', 'Engineer', 'https://acme.test/jobs/1', ?1)",
            [user_id],
        )
        .expect("should insert job application");
        conn.last_insert_rowid()
    }

    #[test]
    fn init_on_fresh_db_creates_tables_and_indexes() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let executed = init_schema(&conn).expect("schema init should succeed");
        assert_eq!(executed, STATEMENTS.len());

        let objects = schema_objects(&conn);

        assert_eq!(
            names_of(&objects, "table"),
            vec![
                "job_application_notes",
                "job_application_status_histories",
                "job_applications",
                "sessions",
                "users",
            ]
        );
        assert_eq!(
            names_of(&objects, "index"),
            vec![
                "idx_job_application_status_histories_stats",
                "idx_job_applications_stats",
                "idx_job_applications_user_id",
                "idx_job_applications_user_updated",
            ]
        );
    }

    #[test]
    fn init_is_idempotent() {
        let conn = test_db();
        let before = schema_objects(&conn);

        let executed = init_schema(&conn).expect("second run should succeed");
        assert_eq!(executed, STATEMENTS.len());
        assert_eq!(schema_objects(&conn), before, "no duplicate schema objects");
    }

    #[test]
    fn init_enables_foreign_keys() {
        let conn = test_db();

        let fk: i32 = conn
            .query_row("PRAGMA foreign_keys;", [], |row| row.get(0))
            .expect("should query foreign_keys");
        assert_eq!(fk, 1);

        let err = conn
            .execute(
                "INSERT INTO job_applications (company, title, user_id) VALUES ('Acme', 'Engineer', 999)",
                [],
            )
            .expect_err("insert with unknown user should fail");
        match err {
            rusqlite::Error::SqliteFailure(e, _) => {
                assert_eq!(e.extended_code, rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY)
            }
            other => panic!("unexpected error type: {other:?}"),
        }
    }

    #[test]
    fn deleting_user_cascades_to_descendants() {
        let conn = test_db();
        let user_id = seed_user(&conn, "ada@example.com");
        let other_id = seed_user(&conn, "grace@example.com");

        conn.execute(
            "INSERT INTO sessions (user_id, token, user_agent, expires_at)
             VALUES (?1, 'tok-1', 'test-agent', datetime('now', '+1 day'))",
            [user_id],
        )
        .expect("should insert session");

        let job_id = seed_job_application(&conn, user_id);
        seed_job_application(&conn, other_id);
        conn.execute(
            "INSERT INTO job_application_notes (job_application_id, note) VALUES (?1, 'phone screen booked')",
            [job_id],
        )
        .expect("should insert note");
        conn.execute(
            "INSERT INTO job_application_status_histories (job_application_id) VALUES (?1)",
            [job_id],
        )
        .expect("should insert status history");

        conn.execute("DELETE FROM users WHERE id = ?1", [user_id])
            .expect("should delete user");

        assert_eq!(count(&conn, "sessions"), 0);
        assert_eq!(count(&conn, "job_applications"), 1, "other user's row stays");
        assert_eq!(count(&conn, "job_application_notes"), 0);
        assert_eq!(count(&conn, "job_application_status_histories"), 0);
    }

    #[test]
    fn status_columns_default_to_applied() {
        let conn = test_db();
        let user_id = seed_user(&conn, "ada@example.com");
        let job_id = seed_job_application(&conn, user_id);
        conn.execute(
            "INSERT INTO job_application_status_histories (job_application_id) VALUES (?1)",
            [job_id],
        )
        .expect("should insert status history");

        let (job_status, history_status): (JobApplicationStatus, JobApplicationStatus) = conn
            .query_row(
                "SELECT j.status, h.status
                 FROM job_applications j
                 JOIN job_application_status_histories h ON h.job_application_id = j.id
                 WHERE j.id = ?1",
                params![job_id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("should read statuses as known values");

        assert_eq!(job_status, JobApplicationStatus::default());
        assert_eq!(history_status, JobApplicationStatus::default());
    }

    #[test]
    fn status_column_accepts_every_typed_status() {
        let conn = test_db();
        let user_id = seed_user(&conn, "ada@example.com");
        let job_id = seed_job_application(&conn, user_id);

        for status in JobApplicationStatus::ALL {
            conn.execute(
                "INSERT INTO job_application_status_histories (job_application_id, status)
                 VALUES (?1, ?2)",
                params![job_id, status],
            )
            .expect("should insert status history");
        }

        let mut stmt = conn
            .prepare("SELECT status FROM job_application_status_histories ORDER BY id")
            .expect("should prepare query");
        let stored: Vec<JobApplicationStatus> = stmt
            .query_map([], |row| row.get(0))
            .expect("should query statuses")
            .map(|r| r.expect("should read status"))
            .collect();
        assert_eq!(stored, JobApplicationStatus::ALL.to_vec());
    }

    #[test]
    fn unique_constraints_hold() {
        let conn = test_db();
        let user_id = seed_user(&conn, "ada@example.com");

        conn.execute(
            "INSERT INTO users (email, password) VALUES ('ada@example.com', 'other')",
            [],
        )
        .expect_err("duplicate email should fail");

        let insert_session = |token: &str| {
            conn.execute(
                "INSERT INTO sessions (user_id, token, user_agent) VALUES (?1, ?2, 'agent')",
                params![user_id, token],
            )
        };
        insert_session("tok-1").expect("first session should insert");
        insert_session("tok-1").expect_err("duplicate token should fail");
    }

    #[test]
    fn stops_at_first_failing_statement_without_rollback() {
        let conn = Connection::open_in_memory().expect("should open in-memory db");
        let statements = [
            Statement {
                name: "first",
                sql: "CREATE TABLE IF NOT EXISTS first_step (id INTEGER PRIMARY KEY);",
            },
            Statement {
                name: "broken",
                sql: "CREATE TABLE IF NOT EXISTS broken_step (id INTEGER REFERENCES);",
            },
            Statement {
                name: "never",
                sql: "CREATE TABLE IF NOT EXISTS never_step (id INTEGER PRIMARY KEY);",
            },
        ];

        let err = run_statements(&conn, &statements).expect_err("broken statement should fail");
        match err {
            SchemaError::ExecutionFailed { name, .. } => assert_eq!(name, "broken"),
            other => panic!("unexpected error type: {other:?}"),
        }

        let tables: Vec<String> = schema_objects(&conn)
            .into_iter()
            .map(|(_, name)| name)
            .collect();
        assert_eq!(tables, vec!["first_step".to_string()]);
    }
}
