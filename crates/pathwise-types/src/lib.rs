//! Shared domain types for the Pathwise job-application tracker.
//!
//! The persistence layer stores job-application status as lowercase text
//! (`'applied'`, `'interviewing'`, ...). This crate owns the fixed set of
//! statuses the application layer accepts, together with the conversions
//! between the stored form and the display form. With the `rusqlite`
//! feature the status binds to and reads from SQL columns directly.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Lifecycle status of a job application.
///
/// The stored form is the lowercase name returned by [`as_str`](Self::as_str).
/// Both `job_applications.status` and `job_application_status_histories.status`
/// default to [`JobApplicationStatus::Applied`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobApplicationStatus {
    /// An offer was accepted.
    Accepted,
    /// The application was submitted.
    #[default]
    Applied,
    /// The employer canceled the opening.
    Canceled,
    /// The posting was closed.
    Closed,
    /// An offer was declined.
    Declined,
    /// Interviews are in progress.
    Interviewing,
    /// An offer was made.
    Offered,
    /// The employer rejected the application.
    Rejected,
    /// Tracked but not yet applied to.
    Watching,
    /// The applicant withdrew.
    Withdrawn,
}

impl JobApplicationStatus {
    /// Every status, in display order.
    pub const ALL: [Self; 10] = [
        Self::Accepted,
        Self::Applied,
        Self::Canceled,
        Self::Closed,
        Self::Declined,
        Self::Interviewing,
        Self::Offered,
        Self::Rejected,
        Self::Watching,
        Self::Withdrawn,
    ];

    /// Returns the lowercase form stored in `status` columns.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::Applied => "applied",
            Self::Canceled => "canceled",
            Self::Closed => "closed",
            Self::Declined => "declined",
            Self::Interviewing => "interviewing",
            Self::Offered => "offered",
            Self::Rejected => "rejected",
            Self::Watching => "watching",
            Self::Withdrawn => "withdrawn",
        }
    }

    /// Returns the capitalized label shown to users.
    pub fn label(self) -> &'static str {
        match self {
            Self::Accepted => "Accepted",
            Self::Applied => "Applied",
            Self::Canceled => "Canceled",
            Self::Closed => "Closed",
            Self::Declined => "Declined",
            Self::Interviewing => "Interviewing",
            Self::Offered => "Offered",
            Self::Rejected => "Rejected",
            Self::Watching => "Watching",
            Self::Withdrawn => "Withdrawn",
        }
    }
}

impl fmt::Display for JobApplicationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a stored status string is not a known status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown job application status: '{0}'")]
pub struct ParseStatusError(pub String);

impl FromStr for JobApplicationStatus {
    type Err = ParseStatusError;

    /// Parses the stored form. Matching ignores ASCII case so that display
    /// labels round-trip as well.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|status| status.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ParseStatusError(s.to_string()))
    }
}

#[cfg(feature = "rusqlite")]
mod sql {
    use super::JobApplicationStatus;
    use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};

    impl ToSql for JobApplicationStatus {
        fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
            Ok(ToSqlOutput::from(self.as_str()))
        }
    }

    impl FromSql for JobApplicationStatus {
        fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
            value
                .as_str()?
                .parse()
                .map_err(|e| FromSqlError::Other(Box::new(e)))
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use rusqlite::Connection;

        #[test]
        fn binds_and_reads_stored_form() {
            let conn = Connection::open_in_memory().expect("should open in-memory db");

            let stored: String = conn
                .query_row("SELECT ?1", [JobApplicationStatus::Interviewing], |row| {
                    row.get(0)
                })
                .expect("should bind status");
            assert_eq!(stored, "interviewing");

            let read: JobApplicationStatus = conn
                .query_row("SELECT 'offered'", [], |row| row.get(0))
                .expect("should read status");
            assert_eq!(read, JobApplicationStatus::Offered);
        }

        #[test]
        fn unknown_or_non_text_values_fail() {
            let conn = Connection::open_in_memory().expect("should open in-memory db");

            for sql in ["SELECT 'ghosted'", "SELECT 7"] {
                conn.query_row(sql, [], |row| row.get::<_, JobApplicationStatus>(0))
                    .expect_err("should not convert");
            }
        }
    }
}
