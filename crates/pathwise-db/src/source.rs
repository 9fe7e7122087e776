//! Connection-string strategies.
//!
//! A [`ConnectionSource`] describes where a database lives. Each variant
//! differs only in how it turns that description into the connection
//! string handed to a [`Driver`](crate::Driver).

use std::borrow::Cow;
use std::fmt;

/// URL scheme of remote token-authenticated databases.
pub const REMOTE_SCHEME: &str = "libsql";

/// Host suffix appended to a remote database name.
pub const REMOTE_HOST_SUFFIX: &str = "turso.io";

pub(crate) const AUTH_TOKEN_PARAM: &str = "authToken=";
const REDACTED: &str = "<redacted>";

/// Where a database lives and how to reach it.
#[derive(Clone, PartialEq, Eq)]
pub enum ConnectionSource {
    /// A database file on the local filesystem.
    Local {
        /// Filesystem path of the database file.
        path: String,
    },
    /// A hosted database addressed by its logical name.
    Remote {
        /// Logical database name, used as the host's first label.
        name: String,
        /// Authentication token sent as the `authToken` query parameter.
        token: String,
    },
    /// A fully formed connection URL, used as-is.
    Url(String),
}

impl ConnectionSource {
    /// Builds the connection string for this source.
    ///
    /// - `Local` yields `file:<path>`
    /// - `Remote` yields `libsql://<name>.turso.io?authToken=<token>`
    /// - `Url` is returned unchanged
    pub fn connection_string(&self) -> String {
        match self {
            Self::Local { path } => format!("file:{path}"),
            Self::Remote { name, token } => format!(
                "{REMOTE_SCHEME}://{name}.{REMOTE_HOST_SUFFIX}?{AUTH_TOKEN_PARAM}{token}"
            ),
            Self::Url(url) => url.clone(),
        }
    }

    /// Short name of the variant, used as a log field.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Remote { .. } => "remote",
            Self::Url(_) => "url",
        }
    }
}

/// Replaces the value of every `authToken` query parameter.
fn redact_auth_token(url: &str) -> Cow<'_, str> {
    if !url.contains(AUTH_TOKEN_PARAM) {
        return Cow::Borrowed(url);
    }

    let mut out = String::with_capacity(url.len());
    let mut rest = url;
    while let Some(start) = rest.find(AUTH_TOKEN_PARAM) {
        let value_start = start + AUTH_TOKEN_PARAM.len();
        out.push_str(&rest[..value_start]);
        out.push_str(REDACTED);
        rest = &rest[value_start..];
        let value_end = rest.find(['&', '#']).unwrap_or(rest.len());
        rest = &rest[value_end..];
    }
    out.push_str(rest);
    Cow::Owned(out)
}

/// Prints the connection string with credentials removed.
impl fmt::Display for ConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "file:{path}"),
            Self::Remote { name, .. } => write!(
                f,
                "{REMOTE_SCHEME}://{name}.{REMOTE_HOST_SUFFIX}?{AUTH_TOKEN_PARAM}{REDACTED}"
            ),
            Self::Url(url) => f.write_str(&redact_auth_token(url)),
        }
    }
}

impl fmt::Debug for ConnectionSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => f.debug_struct("Local").field("path", path).finish(),
            Self::Remote { name, .. } => f
                .debug_struct("Remote")
                .field("name", name)
                .field("token", &REDACTED)
                .finish(),
            Self::Url(url) => f.debug_tuple("Url").field(&redact_auth_token(url)).finish(),
        }
    }
}
