//! Error taxonomy.
//!
//! Errors are split by where they arise: connection establishment,
//! statement execution, value conversion, builder state, and unsupported
//! operations. Statement errors carry the offending SQL and, when the
//! engine provides one, a SQLSTATE code so callers can test for conditions
//! like unique-constraint violations structurally instead of parsing
//! message text.

use regex::Regex;
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug)]
pub enum Error {
    /// Failed to establish or keep a connection.
    Connection(ConnectionError),
    /// The engine rejected a statement.
    Query(QueryError),
    /// A value could not be converted to the requested Rust type.
    Type(TypeError),
    /// Invalid builder state detected before any I/O (e.g. no table set).
    Builder { message: String },
    /// The driver does not support the requested operation.
    Unsupported { message: String },
}

#[derive(Debug)]
pub struct ConnectionError {
    pub kind: ConnectionErrorKind,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionErrorKind {
    Refused,
    Timeout,
    AuthFailed,
    Closed,
    Other,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    /// The SQL that failed, when known.
    pub sql: Option<String>,
    /// Engine SQLSTATE code, when the engine reports one.
    pub sqlstate: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    Syntax,
    Constraint,
    Permission,
    NotFound,
    Busy,
    Other,
}

#[derive(Debug)]
pub struct TypeError {
    pub expected: &'static str,
    pub actual: String,
    pub column: Option<String>,
}

impl Error {
    pub fn connection(kind: ConnectionErrorKind, message: impl Into<String>) -> Self {
        Error::Connection(ConnectionError {
            kind,
            message: message.into(),
        })
    }

    pub fn query(kind: QueryErrorKind, message: impl Into<String>) -> Self {
        Error::Query(QueryError {
            kind,
            sql: None,
            sqlstate: None,
            message: message.into(),
        })
    }

    pub fn builder(message: impl Into<String>) -> Self {
        Error::Builder {
            message: message.into(),
        }
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Error::Unsupported {
            message: message.into(),
        }
    }

    /// True when the error is a unique/primary-key constraint violation,
    /// judged structurally from the SQLSTATE or the driver's error kind.
    pub fn is_unique_violation(&self) -> bool {
        match self {
            Error::Query(q) => {
                if let Some(state) = &q.sqlstate {
                    return state == "23505" || state == "23000";
                }
                q.kind == QueryErrorKind::Constraint
            }
            _ => false,
        }
    }

    /// Best-effort extraction of the conflicting column name from the
    /// engine's error text.
    ///
    /// Deprecated compatibility path: only consulted when an upsert was
    /// issued without explicit conflict columns. Message formats vary
    /// across engines, versions, and locales, so this can and does miss.
    pub fn conflict_column_hint(&self) -> Option<String> {
        let Error::Query(q) = self else { return None };
        // "UNIQUE constraint failed: table.column" (SQLite)
        // "duplicate key value violates unique constraint "table_column_key"" (PG)
        // "Duplicate entry 'x' for key 'column'" (MySQL)
        let patterns = [
            r"UNIQUE constraint failed: \w+\.(\w+)",
            r#"Key \((\w+)\)=.*already exists"#,
            r"for key '(?:\w+\.)?(\w+)'",
        ];
        for pat in patterns {
            let Ok(re) = Regex::new(pat) else { continue };
            if let Some(caps) = re.captures(&q.message) {
                if let Some(m) = caps.get(1) {
                    tracing::warn!(
                        column = m.as_str(),
                        "conflict column recovered from error text; pass explicit \
                         conflict columns instead"
                    );
                    return Some(m.as_str().to_string());
                }
            }
        }
        None
    }
}

impl QueryError {
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.sql = Some(sql.into());
        self
    }

    pub fn with_sqlstate(mut self, state: impl Into<String>) -> Self {
        self.sqlstate = Some(state.into());
        self
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Connection(e) => write!(f, "connection error ({:?}): {}", e.kind, e.message),
            Error::Query(e) => {
                write!(f, "query error ({:?}): {}", e.kind, e.message)?;
                if let Some(state) = &e.sqlstate {
                    write!(f, " [sqlstate {}]", state)?;
                }
                if let Some(sql) = &e.sql {
                    write!(f, " in: {}", sql)?;
                }
                Ok(())
            }
            Error::Type(e) => {
                write!(f, "type error: expected {}, got {}", e.expected, e.actual)?;
                if let Some(col) = &e.column {
                    write!(f, " (column {})", col)?;
                }
                Ok(())
            }
            Error::Builder { message } => write!(f, "builder error: {}", message),
            Error::Unsupported { message } => write!(f, "unsupported: {}", message),
        }
    }
}

impl std::error::Error for Error {}

impl From<ConnectionError> for Error {
    fn from(e: ConnectionError) -> Self {
        Error::Connection(e)
    }
}

impl From<QueryError> for Error {
    fn from(e: QueryError) -> Self {
        Error::Query(e)
    }
}

impl From<TypeError> for Error {
    fn from(e: TypeError) -> Self {
        Error::Type(e)
    }
}
