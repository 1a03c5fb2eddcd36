//! Raw SQL fragments that bypass escaping and quoting.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A literal SQL fragment emitted verbatim.
///
/// Wherever a field name or a value is accepted, a `SqlExpr` passes through
/// untouched: no identifier quoting, no string escaping. The caller is
/// responsible for the fragment being valid (and safe) SQL.
///
/// ```
/// use taudb_core::SqlExpr;
///
/// let expr = SqlExpr::new("COUNT(*) + 1");
/// assert_eq!(expr.as_str(), "COUNT(*) + 1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SqlExpr(String);

impl SqlExpr {
    pub fn new(sql: impl Into<String>) -> Self {
        Self(sql.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SqlExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SqlExpr {
    fn from(sql: &str) -> Self {
        Self(sql.to_string())
    }
}

impl From<String> for SqlExpr {
    fn from(sql: String) -> Self {
        Self(sql)
    }
}
