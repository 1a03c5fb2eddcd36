//! TauDb Rust - an engine-agnostic database facade with a fluent SQL
//! builder and transparent result caching.
//!
//! The facade speaks plain SQL strings to pluggable drivers (SQLite and
//! PostgreSQL ship in the workspace) and renders portable SQL through a
//! per-engine [`Dialect`]. Cached result sets hide behind the same handle
//! type as live cursors, so callers never branch on where rows come from.
//!
//! # Quick Start
//!
//! ```no_run
//! use taudb::prelude::*;
//!
//! # fn demo() -> taudb::Result<()> {
//! let db = Db::new(Box::new(SqliteDriver::memory()))
//!     .with_config(DbConfig {
//!         error_policy: ErrorPolicy::Propagate,
//!         ..DbConfig::default()
//!     });
//!
//! db.query("CREATE TABLE users (id INTEGER PRIMARY KEY, username TEXT)")?;
//! db.insert("users", &[("username", Value::from("ada"))])?;
//!
//! let rows = db
//!     .table("users")
//!     .select("username")
//!     .where_op("id", "<=", 10)
//!     .order_by("id")
//!     .limit(2)
//!     .fetch()?;
//! # let _ = rows;
//! # Ok(())
//! # }
//! ```

pub use taudb_core::{
    ColumnInfo, ConnectionError, ConnectionErrorKind, ConnectionInfo, Cursor, Dialect, Driver,
    Error, FromRow, FromValue, QueryError, QueryErrorKind, Result, Row, SqlExpr, TypeError,
    UpsertMode, Value,
};
pub use taudb_postgres::{PgConfig, PgDriver};
pub use taudb_query::{
    CacheHandle, Db, DbConfig, ErrorPolicy, Group, MemoryCache, Operand, Plucked, Query,
    QueryCache, ResultSet, Where,
};
pub use taudb_sqlite::{SqliteConfig, SqliteDriver};

/// Common imports for application code.
pub mod prelude {
    pub use crate::{
        Db, DbConfig, Dialect, Driver, Error, ErrorPolicy, FromRow, MemoryCache, PgConfig,
        PgDriver, ResultSet, Row, SqlExpr, SqliteConfig, SqliteDriver, UpsertMode, Value, Where,
    };
}
