//! Core types and traits for TauDb.
//!
//! This crate provides the foundational abstractions shared by the facade,
//! the query builder, and the engine drivers:
//!
//! - `Value` tagged union for SQL-facing data
//! - `SqlExpr` verbatim-text marker that bypasses escaping
//! - `Row` / `ColumnInfo` ordered result rows
//! - `Driver` / `Cursor` traits every engine implements
//! - `Dialect` per-engine quoting and escaping rules
//! - the error taxonomy

pub mod dialect;
pub mod driver;
pub mod error;
pub mod expr;
pub mod row;
pub mod value;

pub use dialect::Dialect;
pub use driver::{
    ConnectionInfo, Cursor, Driver, UpsertMode, fallback_update_sql, insert_sql, native_upsert_sql,
};
pub use error::{
    ConnectionError, ConnectionErrorKind, Error, QueryError, QueryErrorKind, Result, TypeError,
};
pub use expr::SqlExpr;
pub use row::{ColumnInfo, FromRow, FromValue, Row};
pub use value::Value;
