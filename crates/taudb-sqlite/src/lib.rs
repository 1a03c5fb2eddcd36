//! SQLite driver for taudb.
//!
//! Wraps the raw libsqlite3 C API behind the [`taudb_core::Driver`]
//! contract. The connection opens lazily on first use and all result rows
//! are materialized before the cursor is handed back, so no statement
//! handle outlives a driver call.

// FFI bindings require unsafe code - this is expected for database drivers
#![allow(unsafe_code)]

pub mod connection;
mod types;

pub use connection::{SqliteConfig, SqliteDriver};
