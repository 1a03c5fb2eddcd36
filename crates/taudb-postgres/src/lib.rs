//! PostgreSQL driver for taudb.
//!
//! Built on the blocking `postgres` client. Queries go over the simple
//! query protocol, so every column comes back in the engine's text
//! representation; [`taudb_core::Value`]'s accessors parse numerics out of
//! text on demand, which matches how the rest of the stack treats result
//! data.

pub mod connection;
mod types;

pub use connection::{PgConfig, PgDriver};
