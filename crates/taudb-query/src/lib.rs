//! Database facade, fluent SQL builder, and result caching for TauDb.
//!
//! `Db` is the single entry point: it owns an engine driver, optionally
//! shares a `QueryCache`, compiles statements, and exposes the fetch
//! helper family. `Query` is the chained builder that compiles to SELECT
//! text consumed by `Db`.

pub mod builder;
pub mod cache;
pub mod clause;
pub mod db;

#[cfg(test)]
pub(crate) mod testutil;

pub use builder::{Plucked, Query};
pub use cache::{CacheHandle, MemoryCache, QueryCache, cache_key, normalize_sql, sql_entry_key};
pub use clause::{COMPARISON_OPERATORS, Group, Operand, is_comparison_operator};
pub use db::{Db, DbConfig, ErrorPolicy, ResultSet, Where};
