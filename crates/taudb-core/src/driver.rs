//! The engine driver contract.
//!
//! One driver instance owns exactly one physical connection, established
//! lazily and reused across statements. Drivers guard their raw handle
//! internally so the trait takes `&self`, but they promise no coordination
//! beyond memory safety: the whole stack is single-threaded blocking I/O.

use crate::dialect::Dialect;
use crate::error::Result;
use crate::row::Row;
use serde::{Deserialize, Serialize};

/// Connection parameters supplied by the caller at construction.
///
/// The live handle itself never appears here; each driver holds its own
/// and re-establishes it on first use after `close`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionInfo {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,
}

impl ConnectionInfo {
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
            ..Self::default()
        }
    }

    pub fn with_host(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn with_credentials(
        mut self,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.user = user.into();
        self.password = password.into();
        self
    }
}

/// How a driver performs insert-or-update.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UpsertMode {
    /// One statement using the engine's native conflict clause.
    #[default]
    Native,
    /// Insert first, update on a uniqueness violation. For engines (or
    /// engine versions) without a native conflict clause.
    Legacy,
}

/// A pending result set. Dropping the cursor releases driver resources.
pub trait Cursor {
    /// Advance to the next row; `None` past the last row.
    fn next_row(&mut self) -> Result<Option<Row>>;

    /// Drain the remaining rows.
    fn all_rows(&mut self) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        while let Some(row) = self.next_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

/// Per-engine SQL execution and connection management.
pub trait Driver {
    /// The dialect governing how statements for this driver are rendered.
    fn dialect(&self) -> Dialect;

    /// Ensure a live connection exists. Idempotent.
    fn connect(&self) -> Result<()>;

    /// The configured database name, used as the default schema for
    /// existence checks.
    fn database_name(&self) -> String;

    /// Execute a SELECT-class statement, returning a cursor over its rows.
    fn query(&self, sql: &str) -> Result<Box<dyn Cursor>>;

    /// Execute a non-SELECT statement, returning the affected row count.
    fn execute(&self, sql: &str) -> Result<u64>;

    fn last_insert_id(&self) -> Result<i64>;

    fn affected_rows(&self) -> u64;

    /// Message of the most recent error on this connection, if any.
    fn last_error(&self) -> Option<String>;

    fn table_exists(&self, table: &str, schema: &str) -> Result<bool>;

    fn column_exists(&self, column: &str, table: &str, schema: &str) -> Result<bool>;

    /// Insert-or-update. `insert` and `update` pair raw column names with
    /// already-escaped value literals; `conflict` names the unique columns
    /// the caller expects violations on (may be empty, in which case a
    /// legacy-mode driver falls back to best-effort conflict recovery).
    fn upsert(
        &self,
        table: &str,
        insert: &[(String, String)],
        update: &[(String, String)],
        conflict: &[String],
    ) -> Result<u64>;

    /// Drop the live connection. The next statement reconnects.
    fn close(&self);
}

/// Plain INSERT from (column, escaped literal) pairs.
pub fn insert_sql(dialect: Dialect, table: &str, values: &[(String, String)]) -> String {
    let columns: Vec<String> = values.iter().map(|(c, _)| dialect.quote_ident(c)).collect();
    let literals: Vec<&str> = values.iter().map(|(_, v)| v.as_str()).collect();
    format!(
        "INSERT INTO {} ({}) VALUES ({})",
        dialect.quote_ident(table),
        columns.join(", "),
        literals.join(", ")
    )
}

fn set_list(dialect: Dialect, values: &[(String, String)]) -> String {
    values
        .iter()
        .map(|(c, v)| format!("{} = {}", dialect.quote_ident(c), v))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Single-statement upsert for dialects with a native conflict clause.
/// `None` when the dialect needs a conflict target and none was given; the
/// caller then takes the insert-then-update path.
pub fn native_upsert_sql(
    dialect: Dialect,
    table: &str,
    insert: &[(String, String)],
    update: &[(String, String)],
    conflict: &[String],
) -> Option<String> {
    let base = insert_sql(dialect, table, insert);
    match dialect {
        Dialect::Mysql => {
            if update.is_empty() {
                Some(base.replacen("INSERT INTO", "INSERT IGNORE INTO", 1))
            } else {
                Some(format!(
                    "{} ON DUPLICATE KEY UPDATE {}",
                    base,
                    set_list(dialect, update)
                ))
            }
        }
        Dialect::Sqlite | Dialect::Postgres => {
            if conflict.is_empty() {
                return None;
            }
            let target: Vec<String> = conflict.iter().map(|c| dialect.quote_ident(c)).collect();
            let action = if update.is_empty() {
                "DO NOTHING".to_string()
            } else {
                format!("DO UPDATE SET {}", set_list(dialect, update))
            };
            Some(format!(
                "{} ON CONFLICT ({}) {}",
                base,
                target.join(", "),
                action
            ))
        }
    }
}

/// The UPDATE applied after an insert hit a uniqueness violation. Keyed on
/// the conflict columns' inserted values; `None` when there is nothing to
/// update or a conflict column has no inserted value to key on.
pub fn fallback_update_sql(
    dialect: Dialect,
    table: &str,
    insert: &[(String, String)],
    update: &[(String, String)],
    conflict: &[String],
) -> Option<String> {
    if update.is_empty() || conflict.is_empty() {
        return None;
    }
    let mut predicates = Vec::with_capacity(conflict.len());
    for column in conflict {
        let literal = insert
            .iter()
            .find(|(c, _)| c == column)
            .map(|(_, v)| v.as_str())?;
        predicates.push(format!("{} = {}", dialect.quote_ident(column), literal));
    }
    Some(format!(
        "UPDATE {} SET {} WHERE {}",
        dialect.quote_ident(table),
        set_list(dialect, update),
        predicates.join(" AND ")
    ))
}
