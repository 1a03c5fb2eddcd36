//! SQLite connection implementation.
//!
//! One `SqliteDriver` owns one `sqlite3*` handle, opened lazily on the
//! first statement and reopened after `close`. Queries run as
//! prepare/step/finalize and every result row is copied out before the
//! statement is finalized, so the cursor returned to the caller holds no
//! engine state.

// Allow casts in FFI code where we need to match C types exactly
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_possible_wrap)]

use crate::types;
use libsqlite3_sys as ffi;
use std::ffi::{CStr, CString, c_int};
use std::ptr;
use std::sync::Mutex;
use taudb_core::{
    ColumnInfo, ConnectionError, ConnectionErrorKind, Cursor, Dialect, Driver, Error, QueryError,
    QueryErrorKind, Result, Row, UpsertMode, fallback_update_sql, insert_sql, native_upsert_sql,
};

/// Configuration for opening a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file, or ":memory:" for an in-memory database.
    pub path: String,
    /// Busy timeout in milliseconds.
    pub busy_timeout_ms: u32,
    /// How `upsert` resolves conflicts.
    pub upsert_mode: UpsertMode,
}

impl SqliteConfig {
    pub fn file(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            busy_timeout_ms: 5_000,
            upsert_mode: UpsertMode::default(),
        }
    }

    pub fn memory() -> Self {
        Self::file(":memory:")
    }

    #[must_use]
    pub fn with_upsert_mode(mut self, mode: UpsertMode) -> Self {
        self.upsert_mode = mode;
        self
    }
}

struct Inner {
    db: *mut ffi::sqlite3,
    last_error: Option<String>,
    last_changes: u64,
}

// The raw handle is only touched under the mutex, and the database is
// opened in serialized mode, so moving the driver between threads is safe.
unsafe impl Send for SqliteDriver {}
unsafe impl Sync for SqliteDriver {}

/// A lazily-connected SQLite database handle.
pub struct SqliteDriver {
    config: SqliteConfig,
    inner: Mutex<Inner>,
}

impl SqliteDriver {
    pub fn new(config: SqliteConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                db: ptr::null_mut(),
                last_error: None,
                last_changes: 0,
            }),
        }
    }

    /// In-memory database, mostly useful for tests.
    pub fn memory() -> Self {
        Self::new(SqliteConfig::memory())
    }

    fn ensure_open(&self, inner: &mut Inner) -> Result<*mut ffi::sqlite3> {
        if !inner.db.is_null() {
            return Ok(inner.db);
        }
        let c_path = CString::new(self.config.path.as_str()).map_err(|_| {
            Error::connection(ConnectionErrorKind::Other, "database path contains a NUL byte")
        })?;
        let mut db: *mut ffi::sqlite3 = ptr::null_mut();
        let flags = ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE;
        let rc = unsafe { ffi::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != ffi::SQLITE_OK {
            let message = if db.is_null() {
                format!("failed to open {} (code {rc})", self.config.path)
            } else {
                let msg = unsafe { CStr::from_ptr(ffi::sqlite3_errmsg(db)) }
                    .to_string_lossy()
                    .into_owned();
                unsafe { ffi::sqlite3_close(db) };
                msg
            };
            return Err(Error::Connection(ConnectionError {
                kind: ConnectionErrorKind::Refused,
                message,
            }));
        }
        if self.config.busy_timeout_ms > 0 {
            unsafe { ffi::sqlite3_busy_timeout(db, self.config.busy_timeout_ms as c_int) };
        }
        inner.db = db;
        tracing::debug!(path = %self.config.path, "sqlite connection opened");
        Ok(db)
    }

    fn run_query(&self, inner: &mut Inner, sql: &str) -> Result<Vec<Row>> {
        let db = self.ensure_open(inner)?;
        let stmt = prepare(db, sql)?;

        let col_count = unsafe { ffi::sqlite3_column_count(stmt) };
        let mut names = Vec::with_capacity(col_count as usize);
        for i in 0..col_count {
            let name = unsafe { types::column_name(stmt, i) }.unwrap_or_else(|| format!("col{i}"));
            names.push(name);
        }
        let columns = ColumnInfo::new(names);

        let mut rows = Vec::new();
        loop {
            let rc = unsafe { ffi::sqlite3_step(stmt) };
            match rc {
                ffi::SQLITE_ROW => {
                    let mut values = Vec::with_capacity(col_count as usize);
                    for i in 0..col_count {
                        values.push(unsafe { types::read_column(stmt, i) });
                    }
                    rows.push(Row::new(columns.clone(), values));
                }
                ffi::SQLITE_DONE => break,
                _ => {
                    let err = engine_error(db, sql);
                    unsafe { ffi::sqlite3_finalize(stmt) };
                    return Err(err);
                }
            }
        }
        unsafe { ffi::sqlite3_finalize(stmt) };
        Ok(rows)
    }

    fn run_execute(&self, inner: &mut Inner, sql: &str) -> Result<u64> {
        let db = self.ensure_open(inner)?;
        let stmt = prepare(db, sql)?;
        let rc = unsafe { ffi::sqlite3_step(stmt) };
        unsafe { ffi::sqlite3_finalize(stmt) };
        if rc != ffi::SQLITE_DONE && rc != ffi::SQLITE_ROW {
            return Err(engine_error(db, sql));
        }
        let changes = unsafe { ffi::sqlite3_changes(db) };
        let changes = u64::try_from(changes).unwrap_or(0);
        inner.last_changes = changes;
        Ok(changes)
    }
}

fn record<T>(inner: &mut Inner, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => inner.last_error = None,
        Err(err) => inner.last_error = Some(err.to_string()),
    }
    result
}

fn prepare(db: *mut ffi::sqlite3, sql: &str) -> Result<*mut ffi::sqlite3_stmt> {
    let c_sql = CString::new(sql).map_err(|_| {
        Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.replace('\0', "\\0")),
            sqlstate: None,
            message: "statement contains a NUL byte".to_string(),
        })
    })?;
    let mut stmt: *mut ffi::sqlite3_stmt = ptr::null_mut();
    let rc =
        unsafe { ffi::sqlite3_prepare_v2(db, c_sql.as_ptr(), -1, &mut stmt, ptr::null_mut()) };
    if rc != ffi::SQLITE_OK {
        if !stmt.is_null() {
            unsafe { ffi::sqlite3_finalize(stmt) };
        }
        return Err(engine_error(db, sql));
    }
    if stmt.is_null() {
        return Err(Error::Query(QueryError {
            kind: QueryErrorKind::Syntax,
            sql: Some(sql.to_string()),
            sqlstate: None,
            message: "statement is empty".to_string(),
        }));
    }
    Ok(stmt)
}

fn engine_error(db: *mut ffi::sqlite3, sql: &str) -> Error {
    let (code, message) = unsafe {
        let code = ffi::sqlite3_errcode(db);
        let ptr = ffi::sqlite3_errmsg(db);
        let message = if ptr.is_null() {
            format!("sqlite error code {code}")
        } else {
            CStr::from_ptr(ptr).to_string_lossy().into_owned()
        };
        (code, message)
    };
    Error::Query(QueryError {
        kind: kind_for(code),
        sql: Some(sql.to_string()),
        sqlstate: None,
        message,
    })
}

// Primary result code; extended codes keep it in the low byte.
fn kind_for(code: c_int) -> QueryErrorKind {
    match code & 0xff {
        ffi::SQLITE_ERROR => QueryErrorKind::Syntax,
        ffi::SQLITE_CONSTRAINT => QueryErrorKind::Constraint,
        ffi::SQLITE_BUSY | ffi::SQLITE_LOCKED => QueryErrorKind::Busy,
        ffi::SQLITE_PERM | ffi::SQLITE_AUTH | ffi::SQLITE_READONLY => QueryErrorKind::Permission,
        ffi::SQLITE_NOTFOUND => QueryErrorKind::NotFound,
        _ => QueryErrorKind::Other,
    }
}

struct MaterializedCursor {
    rows: std::vec::IntoIter<Row>,
}

impl Cursor for MaterializedCursor {
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

impl Driver for SqliteDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let result = self.ensure_open(&mut inner).map(|_| ());
        record(&mut inner, result)
    }

    fn database_name(&self) -> String {
        // The default attached schema; file path is configuration, not schema.
        "main".to_string()
    }

    fn query(&self, sql: &str) -> Result<Box<dyn Cursor>> {
        let mut inner = self.inner.lock().unwrap();
        let result = self.run_query(&mut inner, sql);
        let rows = record(&mut inner, result)?;
        Ok(Box::new(MaterializedCursor {
            rows: rows.into_iter(),
        }))
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        let result = self.run_execute(&mut inner, sql);
        record(&mut inner, result)
    }

    fn last_insert_id(&self) -> Result<i64> {
        let mut inner = self.inner.lock().unwrap();
        let db = self.ensure_open(&mut inner)?;
        Ok(unsafe { ffi::sqlite3_last_insert_rowid(db) })
    }

    fn affected_rows(&self) -> u64 {
        self.inner.lock().unwrap().last_changes
    }

    fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    fn table_exists(&self, table: &str, _schema: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = {}",
            Dialect::Sqlite.quote_str(table)
        );
        let mut cursor = self.query(&sql)?;
        Ok(cursor.next_row()?.is_some())
    }

    fn column_exists(&self, column: &str, table: &str, _schema: &str) -> Result<bool> {
        let sql = format!("PRAGMA table_info({})", Dialect::Sqlite.quote_ident(table));
        let mut cursor = self.query(&sql)?;
        while let Some(row) = cursor.next_row()? {
            if row.get_named("name").and_then(|v| v.as_str()) == Some(column) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn upsert(
        &self,
        table: &str,
        insert: &[(String, String)],
        update: &[(String, String)],
        conflict: &[String],
    ) -> Result<u64> {
        if insert.is_empty() {
            return Ok(0);
        }
        if self.config.upsert_mode == UpsertMode::Native {
            if let Some(sql) = native_upsert_sql(Dialect::Sqlite, table, insert, update, conflict)
            {
                return self.execute(&sql);
            }
            // No conflict target given; the legacy path below can still
            // recover one from the engine's error message.
        }
        match self.execute(&insert_sql(Dialect::Sqlite, table, insert)) {
            Ok(n) => Ok(n),
            Err(err) if err.is_unique_violation() => {
                let columns: Vec<String> = if conflict.is_empty() {
                    err.conflict_column_hint().into_iter().collect()
                } else {
                    conflict.to_vec()
                };
                if columns.is_empty() {
                    return Err(err);
                }
                match fallback_update_sql(Dialect::Sqlite, table, insert, update, &columns) {
                    Some(sql) => self.execute(&sql),
                    None => Ok(0),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.db.is_null() {
            unsafe { ffi::sqlite3_close(inner.db) };
            inner.db = ptr::null_mut();
            tracing::debug!(path = %self.config.path, "sqlite connection closed");
        }
    }
}

impl Drop for SqliteDriver {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use taudb_core::Value;

    fn seeded() -> SqliteDriver {
        let driver = SqliteDriver::memory();
        driver
            .execute(
                "CREATE TABLE users (\
                 id INTEGER PRIMARY KEY, \
                 email TEXT UNIQUE, \
                 name TEXT, \
                 visits INTEGER DEFAULT 0)",
            )
            .unwrap();
        driver
    }

    fn pairs(ps: &[(&str, &str)]) -> Vec<(String, String)> {
        ps.iter()
            .map(|(c, v)| ((*c).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn insert_and_query_roundtrip() {
        let driver = seeded();
        let n = driver
            .execute("INSERT INTO users (email, name) VALUES ('a@b', 'Ada')")
            .unwrap();
        assert_eq!(n, 1);
        assert_eq!(driver.affected_rows(), 1);
        assert_eq!(driver.last_insert_id().unwrap(), 1);

        let mut cursor = driver.query("SELECT id, name FROM users").unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get_named("id"), Some(&Value::Int(1)));
        assert_eq!(row.get_named("name"), Some(&Value::Text("Ada".into())));
        assert!(cursor.next_row().unwrap().is_none());
    }

    #[test]
    fn escaped_text_roundtrips_through_the_engine() {
        let driver = seeded();
        for (i, original) in [
            "it's",
            "a \"quoted\" word",
            "back\\slash",
            "new\nline",
            "nul\0byte",
        ]
        .into_iter()
        .enumerate()
        {
            let literal = Dialect::Sqlite.quote_str(original);
            driver
                .execute(&format!(
                    "INSERT INTO users (email, name) VALUES ({}, {literal})",
                    Dialect::Sqlite.quote_str(&format!("{i}@x"))
                ))
                .unwrap();
            let mut cursor = driver
                .query(&format!("SELECT name FROM users WHERE name = {literal}"))
                .unwrap();
            let row = cursor.next_row().unwrap().unwrap();
            assert_eq!(row.get(0).and_then(|v| v.as_str()), Some(original));
        }
    }

    #[test]
    fn query_error_carries_kind_and_sql() {
        let driver = seeded();
        match driver.query("SELEC nonsense") {
            Ok(_) => panic!("malformed statement was accepted"),
            Err(Error::Query(q)) => {
                assert_eq!(q.kind, QueryErrorKind::Syntax);
                assert_eq!(q.sql.as_deref(), Some("SELEC nonsense"));
            }
            Err(other) => panic!("unexpected error: {other}"),
        }
        assert!(driver.last_error().unwrap().contains("syntax"));
    }

    #[test]
    fn unique_violation_is_recognized() {
        let driver = seeded();
        driver
            .execute("INSERT INTO users (email) VALUES ('dup@x')")
            .unwrap();
        let err = driver
            .execute("INSERT INTO users (email) VALUES ('dup@x')")
            .unwrap_err();
        assert!(err.is_unique_violation());
        assert_eq!(err.conflict_column_hint().as_deref(), Some("email"));
    }

    #[test]
    fn schema_introspection() {
        let driver = seeded();
        assert!(driver.table_exists("users", "main").unwrap());
        assert!(!driver.table_exists("ghosts", "main").unwrap());
        assert!(driver.column_exists("email", "users", "main").unwrap());
        assert!(!driver.column_exists("age", "users", "main").unwrap());
    }

    #[test]
    fn native_upsert_updates_in_place() {
        let driver = seeded();
        let insert = pairs(&[("email", "'a@b'"), ("visits", "1")]);
        let update = pairs(&[("visits", "2")]);
        driver
            .upsert("users", &insert, &update, &["email".to_string()])
            .unwrap();
        driver
            .upsert("users", &insert, &update, &["email".to_string()])
            .unwrap();

        let mut cursor = driver
            .query("SELECT COUNT(*), MAX(visits) FROM users")
            .unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get(1), Some(&Value::Int(2)));
    }

    #[test]
    fn legacy_upsert_falls_back_to_update() {
        let driver =
            SqliteDriver::new(SqliteConfig::memory().with_upsert_mode(UpsertMode::Legacy));
        driver
            .execute("CREATE TABLE users (email TEXT UNIQUE, visits INTEGER)")
            .unwrap();

        let insert = pairs(&[("email", "'a@b'"), ("visits", "1")]);
        let update = pairs(&[("visits", "9")]);
        driver
            .upsert("users", &insert, &update, &["email".to_string()])
            .unwrap();
        // Second call hits the unique index and takes the update path.
        driver
            .upsert("users", &insert, &update, &["email".to_string()])
            .unwrap();

        let mut cursor = driver.query("SELECT COUNT(*), MAX(visits) FROM users").unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(1)));
        assert_eq!(row.get(1), Some(&Value::Int(9)));
    }

    #[test]
    fn legacy_upsert_recovers_conflict_column_from_the_error() {
        let driver =
            SqliteDriver::new(SqliteConfig::memory().with_upsert_mode(UpsertMode::Legacy));
        driver
            .execute("CREATE TABLE users (email TEXT UNIQUE, visits INTEGER)")
            .unwrap();

        let insert = pairs(&[("email", "'a@b'"), ("visits", "1")]);
        let update = pairs(&[("visits", "5")]);
        driver.upsert("users", &insert, &update, &[]).unwrap();
        driver.upsert("users", &insert, &update, &[]).unwrap();

        let mut cursor = driver.query("SELECT visits FROM users").unwrap();
        let row = cursor.next_row().unwrap().unwrap();
        assert_eq!(row.get(0), Some(&Value::Int(5)));
    }

    #[test]
    fn close_then_reuse_reconnects() {
        let driver = SqliteDriver::new(SqliteConfig::file(":memory:"));
        driver.execute("CREATE TABLE t (x INTEGER)").unwrap();
        driver.close();
        // A fresh in-memory database; the old table is gone but the handle works.
        let mut cursor = driver.query("SELECT 1").unwrap();
        assert_eq!(
            cursor.next_row().unwrap().unwrap().get(0),
            Some(&Value::Int(1))
        );
    }
}
