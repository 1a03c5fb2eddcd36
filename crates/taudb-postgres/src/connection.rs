//! PostgreSQL connection implementation.
//!
//! One `PgDriver` owns at most one [`postgres::Client`], established
//! lazily with a short retry loop and dropped on `close`. The engine
//! reports SQLSTATE codes on failure, which feed structured conflict
//! detection instead of message scraping.

use crate::types;
use postgres::{Client, NoTls};
use std::sync::Mutex;
use std::time::Duration;
use taudb_core::{
    ConnectionErrorKind, ConnectionInfo, Cursor, Dialect, Driver, Error, QueryError,
    QueryErrorKind, Result, Row, UpsertMode, fallback_update_sql, insert_sql, native_upsert_sql,
};

/// Configuration for a PostgreSQL connection.
#[derive(Debug, Clone)]
pub struct PgConfig {
    pub info: ConnectionInfo,
    /// How `upsert` resolves conflicts.
    pub upsert_mode: UpsertMode,
    /// Additional connection attempts after the first fails.
    pub connect_retries: u32,
    /// Pause between connection attempts.
    pub retry_delay: Duration,
}

impl PgConfig {
    pub fn new(info: ConnectionInfo) -> Self {
        Self {
            info,
            upsert_mode: UpsertMode::default(),
            connect_retries: 2,
            retry_delay: Duration::from_millis(500),
        }
    }

    #[must_use]
    pub fn with_upsert_mode(mut self, mode: UpsertMode) -> Self {
        self.upsert_mode = mode;
        self
    }

    fn connection_string(&self) -> String {
        let mut parts = Vec::new();
        if !self.info.host.is_empty() {
            parts.push(format!("host={}", quote_param(&self.info.host)));
        }
        if self.info.port != 0 {
            parts.push(format!("port={}", self.info.port));
        }
        if !self.info.user.is_empty() {
            parts.push(format!("user={}", quote_param(&self.info.user)));
        }
        if !self.info.password.is_empty() {
            parts.push(format!("password={}", quote_param(&self.info.password)));
        }
        if !self.info.database.is_empty() {
            parts.push(format!("dbname={}", quote_param(&self.info.database)));
        }
        parts.join(" ")
    }
}

// Keyword/value connection strings quote values with single quotes and
// backslash escapes.
fn quote_param(value: &str) -> String {
    if !value.is_empty() && !value.contains([' ', '\'', '\\']) {
        return value.to_string();
    }
    let escaped = value.replace('\\', "\\\\").replace('\'', "\\'");
    format!("'{escaped}'")
}

struct Inner {
    client: Option<Client>,
    last_error: Option<String>,
    last_changes: u64,
}

/// A lazily-connected PostgreSQL database handle.
pub struct PgDriver {
    config: PgConfig,
    inner: Mutex<Inner>,
}

impl PgDriver {
    pub fn new(config: PgConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                client: None,
                last_error: None,
                last_changes: 0,
            }),
        }
    }

    fn ensure_connected<'a>(&self, inner: &'a mut Inner) -> Result<&'a mut Client> {
        if inner.client.is_none() {
            let dsn = self.config.connection_string();
            let mut attempt = 0;
            let client = loop {
                match Client::connect(&dsn, NoTls) {
                    Ok(client) => break client,
                    Err(err) if attempt < self.config.connect_retries => {
                        attempt += 1;
                        tracing::warn!(
                            attempt,
                            error = %err,
                            "postgres connection failed, retrying"
                        );
                        std::thread::sleep(self.config.retry_delay);
                    }
                    Err(err) => {
                        return Err(Error::connection(
                            ConnectionErrorKind::Refused,
                            err.to_string(),
                        ));
                    }
                }
            };
            tracing::debug!(database = %self.config.info.database, "postgres connection opened");
            inner.client = Some(client);
        }
        inner.client.as_mut().ok_or_else(|| {
            Error::connection(ConnectionErrorKind::Other, "connection unavailable")
        })
    }

    fn run_query(&self, inner: &mut Inner, sql: &str) -> Result<Vec<Row>> {
        let client = self.ensure_connected(inner)?;
        let messages = client
            .simple_query(sql)
            .map_err(|err| map_error(&err, Some(sql)))?;
        Ok(types::collect_rows(messages))
    }

    fn run_execute(&self, inner: &mut Inner, sql: &str) -> Result<u64> {
        let client = self.ensure_connected(inner)?;
        let changes = client
            .execute(sql, &[])
            .map_err(|err| map_error(&err, Some(sql)))?;
        inner.last_changes = changes;
        Ok(changes)
    }

    /// The PostgreSQL schema to introspect. Callers pass the database name
    /// by default, which is not a schema, so anything naming the configured
    /// database (or nothing) means the default `public` schema.
    fn schema_name(&self, schema: &str) -> String {
        if schema.is_empty() || schema == self.config.info.database {
            "public".to_string()
        } else {
            schema.to_string()
        }
    }
}

fn record<T>(inner: &mut Inner, result: Result<T>) -> Result<T> {
    match &result {
        Ok(_) => inner.last_error = None,
        Err(err) => inner.last_error = Some(err.to_string()),
    }
    result
}

fn map_error(err: &postgres::Error, sql: Option<&str>) -> Error {
    if let Some(db) = err.as_db_error() {
        let state = db.code().code();
        let kind = if state.starts_with("23") {
            QueryErrorKind::Constraint
        } else if state == "42501" {
            QueryErrorKind::Permission
        } else if state == "42P01" || state == "42703" {
            QueryErrorKind::NotFound
        } else if state.starts_with("42") {
            QueryErrorKind::Syntax
        } else if state == "55P03" || state.starts_with("40") {
            QueryErrorKind::Busy
        } else {
            QueryErrorKind::Other
        };
        Error::Query(QueryError {
            kind,
            sql: sql.map(String::from),
            sqlstate: Some(state.to_string()),
            message: db.message().to_string(),
        })
    } else if err.is_closed() {
        Error::connection(ConnectionErrorKind::Closed, err.to_string())
    } else {
        Error::connection(ConnectionErrorKind::Other, err.to_string())
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

impl Driver for PgDriver {
    fn dialect(&self) -> Dialect {
        Dialect::Postgres
    }

    fn connect(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let result = self.ensure_connected(&mut inner).map(|_| ());
        record(&mut inner, result)
    }

    fn database_name(&self) -> String {
        self.config.info.database.clone()
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
        let client = self.ensure_connected(&mut inner)?;
        // Defined only after an insert into a table with a sequence.
        let row = client
            .query_one("SELECT lastval()", &[])
            .map_err(|err| map_error(&err, Some("SELECT lastval()")))?;
        row.try_get(0)
            .map_err(|err| map_error(&err, Some("SELECT lastval()")))
    }

    fn affected_rows(&self) -> u64 {
        self.inner.lock().unwrap().last_changes
    }

    fn last_error(&self) -> Option<String> {
        self.inner.lock().unwrap().last_error.clone()
    }

    fn table_exists(&self, table: &str, schema: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM information_schema.tables \
             WHERE table_schema = {} AND table_name = {}",
            Dialect::Postgres.quote_str(&self.schema_name(schema)),
            Dialect::Postgres.quote_str(table)
        );
        let mut cursor = self.query(&sql)?;
        Ok(cursor.next_row()?.is_some())
    }

    fn column_exists(&self, column: &str, table: &str, schema: &str) -> Result<bool> {
        let sql = format!(
            "SELECT 1 FROM information_schema.columns \
             WHERE table_schema = {} AND table_name = {} AND column_name = {}",
            Dialect::Postgres.quote_str(&self.schema_name(schema)),
            Dialect::Postgres.quote_str(table),
            Dialect::Postgres.quote_str(column)
        );
        let mut cursor = self.query(&sql)?;
        Ok(cursor.next_row()?.is_some())
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
            if let Some(sql) =
                native_upsert_sql(Dialect::Postgres, table, insert, update, conflict)
            {
                return self.execute(&sql);
            }
        }
        match self.execute(&insert_sql(Dialect::Postgres, table, insert)) {
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
                match fallback_update_sql(Dialect::Postgres, table, insert, update, &columns) {
                    Some(sql) => self.execute(&sql),
                    None => Ok(0),
                }
            }
            Err(err) => Err(err),
        }
    }

    fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.client.take().is_some() {
            tracing::debug!(database = %self.config.info.database, "postgres connection closed");
        }
    }
}
