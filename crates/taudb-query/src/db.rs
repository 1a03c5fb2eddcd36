//! The database facade.
//!
//! `Db` combines one engine driver, an optional shared result cache, and
//! per-instance policy. All statement text is compiled here (escaping,
//! where clauses, insert/update statements) and handed to the driver as
//! literal SQL. Results come back as a `ResultSet` that is either a live
//! driver cursor or a cache handle; the fetch helpers work identically on
//! both.

use crate::cache::{CacheHandle, QueryCache, row_key};
use std::sync::{Arc, Mutex};
use taudb_core::{Cursor, Dialect, Driver, FromRow, Result, Row, Value};

/// What happens when the driver reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ErrorPolicy {
    /// Log a diagnostic and terminate the process. The default, matching
    /// the historical contract: most call sites never check.
    #[default]
    Fatal,
    /// Return the error; the most recent message stays readable through
    /// `last_error()`.
    Propagate,
}

#[derive(Debug, Clone, Default)]
pub struct DbConfig {
    pub error_policy: ErrorPolicy,
    /// TTL in seconds applied when a caller asks for caching without an
    /// explicit TTL.
    pub default_ttl: u64,
}

/// A pending result: live driver cursor or cached row set.
///
/// Callers holding one must branch through the facade (`fetch_next`,
/// `free_result`); the two variants have different fetch mechanics.
pub enum ResultSet {
    Live(Box<dyn Cursor>),
    Cached(CacheHandle),
}

/// A where-clause predicate: raw SQL text or a column/value mapping.
pub enum Where {
    Raw(String),
    Map(Vec<(String, Value)>),
}

impl From<&str> for Where {
    fn from(raw: &str) -> Self {
        Where::Raw(raw.to_string())
    }
}

impl From<String> for Where {
    fn from(raw: String) -> Self {
        Where::Raw(raw)
    }
}

impl From<Vec<(String, Value)>> for Where {
    fn from(map: Vec<(String, Value)>) -> Self {
        Where::Map(map)
    }
}

impl<const N: usize> From<[(&str, Value); N]> for Where {
    fn from(map: [(&str, Value); N]) -> Self {
        Where::Map(map.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
    }
}

/// The facade. One driver, optional shared cache, per-instance policy.
pub struct Db {
    driver: Box<dyn Driver>,
    cache: Option<Arc<dyn QueryCache>>,
    config: DbConfig,
    last_error: Mutex<Option<String>>,
}

impl Db {
    pub fn new(driver: Box<dyn Driver>) -> Self {
        Self {
            driver,
            cache: None,
            config: DbConfig::default(),
            last_error: Mutex::new(None),
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn QueryCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_config(mut self, config: DbConfig) -> Self {
        self.config = config;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.driver.dialect()
    }

    pub fn connect(&self) -> Result<()> {
        self.guard(self.driver.connect())
    }

    pub fn close(&self) {
        self.driver.close();
    }

    /// Message of the most recent facade-level error, if any.
    pub fn last_error(&self) -> Option<String> {
        self.last_error
            .lock()
            .unwrap()
            .clone()
            .or_else(|| self.driver.last_error())
    }

    /// Apply the error policy to a driver result.
    fn guard<T>(&self, result: Result<T>) -> Result<T> {
        match result {
            Ok(v) => Ok(v),
            Err(err) => {
                *self.last_error.lock().unwrap() = Some(err.to_string());
                match self.config.error_policy {
                    ErrorPolicy::Fatal => {
                        tracing::error!(error = %err, "database error, terminating");
                        std::process::exit(1);
                    }
                    ErrorPolicy::Propagate => Err(err),
                }
            }
        }
    }

    // ---- statement compilation ----

    /// Compile a value into a SQL literal, type-directed.
    pub fn escape(&self, value: &Value) -> String {
        let dialect = self.dialect();
        match value {
            Value::Null => dialect.null_literal().to_string(),
            Value::Now => dialect.now().to_string(),
            Value::Expr(e) => e.as_str().to_string(),
            Value::Text(s) => dialect.quote_str(s),
            Value::Bytes(b) => dialect.quote_bytes(b),
            Value::Float(f) => f.to_string(),
            Value::Int(i) => i.to_string(),
            Value::Bool(b) => dialect.bool_literal(*b).to_string(),
        }
    }

    /// Quote a field or table name per the driver's dialect.
    pub fn field_name(&self, name: &str) -> String {
        self.dialect().quote_ident(name)
    }

    /// Compile a predicate into a `WHERE ...` fragment. Raw text gets the
    /// keyword prepended only when it is not already there; an empty
    /// predicate compiles to an empty string.
    pub fn where_clause(&self, predicate: impl Into<Where>) -> String {
        match predicate.into() {
            Where::Raw(raw) => {
                let trimmed = raw.trim();
                if trimmed.is_empty() {
                    return String::new();
                }
                let head = trimmed.get(..5).unwrap_or("");
                if head.eq_ignore_ascii_case("where") {
                    trimmed.to_string()
                } else {
                    format!("WHERE {}", trimmed)
                }
            }
            Where::Map(pairs) => {
                if pairs.is_empty() {
                    return String::new();
                }
                let parts: Vec<String> = pairs
                    .iter()
                    .map(|(col, val)| {
                        format!("{} = {}", self.field_name(col), self.escape(val))
                    })
                    .collect();
                format!("WHERE {}", parts.join(" AND "))
            }
        }
    }

    /// Compile an INSERT statement. An empty value map is a documented
    /// no-op and compiles to nothing.
    pub fn insert_statement(&self, table: &str, values: &[(&str, Value)]) -> Option<String> {
        if values.is_empty() {
            return None;
        }
        let columns: Vec<String> = values.iter().map(|(c, _)| self.field_name(c)).collect();
        let literals: Vec<String> = values.iter().map(|(_, v)| self.escape(v)).collect();
        Some(format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.field_name(table),
            columns.join(", "),
            literals.join(", ")
        ))
    }

    /// Compile an UPDATE statement; empty value map compiles to nothing.
    pub fn update_statement(
        &self,
        table: &str,
        values: &[(&str, Value)],
        predicate: impl Into<Where>,
    ) -> Option<String> {
        if values.is_empty() {
            return None;
        }
        let sets: Vec<String> = values
            .iter()
            .map(|(c, v)| format!("{} = {}", self.field_name(c), self.escape(v)))
            .collect();
        let mut sql = format!("UPDATE {} SET {}", self.field_name(table), sets.join(", "));
        let where_sql = self.where_clause(predicate);
        if !where_sql.is_empty() {
            sql.push(' ');
            sql.push_str(&where_sql);
        }
        Some(sql)
    }

    // ---- execution ----

    /// Execute a non-SELECT statement.
    pub fn query(&self, sql: &str) -> Result<u64> {
        tracing::debug!(sql, "execute");
        self.guard(self.driver.execute(sql))
    }

    /// Execute a SELECT. With `ttl_secs > 0` and a configured cache the
    /// result is served from (or saved into) the cache, and the caller
    /// receives a cache handle indistinguishable from a fresh one;
    /// otherwise a live cursor.
    pub fn select(&self, sql: &str, ttl_secs: u64) -> Result<ResultSet> {
        if ttl_secs > 0 {
            if let Some(cache) = &self.cache {
                if let Some(handle) = cache.load(sql) {
                    return Ok(ResultSet::Cached(handle));
                }
                tracing::debug!(sql, ttl_secs, "cache miss, querying live");
                let mut cursor = self.guard(self.driver.query(sql))?;
                let rows = self.guard(cursor.all_rows())?;
                let handle = cache.save(rows, sql, ttl_secs, "select");
                return Ok(ResultSet::Cached(handle));
            }
        }
        tracing::debug!(sql, "select live");
        let cursor = self.guard(self.driver.query(sql))?;
        Ok(ResultSet::Live(cursor))
    }

    /// Advance a result set by one row, live or cached.
    pub fn fetch(&self, result: &mut ResultSet) -> Result<Option<Row>> {
        match result {
            ResultSet::Live(cursor) => self.guard(cursor.next_row()),
            ResultSet::Cached(handle) => Ok(self.cache_ref().fetch_next(*handle)),
        }
    }

    /// Advance a result set by one row, mapped through [`FromRow`].
    pub fn fetch_object<T: FromRow>(&self, result: &mut ResultSet) -> Result<Option<T>> {
        match self.fetch(result)? {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// Release a result set: cache handles are forgotten, live cursors
    /// dropped (which frees driver resources).
    pub fn free_result(&self, result: ResultSet) {
        match result {
            ResultSet::Live(cursor) => drop(cursor),
            ResultSet::Cached(handle) => self.cache_ref().free(handle),
        }
    }

    fn cache_ref(&self) -> &dyn QueryCache {
        // a Cached variant can only exist when a cache is configured
        self.cache
            .as_deref()
            .unwrap_or(&NO_CACHE)
    }

    // ---- fetch helpers ----

    /// First row of the result, if any.
    pub fn fetch_one(&self, sql: &str, ttl_secs: u64) -> Result<Option<Row>> {
        let mut result = self.select(sql, ttl_secs)?;
        let row = self.fetch(&mut result)?;
        self.free_result(result);
        Ok(row)
    }

    /// All rows.
    pub fn fetch_all(&self, sql: &str, ttl_secs: u64) -> Result<Vec<Row>> {
        let mut result = self.select(sql, ttl_secs)?;
        let mut rows = Vec::new();
        while let Some(row) = self.fetch(&mut result)? {
            rows.push(row);
        }
        self.free_result(result);
        Ok(rows)
    }

    /// All rows keyed by `id_column`, falling back to the first column
    /// when the name is empty or missing from a row. A later row with a
    /// duplicate key replaces the earlier one.
    pub fn fetch_all_with_id(
        &self,
        sql: &str,
        id_column: &str,
        ttl_secs: u64,
    ) -> Result<Vec<(String, Row)>> {
        let rows = self.fetch_all(sql, ttl_secs)?;
        let mut keyed: Vec<(String, Row)> = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row_key(&row, id_column);
            if let Some(slot) = keyed.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = row;
            } else {
                keyed.push((key, row));
            }
        }
        Ok(keyed)
    }

    /// First column key, second column value. Duplicate keys replace.
    pub fn fetch_pairs(&self, sql: &str, ttl_secs: u64) -> Result<Vec<(String, Value)>> {
        let rows = self.fetch_all(sql, ttl_secs)?;
        let mut pairs: Vec<(String, Value)> = Vec::with_capacity(rows.len());
        for row in rows {
            let key = row.get(0).map_or_else(String::new, |v| v.to_key_string());
            let value = row.get(1).or_else(|| row.get(0)).cloned().unwrap_or(Value::Null);
            if let Some(slot) = pairs.iter_mut().find(|(k, _)| *k == key) {
                slot.1 = value;
            } else {
                pairs.push((key, value));
            }
        }
        Ok(pairs)
    }

    /// First column of every row.
    pub fn fetch_column(&self, sql: &str, ttl_secs: u64) -> Result<Vec<Value>> {
        let rows = self.fetch_all(sql, ttl_secs)?;
        Ok(rows
            .into_iter()
            .map(|row| row.get(0).cloned().unwrap_or(Value::Null))
            .collect())
    }

    /// First column of the first row.
    pub fn fetch_value(&self, sql: &str, ttl_secs: u64) -> Result<Option<Value>> {
        Ok(self
            .fetch_one(sql, ttl_secs)?
            .and_then(|row| row.get(0).cloned()))
    }

    /// First row mapped into `T`.
    pub fn fetch_one_object<T: FromRow>(&self, sql: &str, ttl_secs: u64) -> Result<Option<T>> {
        match self.fetch_one(sql, ttl_secs)? {
            Some(row) => Ok(Some(T::from_row(&row)?)),
            None => Ok(None),
        }
    }

    /// All rows mapped into `T`.
    pub fn fetch_all_object<T: FromRow>(&self, sql: &str, ttl_secs: u64) -> Result<Vec<T>> {
        self.fetch_all(sql, ttl_secs)?
            .iter()
            .map(T::from_row)
            .collect()
    }

    // ---- DML conveniences ----

    /// Insert one row; empty values are a no-op returning 0.
    pub fn insert(&self, table: &str, values: &[(&str, Value)]) -> Result<u64> {
        match self.insert_statement(table, values) {
            Some(sql) => self.query(&sql),
            None => Ok(0),
        }
    }

    /// Update; empty values are a no-op returning 0.
    pub fn update(
        &self,
        table: &str,
        values: &[(&str, Value)],
        predicate: impl Into<Where>,
    ) -> Result<u64> {
        match self.update_statement(table, values, predicate) {
            Some(sql) => self.query(&sql),
            None => Ok(0),
        }
    }

    /// Insert-or-update through the driver's upsert primitive.
    pub fn upsert(
        &self,
        table: &str,
        insert: &[(&str, Value)],
        update: &[(&str, Value)],
        conflict: &[String],
    ) -> Result<u64> {
        if insert.is_empty() {
            return Ok(0);
        }
        let insert: Vec<(String, String)> = insert
            .iter()
            .map(|(c, v)| ((*c).to_string(), self.escape(v)))
            .collect();
        let update: Vec<(String, String)> = update
            .iter()
            .map(|(c, v)| ((*c).to_string(), self.escape(v)))
            .collect();
        self.guard(self.driver.upsert(table, &insert, &update, conflict))
    }

    pub fn delete(&self, table: &str, predicate: impl Into<Where>) -> Result<u64> {
        let mut sql = format!("DELETE FROM {}", self.field_name(table));
        let where_sql = self.where_clause(predicate);
        if !where_sql.is_empty() {
            sql.push(' ');
            sql.push_str(&where_sql);
        }
        self.query(&sql)
    }

    pub fn truncate(&self, table: &str) -> Result<u64> {
        let sql = match self.dialect() {
            // SQLite has no TRUNCATE
            Dialect::Sqlite => format!("DELETE FROM {}", self.field_name(table)),
            _ => format!("TRUNCATE TABLE {}", self.field_name(table)),
        };
        self.query(&sql)
    }

    // ---- introspection ----

    /// Does the table exist? Schema defaults to the configured database.
    pub fn is_table(&self, table: &str, schema: Option<&str>) -> Result<bool> {
        let default = self.driver.database_name();
        let schema = schema.unwrap_or(&default);
        self.guard(self.driver.table_exists(table, schema))
    }

    /// Does the column exist on the table? Schema defaults as `is_table`.
    pub fn is_field(&self, column: &str, table: &str, schema: Option<&str>) -> Result<bool> {
        let default = self.driver.database_name();
        let schema = schema.unwrap_or(&default);
        self.guard(self.driver.column_exists(column, table, schema))
    }

    pub fn last_insert_id(&self) -> Result<i64> {
        self.guard(self.driver.last_insert_id())
    }

    pub fn affected_rows(&self) -> u64 {
        self.driver.affected_rows()
    }
}

/// Fallback for the impossible cached-handle-without-cache case: every
/// operation is a miss / no-op.
struct NoCache;

static NO_CACHE: NoCache = NoCache;

impl QueryCache for NoCache {
    fn load(&self, _sql: &str) -> Option<CacheHandle> {
        None
    }

    fn save(&self, _rows: Vec<Row>, _sql: &str, _ttl_secs: u64, _note: &str) -> CacheHandle {
        CacheHandle(0)
    }

    fn fetch_next(&self, _handle: CacheHandle) -> Option<Row> {
        None
    }

    fn free(&self, _handle: CacheHandle) {}

    fn exists(&self, _key: &str) -> bool {
        false
    }

    fn remove(&self, _key: &str) {}

    fn keys_with_prefix(&self, _prefix: &str) -> Vec<String> {
        Vec::new()
    }

    fn increment(&self, _key: &str, _step: i64) -> i64 {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCache;
    use crate::testutil::MockDriver;
    use taudb_core::{Dialect, SqlExpr};

    fn db_with(driver: MockDriver) -> Db {
        Db::new(Box::new(driver)).with_config(DbConfig {
            error_policy: ErrorPolicy::Propagate,
            default_ttl: 0,
        })
    }

    #[test]
    fn escape_is_type_directed() {
        let db = db_with(MockDriver::new(Dialect::Mysql));
        assert_eq!(db.escape(&Value::Null), "NULL");
        assert_eq!(db.escape(&Value::Now), "NOW()");
        assert_eq!(db.escape(&Value::Expr(SqlExpr::new("a + 1"))), "a + 1");
        assert_eq!(db.escape(&Value::from("bo'b")), r"'bo\'b'");
        assert_eq!(db.escape(&Value::Float(1.5)), "1.5");
        assert_eq!(db.escape(&Value::Int(-3)), "-3");
        assert_eq!(db.escape(&Value::Bool(true)), "1");
    }

    #[test]
    fn where_clause_raw_prepends_keyword_once() {
        let db = db_with(MockDriver::new(Dialect::Mysql));
        assert_eq!(db.where_clause("x = 1"), "WHERE x = 1");
        assert_eq!(db.where_clause("WHERE x = 1"), "WHERE x = 1");
        assert_eq!(db.where_clause("where x = 1"), "where x = 1");
        assert_eq!(db.where_clause(""), "");
    }

    #[test]
    fn where_clause_map_ands_with_equals() {
        let db = db_with(MockDriver::new(Dialect::Mysql));
        assert_eq!(
            db.where_clause([("a", Value::Int(1)), ("b", Value::from("x"))]),
            "WHERE `a` = 1 AND `b` = 'x'"
        );
    }

    #[test]
    fn insert_statement_escapes_values() {
        let db = db_with(MockDriver::new(Dialect::Mysql));
        let sql = db
            .insert_statement(
                "users",
                &[
                    ("username", Value::from("bob")),
                    ("email", Value::from("bob@x.com")),
                ],
            )
            .unwrap();
        assert_eq!(
            sql,
            "INSERT INTO `users` (`username`, `email`) VALUES ('bob', 'bob@x.com')"
        );
    }

    #[test]
    fn empty_value_maps_are_no_ops() {
        let db = db_with(MockDriver::new(Dialect::Mysql));
        assert_eq!(db.insert_statement("users", &[]), None);
        assert_eq!(db.update_statement("users", &[], "id = 1"), None);
        assert_eq!(db.insert("users", &[]).unwrap(), 0);
    }

    #[test]
    fn update_statement_combines_set_and_where() {
        let db = db_with(MockDriver::new(Dialect::Mysql));
        let sql = db
            .update_statement("users", &[("name", Value::from("ada"))], [(
                "id",
                Value::Int(3),
            )])
            .unwrap();
        assert_eq!(sql, "UPDATE `users` SET `name` = 'ada' WHERE `id` = 3");
    }

    #[test]
    fn cached_select_skips_the_driver_on_the_second_call() {
        let driver = MockDriver::new(Dialect::Sqlite).with_rows(
            &["id", "name"],
            vec![
                vec![Value::Int(1), Value::from("ada")],
                vec![Value::Int(2), Value::from("bob")],
            ],
        );
        let spy = driver.spy();
        let db = db_with(driver).with_cache(Arc::new(MemoryCache::new()));

        let first = db.fetch_all("SELECT * FROM users", 60).unwrap();
        let second = db.fetch_all("SELECT  *  FROM  users", 60).unwrap();
        assert_eq!(first, second);
        assert_eq!(spy.queries(), 1);
    }

    #[test]
    fn zero_ttl_selects_stay_live() {
        let driver = MockDriver::new(Dialect::Sqlite).with_rows(
            &["id"],
            vec![vec![Value::Int(1)]],
        );
        let spy = driver.spy();
        let db = db_with(driver).with_cache(Arc::new(MemoryCache::new()));

        db.fetch_all("SELECT * FROM t", 0).unwrap();
        db.fetch_all("SELECT * FROM t", 0).unwrap();
        assert_eq!(spy.queries(), 2);
    }

    #[test]
    fn fetch_all_with_id_falls_back_to_first_column() {
        let driver = MockDriver::new(Dialect::Sqlite).with_rows(
            &["id", "name"],
            vec![
                vec![Value::Int(10), Value::from("ada")],
                vec![Value::Int(20), Value::from("bob")],
            ],
        );
        let db = db_with(driver);

        let by_name = db.fetch_all_with_id("SELECT * FROM t", "name", 0).unwrap();
        assert_eq!(by_name[0].0, "ada");
        assert_eq!(by_name[1].0, "bob");

        let fallback = db.fetch_all_with_id("SELECT * FROM t", "", 0).unwrap();
        assert_eq!(fallback[0].0, "10");

        let missing = db.fetch_all_with_id("SELECT * FROM t", "absent", 0).unwrap();
        assert_eq!(missing[0].0, "10");
    }

    #[test]
    fn fetch_pairs_and_column_and_value() {
        let driver = MockDriver::new(Dialect::Sqlite).with_rows(
            &["id", "name"],
            vec![
                vec![Value::Int(1), Value::from("ada")],
                vec![Value::Int(2), Value::from("bob")],
            ],
        );
        let db = db_with(driver);

        let pairs = db.fetch_pairs("SELECT id, name FROM t", 0).unwrap();
        assert_eq!(pairs[0], ("1".to_string(), Value::from("ada")));
        assert_eq!(pairs[1], ("2".to_string(), Value::from("bob")));

        let column = db.fetch_column("SELECT id FROM t", 0).unwrap();
        assert_eq!(column, vec![Value::Int(1), Value::Int(2)]);

        let value = db.fetch_value("SELECT id FROM t", 0).unwrap();
        assert_eq!(value, Some(Value::Int(1)));
    }

    #[test]
    fn fetch_object_advances_one_typed_row_at_a_time() {
        struct User {
            id: i64,
            name: String,
        }

        impl FromRow for User {
            fn from_row(row: &Row) -> Result<Self> {
                Ok(Self {
                    id: row.get_named_as("id")?,
                    name: row.get_named_as("name")?,
                })
            }
        }

        let driver = MockDriver::new(Dialect::Sqlite).with_rows(
            &["id", "name"],
            vec![
                vec![Value::Int(1), Value::from("ada")],
                vec![Value::Int(2), Value::from("bob")],
            ],
        );
        let db = db_with(driver);

        let mut result = db.select("SELECT * FROM t", 0).unwrap();
        let first: User = db.fetch_object(&mut result).unwrap().unwrap();
        assert_eq!((first.id, first.name.as_str()), (1, "ada"));
        let second: User = db.fetch_object(&mut result).unwrap().unwrap();
        assert_eq!((second.id, second.name.as_str()), (2, "bob"));
        assert!(db.fetch_object::<User>(&mut result).unwrap().is_none());
        db.free_result(result);
    }

    #[test]
    fn propagate_policy_surfaces_errors_and_last_error() {
        let driver = MockDriver::new(Dialect::Sqlite).failing_on("boom");
        let db = db_with(driver);
        assert!(db.last_error().is_none());
        let err = db.query("INSERT boom").unwrap_err();
        assert!(err.to_string().contains("boom"));
        assert!(db.last_error().unwrap().contains("boom"));
    }

    #[test]
    fn is_table_and_is_field_default_schema() {
        let db = db_with(MockDriver::new(Dialect::Sqlite));
        assert!(db.is_table("users", None).unwrap());
        assert!(!db.is_table("ghosts", None).unwrap());
        assert!(db.is_field("username", "users", Some("mockdb")).unwrap());
        assert!(!db.is_field("ghost", "users", None).unwrap());
    }

    #[test]
    fn free_result_forgets_cache_handles() {
        let driver = MockDriver::new(Dialect::Sqlite).with_rows(
            &["id"],
            vec![vec![Value::Int(1)]],
        );
        let db = db_with(driver).with_cache(Arc::new(MemoryCache::new()));
        let mut result = db.select("SELECT * FROM t", 60).unwrap();
        assert!(db.fetch(&mut result).unwrap().is_some());
        db.free_result(result);
    }
}
