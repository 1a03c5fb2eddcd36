//! Test doubles shared by the unit tests in this crate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use taudb_core::{
    ColumnInfo, Cursor, Dialect, Driver, Error, QueryErrorKind, Result, Row, Value,
};

/// Shared observation handle, cloned out of a `MockDriver` before the
/// driver moves into a `Db`.
#[derive(Clone, Default)]
pub struct Spy {
    query_count: Arc<AtomicUsize>,
    statements: Arc<Mutex<Vec<String>>>,
}

impl Spy {
    pub fn queries(&self) -> usize {
        self.query_count.load(Ordering::SeqCst)
    }

    pub fn recorded(&self) -> Vec<String> {
        self.statements.lock().unwrap().clone()
    }

    pub fn last_statement(&self) -> Option<String> {
        self.statements.lock().unwrap().last().cloned()
    }
}

/// Scripted driver: returns a fixed row set for every query and records
/// every statement it sees, so tests can assert on both the SQL text and
/// the number of live round trips.
pub struct MockDriver {
    dialect: Dialect,
    rows: Vec<Row>,
    spy: Spy,
    fail_matching: Option<String>,
}

impl MockDriver {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            rows: Vec::new(),
            spy: Spy::default(),
            fail_matching: None,
        }
    }

    pub fn with_rows(mut self, columns: &[&str], rows: Vec<Vec<Value>>) -> Self {
        let info = ColumnInfo::new(columns.iter().map(|c| (*c).to_string()).collect());
        self.rows = rows
            .into_iter()
            .map(|values| Row::new(info.clone(), values))
            .collect();
        self
    }

    /// Any statement containing this substring fails with a constraint
    /// error.
    pub fn failing_on(mut self, needle: &str) -> Self {
        self.fail_matching = Some(needle.to_string());
        self
    }

    pub fn spy(&self) -> Spy {
        self.spy.clone()
    }

    fn record(&self, sql: &str) -> Result<()> {
        self.spy.statements.lock().unwrap().push(sql.to_string());
        if let Some(needle) = &self.fail_matching {
            if sql.contains(needle.as_str()) {
                return Err(Error::query(
                    QueryErrorKind::Constraint,
                    format!("scripted failure on: {}", sql),
                ));
            }
        }
        Ok(())
    }
}

struct MockCursor {
    rows: std::vec::IntoIter<Row>,
}

impl Cursor for MockCursor {
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

impl Driver for MockDriver {
    fn dialect(&self) -> Dialect {
        self.dialect
    }

    fn connect(&self) -> Result<()> {
        Ok(())
    }

    fn database_name(&self) -> String {
        "mockdb".to_string()
    }

    fn query(&self, sql: &str) -> Result<Box<dyn Cursor>> {
        self.record(sql)?;
        self.spy.query_count.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockCursor {
            rows: self.rows.clone().into_iter(),
        }))
    }

    fn execute(&self, sql: &str) -> Result<u64> {
        self.record(sql)?;
        Ok(1)
    }

    fn last_insert_id(&self) -> Result<i64> {
        Ok(1)
    }

    fn affected_rows(&self) -> u64 {
        1
    }

    fn last_error(&self) -> Option<String> {
        None
    }

    fn table_exists(&self, table: &str, _schema: &str) -> Result<bool> {
        Ok(table == "users")
    }

    fn column_exists(&self, column: &str, table: &str, _schema: &str) -> Result<bool> {
        Ok(table == "users" && (column == "id" || column == "username"))
    }

    fn upsert(
        &self,
        table: &str,
        insert: &[(String, String)],
        _update: &[(String, String)],
        _conflict: &[String],
    ) -> Result<u64> {
        let cols: Vec<&str> = insert.iter().map(|(c, _)| c.as_str()).collect();
        self.record(&format!("UPSERT {} ({})", table, cols.join(", ")))?;
        Ok(1)
    }

    fn close(&self) {}
}
