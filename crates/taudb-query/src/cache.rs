//! Result-set caching.
//!
//! A `QueryCache` maps normalized SQL text to a previously materialized
//! row set with a TTL. Loading an entry produces a `CacheHandle`, a small
//! integer cursor that is advanced one row at a time, mirroring live-cursor
//! fetch semantics so facade code is driver-agnostic.
//!
//! Cache misbehavior is never an error: expired, missing, or otherwise
//! unusable entries all read as misses and the facade re-executes live.

use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use taudb_core::Row;

/// Collapse whitespace runs to single spaces and trim. No case folding.
pub fn normalize_sql(sql: &str) -> String {
    sql.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 64-bit key over normalized SQL text. Collisions are accepted.
pub fn cache_key(normalized_sql: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    normalized_sql.hash(&mut hasher);
    hasher.finish()
}

/// Storage key for a SQL result entry.
pub fn sql_entry_key(sql: &str) -> String {
    format!("sql:{:016x}", cache_key(&normalize_sql(sql)))
}

/// Identifies an in-memory materialized row set plus a read position.
/// Valid only between creation and `free`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CacheHandle(pub u64);

/// Contract between the facade and a cache backend.
///
/// Implementations use interior locking; one cache may be shared across
/// facades. Operations on a single key are individually consistent but a
/// load-miss/compute/save sequence is not atomic: concurrent writers race
/// with last-write-wins.
pub trait QueryCache: Send + Sync {
    /// Look up a live entry for this SQL; a hit returns a fresh handle
    /// positioned before the first row.
    fn load(&self, sql: &str) -> Option<CacheHandle>;

    /// Store a materialized row set under this SQL with the given TTL in
    /// seconds, returning a handle over the stored rows. `note` is a free
    /// label kept with the entry for diagnostics.
    fn save(&self, rows: Vec<Row>, sql: &str, ttl_secs: u64, note: &str) -> CacheHandle;

    /// Advance the handle's cursor; `None` past the last row or for an
    /// unknown handle.
    fn fetch_next(&self, handle: CacheHandle) -> Option<Row>;

    /// Forget the handle and its cursor. The underlying entry stays.
    fn free(&self, handle: CacheHandle);

    fn exists(&self, key: &str) -> bool;

    fn remove(&self, key: &str);

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String>;

    /// Add `step` to an integer entry, creating it at `step` if absent.
    /// Returns the new value.
    fn increment(&self, key: &str, step: i64) -> i64;

    /// Remaining rows of the handle keyed by `id_column`, falling back to
    /// the first column for a missing name. Must agree with the facade's
    /// keyed-fetch rule.
    fn rows_with_id(&self, handle: CacheHandle, id_column: &str) -> Vec<(String, Row)> {
        let mut out = Vec::new();
        while let Some(row) = self.fetch_next(handle) {
            out.push((row_key(&row, id_column), row));
        }
        out
    }
}

/// Keying rule shared by every "with id" accessor: the named column when
/// present, otherwise the first column.
pub fn row_key(row: &Row, id_column: &str) -> String {
    if !id_column.is_empty() {
        if let Some(v) = row.get_named(id_column) {
            return v.to_key_string();
        }
    }
    row.get(0).map_or_else(String::new, |v| v.to_key_string())
}

#[derive(Debug)]
enum EntryData {
    Rows(Arc<Vec<Row>>),
    Counter(i64),
}

#[derive(Debug)]
struct Entry {
    data: EntryData,
    expires_at: Option<Instant>,
    #[allow(dead_code)]
    note: String,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Debug)]
struct HandleState {
    rows: Arc<Vec<Row>>,
    pos: usize,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Entry>,
    handles: HashMap<u64, HandleState>,
    next_handle: u64,
}

/// Process-local reference cache.
#[derive(Debug, Default)]
pub struct MemoryCache {
    inner: Mutex<Inner>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn open_handle(inner: &mut Inner, rows: Arc<Vec<Row>>) -> CacheHandle {
        inner.next_handle += 1;
        let id = inner.next_handle;
        inner.handles.insert(id, HandleState { rows, pos: 0 });
        CacheHandle(id)
    }
}

impl QueryCache for MemoryCache {
    fn load(&self, sql: &str) -> Option<CacheHandle> {
        let key = sql_entry_key(sql);
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        // expired entries read as misses and are reaped lazily
        if inner.entries.get(&key).is_some_and(|e| e.is_expired(now)) {
            inner.entries.remove(&key);
            return None;
        }
        let rows = match inner.entries.get(&key).map(|e| &e.data) {
            Some(EntryData::Rows(rows)) => Arc::clone(rows),
            _ => return None,
        };
        tracing::debug!(key = %key, rows = rows.len(), "cache hit");
        Some(Self::open_handle(&mut inner, rows))
    }

    fn save(&self, rows: Vec<Row>, sql: &str, ttl_secs: u64, note: &str) -> CacheHandle {
        let key = sql_entry_key(sql);
        let rows = Arc::new(rows);
        let mut inner = self.inner.lock().unwrap();
        let expires_at = (ttl_secs > 0).then(|| Instant::now() + Duration::from_secs(ttl_secs));
        tracing::debug!(key = %key, rows = rows.len(), ttl_secs, "cache save");
        inner.entries.insert(
            key,
            Entry {
                data: EntryData::Rows(Arc::clone(&rows)),
                expires_at,
                note: note.to_string(),
            },
        );
        Self::open_handle(&mut inner, rows)
    }

    fn fetch_next(&self, handle: CacheHandle) -> Option<Row> {
        let mut inner = self.inner.lock().unwrap();
        let state = inner.handles.get_mut(&handle.0)?;
        let row = state.rows.get(state.pos).cloned()?;
        state.pos += 1;
        Some(row)
    }

    fn free(&self, handle: CacheHandle) {
        let mut inner = self.inner.lock().unwrap();
        inner.handles.remove(&handle.0);
    }

    fn exists(&self, key: &str) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        if inner.entries.get(key).is_some_and(|e| e.is_expired(now)) {
            inner.entries.remove(key);
            return false;
        }
        inner.entries.contains_key(key)
    }

    fn remove(&self, key: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.entries.remove(key);
    }

    fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let mut keys: Vec<String> = inner
            .entries
            .iter()
            .filter(|(k, e)| k.starts_with(prefix) && !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn increment(&self, key: &str, step: i64) -> i64 {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        let current = match inner.entries.get(key) {
            Some(entry) if !entry.is_expired(now) => match entry.data {
                EntryData::Counter(n) => n,
                EntryData::Rows(_) => 0,
            },
            _ => 0,
        };
        let next = current + step;
        inner.entries.insert(
            key.to_string(),
            Entry {
                data: EntryData::Counter(next),
                expires_at: None,
                note: String::new(),
            },
        );
        next
    }
}
