use std::sync::Arc;
use taudb::prelude::*;

fn open_cached_db() -> Db {
    let db = Db::new(Box::new(SqliteDriver::memory()))
        .with_cache(Arc::new(MemoryCache::new()))
        .with_config(DbConfig {
            error_policy: ErrorPolicy::Propagate,
            ..DbConfig::default()
        });
    db.query("CREATE TABLE t (x INTEGER)").expect("create table");
    db.query("INSERT INTO t (x) VALUES (1), (2), (3)")
        .expect("seed rows");
    db
}

#[test]
fn cached_select_serves_rows_after_the_table_is_gone() {
    let db = open_cached_db();

    let rows = db
        .fetch_all("SELECT x FROM t ORDER BY x", 60)
        .expect("first fetch");
    assert_eq!(rows.len(), 3);

    // The second fetch never reaches the engine.
    db.query("DROP TABLE t").expect("drop table");
    let rows = db
        .fetch_all("SELECT x FROM t ORDER BY x", 60)
        .expect("cached fetch");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0].get(0).and_then(|v| v.as_i64()), Some(1));
}

#[test]
fn cache_keys_ignore_whitespace_differences() {
    let db = open_cached_db();
    db.fetch_all("SELECT x FROM t ORDER BY x", 60)
        .expect("prime cache");
    db.query("DROP TABLE t").expect("drop table");

    let rows = db
        .fetch_all("SELECT   x\n  FROM t \t ORDER BY x", 60)
        .expect("whitespace variant");
    assert_eq!(rows.len(), 3);
}

#[test]
fn zero_ttl_always_goes_live() {
    let db = open_cached_db();
    db.fetch_all("SELECT x FROM t", 0).expect("live fetch");
    db.query("DROP TABLE t").expect("drop table");
    assert!(db.fetch_all("SELECT x FROM t", 0).is_err());
}

#[test]
fn result_set_handles_hide_the_source() {
    let db = open_cached_db();
    let sql = "SELECT x FROM t ORDER BY x";

    let mut result = db.select(sql, 60).expect("live select");
    let mut live_seen = 0;
    while let Some(_row) = db.fetch(&mut result).expect("fetch row") {
        live_seen += 1;
    }
    db.free_result(result);

    let mut result = db.select(sql, 60).expect("cached select");
    let mut cached_seen = 0;
    while let Some(_row) = db.fetch(&mut result).expect("fetch cached row") {
        cached_seen += 1;
    }
    db.free_result(result);

    assert_eq!(live_seen, 3);
    assert_eq!(cached_seen, 3);
}

#[test]
fn builder_ttl_flows_through_to_the_cache() {
    let db = open_cached_db();

    let values = db
        .table("t")
        .select("x")
        .order_by("x")
        .cached(60)
        .column()
        .expect("first builder fetch");
    assert_eq!(values.len(), 3);

    db.query("DROP TABLE t").expect("drop table");
    let values = db
        .table("t")
        .select("x")
        .order_by("x")
        .cached(60)
        .column()
        .expect("cached builder fetch");
    assert_eq!(values.len(), 3);
}
