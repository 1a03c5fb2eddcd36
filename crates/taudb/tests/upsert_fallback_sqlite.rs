use taudb::prelude::*;

fn open_db(mode: UpsertMode) -> Db {
    let driver = SqliteDriver::new(SqliteConfig::memory().with_upsert_mode(mode));
    let db = Db::new(Box::new(driver)).with_config(DbConfig {
        error_policy: ErrorPolicy::Propagate,
        ..DbConfig::default()
    });
    db.query(
        "CREATE TABLE accounts (\
         id INTEGER PRIMARY KEY, \
         email TEXT UNIQUE, \
         visits INTEGER DEFAULT 0)",
    )
    .expect("create accounts table");
    db
}

fn upsert_twice(db: &Db, conflict: &[String]) {
    let insert = [
        ("email", Value::from("a@b")),
        ("visits", Value::from(1)),
    ];
    let update = [("visits", Value::from(7))];
    db.upsert("accounts", &insert, &update, conflict)
        .expect("first upsert");
    db.upsert("accounts", &insert, &update, conflict)
        .expect("second upsert");
}

fn assert_single_updated_row(db: &Db) {
    let row = db
        .fetch_one("SELECT COUNT(*) AS n, MAX(visits) AS v FROM accounts", 0)
        .expect("inspect table")
        .expect("aggregate row");
    assert_eq!(row.get_named("n").and_then(|v| v.as_i64()), Some(1));
    assert_eq!(row.get_named("v").and_then(|v| v.as_i64()), Some(7));
}

#[test]
fn native_upsert_resolves_conflicts_in_one_statement() {
    let db = open_db(UpsertMode::Native);
    upsert_twice(&db, &["email".to_string()]);
    assert_single_updated_row(&db);
}

#[test]
fn legacy_upsert_falls_back_to_an_update() {
    let db = open_db(UpsertMode::Legacy);
    upsert_twice(&db, &["email".to_string()]);
    assert_single_updated_row(&db);
}

#[test]
fn legacy_upsert_reads_the_conflict_column_from_the_error() {
    let db = open_db(UpsertMode::Legacy);
    upsert_twice(&db, &[]);
    assert_single_updated_row(&db);
}

#[test]
fn builder_upsert_uses_the_accumulated_table() {
    let db = open_db(UpsertMode::Native);
    let insert = [
        ("email", Value::from("a@b")),
        ("visits", Value::from(1)),
    ];
    let update = [("visits", Value::from(2))];
    db.table("accounts")
        .upsert(&insert, &update, &["email"])
        .expect("first upsert");
    db.table("accounts")
        .upsert(&insert, &update, &["email"])
        .expect("second upsert");

    let visits = db
        .fetch_value("SELECT visits FROM accounts WHERE email = 'a@b'", 0)
        .expect("read visits")
        .and_then(|v| v.as_i64());
    assert_eq!(visits, Some(2));
}
