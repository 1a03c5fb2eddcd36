use taudb::prelude::*;

fn open_db() -> Db {
    let db = Db::new(Box::new(SqliteDriver::memory())).with_config(DbConfig {
        error_policy: ErrorPolicy::Propagate,
        ..DbConfig::default()
    });
    db.query("CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT, blob BLOB)")
        .expect("create notes table");
    db
}

#[test]
fn awkward_text_survives_insert_and_equality_match() {
    let db = open_db();
    let samples = [
        "it's",
        "a \"quoted\" word",
        "back\\slash",
        "line\nbreak",
        "tab\there",
        "nul\0inside",
        "100% _wild_",
    ];
    for original in samples {
        db.insert("notes", &[("body", Value::from(original))])
            .expect("insert sample");
        let row = db
            .table("notes")
            .where_("body", original)
            .first()
            .expect("select sample")
            .expect("row matched its own literal");
        assert_eq!(
            row.get_named("body").and_then(|v| v.as_str()),
            Some(original)
        );
        db.truncate("notes").expect("truncate");
    }
}

#[test]
fn bytes_roundtrip_as_blob_literals() {
    let db = open_db();
    let payload: Vec<u8> = vec![0x00, 0xff, 0x10, 0x80];
    db.insert("notes", &[("blob", Value::Bytes(payload.clone()))])
        .expect("insert blob");
    let row = db
        .fetch_one("SELECT blob FROM notes", 0)
        .expect("select blob")
        .expect("row present");
    assert_eq!(row.get(0).and_then(|v| v.as_bytes()), Some(payload.as_slice()));
}

#[test]
fn now_renders_as_the_engine_clock() {
    let db = open_db();
    db.insert("notes", &[("body", Value::Now)]).expect("insert now");
    let body = db
        .fetch_value("SELECT body FROM notes", 0)
        .expect("select now")
        .expect("value present");
    // CURRENT_TIMESTAMP yields "YYYY-MM-DD HH:MM:SS".
    let text = body.as_str().expect("timestamp is text");
    assert_eq!(text.len(), 19);
    assert_eq!(&text[4..5], "-");
}

#[test]
fn verbatim_expressions_are_not_escaped() {
    let db = open_db();
    db.insert("notes", &[("body", Value::from(SqlExpr::from("upper('abc')")))])
        .expect("insert expression");
    let body = db
        .fetch_value("SELECT body FROM notes", 0)
        .expect("select")
        .expect("value present");
    assert_eq!(body.as_str(), Some("ABC"));
}
