//! End-to-end scenarios exercising the public API as a caller would,
//! rather than a single module in isolation.

use std::sync::Arc;

use nandb::drivers::MemoryDriver;
use nandb::index::{self, IndexInput};
use nandb::{Db, DbEvent, DbOptions};
use serde_json::json;

struct MemoryDriverHandle(Arc<MemoryDriver>);

impl nandb::Driver for MemoryDriverHandle {
    fn inner(&self) -> Option<&dyn nandb::Driver> {
        Some(self.0.as_ref())
    }
}

fn memory_db() -> (Arc<MemoryDriver>, Db) {
    let driver = Arc::new(MemoryDriver::new());
    let db = Db::new(Box::new(MemoryDriverHandle(Arc::clone(&driver))), DbOptions::default());
    (driver, db)
}

fn labelled_memory_db(label: &str) -> (Arc<MemoryDriver>, Db) {
    let driver = Arc::new(MemoryDriver::new());
    let db = Db::new(
        Box::new(MemoryDriverHandle(Arc::clone(&driver))),
        DbOptions {
            label: label.to_owned(),
            ..DbOptions::default()
        },
    );
    (driver, db)
}

/// S1: a plain `set` followed by `get` round-trips without touching the
/// driver, and the metadata map picks up the new entry.
#[tokio::test]
async fn s1_simple_set_get_round_trips() {
    let (_driver, db) = memory_db();
    db.connect().await.unwrap();

    db.set("/a.txt", json!("hello"), None).await.unwrap();
    let value = db.get("/a.txt", None, None).await.unwrap();

    assert_eq!(value, json!("hello"));
    assert!(db.stat("/a.txt", None).await.unwrap().is_some());
}

/// S2: `fetch` merges directory-chain inheritance (`_`), then resolves a
/// fragment `$ref` against a sibling document.
#[tokio::test]
async fn s2_fetch_merges_inheritance_and_resolves_fragment_ref() {
    let (driver, db) = memory_db();
    driver.seed("/_", json!({"global": "value"}));
    driver.seed("/ref.json", json!({"prop": {"subprop": "resolved"}}));
    driver.seed("/data.json", json!({"key": "$ref:ref.json#prop/subprop"}));
    db.connect().await.unwrap();

    let value = db.fetch("/data.json", None, None).await;

    assert_eq!(value, json!({"global": "value", "key": "resolved"}));
}

/// S3: writing a document through `save_document` regenerates the
/// directory's `index.txt`, and decoding it recovers every sibling's name.
#[tokio::test]
async fn s3_save_document_maintains_directory_index() {
    let (driver, db) = memory_db();
    db.connect().await.unwrap();

    db.save_document("/file1.txt", json!("a"), None).await.unwrap();
    db.save_document("/file2.json", json!({"k": 1}), None).await.unwrap();
    db.save_document("/dir/file3.json", json!({"k": 2}), None).await.unwrap();

    let encoded = driver.read("/index.txt").await.unwrap().expect("index.txt written");
    let encoded = encoded.as_str().expect("index.txt stored as text").to_owned();
    let rows = index::decode(IndexInput::Text(&encoded)).unwrap();
    let mut names: Vec<&str> = rows.iter().map(|row| row.name.as_str()).collect();
    names.sort_unstable();

    assert_eq!(names, vec!["dir/", "file1.txt", "file2.json"]);
}

/// S4: a self-referencing document fetches unchanged — no infinite loop,
/// no silent mutation of the `$ref` key.
#[tokio::test]
async fn s4_self_reference_round_trips_unchanged() {
    let (driver, db) = memory_db();
    driver.seed(
        "/self-ref.json",
        json!({"$ref": "self-ref.json", "value": "test"}),
    );
    db.connect().await.unwrap();

    let value = db.fetch("/self-ref.json", None, None).await;

    assert_eq!(value, json!({"$ref": "self-ref.json", "value": "test"}));
}

/// S5: a mounted DB takes over every operation under its prefix; the host
/// DB's own cache never sees the mounted key.
#[tokio::test]
async fn s5_mount_routes_writes_to_the_mounted_db() {
    let (_root_driver, root) = memory_db();
    root.connect().await.unwrap();

    let (_cache_driver, cache_db) = memory_db();
    cache_db.connect().await.unwrap();
    let cache_db = Arc::new(cache_db);
    root.mount("/cache", Arc::clone(&cache_db));

    root.set("/cache/user_1", json!({"name": "John"}), None).await.unwrap();
    root.set("/local.json", json!("not routed"), None).await.unwrap();

    let routed = cache_db.get("/user_1", None, None).await.unwrap();
    assert_eq!(routed, json!({"name": "John"}));

    // the mounted DB's own cache never learns about keys outside its prefix
    let unrelated = cache_db.get("/local.json", None, None).await.unwrap();
    assert_eq!(unrelated, serde_json::Value::Null);
}

/// S6: an empty primary falls back to an attached DB on `fetch`, and emits
/// exactly one `fallback` event naming both sides.
#[tokio::test]
async fn s6_fallback_fires_event_on_attached_db_hit() {
    let (_primary_driver, primary) = labelled_memory_db("primary");
    primary.connect().await.unwrap();

    let (fallback_driver, fallback) = labelled_memory_db("fallback");
    fallback_driver.seed("/config.json", json!({"fallback": true}));
    fallback.connect().await.unwrap();
    let fallback = Arc::new(fallback);

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let seen_clone = Arc::clone(&seen);
    primary.on(
        "fallback",
        Box::new(move |event| {
            if let DbEvent::Fallback { uri, from, to } = event {
                seen_clone.lock().unwrap().push((uri.clone(), from.clone(), to.clone()));
            }
        }),
    );

    primary.attach(fallback);
    let value = primary.fetch("/config.json", None, None).await;

    assert_eq!(value, json!({"fallback": true}));
    let recorded = seen.lock().unwrap();
    assert_eq!(recorded.len(), 1);
    assert_eq!(recorded[0], ("/config.json".to_owned(), "primary".to_owned(), "fallback".to_owned()));
}

/// S7: extracting a subtree yields an independent DB; mutating it never
/// touches the parent's cache.
#[tokio::test]
async fn s7_extract_is_isolated_from_the_parent() {
    let (_driver, db) = memory_db();
    db.connect().await.unwrap();
    db.save_document("/dir/a.json", json!(1), None).await.unwrap();
    db.save_document("/dir/b.json", json!(2), None).await.unwrap();

    let extracted = db.extract("/dir");
    extracted.connect().await.unwrap();

    assert_eq!(extracted.get("/a.json", None, None).await.unwrap(), json!(1));

    extracted.set("/x.json", json!("new"), None).await.unwrap();

    let parent_sees_it = db.get("/dir/x.json", None, None).await;
    assert!(parent_sees_it.is_err() || parent_sees_it.unwrap() == serde_json::Value::Null);
}

/// S8: with two fallbacks attached in order, a miss on the primary
/// resolves from the first fallback that has the document.
#[tokio::test]
async fn s8_fallback_order_is_first_match_wins() {
    let (_primary_driver, primary) = labelled_memory_db("primary");
    primary.connect().await.unwrap();

    let (driver_a, db_a) = labelled_memory_db("a");
    driver_a.seed("/shared.json", json!({"from": "a"}));
    db_a.connect().await.unwrap();

    let (driver_b, db_b) = labelled_memory_db("b");
    driver_b.seed("/shared.json", json!({"from": "b"}));
    db_b.connect().await.unwrap();

    primary.attach(Arc::new(db_a));
    primary.attach(Arc::new(db_b));

    let value = primary.fetch("/shared.json", None, None).await;
    assert_eq!(value, json!({"from": "a"}));
}
