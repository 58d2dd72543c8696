//! Single-document operations through the blocking route.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{connect, engine, open_url};
use crate::*;

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Airline {
    name: String,
    country: String,
}

#[test]
fn test_upsert_then_get() {
    let engine = engine();
    let conn = connect(&engine);

    let airline = Airline {
        name: "40-Mile Air".into(),
        country: "United States".into(),
    };
    let stored = conn
        .upsert("airline_10", Content::json(&airline).unwrap(), StoreOptions::default())
        .unwrap();
    assert!(stored.cas > 0);
    assert!(stored.token.is_some());

    let read = conn.get("airline_10", ReadOptions::default()).unwrap();
    assert_eq!(read.cas, stored.cas);
    assert_eq!(read.flags, JSON_FLAGS);
    assert_eq!(read.content_as::<Airline>().unwrap(), airline);
    assert_eq!(engine.document_count("travel"), 1);
    conn.close().unwrap();
}

#[test]
fn test_missing_document_is_engine_error() {
    let engine = engine();
    let conn = connect(&engine);

    let err = conn.get("nope", ReadOptions::default()).unwrap_err();
    assert!(err.is_not_found());
    match err {
        Error::Engine { code, context } => {
            assert_eq!(code, ErrorCode::DocumentNotFound);
            assert!(!context.file.is_empty());
        }
        other => panic!("expected engine error, got {:?}", other),
    }
}

#[test]
fn test_insert_replace_remove() {
    let engine = engine();
    let conn = connect(&engine);

    let first = conn
        .insert("k", json!({"v": 1}), StoreOptions::default())
        .unwrap();
    let err = conn
        .insert("k", json!({"v": 2}), StoreOptions::default())
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::DocumentExists));

    let err = conn
        .replace("k", json!({"v": 3}), StoreOptions::default().cas(first.cas + 1000))
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::CasMismatch));

    let replaced = conn
        .replace("k", json!({"v": 3}), StoreOptions::default().cas(first.cas))
        .unwrap();
    assert_ne!(replaced.cas, first.cas);
    let read = conn.get("k", ReadOptions::default()).unwrap();
    assert_eq!(read.content, Content::Json(json!({"v": 3})));

    conn.remove("k", CasOptions::default()).unwrap();
    let exists = conn.exists("k", TimeoutOptions::default()).unwrap();
    assert!(!exists.exists);
    assert!(conn.remove("k", CasOptions::default()).unwrap_err().is_not_found());
}

#[test]
fn test_invalid_keys_are_rejected_before_dispatch() {
    let engine = engine();
    let conn = connect(&engine);

    assert!(matches!(
        conn.get("", ReadOptions::default()),
        Err(Error::InvalidArgument { .. })
    ));
    let long = "k".repeat(MAX_KEY_LEN + 1);
    assert!(matches!(
        conn.upsert(&long, json!(1), StoreOptions::default()),
        Err(Error::InvalidArgument { .. })
    ));
    let callbacks = Callbacks::new(|_: GetResult| panic!("must not run"));
    assert!(matches!(
        conn.get_with("", ReadOptions::default(), callbacks),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_default_bucket_selection() {
    let engine = engine();
    let conn = open_url(&engine, "couchbase://localhost");
    assert_eq!(conn.bucket(), None);
    assert!(matches!(
        conn.get("k", ReadOptions::default()),
        Err(Error::InvalidArgument { .. })
    ));

    let err = conn.open_bucket("missing").unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::BucketNotFound));

    conn.open_bucket("travel").unwrap();
    assert_eq!(conn.bucket().as_deref(), Some("travel"));
    conn.upsert("k", json!(1), StoreOptions::default()).unwrap();

    conn.close_bucket("travel").unwrap();
    assert_eq!(conn.bucket(), None);
}

#[test]
fn test_counters() {
    let engine = engine();
    let conn = connect(&engine);

    let err = conn.increment("hits", CounterOptions::default()).unwrap_err();
    assert!(err.is_not_found());

    let created = conn
        .increment("hits", CounterOptions::default().initial(10))
        .unwrap();
    assert_eq!(created.content, 10);
    let bumped = conn
        .increment("hits", CounterOptions::default().delta(5))
        .unwrap();
    assert_eq!(bumped.content, 15);
    let floored = conn
        .decrement("hits", CounterOptions::default().delta(100))
        .unwrap();
    assert_eq!(floored.content, 0);

    let read = conn.get("hits", ReadOptions::default()).unwrap();
    assert_eq!(read.content_as::<u64>().unwrap(), 0);
}

#[test]
fn test_append_and_prepend_text() {
    let engine = engine();
    let conn = connect(&engine);

    conn.upsert("greeting", "middle", StoreOptions::default()).unwrap();
    conn.append("greeting", "!", CasOptions::default()).unwrap();
    conn.prepend("greeting", b"<".to_vec(), CasOptions::default())
        .unwrap();
    let read = conn.get("greeting", ReadOptions::default()).unwrap();
    assert_eq!(read.content, Content::Text("<middle!".into()));

    let err = conn.append("absent", "x", CasOptions::default()).unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_touch_and_get_and_touch() {
    let engine = engine();
    let conn = connect(&engine);

    conn.upsert("session", json!({"user": 1}), StoreOptions::default())
        .unwrap();
    let read = conn
        .get_and_touch("session", Duration::from_secs(60), ReadOptions::default())
        .unwrap();
    assert_eq!(read.content, Content::Json(json!({"user": 1})));

    conn.touch("session", Duration::from_millis(1), TimeoutOptions::default())
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));
    assert!(!conn.exists("session", TimeoutOptions::default()).unwrap().exists);

    let err = conn
        .touch("session", Duration::from_secs(1), TimeoutOptions::default())
        .unwrap_err();
    assert!(err.is_not_found());
}

#[test]
fn test_subdocument_lookup_and_mutation() {
    let engine = engine();
    let conn = connect(&engine);
    conn.upsert(
        "user",
        json!({"name": "Ada", "langs": ["rust", "c"], "visits": 1}),
        StoreOptions::default(),
    )
    .unwrap();

    let lookup = conn
        .lookup_in(
            "user",
            vec![
                LookupInSpec::get("name"),
                LookupInSpec::exists("missing"),
                LookupInSpec::count("langs"),
            ],
            TimeoutOptions::default(),
        )
        .unwrap();
    assert_eq!(lookup.content_as::<String>(0).unwrap(), "Ada");
    assert!(!lookup.exists(1).unwrap());
    assert_eq!(lookup.content_as::<u64>(2).unwrap(), 2);

    let mutated = conn
        .mutate_in(
            "user",
            vec![
                MutateInSpec::counter("visits", 2),
                MutateInSpec::array_append("langs", json!("go")),
                MutateInSpec::upsert("meta.seen", json!(true)).create_path(),
            ],
            MutateInOptions::default(),
        )
        .unwrap();
    assert_eq!(mutated.content_as::<i64>(0).unwrap(), 3);

    let read = conn.get("user", ReadOptions::default()).unwrap();
    assert_eq!(
        read.content,
        Content::Json(json!({
            "name": "Ada",
            "langs": ["rust", "c", "go"],
            "visits": 3,
            "meta": {"seen": true}
        }))
    );

    // A failing instruction leaves the document untouched
    let err = conn
        .mutate_in(
            "user",
            vec![
                MutateInSpec::counter("visits", 1),
                MutateInSpec::replace("nope", json!(1)),
            ],
            MutateInOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::PathNotFound));
    let read = conn.get("user", ReadOptions::default()).unwrap();
    assert_eq!(read.content.as_json().unwrap()["visits"], json!(3));

    assert!(matches!(
        conn.lookup_in("user", Vec::new(), TimeoutOptions::default()),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_replica_reads() {
    let engine = engine();
    engine.set_num_replicas(2);
    let conn = connect(&engine);
    conn.upsert("doc", json!({"a": 1}), StoreOptions::default()).unwrap();

    let any = conn.get_any_replica("doc", ReadOptions::default()).unwrap();
    assert_eq!(any.content, Content::Json(json!({"a": 1})));

    let (copies, ()) = conn
        .get_all_replicas("doc", ReadOptions::default())
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(copies.len(), 3);
    assert_eq!(copies.iter().filter(|c| !c.is_replica).count(), 1);
    assert!(copies.iter().all(|c| c.content_as::<serde_json::Value>().unwrap() == json!({"a": 1})));

    let mut missing = conn.get_all_replicas("absent", ReadOptions::default()).unwrap();
    assert!(missing.next().unwrap().unwrap_err().is_not_found());
    assert!(missing.next().is_none());
}

#[test]
fn test_raw_binary_transcoder_per_operation() {
    let engine = engine();
    let conn = connect(&engine);
    let raw: Arc<dyn Transcoder> = Arc::new(RawBinaryTranscoder);

    // The default JSON transcoder refuses binary content
    assert!(matches!(
        conn.upsert("blob", vec![0u8, 159, 146, 150], StoreOptions::default()),
        Err(Error::InvalidArgument { .. })
    ));

    conn.upsert(
        "blob",
        vec![0u8, 159, 146, 150],
        StoreOptions::default().transcoder(Arc::clone(&raw)),
    )
    .unwrap();
    let read = conn
        .get("blob", ReadOptions::default().transcoder(raw))
        .unwrap();
    assert_eq!(read.flags, BINARY_FLAGS);
    assert_eq!(read.content.as_bytes(), Some(&[0u8, 159, 146, 150][..]));

    // A JSON document through the raw transcoder is a build error, not an
    // engine error
    conn.upsert("json", json!({"a": 1}), StoreOptions::default()).unwrap();
    let err = conn
        .get(
            "json",
            ReadOptions::default().transcoder(Arc::new(RawBinaryTranscoder)),
        )
        .unwrap_err();
    assert!(matches!(err, Error::BuildResult { .. }));
}

#[test]
fn test_operation_timeouts() {
    let engine = engine();
    let conn = open_url(&engine, "couchbase://localhost/travel?kv_timeout=10");
    assert_eq!(conn.options().kv_timeout_ms, 10);

    engine.hold();
    let reader = {
        let conn = conn.clone();
        std::thread::spawn(move || conn.get("k", ReadOptions::default()))
    };
    let writer = {
        let conn = conn.clone();
        std::thread::spawn(move || conn.upsert("k", json!(1), StoreOptions::default()))
    };
    while engine.held_operations() < 2 {
        std::thread::sleep(Duration::from_millis(1));
    }
    std::thread::sleep(Duration::from_millis(30));
    engine.release();

    let read = reader.join().unwrap().unwrap_err();
    assert_eq!(read.code(), Some(ErrorCode::UnambiguousTimeout));
    let write = writer.join().unwrap().unwrap_err();
    assert_eq!(write.code(), Some(ErrorCode::AmbiguousTimeout));
    assert_eq!(engine.document_count("travel"), 0);
}
