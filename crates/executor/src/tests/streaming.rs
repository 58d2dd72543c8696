//! Query, analytics and view streams.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::{json, Value};

use super::{connect, engine, open_url};
use crate::*;
use tether_engine::MemoryEngine;

fn seed(conn: &Connection, count: usize) {
    for i in 0..count {
        conn.upsert(
            &format!("airport_{}", i),
            json!({"id": i, "kind": if i % 2 == 0 { "even" } else { "odd" }}),
            StoreOptions::default(),
        )
        .unwrap();
    }
}

#[test]
fn test_rows_arrive_in_order_with_slow_consumer() {
    let engine = engine();
    engine.set_row_chunk_size(2);
    let conn = connect(&engine);
    seed(&conn, 8);

    let mut stream = conn
        .query("SELECT * FROM travel", QueryOptions::default())
        .unwrap();
    let mut ids = Vec::new();
    for row in stream.by_ref() {
        std::thread::sleep(Duration::from_millis(2));
        ids.push(row.unwrap()["travel"]["id"].as_u64().unwrap());
    }
    assert_eq!(ids, (0..8).collect::<Vec<_>>());

    let meta = stream.metadata().unwrap();
    assert_eq!(meta.status, "success");
    assert_eq!(meta.metrics.result_count, 8);
    assert!(meta.client_context_id.is_some());
}

#[test]
fn test_stubbed_statement_and_client_context_id() {
    let engine = engine();
    engine.stub_query("SELECT 1", vec![json!({"$1": 1})]);
    let conn = connect(&engine);

    let (rows, meta) = conn
        .query(
            "SELECT 1",
            QueryOptions::default()
                .client_context_id("ctx-42")
                .positional(json!(7)),
        )
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(rows, vec![json!({"$1": 1})]);
    assert_eq!(meta.client_context_id.as_deref(), Some("ctx-42"));
    assert_eq!(meta.warnings.len(), 1);
}

#[test]
fn test_dropping_stream_early_stops_request() {
    let engine = engine();
    engine.set_row_chunk_size(1);
    let conn = connect(&engine);
    seed(&conn, 20);

    let mut stream = conn
        .query("SELECT * FROM travel", QueryOptions::default())
        .unwrap();
    let first = stream.next().unwrap().unwrap();
    assert_eq!(first["travel"]["id"], json!(0));
    drop(stream);

    // The connection keeps serving requests
    let (rows, _) = conn
        .query("SELECT * FROM travel LIMIT 3", QueryOptions::default())
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(rows.len(), 3);
    assert!(conn.close().unwrap());
}

#[test]
fn test_bounded_row_queue() {
    let engine = engine();
    let conn = open_url(&engine, "couchbase://localhost/travel?row_queue_capacity=1");
    assert_eq!(conn.options().row_queue_capacity, Some(1));
    seed(&conn, 5);

    let stream = conn
        .query("SELECT * FROM travel", QueryOptions::default())
        .unwrap();
    std::thread::sleep(Duration::from_millis(20));
    let rows: Vec<Value> = stream.map(|row| row.unwrap()).collect();
    assert_eq!(rows.len(), 5);
}

#[test]
fn test_close_with_unread_bounded_stream() {
    let engine = engine();
    let conn = open_url(&engine, "couchbase://localhost/travel?row_queue_capacity=1");
    seed(&conn, 5);

    let stream = conn
        .query("SELECT * FROM travel", QueryOptions::default())
        .unwrap();
    // The I/O thread fills the queue and blocks on the second row
    std::thread::sleep(Duration::from_millis(20));

    let (tx, rx) = std::sync::mpsc::channel();
    let closer = conn.clone();
    std::thread::spawn(move || {
        let _ = tx.send(closer.close());
    });
    let closed = rx
        .recv_timeout(Duration::from_secs(5))
        .expect("close waited on the stream consumer");
    assert!(closed.unwrap());
    assert_eq!(conn.state(), ConnectionState::Closed);

    let items: Vec<Result<Value>> = stream.collect();
    let (last, rows) = items.split_last().unwrap();
    assert!(rows.len() <= 1);
    assert!(rows.iter().all(|row| row.is_ok()));
    assert!(last.as_ref().unwrap_err().is_cancelled());
}

#[test]
fn test_query_error_is_yielded_once() {
    let engine = engine();
    let conn = connect(&engine);

    let mut stream = conn
        .query("DELETE FROM travel", QueryOptions::default())
        .unwrap();
    let err = stream.next().unwrap().unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::ParsingFailure));
    assert!(stream.next().is_none());
    assert!(stream.metadata().is_none());

    let err = conn
        .query("SELECT * FROM nowhere", QueryOptions::default())
        .unwrap()
        .finish()
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::KeyspaceNotFound));

    assert!(matches!(
        conn.query("  ", QueryOptions::default()),
        Err(Error::InvalidArgument { .. })
    ));
}

fn define_by_kind(engine: &MemoryEngine) {
    engine.define_view("travel", "airports", "by_kind", |id, doc| {
        vec![(doc["kind"].clone(), json!(id))]
    });
}

#[test]
fn test_view_query() {
    let engine = engine();
    define_by_kind(&engine);
    let conn = connect(&engine);
    seed(&conn, 4);

    let (rows, meta) = conn
        .view_query("airports", "by_kind", ViewOptions::default())
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(meta.total_rows, 4);
    assert_eq!(meta.row_count, 4);
    let keys: Vec<&Value> = rows.iter().map(|row| &row.key).collect();
    assert_eq!(keys, vec![&json!("even"), &json!("even"), &json!("odd"), &json!("odd")]);
    assert_eq!(rows[0].id.as_deref(), Some("airport_0"));

    let (rows, meta) = conn
        .view_query(
            "airports",
            "by_kind",
            ViewOptions::default().descending(true).skip(1).limit(2),
        )
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(meta.total_rows, 4);
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].key, json!("odd"));
    assert_eq!(rows[1].key, json!("even"));

    let err = conn
        .view_query("missing", "by_kind", ViewOptions::default())
        .unwrap()
        .finish()
        .unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::DesignDocumentNotFound));

    assert!(matches!(
        conn.view_query("", "by_kind", ViewOptions::default()),
        Err(Error::InvalidArgument { .. })
    ));
}

#[test]
fn test_view_query_requires_open_connection() {
    let engine = engine();
    define_by_kind(&engine);
    let conn = open_url(&engine, "couchbase://localhost");
    assert!(matches!(
        conn.view_query("airports", "by_kind", ViewOptions::default()),
        Err(Error::InvalidArgument { .. })
    ));
    conn.close().unwrap();
    assert!(matches!(
        conn.view_query("airports", "by_kind", ViewOptions::default()),
        Err(Error::NotConnected { .. })
    ));
}

#[test]
fn test_next_unlocked_releases_host_lock() {
    let engine = engine();
    engine.set_row_chunk_size(1);
    let conn = connect(&engine);
    seed(&conn, 3);

    let host = Arc::new(Mutex::new(0usize));
    let mut stream = conn
        .query("SELECT * FROM travel", QueryOptions::default())
        .unwrap();

    let mut guard = host.lock();
    while let Some(row) = stream.next_unlocked(&mut guard) {
        row.unwrap();
        *guard += 1;
    }
    assert_eq!(*guard, 3);
}

#[test]
fn test_analytics_query() {
    let engine = engine();
    let conn = connect(&engine);
    seed(&conn, 2);

    let (rows, meta) = conn
        .analytics_query("SELECT * FROM travel", QueryOptions::default())
        .unwrap()
        .collect_all()
        .unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(meta.status, "success");
}
