//! Host Lock Scenarios
//!
//! Host threads hold the host lock except while blocked in Tether. Callbacks
//! take the same lock, so a waiter that kept it would deadlock.

use crate::common::*;
use parking_lot::MutexGuard;
use serde_json::json;
use std::thread;
use tether::{
    Callbacks, Error, ExistsResult, GetResult, QueryOptions, ReadOptions, StoreOptions, TimeoutOptions,
};

// ============================================================================
// Blocking calls and callbacks from several host threads
// ============================================================================

#[test]
fn host_threads_mix_blocking_and_callback_calls() {
    let engine = create_engine();
    let conn = open(
        &engine,
        "couchbase://127.0.0.1/travel?num_io_threads=4",
        Default::default(),
    );
    let host = host_lock();

    let workers: Vec<_> = (0..4)
        .map(|t| {
            let conn = conn.clone();
            let host = host.clone();
            thread::spawn(move || {
                let mut guard = host.lock();
                for i in 0..10 {
                    let key = format!("t{}-{}", t, i);
                    MutexGuard::unlocked(&mut guard, || {
                        conn.upsert(&key, json!({"t": t, "i": i}), StoreOptions::default())
                    })
                    .unwrap();

                    let shared = host.clone();
                    let pending = conn
                        .get_with(
                            &key,
                            ReadOptions::default(),
                            Callbacks::new(move |r: GetResult| {
                                let doc = r.content_as::<serde_json::Value>().unwrap();
                                shared.lock().delivered.push(format!("{}-{}", doc["t"], doc["i"]));
                            }),
                        )
                        .unwrap();
                    pending.wait_unlocked(&mut guard).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let state = host.lock();
    assert_eq!(state.delivered.len(), 40);
    assert!(state.delivered.contains(&"3-9".to_string()));
    assert_eq!(engine.document_count(BUCKET), 40);
}

#[test]
fn failure_callbacks_see_host_state() {
    let engine = create_engine();
    let conn = connect(&engine);
    let host = host_lock();
    let mut guard = host.lock();

    for key in ["a", "b", "c"] {
        let shared = host.clone();
        conn.exists_with(key, TimeoutOptions::default(), Callbacks::new(|_: ExistsResult| {}))
        .unwrap()
        .wait_unlocked(&mut guard)
        .unwrap();

        conn.get_with(
            key,
            ReadOptions::default(),
            Callbacks::new(|_: GetResult| {}).on_error(move |e| {
                assert!(e.is_not_found());
                shared.lock().errors += 1;
            }),
        )
        .unwrap()
        .wait_unlocked(&mut guard)
        .unwrap();
    }
    assert_eq!(guard.errors, 3);
}

// ============================================================================
// Streams and batches
// ============================================================================

#[test]
fn stream_rows_consumed_under_host_lock() {
    let engine = create_engine();
    engine.set_row_chunk_size(3);
    let conn = connect(&engine);
    for i in 0..10 {
        conn.upsert(&format!("r{:02}", i), json!({"n": i}), StoreOptions::default())
            .unwrap();
    }

    let host = host_lock();
    let mut guard = host.lock();
    let mut stream = conn
        .query("SELECT * FROM travel", QueryOptions::default())
        .unwrap();
    while let Some(row) = stream.next_unlocked(&mut guard) {
        let row = row.unwrap();
        guard.delivered.push(row["travel"]["n"].to_string());
    }
    let expected: Vec<String> = (0..10).map(|n| n.to_string()).collect();
    assert_eq!(guard.delivered, expected);
    assert_eq!(stream.metadata().unwrap().metrics.result_count, 10);
}

#[test]
fn batch_waits_without_host_lock() {
    let engine = create_engine();
    let conn = connect(&engine);
    let host = host_lock();
    let mut guard = host.lock();

    let stored = MutexGuard::unlocked(&mut guard, || {
        conn.upsert_multi(
            (0..20).map(|i| (format!("m{}", i), json!(i))),
            StoreOptions::default(),
        )
    })
    .unwrap();
    assert!(stored.all_okay());

    let keys: Vec<String> = (0..22).map(|i| format!("m{}", i)).collect();
    let read = conn
        .get_multi_unlocked(&keys, ReadOptions::default(), &mut guard)
        .unwrap();
    assert!(!read.all_okay());
    assert_eq!(read.failures().count(), 2);
    for (key, error) in read.failures() {
        assert!(key == "m20" || key == "m21");
        assert!(matches!(error, Error::Engine { .. }));
    }
}
