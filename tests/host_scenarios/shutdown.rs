//! Shutdown Scenarios
//!
//! Close must cancel everything in flight exactly once and leave every
//! handle in a state that reports `NotConnected`.

use crate::common::*;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tether::{Callbacks, ConnectionState, Error, MutationResult, QueryOptions, StoreOptions};

fn is_shutdown_error(error: &Error) -> bool {
    matches!(error, Error::NotConnected { .. }) || error.is_cancelled()
}

// ============================================================================
// Competing closers
// ============================================================================

#[test]
fn exactly_one_closer_performs_shutdown() {
    let engine = create_engine();
    let conn = connect(&engine);
    let barrier = Arc::new(Barrier::new(8));

    let closers: Vec<_> = (0..8)
        .map(|_| {
            let conn = conn.clone();
            let barrier = barrier.clone();
            thread::spawn(move || {
                barrier.wait();
                conn.close().unwrap()
            })
        })
        .collect();
    let performed = closers
        .into_iter()
        .map(|c| c.join().unwrap())
        .filter(|performed| *performed)
        .count();

    assert_eq!(performed, 1);
    // Losers may return before the winner finished
    while conn.state() != ConnectionState::Closed {
        thread::sleep(Duration::from_millis(1));
    }
}

// ============================================================================
// Work racing close
// ============================================================================

#[test]
fn writers_racing_close_stop_cleanly() {
    let engine = create_engine();
    let conn = open(
        &engine,
        "couchbase://127.0.0.1/travel?num_io_threads=2",
        Default::default(),
    );
    let written = Arc::new(AtomicUsize::new(0));

    let writers: Vec<_> = (0..4)
        .map(|t| {
            let conn = conn.clone();
            let written = written.clone();
            thread::spawn(move || {
                for i in 0.. {
                    match conn.upsert(&format!("w{}-{}", t, i), json!(i), StoreOptions::default()) {
                        Ok(_) => {
                            written.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => return e,
                    }
                }
                unreachable!()
            })
        })
        .collect();

    while written.load(Ordering::SeqCst) < 50 {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(conn.close().unwrap());

    for writer in writers {
        let error = writer.join().unwrap();
        assert!(is_shutdown_error(&error), "unexpected error: {:?}", error);
    }
    assert!(engine.document_count(BUCKET) >= 50);
}

#[test]
fn close_ends_parked_stream_with_cancellation() {
    let engine = create_engine();
    let conn = connect(&engine);
    conn.upsert("doc", json!({"n": 1}), StoreOptions::default())
        .unwrap();

    engine.hold();
    let mut stream = conn
        .query("SELECT * FROM travel", QueryOptions::default())
        .unwrap();
    while engine.held_operations() < 1 {
        thread::sleep(Duration::from_millis(1));
    }
    assert!(conn.close().unwrap());

    let error = stream.next().unwrap().unwrap_err();
    assert!(error.is_cancelled());
    assert!(stream.next().is_none());
}

#[test]
fn deferred_close_from_callback_thread() {
    let engine = create_engine();
    let conn = connect(&engine);
    let host = host_lock();

    let inner = conn.clone();
    let shared = host.clone();
    conn.upsert_with(
        "k",
        json!(1),
        StoreOptions::default(),
        Callbacks::new(move |_: MutationResult| {
            let shared = shared.clone();
            let _pending = inner
                .close_with(Callbacks::new(move |performed: bool| {
                    shared.lock().delivered.push(format!("closed:{}", performed));
                }))
                .unwrap();
        }),
    )
    .unwrap()
    .wait()
    .unwrap();

    while host.lock().delivered.is_empty() {
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(host.lock().delivered, vec!["closed:true".to_string()]);
    assert_eq!(conn.state(), ConnectionState::Closed);
}
