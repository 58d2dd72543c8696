//! Callback-mode operations.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::json;

use super::{connect, engine};
use crate::*;

fn thread_name() -> Option<String> {
    std::thread::current().name().map(str::to_string)
}

#[test]
fn test_success_callback_runs_on_dispatcher() {
    let engine = engine();
    let conn = connect(&engine);
    conn.upsert("k", json!({"v": 1}), StoreOptions::default()).unwrap();

    let seen = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&seen);
    let pending = conn
        .get_with(
            "k",
            ReadOptions::default(),
            Callbacks::new(move |result: GetResult| {
                *slot.lock() = Some((result.content, thread_name()));
            }),
        )
        .unwrap();
    pending.wait().unwrap();

    let (content, thread) = seen.lock().take().unwrap();
    assert_eq!(content, Content::Json(json!({"v": 1})));
    assert_eq!(thread.as_deref(), Some("tether-callback-0"));
}

#[test]
fn test_error_routing() {
    let engine = engine();
    let conn = connect(&engine);

    // Without a failure callback the error surfaces through the handle
    let pending = conn
        .get_with(
            "missing",
            ReadOptions::default(),
            Callbacks::new(|_: GetResult| panic!("success callback must not run")),
        )
        .unwrap();
    assert!(pending.wait().unwrap_err().is_not_found());

    // With one, the callback receives it and the handle succeeds
    let code = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&code);
    let pending = conn
        .get_with(
            "missing",
            ReadOptions::default(),
            Callbacks::new(|_: GetResult| panic!("success callback must not run"))
                .on_error(move |e| *slot.lock() = e.code()),
        )
        .unwrap();
    pending.wait().unwrap();
    assert_eq!(*code.lock(), Some(ErrorCode::DocumentNotFound));
}

#[test]
fn test_panicking_callback_is_reported_and_contained() {
    let engine = engine();
    let conn = connect(&engine);
    conn.upsert("k", json!(1), StoreOptions::default()).unwrap();

    let pending = conn
        .exists_with(
            "k",
            TimeoutOptions::default(),
            Callbacks::new(|_: ExistsResult| panic!("host code failed")),
        )
        .unwrap();
    match pending.wait() {
        Err(Error::Callback { reason }) => assert_eq!(reason, "host code failed"),
        other => panic!("expected callback error, got {:?}", other),
    }

    // The dispatcher keeps serving callbacks
    let ran = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&ran);
    conn.exists_with(
        "k",
        TimeoutOptions::default(),
        Callbacks::new(move |r: ExistsResult| flag.store(r.exists, Ordering::SeqCst)),
    )
    .unwrap()
    .wait()
    .unwrap();
    assert!(ran.load(Ordering::SeqCst));
}

#[test]
fn test_captured_handles_return_to_baseline() {
    let engine = engine();
    let conn = connect(&engine);
    conn.upsert("k", json!({"v": 1}), StoreOptions::default()).unwrap();

    let transcoder: Arc<dyn Transcoder> = Arc::new(JsonTranscoder);
    let host_state = Arc::new(AtomicUsize::new(0));
    let baseline = (Arc::strong_count(&transcoder), Arc::strong_count(&host_state));

    for _ in 0..10 {
        let on_ok = Arc::clone(&host_state);
        let on_err = Arc::clone(&host_state);
        conn.get_with(
            "k",
            ReadOptions::default().transcoder(Arc::clone(&transcoder)),
            Callbacks::new(move |_: GetResult| {
                on_ok.fetch_add(1, Ordering::SeqCst);
            })
            .on_error(move |_| {
                on_err.fetch_add(1000, Ordering::SeqCst);
            }),
        )
        .unwrap()
        .wait()
        .unwrap();
    }

    assert_eq!(host_state.load(Ordering::SeqCst), 10);
    assert_eq!(
        (Arc::strong_count(&transcoder), Arc::strong_count(&host_state)),
        baseline
    );
}

#[test]
fn test_callbacks_never_overlap() {
    let engine = engine();
    let conn = connect(&engine);

    let busy = Arc::new(AtomicBool::new(false));
    let overlaps = Arc::new(AtomicUsize::new(0));
    let mut pendings = Vec::new();
    for i in 0..32 {
        let busy = Arc::clone(&busy);
        let overlaps = Arc::clone(&overlaps);
        let pending = conn
            .upsert_with(
                &format!("k{}", i),
                json!(i),
                StoreOptions::default(),
                Callbacks::new(move |_: MutationResult| {
                    if busy.swap(true, Ordering::SeqCst) {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    std::thread::sleep(Duration::from_millis(1));
                    busy.store(false, Ordering::SeqCst);
                }),
            )
            .unwrap();
        pendings.push(pending);
    }
    for pending in pendings {
        pending.wait().unwrap();
    }
    assert_eq!(overlaps.load(Ordering::SeqCst), 0);
    assert_eq!(engine.document_count("travel"), 32);
}

#[test]
fn test_wait_unlocked_lets_callback_take_host_lock() {
    let engine = engine();
    let conn = connect(&engine);
    conn.upsert("k", json!("v"), StoreOptions::default()).unwrap();

    let host = Arc::new(Mutex::new(Vec::<String>::new()));
    let mut guard = host.lock();

    let shared = Arc::clone(&host);
    let pending = conn
        .get_with(
            "k",
            ReadOptions::default(),
            Callbacks::new(move |r: GetResult| {
                shared.lock().push(r.content_as::<String>().unwrap());
            }),
        )
        .unwrap();
    pending.wait_unlocked(&mut guard).unwrap();
    assert_eq!(*guard, vec!["v".to_string()]);
}

#[test]
fn test_close_inside_callback() {
    let engine = engine();
    let conn = connect(&engine);
    conn.upsert("k", json!(1), StoreOptions::default()).unwrap();

    let outcome = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&outcome);
    let inner = conn.clone();
    conn.exists_with(
        "k",
        TimeoutOptions::default(),
        Callbacks::new(move |_: ExistsResult| {
            let blocking = inner.close();
            let deferred = inner.close_with(Callbacks::new(|_: bool| {}));
            *slot.lock() = Some((blocking, deferred.is_ok()));
        }),
    )
    .unwrap()
    .wait()
    .unwrap();

    let (blocking, deferred) = outcome.lock().take().unwrap();
    assert!(matches!(blocking, Err(Error::InvalidArgument { .. })));
    assert!(deferred);

    // The helper thread finishes the shutdown
    while conn.state() != ConnectionState::Closed {
        std::thread::sleep(Duration::from_millis(1));
    }
    assert!(!conn.close().unwrap());
}

#[test]
fn test_callback_ops_on_closed_connection_fail_synchronously() {
    let engine = engine();
    let conn = connect(&engine);
    conn.close().unwrap();
    let err = conn
        .get_with(
            "k",
            ReadOptions::default(),
            Callbacks::new(|_: GetResult| panic!("must not run")),
        )
        .unwrap_err();
    assert!(matches!(err, Error::NotConnected { .. }));
}
