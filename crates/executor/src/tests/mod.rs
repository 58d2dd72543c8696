//! Test modules for the executor crate.
//!
//! Every test runs against the in-memory engine, which completes requests on
//! the connection's real I/O threads.

use std::sync::Arc;

use tether_engine::MemoryEngine;

use crate::{ConnectOptions, Connection, Credentials};

pub mod callbacks;
pub mod kv;
pub mod streaming;

pub(crate) const BUCKET: &str = "travel";

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Engine with the `travel` bucket.
pub(crate) fn engine() -> MemoryEngine {
    init_tracing();
    let engine = MemoryEngine::new();
    engine.create_bucket(BUCKET);
    engine
}

pub(crate) fn open_url(engine: &MemoryEngine, url: &str) -> Connection {
    Connection::open(
        Arc::new(engine.clone()),
        url,
        Credentials::new("Administrator", "password"),
        ConnectOptions::default(),
    )
    .unwrap()
}

/// Open connection with `travel` as the default bucket.
pub(crate) fn connect(engine: &MemoryEngine) -> Connection {
    open_url(engine, "couchbase://localhost/travel")
}
