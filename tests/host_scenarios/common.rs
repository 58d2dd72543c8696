//! Common utilities for host scenario tests

use std::sync::Arc;

use parking_lot::Mutex;
use tether::{ConnectOptions, Connection, Credentials, MemoryEngine};

pub const BUCKET: &str = "travel";

/// State guarded by the simulated host lock.
#[derive(Debug, Default)]
pub struct HostState {
    pub delivered: Vec<String>,
    pub errors: usize,
}

pub type HostLock = Arc<Mutex<HostState>>;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// In-memory engine with the `travel` bucket.
pub fn create_engine() -> MemoryEngine {
    init_tracing();
    let engine = MemoryEngine::new();
    engine.create_bucket(BUCKET);
    engine
}

pub fn open(engine: &MemoryEngine, url: &str, options: ConnectOptions) -> Connection {
    Connection::open(
        Arc::new(engine.clone()),
        url,
        Credentials::new("Administrator", "password"),
        options,
    )
    .unwrap()
}

/// Connection to the `travel` bucket with default options.
pub fn connect(engine: &MemoryEngine) -> Connection {
    open(engine, "couchbase://127.0.0.1/travel", ConnectOptions::default())
}

pub fn host_lock() -> HostLock {
    Arc::new(Mutex::new(HostState::default()))
}
