//! Tether - binding layer between a multithreaded database engine and
//! single-lock host runtimes
//!
//! The engine completes work on its own I/O threads; a host runtime such as
//! an interpreter with a global lock can only touch its objects from threads
//! holding that lock. Tether sits in between: completion handlers only ever
//! hand values over through a completion barrier, a row queue, or the
//! callback thread.
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use tether::{ConnectOptions, Connection, Credentials, MemoryEngine, ReadOptions, StoreOptions};
//!
//! let engine = MemoryEngine::new();
//! engine.create_bucket("travel");
//!
//! let conn = Connection::open(
//!     Arc::new(engine),
//!     "couchbase://localhost/travel",
//!     Credentials::new("Administrator", "password"),
//!     ConnectOptions::default(),
//! )?;
//! conn.upsert("airline_10", serde_json::json!({"name": "40-Mile Air"}), StoreOptions::default())?;
//! let doc = conn.get("airline_10", ReadOptions::default())?;
//! conn.close()?;
//! ```
//!
//! # Architecture
//!
//! Every operation goes through [`Connection`]. The coordination primitives
//! live in `tether-core`, the engine surface and the in-memory engine in
//! `tether-engine`. Only what a host binding needs is re-exported here.

// Re-export the public API from tether-executor
pub use tether_executor::*;

pub use tether_core::{completion_barrier, row_queue, Completer, RowSender, Streamed, Waiter};
pub use tether_engine::MemoryEngine;
