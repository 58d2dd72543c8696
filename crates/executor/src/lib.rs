//! # Tether Executor
//!
//! Host-facing half of Tether: a [`Connection`] that drives a database
//! engine on its own I/O threads and exposes every operation as a blocking
//! call, a callback call, a batch, or a row stream.
//!
//! ## Quick Start
//!
//! ```text
//! use std::sync::Arc;
//! use tether_executor::{ConnectOptions, Connection, Credentials, ReadOptions, StoreOptions};
//!
//! let conn = Connection::open(
//!     engine,
//!     "couchbase://localhost/travel",
//!     Credentials::new("Administrator", "password"),
//!     ConnectOptions::default(),
//! )?;
//! conn.upsert("airline_10", serde_json::json!({"name": "40-Mile Air"}), StoreOptions::default())?;
//! let doc = conn.get("airline_10", ReadOptions::default())?;
//! conn.close()?;
//! ```
//!
//! ## Threads
//!
//! | Thread | Runs |
//! |--------|------|
//! | `tether-io-N` | engine work and completion handlers |
//! | `tether-callback-0` | user callbacks, one at a time |
//! | caller | blocking waits and row iteration |
//!
//! Completion handlers never touch host state: blocking calls receive their
//! value through a completion barrier, callbacks are posted to the callback
//! thread, and streams are fed through a row queue.

#![warn(missing_docs)]

mod api;
mod callback;
mod codec;
mod config;
mod connection;
mod convert;
mod dispatch;
mod host;
mod options;
mod results;
mod tracer;

// Test modules
#[cfg(test)]
mod tests;

// =============================================================================
// Public API
// =============================================================================

pub use api::{LookupInSpec, MutateInSpec, MAX_SUBDOC_SPECS};
pub use callback::{Callbacks, Pending};
pub use codec::{
    Content, Format, JsonTranscoder, RawBinaryTranscoder, Transcoder, TranscoderKind,
    BINARY_FLAGS, JSON_FLAGS, STRING_FLAGS,
};
pub use config::{
    ConnectOptions, ConnectionString, Credentials, HostAddress, CONFIG_FILE_NAME,
    DEFAULT_ANALYTICS_TIMEOUT_MS, DEFAULT_KV_TIMEOUT_MS, DEFAULT_QUERY_TIMEOUT_MS,
    DEFAULT_VIEW_TIMEOUT_MS,
};
pub use connection::{Connection, ConnectionState, IO_THREAD_NAME, MAX_KEY_LEN};
pub use host::DISPATCHER_THREAD;
pub use options::{
    CasOptions, CounterOptions, MutateInOptions, PingOptions, QueryOptions, ReadOptions,
    StoreOptions, TimeoutOptions, ViewOptions,
};
pub use results::{
    AnalyticsResult, CounterResult, ExistsResult, GetReplicaResult, GetResult, LookupInResult,
    MutateInResult, MutationResult, QueryMetaData, QueryMetrics, QueryResult, ReplicaStream,
    SubdocEntry, ViewMetaData, ViewResult, ViewRow,
};
pub use tracer::{LoggingTracer, NoopTracer, RequestSpan, RequestTracer};

pub use tether_core::{Error, ErrorCode, ErrorContext, MultiResult, Result, RowStream};
pub use tether_engine::{
    DiagnosticsReport, EndpointDiagnostics, EndpointPing, EndpointState, Engine, MutationToken,
    PingReport, PingState, ServiceType,
};
