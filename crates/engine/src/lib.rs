//! Engine collaborator surface for Tether
//!
//! The binding layer talks to a database engine exclusively through this
//! crate:
//! - [`IoContext`] / [`IoThreadPool`]: the execution context every
//!   completion handler runs on, and the threads driving it
//! - [`Cluster`] / [`Engine`]: requests go down, handler invocations come up
//! - [`Request`], [`StreamRequest`], [`Response`], [`StreamRow`]: typed
//!   payloads
//! - [`MemoryEngine`]: an in-process engine with the same threading
//!   behaviour as a remote one

#![warn(clippy::all)]

pub mod cluster;
pub mod error;
pub mod io;
pub mod memory;
pub mod request;
pub mod response;

pub use cluster::{Cluster, ClusterConfig, Credentials, Engine, Handler, RowHandler};
pub use error::{EngineError, EngineResult};
pub use io::{panic_message, ContextStats, IoContext, IoThreadPool, PostError};
pub use memory::{MemoryEngine, ViewMap, DEFAULT_ROW_CHUNK_SIZE};
pub use request::{
    DocumentId, LookupSpec, MutateSpec, Operation, PingRequest, RawDocument, Request,
    ServiceType, StatementParams, StreamKind, StreamRequest, ViewParams, DEFAULT_NAME,
};
pub use response::{
    DiagnosticsReport, EndpointDiagnostics, EndpointPing, EndpointState, MutationToken,
    PingReport, PingState, Response, StreamMeta, StreamRow, SubdocField,
};
