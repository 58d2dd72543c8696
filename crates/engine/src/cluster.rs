//! The engine collaborator surface.
//!
//! A [`Cluster`] accepts requests and reports their outcomes by invoking
//! completion handlers on the threads driving its [`IoContext`]. Every
//! handler is invoked exactly once, including when the cluster is closed
//! with requests still in flight (they complete with
//! `ErrorCode::RequestCanceled`).

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::EngineResult;
use crate::io::IoContext;
use crate::request::{PingRequest, Request, StreamRequest};
use crate::response::{DiagnosticsReport, PingReport, Response, StreamMeta, StreamRow};

/// One-shot completion handler.
pub type Handler<T> = Box<dyn FnOnce(EngineResult<T>) + Send + 'static>;

/// Row handler of a streaming request.
///
/// Returning `ControlFlow::Break` asks the engine to stop producing rows; the
/// final handler is still invoked.
pub type RowHandler = Box<dyn FnMut(StreamRow) -> ControlFlow<()> + Send + 'static>;

/// Username and password used to authenticate.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Credentials {
    /// User name
    pub username: String,
    /// Password
    pub password: String,
}

impl Credentials {
    /// Create credentials.
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything an engine needs to build a cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterConfig {
    /// Seed nodes as `host[:port]`
    pub hosts: Vec<String>,
    /// Credentials presented during the handshake
    pub credentials: Credentials,
}

/// Connection to a cluster.
pub trait Cluster: Send + Sync {
    /// Perform the bootstrap handshake.
    fn open(&self, handler: Handler<()>);

    /// Shut down, cancelling every request still in flight.
    ///
    /// The cancelled handlers run before `handler`.
    fn close(&self, handler: Handler<()>);

    /// Open a bucket for key-value access.
    fn open_bucket(&self, bucket: &str, handler: Handler<()>);

    /// Close a previously opened bucket.
    fn close_bucket(&self, bucket: &str, handler: Handler<()>);

    /// Execute a single-document request.
    fn execute(&self, request: Request, handler: Handler<Response>);

    /// Execute a streaming request.
    ///
    /// `on_row` may run many times, always before `on_complete`, and never
    /// concurrently with itself.
    fn execute_streaming(
        &self,
        request: StreamRequest,
        on_row: RowHandler,
        on_complete: Handler<StreamMeta>,
    );

    /// Report endpoint states without network traffic.
    fn diagnostics(&self, report_id: Option<String>, handler: Handler<DiagnosticsReport>);

    /// Ping endpoints.
    fn ping(&self, request: PingRequest, handler: Handler<PingReport>);
}

/// Factory for clusters.
pub trait Engine: Send + Sync {
    /// Create a cluster whose handlers run on `context`.
    ///
    /// The cluster is not usable until [`Cluster::open`] completed.
    fn connect(&self, context: IoContext, config: ClusterConfig) -> EngineResult<Arc<dyn Cluster>>;
}
