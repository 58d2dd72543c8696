//! Connection lifecycle.
//!
//! A [`Connection`] owns the runtime that drives the engine:
//! - an [`IoContext`] and the [`IoThreadPool`] running it
//! - the [`CallbackDispatcher`] that runs user callbacks
//! - the engine's [`Cluster`]
//!
//! States move `Created -> Open -> Closing -> Closed` and never back.
//!
//! # Shutdown order
//!
//! 1. seal every live row stream with a cancellation error, which also frees
//!    an I/O thread blocked on a full bounded queue
//! 2. close the cluster, which completes every outstanding request with a
//!    cancellation error, and wait for it
//! 3. stop the I/O context
//! 4. join every I/O thread
//! 5. drain and stop the callback dispatcher
//!
//! Cancelled callback-mode operations still get their callbacks: they are
//! queued on the dispatcher before step 5 drains it.

use std::fmt;
use std::sync::{Arc, Weak};
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::callback::{Callbacks, Pending};
use crate::codec::Transcoder;
use crate::config::{ConnectOptions, ConnectionString, Credentials};
use crate::convert::build_error;
use crate::dispatch::Call;
use crate::host::CallbackDispatcher;
use crate::tracer::{LoggingTracer, NoopTracer, RequestTracer};
use tether_core::{completion_barrier, AbortHandle, Error, Result};
use tether_engine::{Cluster, ClusterConfig, DocumentId, Engine, Handler, IoContext, IoThreadPool};

/// Name prefix of I/O threads.
pub const IO_THREAD_NAME: &str = "tether-io";

const OPEN_THREAD: &str = "tether-open";
const CLOSE_THREAD: &str = "tether-close";

/// Longest key the engine accepts, in bytes.
pub const MAX_KEY_LEN: usize = 250;

/// Lifecycle state of a [`Connection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Built, handshake not finished
    Created,
    /// Accepting operations
    Open,
    /// Shutdown in progress
    Closing,
    /// Shut down
    Closed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Created => "created",
            ConnectionState::Open => "open",
            ConnectionState::Closing => "closing",
            ConnectionState::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Threads and engine state owned by an open connection.
pub(crate) struct Runtime {
    pub(crate) context: IoContext,
    pub(crate) pool: IoThreadPool,
    pub(crate) dispatcher: CallbackDispatcher,
    pub(crate) cluster: Arc<dyn Cluster>,
    streams: Mutex<Streams>,
}

/// Row streams started on a runtime, sealed when it shuts down.
#[derive(Default)]
struct Streams {
    live: Vec<AbortHandle>,
    aborted: bool,
}

/// Block until the lifecycle request submitted by `submit` completes.
fn wait_for(submit: impl FnOnce(Handler<()>)) -> Result<()> {
    let (completer, waiter) = completion_barrier();
    submit(Box::new(move |result| {
        completer.complete(result.map_err(build_error))
    }));
    waiter.wait()
}

impl Runtime {
    fn start(engine: &dyn Engine, config: ClusterConfig, options: &ConnectOptions) -> Result<Self> {
        let context = IoContext::new();
        let pool = IoThreadPool::start(&context, options.num_io_threads, IO_THREAD_NAME)
            .map_err(|e| Error::internal(e.message))?;
        let dispatcher = match CallbackDispatcher::start() {
            Ok(dispatcher) => dispatcher,
            Err(e) => {
                context.stop();
                pool.join();
                return Err(e);
            }
        };
        let cluster = match engine.connect(context.clone(), config) {
            Ok(cluster) => cluster,
            Err(e) => {
                context.stop();
                pool.join();
                dispatcher.shutdown();
                return Err(build_error(e));
            }
        };
        debug!(io_threads = pool.size(), "runtime started");
        Ok(Self {
            context,
            pool,
            dispatcher,
            cluster,
            streams: Mutex::new(Streams::default()),
        })
    }

    /// Track a stream so shutdown can seal it. A stream registered after
    /// shutdown began is sealed at once.
    pub(crate) fn register_stream(&self, handle: AbortHandle) {
        let mut streams = self.streams.lock();
        if streams.aborted {
            drop(streams);
            handle.abort(Error::cancelled("connection closed"));
            return;
        }
        streams.live.retain(AbortHandle::is_live);
        streams.live.push(handle);
    }

    fn abort_streams(&self) {
        let live = {
            let mut streams = self.streams.lock();
            streams.aborted = true;
            std::mem::take(&mut streams.live)
        };
        let sealed = live
            .iter()
            .filter(|handle| handle.abort(Error::cancelled("connection closed")))
            .count();
        if sealed > 0 {
            debug!(streams = sealed, "sealed open row streams");
        }
    }

    fn shutdown(&self) -> Result<()> {
        self.abort_streams();
        let closed = wait_for(|handler| self.cluster.close(handler));
        self.context.stop();
        let panicked = self.pool.join();
        self.dispatcher.shutdown();
        if !panicked.is_empty() {
            return Err(Error::internal(format!(
                "I/O threads panicked: {}",
                panicked.join(", ")
            )));
        }
        closed
    }

    /// Whether a blocking shutdown from this thread would join itself.
    fn is_own_thread(&self) -> bool {
        self.dispatcher.is_dispatcher_thread() || self.pool.is_pool_thread()
    }
}

struct Lifecycle {
    state: ConnectionState,
    runtime: Option<Arc<Runtime>>,
    bucket: Option<String>,
}

pub(crate) struct Inner {
    lifecycle: Mutex<Lifecycle>,
    options: ConnectOptions,
    connection_string: ConnectionString,
    pub(crate) transcoder: Arc<dyn Transcoder>,
    pub(crate) tracer: Arc<dyn RequestTracer>,
}

impl Inner {
    fn begin_close(&self) -> Option<Arc<Runtime>> {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state != ConnectionState::Open {
            warn!(state = %lifecycle.state, "close ignored; connection is not open");
            return None;
        }
        lifecycle.state = ConnectionState::Closing;
        lifecycle.bucket = None;
        debug!("connection closing");
        lifecycle.runtime.take()
    }

    fn finish_close(&self, runtime: Arc<Runtime>) -> Result<()> {
        let result = runtime.shutdown();
        self.lifecycle.lock().state = ConnectionState::Closed;
        debug!(ok = result.is_ok(), "connection closed");
        result
    }

    /// Undo `begin_close` when the close could not be started.
    fn reopen(&self, runtime: Arc<Runtime>) {
        let mut lifecycle = self.lifecycle.lock();
        lifecycle.state = ConnectionState::Open;
        lifecycle.runtime = Some(runtime);
    }

    pub(crate) fn set_bucket(&self, bucket: Option<String>) {
        let mut lifecycle = self.lifecycle.lock();
        if lifecycle.state == ConnectionState::Open {
            lifecycle.bucket = bucket;
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let lifecycle = self.lifecycle.get_mut();
        if lifecycle.state != ConnectionState::Open {
            return;
        }
        lifecycle.state = ConnectionState::Closed;
        let Some(runtime) = lifecycle.runtime.take() else {
            return;
        };
        debug!("connection dropped while open; closing");
        if runtime.is_own_thread() {
            let spawned = thread::Builder::new()
                .name(CLOSE_THREAD.to_string())
                .spawn(move || {
                    if let Err(e) = runtime.shutdown() {
                        error!(error = %e, "shutdown of dropped connection failed");
                    }
                });
            if let Err(e) = spawned {
                error!(error = %e, "failed to spawn close thread for dropped connection");
            }
        } else if let Err(e) = runtime.shutdown() {
            error!(error = %e, "shutdown of dropped connection failed");
        }
    }
}

/// Handle to a connection. Clones share the connection; dropping the last
/// clone of an open connection closes it.
#[derive(Clone)]
pub struct Connection {
    pub(crate) inner: Arc<Inner>,
}

impl Connection {
    fn new(connection_string: ConnectionString, options: ConnectOptions) -> Self {
        let transcoder = options.transcoder.build();
        let tracer: Arc<dyn RequestTracer> = match options.tracing_threshold_ms {
            Some(ms) => Arc::new(LoggingTracer::new(std::time::Duration::from_millis(ms))),
            None => Arc::new(NoopTracer),
        };
        Self {
            inner: Arc::new(Inner {
                lifecycle: Mutex::new(Lifecycle {
                    state: ConnectionState::Created,
                    runtime: None,
                    bucket: None,
                }),
                options,
                connection_string,
                transcoder,
                tracer,
            }),
        }
    }

    fn prepare(connection_string: &str, options: ConnectOptions) -> Result<(ConnectionString, ConnectOptions)> {
        let parsed = ConnectionString::parse(connection_string)?;
        let options = options.with_overrides(&parsed)?;
        Ok((parsed, options))
    }

    /// Start the runtime, perform the handshake and open the bucket named in
    /// the connection string. Tears everything down on failure.
    fn start(&self, engine: &dyn Engine, credentials: Credentials) -> Result<()> {
        let inner = &self.inner;
        let config = ClusterConfig {
            hosts: inner.connection_string.host_strings(),
            credentials,
        };
        let runtime = Runtime::start(engine, config, &inner.options)?;

        let mut handshake = wait_for(|handler| runtime.cluster.open(handler));
        if handshake.is_ok() {
            if let Some(bucket) = &inner.connection_string.bucket {
                handshake = wait_for(|handler| runtime.cluster.open_bucket(bucket, handler));
            }
        }
        if let Err(e) = handshake {
            debug!(error = %e, "open failed; tearing down");
            if let Err(shutdown) = runtime.shutdown() {
                warn!(error = %shutdown, "teardown after failed open reported an error");
            }
            let mut lifecycle = inner.lifecycle.lock();
            lifecycle.state = ConnectionState::Closed;
            return Err(e);
        }

        let mut lifecycle = inner.lifecycle.lock();
        lifecycle.state = ConnectionState::Open;
        lifecycle.runtime = Some(Arc::new(runtime));
        lifecycle.bucket = inner.connection_string.bucket.clone();
        debug!(
            hosts = ?inner.connection_string.host_strings(),
            bucket = ?lifecycle.bucket,
            "connection open"
        );
        Ok(())
    }

    /// Connect to the cluster described by `connection_string` and block
    /// until the handshake finished.
    ///
    /// Query parameters of the connection string override `options`. When
    /// the connection string names a bucket it is opened as the default
    /// bucket for key-value operations.
    pub fn open(
        engine: Arc<dyn Engine>,
        connection_string: &str,
        credentials: Credentials,
        options: ConnectOptions,
    ) -> Result<Connection> {
        let (parsed, options) = Self::prepare(connection_string, options)?;
        let connection = Connection::new(parsed, options);
        connection.start(&*engine, credentials)?;
        Ok(connection)
    }

    /// [`open`](Connection::open), delivered through callbacks.
    ///
    /// Connection-string and option errors are returned synchronously. The
    /// callback runs on a helper thread, not on the dispatcher.
    pub fn open_with(
        engine: Arc<dyn Engine>,
        connection_string: &str,
        credentials: Credentials,
        options: ConnectOptions,
        callbacks: Callbacks<Connection>,
    ) -> Result<Pending> {
        let (parsed, options) = Self::prepare(connection_string, options)?;
        let (done, waiter) = completion_barrier();
        thread::Builder::new()
            .name(OPEN_THREAD.to_string())
            .spawn(move || {
                let connection = Connection::new(parsed, options);
                let result = connection
                    .start(&*engine, credentials)
                    .map(|()| connection);
                callbacks.run_here(result, done);
            })
            .map_err(|e| Error::internal(format!("failed to spawn open thread: {}", e)))?;
        Ok(Pending::new(waiter))
    }

    /// Shut the connection down.
    ///
    /// Returns `true` when this call performed the shutdown and `false` when
    /// the connection was already closing or closed. Every operation still
    /// in flight completes with a cancellation error before this returns.
    ///
    /// Calling this from a callback is rejected, since shutdown joins the
    /// thread callbacks run on; use [`close_with`](Connection::close_with).
    pub fn close(&self) -> Result<bool> {
        if let Some(runtime) = &self.inner.lifecycle.lock().runtime {
            if runtime.is_own_thread() {
                return Err(Error::invalid_argument(
                    "close would join the current thread; use close_with",
                ));
            }
        }
        match self.inner.begin_close() {
            Some(runtime) => self.inner.finish_close(runtime).map(|()| true),
            None => Ok(false),
        }
    }

    /// [`close`](Connection::close), delivered through callbacks on a helper
    /// thread. Safe to call from a callback.
    pub fn close_with(&self, callbacks: Callbacks<bool>) -> Result<Pending> {
        let runtime = self.inner.begin_close();
        let restore = runtime.clone();
        let inner = Arc::clone(&self.inner);
        let (done, waiter) = completion_barrier();
        let spawned = thread::Builder::new()
            .name(CLOSE_THREAD.to_string())
            .spawn(move || {
                let result = match runtime {
                    Some(runtime) => inner.finish_close(runtime).map(|()| true),
                    None => Ok(false),
                };
                callbacks.run_here(result, done);
            });
        if let Err(e) = spawned {
            if let Some(runtime) = restore {
                self.inner.reopen(runtime);
            }
            return Err(Error::internal(format!("failed to spawn close thread: {}", e)));
        }
        Ok(Pending::new(waiter))
    }

    /// Open `bucket` and make it the default for key-value operations.
    pub fn open_bucket(&self, bucket: &str) -> Result<()> {
        self.blocking(self.bucket_call(bucket, true))
    }

    /// [`open_bucket`](Connection::open_bucket) with callbacks.
    pub fn open_bucket_with(&self, bucket: &str, callbacks: Callbacks<()>) -> Result<Pending> {
        self.with_callbacks(self.bucket_call(bucket, true), callbacks)
    }

    /// Close `bucket`. If it was the default bucket, key-value operations
    /// fail until another bucket is opened.
    pub fn close_bucket(&self, bucket: &str) -> Result<()> {
        self.blocking(self.bucket_call(bucket, false))
    }

    /// [`close_bucket`](Connection::close_bucket) with callbacks.
    pub fn close_bucket_with(&self, bucket: &str, callbacks: Callbacks<()>) -> Result<Pending> {
        self.with_callbacks(self.bucket_call(bucket, false), callbacks)
    }

    fn bucket_call(&self, bucket: &str, open: bool) -> Call<(), ()> {
        let name = bucket.to_string();
        let target = name.clone();
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        Call::new(
            if open { "open_bucket" } else { "close_bucket" },
            move |cluster: &dyn Cluster, handler: Handler<()>| {
                if open {
                    cluster.open_bucket(&target, handler)
                } else {
                    cluster.close_bucket(&target, handler)
                }
            },
            move |(), _: &dyn Transcoder| {
                if let Some(inner) = weak.upgrade() {
                    if open {
                        inner.set_bucket(Some(name));
                    } else {
                        let mut lifecycle = inner.lifecycle.lock();
                        if lifecycle.bucket.as_deref() == Some(name.as_str()) {
                            lifecycle.bucket = None;
                        }
                    }
                }
                Ok(())
            },
        )
        .key(bucket)
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.lock().state
    }

    /// Default bucket for key-value operations.
    pub fn bucket(&self) -> Option<String> {
        self.inner.lifecycle.lock().bucket.clone()
    }

    /// Effective options, after connection-string overrides.
    pub fn options(&self) -> &ConnectOptions {
        &self.inner.options
    }

    /// Parsed connection string.
    pub fn connection_string(&self) -> &ConnectionString {
        &self.inner.connection_string
    }

    /// The runtime of an open connection.
    pub(crate) fn runtime(&self) -> Result<Arc<Runtime>> {
        let lifecycle = self.inner.lifecycle.lock();
        match (lifecycle.state, &lifecycle.runtime) {
            (ConnectionState::Open, Some(runtime)) => Ok(Arc::clone(runtime)),
            (state, _) => Err(Error::NotConnected {
                state: state.to_string(),
            }),
        }
    }

    /// Validate `key` and address it in the default bucket.
    pub(crate) fn document_id(&self, key: &str) -> Result<DocumentId> {
        validate_key(key)?;
        let lifecycle = self.inner.lifecycle.lock();
        if lifecycle.state != ConnectionState::Open {
            return Err(Error::NotConnected {
                state: lifecycle.state.to_string(),
            });
        }
        match &lifecycle.bucket {
            Some(bucket) => Ok(DocumentId::new(bucket.clone(), key)),
            None => Err(Error::invalid_argument(
                "no bucket is open; call open_bucket first",
            )),
        }
    }
}

pub(crate) fn validate_key(key: &str) -> Result<()> {
    if key.is_empty() {
        return Err(Error::invalid_argument("key must not be empty"));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(Error::invalid_argument(format!(
            "key is {} bytes; the limit is {}",
            key.len(),
            MAX_KEY_LEN
        )));
    }
    Ok(())
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lifecycle = self.inner.lifecycle.lock();
        f.debug_struct("Connection")
            .field("state", &lifecycle.state)
            .field("bucket", &lifecycle.bucket)
            .field("hosts", &self.inner.connection_string.host_strings())
            .finish()
    }
}
