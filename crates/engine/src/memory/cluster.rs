//! In-flight request tracking for the in-memory cluster.
//!
//! Every submitted request becomes a [`PendingOp`] in the cluster's
//! registry. Running an op removes it from the registry first, so `close`
//! and the I/O threads never both own the same op: whichever takes it out of
//! the registry invokes its handler, exactly once.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, trace};

use super::Server;
use crate::cluster::{Cluster, ClusterConfig, Handler, RowHandler};
use crate::error::{EngineError, EngineResult};
use crate::io::{IoContext, PostError};
use crate::request::{PingRequest, Request, StreamRequest};
use crate::response::{DiagnosticsReport, PingReport, Response, StreamMeta, StreamRow};
use tether_core::ErrorCode;

pub(crate) enum Step {
    Done,
    Continue,
}

pub(crate) trait PendingOp: Send {
    /// Advance the op. Handlers are invoked from here.
    fn step(&mut self, cluster: &ClusterShared) -> Step;

    /// Complete the op with `error` without running it.
    fn cancel(self: Box<Self>, error: EngineError);
}

type Work<T> = Box<dyn FnOnce(&ClusterShared) -> EngineResult<T> + Send>;

/// Op that completes in a single step.
struct UnaryOp<T> {
    deadline: Option<Instant>,
    timeout_code: ErrorCode,
    work: Option<Work<T>>,
    handler: Option<Handler<T>>,
}

impl<T: Send + 'static> PendingOp for UnaryOp<T> {
    fn step(&mut self, cluster: &ClusterShared) -> Step {
        let (Some(work), Some(handler)) = (self.work.take(), self.handler.take()) else {
            return Step::Done;
        };
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            handler(Err(EngineError::new(self.timeout_code, "request timed out")));
        } else {
            handler(work(cluster));
        }
        Step::Done
    }

    fn cancel(mut self: Box<Self>, error: EngineError) {
        if let Some(handler) = self.handler.take() {
            handler(Err(error));
        }
    }
}

/// Rows and metadata produced when a streaming op first runs.
pub(crate) struct StreamOutput {
    pub rows: Vec<StreamRow>,
    pub total_rows: Option<u64>,
    pub client_context_id: Option<String>,
    pub warnings: Vec<String>,
}

/// Op that delivers its rows in chunks, one chunk per step.
struct StreamOp {
    deadline: Option<Instant>,
    started: Instant,
    source: Option<Work<StreamOutput>>,
    rows: VecDeque<StreamRow>,
    meta: Option<StreamMeta>,
    on_row: RowHandler,
    on_complete: Option<Handler<StreamMeta>>,
}

impl StreamOp {
    fn finish(&mut self, result: EngineResult<StreamMeta>) -> Step {
        if let Some(handler) = self.on_complete.take() {
            handler(result);
        }
        Step::Done
    }
}

impl PendingOp for StreamOp {
    fn step(&mut self, cluster: &ClusterShared) -> Step {
        if self.deadline.map_or(false, |d| Instant::now() >= d) {
            return self.finish(Err(EngineError::new(
                ErrorCode::UnambiguousTimeout,
                "streaming request timed out",
            )));
        }
        if let Some(source) = self.source.take() {
            match source(cluster) {
                Ok(output) => {
                    self.meta = Some(StreamMeta {
                        request_id: uuid::Uuid::new_v4().to_string(),
                        client_context_id: output.client_context_id,
                        status: "success".to_string(),
                        row_count: 0,
                        total_rows: output.total_rows,
                        elapsed: Duration::ZERO,
                        warnings: output.warnings,
                    });
                    self.rows = output.rows.into();
                }
                Err(e) => return self.finish(Err(e)),
            }
        }

        let chunk = cluster.server.row_chunk_size();
        let mut stopped = false;
        for _ in 0..chunk {
            let Some(row) = self.rows.pop_front() else {
                break;
            };
            if let Some(meta) = self.meta.as_mut() {
                meta.row_count += 1;
            }
            if let ControlFlow::Break(()) = (self.on_row)(row) {
                stopped = true;
                break;
            }
        }
        if !stopped && !self.rows.is_empty() {
            return Step::Continue;
        }

        let Some(mut meta) = self.meta.take() else {
            return self.finish(Err(EngineError::new(
                ErrorCode::InternalServerFailure,
                "stream finished without metadata",
            )));
        };
        meta.elapsed = self.started.elapsed();
        if stopped {
            meta.status = "stopped".to_string();
        }
        self.finish(Ok(meta))
    }

    fn cancel(mut self: Box<Self>, error: EngineError) {
        self.finish(Err(error));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Created,
    Open,
    Closed,
}

struct Registry {
    phase: Phase,
    buckets: HashSet<String>,
    ops: HashMap<u64, Box<dyn PendingOp>>,
    parked: Vec<u64>,
}

/// State shared by a cluster handle and the tasks it posts.
pub(crate) struct ClusterShared {
    pub(crate) server: Arc<Server>,
    pub(crate) config: ClusterConfig,
    context: IoContext,
    registry: Mutex<Registry>,
    next_op: AtomicU64,
}

impl ClusterShared {
    pub(crate) fn new(server: Arc<Server>, context: IoContext, config: ClusterConfig) -> Self {
        Self {
            server,
            config,
            context,
            registry: Mutex::new(Registry {
                phase: Phase::Created,
                buckets: HashSet::new(),
                ops: HashMap::new(),
                parked: Vec::new(),
            }),
            next_op: AtomicU64::new(1),
        }
    }

    pub(crate) fn phase(&self) -> Phase {
        self.registry.lock().phase
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.registry.lock().phase = phase;
    }

    pub(crate) fn open_buckets(&self) -> Vec<String> {
        let mut buckets: Vec<String> = self.registry.lock().buckets.iter().cloned().collect();
        buckets.sort();
        buckets
    }

    pub(crate) fn bucket_is_open(&self, bucket: &str) -> bool {
        self.registry.lock().buckets.contains(bucket)
    }

    pub(crate) fn set_bucket_open(&self, bucket: &str, open: bool) -> bool {
        let mut registry = self.registry.lock();
        if open {
            registry.buckets.insert(bucket.to_string())
        } else {
            registry.buckets.remove(bucket)
        }
    }

    /// Number of ops parked while the server is held.
    pub(crate) fn parked(&self) -> usize {
        self.registry.lock().parked.len()
    }

    fn submit(self: &Arc<Self>, op: Box<dyn PendingOp>) {
        let id = self.next_op.fetch_add(1, Ordering::Relaxed);
        {
            let mut registry = self.registry.lock();
            if registry.phase != Phase::Closed {
                registry.ops.insert(id, op);
                if self.server.is_held() {
                    registry.parked.push(id);
                    trace!(op = id, "operation parked");
                    return;
                }
                drop(registry);
                self.schedule(id);
                return;
            }
        }
        op.cancel(EngineError::cancelled("cluster is closed"));
    }

    fn schedule(self: &Arc<Self>, id: u64) {
        let shared = Arc::clone(self);
        if let Err(PostError(_task)) = self.context.post(move || shared.run(id)) {
            let op = self.registry.lock().ops.remove(&id);
            if let Some(op) = op {
                op.cancel(EngineError::cancelled("execution context is stopped"));
            }
        }
    }

    fn run(self: &Arc<Self>, id: u64) {
        let Some(mut op) = self.registry.lock().ops.remove(&id) else {
            // Already cancelled by close
            return;
        };
        if let Step::Continue = op.step(self) {
            let mut registry = self.registry.lock();
            if registry.phase == Phase::Closed {
                drop(registry);
                op.cancel(EngineError::cancelled("cluster closed during streaming"));
            } else {
                registry.ops.insert(id, op);
                drop(registry);
                self.schedule(id);
            }
        }
    }

    /// Schedule every parked op.
    pub(crate) fn release(self: &Arc<Self>) {
        let parked = std::mem::take(&mut self.registry.lock().parked);
        for id in parked {
            self.schedule(id);
        }
    }

    fn unary<T: Send + 'static>(
        self: &Arc<Self>,
        timeout: Option<Duration>,
        timeout_code: ErrorCode,
        work: Work<T>,
        handler: Handler<T>,
    ) {
        self.submit(Box::new(UnaryOp {
            deadline: timeout.map(|t| Instant::now() + t),
            timeout_code,
            work: Some(work),
            handler: Some(handler),
        }));
    }

    fn close(self: &Arc<Self>, handler: Handler<()>) {
        let cancelled = {
            let mut registry = self.registry.lock();
            if registry.phase == Phase::Closed {
                None
            } else {
                registry.phase = Phase::Closed;
                registry.buckets.clear();
                registry.parked.clear();
                let mut ops: Vec<(u64, Box<dyn PendingOp>)> = registry.ops.drain().collect();
                ops.sort_by_key(|(id, _)| *id);
                Some(ops)
            }
        };
        let Some(ops) = cancelled else {
            debug!("cluster already closed");
            let task = move || handler(Ok(()));
            if let Err(PostError(task)) = self.context.post(task) {
                task();
            }
            return;
        };
        debug!(outstanding = ops.len(), "closing cluster");
        let task = move || {
            for (_, op) in ops {
                op.cancel(EngineError::cancelled("cluster closed"));
            }
            handler(Ok(()));
        };
        if let Err(PostError(task)) = self.context.post(task) {
            task();
        }
    }
}

/// Handle to an in-memory cluster.
pub(crate) struct MemoryCluster {
    pub(crate) shared: Arc<ClusterShared>,
}

fn require_open(cluster: &ClusterShared) -> EngineResult<()> {
    match cluster.phase() {
        Phase::Open => Ok(()),
        _ => Err(EngineError::new(
            ErrorCode::ServiceNotAvailable,
            "cluster is not open",
        )),
    }
}

fn require_bucket(cluster: &ClusterShared, bucket: &str) -> EngineResult<()> {
    require_open(cluster)?;
    if cluster.bucket_is_open(bucket) {
        Ok(())
    } else {
        Err(EngineError::bucket_not_found(bucket))
    }
}

impl Cluster for MemoryCluster {
    fn open(&self, handler: Handler<()>) {
        let work: Work<()> = Box::new(|cluster| {
            cluster.server.authenticate(&cluster.config.credentials)?;
            cluster.set_phase(Phase::Open);
            debug!(hosts = ?cluster.config.hosts, "cluster open");
            Ok(())
        });
        self.shared
            .unary(None, ErrorCode::UnambiguousTimeout, work, handler);
    }

    fn close(&self, handler: Handler<()>) {
        self.shared.close(handler);
    }

    fn open_bucket(&self, bucket: &str, handler: Handler<()>) {
        let bucket = bucket.to_string();
        let work: Work<()> = Box::new(move |cluster| {
            require_open(cluster)?;
            if !cluster.server.has_bucket(&bucket) {
                return Err(EngineError::bucket_not_found(&bucket));
            }
            cluster.set_bucket_open(&bucket, true);
            Ok(())
        });
        self.shared
            .unary(None, ErrorCode::UnambiguousTimeout, work, handler);
    }

    fn close_bucket(&self, bucket: &str, handler: Handler<()>) {
        let bucket = bucket.to_string();
        let work: Work<()> = Box::new(move |cluster| {
            if cluster.set_bucket_open(&bucket, false) {
                Ok(())
            } else {
                Err(EngineError::bucket_not_found(&bucket))
            }
        });
        self.shared
            .unary(None, ErrorCode::UnambiguousTimeout, work, handler);
    }

    fn execute(&self, request: Request, handler: Handler<Response>) {
        let timeout_code = if request.op.is_mutation() {
            ErrorCode::AmbiguousTimeout
        } else {
            ErrorCode::UnambiguousTimeout
        };
        let timeout = request.timeout;
        let work: Work<Response> = Box::new(move |cluster| {
            require_bucket(cluster, &request.id.bucket)?;
            let bucket = cluster.server.bucket(&request.id.bucket)?;
            bucket.apply(&request.id, request.op)
        });
        self.shared.unary(timeout, timeout_code, work, handler);
    }

    fn execute_streaming(
        &self,
        request: StreamRequest,
        on_row: RowHandler,
        on_complete: Handler<StreamMeta>,
    ) {
        let StreamRequest { kind, timeout } = request;
        let source: Work<StreamOutput> = Box::new(move |cluster| {
            require_open(cluster)?;
            cluster.server.stream(kind)
        });
        self.shared.submit(Box::new(StreamOp {
            deadline: timeout.map(|t| Instant::now() + t),
            started: Instant::now(),
            source: Some(source),
            rows: VecDeque::new(),
            meta: None,
            on_row,
            on_complete: Some(on_complete),
        }));
    }

    fn diagnostics(&self, report_id: Option<String>, handler: Handler<DiagnosticsReport>) {
        let work: Work<DiagnosticsReport> =
            Box::new(move |cluster| Ok(super::diagnostics_report(cluster, report_id)));
        self.shared
            .unary(None, ErrorCode::UnambiguousTimeout, work, handler);
    }

    fn ping(&self, request: PingRequest, handler: Handler<PingReport>) {
        let work: Work<PingReport> = Box::new(move |cluster| {
            require_open(cluster)?;
            Ok(super::ping_report(cluster, request))
        });
        self.shared
            .unary(None, ErrorCode::UnambiguousTimeout, work, handler);
    }
}

impl Drop for MemoryCluster {
    fn drop(&mut self) {
        // A cluster dropped without close still owes its handlers a completion
        if self.shared.phase() != Phase::Closed {
            self.shared.close(Box::new(|_| {}));
        }
    }
}
